// src/server/process.rs
use crate::error::{Error, Result};
use crate::server::{ServerDefinition, ServerId};
use async_process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use futures_lite::io::AsyncWriteExt;
use std::collections::HashMap;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Picks the launchable jar out of a directory listing.
///
/// A jar qualifies when its name ends in `.jar` and contains the server type
/// (case-insensitive), e.g. `leafmc-1.21.4-51.jar` for type `leafmc`. When
/// several qualify the lexicographically first one wins.
pub fn find_server_binary(entries: &[String], server_type: &str) -> Option<String> {
    let needle = server_type.to_lowercase();
    let mut candidates: Vec<&String> = entries
        .iter()
        .filter(|name| {
            let lower = name.to_lowercase();
            lower.ends_with(".jar") && lower.contains(&needle)
        })
        .collect();
    candidates.sort();
    candidates.first().map(|name| name.to_string())
}

/// JVM argument vector for launching `jar` with the definition's settings.
///
/// `-Xmx{ram}M -Xms{ram/2}M {javaArgs} -jar {jar} nogui`
pub fn launch_arguments(definition: &ServerDefinition, jar: &str) -> Vec<String> {
    let mut args = vec![
        format!("-Xmx{}M", definition.ram_megabytes),
        format!("-Xms{}M", definition.ram_megabytes / 2),
    ];
    args.extend(definition.java_args.split_whitespace().map(str::to_string));
    args.push("-jar".to_string());
    args.push(jar.to_string());
    args.push("nogui".to_string());
    args
}

/// A freshly spawned child with its three streams taken apart
pub(crate) struct SpawnedProcess {
    pub child: Child,
    pub pid: u32,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Spawns `java` with `args` inside `directory`.
pub(crate) fn spawn_process(java: &str, args: &[String], directory: &Path) -> Result<SpawnedProcess> {
    let mut command = Command::new(java);
    command
        .args(args)
        .current_dir(directory)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|e| Error::SpawnFailure(format!("{}: {}", java, e)))?;

    let pid = child.id();
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::SpawnFailure("Failed to get stdin pipe from child process".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::SpawnFailure("Failed to get stdout pipe from child process".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::SpawnFailure("Failed to get stderr pipe from child process".to_string()))?;

    Ok(SpawnedProcess {
        child,
        pid,
        stdin,
        stdout,
        stderr,
    })
}

/// Writes one console line to the server's stdin.
pub(crate) async fn write_line(stdin: &Mutex<ChildStdin>, text: &str) -> Result<()> {
    let mut stdin = stdin.lock().await;
    let mut data = text.as_bytes().to_vec();
    data.push(b'\n');

    stdin
        .write_all(&data)
        .await
        .map_err(|e| Error::Communication(format!("Failed to write to stdin: {}", e)))?;
    stdin
        .flush()
        .await
        .map_err(|e| Error::Communication(format!("Failed to flush stdin: {}", e)))?;
    Ok(())
}

/// Terminates `child` and waits until it has been reaped.
///
/// On unix the child first gets SIGTERM so the JVM can run its shutdown hooks
/// and save the world; it is killed only if it is still alive after `grace`.
/// Elsewhere it is killed right away.
pub(crate) async fn terminate_child(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        let pid = child.id();
        match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => {
                if let Ok(status) = tokio::time::timeout(grace, child.status()).await {
                    return status;
                }
                tracing::warn!(pid, "Process did not exit after SIGTERM, killing it");
            }
            // Already gone
            Err(nix::errno::Errno::ESRCH) => return child.status().await,
            Err(e) => tracing::warn!(pid, error = %e, "Failed to send SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill() {
        tracing::warn!(error = %e, "Failed to kill process");
    }
    child.status().await
}

/// Splits a byte stream into trimmed, non-empty lines.
///
/// Bytes after the last newline are held until the next chunk (or
/// [`LineSplitter::finish`]). Invalid UTF-8 is replaced rather than rejected,
/// since server software may print arbitrary bytes.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                if let Some(line) = Self::decode(&self.pending) {
                    lines.push(line);
                }
                self.pending.clear();
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Returns the unterminated remainder, if any
    pub fn finish(&mut self) -> Option<String> {
        let line = Self::decode(&self.pending);
        self.pending.clear();
        line
    }

    fn decode(bytes: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(bytes);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

/// Runtime handle of one supervised process.
///
/// Dropping the handle aborts its stats monitor and any pending grace timer,
/// so a timer can never fire against a later run of the same server.
pub(crate) struct ProcessHandle {
    pub generation: u64,
    pub pid: u32,
    pub spawned_at: Instant,
    pub stdin: Arc<Mutex<ChildStdin>>,
    /// Signalled to make the supervisor terminate the child
    pub kill: Arc<Notify>,
    /// Flips to `true` once the exit transition has been applied
    pub exited: watch::Receiver<bool>,
    pub stopping: bool,
    pub stats_task: Option<JoinHandle<()>>,
    pub grace_timer: Option<JoinHandle<()>>,
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Some(task) = self.stats_task.take() {
            task.abort();
        }
        if let Some(timer) = self.grace_timer.take() {
            timer.abort();
        }
    }
}

/// Snapshot of a supervised process, safe to hand out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub id: ServerId,
    pub pid: u32,
    pub stopping: bool,
}

/// Maps server ids to the handles of their running processes
#[derive(Default)]
pub(crate) struct ProcessRegistry {
    handles: HashMap<ServerId, ProcessHandle>,
    next_generation: u64,
}

impl ProcessRegistry {
    pub fn contains(&self, id: ServerId) -> bool {
        self.handles.contains_key(&id)
    }

    pub fn get(&self, id: ServerId) -> Option<&ProcessHandle> {
        self.handles.get(&id)
    }

    /// Handle for `id`, only if it belongs to run `generation`
    pub fn current(&self, id: ServerId, generation: u64) -> Option<&ProcessHandle> {
        self.handles.get(&id).filter(|h| h.generation == generation)
    }

    pub fn get_mut(&mut self, id: ServerId) -> Option<&mut ProcessHandle> {
        self.handles.get_mut(&id)
    }

    pub fn allocate_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    pub fn insert(&mut self, id: ServerId, handle: ProcessHandle) {
        self.handles.insert(id, handle);
    }

    /// Removes the handle for `id` if it belongs to run `generation`
    pub fn remove_current(&mut self, id: ServerId, generation: u64) -> Option<ProcessHandle> {
        if self.current(id, generation).is_some() {
            self.handles.remove(&id)
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> Vec<ProcessInfo> {
        self.handles
            .iter()
            .map(|(id, handle)| ProcessInfo {
                id: *id,
                pid: handle.pid,
                stopping: handle.stopping,
            })
            .collect()
    }
}
