//! The lifecycle controller: the state machine that owns every server process.
//!
//! ```text
//!            start             ready line            stop
//! offline ---------> starting -----------> running ---------> stopping
//!    ^                  |                     |                   |
//!    |                  +------ exit ---------+------- exit ------+
//!    +--------------------------------------------------------------+
//!
//! spawn failure / lost process -> error        absent directory at load -> missing
//! ```
//!
//! All mutable state lives behind one mutex that is never held across an
//! `.await`. Output readers, the exit supervisor, grace timers and the stats
//! monitor run as tasks; each carries the generation of the run it belongs to
//! and re-checks it before touching state, so events from an earlier run are
//! dropped instead of corrupting a later one.

use crate::config::{ManagerConfig, NewServerConfig, validate_config, validate_new_server};
use crate::error::{Error, Result};
use crate::files::FileManager;
use crate::server::catalog::ServerCatalog;
use crate::server::events::{EventNotifier, LogAppended, StatusChanged, Subscription};
use crate::server::logs::{LogBuffer, LogEntry, LogSeverity};
use crate::server::monitor::spawn_stats_monitor;
use crate::server::process::{
    ProcessHandle, ProcessInfo, ProcessRegistry, SpawnedProcess, find_server_binary,
    launch_arguments, spawn_process, terminate_child, write_line,
};
use crate::server::scaffold::write_scaffold;
use crate::server::stats::{PlayerTracker, RuntimeStats, StatsSampler};
use crate::server::{
    LineSplitter, ServerDefinition, ServerId, ServerStatus, ServerUpdate, sanitize_name,
};
use async_process::Child;
use chrono::Utc;
use futures_lite::io::{AsyncRead, AsyncReadExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

/// Extra time allowed for a killed process to be reaped
const EXIT_MARGIN: Duration = Duration::from_secs(5);

/// How long the supervisor waits for output readers after the process exited
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const READ_CHUNK_SIZE: usize = 8192;

/// Controls the lifecycle of every server in the catalog.
///
/// Cheap to clone; all clones share one state. Construct one per application
/// session and hand clones to whatever needs it.
#[derive(Clone)]
pub struct LifecycleController {
    inner: Arc<Inner>,
}

struct Inner {
    config: ManagerConfig,
    state: Mutex<ControllerState>,
    notifier: EventNotifier,
    files: Arc<dyn FileManager>,
    sampler: Arc<dyn StatsSampler>,
}

/// Non-owning controller reference held by timers and the stats monitor
#[derive(Clone)]
pub(crate) struct WeakController(Weak<Inner>);

impl WeakController {
    pub(crate) fn upgrade(&self) -> Option<LifecycleController> {
        self.0.upgrade().map(|inner| LifecycleController { inner })
    }
}

struct ControllerState {
    catalog: ServerCatalog,
    processes: ProcessRegistry,
    logs: HashMap<ServerId, LogBuffer>,
    stats: HashMap<ServerId, RuntimeStats>,
    players: HashMap<ServerId, PlayerTracker>,
    log_capacity: usize,
}

impl ControllerState {
    fn append_logs(&mut self, notifier: &EventNotifier, id: ServerId, entries: Vec<LogEntry>) {
        let capacity = self.log_capacity;
        let buffer = self
            .logs
            .entry(id)
            .or_insert_with(|| LogBuffer::new(capacity));
        for entry in &entries {
            buffer.push(entry.clone());
        }
        notifier.log_appended(id, entries);
    }

    /// Applies a status transition, persists it and notifies subscribers
    fn set_status(&mut self, notifier: &EventNotifier, id: ServerId, status: ServerStatus) {
        match self
            .catalog
            .update_in_place(id, |definition| definition.status = status)
        {
            Ok(()) => {}
            Err(Error::ServerNotFound(_)) => {
                tracing::debug!(server_id = %id, %status, "Ignoring transition for deleted server");
                return;
            }
            Err(e) => {
                tracing::warn!(server_id = %id, %status, error = %e, "Failed to persist status");
            }
        }
        notifier.status_changed(id, status);
    }

    fn status_of(&self, id: ServerId) -> Option<ServerStatus> {
        self.catalog.get(id).map(|definition| definition.status)
    }
}

enum Wake {
    Exited(std::io::Result<std::process::ExitStatus>),
    KillRequested,
}

impl LifecycleController {
    /// Creates a controller over `catalog`.
    ///
    /// Nothing is spawned until a server is started, so this does not need a
    /// running Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigInvalid`] if `config` fails [`validate_config`].
    pub fn new(
        config: ManagerConfig,
        catalog: ServerCatalog,
        files: Arc<dyn FileManager>,
        sampler: Arc<dyn StatsSampler>,
    ) -> Result<Self> {
        validate_config(&config)?;

        let log_capacity = config.log_capacity;
        let logs = catalog
            .list()
            .into_iter()
            .map(|definition| (definition.id, LogBuffer::new(log_capacity)))
            .collect();

        let state = ControllerState {
            catalog,
            processes: ProcessRegistry::default(),
            logs,
            stats: HashMap::new(),
            players: HashMap::new(),
            log_capacity,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(state),
                notifier: EventNotifier::default(),
                files,
                sampler,
            }),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn notifier(&self) -> &EventNotifier {
        &self.inner.notifier
    }

    /// Subscribe to `statusChanged` events
    pub fn subscribe_status(&self) -> Subscription<StatusChanged> {
        self.inner.notifier.subscribe_status()
    }

    /// Subscribe to `logAppended` events
    pub fn subscribe_logs(&self) -> Subscription<LogAppended> {
        self.inner.notifier.subscribe_logs()
    }

    pub(crate) fn downgrade(&self) -> WeakController {
        WeakController(Arc::downgrade(&self.inner))
    }

    fn lock(&self) -> Result<MutexGuard<'_, ControllerState>> {
        self.inner
            .state
            .lock()
            .map_err(|_| Error::Other("Failed to lock controller state".to_string()))
    }

    /// Creates a server directory with its initial files and registers it.
    ///
    /// # Errors
    ///
    /// * [`Error::ConfigInvalid`] if the request fails validation
    /// * [`Error::NameConflict`] if the sanitized directory already exists
    /// * [`Error::Io`] if the directory or its files cannot be written
    #[tracing::instrument(skip(self, request), fields(server_name = %request.name))]
    pub async fn create_server(&self, request: NewServerConfig) -> Result<ServerDefinition> {
        tracing::info!("Creating server");
        validate_new_server(&request)?;

        let dir_name = sanitize_name(request.name.trim());
        let directory = self.inner.config.servers_dir.join(&dir_name);

        {
            let state = self.lock()?;
            if state.catalog.find_by_directory(&directory).is_some() {
                tracing::warn!(directory = %directory.display(), "Directory already owned by another server");
                return Err(Error::NameConflict(dir_name));
            }
        }

        if self.inner.files.exists(&directory).await? {
            tracing::warn!(directory = %directory.display(), "Server directory already exists");
            return Err(Error::NameConflict(dir_name));
        }

        self.inner.files.create_directory(&directory).await?;
        let definition = ServerDefinition::from_request(&request, directory);

        let registered = match write_scaffold(
            self.inner.files.as_ref(),
            &definition,
            &self.inner.config.java_path,
        )
        .await
        {
            Ok(()) => self.register_definition(&definition),
            Err(e) => Err(e),
        };

        if let Err(e) = registered {
            tracing::error!(error = %e, "Failed to create server, removing its directory");
            if let Err(cleanup) = self.inner.files.remove_tree(&definition.directory_path).await {
                tracing::warn!(error = %cleanup, "Failed to remove partially created server");
            }
            return Err(e);
        }

        tracing::info!(server_id = %definition.id, "Server created");
        Ok(definition)
    }

    fn register_definition(&self, definition: &ServerDefinition) -> Result<()> {
        let mut state = self.lock()?;
        if state
            .catalog
            .find_by_directory(&definition.directory_path)
            .is_some()
        {
            return Err(Error::NameConflict(sanitize_name(definition.name.trim())));
        }
        state.catalog.upsert(definition.clone())?;
        let capacity = state.log_capacity;
        state.logs.insert(definition.id, LogBuffer::new(capacity));
        Ok(())
    }

    /// Spawns the server process.
    ///
    /// Returns once the process is registered; the server reports `running`
    /// later, when its ready line is seen.
    ///
    /// # Errors
    ///
    /// * [`Error::ServerNotFound`] for an unknown id
    /// * [`Error::AlreadyRunning`] if a process is already supervised
    /// * [`Error::BinaryMissing`] if no server jar is in the directory
    /// * [`Error::SpawnFailure`] if the OS refused to create the process
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn start_server(&self, id: ServerId) -> Result<()> {
        tracing::info!("Attempting to start server");

        let definition = {
            let state = self.lock()?;
            let definition = state.catalog.get(id).cloned().ok_or_else(|| {
                tracing::error!("Start requested for unknown server");
                Error::ServerNotFound(id.to_string())
            })?;
            if state.processes.contains(id) {
                tracing::warn!("Server already running");
                return Err(Error::AlreadyRunning);
            }
            definition
        };

        let jar = self.locate_binary(&definition).await?;
        let args = launch_arguments(&definition, &jar);
        tracing::debug!(jar = %jar, ?args, "Resolved launch command");

        let mut guard = self.lock()?;
        let state = &mut *guard;
        let notifier = &self.inner.notifier;

        // Re-check: another start or a delete may have run while listing
        if !state.catalog.contains(id) {
            return Err(Error::ServerNotFound(id.to_string()));
        }
        if state.processes.contains(id) {
            tracing::warn!("Server was started concurrently");
            return Err(Error::AlreadyRunning);
        }

        let started_at = Utc::now();
        if let Err(e) = state
            .catalog
            .update_in_place(id, |d| d.last_started_at = Some(started_at))
        {
            tracing::warn!(error = %e, "Failed to persist start time");
        }

        let spawned = match spawn_process(
            &self.inner.config.java_path,
            &args,
            &definition.directory_path,
        ) {
            Ok(spawned) => spawned,
            Err(e) => {
                tracing::error!(error = %e, "Failed to spawn server process");
                state.append_logs(notifier, id, vec![LogEntry::error(format!("Server error: {}", e))]);
                state.set_status(notifier, id, ServerStatus::Error);
                return Err(e);
            }
        };

        let SpawnedProcess {
            child,
            pid,
            stdin,
            stdout,
            stderr,
        } = spawned;
        let generation = state.processes.allocate_generation();
        let kill = Arc::new(Notify::new());
        let (exit_tx, exit_rx) = watch::channel(false);

        let readers = vec![
            tokio::spawn(pump_output(self.clone(), id, generation, stdout, LogSeverity::Info)),
            tokio::spawn(pump_output(self.clone(), id, generation, stderr, LogSeverity::Error)),
        ];
        let stats_task = spawn_stats_monitor(
            self.downgrade(),
            id,
            generation,
            self.inner.config.stats_interval(),
        );

        state.processes.insert(
            id,
            ProcessHandle {
                generation,
                pid,
                spawned_at: Instant::now(),
                stdin: Arc::new(tokio::sync::Mutex::new(stdin)),
                kill: Arc::clone(&kill),
                exited: exit_rx,
                stopping: false,
                stats_task: Some(stats_task),
                grace_timer: None,
            },
        );
        state.stats.remove(&id);
        state.players.insert(id, PlayerTracker::new());
        let capacity = state.log_capacity;
        state
            .logs
            .entry(id)
            .or_insert_with(|| LogBuffer::new(capacity));
        state.set_status(notifier, id, ServerStatus::Starting);

        tokio::spawn(supervise(
            self.clone(),
            id,
            generation,
            child,
            kill,
            readers,
            exit_tx,
        ));

        tracing::info!(pid, generation, "Server process spawned");
        Ok(())
    }

    async fn locate_binary(&self, definition: &ServerDefinition) -> Result<String> {
        let directory = &definition.directory_path;
        let missing = || Error::BinaryMissing(directory.display().to_string());

        if !self.inner.files.exists(directory).await? {
            tracing::warn!(directory = %directory.display(), "Server directory does not exist");
            return Err(missing());
        }

        let entries = self.inner.files.list_entries(directory).await?;
        find_server_binary(&entries, &definition.server_type).ok_or_else(|| {
            tracing::warn!(server_type = %definition.server_type, "No server jar found");
            missing()
        })
    }

    /// Asks the server to stop.
    ///
    /// Writes the stop command and returns; if the process has not exited when
    /// the grace period ends it is killed. Stopping a server that is already
    /// stopping is a no-op.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn stop_server(&self, id: ServerId) -> Result<()> {
        tracing::info!("Attempting to stop server");

        let (stdin, kill) = {
            let mut guard = self.lock()?;
            let state = &mut *guard;

            let Some(handle) = state.processes.get_mut(id) else {
                tracing::warn!("Attempted to stop a server that is not running");
                return Err(Error::NotRunning);
            };
            if handle.stopping {
                tracing::debug!("Server is already stopping");
                return Ok(());
            }

            handle.stopping = true;
            handle.grace_timer = Some(self.spawn_grace_timer(id, handle.generation));
            let pipes = (Arc::clone(&handle.stdin), Arc::clone(&handle.kill));

            state.set_status(&self.inner.notifier, id, ServerStatus::Stopping);
            pipes
        };

        if let Err(e) = write_line(&stdin, &self.inner.config.stop_command).await {
            tracing::warn!(error = %e, "Failed to send stop command, terminating process");
            kill.notify_one();
        }

        tracing::info!("Stop requested");
        Ok(())
    }

    fn spawn_grace_timer(&self, id: ServerId, generation: u64) -> JoinHandle<()> {
        let controller = self.downgrade();
        let grace = self.inner.config.stop_grace_period();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(controller) = controller.upgrade() {
                controller.force_kill(id, generation);
            }
        })
    }

    fn force_kill(&self, id: ServerId, generation: u64) {
        let Ok(state) = self.lock() else {
            return;
        };
        if let Some(handle) = state.processes.current(id, generation) {
            tracing::warn!(server_id = %id, "Grace period elapsed, forcing termination");
            handle.kill.notify_one();
        }
    }

    /// Stops the server, waits for it to exit, pauses, and starts it again.
    ///
    /// A failed stop does not prevent the start attempt; the start result is
    /// what gets returned.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn restart_server(&self, id: ServerId) -> Result<()> {
        tracing::info!("Restarting server");

        match self.stop_server(id).await {
            Ok(()) => {
                if !self.wait_for_exit(id, self.stop_patience()).await {
                    tracing::warn!("Server did not exit before restart");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Stop failed during restart, starting anyway"),
        }

        tokio::time::sleep(self.inner.config.restart_delay()).await;

        self.start_server(id).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to start server during restart");
            e
        })
    }

    /// Deletes the server: stops it if needed, removes its directory and its
    /// catalog entry.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn delete_server(&self, id: ServerId) -> Result<()> {
        tracing::info!("Deleting server");

        let definition = {
            let state = self.lock()?;
            state
                .catalog
                .get(id)
                .cloned()
                .ok_or_else(|| Error::ServerNotFound(id.to_string()))?
        };

        if self.is_supervised(id) {
            match self.stop_server(id).await {
                Ok(()) | Err(Error::NotRunning) => {}
                Err(e) => return Err(e),
            }

            let patience = self.stop_patience();
            if !self.wait_for_exit(id, patience).await {
                self.terminate(id);
                let patience = self.inner.config.terminate_grace_period() + EXIT_MARGIN;
                if !self.wait_for_exit(id, patience).await {
                    tracing::error!("Server process did not exit, not deleting");
                    return Err(Error::Other(format!("Server {} did not exit", id)));
                }
            }
        }

        self.inner
            .files
            .remove_tree(&definition.directory_path)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to remove server directory");
                e
            })?;

        let mut state = self.lock()?;
        if state.processes.contains(id) {
            tracing::warn!("Server was restarted while being deleted");
            return Err(Error::AlreadyRunning);
        }
        state.catalog.remove(id)?;
        state.logs.remove(&id);
        state.stats.remove(&id);
        state.players.remove(&id);

        tracing::info!("Server deleted");
        Ok(())
    }

    /// Writes a console command to the server's stdin.
    ///
    /// The command is recorded in the log with severity `command`. No reply
    /// is awaited.
    #[tracing::instrument(skip(self, text), fields(server_id = %id))]
    pub async fn send_command(&self, id: ServerId, text: &str) -> Result<()> {
        let text = text.trim_end_matches(['\r', '\n']);

        let stdin = {
            let state = self.lock()?;
            let handle = state.processes.get(id).ok_or_else(|| {
                tracing::warn!("Command sent to a server that is not running");
                Error::NotRunning
            })?;
            Arc::clone(&handle.stdin)
        };

        write_line(&stdin, text).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to send command");
            e
        })?;

        let mut state = self.lock()?;
        state.append_logs(
            &self.inner.notifier,
            id,
            vec![LogEntry::new(LogSeverity::Command, text)],
        );
        tracing::debug!("Command sent");
        Ok(())
    }

    /// Current status; `unknown` for ids not in the catalog.
    pub fn get_status(&self, id: ServerId) -> ServerStatus {
        match self.lock() {
            Ok(state) => state.status_of(id).unwrap_or(ServerStatus::Unknown),
            Err(_) => ServerStatus::Unknown,
        }
    }

    /// The last `max_lines` log entries in arrival order.
    pub fn get_logs(&self, id: ServerId, max_lines: usize) -> Vec<LogEntry> {
        let Ok(state) = self.lock() else {
            return Vec::new();
        };
        state
            .logs
            .get(&id)
            .map(|buffer| buffer.tail(max_lines))
            .unwrap_or_default()
    }

    /// Latest stats snapshot, zeroed when the server is not running.
    pub fn get_stats(&self, id: ServerId) -> RuntimeStats {
        let Ok(state) = self.lock() else {
            return RuntimeStats::default();
        };
        state.stats.get(&id).copied().unwrap_or_default()
    }

    pub fn list_servers(&self) -> Vec<ServerDefinition> {
        self.lock()
            .map(|state| state.catalog.list())
            .unwrap_or_default()
    }

    pub fn get_server(&self, id: ServerId) -> Option<ServerDefinition> {
        self.lock().ok()?.catalog.get(id).cloned()
    }

    /// Changes launch settings. A running server picks them up on its next start.
    #[tracing::instrument(skip(self, update), fields(server_id = %id))]
    pub fn update_server(&self, id: ServerId, update: ServerUpdate) -> Result<ServerDefinition> {
        let mut state = self.lock()?;
        let current = state
            .catalog
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ServerNotFound(id.to_string()))?;

        let mut candidate = NewServerConfig::new(current.name.clone(), current.version.clone());
        candidate.ram_megabytes = update.ram_megabytes.unwrap_or(current.ram_megabytes);
        candidate.port = update.port.unwrap_or(current.port);
        validate_new_server(&candidate)?;

        let updated = state.catalog.modify(id, |definition| update.apply(definition))?;
        tracing::info!("Server settings updated");
        Ok(updated)
    }

    /// Processes currently supervised by this controller
    pub fn running_processes(&self) -> Vec<ProcessInfo> {
        self.lock()
            .map(|state| state.processes.snapshot())
            .unwrap_or_default()
    }

    /// True while a process handle exists for `id`
    pub fn is_supervised(&self, id: ServerId) -> bool {
        self.lock()
            .map(|state| state.processes.contains(id))
            .unwrap_or(false)
    }

    /// Waits until the supervised process of `id` has exited and its exit
    /// transition was applied. Returns `false` on timeout.
    pub async fn wait_for_exit(&self, id: ServerId, timeout: Duration) -> bool {
        let mut exited = {
            let Ok(state) = self.lock() else {
                return false;
            };
            match state.processes.get(id) {
                Some(handle) => handle.exited.clone(),
                None => return true,
            }
        };

        let wait = async {
            while !*exited.borrow_and_update() {
                if exited.changed().await.is_err() {
                    break;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Upper bound for a stop: the grace period, SIGTERM and a final kill
    fn stop_patience(&self) -> Duration {
        self.inner.config.stop_grace_period()
            + self.inner.config.terminate_grace_period()
            + EXIT_MARGIN
    }

    /// Terminates the process of `id` without waiting for the stop command.
    ///
    /// The supervisor sends SIGTERM and kills the process if it is still alive
    /// after the terminate grace period.
    fn terminate(&self, id: ServerId) {
        if let Ok(state) = self.lock() {
            if let Some(handle) = state.processes.get(id) {
                handle.kill.notify_one();
            }
        }
    }

    /// Stops every supervised process and waits for them to exit.
    ///
    /// Each server first gets the stop command, then SIGTERM once its grace
    /// period ends, then SIGKILL. Child processes are not reaped automatically
    /// when the manager goes away; call this before exiting.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        let ids: Vec<ServerId> = match self.lock() {
            Ok(state) => state
                .processes
                .snapshot()
                .into_iter()
                .map(|info| info.id)
                .collect(),
            Err(e) => {
                tracing::error!(error = %e, "Cannot shut down servers");
                return;
            }
        };

        tracing::info!(num_servers = ids.len(), "Stopping all server processes");
        for id in &ids {
            match self.stop_server(*id).await {
                Ok(()) | Err(Error::NotRunning) => {}
                Err(e) => {
                    tracing::warn!(server_id = %id, error = %e, "Stop failed, terminating");
                    self.terminate(*id);
                }
            }
        }

        let patience = self.stop_patience();
        let waits = ids.iter().map(|id| async move {
            if !self.wait_for_exit(*id, patience).await {
                tracing::warn!(server_id = %id, "Server process did not exit during shutdown");
            }
        });
        futures::future::join_all(waits).await;
        tracing::info!("All server processes stopped");
    }

    /// Records a batch of output lines from one stream of run `generation`.
    fn ingest_output(&self, id: ServerId, generation: u64, severity: LogSeverity, lines: Vec<String>) {
        if lines.is_empty() {
            return;
        }
        let Ok(mut guard) = self.lock() else {
            return;
        };
        let state = &mut *guard;
        let notifier = &self.inner.notifier;

        if state.processes.current(id, generation).is_none() {
            tracing::debug!(server_id = %id, generation, "Dropping output of a stale run");
            return;
        }

        let Some(definition) = state.catalog.get(id) else {
            return;
        };
        let marker = self.inner.config.ready_marker(&definition.server_type);
        let became_ready = definition.status == ServerStatus::Starting
            && lines.iter().any(|line| marker.matches(line));

        if let Some(tracker) = state.players.get_mut(&id) {
            for line in &lines {
                tracker.observe(line);
            }
        }

        let entries = lines
            .into_iter()
            .map(|line| LogEntry::new(severity, line))
            .collect();
        state.append_logs(notifier, id, entries);

        if became_ready {
            tracing::info!(server_id = %id, "Server is ready");
            state.set_status(notifier, id, ServerStatus::Running);
        }
    }

    /// Applies the exit transition of run `generation`.
    fn handle_exit(&self, id: ServerId, generation: u64, code: Option<i32>) {
        let Ok(mut guard) = self.lock() else {
            return;
        };
        let state = &mut *guard;

        // Dropping the handle cancels the grace timer and the stats monitor
        let Some(handle) = state.processes.remove_current(id, generation) else {
            return;
        };
        let uptime = handle.spawned_at.elapsed();
        drop(handle);

        state.stats.remove(&id);
        if let Some(tracker) = state.players.get_mut(&id) {
            tracker.clear();
        }

        let message = match code {
            Some(code) => format!("Server stopped with exit code {}", code),
            None => "Server stopped with exit code unknown (terminated by signal)".to_string(),
        };
        tracing::info!(server_id = %id, ?code, uptime_secs = uptime.as_secs(), "Server process exited");

        let notifier = &self.inner.notifier;
        state.append_logs(notifier, id, vec![LogEntry::info(message)]);
        state.set_status(notifier, id, ServerStatus::Offline);
    }

    /// Moves run `generation` to `error` after supervision itself failed.
    fn handle_failure(&self, id: ServerId, generation: u64, reason: String) {
        let Ok(mut guard) = self.lock() else {
            return;
        };
        let state = &mut *guard;

        if state.processes.remove_current(id, generation).is_none() {
            return;
        }
        state.stats.remove(&id);
        if let Some(tracker) = state.players.get_mut(&id) {
            tracker.clear();
        }

        tracing::error!(server_id = %id, error = %reason, "Lost track of server process");
        let notifier = &self.inner.notifier;
        state.append_logs(notifier, id, vec![LogEntry::error(format!("Server error: {}", reason))]);
        state.set_status(notifier, id, ServerStatus::Error);
    }

    /// Recomputes the stats of run `generation`. Returns `false` once that run
    /// is no longer supervised.
    pub(crate) fn refresh_stats(&self, id: ServerId, generation: u64) -> bool {
        let (pid, last_started_at) = {
            let Ok(state) = self.lock() else {
                return false;
            };
            let Some(handle) = state.processes.current(id, generation) else {
                return false;
            };
            (
                handle.pid,
                state.catalog.get(id).and_then(|d| d.last_started_at),
            )
        };

        // Sampling touches /proc; keep it outside the lock
        let sample = self.inner.sampler.sample(pid);
        let uptime_seconds = last_started_at
            .map(|at| (Utc::now() - at).num_seconds().max(0) as u64)
            .unwrap_or(0);

        let Ok(mut state) = self.lock() else {
            return false;
        };
        if state.processes.current(id, generation).is_none() {
            return false;
        }
        let player_count = state.players.get(&id).map(|t| t.count()).unwrap_or(0);
        state.stats.insert(
            id,
            RuntimeStats {
                cpu_percent: sample.cpu_percent,
                memory_megabytes: sample.memory_bytes / (1024 * 1024),
                uptime_seconds,
                player_count,
            },
        );
        true
    }
}

/// Reads one output stream until EOF, publishing a log batch per read.
async fn pump_output<R>(
    controller: LifecycleController,
    id: ServerId,
    generation: u64,
    mut stream: R,
    severity: LogSeverity,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut splitter = LineSplitter::new();
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let lines = splitter.push(&buf[..n]);
                controller.ingest_output(id, generation, severity, lines);
            }
            Err(e) => {
                tracing::debug!(server_id = %id, ?severity, error = %e, "Output reader exiting due to read error");
                break;
            }
        }
    }

    if let Some(rest) = splitter.finish() {
        controller.ingest_output(id, generation, severity, vec![rest]);
    }
    tracing::debug!(server_id = %id, ?severity, "Output reader finished");
}

/// Owns the child of run `generation` until it exits, then applies the exit
/// transition.
async fn supervise(
    controller: LifecycleController,
    id: ServerId,
    generation: u64,
    mut child: Child,
    kill: Arc<Notify>,
    readers: Vec<JoinHandle<()>>,
    exit_tx: watch::Sender<bool>,
) {
    let wake = tokio::select! {
        status = child.status() => Wake::Exited(status),
        _ = kill.notified() => Wake::KillRequested,
    };

    let outcome = match wake {
        Wake::Exited(status) => status,
        Wake::KillRequested => {
            tracing::warn!(server_id = %id, "Terminating server process");
            let grace = controller.inner.config.terminate_grace_period();
            terminate_child(&mut child, grace).await
        }
    };

    let aborts: Vec<_> = readers.iter().map(|reader| reader.abort_handle()).collect();
    if tokio::time::timeout(READER_DRAIN_TIMEOUT, futures::future::join_all(readers))
        .await
        .is_err()
    {
        tracing::debug!(server_id = %id, "Output readers did not finish, aborting them");
        for abort in aborts {
            abort.abort();
        }
    }

    match outcome {
        Ok(status) => controller.handle_exit(id, generation, status.code()),
        Err(e) => {
            let _ = child.kill();
            controller.handle_failure(id, generation, e.to_string());
        }
    }

    let _ = exit_tx.send(true);
}
