#![cfg(unix)]

use mc_runner::config::{ManagerConfig, NewServerConfig};
use mc_runner::error::Error;
use mc_runner::server::{
    LifecycleController, LogSeverity, ProcessSample, ServerCatalog, ServerDefinition,
    ServerStatus, ServerUpdate, StatsSampler,
};
use mc_runner::{LocalFileManager, McRunner};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{TempDir, tempdir};

type TestResult = Result<(), Box<dyn std::error::Error>>;

// Stands in for `java`: reacts to a few console commands the way a server would
const FAKE_SERVER: &str = r#"#!/bin/sh
echo "Starting minecraft server version 1.21.4"
echo "Loading libraries, please wait..." >&2
while IFS= read -r line; do
  case "$line" in
    ready) echo '[12:00:01 INFO]: Done (3.141s)! For help, type "help"' ;;
    join) echo '[12:00:02 INFO]: Steve joined the game' ;;
    leave) echo '[12:00:03 INFO]: Steve left the game' ;;
    stop) echo '[12:00:04 INFO]: Stopping the server'; exit 0 ;;
    crash) echo 'Exception in server tick loop' >&2; exit 1 ;;
    *) echo "[12:00:05 INFO]: Unknown command: $line" ;;
  esac
done
"#;

// A server that never honours the stop command
const STUBBORN_SERVER: &str = r#"#!/bin/sh
echo "Starting minecraft server version 1.21.4"
while IFS= read -r line; do
  case "$line" in
    ready) echo '[12:00:01 INFO]: Done (3.141s)! For help, type "help"' ;;
    *) echo "[12:00:05 INFO]: Ignoring $line" ;;
  esac
done
"#;

// Saves its world when asked to terminate, ignoring the console entirely.
// Sleeping in the background keeps the shell free to run the trap at once.
const SAVING_SERVER: &str = r#"#!/bin/sh
trap 'echo "[12:00:06 INFO]: Saving the world"; touch world_saved.txt; exit 0' TERM
echo "Starting minecraft server version 1.21.4"
while true; do
  sleep 1 >/dev/null 2>&1 </dev/null &
  wait $!
done
"#;

// Survives SIGTERM; only a kill ends it
const UNKILLABLE_SERVER: &str = r#"#!/bin/sh
trap '' TERM
echo "Starting minecraft server version 1.21.4"
while true; do
  sleep 1 >/dev/null 2>&1 </dev/null &
  wait $!
done
"#;

const VERSION: &str = "1.21.4-51";

fn write_script(dir: &Path, content: &str) -> std::io::Result<PathBuf> {
    let script_path = dir.join("fake-java.sh");
    let mut file = File::create(&script_path)?;
    file.write_all(content.as_bytes())?;

    use std::os::unix::fs::PermissionsExt;
    let mut permissions = std::fs::metadata(&script_path)?.permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&script_path, permissions)?;

    Ok(script_path)
}

// Returns the config and the tempdir that owns everything it points at
fn test_config(script: &str) -> Result<(ManagerConfig, TempDir), Box<dyn std::error::Error>> {
    let root = tempdir()?;
    let script_path = write_script(root.path(), script)?;

    let mut config = ManagerConfig::new(root.path().join("servers"));
    config.java_path = script_path.display().to_string();
    config.stop_grace_period_ms = 300;
    config.terminate_grace_period_ms = 300;
    config.restart_delay_ms = 50;
    config.stats_interval_ms = 100;

    Ok((config, root))
}

async fn create_with_jar(
    controller: &LifecycleController,
    name: &str,
) -> Result<ServerDefinition, Box<dyn std::error::Error>> {
    let server = controller
        .create_server(NewServerConfig::new(name, VERSION))
        .await?;
    std::fs::write(
        server.directory_path.join(format!("leafmc-{}.jar", VERSION)),
        b"",
    )?;
    Ok(server)
}

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

fn log_contains(controller: &LifecycleController, server: &ServerDefinition, text: &str) -> bool {
    controller
        .get_logs(server.id, usize::MAX)
        .iter()
        .any(|entry| entry.message.contains(text))
}

#[tokio::test]
async fn test_create_server_writes_scaffold() -> TestResult {
    let (config, _root) = test_config(FAKE_SERVER)?;
    let runner = McRunner::new(config)?;
    let controller = runner.controller();

    let server = controller
        .create_server(NewServerConfig::new("My Server!", VERSION))
        .await?;

    assert_eq!(server.status, ServerStatus::Offline);
    assert!(server.directory_path.ends_with("My_Server_"));
    assert!(server.directory_path.join("eula.txt").is_file());
    assert!(server.directory_path.join("server.properties").is_file());
    assert!(server.directory_path.join("start.sh").is_file());
    assert!(server.directory_path.join("plugins").is_dir());
    assert_eq!(controller.list_servers().len(), 1);
    assert!(runner.config().catalog_path().is_file());

    Ok(())
}

#[tokio::test]
async fn test_create_server_name_conflict() -> TestResult {
    let (config, _root) = test_config(FAKE_SERVER)?;
    let runner = McRunner::new(config)?;
    let controller = runner.controller();

    controller
        .create_server(NewServerConfig::new("My Server", VERSION))
        .await?;

    // Sanitizes to the same directory
    let result = controller
        .create_server(NewServerConfig::new("My?Server", VERSION))
        .await;
    assert!(matches!(result, Err(Error::NameConflict(_))));
    assert_eq!(controller.list_servers().len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_create_server_rejects_invalid_request() -> TestResult {
    let (config, _root) = test_config(FAKE_SERVER)?;
    let runner = McRunner::new(config)?;

    let mut request = NewServerConfig::new("Tiny", VERSION);
    request.ram_megabytes = 128;
    let result = runner.controller().create_server(request).await;

    assert!(matches!(result, Err(Error::ConfigInvalid(_))));
    assert!(runner.controller().list_servers().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_start_without_jar_is_binary_missing() -> TestResult {
    let (config, _root) = test_config(FAKE_SERVER)?;
    let runner = McRunner::new(config)?;
    let controller = runner.controller();

    let server = controller
        .create_server(NewServerConfig::new("NoJar", VERSION))
        .await?;
    let result = controller.start_server(server.id).await;

    assert!(matches!(result, Err(Error::BinaryMissing(_))));
    assert_eq!(controller.get_status(server.id), ServerStatus::Offline);
    assert!(!controller.is_supervised(server.id));

    Ok(())
}

#[tokio::test]
async fn test_spawn_failure_sets_error() -> TestResult {
    let (mut config, root) = test_config(FAKE_SERVER)?;
    config.java_path = root.path().join("no-such-java").display().to_string();
    let runner = McRunner::new(config)?;
    let controller = runner.controller();

    let server = create_with_jar(controller, "Broken").await?;
    let result = controller.start_server(server.id).await;

    assert!(matches!(result, Err(Error::SpawnFailure(_))));
    assert_eq!(controller.get_status(server.id), ServerStatus::Error);
    assert!(log_contains(controller, &server, "Server error:"));
    assert!(controller.running_processes().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_double_start_is_rejected() -> TestResult {
    let (config, _root) = test_config(FAKE_SERVER)?;
    let runner = McRunner::new(config)?;
    let controller = runner.controller();

    let server = create_with_jar(controller, "Lobby").await?;
    controller.start_server(server.id).await?;
    assert_eq!(controller.get_status(server.id), ServerStatus::Starting);

    let second = controller.start_server(server.id).await;
    assert!(matches!(second, Err(Error::AlreadyRunning)));
    assert_eq!(controller.running_processes().len(), 1);

    runner.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_ready_line_transitions_once() -> TestResult {
    let (config, _root) = test_config(FAKE_SERVER)?;
    let runner = McRunner::new(config)?;
    let controller = runner.controller();
    let server = create_with_jar(controller, "Survival").await?;

    let mut events = controller.subscribe_status();
    controller.start_server(server.id).await?;
    controller.send_command(server.id, "ready").await?;
    controller.send_command(server.id, "ready").await?;

    assert!(wait_for(|| controller.get_status(server.id) == ServerStatus::Running).await);
    // Let the second ready line arrive
    assert!(wait_for(|| {
        controller
            .get_logs(server.id, usize::MAX)
            .iter()
            .filter(|entry| entry.message.contains("For help, type"))
            .count()
            == 2
    })
    .await);

    let mut running = 0;
    while let Some(event) = events.try_recv() {
        assert_eq!(event.id, server.id);
        if event.status == ServerStatus::Running {
            running += 1;
        }
    }
    assert_eq!(running, 1);

    runner.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_crash_is_reported_once() -> TestResult {
    let (config, _root) = test_config(FAKE_SERVER)?;
    let runner = McRunner::new(config)?;
    let controller = runner.controller();
    let server = create_with_jar(controller, "Crashy").await?;

    let mut events = controller.subscribe_status();
    controller.start_server(server.id).await?;
    controller.send_command(server.id, "ready").await?;
    assert!(wait_for(|| controller.get_status(server.id) == ServerStatus::Running).await);

    controller.send_command(server.id, "crash").await?;
    assert!(wait_for(|| controller.get_status(server.id) == ServerStatus::Offline).await);
    assert!(!controller.is_supervised(server.id));

    let mut statuses = Vec::new();
    while let Some(event) = events.try_recv() {
        assert_eq!(event.id, server.id);
        statuses.push(event.status);
    }
    assert_eq!(
        statuses,
        vec![ServerStatus::Starting, ServerStatus::Running, ServerStatus::Offline]
    );

    let logs = controller.get_logs(server.id, usize::MAX);
    let exits: Vec<_> = logs
        .iter()
        .filter(|entry| entry.message.starts_with("Server stopped with exit code"))
        .collect();
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].message, "Server stopped with exit code 1");

    // stderr output is recorded with error severity, before the exit entry
    let stderr_index = logs
        .iter()
        .position(|entry| entry.message == "Exception in server tick loop")
        .ok_or("missing stderr line")?;
    assert_eq!(logs[stderr_index].severity, LogSeverity::Error);
    assert!(logs
        .iter()
        .any(|entry| entry.severity == LogSeverity::Command && entry.message == "crash"));

    Ok(())
}

#[tokio::test]
async fn test_graceful_stop() -> TestResult {
    let (config, _root) = test_config(FAKE_SERVER)?;
    let runner = McRunner::new(config)?;
    let controller = runner.controller();
    let server = create_with_jar(controller, "Graceful").await?;

    controller.start_server(server.id).await?;
    controller.stop_server(server.id).await?;

    assert!(controller.wait_for_exit(server.id, Duration::from_secs(5)).await);
    assert_eq!(controller.get_status(server.id), ServerStatus::Offline);
    assert!(log_contains(controller, &server, "Stopping the server"));
    assert!(log_contains(controller, &server, "Server stopped with exit code 0"));

    Ok(())
}

#[tokio::test]
async fn test_stop_not_running() -> TestResult {
    let (config, _root) = test_config(FAKE_SERVER)?;
    let runner = McRunner::new(config)?;
    let controller = runner.controller();
    let server = create_with_jar(controller, "Idle").await?;

    assert!(matches!(
        controller.stop_server(server.id).await,
        Err(Error::NotRunning)
    ));
    assert!(matches!(
        controller.send_command(server.id, "say hi").await,
        Err(Error::NotRunning)
    ));
    assert_eq!(controller.get_status(server.id), ServerStatus::Offline);

    Ok(())
}

#[tokio::test]
async fn test_stop_escalates_to_kill() -> TestResult {
    let (config, _root) = test_config(STUBBORN_SERVER)?;
    let runner = McRunner::new(config)?;
    let controller = runner.controller();
    let server = create_with_jar(controller, "Stubborn").await?;

    controller.start_server(server.id).await?;
    controller.stop_server(server.id).await?;
    assert_eq!(controller.get_status(server.id), ServerStatus::Stopping);

    // Second stop while stopping is a no-op
    controller.stop_server(server.id).await?;
    assert_eq!(controller.running_processes().len(), 1);
    assert!(controller.running_processes()[0].stopping);

    assert!(controller.wait_for_exit(server.id, Duration::from_secs(5)).await);
    assert_eq!(controller.get_status(server.id), ServerStatus::Offline);
    assert!(log_contains(controller, &server, "Ignoring stop"));
    assert!(log_contains(controller, &server, "exit code unknown"));

    Ok(())
}

#[tokio::test]
async fn test_shutdown_lets_server_save() -> TestResult {
    let (config, _root) = test_config(SAVING_SERVER)?;
    let runner = McRunner::new(config)?;
    let controller = runner.controller();
    let server = create_with_jar(controller, "Saver").await?;

    controller.start_server(server.id).await?;
    assert!(wait_for(|| log_contains(controller, &server, "Starting minecraft server")).await);

    runner.shutdown().await;

    assert!(server.directory_path.join("world_saved.txt").is_file());
    assert!(log_contains(controller, &server, "Saving the world"));
    assert!(log_contains(controller, &server, "Server stopped with exit code 0"));
    assert_eq!(controller.get_status(server.id), ServerStatus::Offline);
    assert!(controller.running_processes().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_kill_after_ignored_sigterm() -> TestResult {
    let (config, _root) = test_config(UNKILLABLE_SERVER)?;
    let runner = McRunner::new(config)?;
    let controller = runner.controller();
    let server = create_with_jar(controller, "Unkillable").await?;

    controller.start_server(server.id).await?;
    assert!(wait_for(|| log_contains(controller, &server, "Starting minecraft server")).await);
    controller.stop_server(server.id).await?;

    assert!(controller.wait_for_exit(server.id, Duration::from_secs(5)).await);
    assert_eq!(controller.get_status(server.id), ServerStatus::Offline);
    assert!(log_contains(controller, &server, "exit code unknown"));

    Ok(())
}

#[tokio::test]
async fn test_restart_runs_a_new_process() -> TestResult {
    let (config, _root) = test_config(FAKE_SERVER)?;
    let runner = McRunner::new(config)?;
    let controller = runner.controller();
    let server = create_with_jar(controller, "Restartable").await?;

    controller.start_server(server.id).await?;
    let first_pid = controller.running_processes()[0].pid;

    controller.restart_server(server.id).await?;

    let processes = controller.running_processes();
    assert_eq!(processes.len(), 1);
    assert_ne!(processes[0].pid, first_pid);
    assert_eq!(controller.get_status(server.id), ServerStatus::Starting);
    assert!(log_contains(controller, &server, "Server stopped with exit code 0"));

    runner.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_restart_of_stopped_server_starts_it() -> TestResult {
    let (config, _root) = test_config(FAKE_SERVER)?;
    let runner = McRunner::new(config)?;
    let controller = runner.controller();
    let server = create_with_jar(controller, "Cold").await?;

    controller.restart_server(server.id).await?;
    assert!(controller.is_supervised(server.id));

    runner.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_delete_running_server() -> TestResult {
    let (config, _root) = test_config(FAKE_SERVER)?;
    let runner = McRunner::new(config)?;
    let controller = runner.controller();
    let server = create_with_jar(controller, "Doomed").await?;

    controller.start_server(server.id).await?;
    controller.delete_server(server.id).await?;

    assert!(!server.directory_path.exists());
    assert!(controller.list_servers().is_empty());
    assert!(controller.running_processes().is_empty());
    assert_eq!(controller.get_status(server.id), ServerStatus::Unknown);
    assert!(controller.get_logs(server.id, 10).is_empty());

    let reloaded = ServerCatalog::load(runner.config().catalog_path())?;
    assert!(reloaded.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_delete_unknown_server() -> TestResult {
    let (config, _root) = test_config(FAKE_SERVER)?;
    let runner = McRunner::new(config)?;
    let controller = runner.controller();
    let server = create_with_jar(controller, "Once").await?;

    controller.delete_server(server.id).await?;
    assert!(matches!(
        controller.delete_server(server.id).await,
        Err(Error::ServerNotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_send_command_is_logged() -> TestResult {
    let (config, _root) = test_config(FAKE_SERVER)?;
    let runner = McRunner::new(config)?;
    let controller = runner.controller();
    let server = create_with_jar(controller, "Chatty").await?;

    let mut logs = controller.subscribe_logs();
    controller.start_server(server.id).await?;
    controller.send_command(server.id, "say hello\r\n").await?;

    assert!(wait_for(|| log_contains(controller, &server, "Unknown command: say hello")).await);
    let entries = controller.get_logs(server.id, usize::MAX);
    assert!(entries
        .iter()
        .any(|entry| entry.severity == LogSeverity::Command && entry.message == "say hello"));

    let mut published = Vec::new();
    while let Some(event) = logs.try_recv() {
        published.extend(event.entries);
    }
    assert!(published.iter().any(|entry| entry.message == "say hello"));

    runner.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_log_capacity_is_bounded() -> TestResult {
    let (mut config, _root) = test_config(FAKE_SERVER)?;
    config.log_capacity = 5;
    let runner = McRunner::new(config)?;
    let controller = runner.controller();
    let server = create_with_jar(controller, "Bounded").await?;

    controller.start_server(server.id).await?;
    for i in 0..10 {
        controller.send_command(server.id, &format!("cmd-{}", i)).await?;
    }

    assert!(wait_for(|| log_contains(controller, &server, "Unknown command: cmd-9")).await);
    assert_eq!(controller.get_logs(server.id, 100).len(), 5);
    assert_eq!(controller.get_logs(server.id, 2).len(), 2);

    runner.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_reload_marks_missing_directories() -> TestResult {
    let (config, _root) = test_config(FAKE_SERVER)?;
    let runner = McRunner::new(config.clone())?;
    let kept = create_with_jar(runner.controller(), "Kept").await?;
    let lost = create_with_jar(runner.controller(), "Lost").await?;
    drop(runner);

    std::fs::remove_dir_all(&lost.directory_path)?;

    let reloaded = McRunner::new(config)?;
    let controller = reloaded.controller();
    assert_eq!(controller.get_status(kept.id), ServerStatus::Offline);
    assert_eq!(controller.get_status(lost.id), ServerStatus::Missing);

    // A missing directory cannot be started
    assert!(matches!(
        controller.start_server(lost.id).await,
        Err(Error::BinaryMissing(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_update_server_settings() -> TestResult {
    let (config, _root) = test_config(FAKE_SERVER)?;
    let runner = McRunner::new(config.clone())?;
    let controller = runner.controller();
    let server = create_with_jar(controller, "Tunable").await?;

    let too_small = ServerUpdate {
        ram_megabytes: Some(256),
        ..Default::default()
    };
    assert!(matches!(
        controller.update_server(server.id, too_small),
        Err(Error::ConfigInvalid(_))
    ));

    let update = ServerUpdate {
        port: Some(25570),
        auto_start: Some(true),
        ..Default::default()
    };
    let updated = controller.update_server(server.id, update)?;
    assert_eq!(updated.port, 25570);
    assert!(updated.auto_start);

    let reloaded = ServerCatalog::load(runner.config().catalog_path())?;
    assert_eq!(reloaded.get(server.id).map(|s| s.port), Some(25570));

    Ok(())
}

#[tokio::test]
async fn test_start_auto_servers_and_shutdown() -> TestResult {
    let (config, _root) = test_config(FAKE_SERVER)?;
    let runner = McRunner::new(config)?;
    let controller = runner.controller();

    let auto = create_with_jar(controller, "Auto").await?;
    let manual = create_with_jar(controller, "Manual").await?;
    controller.update_server(
        auto.id,
        ServerUpdate {
            auto_start: Some(true),
            ..Default::default()
        },
    )?;

    let started = runner.start_auto_servers().await?;
    assert_eq!(started, vec![auto.id]);
    assert!(controller.is_supervised(auto.id));
    assert!(!controller.is_supervised(manual.id));

    runner.shutdown().await;
    assert!(controller.running_processes().is_empty());
    assert_eq!(controller.get_status(auto.id), ServerStatus::Offline);

    Ok(())
}

struct FixedSampler;

impl StatsSampler for FixedSampler {
    fn sample(&self, _pid: u32) -> ProcessSample {
        ProcessSample {
            cpu_percent: 12.5,
            memory_bytes: 256 * 1024 * 1024,
        }
    }
}

#[tokio::test]
async fn test_stats_follow_the_running_process() -> TestResult {
    let (config, _root) = test_config(FAKE_SERVER)?;
    std::fs::create_dir_all(&config.servers_dir)?;
    let catalog = ServerCatalog::load(config.catalog_path())?;
    let controller = LifecycleController::new(
        config,
        catalog,
        Arc::new(LocalFileManager::new()),
        Arc::new(FixedSampler),
    )?;
    let server = create_with_jar(&controller, "Measured").await?;

    assert_eq!(controller.get_stats(server.id).memory_megabytes, 0);

    controller.start_server(server.id).await?;
    controller.send_command(server.id, "join").await?;

    assert!(wait_for(|| {
        let stats = controller.get_stats(server.id);
        stats.memory_megabytes == 256 && stats.player_count == 1
    })
    .await);
    assert_eq!(controller.get_stats(server.id).cpu_percent, 12.5);

    controller.stop_server(server.id).await?;
    assert!(controller.wait_for_exit(server.id, Duration::from_secs(5)).await);
    assert_eq!(controller.get_stats(server.id).memory_megabytes, 0);
    assert_eq!(controller.get_stats(server.id).player_count, 0);

    Ok(())
}
