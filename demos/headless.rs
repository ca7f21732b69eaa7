use anyhow::Context;
use mc_runner::McRunner;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `RUST_LOG=mc_runner=debug` shows every state transition
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .init();

    tracing::info!("Starting headless runner");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "demos/config.json".to_string());
    let runner = McRunner::from_config_file(&config_path)
        .with_context(|| format!("loading {}", config_path))?;
    let controller = runner.controller().clone();

    println!("Known servers:");
    for server in controller.list_servers() {
        println!(
            "- {} ({} {}) port {} [{}]",
            server.name, server.server_type, server.version, server.port, server.status
        );
    }

    // Print console output and status changes as they happen
    let mut status_events = controller.subscribe_status();
    let mut log_events = controller.subscribe_logs();
    let printer = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(event) = status_events.recv() => {
                    println!("[status] {} -> {}", event.id, event.status);
                }
                Some(event) = log_events.recv() => {
                    for entry in event.entries {
                        println!("[{}] {}", event.id, entry.message);
                    }
                }
                else => break,
            }
        }
    });

    if let Err(e) = runner.start_auto_servers().await {
        eprintln!("Some servers did not start: {}", e);
    }

    println!("Running. Press Ctrl+C to stop all servers.");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl+C")?;

    println!("Stopping servers...");
    runner.shutdown().await;
    printer.abort();

    for server in controller.list_servers() {
        println!("- {} [{}]", server.name, controller.get_status(server.id));
    }
    Ok(())
}
