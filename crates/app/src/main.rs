use anyhow::{Context, Result};
use clap::Parser;
use gitwatch::adapters::{FileConfigStore, Git2Vcs, StdoutSink};
use gitwatch::cli::{parse_line, CliArgs};
use gitwatch::services::Monitor;
use gitwatch_core::app::Command;
use gitwatch_core::ports::{ConfigStore, MonitorConfig, OutputSink, RepoStore, VcsPort};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();

    let store = match &args.config {
        Some(path) => FileConfigStore::with_path(path),
        None => FileConfigStore::new()?,
    };
    let store = Arc::new(store);
    let config = store
        .load()
        .with_context(|| format!("Failed to load config from {}", store.path().display()))?;

    let mut monitor_config = config.monitor;
    if let Some(repo_dir) = &args.repo_dir {
        // CLI overrides config file
        monitor_config.repo_dir = repo_dir.clone();
    }
    std::fs::create_dir_all(&monitor_config.repo_dir)
        .with_context(|| format!("Failed to create {}", monitor_config.repo_dir.display()))?;
    info!("Loaded config with repo_dir: {}", monitor_config.repo_dir.display());

    // a fetch stuck on the network must not keep the process alive
    let join_timeout = Duration::from_secs(monitor_config.join_timeout_secs);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the runtime")?;
    let result = runtime.block_on(serve(args, monitor_config, store));
    runtime.shutdown_timeout(join_timeout);
    result
}

async fn serve(args: CliArgs, config: MonitorConfig, store: Arc<FileConfigStore>) -> Result<()> {
    let vcs: Arc<dyn VcsPort> = Arc::new(Git2Vcs::new());
    let sink: Arc<dyn OutputSink> = Arc::new(StdoutSink::new());
    let repo_store: Arc<dyn RepoStore> = store;
    let mut monitor = Monitor::new(config, vcs, repo_store, sink)?;

    match args.to_command() {
        Some(cmd) => {
            monitor.handle_command(cmd);
            monitor.drain().await;
            monitor.stop().await;
        }
        None => {
            info!("Starting gitwatch, reading commands from stdin");
            let (command_tx, command_rx) = mpsc::unbounded_channel();
            tokio::spawn(read_commands(command_tx));
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Cannot listen for ctrl-c: {}", e);
                    std::future::pending::<()>().await;
                }
            };
            monitor.run(command_rx, shutdown).await?;
            info!("gitwatch shut down cleanly");
        }
    }

    Ok(())
}

/// Forward command lines typed on stdin to the running monitor
async fn read_commands(commands: mpsc::UnboundedSender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("stdin closed, no more commands");
                return;
            }
            Err(e) => {
                warn!("Cannot read commands from stdin: {}", e);
                return;
            }
        };

        match parse_line(&line) {
            Ok(Some(cmd)) => {
                if commands.send(cmd).is_err() {
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => {
                // usage errors and --help output
                let _ = e.print();
            }
        }
    }
}
