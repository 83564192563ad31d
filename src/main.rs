use std::sync::Arc;
use std::time::Duration;
use anyhow::Context;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use ltp_relay::config::{AppConfig, FeedConfig};
use ltp_relay::ingest::transport::{Connector, WsConnector};
use ltp_relay::ingest::{FeedEngine, FeedHandle, WritePolicy};
use ltp_relay::observability::{metrics, tracing as logging};
use ltp_relay::utils::task_supervisor::TaskSupervisor;
use ltp_relay::{store, ENV_VAR};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = std::env::var(ENV_VAR).unwrap_or_else(|_| "default".to_string());
    let config = AppConfig::load(&env).context("loading configuration")?;

    logging::init(&config.logging)?;
    metrics::register_metrics().context("registering metrics")?;
    info!("Starting ltp-relay (env: {}, feeds: {})", env, config.feeds.len());

    let store = store::connect(&config.store).context("configuring price store")?;
    let policy = WritePolicy::from(&config.store);
    let connector: Arc<dyn Connector> = Arc::new(WsConnector);

    let mut supervisor = TaskSupervisor::new();
    let mut feeds: Vec<(FeedConfig, FeedHandle)> = Vec::new();
    for feed in &config.feeds {
        let (handle, engine) = FeedEngine::build(feed, store.clone(), policy, connector.clone())
            .with_context(|| format!("starting feed {}", feed.name))?;
        supervisor.spawn(feed.name.clone(), engine.run());
        feeds.push((feed.clone(), handle));
    }

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;

    let failure = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                break None;
            }
            _ = terminate.recv() => {
                info!("SIGTERM received, shutting down");
                break None;
            }
            _ = hangup.recv() => {
                info!("SIGHUP received, reloading instrument lists");
                reload_all(&env, &mut feeds).await;
            }
            failure = supervisor.next_failure() => {
                if failure.is_none() {
                    warn!("All feeds stopped");
                }
                break failure;
            }
        }
    };

    for (_, handle) in &feeds {
        handle.shutdown().await;
    }
    supervisor.shutdown_all(SHUTDOWN_GRACE).await;
    info!("Final metrics:\n{}", metrics::render());

    match failure {
        Some((name, e)) => {
            error!("Feed {} terminated: {}", name, e);
            Err(anyhow::Error::new(e).context(format!("feed {} terminated", name)))
        }
        None => {
            info!("Shutdown complete");
            Ok(())
        }
    }
}

/// Re-reads configuration and each feed's symbol source, then applies the
/// difference. Feeds cannot be added or removed without a restart.
async fn reload_all(env: &str, feeds: &mut [(FeedConfig, FeedHandle)]) {
    match AppConfig::load(env) {
        Ok(fresh) => {
            for (config, _) in feeds.iter_mut() {
                match fresh.feeds.iter().find(|f| f.name == config.name) {
                    Some(updated) => {
                        config.symbols = updated.symbols.clone();
                        config.symbols_file = updated.symbols_file.clone();
                    }
                    None => warn!("Feed {} missing from reloaded configuration, keeping it", config.name),
                }
            }
        }
        Err(e) => warn!("Configuration reload failed, re-reading symbol files only: {}", e),
    }

    for (config, handle) in feeds.iter_mut() {
        let symbols = match config.load_symbols() {
            Ok(symbols) => symbols,
            Err(e) => {
                warn!("Feed {}: reload skipped: {}", config.name, e);
                continue;
            }
        };

        match handle.reload(&symbols).await {
            Ok(true) => info!("Feed {}: subscription changes sent", config.name),
            Ok(false) => info!("Feed {}: instrument list unchanged", config.name),
            Err(e) => warn!("Feed {}: reload rejected: {}", config.name, e),
        }
    }
}
