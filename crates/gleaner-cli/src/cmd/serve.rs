use crate::context;
use crate::logging::{self, LogFiles};
use anyhow::Context;
use gleaner_core::fetch::HttpFetcher;
use gleaner_core::store::{MemoryStore, RedbStore, Store};
use gleaner_core::Gleaner;
use std::path::Path;
use std::sync::Arc;

pub fn run(config_path: &Path, ephemeral: bool) -> anyhow::Result<()> {
    let config = context::load_config(config_path)?;
    let logs = logging::init_daemon(&config.log)?;

    let store: Arc<dyn Store> = if ephemeral {
        tracing::info!("using an in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        let store = RedbStore::open(&config.storage.path).with_context(|| {
            format!("failed to open database {}", config.storage.path.display())
        })?;
        Arc::new(store)
    };
    let fetcher = HttpFetcher::new(&config.collector.user_agent, config.collector.fetch_timeout())?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let gleaner = Arc::new(Gleaner::new(config, store, Arc::new(fetcher))?);
        gleaner.start()?;
        tracing::info!(pid = std::process::id(), "serving");

        let result = wait_for_shutdown(&gleaner, &logs).await;
        gleaner.shutdown().await;
        result
    })
}

#[cfg(unix)]
async fn wait_for_shutdown(gleaner: &Gleaner, logs: &LogFiles) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = terminate.recv() => break,
            _ = hangup.recv() => {
                if let Err(e) = logs.reopen() {
                    tracing::error!(error = %e, "cannot reopen log files");
                }
                gleaner.restart_actions();
                tracing::info!("log files reopened, action sessions restarted");
            }
        }
    }
    tracing::info!("shutting down");
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_gleaner: &Gleaner, _logs: &LogFiles) -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}
