use std::time::Duration;

use anyhow::Context;
use newsdesk_core::BookmarkClient;

use crate::config::{Account, Config};
use crate::storage::CacheStore;
use crate::sync::backoff::RetryPacer;
use crate::sync::connectivity::Connectivity;
use crate::sync::engine::SyncEngine;

const RETRY_BASE: Duration = Duration::from_secs(1);

pub async fn open_cache(config: &Config) -> anyhow::Result<CacheStore> {
    let db_path = config.db_path();
    CacheStore::open(&db_path)
        .await
        .with_context(|| format!("failed to open bookmark cache at {}", db_path.display()))
}

/// Builds an engine for `account` and starts its session.
pub async fn start_session(
    config: &Config,
    account: &Account,
    cache: CacheStore,
) -> anyhow::Result<SyncEngine> {
    let client = BookmarkClient::with_settings(&config.api_url, "", config.http_timeout)
        .with_context(|| format!("invalid bookmark service url {}", config.api_url))?;
    let engine = SyncEngine::new(cache, client, Connectivity::default());
    engine.init_for_user(&account.user_id, &account.token).await;
    Ok(engine)
}

/// Probes the service and flushes the queue when the link just came back.
/// Returns the probe result.
pub async fn check_connection(engine: &SyncEngine) -> bool {
    let reachable = engine.probe().await;
    if engine.connectivity().set_online(reachable) {
        tracing::info!("bookmark service reachable again, flushing queue");
        engine.flush_queue().await;
    } else if !reachable {
        tracing::debug!("bookmark service still unreachable");
    }
    reachable
}

/// One scheduled flush. Returns how long to wait before the next one.
pub async fn flush_pass(engine: &SyncEngine, pacer: &mut RetryPacer) -> Duration {
    engine.flush_queue().await;
    let pending = engine.pending().await.len();
    let wait = pacer.after_flush(pending);
    if pending > 0 {
        tracing::info!(
            pending,
            retry_in = ?wait,
            failures = pacer.failures(),
            "operations still queued"
        );
    }
    wait
}

pub struct DaemonRuntime {
    config: Config,
    engine: SyncEngine,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: Config, account: &Account) -> anyhow::Result<Self> {
        let cache = open_cache(&config).await?;
        let engine = start_session(&config, account, cache).await?;
        Ok(Self { config, engine })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!(
            api_url = %self.config.api_url,
            flush_secs = self.config.flush_interval.as_secs(),
            probe_secs = self.config.probe_interval.as_secs(),
            "daemon started"
        );

        let engine_for_probe = self.engine.clone();
        let probe_interval = self.config.probe_interval;
        let probe_handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(probe_interval).await;
                check_connection(&engine_for_probe).await;
            }
        });

        let engine_for_flush = self.engine.clone();
        let mut pacer = RetryPacer::new(self.config.flush_interval, RETRY_BASE);
        let flush_handle = tokio::spawn(async move {
            let mut wait = Duration::ZERO;
            loop {
                tokio::time::sleep(wait).await;
                wait = flush_pass(&engine_for_flush, &mut pacer).await;
            }
        });

        let result = tokio::signal::ctrl_c()
            .await
            .context("failed waiting for shutdown signal");
        tracing::info!("shutting down");

        probe_handle.abort();
        flush_handle.abort();
        self.engine.logout().await;
        result
    }
}
