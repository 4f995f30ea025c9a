//! Background task that drains the embedding queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::JobsConfig;
use crate::db::SharedConnection;
use crate::embedding::EmbeddingProvider;

/// Wakes the worker after a write has queued jobs.
#[derive(Clone, Default)]
pub struct JobSignal(Arc<Notify>);

impl JobSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.0.notify_one();
    }

    async fn notified(&self) {
        self.0.notified().await;
    }
}

/// Spawn the embedding worker on the current runtime.
///
/// The worker drains due jobs at startup, after every [`JobSignal::notify`],
/// and every `poll_interval_secs` so retries scheduled with backoff run even
/// when nothing new is written.
pub fn spawn_worker(
    db: SharedConnection,
    provider: Arc<dyn EmbeddingProvider>,
    config: JobsConfig,
    signal: JobSignal,
) -> JoinHandle<()> {
    let poll = Duration::from_secs(config.poll_interval_secs.max(1));
    tokio::spawn(async move {
        tracing::info!(poll_secs = poll.as_secs(), "embedding worker started");
        loop {
            let db = Arc::clone(&db);
            let provider = Arc::clone(&provider);
            let jobs = config.clone();
            let result = tokio::task::spawn_blocking(move || {
                crate::jobs::drain_pending(&db, provider.as_ref(), &jobs)
            })
            .await;

            match result {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "embedding worker drain failed"),
                Err(e) => tracing::error!(error = %e, "embedding worker task panicked"),
            }

            tokio::select! {
                _ = signal.notified() => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
    })
}
