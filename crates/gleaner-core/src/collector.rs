//! Time-sliced collection sweep over every collectable source.
//!
//! A sweep splits the eligible sources into `window` buckets and dispatches
//! one bucket per second, so a full pass over all sources takes `window`
//! seconds and then starts over. Each source is fetched by its own task,
//! bounded by a semaphore of `pool_size` permits. A source whose previous
//! fetch is still waiting or running is skipped on its next turn.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::fetch::Fetcher;
use crate::id::Id;
use crate::model::{NewArticle, Source};
use crate::status::StatusBoard;
use crate::store::{self, Store};

const TICK: Duration = Duration::from_secs(1);

/// Sources the collector fetches: built-in `rss` type, not paused.
pub fn eligible(sources: Vec<Source>) -> Vec<Source> {
    sources.into_iter().filter(Source::is_collectable).collect()
}

/// Split `items` into contiguous buckets of `ceil(len / window)` (at least 1)
/// items each, keeping their order. Yields at most `window` buckets.
pub fn split_sources<T: Clone>(window: usize, items: &[T]) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    let size = items.len().div_ceil(window.max(1)).max(1);
    items.chunks(size).map(<[T]>::to_vec).collect()
}

pub(crate) struct Collector {
    pub store: Arc<dyn Store>,
    pub fetcher: Arc<dyn Fetcher>,
    pub status: Arc<StatusBoard>,
    pub articles: mpsc::Sender<NewArticle>,
    pub window: usize,
    pub pool_size: usize,
}

/// Sources with a collection task waiting for a permit or running.
#[derive(Default)]
struct InFlight(Mutex<HashSet<Id>>);

impl InFlight {
    fn claim(self: &Arc<Self>, id: Id) -> Option<Claim> {
        let fresh = self.lock().insert(id);
        fresh.then(|| Claim { set: self.clone(), id })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<Id>> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Releases the source when the collection task ends.
struct Claim {
    set: Arc<InFlight>,
    id: Id,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

impl Collector {
    /// Run one sweep until `token` is cancelled. Fetch tasks are spawned on
    /// `tracker`.
    pub async fn run_sweep(self: Arc<Self>, token: CancellationToken, tracker: TaskTracker) {
        let sources = match store::blocking(&self.store, |s| s.sources()).await {
            Ok(sources) => sources,
            Err(e) => {
                tracing::error!(error = %e, "cannot load sources for sweep");
                return;
            }
        };
        let targets = eligible(sources);
        if targets.is_empty() {
            tracing::info!("no collectable sources");
            return;
        }

        let window = self.window.max(1);
        let buckets = split_sources(window, &targets);
        tracing::info!(sources = targets.len(), buckets = buckets.len(), window, "collector sweep started");

        let pool = Arc::new(Semaphore::new(self.pool_size.max(1)));
        let busy = Arc::new(InFlight::default());
        let mut ticker = tokio::time::interval(TICK);
        let mut slot = 0usize;
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Some(bucket) = buckets.get(slot) {
                for src in bucket {
                    let Some(claim) = busy.claim(src.id) else {
                        tracing::debug!(source = %src.title, "previous collection still in flight; skipped");
                        continue;
                    };
                    let me = self.clone();
                    let pool = pool.clone();
                    let token = token.clone();
                    let src = src.clone();
                    tracker.spawn(async move {
                        let _claim = claim;
                        let _permit = tokio::select! {
                            biased;
                            _ = token.cancelled() => None,
                            permit = pool.acquire_owned() => permit.ok(),
                        };
                        me.collect(src, &token).await;
                    });
                }
            }
            slot = (slot + 1) % window;
        }
        tracing::info!("collector sweep stopped");
    }

    /// Fetch one source and hand its items to the recorder. Always ends by
    /// writing the source's status.
    async fn collect(&self, src: Source, token: &CancellationToken) {
        if token.is_cancelled() {
            tracing::debug!(source = %src.title, "collection canceled before start");
            self.status.record(src.id, false, "canceled");
            return;
        }

        tracing::debug!(source = %src.title, url = %src.value, "collecting");
        let items = match self.fetcher.fetch(&src.value, token).await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(source = %src.title, url = %src.value, error = %e, "cannot collect source");
                self.status.record(src.id, false, e.to_string());
                return;
            }
        };

        let now = chrono::Utc::now().timestamp();
        let total = items.len();
        let mut handed = 0usize;
        for item in items {
            let candidate = NewArticle {
                src: src.clone(),
                timestamp: item.effective_timestamp(now),
                title: item.title,
                body: item.body,
                link: item.link,
                raw: item.raw,
            };
            let sent = tokio::select! {
                biased;
                _ = token.cancelled() => false,
                res = self.articles.send(candidate) => res.is_ok(),
            };
            if !sent {
                break;
            }
            handed += 1;
        }

        if handed < total {
            tracing::info!(source = %src.title, handed, total, "collection interrupted");
            self.status.record(src.id, false, "canceled");
        } else {
            tracing::debug!(source = %src.title, items = total, "collected");
            self.status.record(src.id, true, format!("{total} items"));
        }
    }
}
