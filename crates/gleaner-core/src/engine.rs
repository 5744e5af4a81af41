//! Recording and matching stages between the collector and the action queues.
//!
//! ```text
//! collector ──NewArticle──▶ recorder ──Article──▶ filter engine ──▶ ActionManager
//! ```
//!
//! The recorder is the dedup boundary and lives as long as the process. The
//! filter engine is restarted on every filter or binding change, and each
//! activation starts with an empty cache.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::action::ActionIndex;
use crate::error::GleanerError;
use crate::filter::CompiledFilter;
use crate::id::Id;
use crate::model::{Article, NewArticle};
use crate::store::{self, Recorded, Store};

/// Receiving end of the engine channel, handed from one activation to the next.
pub(crate) type EngineInput = Arc<Mutex<mpsc::Receiver<Article>>>;

/// Insert candidates one at a time and forward the new ones.
pub(crate) async fn run_recorder(
    store: Arc<dyn Store>,
    mut candidates: mpsc::Receiver<NewArticle>,
    engine: mpsc::Sender<Article>,
    token: CancellationToken,
) {
    loop {
        let candidate = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = candidates.recv() => match next {
                Some(c) => c,
                None => break,
            },
        };

        let source = candidate.src.id;
        let title = candidate.title.clone();
        let article = match store::blocking(&store, move |s| s.add_article(&candidate)).await {
            Ok(Recorded::New(article)) => article,
            Ok(Recorded::Duplicate(_)) => continue,
            Err(e) => {
                tracing::warn!(source = %source, title = %title, error = %e, "cannot record article");
                continue;
            }
        };
        tracing::debug!(source = %article.src.id, article = %article.id, "recorded article");

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            res = engine.send(article) => if res.is_err() { break },
        }
    }
    tracing::debug!("recorder stopped");
}

/// One activation of the filter engine. Runs until `token` is cancelled.
pub(crate) async fn run_filter_engine(
    store: Arc<dyn Store>,
    actions: Arc<ActionIndex>,
    input: EngineInput,
    token: CancellationToken,
    tracker: TaskTracker,
) {
    // The previous activation holds the receiver until it notices cancellation.
    let mut rx = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        guard = input.lock() => guard,
    };
    tracing::debug!("filter engine started");

    let mut cache: HashMap<Id, Arc<[CompiledFilter]>> = HashMap::new();
    loop {
        let article = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = rx.recv() => match next {
                Some(a) => a,
                None => break,
            },
        };

        let source = article.src.id;
        let filters = match cache.get(&source) {
            Some(filters) => filters.clone(),
            None => match store::blocking(&store, move |s| s.filters_on_source(source)).await {
                Ok(filters) => {
                    let filters: Arc<[CompiledFilter]> =
                        filters.into_iter().map(CompiledFilter::new).collect();
                    cache.insert(source, filters.clone());
                    filters
                }
                Err(e) => {
                    tracing::warn!(source = %article.src.id, error = %e, "cannot load filters");
                    continue;
                }
            },
        };
        if filters.is_empty() {
            continue;
        }

        let payload = match article.to_wire() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(article = %article.id, error = %e, "cannot serialize article");
                continue;
            }
        };
        let actions = actions.clone();
        tracker.spawn_blocking(move || dispatch_matches(&article, &filters, &payload, &actions));
    }
    tracing::debug!("filter engine stopped");
}

/// Enqueue `article` on the action of every matching filter.
fn dispatch_matches(article: &Article, filters: &[CompiledFilter], payload: &[u8], actions: &ActionIndex) {
    for filter in filters.iter().filter(|f| f.is_match(article)).map(|f| &f.filter) {
        let Some(manager) = actions.get(filter.action.id) else {
            let err = GleanerError::UnknownAction(filter.action.id);
            tracing::warn!(filter = %filter.id, error = %err, "cannot enqueue match");
            continue;
        };
        match manager.add_queue_item(article.id, payload) {
            Ok(()) => {
                tracing::info!(filter = %filter.id, action = %filter.action.name, article = %article.id, "matched")
            }
            Err(GleanerError::AlreadyQueued(_)) => {
                tracing::debug!(action = %filter.action.name, article = %article.id, "already queued")
            }
            Err(e) => {
                tracing::warn!(action = %filter.action.name, article = %article.id, error = %e, "cannot enqueue match")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionManager;
    use crate::model::{Filter, FilterValue, NewFilter};
    use crate::store::MemoryStore;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    struct Fixture {
        _dir: TempDir,
        store: Arc<MemoryStore>,
        actions: Arc<ActionIndex>,
        manager: Arc<ActionManager>,
        src: crate::model::Source,
        root: CancellationToken,
    }

    /// A store with one rss source and one action whose manager is never
    /// started, so matches stay pending where tests can see them.
    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let rss = store.add_source_type("rss", "rss", false).unwrap();
        let src = store.add_source("feed", rss.id, "http://feed").unwrap();
        let action = store.add_action("notify", "cat").unwrap();
        let root = CancellationToken::new();
        let manager = Arc::new(ActionManager::new(action, dir.path(), &root).unwrap());
        let actions = Arc::new(ActionIndex::default());
        actions.insert(manager.clone());
        Fixture {
            _dir: dir,
            store,
            actions,
            manager,
            src,
            root,
        }
    }

    fn candidate(src: &crate::model::Source, title: &str) -> NewArticle {
        NewArticle {
            src: src.clone(),
            title: title.into(),
            body: "body".into(),
            link: format!("http://feed/{title}"),
            timestamp: 1_700_000_000,
            raw: "{}".into(),
        }
    }

    fn bind(f: &Fixture, title: &str) -> Filter {
        let filter = f
            .store
            .add_filter(&NewFilter {
                title: FilterValue::literal(title),
                body: FilterValue::literal("never-in-body"),
                action_id: f.manager.action().id,
            })
            .unwrap();
        f.store.bind_filter(f.src.id, filter.id).unwrap();
        filter
    }

    async fn wait_for_pending(manager: &ActionManager, n: usize) {
        let poll = async {
            while manager.queue_items().unwrap().len() < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        timeout(Duration::from_secs(5), poll).await.unwrap();
    }

    #[tokio::test]
    async fn recorder_forwards_only_new_articles() {
        let f = fixture();
        let (cand_tx, cand_rx) = mpsc::channel(1);
        let (art_tx, mut art_rx) = mpsc::channel(1);
        let token = f.root.child_token();
        let recorder = tokio::spawn(run_recorder(f.store.clone(), cand_rx, art_tx, token.clone()));

        cand_tx.send(candidate(&f.src, "one")).await.unwrap();
        let first = timeout(Duration::from_secs(1), art_rx.recv()).await.unwrap().unwrap();
        assert_eq!(first.title, "one");

        cand_tx.send(candidate(&f.src, "one")).await.unwrap();
        cand_tx.send(candidate(&f.src, "two")).await.unwrap();
        let second = timeout(Duration::from_secs(1), art_rx.recv()).await.unwrap().unwrap();
        assert_eq!(second.title, "two");
        assert_eq!(f.store.feed(f.src.id, 10).unwrap().len(), 2);

        token.cancel();
        timeout(Duration::from_secs(1), recorder).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn recorder_stops_when_cancelled_mid_forward() {
        let f = fixture();
        let (cand_tx, cand_rx) = mpsc::channel(1);
        // Nobody reads the engine side, so the forward blocks.
        let (art_tx, _art_rx) = mpsc::channel(1);
        let token = f.root.child_token();
        let recorder = tokio::spawn(run_recorder(f.store.clone(), cand_rx, art_tx, token.clone()));

        cand_tx.send(candidate(&f.src, "a")).await.unwrap();
        cand_tx.send(candidate(&f.src, "b")).await.unwrap();
        token.cancel();
        timeout(Duration::from_secs(1), recorder).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn engine_enqueues_matches_once_per_action() {
        let f = fixture();
        bind(&f, "rust");
        // A second filter on the same action must not double-enqueue.
        let other = bind(&f, "release");

        let (tx, rx) = mpsc::channel(1);
        let input: EngineInput = Arc::new(Mutex::new(rx));
        let token = f.root.child_token();
        let tracker = TaskTracker::new();
        tracker.spawn(run_filter_engine(
            f.store.clone(),
            f.actions.clone(),
            input,
            token.clone(),
            tracker.clone(),
        ));

        let hit = f.store.add_article(&candidate(&f.src, "rust release")).unwrap().into_article();
        let miss = f.store.add_article(&candidate(&f.src, "python")).unwrap().into_article();
        tx.send(hit.clone()).await.unwrap();
        tx.send(miss).await.unwrap();

        wait_for_pending(&f.manager, 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.manager.queue_items().unwrap(), vec![hit]);
        assert_eq!(f.store.filters_on_source(f.src.id).unwrap().len(), 2);
        assert!(f.store.sources_with_filter(other.id).unwrap().len() == 1);

        token.cancel();
        tracker.close();
        timeout(Duration::from_secs(5), tracker.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn fresh_activation_sees_new_bindings() {
        let f = fixture();
        let (tx, rx) = mpsc::channel(1);
        let input: EngineInput = Arc::new(Mutex::new(rx));
        let tracker = TaskTracker::new();

        let first = f.root.child_token();
        tracker.spawn(run_filter_engine(
            f.store.clone(),
            f.actions.clone(),
            input.clone(),
            first.clone(),
            tracker.clone(),
        ));
        // Warm the cache with "no filters" for this source.
        let before = f.store.add_article(&candidate(&f.src, "alpha 1")).unwrap().into_article();
        tx.send(before).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        bind(&f, "alpha");
        let stale = f.store.add_article(&candidate(&f.src, "alpha 2")).unwrap().into_article();
        tx.send(stale).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(f.manager.queue_items().unwrap().is_empty());

        first.cancel();
        let second = f.root.child_token();
        tracker.spawn(run_filter_engine(
            f.store.clone(),
            f.actions.clone(),
            input,
            second.clone(),
            tracker.clone(),
        ));
        let fresh = f.store.add_article(&candidate(&f.src, "alpha 3")).unwrap().into_article();
        tx.send(fresh.clone()).await.unwrap();

        wait_for_pending(&f.manager, 1).await;
        assert_eq!(f.manager.queue_items().unwrap(), vec![fresh]);

        second.cancel();
        tracker.close();
        timeout(Duration::from_secs(5), tracker.wait()).await.unwrap();
    }
}
