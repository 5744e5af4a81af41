//! `Gleaner`: owner of the pipeline and the public operation surface.
//!
//! The core loop keeps at most one collector sweep and one filter engine
//! alive. A source change restarts the sweep, a filter or binding change
//! restarts the engine. Every task hangs off one root token and one tracker,
//! so `shutdown` quiesces the whole tree.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::action::{ActionIndex, ActionManager};
use crate::collector::Collector;
use crate::config::Config;
use crate::engine::{self, EngineInput};
use crate::error::{GleanerError, Result};
use crate::fetch::Fetcher;
use crate::id::Id;
use crate::model::{
    Action, Article, Filter, NewArticle, NewFilter, Source, SourceType, BUILTIN_SOURCE_TYPES,
};
use crate::noticer::Noticer;
use crate::status::{StatusBoard, StatusEntry};
use crate::store::{self, ArticleQuery, Store};

pub struct Gleaner {
    config: Config,
    store: Arc<dyn Store>,
    fetcher: Arc<dyn Fetcher>,
    status: Arc<StatusBoard>,
    actions: Arc<ActionIndex>,
    /// Built-in source types; never deletable.
    protected: HashSet<Id>,

    token: CancellationToken,
    tracker: TaskTracker,
    running: AtomicBool,

    new_sources: Noticer,
    filters_changed: Noticer,

    candidates_tx: mpsc::Sender<NewArticle>,
    candidates_rx: Mutex<Option<mpsc::Receiver<NewArticle>>>,
    engine_tx: mpsc::Sender<Article>,
    engine_rx: EngineInput,
}

impl Gleaner {
    /// Seed the built-in source types and open one queue manager per stored
    /// action. Nothing runs until `start`.
    pub fn new(config: Config, store: Arc<dyn Store>, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        let protected = seed_source_types(store.as_ref())?;

        let token = CancellationToken::new();
        let actions = Arc::new(ActionIndex::default());
        for action in store.actions()? {
            let manager = ActionManager::new(action, &config.queue.dir, &token)?;
            actions.insert(Arc::new(manager));
        }

        let (candidates_tx, candidates_rx) = mpsc::channel(1);
        let (engine_tx, engine_rx) = mpsc::channel(1);
        Ok(Self {
            config,
            store,
            fetcher,
            status: Arc::new(StatusBoard::new()),
            actions,
            protected,
            new_sources: Noticer::new(token.clone()),
            filters_changed: Noticer::new(token.clone()),
            token,
            tracker: TaskTracker::new(),
            running: AtomicBool::new(false),
            candidates_tx,
            candidates_rx: Mutex::new(Some(candidates_rx)),
            engine_tx,
            engine_rx: Arc::new(tokio::sync::Mutex::new(engine_rx)),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the recorder, every action manager and the core loop, then kick
    /// off the first sweep and engine activation. Calling it again is a no-op.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let rx = self
            .candidates_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(candidates) = rx else {
            return Ok(());
        };

        for manager in self.actions.all() {
            manager.start(&self.tracker)?;
        }

        self.tracker.spawn(engine::run_recorder(
            self.store.clone(),
            candidates,
            self.engine_tx.clone(),
            self.token.child_token(),
        ));

        let collector = Arc::new(Collector {
            store: self.store.clone(),
            fetcher: self.fetcher.clone(),
            status: self.status.clone(),
            articles: self.candidates_tx.clone(),
            window: self.config.collector.window(),
            pool_size: self.config.collector.pool_size,
        });
        self.tracker.spawn(self.clone().run_core(collector));
        self.running.store(true, Ordering::SeqCst);

        self.new_sources.notice();
        self.filters_changed.notice();
        tracing::info!(actions = self.actions.all().len(), "gleaner started");
        Ok(())
    }

    async fn run_core(self: Arc<Self>, collector: Arc<Collector>) {
        let mut sweep: Option<CancellationToken> = None;
        let mut engine: Option<CancellationToken> = None;
        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = self.new_sources.recv() => {
                    if let Some(old) = sweep.take() {
                        old.cancel();
                    }
                    let scope = self.token.child_token();
                    self.tracker
                        .spawn(collector.clone().run_sweep(scope.clone(), self.tracker.clone()));
                    sweep = Some(scope);
                    tracing::debug!("collector sweep restarted");
                }
                _ = self.filters_changed.recv() => {
                    if let Some(old) = engine.take() {
                        old.cancel();
                    }
                    let scope = self.token.child_token();
                    self.tracker.spawn(engine::run_filter_engine(
                        self.store.clone(),
                        self.actions.clone(),
                        self.engine_rx.clone(),
                        scope.clone(),
                        self.tracker.clone(),
                    ));
                    engine = Some(scope);
                    tracing::debug!("filter engine restarted");
                }
            }
        }
        tracing::debug!("core loop stopped");
    }

    /// Cancel everything and wait for every task to finish.
    pub async fn shutdown(&self) {
        self.token.cancel();
        for manager in self.actions.all() {
            manager.close();
        }
        self.tracker.close();
        self.tracker.wait().await;
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("gleaner stopped");
    }

    // -----------------------------------------------------------------------
    // Source types
    // -----------------------------------------------------------------------

    pub fn add_source_type(&self, name: &str, command: &str, user_create: bool) -> Result<SourceType> {
        self.store.add_source_type(name, command, user_create)
    }

    pub fn source_type(&self, id: Id) -> Result<SourceType> {
        self.store.source_type(id)
    }

    pub fn source_types(&self) -> Result<Vec<SourceType>> {
        self.store.source_types()
    }

    pub fn delete_source_type(&self, id: Id) -> Result<()> {
        if self.protected.contains(&id) {
            return Err(GleanerError::ProtectedSourceType(id));
        }
        self.store.delete_source_type(id)
    }

    // -----------------------------------------------------------------------
    // Sources
    // -----------------------------------------------------------------------

    pub fn add_source(&self, title: &str, type_id: Id, value: &str) -> Result<Source> {
        let src = self.store.add_source(title, type_id, value)?;
        tracing::info!(source = %src.id, title = %src.title, "source added");
        self.new_sources.notice();
        Ok(src)
    }

    pub fn source(&self, id: Id) -> Result<Source> {
        self.store.source(id)
    }

    pub fn sources(&self) -> Result<Vec<Source>> {
        self.store.sources()
    }

    pub fn find_sources(&self, keyword: &str) -> Result<Vec<Source>> {
        self.store.find_sources(keyword)
    }

    pub fn pause_source(&self, id: Id) -> Result<()> {
        self.store.pause_source(id)?;
        self.new_sources.notice();
        Ok(())
    }

    pub fn resume_source(&self, id: Id) -> Result<()> {
        self.store.resume_source(id)?;
        self.new_sources.notice();
        Ok(())
    }

    pub fn remove_source(&self, id: Id) -> Result<()> {
        self.store.remove_source(id)?;
        self.status.forget(id);
        tracing::info!(source = %id, "source removed");
        self.new_sources.notice();
        Ok(())
    }

    /// Latest collection outcomes for `id`, oldest first.
    pub fn source_status(&self, id: Id) -> Vec<StatusEntry> {
        self.status.get(id)
    }

    // -----------------------------------------------------------------------
    // Articles and feeds
    // -----------------------------------------------------------------------

    /// Record an article by hand. A duplicate is not an error: the existing
    /// article is returned. Either way it goes through the filters.
    pub async fn add_article(
        &self,
        source: Id,
        title: &str,
        body: &str,
        link: &str,
        timestamp: i64,
        raw: &str,
    ) -> Result<Article> {
        let (title, body, link, raw) = (title.to_string(), body.to_string(), link.to_string(), raw.to_string());
        let article = store::blocking(&self.store, move |s| {
            let candidate = NewArticle {
                src: s.source(source)?,
                title,
                body,
                link,
                timestamp,
                raw,
            };
            Ok(s.add_article(&candidate)?.into_article())
        })
        .await?;

        if self.is_running() {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => {}
                _ = self.engine_tx.send(article.clone()) => {}
            }
        } else {
            tracing::debug!(article = %article.id, "not running; article not filtered");
        }
        Ok(article)
    }

    pub fn article(&self, id: Id) -> Result<Article> {
        self.store.article(id)
    }

    pub fn lookup_articles(&self, query: &ArticleQuery) -> Result<Vec<Article>> {
        self.store.lookup_articles(query)
    }

    pub fn remove_article(&self, id: Id) -> Result<()> {
        self.store.remove_article(id)
    }

    pub fn feed(&self, source: Id, limit: usize) -> Result<Vec<Article>> {
        self.store.feed(source, limit)
    }

    pub fn bind_feed(&self, source: Id, article: Id) -> Result<()> {
        self.store.bind_feed(source, article)
    }

    pub fn remove_feed_entry(&self, source: Id, article: Id) -> Result<()> {
        self.store.remove_feed_entry(source, article)
    }

    /// Push the latest `limit` feed entries of `source` through the filters
    /// again. Returns how many were submitted.
    pub fn re_filter(&self, source: Id, limit: usize) -> Result<usize> {
        if !self.is_running() {
            return Err(GleanerError::Validation("re-filter needs a running pipeline".into()));
        }
        let articles = self.store.feed(source, limit)?;
        let count = articles.len();
        for article in articles {
            let tx = self.engine_tx.clone();
            let token = self.token.clone();
            self.tracker.spawn(async move {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {}
                    _ = tx.send(article) => {}
                }
            });
        }
        tracing::info!(source = %source, count, "re-filter submitted");
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    /// Create the action and its queue manager; the manager starts right away
    /// when the pipeline is running.
    pub fn add_action(&self, name: &str, command: &str) -> Result<Action> {
        let action = self.store.add_action(name, command)?;
        let manager = Arc::new(ActionManager::new(
            action.clone(),
            &self.config.queue.dir,
            &self.token,
        )?);
        if self.is_running() {
            manager.start(&self.tracker)?;
        }
        self.actions.insert(manager);
        tracing::info!(action = %action.id, name = %action.name, "action added");
        self.filters_changed.notice();
        Ok(action)
    }

    pub fn action(&self, id: Id) -> Result<Action> {
        self.store.action(id)
    }

    pub fn actions(&self) -> Result<Vec<Action>> {
        self.store.actions()
    }

    /// Refused while the action has pending, in-flight or dead-lettered items.
    pub fn delete_action(&self, id: Id) -> Result<()> {
        if let Some(manager) = self.actions.get(id) {
            let counts = manager.queue().counts()?;
            if !counts.is_empty() {
                return Err(GleanerError::QueueNotEmpty {
                    action: id,
                    pending: counts.pending,
                    inflight: counts.inflight,
                    deadletter: counts.deadletter,
                });
            }
        }
        self.store.delete_action(id)?;
        if let Some(manager) = self.actions.remove(id) {
            manager.close();
        }
        tracing::info!(action = %id, "action deleted");
        self.filters_changed.notice();
        Ok(())
    }

    fn manager(&self, action: Id) -> Result<Arc<ActionManager>> {
        self.actions
            .get(action)
            .ok_or_else(|| GleanerError::not_found("action", action))
    }

    pub fn action_queue_items(&self, action: Id) -> Result<Vec<Article>> {
        self.manager(action)?.queue_items()
    }

    pub fn action_deadletter_items(&self, action: Id) -> Result<Vec<Article>> {
        self.manager(action)?.deadletter_items()
    }

    pub fn action_inflight_items(&self, action: Id) -> Result<Vec<Article>> {
        self.manager(action)?.inflight_items()
    }

    pub fn delete_action_queue_item(&self, action: Id, item: Id) -> Result<()> {
        self.manager(action)?.delete_queue_item(item)
    }

    pub fn delete_action_deadletter_item(&self, action: Id, item: Id) -> Result<()> {
        self.manager(action)?.delete_deadletter_item(item)
    }

    pub fn redrive_action_item(&self, action: Id, item: Id) -> Result<()> {
        self.manager(action)?.redrive(item)
    }

    pub fn cancel_action(&self, action: Id) -> Result<()> {
        self.manager(action)?.cancel_action();
        Ok(())
    }

    pub fn restart_action(&self, action: Id) -> Result<()> {
        self.manager(action)?.restart();
        Ok(())
    }

    /// Restart the session of every action, e.g. after a config reload.
    pub fn restart_actions(&self) {
        for manager in self.actions.all() {
            manager.restart();
        }
    }

    // -----------------------------------------------------------------------
    // Filters
    // -----------------------------------------------------------------------

    pub fn add_filter(&self, filter: &NewFilter) -> Result<Filter> {
        filter.validate()?;
        let created = self.store.add_filter(filter)?;
        tracing::info!(filter = %created.id, action = %created.action.name, "filter added");
        self.filters_changed.notice();
        Ok(created)
    }

    pub fn update_filter_action(&self, id: Id, action: Id) -> Result<Filter> {
        let filter = self.store.update_filter_action(id, action)?;
        self.filters_changed.notice();
        Ok(filter)
    }

    pub fn filter(&self, id: Id) -> Result<Filter> {
        self.store.filter(id)
    }

    pub fn filters(&self) -> Result<Vec<Filter>> {
        self.store.filters()
    }

    pub fn delete_filter(&self, id: Id) -> Result<()> {
        self.store.delete_filter(id)?;
        self.filters_changed.notice();
        Ok(())
    }

    pub fn bind_filter(&self, source: Id, filter: Id) -> Result<()> {
        self.store.bind_filter(source, filter)?;
        self.filters_changed.notice();
        Ok(())
    }

    pub fn unbind_filter(&self, source: Id, filter: Id) -> Result<()> {
        self.store.unbind_filter(source, filter)?;
        self.filters_changed.notice();
        Ok(())
    }

    pub fn filters_on_source(&self, source: Id) -> Result<Vec<Filter>> {
        self.store.filters_on_source(source)
    }

    pub fn sources_with_filter(&self, filter: Id) -> Result<Vec<Source>> {
        self.store.sources_with_filter(filter)
    }
}

/// Create missing built-in source types; returns the ids of every
/// non-user-created type.
fn seed_source_types(store: &dyn Store) -> Result<HashSet<Id>> {
    let existing = store.source_types()?;
    for (name, command) in BUILTIN_SOURCE_TYPES {
        let present = existing.iter().any(|t| !t.user_create && t.name == name);
        if !present {
            let created = store.add_source_type(name, command, false)?;
            tracing::info!(id = %created.id, name, "created built-in source type");
        }
    }
    Ok(store
        .source_types()?
        .into_iter()
        .filter(|t| !t.user_create)
        .map(|t| t.id)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FeedItem;
    use crate::model::FilterValue;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct NoFetch;

    #[async_trait]
    impl Fetcher for NoFetch {
        async fn fetch(&self, _url: &str, _cancel: &CancellationToken) -> Result<Vec<FeedItem>> {
            Ok(Vec::new())
        }
    }

    fn gleaner(dir: &TempDir) -> (Arc<MemoryStore>, Gleaner) {
        let mut config = Config::default();
        config.queue.dir = dir.path().join("queue");
        let store = Arc::new(MemoryStore::new());
        let g = Gleaner::new(config, store.clone(), Arc::new(NoFetch)).unwrap();
        (store, g)
    }

    fn rss(g: &Gleaner) -> SourceType {
        g.source_types()
            .unwrap()
            .into_iter()
            .find(|t| t.name == "rss")
            .unwrap()
    }

    #[test]
    fn built_in_types_are_seeded_once_and_protected() {
        let dir = TempDir::new().unwrap();
        let (store, g) = gleaner(&dir);
        let names: Vec<String> = g.source_types().unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"rss".to_string()) && names.contains(&"noop".to_string()));

        let again = Gleaner::new(g.config().clone(), store, Arc::new(NoFetch)).unwrap();
        assert_eq!(again.source_types().unwrap().len(), 2);

        let rss = rss(&g);
        assert!(matches!(g.delete_source_type(rss.id), Err(GleanerError::ProtectedSourceType(_))));
        assert!(g.source_type(rss.id).is_ok());

        let custom = g.add_source_type("custom", "run-me", true).unwrap();
        g.delete_source_type(custom.id).unwrap();
    }

    #[test]
    fn invalid_regex_is_rejected_before_storage() {
        let dir = TempDir::new().unwrap();
        let (_store, g) = gleaner(&dir);
        let action = g.add_action("a", "cat").unwrap();
        let err = g
            .add_filter(&NewFilter {
                title: FilterValue::literal("ok"),
                body: FilterValue::regex("(unclosed"),
                action_id: action.id,
            })
            .unwrap_err();
        assert!(matches!(err, GleanerError::InvalidRegex { field: "body", .. }), "{err}");
        assert!(g.filters().unwrap().is_empty());
    }

    #[test]
    fn delete_action_is_guarded_by_its_queue() {
        let dir = TempDir::new().unwrap();
        let (_store, g) = gleaner(&dir);
        let action = g.add_action("a", "cat").unwrap();
        let item = crate::testutil::article("queued");
        g.manager(action.id)
            .unwrap()
            .add_queue_item(item.id, &item.to_wire().unwrap())
            .unwrap();

        match g.delete_action(action.id).unwrap_err() {
            GleanerError::QueueNotEmpty { pending, inflight, deadletter, .. } => {
                assert_eq!((pending, inflight, deadletter), (1, 0, 0))
            }
            other => panic!("expected QueueNotEmpty, got {other:?}"),
        }
        assert!(g.action(action.id).is_ok());

        g.delete_action_queue_item(action.id, item.id).unwrap();
        g.delete_action(action.id).unwrap();
        assert!(g.action(action.id).is_err());
        assert!(matches!(
            g.action_queue_items(action.id),
            Err(GleanerError::NotFound { kind: "action", .. })
        ));
    }

    #[tokio::test]
    async fn cancelled_work_still_blocks_delete_action() {
        let dir = TempDir::new().unwrap();
        let (_store, g) = gleaner(&dir);
        let g = Arc::new(g);
        g.start().unwrap();
        let action = g.add_action("slow", "sleep 30").unwrap();
        let item = crate::testutil::article("long running");
        g.manager(action.id)
            .unwrap()
            .add_queue_item(item.id, &item.to_wire().unwrap())
            .unwrap();

        let claimed = async {
            while g.action_inflight_items(action.id).unwrap().is_empty() {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
        };
        tokio::time::timeout(std::time::Duration::from_secs(5), claimed)
            .await
            .unwrap();

        g.cancel_action(action.id).unwrap();
        match g.delete_action(action.id).unwrap_err() {
            GleanerError::QueueNotEmpty { pending, inflight, deadletter, .. } => {
                assert!(pending + inflight >= 1, "{pending} pending, {inflight} in flight");
                assert_eq!(deadletter, 0);
            }
            other => panic!("expected QueueNotEmpty, got {other:?}"),
        }
        assert!(g.action(action.id).is_ok());

        tokio::time::timeout(std::time::Duration::from_secs(5), g.shutdown())
            .await
            .unwrap();
        // The interrupted item survives shutdown for the next start.
        let queue = crate::action::ActionQueue::open_existing(&g.config().queue.dir, action.id).unwrap();
        let left = queue.counts().unwrap();
        assert_eq!(left.pending + left.inflight, 1);
    }

    #[test]
    fn existing_actions_get_managers() {
        let dir = TempDir::new().unwrap();
        let (store, g) = gleaner(&dir);
        let action = store.add_action("pre-existing", "cat").unwrap();
        assert!(g.action_queue_items(action.id).is_err());

        let reopened = Gleaner::new(g.config().clone(), store, Arc::new(NoFetch)).unwrap();
        assert!(reopened.action_queue_items(action.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_manual_article_returns_the_original() {
        let dir = TempDir::new().unwrap();
        let (_store, g) = gleaner(&dir);
        let src = g.add_source("s", rss(&g).id, "http://s").unwrap();
        let first = g.add_article(src.id, "t", "b", "l", 10, "{}").await.unwrap();
        let second = g.add_article(src.id, "t", "b", "l", 20, "{}").await.unwrap();
        assert_eq!(first, second);
        assert!(matches!(g.re_filter(src.id, 10), Err(GleanerError::Validation(_))));
    }

    #[tokio::test]
    async fn removing_a_source_forgets_its_status() {
        let dir = TempDir::new().unwrap();
        let (_store, g) = gleaner(&dir);
        let src = g.add_source("s", rss(&g).id, "http://s").unwrap();
        g.status.record(src.id, true, "ok");
        assert_eq!(g.source_status(src.id).len(), 1);
        g.remove_source(src.id).unwrap();
        assert!(g.source_status(src.id).is_empty());
    }

    #[tokio::test]
    async fn start_and_shutdown_quiesce() {
        let dir = TempDir::new().unwrap();
        let (_store, g) = gleaner(&dir);
        let g = Arc::new(g);
        g.add_action("a", "cat").unwrap();
        g.start().unwrap();
        g.start().unwrap();
        assert!(g.is_running());
        tokio::time::timeout(std::time::Duration::from_secs(5), g.shutdown())
            .await
            .unwrap();
        assert!(!g.is_running());
    }
}
