use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gleaner_core::config::Config;
use gleaner_core::fetch::{FeedItem, Fetcher};
use gleaner_core::model::{FilterValue, NewFilter, Source};
use gleaner_core::store::MemoryStore;
use gleaner_core::{Gleaner, Result};
use tempfile::TempDir;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Serves the same items for every url.
struct StaticFeed(Vec<FeedItem>);

#[async_trait]
impl Fetcher for StaticFeed {
    async fn fetch(&self, _url: &str, _cancel: &CancellationToken) -> Result<Vec<FeedItem>> {
        Ok(self.0.clone())
    }
}

fn item(title: &str, body: &str) -> FeedItem {
    FeedItem {
        title: title.into(),
        body: body.into(),
        link: format!("https://example.com/{}", title.replace(' ', "-")),
        updated: None,
        published: None,
        raw: "{}".into(),
    }
}

/// Appends every stdin line to `out`; lines containing "fail" exit 1 until
/// an `ok` file exists next to the script.
const SCRIPT: &str = r#"
dir=$(dirname "$0")
read -r line
case "$line" in
  *fail*) [ -f "$dir/ok" ] || exit 1 ;;
esac
echo "$line" >> "$dir/out"
"#;

struct Env {
    dir: TempDir,
    gleaner: Arc<Gleaner>,
}

impl Env {
    fn new(items: Vec<FeedItem>) -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("action.sh"), SCRIPT).unwrap();

        let mut config = Config::default();
        config.queue.dir = dir.path().join("queue");
        config.collector.window_secs = 1;
        let gleaner = Gleaner::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(StaticFeed(items)),
        )
        .unwrap();
        Self {
            dir,
            gleaner: Arc::new(gleaner),
        }
    }

    fn script(&self) -> PathBuf {
        self.dir.path().join("action.sh")
    }

    fn out(&self) -> String {
        std::fs::read_to_string(self.dir.path().join("out")).unwrap_or_default()
    }

    fn rss_source(&self, title: &str) -> Source {
        let rss = self
            .gleaner
            .source_types()
            .unwrap()
            .into_iter()
            .find(|t| t.name == "rss")
            .unwrap();
        self.gleaner
            .add_source(title, rss.id, "https://example.com/feed.xml")
            .unwrap()
    }

    fn action_with_filter(&self, source: &Source, title: &str) -> gleaner_core::model::Action {
        let action = self
            .gleaner
            .add_action("echo", &format!("sh {}", self.script().display()))
            .unwrap();
        let filter = self
            .gleaner
            .add_filter(&NewFilter {
                title: FilterValue::literal(title),
                body: FilterValue::literal("-never-"),
                action_id: action.id,
            })
            .unwrap();
        self.gleaner.bind_filter(source.id, filter.id).unwrap();
        action
    }

    async fn shutdown(self) {
        timeout(Duration::from_secs(10), self.gleaner.shutdown())
            .await
            .unwrap();
    }
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let poll = async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    };
    timeout(Duration::from_secs(15), poll)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

#[tokio::test]
async fn collected_matches_reach_the_action() {
    let env = Env::new(vec![
        item("rust 1.99 released", "notes"),
        item("gardening tips", "mentions nothing"),
    ]);
    let src = env.rss_source("news");
    let action = env.action_with_filter(&src, "rust");
    env.gleaner.start().unwrap();

    wait_until("action output", || env.out().contains("rust 1.99 released")).await;
    // Later sweeps see the same items again; they are deduplicated.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    let out = env.out();
    assert_eq!(out.lines().count(), 1, "{out}");
    assert!(!out.contains("gardening"));

    assert_eq!(env.gleaner.feed(src.id, 10).unwrap().len(), 2);
    let status = env.gleaner.source_status(src.id);
    assert!(!status.is_empty() && status.iter().all(|s| s.success));
    assert!(env.gleaner.action_queue_items(action.id).unwrap().is_empty());
    env.shutdown().await;
}

#[tokio::test]
async fn bind_filter_applies_to_later_articles() {
    let env = Env::new(Vec::new());
    let src = env.rss_source("manual");
    env.gleaner.start().unwrap();

    // Warms the engine cache with "no filters" for this source.
    env.gleaner
        .add_article(src.id, "alpha one", "b", "l1", 1, "{}")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    env.action_with_filter(&src, "alpha");
    // Let the core loop restart the engine.
    tokio::time::sleep(Duration::from_millis(300)).await;

    env.gleaner
        .add_article(src.id, "alpha two", "b", "l2", 2, "{}")
        .await
        .unwrap();
    wait_until("matched output", || env.out().contains("alpha two")).await;
    assert!(!env.out().contains("alpha one"));

    // Re-filtering replays the feed, so the earlier article matches now.
    assert_eq!(env.gleaner.re_filter(src.id, 10).unwrap(), 2);
    wait_until("replayed output", || env.out().contains("alpha one")).await;
    env.shutdown().await;
}

#[tokio::test]
async fn failed_runs_land_in_the_dead_letter_queue_until_redriven() {
    let env = Env::new(Vec::new());
    let src = env.rss_source("manual");
    let action = env.action_with_filter(&src, "fail");
    env.gleaner.start().unwrap();

    let article = env
        .gleaner
        .add_article(src.id, "will fail", "b", "l", 1, "{}")
        .await
        .unwrap();
    wait_until("dead letter", || {
        env.gleaner.action_deadletter_items(action.id).unwrap().len() == 1
    })
    .await;

    let err = env.gleaner.delete_action(action.id).unwrap_err();
    assert!(matches!(
        err,
        gleaner_core::GleanerError::QueueNotEmpty { deadletter: 1, .. }
    ));

    std::fs::write(env.dir.path().join("ok"), b"").unwrap();
    env.gleaner.redrive_action_item(action.id, article.id).unwrap();
    wait_until("redriven output", || env.out().contains(&article.id.to_string())).await;
    wait_until("queues drained", || {
        env.gleaner.action_deadletter_items(action.id).unwrap().is_empty()
            && env.gleaner.action_queue_items(action.id).unwrap().is_empty()
    })
    .await;
    env.shutdown().await;
}
