//! Storage interface over source types, sources, articles, feed bindings,
//! actions, filters and source/filter bindings.
//!
//! Two implementations ship: [`MemoryStore`] for tests and ephemeral runs,
//! and [`RedbStore`] for persistent deployments. Both enforce the same
//! referential rules, listed on each trait method.

mod memory;
mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{GleanerError, Result};
use crate::id::Id;
use crate::model::{Action, Article, Filter, FilterValue, NewArticle, NewFilter, Source, SourceType};

// ---------------------------------------------------------------------------
// Outcomes and queries
// ---------------------------------------------------------------------------

/// Result of an article insert. A duplicate is a normal outcome that yields
/// the record stored first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    New(Article),
    Duplicate(Article),
}

impl Recorded {
    pub fn is_new(&self) -> bool {
        matches!(self, Recorded::New(_))
    }

    pub fn article(&self) -> &Article {
        match self {
            Recorded::New(a) | Recorded::Duplicate(a) => a,
        }
    }

    pub fn into_article(self) -> Article {
        match self {
            Recorded::New(a) | Recorded::Duplicate(a) => a,
        }
    }
}

/// Article search. Empty keywords and an empty source list match anything;
/// the time range is inclusive on both ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleQuery {
    pub title: String,
    pub body: String,
    pub sources: Vec<Id>,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub limit: Option<usize>,
}

impl ArticleQuery {
    pub fn accepts(&self, article: &Article) -> bool {
        article.title.contains(self.title.as_str())
            && article.body.contains(self.body.as_str())
            && (self.sources.is_empty() || self.sources.contains(&article.src.id))
            && self.start.map_or(true, |s| article.timestamp >= s)
            && self.end.map_or(true, |e| article.timestamp <= e)
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub trait Store: Send + Sync {
    // --- source types ---

    fn add_source_type(&self, name: &str, command: &str, user_create: bool) -> Result<SourceType>;
    fn source_type(&self, id: Id) -> Result<SourceType>;
    fn source_types(&self) -> Result<Vec<SourceType>>;
    /// Fails with `Validation` while any source still uses the type.
    fn delete_source_type(&self, id: Id) -> Result<()>;

    // --- sources ---

    /// The source type must exist.
    fn add_source(&self, title: &str, type_id: Id, value: &str) -> Result<Source>;
    fn source(&self, id: Id) -> Result<Source>;
    fn sources(&self) -> Result<Vec<Source>>;
    /// Sources whose title or value contains `keyword`.
    fn find_sources(&self, keyword: &str) -> Result<Vec<Source>>;
    /// Hard delete. Filter bindings and feed entries of the source go with it;
    /// its articles stay.
    fn remove_source(&self, id: Id) -> Result<()>;
    fn pause_source(&self, id: Id) -> Result<()>;
    fn resume_source(&self, id: Id) -> Result<()>;

    // --- articles ---

    /// Insert unless an article with the same (title, body, link, source)
    /// exists. A new article is bound into its source's feed at its own
    /// timestamp.
    fn add_article(&self, article: &NewArticle) -> Result<Recorded>;
    fn article(&self, id: Id) -> Result<Article>;
    /// Matches newest first.
    fn lookup_articles(&self, query: &ArticleQuery) -> Result<Vec<Article>>;
    fn remove_article(&self, id: Id) -> Result<()>;

    // --- feed bindings ---

    /// Up to `limit` enabled entries of the source's feed, newest binding first.
    fn feed(&self, source: Id, limit: usize) -> Result<Vec<Article>>;
    /// Bind (or re-enable) `article` in the feed of `source` at the current time.
    fn bind_feed(&self, source: Id, article: Id) -> Result<()>;
    /// Disable the binding; the article itself is kept.
    fn remove_feed_entry(&self, source: Id, article: Id) -> Result<()>;

    // --- actions ---

    fn add_action(&self, name: &str, command: &str) -> Result<Action>;
    fn action(&self, id: Id) -> Result<Action>;
    fn actions(&self) -> Result<Vec<Action>>;
    /// Fails with `Validation` while any filter targets the action.
    fn delete_action(&self, id: Id) -> Result<()>;

    // --- filters ---

    /// The target action must exist.
    fn add_filter(&self, filter: &NewFilter) -> Result<Filter>;
    fn update_filter_action(&self, id: Id, action: Id) -> Result<Filter>;
    fn filter(&self, id: Id) -> Result<Filter>;
    fn filters(&self) -> Result<Vec<Filter>>;
    /// Also drops every binding of the filter.
    fn delete_filter(&self, id: Id) -> Result<()>;

    // --- source/filter bindings ---

    /// Idempotent; both ends must exist.
    fn bind_filter(&self, source: Id, filter: Id) -> Result<()>;
    /// Idempotent.
    fn unbind_filter(&self, source: Id, filter: Id) -> Result<()>;
    /// Filters bound to `source`; empty for an unknown source.
    fn filters_on_source(&self, source: Id) -> Result<Vec<Filter>>;
    fn sources_with_filter(&self, filter: Id) -> Result<Vec<Source>>;
}

// ---------------------------------------------------------------------------
// Rows shared by the implementations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SourceRow {
    pub id: Id,
    pub title: String,
    pub type_id: Id,
    pub value: String,
    pub pause: bool,
}

impl SourceRow {
    pub fn into_source(self, kind: SourceType) -> Source {
        Source {
            id: self.id,
            title: self.title,
            kind,
            value: self.value,
            pause: self.pause,
        }
    }

    pub fn mentions(&self, keyword: &str) -> bool {
        self.title.contains(keyword) || self.value.contains(keyword)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct FilterRow {
    pub id: Id,
    pub title: FilterValue,
    pub body: FilterValue,
    pub action_id: Id,
}

impl FilterRow {
    pub fn into_filter(self, action: Action) -> Filter {
        Filter {
            id: self.id,
            title: self.title,
            body: self.body,
            action,
        }
    }
}

/// Uniqueness key of an article: SHA-256 over (title, body, link, source id).
/// Run `f` against `store` on the blocking pool. Store calls may fsync, so
/// async code never calls them inline.
pub(crate) async fn blocking<T, F>(store: &Arc<dyn Store>, f: F) -> Result<T>
where
    F: FnOnce(&dyn Store) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| GleanerError::Storage(format!("storage task failed: {e}")))?
}

pub(crate) fn dedup_key(title: &str, body: &str, link: &str, source: Id) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in [title, body, link] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    hasher.update(source.as_bytes());
    hasher.finalize().into()
}

pub(crate) fn new_article_key(article: &NewArticle) -> [u8; 32] {
    dedup_key(&article.title, &article.body, &article.link, article.src.id)
}

pub(crate) fn article_key(article: &Article) -> [u8; 32] {
    dedup_key(&article.title, &article.body, &article.link, article.src.id)
}

/// Newest first, id as tie-break so listings are stable.
pub(crate) fn sort_newest_first(articles: &mut [Article]) {
    articles.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(a.id.cmp(&b.id)));
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Shared conformance tests
// ---------------------------------------------------------------------------
