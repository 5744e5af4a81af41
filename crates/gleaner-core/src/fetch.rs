//! Fetching a source: `fetch(url) -> items`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{GleanerError, Result};

/// One candidate item of a fetched feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    pub body: String,
    pub link: String,
    pub updated: Option<DateTime<Utc>>,
    pub published: Option<DateTime<Utc>>,
    /// JSON rendering of the parsed entry, kept for audit.
    pub raw: String,
}

impl FeedItem {
    /// Unix seconds: updated, else published, else `now`.
    pub fn effective_timestamp(&self, now: i64) -> i64 {
        self.updated
            .or(self.published)
            .map(|t| t.timestamp())
            .unwrap_or(now)
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch and parse the feed at `url`. Must return promptly once `cancel`
    /// fires.
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<FeedItem>>;
}

// ---------------------------------------------------------------------------
// HttpFetcher
// ---------------------------------------------------------------------------

/// RSS, Atom and JSON Feed over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(user_agent);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| GleanerError::Fetch(format!("cannot build http client: {e}")))?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<Vec<FeedItem>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| GleanerError::Fetch(format!("request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(GleanerError::Fetch(format!(
                "unexpected status code: {}",
                status.as_u16()
            )));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| GleanerError::Fetch(format!("cannot read body: {e}")))?;
        parse_items(&body)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<FeedItem>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GleanerError::Fetch("canceled".into())),
            res = self.get(url) => res,
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct RawEntry<'a> {
    id: &'a str,
    title: Option<&'a str>,
    links: Vec<&'a str>,
    summary: Option<&'a str>,
    content: Option<&'a str>,
    authors: Vec<&'a str>,
    categories: Vec<&'a str>,
    published: Option<DateTime<Utc>>,
    updated: Option<DateTime<Utc>>,
}

impl<'a> From<&'a Entry> for RawEntry<'a> {
    fn from(e: &'a Entry) -> Self {
        Self {
            id: &e.id,
            title: e.title.as_ref().map(|t| t.content.as_str()),
            links: e.links.iter().map(|l| l.href.as_str()).collect(),
            summary: e.summary.as_ref().map(|t| t.content.as_str()),
            content: e.content.as_ref().and_then(|c| c.body.as_deref()),
            authors: e.authors.iter().map(|p| p.name.as_str()).collect(),
            categories: e.categories.iter().map(|c| c.term.as_str()).collect(),
            published: e.published,
            updated: e.updated,
        }
    }
}

/// Parse an RSS/Atom/JSON Feed document into items.
pub fn parse_items(bytes: &[u8]) -> Result<Vec<FeedItem>> {
    let feed = feed_rs::parser::parse(bytes)
        .map_err(|e| GleanerError::Fetch(format!("cannot parse feed: {e}")))?;
    feed.entries.iter().map(item_from_entry).collect()
}

fn item_from_entry(entry: &Entry) -> Result<FeedItem> {
    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.clone())
        .unwrap_or_default();
    let body = entry
        .summary
        .as_ref()
        .map(|t| t.content.clone())
        .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
        .unwrap_or_default();
    let link = entry
        .links
        .first()
        .map(|l| l.href.clone())
        .unwrap_or_default();
    let raw = serde_json::to_string(&RawEntry::from(entry))?;

    Ok(FeedItem {
        title,
        body,
        link,
        updated: entry.updated,
        published: entry.published,
        raw,
    })
}
