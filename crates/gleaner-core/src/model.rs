//! Domain records shared by the stores, the pipeline and the action queues.
//!
//! Serde field names are the external JSON shape: the same bytes are written
//! to queue files and to the stdin of action commands.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::id::Id;

// ---------------------------------------------------------------------------
// SourceType
// ---------------------------------------------------------------------------

pub const SOURCE_TYPE_RSS: &str = "rss";
pub const SOURCE_TYPE_NOOP: &str = "noop";

/// Built-in source types as `(name, command)`, created at startup if absent.
pub const BUILTIN_SOURCE_TYPES: [(&str, &str); 2] = [
    (SOURCE_TYPE_RSS, SOURCE_TYPE_RSS),
    (SOURCE_TYPE_NOOP, SOURCE_TYPE_NOOP),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceType {
    pub id: Id,
    pub name: String,
    pub command: String,
    pub user_create: bool,
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: Id,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: SourceType,
    /// Location of the source, e.g. the feed URL.
    pub value: String,
    pub pause: bool,
}

impl Source {
    /// Whether the collector fetches this source: built-in `rss` type, not paused.
    pub fn is_collectable(&self) -> bool {
        !self.kind.user_create && self.kind.name == SOURCE_TYPE_RSS && !self.pause
    }
}

// ---------------------------------------------------------------------------
// Article
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: Id,
    pub src: Source,
    pub title: String,
    pub body: String,
    pub link: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub raw: String,
}

impl Article {
    /// External JSON representation, as written to queue files and stdin.
    pub fn to_wire(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A candidate article before storage assigns (or finds) its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArticle {
    pub src: Source,
    pub title: String,
    pub body: String,
    pub link: String,
    pub timestamp: i64,
    pub raw: String,
}

impl NewArticle {
    pub fn into_article(self, id: Id) -> Article {
        Article {
            id,
            src: self.src,
            title: self.title,
            body: self.body,
            link: self.link,
            timestamp: self.timestamp,
            raw: self.raw,
        }
    }

    /// Whether `article` is the stored copy of this candidate.
    pub fn same_content(&self, article: &Article) -> bool {
        self.src.id == article.src.id
            && self.title == article.title
            && self.body == article.body
            && self.link == article.link
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// An external processing target, invoked once per matched article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub id: Id,
    pub name: String,
    /// Command line, split on whitespace at execution time.
    pub command: String,
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterValue {
    pub value: String,
    pub regex: bool,
}

impl FilterValue {
    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            regex: false,
        }
    }

    pub fn regex(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            regex: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub id: Id,
    pub title: FilterValue,
    pub body: FilterValue,
    pub action: Action,
}

/// Input for creating a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFilter {
    pub title: FilterValue,
    pub body: FilterValue,
    pub action_id: Id,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rss_type() -> SourceType {
        SourceType {
            id: Id::new(),
            name: SOURCE_TYPE_RSS.into(),
            command: SOURCE_TYPE_RSS.into(),
            user_create: false,
        }
    }

    fn source(kind: SourceType, pause: bool) -> Source {
        Source {
            id: Id::new(),
            title: "example".into(),
            kind,
            value: "https://example.com/feed.xml".into(),
            pause,
        }
    }

    #[test]
    fn collectable_requires_builtin_rss_and_not_paused() {
        assert!(source(rss_type(), false).is_collectable());
        assert!(!source(rss_type(), true).is_collectable());

        let mut user_rss = rss_type();
        user_rss.user_create = true;
        assert!(!source(user_rss, false).is_collectable());

        let mut noop = rss_type();
        noop.name = SOURCE_TYPE_NOOP.into();
        assert!(!source(noop, false).is_collectable());
    }

    #[test]
    fn article_wire_shape_uses_external_field_names() {
        let article = NewArticle {
            src: source(rss_type(), false),
            title: "T".into(),
            body: "B".into(),
            link: "L".into(),
            timestamp: 1_700_000_000,
            raw: "{}".into(),
        }
        .into_article(Id::new());

        let v: serde_json::Value = serde_json::from_slice(&article.to_wire().unwrap()).unwrap();
        assert_eq!(v["title"], "T");
        assert_eq!(v["timestamp"], 1_700_000_000);
        assert_eq!(v["src"]["type"]["name"], "rss");
        assert_eq!(v["src"]["type"]["user_create"], false);
        assert_eq!(v["src"]["pause"], false);

        let back = Article::from_wire(&article.to_wire().unwrap()).unwrap();
        assert_eq!(back, article);
    }
}
