//! Fixtures shared by unit tests.

use crate::id::Id;
use crate::model::{Article, Source, SourceType, SOURCE_TYPE_RSS};

pub(crate) fn rss_type() -> SourceType {
    SourceType {
        id: Id::new(),
        name: SOURCE_TYPE_RSS.into(),
        command: SOURCE_TYPE_RSS.into(),
        user_create: false,
    }
}

pub(crate) fn source() -> Source {
    Source {
        id: Id::new(),
        title: "src".into(),
        kind: rss_type(),
        value: "http://example.com/rss".into(),
        pause: false,
    }
}

pub(crate) fn article(title: &str) -> Article {
    Article {
        id: Id::new(),
        src: source(),
        title: title.into(),
        body: "body".into(),
        link: "http://example.com/1".into(),
        timestamp: 1_700_000_000,
        raw: "{}".into(),
    }
}
