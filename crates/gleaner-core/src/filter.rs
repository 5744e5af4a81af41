//! Title/body matching for filters.
//!
//! [`CompiledFilter`] holds the regexes of one filter, compiled once; the
//! filter engine keeps them for the life of an activation.

use regex::Regex;

use crate::error::{GleanerError, Result};
use crate::model::{Article, Filter, FilterValue, NewFilter};

/// A matcher ready to run.
#[derive(Debug, Clone)]
pub enum Matcher {
    Literal(String),
    Regex(Regex),
    /// A regex that does not compile. Matches nothing.
    Never,
}

impl Matcher {
    pub fn is_match(&self, text: &str) -> bool {
        match self {
            Matcher::Literal(needle) => text.contains(needle.as_str()),
            Matcher::Regex(re) => re.is_match(text),
            Matcher::Never => false,
        }
    }
}

impl From<&FilterValue> for Matcher {
    fn from(value: &FilterValue) -> Self {
        if !value.regex {
            return Matcher::Literal(value.value.clone());
        }
        match Regex::new(&value.value) {
            Ok(re) => Matcher::Regex(re),
            Err(e) => {
                tracing::debug!(pattern = %value.value, error = %e, "filter regex does not compile");
                Matcher::Never
            }
        }
    }
}

impl FilterValue {
    /// Whether `text` satisfies this matcher.
    ///
    /// Literal values use substring containment; regex values use a search
    /// anywhere in `text`. A pattern that fails to compile matches nothing.
    /// Compiles on every call; hot paths use [`CompiledFilter`].
    pub fn matches(&self, text: &str) -> bool {
        Matcher::from(self).is_match(text)
    }

    /// Compile-check a regex matcher. Literal matchers always pass.
    pub fn validate(&self, field: &'static str) -> Result<()> {
        if self.regex {
            Regex::new(&self.value).map_err(|source| GleanerError::InvalidRegex { field, source })?;
        }
        Ok(())
    }
}

impl Filter {
    /// True if the title matcher OR the body matcher matches.
    pub fn is_match(&self, article: &Article) -> bool {
        self.title.matches(&article.title) || self.body.matches(&article.body)
    }
}

/// A filter with both matchers compiled.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    pub filter: Filter,
    title: Matcher,
    body: Matcher,
}

impl CompiledFilter {
    pub fn new(filter: Filter) -> Self {
        Self {
            title: Matcher::from(&filter.title),
            body: Matcher::from(&filter.body),
            filter,
        }
    }

    /// Same rule as [`Filter::is_match`].
    pub fn is_match(&self, article: &Article) -> bool {
        self.title.is_match(&article.title) || self.body.is_match(&article.body)
    }
}

impl NewFilter {
    pub fn validate(&self) -> Result<()> {
        self.title.validate("title")?;
        self.body.validate("body")
    }
}
