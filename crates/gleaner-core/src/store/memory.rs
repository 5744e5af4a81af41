use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{GleanerError, Result};
use crate::id::Id;
use crate::model::{Action, Article, Filter, NewArticle, NewFilter, Source, SourceType};

use super::{
    article_key, new_article_key, now_ms, sort_newest_first, ArticleQuery, FilterRow, Recorded,
    SourceRow, Store,
};

#[derive(Debug, Clone, Copy)]
struct FeedBinding {
    ts_ms: i64,
    enable: bool,
}

#[derive(Debug, Default)]
struct Tables {
    source_types: BTreeMap<Id, SourceType>,
    sources: BTreeMap<Id, SourceRow>,
    articles: BTreeMap<Id, Article>,
    article_keys: HashMap<[u8; 32], Id>,
    /// source -> article -> binding
    feed: HashMap<Id, HashMap<Id, FeedBinding>>,
    actions: BTreeMap<Id, Action>,
    filters: BTreeMap<Id, FilterRow>,
    /// (source, filter)
    bindings: BTreeSet<(Id, Id)>,
}

impl Tables {
    fn source(&self, id: Id) -> Result<Source> {
        let row = self
            .sources
            .get(&id)
            .ok_or_else(|| GleanerError::not_found("source", id))?;
        let kind = self
            .source_types
            .get(&row.type_id)
            .cloned()
            .ok_or_else(|| GleanerError::not_found("source type", row.type_id))?;
        Ok(row.clone().into_source(kind))
    }

    fn filter(&self, id: Id) -> Result<Filter> {
        let row = self
            .filters
            .get(&id)
            .ok_or_else(|| GleanerError::not_found("filter", id))?;
        let action = self
            .actions
            .get(&row.action_id)
            .cloned()
            .ok_or_else(|| GleanerError::not_found("action", row.action_id))?;
        Ok(row.clone().into_filter(action))
    }

    fn source_mut(&mut self, id: Id) -> Result<&mut SourceRow> {
        self.sources
            .get_mut(&id)
            .ok_or_else(|| GleanerError::not_found("source", id))
    }
}

/// `RwLock`-guarded in-memory store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Store for MemoryStore {
    fn add_source_type(&self, name: &str, command: &str, user_create: bool) -> Result<SourceType> {
        let st = SourceType {
            id: Id::new(),
            name: name.to_string(),
            command: command.to_string(),
            user_create,
        };
        self.write().source_types.insert(st.id, st.clone());
        Ok(st)
    }

    fn source_type(&self, id: Id) -> Result<SourceType> {
        self.read()
            .source_types
            .get(&id)
            .cloned()
            .ok_or_else(|| GleanerError::not_found("source type", id))
    }

    fn source_types(&self) -> Result<Vec<SourceType>> {
        Ok(self.read().source_types.values().cloned().collect())
    }

    fn delete_source_type(&self, id: Id) -> Result<()> {
        let mut t = self.write();
        if !t.source_types.contains_key(&id) {
            return Err(GleanerError::not_found("source type", id));
        }
        if t.sources.values().any(|s| s.type_id == id) {
            return Err(GleanerError::Validation(format!(
                "source type {id} is still used by a source"
            )));
        }
        t.source_types.remove(&id);
        Ok(())
    }

    fn add_source(&self, title: &str, type_id: Id, value: &str) -> Result<Source> {
        let mut t = self.write();
        if !t.source_types.contains_key(&type_id) {
            return Err(GleanerError::not_found("source type", type_id));
        }
        let row = SourceRow {
            id: Id::new(),
            title: title.to_string(),
            type_id,
            value: value.to_string(),
            pause: false,
        };
        let id = row.id;
        t.sources.insert(id, row);
        t.source(id)
    }

    fn source(&self, id: Id) -> Result<Source> {
        self.read().source(id)
    }

    fn sources(&self) -> Result<Vec<Source>> {
        let t = self.read();
        t.sources.keys().map(|id| t.source(*id)).collect()
    }

    fn find_sources(&self, keyword: &str) -> Result<Vec<Source>> {
        let t = self.read();
        t.sources
            .values()
            .filter(|row| row.mentions(keyword))
            .map(|row| t.source(row.id))
            .collect()
    }

    fn remove_source(&self, id: Id) -> Result<()> {
        let mut t = self.write();
        if t.sources.remove(&id).is_none() {
            return Err(GleanerError::not_found("source", id));
        }
        t.bindings.retain(|(src, _)| *src != id);
        t.feed.remove(&id);
        Ok(())
    }

    fn pause_source(&self, id: Id) -> Result<()> {
        self.write().source_mut(id)?.pause = true;
        Ok(())
    }

    fn resume_source(&self, id: Id) -> Result<()> {
        self.write().source_mut(id)?.pause = false;
        Ok(())
    }

    fn add_article(&self, article: &NewArticle) -> Result<Recorded> {
        let mut t = self.write();
        let key = new_article_key(article);
        if let Some(existing) = t.article_keys.get(&key).and_then(|id| t.articles.get(id)) {
            return Ok(Recorded::Duplicate(existing.clone()));
        }

        let src = t.source(article.src.id)?;
        let stored = NewArticle {
            src,
            ..article.clone()
        }
        .into_article(Id::new());

        t.article_keys.insert(key, stored.id);
        t.feed.entry(stored.src.id).or_default().insert(
            stored.id,
            FeedBinding {
                ts_ms: stored.timestamp.saturating_mul(1000),
                enable: true,
            },
        );
        t.articles.insert(stored.id, stored.clone());
        Ok(Recorded::New(stored))
    }

    fn article(&self, id: Id) -> Result<Article> {
        self.read()
            .articles
            .get(&id)
            .cloned()
            .ok_or_else(|| GleanerError::not_found("article", id))
    }

    fn lookup_articles(&self, query: &ArticleQuery) -> Result<Vec<Article>> {
        let mut found: Vec<Article> = self
            .read()
            .articles
            .values()
            .filter(|a| query.accepts(a))
            .cloned()
            .collect();
        sort_newest_first(&mut found);
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    fn remove_article(&self, id: Id) -> Result<()> {
        let mut t = self.write();
        let article = t
            .articles
            .remove(&id)
            .ok_or_else(|| GleanerError::not_found("article", id))?;
        t.article_keys.remove(&article_key(&article));
        for entries in t.feed.values_mut() {
            entries.remove(&id);
        }
        Ok(())
    }

    fn feed(&self, source: Id, limit: usize) -> Result<Vec<Article>> {
        let t = self.read();
        let Some(entries) = t.feed.get(&source) else {
            return Ok(Vec::new());
        };
        let mut enabled: Vec<(i64, Id)> = entries
            .iter()
            .filter(|(_, b)| b.enable)
            .map(|(id, b)| (b.ts_ms, *id))
            .collect();
        enabled.sort_by(|a, b| b.cmp(a));
        Ok(enabled
            .into_iter()
            .take(limit)
            .filter_map(|(_, id)| t.articles.get(&id).cloned())
            .collect())
    }

    fn bind_feed(&self, source: Id, article: Id) -> Result<()> {
        let mut t = self.write();
        if !t.sources.contains_key(&source) {
            return Err(GleanerError::not_found("source", source));
        }
        if !t.articles.contains_key(&article) {
            return Err(GleanerError::not_found("article", article));
        }
        t.feed.entry(source).or_default().insert(
            article,
            FeedBinding {
                ts_ms: now_ms(),
                enable: true,
            },
        );
        Ok(())
    }

    fn remove_feed_entry(&self, source: Id, article: Id) -> Result<()> {
        let mut t = self.write();
        let binding = t
            .feed
            .get_mut(&source)
            .and_then(|entries| entries.get_mut(&article))
            .ok_or_else(|| GleanerError::not_found("feed entry", article))?;
        binding.enable = false;
        Ok(())
    }

    fn add_action(&self, name: &str, command: &str) -> Result<Action> {
        let action = Action {
            id: Id::new(),
            name: name.to_string(),
            command: command.to_string(),
        };
        self.write().actions.insert(action.id, action.clone());
        Ok(action)
    }

    fn action(&self, id: Id) -> Result<Action> {
        self.read()
            .actions
            .get(&id)
            .cloned()
            .ok_or_else(|| GleanerError::not_found("action", id))
    }

    fn actions(&self) -> Result<Vec<Action>> {
        Ok(self.read().actions.values().cloned().collect())
    }

    fn delete_action(&self, id: Id) -> Result<()> {
        let mut t = self.write();
        if !t.actions.contains_key(&id) {
            return Err(GleanerError::not_found("action", id));
        }
        if let Some(f) = t.filters.values().find(|f| f.action_id == id) {
            return Err(GleanerError::Validation(format!(
                "action {id} is still the target of filter {}",
                f.id
            )));
        }
        t.actions.remove(&id);
        Ok(())
    }

    fn add_filter(&self, filter: &NewFilter) -> Result<Filter> {
        let mut t = self.write();
        if !t.actions.contains_key(&filter.action_id) {
            return Err(GleanerError::not_found("action", filter.action_id));
        }
        let row = FilterRow {
            id: Id::new(),
            title: filter.title.clone(),
            body: filter.body.clone(),
            action_id: filter.action_id,
        };
        let id = row.id;
        t.filters.insert(id, row);
        t.filter(id)
    }

    fn update_filter_action(&self, id: Id, action: Id) -> Result<Filter> {
        let mut t = self.write();
        if !t.actions.contains_key(&action) {
            return Err(GleanerError::not_found("action", action));
        }
        t.filters
            .get_mut(&id)
            .ok_or_else(|| GleanerError::not_found("filter", id))?
            .action_id = action;
        t.filter(id)
    }

    fn filter(&self, id: Id) -> Result<Filter> {
        self.read().filter(id)
    }

    fn filters(&self) -> Result<Vec<Filter>> {
        let t = self.read();
        t.filters.keys().map(|id| t.filter(*id)).collect()
    }

    fn delete_filter(&self, id: Id) -> Result<()> {
        let mut t = self.write();
        if t.filters.remove(&id).is_none() {
            return Err(GleanerError::not_found("filter", id));
        }
        t.bindings.retain(|(_, f)| *f != id);
        Ok(())
    }

    fn bind_filter(&self, source: Id, filter: Id) -> Result<()> {
        let mut t = self.write();
        if !t.sources.contains_key(&source) {
            return Err(GleanerError::not_found("source", source));
        }
        if !t.filters.contains_key(&filter) {
            return Err(GleanerError::not_found("filter", filter));
        }
        t.bindings.insert((source, filter));
        Ok(())
    }

    fn unbind_filter(&self, source: Id, filter: Id) -> Result<()> {
        self.write().bindings.remove(&(source, filter));
        Ok(())
    }

    fn filters_on_source(&self, source: Id) -> Result<Vec<Filter>> {
        let t = self.read();
        t.bindings
            .iter()
            .filter(|(src, _)| *src == source)
            .map(|(_, f)| t.filter(*f))
            .collect()
    }

    fn sources_with_filter(&self, filter: Id) -> Result<Vec<Source>> {
        let t = self.read();
        t.bindings
            .iter()
            .filter(|(_, f)| *f == filter)
            .map(|(src, _)| t.source(*src))
            .collect()
    }
}
