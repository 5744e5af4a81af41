//! Persistent store on redb.
//!
//! # Table design
//!
//! Entity tables are keyed by the 16 id bytes and hold JSON values. Three
//! index tables carry the relations:
//!
//! ```text
//! article_keys     sha256(title, body, link, source id) -> article id
//! feed             [ source id: 16 | ts_ms: u64 big-endian | article id: 16 ] -> enabled
//! filter_bindings  [ source id: 16 | filter id: 16 ] -> 1
//! ```
//!
//! With the source id in the high bytes, one range scan yields everything
//! bound to a source; in `feed`, byte order within that range equals binding
//! time order, so the newest entries are read from the back.

use std::path::Path;

use redb::{Database, ReadTransaction, ReadableTable, Table, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{GleanerError, Result};
use crate::id::Id;
use crate::model::{Action, Article, Filter, NewArticle, NewFilter, Source, SourceType};

use super::{
    article_key, new_article_key, now_ms, sort_newest_first, ArticleQuery, FilterRow, Recorded,
    SourceRow, Store,
};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

type Rows = &'static [u8];

const SOURCE_TYPES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("source_types");
const SOURCES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("sources");
const ARTICLES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("articles");
const ACTIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("actions");
const FILTERS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("filters");

const ARTICLE_KEYS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("article_keys");
const FEED: TableDefinition<&[u8], u8> = TableDefinition::new("feed");
const FILTER_BINDINGS: TableDefinition<&[u8], u8> = TableDefinition::new("filter_bindings");

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn feed_key(source: Id, ts_ms: i64, article: Id) -> [u8; 40] {
    let mut key = [0u8; 40];
    key[..16].copy_from_slice(source.as_bytes());
    key[16..24].copy_from_slice(&(ts_ms.max(0) as u64).to_be_bytes());
    key[24..].copy_from_slice(article.as_bytes());
    key
}

fn binding_key(source: Id, filter: Id) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(source.as_bytes());
    key[16..].copy_from_slice(filter.as_bytes());
    key
}

/// Inclusive bounds covering every key that starts with `source`.
fn prefix_bounds<const N: usize>(source: Id) -> ([u8; N], [u8; N]) {
    let mut lo = [0u8; N];
    let mut hi = [0xffu8; N];
    lo[..16].copy_from_slice(source.as_bytes());
    hi[..16].copy_from_slice(source.as_bytes());
    (lo, hi)
}

fn trailing_id(key: &[u8]) -> Id {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&key[key.len() - 16..]);
    Id::from_bytes(bytes)
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

trait StorageResultExt<T> {
    fn storage(self) -> Result<T>;
}

impl<T, E: std::fmt::Display> StorageResultExt<T> for std::result::Result<T, E> {
    fn storage(self) -> Result<T> {
        self.map_err(|e| GleanerError::Storage(e.to_string()))
    }
}

fn get_row<T: DeserializeOwned>(table: &impl ReadableTable<Rows, Rows>, id: Id) -> Result<Option<T>> {
    match table.get(id.as_bytes().as_slice()).storage()? {
        Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
        None => Ok(None),
    }
}

fn must_row<T: DeserializeOwned>(
    table: &impl ReadableTable<Rows, Rows>,
    kind: &'static str,
    id: Id,
) -> Result<T> {
    get_row(table, id)?.ok_or_else(|| GleanerError::not_found(kind, id))
}

fn put_row<T: Serialize>(table: &mut Table<'_, Rows, Rows>, id: Id, row: &T) -> Result<()> {
    let value = serde_json::to_vec(row)?;
    table
        .insert(id.as_bytes().as_slice(), value.as_slice())
        .storage()?;
    Ok(())
}

fn has_row(table: &impl ReadableTable<Rows, Rows>, id: Id) -> Result<bool> {
    Ok(table.get(id.as_bytes().as_slice()).storage()?.is_some())
}

fn all_rows<T: DeserializeOwned>(table: &impl ReadableTable<Rows, Rows>) -> Result<Vec<T>> {
    let mut rows = Vec::new();
    for entry in table.iter().storage()? {
        let (_, v) = entry.storage()?;
        rows.push(serde_json::from_slice(v.value())?);
    }
    Ok(rows)
}

fn load_source(types: &impl ReadableTable<Rows, Rows>, row: SourceRow) -> Result<Source> {
    let kind = must_row(types, "source type", row.type_id)?;
    Ok(row.into_source(kind))
}

fn load_filter(actions: &impl ReadableTable<Rows, Rows>, row: FilterRow) -> Result<Filter> {
    let action = must_row(actions, "action", row.action_id)?;
    Ok(row.into_filter(action))
}

/// Keys of `table` in `[lo, hi]`, collected so the table can be mutated afterwards.
fn keys_in<const N: usize>(
    table: &impl ReadableTable<Rows, u8>,
    (lo, hi): ([u8; N], [u8; N]),
) -> Result<Vec<(Vec<u8>, u8)>> {
    let mut keys = Vec::new();
    for entry in table.range(lo.as_slice()..=hi.as_slice()).storage()? {
        let (k, v) = entry.storage()?;
        keys.push((k.value().to_vec(), v.value()));
    }
    Ok(keys)
}

// ---------------------------------------------------------------------------
// RedbStore
// ---------------------------------------------------------------------------

pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create the database at `path`, creating every table up front.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            crate::io::ensure_dir(parent)?;
        }
        let db = Database::create(path).storage()?;
        let wt = db.begin_write().storage()?;
        for def in [SOURCE_TYPES, SOURCES, ARTICLES, ACTIONS, FILTERS, ARTICLE_KEYS] {
            wt.open_table(def).storage()?;
        }
        for def in [FEED, FILTER_BINDINGS] {
            wt.open_table(def).storage()?;
        }
        wt.commit().storage()?;
        Ok(Self { db })
    }

    fn read<R>(&self, f: impl FnOnce(&ReadTransaction) -> Result<R>) -> Result<R> {
        let rt = self.db.begin_read().storage()?;
        f(&rt)
    }

    /// Run `f` in a write transaction, committed only when `f` succeeds.
    fn write<R>(&self, f: impl FnOnce(&WriteTransaction) -> Result<R>) -> Result<R> {
        let wt = self.db.begin_write().storage()?;
        let out = f(&wt)?;
        wt.commit().storage()?;
        Ok(out)
    }

    fn set_pause(&self, id: Id, pause: bool) -> Result<()> {
        self.write(|wt| {
            let mut sources = wt.open_table(SOURCES).storage()?;
            let mut row: SourceRow = must_row(&sources, "source", id)?;
            row.pause = pause;
            put_row(&mut sources, id, &row)
        })
    }
}

impl Store for RedbStore {
    fn add_source_type(&self, name: &str, command: &str, user_create: bool) -> Result<SourceType> {
        let st = SourceType {
            id: Id::new(),
            name: name.to_string(),
            command: command.to_string(),
            user_create,
        };
        self.write(|wt| {
            let mut types = wt.open_table(SOURCE_TYPES).storage()?;
            put_row(&mut types, st.id, &st)
        })?;
        Ok(st)
    }

    fn source_type(&self, id: Id) -> Result<SourceType> {
        self.read(|rt| {
            let types = rt.open_table(SOURCE_TYPES).storage()?;
            must_row(&types, "source type", id)
        })
    }

    fn source_types(&self) -> Result<Vec<SourceType>> {
        self.read(|rt| all_rows(&rt.open_table(SOURCE_TYPES).storage()?))
    }

    fn delete_source_type(&self, id: Id) -> Result<()> {
        self.write(|wt| {
            let mut types = wt.open_table(SOURCE_TYPES).storage()?;
            if !has_row(&types, id)? {
                return Err(GleanerError::not_found("source type", id));
            }
            let sources: Vec<SourceRow> = all_rows(&wt.open_table(SOURCES).storage()?)?;
            if sources.iter().any(|s| s.type_id == id) {
                return Err(GleanerError::Validation(format!(
                    "source type {id} is still used by a source"
                )));
            }
            types.remove(id.as_bytes().as_slice()).storage()?;
            Ok(())
        })
    }

    fn add_source(&self, title: &str, type_id: Id, value: &str) -> Result<Source> {
        self.write(|wt| {
            let types = wt.open_table(SOURCE_TYPES).storage()?;
            let kind: SourceType = must_row(&types, "source type", type_id)?;
            let row = SourceRow {
                id: Id::new(),
                title: title.to_string(),
                type_id,
                value: value.to_string(),
                pause: false,
            };
            put_row(&mut wt.open_table(SOURCES).storage()?, row.id, &row)?;
            Ok(row.into_source(kind))
        })
    }

    fn source(&self, id: Id) -> Result<Source> {
        self.read(|rt| {
            let row = must_row(&rt.open_table(SOURCES).storage()?, "source", id)?;
            load_source(&rt.open_table(SOURCE_TYPES).storage()?, row)
        })
    }

    fn sources(&self) -> Result<Vec<Source>> {
        self.read(|rt| {
            let types = rt.open_table(SOURCE_TYPES).storage()?;
            let rows: Vec<SourceRow> = all_rows(&rt.open_table(SOURCES).storage()?)?;
            rows.into_iter().map(|row| load_source(&types, row)).collect()
        })
    }

    fn find_sources(&self, keyword: &str) -> Result<Vec<Source>> {
        self.read(|rt| {
            let types = rt.open_table(SOURCE_TYPES).storage()?;
            let rows: Vec<SourceRow> = all_rows(&rt.open_table(SOURCES).storage()?)?;
            rows.into_iter()
                .filter(|row| row.mentions(keyword))
                .map(|row| load_source(&types, row))
                .collect()
        })
    }

    fn remove_source(&self, id: Id) -> Result<()> {
        self.write(|wt| {
            let mut sources = wt.open_table(SOURCES).storage()?;
            if sources.remove(id.as_bytes().as_slice()).storage()?.is_none() {
                return Err(GleanerError::not_found("source", id));
            }

            let mut bindings = wt.open_table(FILTER_BINDINGS).storage()?;
            for (key, _) in keys_in::<32>(&bindings, prefix_bounds(id))? {
                bindings.remove(key.as_slice()).storage()?;
            }
            let mut feed = wt.open_table(FEED).storage()?;
            for (key, _) in keys_in::<40>(&feed, prefix_bounds(id))? {
                feed.remove(key.as_slice()).storage()?;
            }
            Ok(())
        })
    }

    fn pause_source(&self, id: Id) -> Result<()> {
        self.set_pause(id, true)
    }

    fn resume_source(&self, id: Id) -> Result<()> {
        self.set_pause(id, false)
    }

    fn add_article(&self, article: &NewArticle) -> Result<Recorded> {
        let key = new_article_key(article);
        self.write(|wt| {
            let mut keys = wt.open_table(ARTICLE_KEYS).storage()?;
            let mut articles = wt.open_table(ARTICLES).storage()?;

            let existing = keys
                .get(key.as_slice())
                .storage()?
                .map(|guard| trailing_id(guard.value()));
            if let Some(id) = existing {
                return Ok(Recorded::Duplicate(must_row(&articles, "article", id)?));
            }

            let row = must_row(&wt.open_table(SOURCES).storage()?, "source", article.src.id)?;
            let src = load_source(&wt.open_table(SOURCE_TYPES).storage()?, row)?;
            let stored = NewArticle {
                src,
                ..article.clone()
            }
            .into_article(Id::new());

            put_row(&mut articles, stored.id, &stored)?;
            keys.insert(key.as_slice(), stored.id.as_bytes().as_slice())
                .storage()?;
            let fk = feed_key(stored.src.id, stored.timestamp.saturating_mul(1000), stored.id);
            wt.open_table(FEED)
                .storage()?
                .insert(fk.as_slice(), 1u8)
                .storage()?;
            Ok(Recorded::New(stored))
        })
    }

    fn article(&self, id: Id) -> Result<Article> {
        self.read(|rt| must_row(&rt.open_table(ARTICLES).storage()?, "article", id))
    }

    fn lookup_articles(&self, query: &ArticleQuery) -> Result<Vec<Article>> {
        let mut found: Vec<Article> = self.read(|rt| all_rows(&rt.open_table(ARTICLES).storage()?))?;
        found.retain(|a| query.accepts(a));
        sort_newest_first(&mut found);
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    fn remove_article(&self, id: Id) -> Result<()> {
        self.write(|wt| {
            let mut articles = wt.open_table(ARTICLES).storage()?;
            let article: Article = must_row(&articles, "article", id)?;
            articles.remove(id.as_bytes().as_slice()).storage()?;
            wt.open_table(ARTICLE_KEYS)
                .storage()?
                .remove(article_key(&article).as_slice())
                .storage()?;

            let mut feed = wt.open_table(FEED).storage()?;
            let mut bound = Vec::new();
            for entry in feed.iter().storage()? {
                let (k, _) = entry.storage()?;
                if trailing_id(k.value()) == id {
                    bound.push(k.value().to_vec());
                }
            }
            for key in bound {
                feed.remove(key.as_slice()).storage()?;
            }
            Ok(())
        })
    }

    fn feed(&self, source: Id, limit: usize) -> Result<Vec<Article>> {
        self.read(|rt| {
            let feed = rt.open_table(FEED).storage()?;
            let articles = rt.open_table(ARTICLES).storage()?;
            let (lo, hi) = prefix_bounds::<40>(source);

            let mut out = Vec::new();
            for entry in feed.range(lo.as_slice()..=hi.as_slice()).storage()?.rev() {
                if out.len() == limit {
                    break;
                }
                let (k, enabled) = entry.storage()?;
                if enabled.value() == 0 {
                    continue;
                }
                if let Some(article) = get_row(&articles, trailing_id(k.value()))? {
                    out.push(article);
                }
            }
            Ok(out)
        })
    }

    fn bind_feed(&self, source: Id, article: Id) -> Result<()> {
        self.write(|wt| {
            if !has_row(&wt.open_table(SOURCES).storage()?, source)? {
                return Err(GleanerError::not_found("source", source));
            }
            if !has_row(&wt.open_table(ARTICLES).storage()?, article)? {
                return Err(GleanerError::not_found("article", article));
            }
            let mut feed = wt.open_table(FEED).storage()?;
            for (key, _) in keys_in::<40>(&feed, prefix_bounds(source))? {
                if trailing_id(&key) == article {
                    feed.remove(key.as_slice()).storage()?;
                }
            }
            feed.insert(feed_key(source, now_ms(), article).as_slice(), 1u8)
                .storage()?;
            Ok(())
        })
    }

    fn remove_feed_entry(&self, source: Id, article: Id) -> Result<()> {
        self.write(|wt| {
            let mut feed = wt.open_table(FEED).storage()?;
            let key = keys_in::<40>(&feed, prefix_bounds(source))?
                .into_iter()
                .map(|(key, _)| key)
                .find(|key| trailing_id(key) == article)
                .ok_or_else(|| GleanerError::not_found("feed entry", article))?;
            feed.insert(key.as_slice(), 0u8).storage()?;
            Ok(())
        })
    }

    fn add_action(&self, name: &str, command: &str) -> Result<Action> {
        let action = Action {
            id: Id::new(),
            name: name.to_string(),
            command: command.to_string(),
        };
        self.write(|wt| put_row(&mut wt.open_table(ACTIONS).storage()?, action.id, &action))?;
        Ok(action)
    }

    fn action(&self, id: Id) -> Result<Action> {
        self.read(|rt| must_row(&rt.open_table(ACTIONS).storage()?, "action", id))
    }

    fn actions(&self) -> Result<Vec<Action>> {
        self.read(|rt| all_rows(&rt.open_table(ACTIONS).storage()?))
    }

    fn delete_action(&self, id: Id) -> Result<()> {
        self.write(|wt| {
            let mut actions = wt.open_table(ACTIONS).storage()?;
            if !has_row(&actions, id)? {
                return Err(GleanerError::not_found("action", id));
            }
            let filters: Vec<FilterRow> = all_rows(&wt.open_table(FILTERS).storage()?)?;
            if let Some(f) = filters.iter().find(|f| f.action_id == id) {
                return Err(GleanerError::Validation(format!(
                    "action {id} is still the target of filter {}",
                    f.id
                )));
            }
            actions.remove(id.as_bytes().as_slice()).storage()?;
            Ok(())
        })
    }

    fn add_filter(&self, filter: &NewFilter) -> Result<Filter> {
        self.write(|wt| {
            let action: Action = must_row(&wt.open_table(ACTIONS).storage()?, "action", filter.action_id)?;
            let row = FilterRow {
                id: Id::new(),
                title: filter.title.clone(),
                body: filter.body.clone(),
                action_id: action.id,
            };
            put_row(&mut wt.open_table(FILTERS).storage()?, row.id, &row)?;
            Ok(row.into_filter(action))
        })
    }

    fn update_filter_action(&self, id: Id, action: Id) -> Result<Filter> {
        self.write(|wt| {
            let target: Action = must_row(&wt.open_table(ACTIONS).storage()?, "action", action)?;
            let mut filters = wt.open_table(FILTERS).storage()?;
            let mut row: FilterRow = must_row(&filters, "filter", id)?;
            row.action_id = action;
            put_row(&mut filters, id, &row)?;
            Ok(row.into_filter(target))
        })
    }

    fn filter(&self, id: Id) -> Result<Filter> {
        self.read(|rt| {
            let row = must_row(&rt.open_table(FILTERS).storage()?, "filter", id)?;
            load_filter(&rt.open_table(ACTIONS).storage()?, row)
        })
    }

    fn filters(&self) -> Result<Vec<Filter>> {
        self.read(|rt| {
            let actions = rt.open_table(ACTIONS).storage()?;
            let rows: Vec<FilterRow> = all_rows(&rt.open_table(FILTERS).storage()?)?;
            rows.into_iter().map(|row| load_filter(&actions, row)).collect()
        })
    }

    fn delete_filter(&self, id: Id) -> Result<()> {
        self.write(|wt| {
            let mut filters = wt.open_table(FILTERS).storage()?;
            if filters.remove(id.as_bytes().as_slice()).storage()?.is_none() {
                return Err(GleanerError::not_found("filter", id));
            }
            let mut bindings = wt.open_table(FILTER_BINDINGS).storage()?;
            let mut bound = Vec::new();
            for entry in bindings.iter().storage()? {
                let (k, _) = entry.storage()?;
                if trailing_id(k.value()) == id {
                    bound.push(k.value().to_vec());
                }
            }
            for key in bound {
                bindings.remove(key.as_slice()).storage()?;
            }
            Ok(())
        })
    }

    fn bind_filter(&self, source: Id, filter: Id) -> Result<()> {
        self.write(|wt| {
            if !has_row(&wt.open_table(SOURCES).storage()?, source)? {
                return Err(GleanerError::not_found("source", source));
            }
            if !has_row(&wt.open_table(FILTERS).storage()?, filter)? {
                return Err(GleanerError::not_found("filter", filter));
            }
            wt.open_table(FILTER_BINDINGS)
                .storage()?
                .insert(binding_key(source, filter).as_slice(), 1u8)
                .storage()?;
            Ok(())
        })
    }

    fn unbind_filter(&self, source: Id, filter: Id) -> Result<()> {
        self.write(|wt| {
            wt.open_table(FILTER_BINDINGS)
                .storage()?
                .remove(binding_key(source, filter).as_slice())
                .storage()?;
            Ok(())
        })
    }

    fn filters_on_source(&self, source: Id) -> Result<Vec<Filter>> {
        self.read(|rt| {
            let bindings = rt.open_table(FILTER_BINDINGS).storage()?;
            let filters = rt.open_table(FILTERS).storage()?;
            let actions = rt.open_table(ACTIONS).storage()?;
            keys_in::<32>(&bindings, prefix_bounds(source))?
                .into_iter()
                .map(|(key, _)| {
                    let row = must_row(&filters, "filter", trailing_id(&key))?;
                    load_filter(&actions, row)
                })
                .collect()
        })
    }

    fn sources_with_filter(&self, filter: Id) -> Result<Vec<Source>> {
        self.read(|rt| {
            let bindings = rt.open_table(FILTER_BINDINGS).storage()?;
            let sources = rt.open_table(SOURCES).storage()?;
            let types = rt.open_table(SOURCE_TYPES).storage()?;
            let mut out = Vec::new();
            for entry in bindings.iter().storage()? {
                let (k, _) = entry.storage()?;
                let key = k.value();
                if trailing_id(key) != filter {
                    continue;
                }
                let mut src = [0u8; 16];
                src.copy_from_slice(&key[..16]);
                let row = must_row(&sources, "source", Id::from_bytes(src))?;
                out.push(load_source(&types, row)?);
            }
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::conformance;
    use super::*;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, RedbStore) {
        let dir = TempDir::new().unwrap();
        let store = RedbStore::open(&dir.path().join("nested/gleaner.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn idempotent_insert() {
        let (_dir, store) = open_tmp();
        conformance::idempotent_insert(&store);
    }

    #[test]
    fn new_articles_join_the_feed() {
        let (_dir, store) = open_tmp();
        conformance::new_articles_join_the_feed(&store);
    }

    #[test]
    fn lookup_filters_and_orders() {
        let (_dir, store) = open_tmp();
        conformance::lookup_filters_and_orders(&store);
    }

    #[test]
    fn source_lifecycle() {
        let (_dir, store) = open_tmp();
        conformance::source_lifecycle(&store);
    }

    #[test]
    fn filters_and_bindings() {
        let (_dir, store) = open_tmp();
        conformance::filters_and_bindings(&store);
    }

    #[test]
    fn removing_a_source_drops_its_bindings() {
        let (_dir, store) = open_tmp();
        conformance::removing_a_source_drops_its_bindings(&store);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gleaner.redb");
        let (src, article) = {
            let store = RedbStore::open(&path).unwrap();
            let st = store.add_source_type("rss", "rss", false).unwrap();
            let src = store.add_source("s", st.id, "http://x").unwrap();
            let article = store
                .add_article(&NewArticle {
                    src: src.clone(),
                    title: "T".into(),
                    body: "B".into(),
                    link: "L".into(),
                    timestamp: 42,
                    raw: String::new(),
                })
                .unwrap()
                .into_article();
            (src, article)
        };

        let store = RedbStore::open(&path).unwrap();
        assert_eq!(store.source(src.id).unwrap(), src);
        assert_eq!(store.feed(src.id, 5).unwrap(), vec![article.clone()]);
        let again = store
            .add_article(&NewArticle {
                src,
                title: "T".into(),
                body: "B".into(),
                link: "L".into(),
                timestamp: 7,
                raw: String::new(),
            })
            .unwrap();
        assert_eq!(again, Recorded::Duplicate(article));
    }

    #[test]
    fn feed_keys_sort_by_time_within_a_source() {
        let src = Id::new();
        let early = feed_key(src, 1_000, Id::new());
        let late = feed_key(src, 2_000, Id::new());
        assert!(early < late);
        let (lo, hi) = prefix_bounds::<40>(src);
        assert!(lo <= early && late <= hi);
    }
}
