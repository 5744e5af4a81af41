use anyhow::{anyhow, Context};
use gleaner_core::config::Config;
use gleaner_core::fetch::HttpFetcher;
use gleaner_core::store::RedbStore;
use gleaner_core::{Gleaner, Id};
use std::path::Path;
use std::sync::Arc;

/// Load the config at `path`. A missing file means built-in defaults.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    Config::load_or_default(path)
        .with_context(|| format!("failed to load config {}", path.display()))
}

/// An un-started `Gleaner` over the persistent store, for admin commands.
///
/// The database is locked while a daemon runs, so this fails with a storage
/// error in that case.
pub fn open(config_path: &Path) -> anyhow::Result<Gleaner> {
    let config = load_config(config_path)?;
    let store = RedbStore::open(&config.storage.path).with_context(|| {
        format!("failed to open database {}", config.storage.path.display())
    })?;
    let fetcher = HttpFetcher::new(&config.collector.user_agent, config.collector.fetch_timeout())?;
    Ok(Gleaner::new(config, Arc::new(store), Arc::new(fetcher))?)
}

/// Accept a source type by id or by name. Built-in types win a name clash.
pub fn resolve_source_type(gleaner: &Gleaner, key: &str) -> anyhow::Result<Id> {
    if let Ok(id) = Id::parse(key) {
        return Ok(id);
    }
    let mut matches: Vec<_> = gleaner
        .source_types()?
        .into_iter()
        .filter(|t| t.name == key)
        .collect();
    matches.sort_by_key(|t| t.user_create);
    matches
        .first()
        .map(|t| t.id)
        .ok_or_else(|| anyhow!("unknown source type '{key}'"))
}
