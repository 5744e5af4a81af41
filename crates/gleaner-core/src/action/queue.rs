//! Filesystem-backed queue of one action.
//!
//! ```text
//! <base>/<action-id>/
//!   new/         pending items, watched by the manager
//!   tmp/         staging for writes into new/
//!   wip/         items claimed by a running execution
//!   deadletter/  items whose execution failed
//! ```
//!
//! File names are item ids; contents are the article JSON. Every transition
//! is a no-clobber rename, so an id lives in at most one state.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{GleanerError, Result};
use crate::id::Id;
use crate::io;
use crate::model::Article;
use crate::paths::{self, DEADLETTER_DIR, NEW_DIR, TMP_DIR, WIP_DIR};

/// Item totals per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub inflight: usize,
    pub deadletter: usize,
}

impl QueueCounts {
    pub fn is_empty(&self) -> bool {
        self.pending == 0 && self.inflight == 0 && self.deadletter == 0
    }
}

/// An item moved into `wip/`, ready to execute.
#[derive(Debug, Clone)]
pub(crate) struct Claimed {
    pub id: Id,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ActionQueue {
    action: Id,
    root: PathBuf,
    new: PathBuf,
    tmp: PathBuf,
    wip: PathBuf,
    deadletter: PathBuf,
}

impl ActionQueue {
    /// Open the queue of `action` under `base`, creating its directories.
    pub fn open(base: &Path, action: Id) -> Result<Self> {
        let queue = Self::layout(base, action);
        for dir in queue.dirs() {
            io::ensure_dir(dir)?;
        }
        Ok(queue)
    }

    /// Open a queue that must already exist; nothing is created. Fails with
    /// `NotFound` when any of its directories is missing.
    pub fn open_existing(base: &Path, action: Id) -> Result<Self> {
        let queue = Self::layout(base, action);
        if !queue.dirs().iter().all(|d| d.is_dir()) {
            return Err(GleanerError::not_found("action queue", action));
        }
        Ok(queue)
    }

    fn layout(base: &Path, action: Id) -> Self {
        let root = paths::action_dir(base, action);
        Self {
            action,
            new: root.join(NEW_DIR),
            tmp: root.join(TMP_DIR),
            wip: root.join(WIP_DIR),
            deadletter: root.join(DEADLETTER_DIR),
            root,
        }
    }

    fn dirs(&self) -> [&PathBuf; 4] {
        [&self.new, &self.tmp, &self.wip, &self.deadletter]
    }

    pub fn action_id(&self) -> Id {
        self.action
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn new_dir(&self) -> &Path {
        &self.new
    }

    // -----------------------------------------------------------------------
    // Operator surface
    // -----------------------------------------------------------------------

    /// Create pending item `item`. Fails with `AlreadyQueued` if the id is
    /// pending, in flight or dead-lettered.
    pub fn add(&self, item: Id, payload: &[u8]) -> Result<()> {
        for dir in [&self.new, &self.wip, &self.deadletter] {
            if paths::item_path(dir, item).exists() {
                return Err(GleanerError::AlreadyQueued(item));
            }
        }
        match io::write_new(&self.tmp, &paths::item_path(&self.new, item), payload) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(GleanerError::AlreadyQueued(item)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn pending(&self) -> Result<Vec<Article>> {
        read_items(&self.new)
    }

    pub fn deadletter(&self) -> Result<Vec<Article>> {
        read_items(&self.deadletter)
    }

    pub fn inflight(&self) -> Result<Vec<Article>> {
        read_items(&self.wip)
    }

    pub fn delete_pending(&self, item: Id) -> Result<()> {
        remove_item(&self.new, item)
    }

    pub fn delete_deadletter(&self, item: Id) -> Result<()> {
        remove_item(&self.deadletter, item)
    }

    /// Move a dead-lettered item back to pending, keeping its id and payload.
    pub fn redrive(&self, item: Id) -> Result<()> {
        self.transition(&self.deadletter, &self.new, item)
    }

    pub fn counts(&self) -> Result<QueueCounts> {
        Ok(QueueCounts {
            pending: io::list_files(&self.new)?.len(),
            inflight: io::list_files(&self.wip)?.len(),
            deadletter: io::list_files(&self.deadletter)?.len(),
        })
    }

    /// True when nothing is pending, in flight or dead-lettered.
    pub fn is_drained(&self) -> Result<bool> {
        Ok(io::is_empty_dir(&self.new)?
            && io::is_empty_dir(&self.wip)?
            && io::is_empty_dir(&self.deadletter)?)
    }

    // -----------------------------------------------------------------------
    // Manager transitions
    // -----------------------------------------------------------------------

    pub(crate) fn pending_ids(&self) -> Result<Vec<Id>> {
        list_ids(&self.new)
    }

    pub(crate) fn inflight_ids(&self) -> Result<Vec<Id>> {
        list_ids(&self.wip)
    }

    /// Move pending `item` into `wip/`. `None` when it is no longer pending,
    /// which happens when the same item is announced twice.
    pub(crate) fn claim(&self, item: Id) -> Result<Option<Claimed>> {
        match io::move_noclobber(&paths::item_path(&self.new, item), &paths::item_path(&self.wip, item)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(GleanerError::AlreadyQueued(item))
            }
            Err(e) => return Err(e.into()),
        }
        self.reclaim(item)
    }

    /// Load an item left in `wip/` by an earlier run.
    pub(crate) fn reclaim(&self, item: Id) -> Result<Option<Claimed>> {
        match std::fs::read(paths::item_path(&self.wip, item)) {
            Ok(payload) => Ok(Some(Claimed { id: item, payload })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Return an interrupted in-flight item to `new/`.
    pub(crate) fn release(&self, item: Id) -> Result<()> {
        self.transition(&self.wip, &self.new, item)
    }

    /// Move a failed in-flight item to `deadletter/`.
    pub(crate) fn bury(&self, item: Id) -> Result<()> {
        self.transition(&self.wip, &self.deadletter, item)
    }

    /// Drop a successfully processed in-flight item.
    pub(crate) fn complete(&self, item: Id) -> Result<()> {
        remove_item(&self.wip, item)
    }

    fn transition(&self, from: &Path, to: &Path, item: Id) -> Result<()> {
        match io::move_noclobber(&paths::item_path(from, item), &paths::item_path(to, item)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(GleanerError::QueueItemNotFound(item)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(GleanerError::AlreadyQueued(item)),
            Err(e) => Err(e.into()),
        }
    }
}

fn remove_item(dir: &Path, item: Id) -> Result<()> {
    match std::fs::remove_file(paths::item_path(dir, item)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(GleanerError::QueueItemNotFound(item)),
        Err(e) => Err(e.into()),
    }
}

fn list_ids(dir: &Path) -> Result<Vec<Id>> {
    let mut ids = Vec::new();
    for path in io::list_files(dir)? {
        match paths::item_id(&path) {
            Some(id) => ids.push(id),
            None => tracing::warn!(path = %path.display(), "ignoring foreign file in queue"),
        }
    }
    Ok(ids)
}

/// Deserialize every item in `dir`. Any unreadable item fails the whole call.
fn read_items(dir: &Path) -> Result<Vec<Article>> {
    let corrupt = |path: &Path, reason: String| GleanerError::CorruptQueueItem {
        path: path.to_path_buf(),
        reason,
    };

    let mut items = Vec::new();
    for path in io::list_files(dir)? {
        if paths::item_id(&path).is_none() {
            return Err(corrupt(&path, "file name is not an item id".into()));
        }
        let bytes = std::fs::read(&path).map_err(|e| corrupt(&path, e.to_string()))?;
        let article = Article::from_wire(&bytes).map_err(|e| corrupt(&path, e.to_string()))?;
        items.push(article);
    }
    Ok(items)
}
