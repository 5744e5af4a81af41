use std::path::{Path, PathBuf};

use crate::id::Id;

// ---------------------------------------------------------------------------
// Queue layout
// ---------------------------------------------------------------------------

/// Pending items; the manager watches this directory.
pub const NEW_DIR: &str = "new";
/// Staging area for writes that are renamed into `new/`.
pub const TMP_DIR: &str = "tmp";
/// Items claimed by a running execution.
pub const WIP_DIR: &str = "wip";
/// Items whose execution failed.
pub const DEADLETTER_DIR: &str = "deadletter";

pub const QUEUE_SUBDIRS: [&str; 4] = [NEW_DIR, TMP_DIR, WIP_DIR, DEADLETTER_DIR];

// ---------------------------------------------------------------------------
// Log files
// ---------------------------------------------------------------------------

pub const COLLECTOR_LOG: &str = "collector.log";
pub const ACTION_LOG: &str = "action.log";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn action_dir(base: &Path, action: Id) -> PathBuf {
    base.join(action.to_string())
}

pub fn item_path(dir: &Path, item: Id) -> PathBuf {
    dir.join(item.to_string())
}

/// Parse a queue file name back into the item id it was stored under.
pub fn item_id(path: &Path) -> Option<Id> {
    let name = path.file_name()?.to_str()?;
    Id::parse(name).ok()
}
