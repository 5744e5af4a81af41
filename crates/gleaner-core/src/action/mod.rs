//! Durable per-action work queues and the managers that drain them.

mod manager;
mod queue;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::id::Id;

pub use manager::ActionManager;
pub use queue::{ActionQueue, QueueCounts};

/// Live managers keyed by action id. Entries come and go with their action.
#[derive(Default)]
pub(crate) struct ActionIndex {
    managers: RwLock<HashMap<Id, Arc<ActionManager>>>,
}

impl ActionIndex {
    pub fn get(&self, action: Id) -> Option<Arc<ActionManager>> {
        let managers = self.managers.read().unwrap_or_else(|e| e.into_inner());
        managers.get(&action).cloned()
    }

    pub fn insert(&self, manager: Arc<ActionManager>) {
        let mut managers = self.managers.write().unwrap_or_else(|e| e.into_inner());
        managers.insert(manager.action().id, manager);
    }

    pub fn remove(&self, action: Id) -> Option<Arc<ActionManager>> {
        let mut managers = self.managers.write().unwrap_or_else(|e| e.into_inner());
        managers.remove(&action)
    }

    pub fn all(&self) -> Vec<Arc<ActionManager>> {
        let managers = self.managers.read().unwrap_or_else(|e| e.into_inner());
        managers.values().cloned().collect()
    }
}
