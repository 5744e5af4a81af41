//! Queue inspection works on the directories alone, so it is safe to use
//! while the daemon runs.

use crate::context;
use crate::output::print_articles;
use clap::Subcommand;
use gleaner_core::action::ActionQueue;
use gleaner_core::Id;
use std::path::Path;

#[derive(Subcommand)]
pub enum QueueSubcommand {
    /// List pending items of an action
    List { action: Id },
    /// List dead-lettered items of an action
    Deadletter { action: Id },
    /// List items claimed by an unfinished execution
    Inflight { action: Id },
    /// Delete one item
    Delete {
        action: Id,
        item: Id,
        /// Delete from the dead-letter queue instead of the pending queue
        #[arg(long)]
        deadletter: bool,
    },
    /// Move a dead-lettered item back to pending
    Redrive { action: Id, item: Id },
}

pub fn run(config: &Path, subcmd: QueueSubcommand, json: bool) -> anyhow::Result<()> {
    let config = context::load_config(config)?;
    // Never create directories for an id that has no queue.
    let open = |action: Id| ActionQueue::open_existing(&config.queue.dir, action);

    match subcmd {
        QueueSubcommand::List { action } => {
            let items = open(action)?.pending()?;
            print_articles(&items, json, "No pending items.")
        }
        QueueSubcommand::Deadletter { action } => {
            let items = open(action)?.deadletter()?;
            print_articles(&items, json, "No dead-lettered items.")
        }
        QueueSubcommand::Inflight { action } => {
            let items = open(action)?.inflight()?;
            print_articles(&items, json, "No items in flight.")
        }
        QueueSubcommand::Delete {
            action,
            item,
            deadletter,
        } => {
            let queue = open(action)?;
            if deadletter {
                queue.delete_deadletter(item)?;
            } else {
                queue.delete_pending(item)?;
            }
            println!("Deleted {item}");
            Ok(())
        }
        QueueSubcommand::Redrive { action, item } => {
            open(action)?.redrive(item)?;
            println!("Redrove {item}");
            Ok(())
        }
    }
}
