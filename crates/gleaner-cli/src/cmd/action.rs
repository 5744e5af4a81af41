use crate::context;
use crate::output::{print_json, print_table};
use clap::Subcommand;
use gleaner_core::Id;
use std::path::Path;

#[derive(Subcommand)]
pub enum ActionSubcommand {
    /// List actions
    List,
    /// Add an action
    Add {
        name: String,
        /// Program and arguments; each matched article is written to its stdin as one JSON line
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Remove an action whose queues are empty
    Remove { id: Id },
}

pub fn run(config: &Path, subcmd: ActionSubcommand, json: bool) -> anyhow::Result<()> {
    let gleaner = context::open(config)?;
    match subcmd {
        ActionSubcommand::List => {
            let actions = gleaner.actions()?;
            if json {
                return print_json(&actions);
            }
            if actions.is_empty() {
                println!("No actions.");
                return Ok(());
            }
            let rows = actions
                .iter()
                .map(|a| vec![a.id.to_string(), a.name.clone(), a.command.clone()])
                .collect();
            print_table(&["ID", "NAME", "COMMAND"], rows);
            Ok(())
        }
        ActionSubcommand::Add { name, command } => {
            let action = gleaner.add_action(&name, &command.join(" "))?;
            if json {
                return print_json(&action);
            }
            println!("Added action '{}' ({})", action.name, action.id);
            Ok(())
        }
        ActionSubcommand::Remove { id } => {
            gleaner.delete_action(id)?;
            println!("Removed action {id}");
            Ok(())
        }
    }
}
