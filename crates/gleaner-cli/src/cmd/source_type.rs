use crate::context;
use crate::output::{print_json, print_table, yes_no};
use clap::Subcommand;
use gleaner_core::Id;
use std::path::Path;

#[derive(Subcommand)]
pub enum SourceTypeSubcommand {
    /// List source types
    List,
    /// Add a user-defined source type
    Add {
        name: String,
        /// Command associated with the type
        command: String,
    },
    /// Remove a user-defined source type
    Remove { id: Id },
}

pub fn run(config: &Path, subcmd: SourceTypeSubcommand, json: bool) -> anyhow::Result<()> {
    let gleaner = context::open(config)?;
    match subcmd {
        SourceTypeSubcommand::List => {
            let types = gleaner.source_types()?;
            if json {
                return print_json(&types);
            }
            let rows = types
                .iter()
                .map(|t| {
                    vec![
                        t.id.to_string(),
                        t.name.clone(),
                        t.command.clone(),
                        yes_no(!t.user_create).to_string(),
                    ]
                })
                .collect();
            print_table(&["ID", "NAME", "COMMAND", "BUILT-IN"], rows);
            Ok(())
        }
        SourceTypeSubcommand::Add { name, command } => {
            let created = gleaner.add_source_type(&name, &command, true)?;
            if json {
                return print_json(&created);
            }
            println!("Added source type '{}' ({})", created.name, created.id);
            Ok(())
        }
        SourceTypeSubcommand::Remove { id } => {
            gleaner.delete_source_type(id)?;
            println!("Removed source type {id}");
            Ok(())
        }
    }
}
