use crate::context;
use crate::output::{print_json, print_table, yes_no};
use clap::Subcommand;
use gleaner_core::Id;
use std::path::Path;

#[derive(Subcommand)]
pub enum SourceSubcommand {
    /// List sources
    List {
        /// Only sources whose title or value contains this keyword
        #[arg(long)]
        find: Option<String>,
    },
    /// Add a source
    Add {
        title: String,
        /// Location of the source, e.g. the feed URL
        value: String,
        /// Source type id or name
        #[arg(long = "type", value_name = "TYPE", default_value = "rss")]
        kind: String,
    },
    /// Stop collecting a source
    Pause { id: Id },
    /// Resume collecting a paused source
    Resume { id: Id },
    /// Remove a source, its filter bindings and its feed entries
    Remove { id: Id },
}

pub fn run(config: &Path, subcmd: SourceSubcommand, json: bool) -> anyhow::Result<()> {
    let gleaner = context::open(config)?;
    match subcmd {
        SourceSubcommand::List { find } => {
            let sources = match find {
                Some(kw) => gleaner.find_sources(&kw)?,
                None => gleaner.sources()?,
            };
            if json {
                return print_json(&sources);
            }
            if sources.is_empty() {
                println!("No sources.");
                return Ok(());
            }
            let rows = sources
                .iter()
                .map(|s| {
                    vec![
                        s.id.to_string(),
                        s.title.clone(),
                        s.kind.name.clone(),
                        yes_no(s.pause).to_string(),
                        s.value.clone(),
                    ]
                })
                .collect();
            print_table(&["ID", "TITLE", "TYPE", "PAUSED", "VALUE"], rows);
            Ok(())
        }
        SourceSubcommand::Add { title, value, kind } => {
            let type_id = context::resolve_source_type(&gleaner, &kind)?;
            let src = gleaner.add_source(&title, type_id, &value)?;
            if json {
                return print_json(&src);
            }
            println!("Added source '{}' ({})", src.title, src.id);
            Ok(())
        }
        SourceSubcommand::Pause { id } => {
            gleaner.pause_source(id)?;
            println!("Paused source {id}");
            Ok(())
        }
        SourceSubcommand::Resume { id } => {
            gleaner.resume_source(id)?;
            println!("Resumed source {id}");
            Ok(())
        }
        SourceSubcommand::Remove { id } => {
            gleaner.remove_source(id)?;
            println!("Removed source {id}");
            Ok(())
        }
    }
}
