use crate::context;
use crate::output::{print_json, print_table};
use clap::Subcommand;
use gleaner_core::model::{Filter, FilterValue, NewFilter};
use gleaner_core::Id;
use std::path::Path;

#[derive(Subcommand)]
pub enum FilterSubcommand {
    /// List filters
    List {
        /// Only filters bound to this source
        #[arg(long)]
        source: Option<Id>,
    },
    /// Add a filter; it matches when the title OR the body matcher matches
    Add {
        /// Title matcher (an empty literal matches everything)
        #[arg(long)]
        title: String,
        /// Treat the title matcher as a regular expression
        #[arg(long)]
        title_regex: bool,
        /// Body matcher (an empty literal matches everything)
        #[arg(long)]
        body: String,
        /// Treat the body matcher as a regular expression
        #[arg(long)]
        body_regex: bool,
        /// Action that receives matches
        #[arg(long)]
        action: Id,
    },
    /// Evaluate a filter against articles of a source
    Bind { source: Id, filter: Id },
    /// Stop evaluating a filter against a source
    Unbind { source: Id, filter: Id },
    /// Route a filter's matches to another action
    SetAction { filter: Id, action: Id },
    /// Show the sources a filter is bound to
    Sources { filter: Id },
    /// Remove a filter
    Remove { id: Id },
}

pub fn run(config: &Path, subcmd: FilterSubcommand, json: bool) -> anyhow::Result<()> {
    let gleaner = context::open(config)?;
    match subcmd {
        FilterSubcommand::List { source } => {
            let filters = match source {
                Some(src) => gleaner.filters_on_source(src)?,
                None => gleaner.filters()?,
            };
            print_filters(&filters, json)
        }
        FilterSubcommand::Add {
            title,
            title_regex,
            body,
            body_regex,
            action,
        } => {
            let filter = gleaner.add_filter(&NewFilter {
                title: matcher(title, title_regex),
                body: matcher(body, body_regex),
                action_id: action,
            })?;
            if json {
                return print_json(&filter);
            }
            println!("Added filter {} -> '{}'", filter.id, filter.action.name);
            Ok(())
        }
        FilterSubcommand::Bind { source, filter } => {
            gleaner.bind_filter(source, filter)?;
            println!("Bound filter {filter} to source {source}");
            Ok(())
        }
        FilterSubcommand::Unbind { source, filter } => {
            gleaner.unbind_filter(source, filter)?;
            println!("Unbound filter {filter} from source {source}");
            Ok(())
        }
        FilterSubcommand::SetAction { filter, action } => {
            let updated = gleaner.update_filter_action(filter, action)?;
            if json {
                return print_json(&updated);
            }
            println!("Filter {} -> '{}'", updated.id, updated.action.name);
            Ok(())
        }
        FilterSubcommand::Sources { filter } => {
            let sources = gleaner.sources_with_filter(filter)?;
            if json {
                return print_json(&sources);
            }
            for s in sources {
                println!("{}  {}", s.id, s.title);
            }
            Ok(())
        }
        FilterSubcommand::Remove { id } => {
            gleaner.delete_filter(id)?;
            println!("Removed filter {id}");
            Ok(())
        }
    }
}

fn matcher(value: String, regex: bool) -> FilterValue {
    if regex {
        FilterValue::regex(value)
    } else {
        FilterValue::literal(value)
    }
}

fn print_filters(filters: &[Filter], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&filters);
    }
    if filters.is_empty() {
        println!("No filters.");
        return Ok(());
    }
    let show = |v: &FilterValue| {
        if v.regex {
            format!("/{}/", v.value)
        } else {
            format!("\"{}\"", v.value)
        }
    };
    let rows = filters
        .iter()
        .map(|f| {
            vec![
                f.id.to_string(),
                show(&f.title),
                show(&f.body),
                f.action.name.clone(),
            ]
        })
        .collect();
    print_table(&["ID", "TITLE", "BODY", "ACTION"], rows);
    Ok(())
}
