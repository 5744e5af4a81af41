use crate::context;
use crate::output::print_articles;
use clap::Subcommand;
use gleaner_core::Id;
use std::path::Path;

#[derive(Subcommand)]
pub enum FeedSubcommand {
    /// Show the most recent articles of a source
    Show {
        source: Id,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Add an existing article to a source's feed
    Bind { source: Id, article: Id },
    /// Hide an article from a source's feed
    Remove { source: Id, article: Id },
}

pub fn run(config: &Path, subcmd: FeedSubcommand, json: bool) -> anyhow::Result<()> {
    let gleaner = context::open(config)?;
    match subcmd {
        FeedSubcommand::Show { source, limit } => {
            let articles = gleaner.feed(source, limit)?;
            print_articles(&articles, json, "No articles.")
        }
        FeedSubcommand::Bind { source, article } => {
            gleaner.bind_feed(source, article)?;
            println!("Bound article {article} to source {source}");
            Ok(())
        }
        FeedSubcommand::Remove { source, article } => {
            gleaner.remove_feed_entry(source, article)?;
            println!("Removed article {article} from the feed of {source}");
            Ok(())
        }
    }
}
