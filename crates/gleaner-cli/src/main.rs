mod cmd;
mod context;
mod logging;
mod output;

use clap::{Parser, Subcommand};
use cmd::{
    action::ActionSubcommand, config::ConfigSubcommand, feed::FeedSubcommand,
    filter::FilterSubcommand, queue::QueueSubcommand, source::SourceSubcommand,
    source_type::SourceTypeSubcommand,
};
use gleaner_core::config::DEFAULT_CONFIG_PATH;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "gleaner",
    about = "Collect feeds, match articles against filters, and hand matches to actions",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (missing file = built-in defaults)
    #[arg(long, short = 'c', global = true, env = "GLEANER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the collector, filter engine and action queues until stopped
    Serve {
        /// Keep everything in memory instead of the configured database
        #[arg(long)]
        ephemeral: bool,
    },

    /// Inspect and validate the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Manage source types
    SourceType {
        #[command(subcommand)]
        subcommand: SourceTypeSubcommand,
    },

    /// Manage sources
    Source {
        #[command(subcommand)]
        subcommand: SourceSubcommand,
    },

    /// Manage actions
    Action {
        #[command(subcommand)]
        subcommand: ActionSubcommand,
    },

    /// Manage filters and their source bindings
    Filter {
        #[command(subcommand)]
        subcommand: FilterSubcommand,
    },

    /// Show and edit the recent-articles view of a source
    Feed {
        #[command(subcommand)]
        subcommand: FeedSubcommand,
    },

    /// Inspect and redrive action queues
    Queue {
        #[command(subcommand)]
        subcommand: QueueSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();
    if !matches!(cli.command, Commands::Serve { .. }) {
        logging::init_cli();
    }

    let config = cli.config.as_path();
    let result = match cli.command {
        Commands::Serve { ephemeral } => cmd::serve::run(config, ephemeral),
        Commands::Config { subcommand } => cmd::config::run(config, subcommand, cli.json),
        Commands::SourceType { subcommand } => cmd::source_type::run(config, subcommand, cli.json),
        Commands::Source { subcommand } => cmd::source::run(config, subcommand, cli.json),
        Commands::Action { subcommand } => cmd::action::run(config, subcommand, cli.json),
        Commands::Filter { subcommand } => cmd::filter::run(config, subcommand, cli.json),
        Commands::Feed { subcommand } => cmd::feed::run(config, subcommand, cli.json),
        Commands::Queue { subcommand } => cmd::queue::run(config, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
