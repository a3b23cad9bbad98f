mod commands;
mod project;
mod render;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fleetform")]
#[command(about = "Declare it. Plan it. Apply it, in dependency order.", long_about = None)]
#[command(version)]
struct Cli {
    /// Declaration file (default: search from the current directory)
    #[arg(short = 'f', long = "file", global = true)]
    file: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate declarations and print the resource graph summary
    Validate,
    /// Show what apply would change
    Plan {
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
        /// Re-read live attributes before planning
        #[arg(long)]
        refresh: bool,
    },
    /// Plan and apply changes
    Apply {
        /// Maximum steps in flight (overrides settings.yaml)
        #[arg(short = 'p', long, value_parser = clap::value_parser!(u16).range(1..))]
        parallelism: Option<u16>,
        /// Print the apply result as JSON
        #[arg(long)]
        json: bool,
        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        auto_approve: bool,
        /// Re-read live attributes before planning
        #[arg(long)]
        refresh: bool,
    },
    /// Compare live attributes with stored state
    Drift {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect stored state
    #[command(subcommand)]
    State(StateCommands),
    /// Release a state lock left behind by a dead process
    #[command(name = "force-unlock")]
    ForceUnlock {
        /// Lock token, as printed by the lock error
        token: String,
    },
    /// Print the dependency graph in DOT format
    Graph,
}

#[derive(Subcommand)]
enum StateCommands {
    /// List managed resources
    List,
    /// Show one managed resource
    Show {
        /// Resource address (type.name)
        address: String,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let project = project::Project::discover(cli.file.as_deref())?;

    match cli.command {
        Commands::Validate => commands::validate::handle(&project)?,
        Commands::Plan { json, refresh } => commands::plan::handle(&project, json, refresh).await?,
        Commands::Apply {
            parallelism,
            json,
            auto_approve,
            refresh,
        } => {
            commands::apply::handle(
                &project,
                parallelism.map(usize::from),
                json,
                auto_approve,
                refresh,
            )
            .await?
        }
        Commands::Drift { json } => commands::drift::handle(&project, json).await?,
        Commands::State(StateCommands::List) => commands::state::list(&project).await?,
        Commands::State(StateCommands::Show { address }) => {
            commands::state::show(&project, &address).await?
        }
        Commands::ForceUnlock { token } => commands::state::force_unlock(&project, &token).await?,
        Commands::Graph => commands::graph::handle(&project)?,
    }

    Ok(())
}
