mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kurator_engine::RunRequest;

#[derive(Parser)]
#[command(
    name = "kurator",
    version,
    about = "Curation pipeline for biodiversity occurrence records"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Path to process configuration YAML
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output target for curated records (e.g. `kurator.db`, `sqlite:///data/out.db`)
    #[arg(short, long, global = true)]
    output: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP run trigger
    Serve {
        /// Listening port (default: 8088)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Dispatch a single run and print its summary
    Run {
        /// Maximum records to pull from the source
        #[arg(long)]
        limit: Option<String>,
        /// Source query string
        #[arg(long)]
        rq: Option<String>,
        /// Naming authority (GLOBALNAMES selects the GlobalNames resolver)
        #[arg(long)]
        authority: String,
        /// Workflow name, recorded with the run
        #[arg(long)]
        workflow: Option<String>,
        /// Taxonomic mode flag (true or false)
        #[arg(long, default_value = "false")]
        tax: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Serve { port } => {
            let process = commands::load_process_config(cli.config.as_deref(), port, cli.output)?;
            commands::serve::execute(process).await
        }
        Commands::Run {
            limit,
            rq,
            authority,
            workflow,
            tax,
        } => {
            let process = commands::load_process_config(cli.config.as_deref(), None, cli.output)?;
            let request = RunRequest {
                limit,
                rq,
                authority: Some(authority),
                workflow,
                tax: Some(tax),
            };
            commands::run::execute(process, &request).await
        }
    }
}
