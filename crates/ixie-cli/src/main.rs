#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::doc_markdown)]

mod commands;
mod listener;
mod logging;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ixie")]
#[command(author, version, about = "A development server for unbundled ES modules", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Start the development server
    Dev {
        /// Path to the config file (default: search upward for ixie.config.*)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Port to listen on [default: serve.port, then 3000]
        #[arg(short, long, env = "IXIE_PORT")]
        port: Option<u16>,

        /// Host to bind to [default: serve.hostname, then ::]
        #[arg(long, env = "IXIE_HOST")]
        host: Option<String>,
    },

    /// Resolve a specifier the way the dev server would
    Resolve {
        /// Specifier to resolve (e.g., "lodash", "./util.js", "#internal")
        specifier: String,

        /// File to resolve from (default: the working directory)
        #[arg(long, value_name = "FILE")]
        from: Option<PathBuf>,

        /// Extra resolution condition (repeatable)
        #[arg(long = "condition", value_name = "NAME")]
        conditions: Vec<String>,

        /// Path to the config file
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Print a source file as the dev server would send it
    Transform {
        /// Source file to transform
        file: PathBuf,

        /// Path to the config file
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine working directory
    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let Some(command) = cli.command else {
        return commands::version::run();
    };

    if matches!(command, Commands::Version) {
        return commands::version::run();
    }

    logging::init(cli.verbose, cli.json);
    tracing::debug!(cwd = %cwd.display(), "starting");

    match command {
        Commands::Version => commands::version::run(),
        Commands::Dev { config, port, host } => {
            let action = commands::dev::DevAction {
                cwd,
                config,
                port,
                host,
            };
            let rt = tokio::runtime::Runtime::new().into_diagnostic()?;
            rt.block_on(commands::dev::run(action))
        }
        Commands::Resolve {
            specifier,
            from,
            conditions,
            config,
        } => commands::resolve::run(
            &cwd,
            &specifier,
            from.as_deref(),
            &conditions,
            config.as_deref(),
            cli.json,
        ),
        Commands::Transform { file, config } => {
            commands::transform::run(&cwd, &file, config.as_deref())
        }
    }
}
