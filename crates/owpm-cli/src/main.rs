//! owpm CLI - dependency locking for Python projects

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod add;
mod init;
mod list;
mod lock;
mod project;
mod remove;

#[derive(Parser)]
#[command(name = "owpm")]
#[command(version)]
#[command(about = "Lock the dependencies of a Python project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new `.owpm` project file in the current directory
    Init {
        /// Name of the project (the file is saved as `<name>.owpm`)
        #[arg(long)]
        name: String,

        /// Brief description of the project
        #[arg(long, default_value = owpm_pkg::DEFAULT_DESCRIPTION)]
        desc: String,

        /// Base version of the project
        #[arg(long, default_value = "0.1.0")]
        ver: String,
    },

    /// Add packages to the project
    Add {
        /// Package names, optionally with a constraint (e.g. "requests>=2.0")
        #[arg(required = true)]
        names: Vec<String>,

        /// Add as development packages
        #[arg(short, long)]
        dev: bool,

        /// Constraint for names given without one
        #[arg(long, default_value = owpm_pkg::ANY)]
        version: String,
    },

    /// Remove packages from the project
    #[command(alias = "rem")]
    Remove {
        /// Package names to remove
        #[arg(required = true)]
        names: Vec<String>,

        /// Remove development packages instead of runtime ones
        #[arg(short, long)]
        dev: bool,
    },

    /// Resolve and lock the project's packages
    Lock {
        /// Lock even if the lock store is up to date
        #[arg(short, long)]
        force: bool,
    },

    /// List the project's packages
    List {
        /// Show the contents of the lock store instead of the manifest
        #[arg(short, long)]
        locked: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { name, desc, ver } => {
            init::init_project(init::InitOptions {
                name,
                description: desc,
                version: ver,
            })?;
        }

        Commands::Add {
            names,
            dev,
            version,
        } => {
            add::add_packages(&add::AddOptions {
                names,
                dev,
                constraint: version,
            })?;
        }

        Commands::Remove { names, dev } => {
            remove::remove_packages(&remove::RemoveOptions { names, dev })?;
        }

        Commands::Lock { force } => {
            lock::lock_project(force)?;
        }

        Commands::List { locked } => {
            list::list_packages(locked)?;
        }
    }

    Ok(())
}
