use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "self-registering service host")]
pub struct Args {
    /// Sub‑commands (install, run, etc.)
    #[command(subcommand)]
    pub sub: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Register every service in the service file (all start stopped)
    Install {
        /// Path to the service file
        #[arg(long, short = 'f')]
        file: PathBuf,

        /// Register against an in-memory database and print the result
        #[arg(long)]
        dry_run: bool,
    },
    /// Unregister every service in the service file
    Uninstall {
        /// Path to the service file
        #[arg(long, short = 'f')]
        file: PathBuf,

        /// Unregister against an in-memory database
        #[arg(long)]
        dry_run: bool,
    },
    /// Start a service and wait for it (Exit 0 = running, 1 = failed)
    Start { name: String },
    /// Stop a service and wait for it (Exit 0 = stopped, 1 = failed)
    Stop { name: String },
    /// Print the live status of a service (Exit 0 = running, 1 = otherwise)
    Status { name: String },
    /// Service mode: hand control to the service manager
    Run {
        /// Path to the service file
        #[arg(long, short = 'f')]
        file: PathBuf,
    },
}
