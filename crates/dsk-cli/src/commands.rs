//! CLI commands

use clap::{Parser, Subcommand};

/// dsk - OpenAI-compatible bridge to a cookie-authenticated chat backend
#[derive(Parser, Debug)]
#[command(name = "dsk")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Bind address (overrides HOST)
        #[arg(long)]
        host: Option<String>,

        /// Bind port (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run the cookie refresh command once and report the outcome
    Refresh,
}
