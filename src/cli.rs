use clap::{Parser, Subcommand};

/// Keeper: encrypted session token store with a periodic keep-alive runner
#[derive(Parser)]
#[command(name = "keeper", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the web service for adding and removing tokens
    Serve {
        /// Port to bind (defaults to KEEPER_PORT, then 5000)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Start the batch runner that replays stored tokens on an interval.
    /// With SESSION_TOKEN set, replays only that token and opens no database.
    Run {
        /// Perform a single pass and exit
        #[arg(long)]
        once: bool,
    },

    /// Remove duplicate tokens from the store once and exit
    Dedupe,

    /// Print a freshly generated ENCRYPTION_KEY
    Keygen,
}
