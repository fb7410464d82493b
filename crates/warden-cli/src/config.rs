use clap::{Parser, Subcommand};

/// CLI for warden
#[derive(Parser, Debug)]
#[command(name = "warden", version, about = "Run and supervise command batches")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the command batch from a configuration file
    Run {
        /// File path to the configuration file (TOML)
        #[arg(short, long)]
        file: Option<String>,

        /// Run every command line at once
        #[arg(long)]
        parallel: bool,

        /// Print process info as JSON when done
        #[arg(long)]
        json: bool,
    },
    /// Run a single process
    Exec {
        /// Kill the process after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Tags to attach to the process
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Print process info as JSON when done
        #[arg(long)]
        json: bool,

        /// Program and arguments
        #[arg(last = true, required = true)]
        args: Vec<String>,
    },
}
