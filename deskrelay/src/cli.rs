use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// DeskRelay - host-resident agent for encrypted script bundles and desktop automation
#[derive(Parser, Debug)]
#[command(name = "deskrelay")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP agent (`/execute-encrypted`, `/health`, primitive commands)
    Serve {
        /// Listen host (default: from env or 0.0.0.0)
        #[arg(long)]
        host: Option<String>,

        /// Listen port (default: from env or 8888)
        #[arg(long)]
        port: Option<u16>,

        /// Directory containing automation tool scripts
        #[arg(long, value_name = "DIR")]
        tools_dir: Option<PathBuf>,

        /// Script timeout in seconds (default: from env or 60)
        #[arg(long)]
        script_timeout: Option<u64>,

        /// Inline command timeout in seconds (default: from env or 30)
        #[arg(long)]
        shell_timeout: Option<u64>,
    },

    /// Run one encrypted envelope locally and print the JSON result
    Exec {
        /// Envelope JSON, a path to an envelope file, or "-" to read stdin
        #[arg(value_name = "ENVELOPE_JSON")]
        envelope: String,

        /// Script timeout in seconds (default: from env or 60)
        #[arg(long)]
        script_timeout: Option<u64>,

        /// Inline command timeout in seconds (default: from env or 30)
        #[arg(long)]
        shell_timeout: Option<u64>,
    },

    /// Print the health document
    Health,
}
