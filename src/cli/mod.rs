//! Command-line interface.

mod sessions;

use clap::{Parser, Subcommand};

pub use sessions::{SessionsCommand, run_sessions_command};

use crate::bootstrap::{ChannelKind, Script};

#[derive(Parser, Debug)]
#[command(
    name = "pgchat",
    version,
    about = "Chat agent with Postgres-backed session storage"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a chat script
    Run {
        /// Script to run
        #[arg(value_enum)]
        script: Script,

        /// Front-end to chat through
        #[arg(long, value_enum, default_value_t = ChannelKind::Repl)]
        channel: ChannelKind,
    },

    /// Inspect or clean up stored sessions
    #[command(subcommand)]
    Sessions(SessionsCommand),
}
