use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "talkgpt", version, about = "TalkGPT chat server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override the config file path globally
    #[arg(short, long, global = true, default_value = "config.yaml")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API server
    Serve,

    /// Enter interactive terminal chat
    Chat {
        /// Continue an existing session instead of starting a new one
        #[arg(short, long)]
        session: Option<Uuid>,
    },

    /// Manage chat sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
pub enum SessionAction {
    /// Create a new session
    Create {
        #[arg(short, long)]
        name: Option<String>,
    },

    /// List all sessions, most recently active first
    List,

    /// Print a session's transcript
    Show { id: Uuid },

    /// Rename a session
    Rename { id: Uuid, name: String },

    /// Delete a session and its messages
    Delete { id: Uuid },
}
