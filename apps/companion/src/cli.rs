//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use glasslink_protocol::{SystemCommand, TodoPriority};

#[derive(Debug, Parser)]
#[command(name = "glasslink")]
#[command(about = "Pair with and drive GlassLink glasses")]
pub struct Cli {
    /// Configuration file (default: ~/.config/glasslink/companion.toml)
    #[arg(short, long, env = "GLASSLINK_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List nearby glasses
    Scan {
        /// Scan window in seconds
        #[arg(short, long, default_value = "10")]
        seconds: u64,
    },

    /// Pair with nearby glasses
    Pair {
        /// Code shown by the glasses (prompted if omitted)
        code: Option<String>,
        /// Peer id from `scan` (default: strongest signal)
        #[arg(long)]
        peer: Option<String>,
    },

    /// Forget the paired glasses
    Unpair,

    /// Send network credentials to the paired glasses
    Provision { ssid: String, secret: String },

    /// Stay connected and print events until interrupted
    Run,

    /// Show device status
    Status,

    /// Read or change a setting
    Setting {
        /// personality, name, wake_word or voice
        name: String,
        /// New value (JSON for wake_word and voice)
        value: Option<String>,
    },

    /// Take a photo
    Capture,

    /// Take a photo and save it locally
    Snapshot {
        #[arg(short, long, default_value = "snapshot.jpg")]
        out: PathBuf,
    },

    /// Record a video
    Record {
        #[arg(short, long, default_value = "10")]
        seconds: u32,
    },

    /// List stored photos or videos
    Media {
        #[arg(value_enum)]
        kind: MediaArg,
    },

    /// Download a photo or video
    Download {
        #[arg(value_enum)]
        kind: MediaArg,
        id: String,
        /// Output file (default: the id)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Delete a photo or video
    Delete {
        #[arg(value_enum)]
        kind: MediaArg,
        id: String,
    },

    /// Show recent notes, or add one
    Notes { text: Option<String> },

    /// Show recent todos, or add one
    Todos {
        task: Option<String>,
        #[arg(short, long, value_enum, default_value = "medium")]
        priority: PriorityArg,
    },

    /// Show or clear the assistant conversation
    Conversation {
        #[arg(long)]
        clear: bool,
    },

    /// Sleep, wake or restart the glasses
    System {
        #[arg(value_enum)]
        command: SystemArg,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MediaArg {
    Photos,
    Videos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PriorityArg {
    High,
    Medium,
    Low,
}

impl From<PriorityArg> for TodoPriority {
    fn from(p: PriorityArg) -> Self {
        match p {
            PriorityArg::High => Self::High,
            PriorityArg::Medium => Self::Medium,
            PriorityArg::Low => Self::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SystemArg {
    Sleep,
    Wake,
    Restart,
}

impl From<SystemArg> for SystemCommand {
    fn from(c: SystemArg) -> Self {
        match c {
            SystemArg::Sleep => Self::Sleep,
            SystemArg::Wake => Self::Wake,
            SystemArg::Restart => Self::Restart,
        }
    }
}
