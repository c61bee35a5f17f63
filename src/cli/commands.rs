//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - fetch: one request through the resilient executor
//! - should-interact: evaluate the interaction throttle
//! - send-message / approve-plan: throttled session actions
//! - config: print the effective configuration

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// sessionguard - resilient requests and interaction pacing for agent sessions
#[derive(Parser, Debug)]
#[command(name = "sessionguard")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Perform one HTTP request with retries (Ctrl-C cancels it)
    Fetch {
        /// Target URL
        url: String,

        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Request header as 'Name: value' (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Request body
        #[arg(short, long)]
        data: Option<String>,

        /// Max attempts (config default when omitted)
        #[arg(long)]
        retries: Option<u32>,

        /// Request id used for cancellation (generated when omitted)
        #[arg(long)]
        request_id: Option<String>,

        /// Per-attempt timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Decide whether a session may be interacted with now
    ShouldInteract {
        #[command(flatten)]
        session: SessionArgs,

        /// Minimum seconds between interactions (config default when omitted)
        #[arg(long)]
        min_interval: Option<u64>,

        /// Seconds of remote silence before a nudge is allowed (config default when omitted)
        #[arg(long)]
        retry_timeout: Option<u64>,
    },

    /// Send a message to a session, subject to the throttle
    SendMessage {
        /// Session ID
        session_id: String,

        /// Message text
        text: String,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Approve a session's plan, subject to the throttle
    ApprovePlan {
        /// Session ID
        session_id: String,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Print the effective configuration
    Config,
}

/// Cached session state fed to the throttle
#[derive(Args, Debug, Clone, Default)]
pub struct SessionArgs {
    /// Epoch millis of the last local interaction (0 = never)
    #[arg(long, default_value_t = 0)]
    pub last_interaction_at: u64,

    /// Remote last-modified time (ISO-8601)
    #[arg(long)]
    pub update_time: Option<String>,
}

/// Split a `Name: value` header argument
pub fn parse_header(raw: &str) -> Option<(String, String)> {
    let (name, value) = raw.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}
