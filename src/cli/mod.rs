//! CLI module for sessionguard - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for one-off requests,
//! throttle checks and throttled session actions.

pub mod commands;

pub use commands::Cli;
