//! CLI for inspecting and operating the configured cache
//!
//! Every command prints one JSON document on stdout; logs go to stderr.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::Runner;

use crate::infrastructure::cache::CacheType;

/// Resilient cache - operate the configured cache provider
#[derive(Parser)]
#[command(name = "resilient-cache")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Provider to use instead of `cache.type` from configuration
    #[arg(long, global = true)]
    pub provider: Option<CacheType>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Read a key
    Get { key: String },

    /// Store a JSON value (plain text is stored as a string)
    Set {
        key: String,
        value: String,
        /// Time-to-live in seconds
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Remove a key
    Delete { key: String },

    /// Remove every key matching a `*` glob
    Invalidate { pattern: String },

    /// Load entries from a JSON array of `{key, value, ttl?}`
    WarmUp { file: PathBuf },

    /// Print the cache key derived for a service call
    Key {
        service: String,
        method: String,
        /// Parameters as JSON
        #[arg(default_value = "{}")]
        params: String,
    },

    /// Show cache, circuit breaker and error statistics
    Stats,
}
