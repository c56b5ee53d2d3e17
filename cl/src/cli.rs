//! CLI argument parsing for costledger

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cl")]
#[command(author, version, about = "Hash-chained cost ledger", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Ledger file (overrides config)
    #[arg(short, long)]
    pub ledger: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Append a completed run's cost
    Append {
        /// Run identifier
        #[arg(required = true)]
        run_id: String,

        /// Cost in USD
        #[arg(required = true)]
        cost_usd: f64,

        /// Product slug
        #[arg(short, long, default_value = "default")]
        product: String,

        /// Test level label
        #[arg(short = 'v', long, default_value = "")]
        level: String,
    },

    /// List all records
    List,

    /// Sum costs in [from, to)
    Sum {
        /// Start timestamp (RFC 3339)
        #[arg(long)]
        from: DateTime<Utc>,

        /// End timestamp (RFC 3339)
        #[arg(long)]
        to: DateTime<Utc>,
    },

    /// Check today's and this month's spend against caps
    Check {
        /// Per-day cap in USD (0 = unlimited)
        #[arg(long)]
        per_day: Option<f64>,

        /// Per-month cap in USD (0 = unlimited)
        #[arg(long)]
        per_month: Option<f64>,
    },

    /// Recompute the hash chain and report the first mismatch
    Verify,
}
