//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// walker - perceive/decide/act step engine
#[derive(Parser)]
#[command(
    name = "wk",
    about = "Step engine for autonomous application walks: routing, stuck detection and cost budgets",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Ledger file (overrides config)
    #[arg(long, global = true)]
    pub ledger: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check cumulative spend against the daily and monthly caps
    Budget {
        /// Per-day cap in USD (overrides config, 0 = unlimited)
        #[arg(long)]
        per_day: Option<f64>,

        /// Per-month cap in USD (overrides config, 0 = unlimited)
        #[arg(long)]
        per_month: Option<f64>,
    },

    /// Show which tier a decision category routes to
    Route {
        /// Action category (e.g. click, form_fill, initial_assessment)
        category: String,

        /// Route as if the step had escalated
        #[arg(short, long)]
        escalated: bool,
    },

    /// Print the effective configuration
    Config {
        /// Only validate, print nothing on success
        #[arg(long)]
        check: bool,
    },

    /// Inspect or append to the cost ledger
    Ledger {
        #[command(subcommand)]
        command: LedgerCommand,
    },
}

/// Ledger subcommands
#[derive(Debug, Subcommand)]
pub enum LedgerCommand {
    /// Verify the hash chain
    Verify,

    /// List recorded runs
    List,

    /// Record a completed run's cost
    Record {
        /// Run identifier
        run_id: String,

        /// Cost in USD
        cost_usd: f64,

        /// Product label (overrides config)
        #[arg(short, long)]
        product: Option<String>,

        /// Level label (overrides config)
        #[arg(short = 'v', long)]
        level: Option<String>,
    },
}
