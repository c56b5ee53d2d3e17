//! CostLedger - append-only, tamper-evident record of completed-run costs
//!
//! Every completed run appends one JSON line to a shared ledger file. Each line
//! carries the hash of the previous line, so editing or deleting any entry after
//! the fact breaks the chain at that entry.
//!
//! # Layout
//!
//! ```text
//! costs.jsonl
//! {"timestamp":"...","run_id":"...","product":"...","level":"...","cost_usd":1.25,"prev_hash":"000...","hash":"9f2..."}
//! {"timestamp":"...","run_id":"...","product":"...","level":"...","cost_usd":0.4,"prev_hash":"9f2...","hash":"c41..."}
//! ```
//!
//! # Example
//!
//! ```ignore
//! use costledger::{CostLedger, CostRecord};
//!
//! let ledger = CostLedger::open(".walker/costs.jsonl")?;
//! ledger.append(CostRecord::new("run-1", "shop", "smoke", 1.25))?;
//! let status = ledger.check_cumulative_budget(20.0, 200.0)?;
//! assert!(ledger.verify_chain()?.is_intact());
//! ```

pub mod budget;
pub mod cli;
pub mod config;
mod error;
mod ledger;
mod record;

pub use budget::{BudgetStatus, check_cumulative_budget};
pub use error::LedgerError;
pub use ledger::{ChainMismatch, ChainVerification, CostLedger};
pub use record::{CostRecord, GENESIS_HASH, chain_hash};

/// Default ledger file name inside a project directory
pub const LEDGER_FILENAME: &str = "costs.jsonl";

/// Decimal places kept for stored costs
pub const COST_DECIMALS: i32 = 6;

/// Round a dollar amount to the stored precision
pub fn round_cost(cost_usd: f64) -> f64 {
    let scale = 10f64.powi(COST_DECIMALS);
    (cost_usd * scale).round() / scale
}
