//! Cumulative (per-day / per-month) budget checks over the ledger

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::LedgerError;
use crate::ledger::{CostLedger, sum_records};
use crate::record::CostRecord;
use crate::round_cost;

/// Spend so far against the daily and monthly caps
///
/// A limit of zero (or below) means "no limit" and is always ok.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub daily_spent: f64,
    pub daily_limit: f64,
    pub daily_ok: bool,
    pub monthly_spent: f64,
    pub monthly_limit: f64,
    pub monthly_ok: bool,
}

impl BudgetStatus {
    /// Evaluate records against caps for the UTC day and month containing `now`
    pub fn evaluate(records: &[CostRecord], now: DateTime<Utc>, per_day_usd: f64, per_month_usd: f64) -> Self {
        debug!(count = records.len(), %now, per_day_usd, per_month_usd, "BudgetStatus::evaluate: called");
        let (day_start, day_end) = day_bounds(now);
        let (month_start, month_end) = month_bounds(now);

        let daily_spent = round_cost(sum_records(records, day_start, day_end));
        let monthly_spent = round_cost(sum_records(records, month_start, month_end));

        let status = Self {
            daily_spent,
            daily_limit: per_day_usd,
            daily_ok: within(daily_spent, per_day_usd),
            monthly_spent,
            monthly_limit: per_month_usd,
            monthly_ok: within(monthly_spent, per_month_usd),
        };
        if !status.is_ok() {
            warn!(
                daily_spent,
                per_day_usd, monthly_spent, per_month_usd, "Cumulative budget exhausted"
            );
        }
        status
    }

    /// Both caps have headroom
    pub fn is_ok(&self) -> bool {
        self.daily_ok && self.monthly_ok
    }

    /// Human-readable reason a run would be refused, if any
    pub fn refusal_reason(&self) -> Option<String> {
        match (self.daily_ok, self.monthly_ok) {
            (true, true) => None,
            (false, true) => Some(format!(
                "daily budget exhausted: ${:.2} spent of ${:.2}",
                self.daily_spent, self.daily_limit
            )),
            (true, false) => Some(format!(
                "monthly budget exhausted: ${:.2} spent of ${:.2}",
                self.monthly_spent, self.monthly_limit
            )),
            (false, false) => Some(format!(
                "daily budget exhausted (${:.2} of ${:.2}) and monthly budget exhausted (${:.2} of ${:.2})",
                self.daily_spent, self.daily_limit, self.monthly_spent, self.monthly_limit
            )),
        }
    }
}

/// Budget gate for callers: check the ledger at `ledger_path` as of now
pub fn check_cumulative_budget(
    ledger_path: impl AsRef<Path>,
    per_day_usd: f64,
    per_month_usd: f64,
) -> Result<BudgetStatus, LedgerError> {
    debug!(path = ?ledger_path.as_ref(), "check_cumulative_budget: called");
    CostLedger::open(ledger_path)?.check_cumulative_budget(per_day_usd, per_month_usd)
}

fn within(spent: f64, limit: f64) -> bool {
    limit <= 0.0 || spent < limit
}

fn day_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let day = now.date_naive();
    let next = day.checked_add_days(Days::new(1)).unwrap_or(day);
    (midnight(day), midnight(next))
}

fn month_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let first = NaiveDate::from_ymd_opt(now.year(), now.month(), 1).unwrap_or_else(|| now.date_naive());
    let next = if now.month() == 12 {
        NaiveDate::from_ymd_opt(now.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(now.year(), now.month() + 1, 1)
    }
    .unwrap_or(first);
    (midnight(first), midnight(next))
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc()
}
