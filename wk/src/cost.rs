//! Cost Accountant - per-call pricing and the per-run hard cap

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use costledger::round_cost;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{BudgetExceededError, EngineError};
use crate::router::Tier;

pub const DEFAULT_WARN_AT_PCT: u8 = 80;

const TOKENS_PER_PRICE_UNIT: f64 = 1_000_000.0;

/// Token counts reported for one decider call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }
}

/// USD per million tokens for one tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierPrice {
    #[serde(rename = "input-per-mtok")]
    pub input_per_mtok: f64,

    #[serde(rename = "output-per-mtok")]
    pub output_per_mtok: f64,
}

impl TierPrice {
    /// Used for a tier missing from the table
    pub const FALLBACK: TierPrice = TierPrice::new(3.0, 15.0);

    pub const fn new(input_per_mtok: f64, output_per_mtok: f64) -> Self {
        Self {
            input_per_mtok,
            output_per_mtok,
        }
    }

    pub fn cost_of(&self, usage: TokenUsage) -> f64 {
        (usage.input_tokens as f64 / TOKENS_PER_PRICE_UNIT) * self.input_per_mtok
            + (usage.output_tokens as f64 / TOKENS_PER_PRICE_UNIT) * self.output_per_mtok
    }
}

/// Tier to price table
pub type PriceTable = BTreeMap<Tier, TierPrice>;

/// Local runs free; fast, standard and strong follow small/medium/large hosted model list prices
pub fn default_price_table() -> PriceTable {
    debug!("default_price_table: called");
    [
        (Tier::Local, TierPrice::new(0.0, 0.0)),
        (Tier::Fast, TierPrice::new(0.80, 4.00)),
        (Tier::Standard, TierPrice::new(3.00, 15.00)),
        (Tier::Strong, TierPrice::new(15.00, 75.00)),
    ]
    .into_iter()
    .collect()
}

/// Reject negative or non-finite prices
pub fn validate_prices(prices: &PriceTable) -> Result<(), EngineError> {
    for (tier, price) in prices {
        for (side, value) in [("input", price.input_per_mtok), ("output", price.output_per_mtok)] {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::config(format!(
                    "{} price for tier '{}' must be a non-negative number, got {}",
                    side, tier, value
                )));
            }
        }
    }
    Ok(())
}

/// One priced decider call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallRecord {
    pub timestamp: DateTime<Utc>,
    pub tier: Tier,
    pub usage: TokenUsage,
    pub cost_usd: f64,
    pub purpose: String,
}

/// Aggregated cost for a step or run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CostSummary {
    pub total_cost_usd: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub calls_by_tier: BTreeMap<Tier, u32>,
    pub cost_by_tier: BTreeMap<Tier, f64>,
    pub budget_limit_usd: f64,
    pub budget_remaining_usd: f64,
    pub budget_exceeded: bool,
    pub warning_issued: bool,
    pub call_count: u32,
}

impl CostSummary {
    /// Fold another summary into this one; limits are left untouched
    pub fn absorb(&mut self, other: &CostSummary) {
        self.total_cost_usd = round_cost(self.total_cost_usd + other.total_cost_usd);
        self.total_input_tokens += other.total_input_tokens;
        self.total_output_tokens += other.total_output_tokens;
        for (tier, calls) in &other.calls_by_tier {
            *self.calls_by_tier.entry(*tier).or_default() += calls;
        }
        for (tier, cost) in &other.cost_by_tier {
            let entry = self.cost_by_tier.entry(*tier).or_default();
            *entry = round_cost(*entry + cost);
        }
        self.budget_exceeded |= other.budget_exceeded;
        self.warning_issued |= other.warning_issued;
        self.call_count += other.call_count;
    }
}

/// Running cost tally for one step against a USD cap
///
/// A cap of zero or less disables both the cap and the warning.
#[derive(Debug)]
pub struct CostAccountant {
    prices: PriceTable,
    cap_usd: f64,
    warn_at_pct: u8,
    calls: Vec<CallRecord>,
    total_usd: f64,
    warning_issued: bool,
    exceeded: bool,
}

impl CostAccountant {
    pub fn new(prices: PriceTable, cap_usd: f64, warn_at_pct: u8) -> Result<Self, EngineError> {
        debug!(cap_usd, warn_at_pct, "CostAccountant::new: called");
        validate_prices(&prices)?;
        if warn_at_pct > 100 {
            return Err(EngineError::config(format!(
                "warn-at-pct must be between 0 and 100, got {}",
                warn_at_pct
            )));
        }
        Ok(Self {
            prices,
            cap_usd,
            warn_at_pct,
            calls: Vec::new(),
            total_usd: 0.0,
            warning_issued: false,
            exceeded: false,
        })
    }

    pub fn has_cap(&self) -> bool {
        self.cap_usd > 0.0
    }

    pub fn cap_usd(&self) -> f64 {
        self.cap_usd
    }

    pub fn price_for(&self, tier: Tier) -> TierPrice {
        self.prices.get(&tier).copied().unwrap_or_else(|| {
            warn!(%tier, "No price configured for tier, using fallback price");
            TierPrice::FALLBACK
        })
    }

    /// Price one call, add it to the running total, and return its cost
    ///
    /// Never fails: crossing the cap is reported by `check_cap`.
    pub fn record_call(&mut self, tier: Tier, usage: TokenUsage, purpose: &str) -> f64 {
        let cost = round_cost(self.price_for(tier).cost_of(usage));
        self.calls.push(CallRecord {
            timestamp: Utc::now(),
            tier,
            usage,
            cost_usd: cost,
            purpose: purpose.to_string(),
        });
        self.total_usd += cost;
        debug!(%tier, cost, total = self.total_usd, %purpose, "CostAccountant::record_call: called");

        if self.has_cap() {
            if !self.warning_issued && self.total_usd / self.cap_usd * 100.0 >= f64::from(self.warn_at_pct) {
                self.warning_issued = true;
                warn!(
                    "Cost warning: ${:.4} spent, {}% of ${:.2} cap",
                    self.total_usd, self.warn_at_pct, self.cap_usd
                );
            }
            if self.total_usd > self.cap_usd && !self.exceeded {
                self.exceeded = true;
                info!(total = self.total_usd, cap = self.cap_usd, "Run budget exceeded");
            }
        }
        cost
    }

    pub fn total_usd(&self) -> f64 {
        round_cost(self.total_usd)
    }

    pub fn calls(&self) -> &[CallRecord] {
        &self.calls
    }

    pub fn warning_issued(&self) -> bool {
        self.warning_issued
    }

    pub fn is_exceeded(&self) -> bool {
        self.exceeded
    }

    /// Whether spending `additional_usd` more would cross the cap
    pub fn would_exceed(&self, additional_usd: f64) -> bool {
        self.has_cap() && self.total_usd + additional_usd > self.cap_usd
    }

    pub fn check_cap(&self) -> Result<(), BudgetExceededError> {
        if self.would_exceed(0.0) {
            return Err(BudgetExceededError {
                spent_usd: self.total_usd(),
                cap_usd: self.cap_usd,
            });
        }
        Ok(())
    }

    pub fn summary(&self) -> CostSummary {
        let mut summary = CostSummary {
            total_cost_usd: self.total_usd(),
            budget_limit_usd: self.cap_usd,
            budget_remaining_usd: if self.has_cap() {
                round_cost((self.cap_usd - self.total_usd).max(0.0))
            } else {
                0.0
            },
            budget_exceeded: self.exceeded,
            warning_issued: self.warning_issued,
            call_count: self.calls.len() as u32,
            ..Default::default()
        };
        for call in &self.calls {
            summary.total_input_tokens += call.usage.input_tokens;
            summary.total_output_tokens += call.usage.output_tokens;
            *summary.calls_by_tier.entry(call.tier).or_default() += 1;
            let cost = summary.cost_by_tier.entry(call.tier).or_default();
            *cost = round_cost(*cost + call.cost_usd);
        }
        summary
    }
}
