//! JourneyRunner - runs a journey's steps and records the run's cost
//!
//! Before the first step every step's overrides are validated and the
//! cumulative ledger budget is checked. Steps run one after another, each
//! capped at whatever is left of the per-run budget.
//! Only a run that gets to the end (all steps attempted, or stopped by the
//! run budget) is appended to the ledger; an infrastructure error leaves the
//! ledger untouched.

use std::path::PathBuf;
use std::sync::Arc;

use costledger::{CostLedger, CostRecord, check_cumulative_budget, round_cost};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capability::{ActionExecutor, Decider, Perceiver};
use crate::config::{BudgetConfig, Config, LedgerConfig};
use crate::cost::CostSummary;
use crate::domain::{StepResult, StepSpec, TerminalReason};
use crate::error::EngineError;
use crate::events::EventBus;
use crate::step::StepRunner;

/// An ordered list of steps executed in one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Journey {
    pub id: String,

    /// Fixed run id; a UUID v7 is generated when absent
    #[serde(default, rename = "run-id")]
    pub run_id: Option<String>,

    /// Overrides the ledger product label
    #[serde(default)]
    pub product: Option<String>,

    /// Overrides the ledger level label
    #[serde(default)]
    pub level: Option<String>,

    pub steps: Vec<StepSpec>,
}

impl Journey {
    pub fn new(id: impl Into<String>, steps: Vec<StepSpec>) -> Self {
        Self {
            id: id.into(),
            run_id: None,
            product: None,
            level: None,
            steps,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct JourneyResult {
    pub journey_id: String,
    pub run_id: String,
    pub passed: bool,
    pub steps: Vec<StepResult>,
    /// Steps never started because the run budget ran out
    pub skipped_steps: Vec<String>,
    pub budget_exceeded: bool,
    pub total_cost_usd: f64,
    pub cost_summary: CostSummary,
    pub ledger_record: CostRecord,
}

pub struct JourneyRunner {
    runner: StepRunner,
    budget: BudgetConfig,
    ledger: LedgerConfig,
    events: Option<Arc<EventBus>>,
}

impl JourneyRunner {
    pub fn new(runner: StepRunner, budget: BudgetConfig, ledger: LedgerConfig) -> Self {
        Self {
            runner,
            budget,
            ledger,
            events: None,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        debug!("JourneyRunner::from_config: called");
        Ok(Self::new(
            StepRunner::from_config(config)?,
            config.budget.clone(),
            config.ledger.clone(),
        ))
    }

    pub fn with_ledger_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ledger.path = path.into();
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Run every step of `journey` and append the run's cost to the ledger
    pub async fn run(
        &self,
        journey: &Journey,
        perceiver: &dyn Perceiver,
        decider: &dyn Decider,
        executor: &dyn ActionExecutor,
    ) -> Result<JourneyResult, EngineError> {
        debug!(journey_id = %journey.id, steps = journey.steps.len(), "JourneyRunner::run: called");

        for step in &journey.steps {
            self.runner.validate_spec(step)?;
        }

        let status = check_cumulative_budget(&self.ledger.path, self.budget.per_day_usd, self.budget.per_month_usd)?;
        if let Some(reason) = status.refusal_reason() {
            warn!(journey_id = %journey.id, %reason, "Refusing to start run");
            return Err(EngineError::CumulativeBudgetExceeded { reason, status });
        }

        let run_id = journey
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        info!(journey_id = %journey.id, %run_id, "Starting run");

        let runner = match &self.events {
            Some(bus) => self.runner.clone().with_events(bus.emitter_for(run_id.as_str())),
            None => self.runner.clone(),
        };

        let per_run = self.budget.per_run_usd;
        let mut spent = 0.0;
        let mut cost_summary = CostSummary {
            budget_limit_usd: per_run,
            ..Default::default()
        };
        let mut steps: Vec<StepResult> = Vec::new();
        let mut budget_exceeded = false;

        for step in &journey.steps {
            let ceiling = if per_run > 0.0 {
                let remaining = per_run - spent;
                if remaining <= 0.0 {
                    budget_exceeded = true;
                    break;
                }
                remaining
            } else {
                0.0
            };

            let result = runner
                .execute_step(step, perceiver, decider, executor, ceiling)
                .await?;
            spent += result.cost_usd;
            cost_summary.absorb(&result.cost_summary);
            let stop = result.terminal_reason == TerminalReason::BudgetExceeded;
            steps.push(result);
            if stop {
                warn!(%run_id, step_id = %step.id, "Run budget exhausted, stopping journey");
                budget_exceeded = true;
                break;
            }
        }

        let skipped_steps: Vec<String> = journey.steps[steps.len()..].iter().map(|s| s.id.clone()).collect();
        let total_cost_usd = round_cost(spent);
        cost_summary.total_cost_usd = total_cost_usd;
        cost_summary.budget_exceeded = budget_exceeded;
        if per_run > 0.0 {
            cost_summary.budget_remaining_usd = round_cost((per_run - spent).max(0.0));
        }

        let product = journey.product.clone().unwrap_or_else(|| self.ledger.product.clone());
        let level = journey.level.clone().unwrap_or_else(|| self.ledger.level.clone());
        let ledger = CostLedger::open(&self.ledger.path)?;
        let ledger_record = ledger.append(CostRecord::new(run_id.as_str(), product, level, total_cost_usd))?;

        let passed = !budget_exceeded && skipped_steps.is_empty() && steps.iter().all(|s| s.passed);
        info!(%run_id, passed, total_cost_usd, "Run finished");

        Ok(JourneyResult {
            journey_id: journey.id.clone(),
            run_id,
            passed,
            steps,
            skipped_steps,
            budget_exceeded,
            total_cost_usd,
            cost_summary,
            ledger_record,
        })
    }
}
