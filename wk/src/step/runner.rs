//! StepRunner - the perceive/decide/act loop for one step

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::checkpoint::CheckpointTracker;
use crate::capability::{ActionExecutor, DecideRequest, DecideResponse, Decider, Perceiver};
use crate::compactor::{ConversationCompactor, DecisionContext};
use crate::config::{Config, StepConfig};
use crate::cost::{CostAccountant, DEFAULT_WARN_AT_PCT, PriceTable, default_price_table};
use crate::domain::{
    ActionKind, ActionRecord, ActionResult, Decision, PerceptionRecord, StepResult, StepSpec, TerminalReason,
};
use crate::error::EngineError;
use crate::events::EventEmitter;
use crate::router::{ActionCategory, ModelRouter};
use crate::stuck::{StuckDetector, StuckSignal};

/// Runs single steps against caller-supplied capabilities
///
/// A runner holds only configuration. All per-step state (stuck counters,
/// running cost, decision context) lives inside one `execute_step` call.
#[derive(Clone)]
pub struct StepRunner {
    router: ModelRouter,
    prices: PriceTable,
    step: StepConfig,
    warn_at_pct: u8,
    events: Option<EventEmitter>,
}

impl Default for StepRunner {
    fn default() -> Self {
        Self::new(ModelRouter::default(), default_price_table())
    }
}

impl StepRunner {
    pub fn new(router: ModelRouter, prices: PriceTable) -> Self {
        Self {
            router,
            prices,
            step: StepConfig::default(),
            warn_at_pct: DEFAULT_WARN_AT_PCT,
            events: None,
        }
    }

    /// Build a runner from validated configuration
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        debug!("StepRunner::from_config: called");
        config.validate()?;
        Ok(Self {
            router: ModelRouter::new(config.routing.table.clone()),
            prices: config.pricing.prices.clone(),
            step: config.step.clone(),
            warn_at_pct: config.budget.warn_at_pct,
            events: None,
        })
    }

    pub fn with_step_config(mut self, step: StepConfig) -> Self {
        self.step = step;
        self
    }

    pub fn with_warn_at_pct(mut self, warn_at_pct: u8) -> Self {
        self.warn_at_pct = warn_at_pct;
        self
    }

    pub fn with_events(mut self, emitter: EventEmitter) -> Self {
        self.events = Some(emitter);
        self
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    fn category_for(&self, iteration: u32, previous: Option<ActionKind>, checkpoints: &CheckpointTracker) -> ActionCategory {
        if iteration == 1 {
            return ActionCategory::InitialAssessment;
        }
        let verify_every = self.step.verify_every;
        if verify_every > 0 && iteration % verify_every == 0 && checkpoints.has_unmet() {
            return ActionCategory::CheckpointVerification;
        }
        previous.map(ActionCategory::from).unwrap_or(ActionCategory::InitialAssessment)
    }

    /// Reject per-step overrides that cannot run
    ///
    /// Checks the stuck thresholds after merging `spec`'s overrides and the
    /// step's own action and duration limits.
    pub fn validate_spec(&self, spec: &StepSpec) -> Result<(), EngineError> {
        debug!(step_id = %spec.id, "StepRunner::validate_spec: called");
        self.step
            .stuck
            .with_overrides(&spec.stuck)
            .validate()
            .map_err(|e| match e {
                EngineError::Configuration(msg) => EngineError::config(format!("step '{}': {}", spec.id, msg)),
                other => other,
            })?;
        if spec.max_actions == Some(0) {
            return Err(EngineError::config(format!(
                "step '{}': max-actions must be at least 1",
                spec.id
            )));
        }
        if spec.max_duration_seconds == Some(0) {
            return Err(EngineError::config(format!(
                "step '{}': max-duration-seconds must be at least 1",
                spec.id
            )));
        }
        Ok(())
    }

    /// Charge one decider call, announcing the budget warning the first time it trips
    fn charge(&self, accountant: &mut CostAccountant, step_id: &str, response: &DecideResponse, purpose: &str) {
        let warned_before = accountant.warning_issued();
        accountant.record_call(response.served_by, response.usage, purpose);
        if !warned_before
            && accountant.warning_issued()
            && let Some(events) = &self.events
        {
            events.budget_warning(step_id, accountant.total_usd(), accountant.cap_usd());
        }
    }

    /// Ask a forced-API decider whether the success criteria hold on `perception`
    ///
    /// Returns `None` when every criterion is confirmed, otherwise the reason
    /// given for rejecting the claim.
    async fn verify_success(
        &self,
        spec: &StepSpec,
        perception: &PerceptionRecord,
        decider: &dyn Decider,
        accountant: &mut CostAccountant,
        escalation_level: u8,
        action_number: u32,
    ) -> Result<Option<String>, EngineError> {
        let category = ActionCategory::CheckpointVerification;
        let tier = self.router.route(category, escalation_level);
        info!(step_id = %spec.id, criteria = spec.success_criteria.len(), %tier, "Verifying success criteria");

        let request = DecideRequest {
            goal: verification_goal(&spec.success_criteria),
            perception: perception.clone(),
            ui_context: None,
            stuck_context: None,
            context: Vec::new(),
            force_api: true,
            tier,
            category,
            action_number,
        };
        let response = decider.decide(request).await?;
        self.charge(accountant, &spec.id, &response, category.as_str());

        let verdict = response.decision;
        if verdict.goal_achieved {
            return Ok(None);
        }
        let reason = [verdict.reasoning, verdict.observation]
            .into_iter()
            .find(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "Criteria not confirmed".to_string());
        Ok(Some(reason))
    }

    /// Drive one step to a terminal result
    ///
    /// `budget_ceiling_usd` caps what this step may spend (zero or less means
    /// no cap). Perception and decider transport failures are returned as
    /// errors; everything else ends in a `StepResult`.
    pub async fn execute_step(
        &self,
        spec: &StepSpec,
        perceiver: &dyn Perceiver,
        decider: &dyn Decider,
        executor: &dyn ActionExecutor,
        budget_ceiling_usd: f64,
    ) -> Result<StepResult, EngineError> {
        debug!(step_id = %spec.id, budget_ceiling_usd, "execute_step: called");

        self.validate_spec(spec)?;
        let thresholds = self.step.stuck.with_overrides(&spec.stuck);
        let mut detector = StuckDetector::new(thresholds)?;
        let mut accountant = CostAccountant::new(self.prices.clone(), budget_ceiling_usd, self.warn_at_pct)?;
        let compactor = ConversationCompactor::new(self.step.keep_recent);
        let mut checkpoints = CheckpointTracker::new(&spec.checkpoints);
        let mut context = DecisionContext::new();

        let max_actions = spec.max_actions.unwrap_or(self.step.max_actions);
        let max_duration = Duration::from_secs(spec.max_duration_seconds.unwrap_or(self.step.max_duration_seconds));

        info!(step_id = %spec.id, goal = %spec.goal, max_actions, "Starting step");
        if let Some(events) = &self.events {
            events.step_started(&spec.id, &spec.goal);
        }

        let start = Instant::now();
        let mut iteration: u32 = 0;
        let mut action_count: u32 = 0;
        let mut force_api = false;
        let mut previous_action: Option<ActionKind> = None;
        let mut final_decision: Option<Decision> = None;
        let mut ux_observations: Vec<String> = Vec::new();
        let mut observations: Vec<String> = Vec::new();
        let mut actions: Vec<ActionRecord> = Vec::new();
        let mut goal = spec.goal.clone();
        let mut verification_failures: u32 = 0;
        let mut verification_failed = false;

        let (terminal_reason, description) = loop {
            if start.elapsed() >= max_duration {
                break (
                    TerminalReason::Timeout,
                    format!(
                        "Step timed out after {}s ({} actions taken)",
                        max_duration.as_secs(),
                        action_count
                    ),
                );
            }
            if action_count >= max_actions {
                break (
                    TerminalReason::MaxActions,
                    format!("Reached max actions ({}) without achieving goal", max_actions),
                );
            }
            if let Err(e) = accountant.check_cap() {
                break (TerminalReason::BudgetExceeded, e.to_string());
            }

            iteration += 1;
            let action_number = action_count + 1;

            let perception = perceiver.perceive().await?;
            for name in checkpoints.observe_capture(&perception.capture) {
                if let Some(events) = &self.events {
                    events.checkpoint_reached(&spec.id, &name);
                }
            }
            context.push_capture(action_number, perception.capture.clone());
            compactor.compact(&mut context);

            let category = self.category_for(iteration, previous_action, &checkpoints);
            let tier = self.router.route(category, detector.escalation_level());
            let request = DecideRequest {
                goal: goal.clone(),
                perception: perception.clone(),
                ui_context: perception.ui_context().map(str::to_string),
                stuck_context: detector.stuck_context(),
                context: context.entries().to_vec(),
                force_api,
                tier,
                category,
                action_number,
            };
            debug!(iteration, %category, %tier, force_api, "execute_step: deciding");

            let response = decider.decide(request).await?;
            if response.fell_back && !force_api {
                info!(step_id = %spec.id, action_number, "Local decider failed, forcing API for the rest of the step");
                force_api = true;
            }

            self.charge(&mut accountant, &spec.id, &response, category.as_str());

            let decision = response.decision;
            context.annotate_last(&decision.observation);
            if let Some(notes) = decision.ux_notes.as_ref().filter(|n| !n.trim().is_empty()) {
                ux_observations.push(notes.clone());
            }
            if let Some(name) = checkpoints.observe_decision(&decision)
                && let Some(events) = &self.events
            {
                events.checkpoint_reached(&spec.id, &name);
            }

            let signal = detector.observe(&perception.fingerprint, &decision);
            if signal == StuckSignal::Abort {
                let description = format!(
                    "App stuck: no state change for {} consecutive observations",
                    detector.state().same_fingerprint_count
                );
                final_decision = Some(decision);
                break (TerminalReason::StuckAborted, description);
            }

            if decision.claims_success() {
                if !spec.success_criteria.is_empty()
                    && let Some(reason) = self
                        .verify_success(
                            spec,
                            &perception,
                            decider,
                            &mut accountant,
                            detector.escalation_level(),
                            action_number,
                        )
                        .await?
                {
                    verification_failures += 1;
                    let max_failures = self.step.max_verification_failures;
                    info!(
                        step_id = %spec.id,
                        verification_failures,
                        max_failures,
                        %reason,
                        "Success claim rejected by verification"
                    );
                    observations.push(format!(
                        "Verification failed ({}/{}): {}",
                        verification_failures, max_failures, reason
                    ));
                    previous_action = Some(decision.action);
                    final_decision = Some(decision);
                    if verification_failures >= max_failures {
                        warn!(step_id = %spec.id, verification_failures, "Max verification failures reached");
                        verification_failed = true;
                        break (
                            TerminalReason::GoalAchieved,
                            format!("Verification failed {} times: {}", verification_failures, reason),
                        );
                    }
                    goal = format!(
                        "{}\n\nPREVIOUS VERIFICATION FAILED: the goal was reported achieved but verification \
                         found: {}. Address the unconfirmed criteria before signalling done.",
                        spec.goal, reason
                    );
                    if signal == StuckSignal::Escalate {
                        force_api = true;
                    }
                    continue;
                }
                let description = format!("Goal achieved: {}", decision.observation);
                final_decision = Some(decision);
                break (TerminalReason::GoalAchieved, description);
            }
            if decision.action == ActionKind::Stuck {
                let detail = if decision.reasoning.is_empty() {
                    &decision.observation
                } else {
                    &decision.reasoning
                };
                let description = format!("Agent reported stuck: {}", detail);
                final_decision = Some(decision);
                break (TerminalReason::StuckAborted, description);
            }

            match signal {
                StuckSignal::Escalate => {
                    force_api = true;
                    let escalated_tier = self.router.route(category, detector.escalation_level());
                    warn!(
                        step_id = %spec.id,
                        action_number,
                        tier = %escalated_tier,
                        "No progress detected, escalating and skipping repeated action"
                    );
                    if let Some(events) = &self.events {
                        events.escalated(&spec.id, action_number, escalated_tier);
                    }
                    previous_action = Some(decision.action);
                    final_decision = Some(decision);
                    continue;
                }
                StuckSignal::Warn => {
                    let state = detector.state();
                    debug!(
                        same_fingerprint_count = state.same_fingerprint_count,
                        same_action_count = state.same_action_count,
                        "execute_step: still no progress after escalation"
                    );
                    if let Some(events) = &self.events {
                        events.stuck_warning(
                            &spec.id,
                            action_number,
                            state.same_fingerprint_count,
                            state.same_action_count,
                        );
                    }
                }
                StuckSignal::Normal | StuckSignal::Abort => {}
            }

            action_count += 1;
            let result = match executor.execute(&decision).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(step_id = %spec.id, action_number, error = %e, "Action execution failed");
                    ActionResult::failed(e.message, Duration::ZERO)
                }
            };
            if !result.success {
                observations.push(format!(
                    "Action {} ({} '{}') failed: {}",
                    action_count,
                    decision.action,
                    decision.target,
                    result.error.as_deref().unwrap_or("unknown error")
                ));
            }
            if let Some(ux) = &result.ux_observation {
                ux_observations.push(ux.clone());
            }

            let record = ActionRecord::new(action_count, &decision, &result);
            if let Some(events) = &self.events {
                events.action_executed(
                    &spec.id,
                    action_count,
                    record.action,
                    &record.target,
                    record.success,
                    record.duration_ms,
                );
            }
            actions.push(record);
            previous_action = Some(decision.action);
            final_decision = Some(decision);

            if let Err(e) = accountant.check_cap() {
                break (TerminalReason::BudgetExceeded, e.to_string());
            }
        };

        let unmet_checkpoints = checkpoints.unmet();
        let goal_achieved =
            terminal_reason == TerminalReason::GoalAchieved && !verification_failed && unmet_checkpoints.is_empty();
        let description = if terminal_reason == TerminalReason::GoalAchieved && !verification_failed && !goal_achieved {
            format!(
                "Goal reported achieved but checkpoints not reached: {}",
                unmet_checkpoints.join(", ")
            )
        } else {
            description
        };

        let cost_summary = accountant.summary();
        let result = StepResult {
            step_id: spec.id.clone(),
            passed: goal_achieved,
            terminal_reason,
            description,
            goal_achieved,
            action_count,
            duration_ms: start.elapsed().as_millis() as u64,
            cost_usd: cost_summary.total_cost_usd,
            cost_summary,
            ux_observations,
            observations,
            actions,
            checkpoints_reached: checkpoints.reached().to_vec(),
            unmet_checkpoints,
            escalated: detector.state().escalated,
            verification_failures,
            final_decision,
        };

        info!(
            step_id = %result.step_id,
            passed = result.passed,
            reason = %result.terminal_reason,
            actions = result.action_count,
            cost_usd = result.cost_usd,
            "Step finished: {}",
            result.description
        );
        if let Some(events) = &self.events {
            events.step_finished(
                &result.step_id,
                result.passed,
                result.terminal_reason,
                result.action_count,
                result.cost_usd,
            );
        }
        Ok(result)
    }
}

/// Goal text for the verification call, one criterion per line
fn verification_goal(criteria: &[String]) -> String {
    let list: Vec<String> = criteria.iter().map(|c| format!("- {}", c)).collect();
    format!(
        "VERIFICATION: the goal was just reported achieved. Check EACH of these success criteria \
         against the current capture:\n{}\n\nState for each whether it is CONFIRMED or NOT CONFIRMED. \
         Set goal_achieved to true ONLY if all criteria are confirmed.",
        list.join("\n")
    )
}
