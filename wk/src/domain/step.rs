//! Step definition and step result types

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::decision::{ActionKind, Decision};
use super::perception::Capture;
use crate::cost::CostSummary;

/// Per-step overrides of the stuck thresholds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StuckOverrides {
    #[serde(rename = "warn-threshold")]
    pub warn_threshold: Option<u32>,

    #[serde(rename = "abort-threshold")]
    pub abort_threshold: Option<u32>,

    #[serde(rename = "action-repeat-threshold")]
    pub action_repeat_threshold: Option<u32>,
}

/// Machine-checkable condition for a checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointCondition {
    TextPresent(String),
    UrlContains(String),
    ElementVisible(String),
}

impl CheckpointCondition {
    pub fn is_met_by(&self, capture: &Capture) -> bool {
        match self {
            CheckpointCondition::TextPresent(text) => capture
                .visible_text
                .as_deref()
                .is_some_and(|visible| visible.contains(text.as_str())),
            CheckpointCondition::UrlContains(fragment) => {
                capture.url.as_deref().is_some_and(|url| url.contains(fragment.as_str()))
            }
            CheckpointCondition::ElementVisible(label) => capture.elements.iter().any(|e| e == label),
        }
    }
}

/// A verification point inside a step
///
/// Without a condition the checkpoint is a named milestone that only the
/// decider can report, through `Decision::checkpoint`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub name: String,
    #[serde(default)]
    pub condition: Option<CheckpointCondition>,
}

impl Checkpoint {
    pub fn milestone(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            condition: None,
        }
    }

    pub fn with_condition(name: impl Into<String>, condition: CheckpointCondition) -> Self {
        Self {
            name: name.into(),
            condition: Some(condition),
        }
    }
}

/// One goal-directed unit of work
///
/// Limits left unset fall back to the runner's configured defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub id: String,
    pub goal: String,

    #[serde(default, rename = "max-actions")]
    pub max_actions: Option<u32>,

    #[serde(default, rename = "max-duration-seconds")]
    pub max_duration_seconds: Option<u64>,

    #[serde(default)]
    pub stuck: StuckOverrides,

    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,

    /// Conditions a second, forced-API decision must confirm before a
    /// success claim is accepted
    #[serde(default, rename = "success-criteria")]
    pub success_criteria: Vec<String>,
}

impl StepSpec {
    pub fn new(id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
            max_actions: None,
            max_duration_seconds: None,
            stuck: StuckOverrides::default(),
            checkpoints: Vec::new(),
            success_criteria: Vec::new(),
        }
    }

    pub fn with_max_actions(mut self, max_actions: u32) -> Self {
        self.max_actions = Some(max_actions);
        self
    }

    pub fn with_max_duration_seconds(mut self, seconds: u64) -> Self {
        self.max_duration_seconds = Some(seconds);
        self
    }

    pub fn with_stuck(mut self, stuck: StuckOverrides) -> Self {
        self.stuck = stuck;
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoints.push(checkpoint);
        self
    }

    pub fn with_success_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.success_criteria.push(criterion.into());
        self
    }
}

/// Outcome of executing a single action
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    pub success: bool,
    pub duration: Duration,
    pub error: Option<String>,
    pub ux_observation: Option<String>,
}

impl ActionResult {
    pub fn ok(duration: Duration) -> Self {
        Self {
            success: true,
            duration,
            error: None,
            ux_observation: None,
        }
    }

    pub fn failed(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            duration,
            error: Some(error.into()),
            ux_observation: None,
        }
    }

    pub fn with_ux_observation(mut self, observation: impl Into<String>) -> Self {
        self.ux_observation = Some(observation.into());
        self
    }
}

/// An executed action as kept in the step result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub number: u32,
    pub action: ActionKind,
    pub target: String,
    pub value: String,
    pub reasoning: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ActionRecord {
    pub fn new(number: u32, decision: &Decision, result: &ActionResult) -> Self {
        Self {
            number,
            action: decision.action,
            target: decision.target.clone(),
            value: decision.value.clone(),
            reasoning: decision.reasoning.clone(),
            success: result.success,
            error: result.error.clone(),
            duration_ms: result.duration.as_millis() as u64,
        }
    }
}

/// Why a step stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminalReason {
    GoalAchieved,
    StuckAborted,
    MaxActions,
    Timeout,
    BudgetExceeded,
}

impl TerminalReason {
    pub fn is_failure(self) -> bool {
        self != TerminalReason::GoalAchieved
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminalReason::GoalAchieved => "goal-achieved",
            TerminalReason::StuckAborted => "stuck-aborted",
            TerminalReason::MaxActions => "max-actions",
            TerminalReason::Timeout => "timeout",
            TerminalReason::BudgetExceeded => "budget-exceeded",
        };
        write!(f, "{}", s)
    }
}

/// Terminal result of one step
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step_id: String,
    pub passed: bool,
    pub terminal_reason: TerminalReason,
    pub description: String,
    /// True only when the decider claimed success and every checkpoint was met
    pub goal_achieved: bool,
    pub action_count: u32,
    pub duration_ms: u64,
    pub cost_usd: f64,
    pub cost_summary: CostSummary,
    pub ux_observations: Vec<String>,
    /// Failure observations, one per failed action
    pub observations: Vec<String>,
    pub actions: Vec<ActionRecord>,
    pub checkpoints_reached: Vec<String>,
    pub unmet_checkpoints: Vec<String>,
    pub escalated: bool,
    /// Success claims rejected by success-criteria verification
    pub verification_failures: u32,
    pub final_decision: Option<Decision>,
}

impl StepResult {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_spec_yaml_defaults() {
        let yaml = r#"
id: checkout
goal: Buy the cheapest item
checkpoints:
  - name: cart
    condition:
      url_contains: /cart
  - name: paid
"#;
        let spec: StepSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.id, "checkout");
        assert!(spec.max_actions.is_none());
        assert_eq!(spec.stuck, StuckOverrides::default());
        assert_eq!(spec.checkpoints.len(), 2);
        assert_eq!(
            spec.checkpoints[0].condition,
            Some(CheckpointCondition::UrlContains("/cart".to_string()))
        );
        assert!(spec.checkpoints[1].condition.is_none());
        assert!(spec.success_criteria.is_empty());
    }

    #[test]
    fn test_step_spec_overrides() {
        let yaml = r#"
id: s1
goal: g
max-actions: 12
max-duration-seconds: 60
stuck:
  warn-threshold: 2
  abort-threshold: 4
success-criteria:
  - Order confirmation number is shown
"#;
        let spec: StepSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.max_actions, Some(12));
        assert_eq!(spec.max_duration_seconds, Some(60));
        assert_eq!(spec.stuck.warn_threshold, Some(2));
        assert_eq!(spec.stuck.abort_threshold, Some(4));
        assert_eq!(spec.stuck.action_repeat_threshold, None);
        assert_eq!(spec.success_criteria, vec!["Order confirmation number is shown".to_string()]);
    }

    #[test]
    fn test_conditions() {
        let capture = Capture::new("img")
            .with_url("https://shop.test/order/42")
            .with_visible_text("Thank you! Order confirmed")
            .with_elements(["Continue shopping", "Print receipt"]);

        assert!(CheckpointCondition::TextPresent("Order confirmed".into()).is_met_by(&capture));
        assert!(CheckpointCondition::UrlContains("/order/".into()).is_met_by(&capture));
        assert!(CheckpointCondition::ElementVisible("Print receipt".into()).is_met_by(&capture));
        assert!(!CheckpointCondition::ElementVisible("Print".into()).is_met_by(&capture));
        assert!(!CheckpointCondition::TextPresent("Payment failed".into()).is_met_by(&Capture::new("img")));
    }

    #[test]
    fn test_terminal_reason_display() {
        assert_eq!(TerminalReason::StuckAborted.to_string(), "stuck-aborted");
        assert!(!TerminalReason::GoalAchieved.is_failure());
        assert!(TerminalReason::BudgetExceeded.is_failure());
    }
}
