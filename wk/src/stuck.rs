//! Stuck Detector - notices when a step stops making progress
//!
//! Two run-length counters are kept per step: how many consecutive
//! perceptions shared a fingerprint, and how many consecutive decisions
//! proposed the same `(action, target, value)`. Both counts include the
//! current observation, so a fresh value always starts a run of 1.
//!
//! Escalation happens at most once per step. After that the detector keeps
//! reporting `Warn` while the repetition persists, and only the fingerprint
//! run can abort the step.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{ActionKind, Decision, StuckOverrides};
use crate::error::EngineError;

pub const DEFAULT_WARN_THRESHOLD: u32 = 5;
pub const DEFAULT_ABORT_THRESHOLD: u32 = 10;
pub const DEFAULT_ACTION_REPEAT_THRESHOLD: u32 = 3;

/// Thresholds for stuck classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StuckThresholds {
    #[serde(rename = "warn-threshold")]
    pub warn_threshold: u32,

    #[serde(rename = "abort-threshold")]
    pub abort_threshold: u32,

    #[serde(rename = "action-repeat-threshold")]
    pub action_repeat_threshold: u32,
}

impl Default for StuckThresholds {
    fn default() -> Self {
        Self {
            warn_threshold: DEFAULT_WARN_THRESHOLD,
            abort_threshold: DEFAULT_ABORT_THRESHOLD,
            action_repeat_threshold: DEFAULT_ACTION_REPEAT_THRESHOLD,
        }
    }
}

impl StuckThresholds {
    /// Apply a step's overrides on top of these thresholds
    pub fn with_overrides(&self, overrides: &StuckOverrides) -> Self {
        Self {
            warn_threshold: overrides.warn_threshold.unwrap_or(self.warn_threshold),
            abort_threshold: overrides.abort_threshold.unwrap_or(self.abort_threshold),
            action_repeat_threshold: overrides
                .action_repeat_threshold
                .unwrap_or(self.action_repeat_threshold),
        }
    }

    /// Every threshold must be at least 1
    ///
    /// `warn_threshold` may exceed `abort_threshold`; in that case the
    /// fingerprint run aborts before it ever escalates.
    pub fn validate(&self) -> Result<(), EngineError> {
        debug!(?self, "StuckThresholds::validate: called");
        for (name, value) in [
            ("warn-threshold", self.warn_threshold),
            ("abort-threshold", self.abort_threshold),
            ("action-repeat-threshold", self.action_repeat_threshold),
        ] {
            if value < 1 {
                return Err(EngineError::config(format!("{} must be at least 1, got {}", name, value)));
            }
        }
        Ok(())
    }
}

/// Classification after the latest observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckStatus {
    Normal,
    Warn,
    Escalated,
    Aborted,
}

/// What the runner should do about the latest observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckSignal {
    /// Carry on
    Normal,
    /// Repetition persists after escalation; stuck context stays injected
    Warn,
    /// First detection in this step: raise the tier, skip this action
    Escalate,
    /// Give up on the step
    Abort,
}

/// Step-local counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StuckState {
    pub same_fingerprint_count: u32,
    pub same_action_count: u32,
    pub escalated: bool,
}

/// Per-step stuck detector
#[derive(Debug)]
pub struct StuckDetector {
    thresholds: StuckThresholds,
    state: StuckState,
    status: StuckStatus,
    last_fingerprint: Option<String>,
    last_action: Option<(ActionKind, String, String)>,
}

impl StuckDetector {
    /// Create a detector, rejecting thresholds below 1
    pub fn new(thresholds: StuckThresholds) -> Result<Self, EngineError> {
        thresholds.validate()?;
        Ok(Self {
            thresholds,
            state: StuckState::default(),
            status: StuckStatus::Normal,
            last_fingerprint: None,
            last_action: None,
        })
    }

    pub fn thresholds(&self) -> &StuckThresholds {
        &self.thresholds
    }

    pub fn state(&self) -> &StuckState {
        &self.state
    }

    pub fn status(&self) -> StuckStatus {
        self.status
    }

    /// 1 once the step has escalated, 0 before
    pub fn escalation_level(&self) -> u8 {
        u8::from(self.state.escalated)
    }

    /// Record one perception fingerprint and the decision made on it
    pub fn observe(&mut self, fingerprint: &str, decision: &Decision) -> StuckSignal {
        if self.last_fingerprint.as_deref() == Some(fingerprint) {
            self.state.same_fingerprint_count += 1;
        } else {
            self.state.same_fingerprint_count = 1;
            self.last_fingerprint = Some(fingerprint.to_string());
        }

        let (action, target, value) = decision.action_key();
        let same_action = self
            .last_action
            .as_ref()
            .is_some_and(|(a, t, v)| *a == action && t == target && v == value);
        if same_action {
            self.state.same_action_count += 1;
        } else {
            self.state.same_action_count = 1;
            self.last_action = Some((action, target.to_string(), value.to_string()));
        }

        let f = self.state.same_fingerprint_count;
        let a = self.state.same_action_count;
        debug!(f, a, escalated = self.state.escalated, "StuckDetector::observe: called");

        if f >= self.thresholds.abort_threshold {
            warn!(f, "App stuck: no state change for {} consecutive observations", f);
            self.status = StuckStatus::Aborted;
            StuckSignal::Abort
        } else if self.repetition_detected() {
            if self.state.escalated {
                self.status = StuckStatus::Warn;
                StuckSignal::Warn
            } else {
                info!(f, a, "Lack of progress detected, escalating");
                self.state.escalated = true;
                self.status = StuckStatus::Escalated;
                StuckSignal::Escalate
            }
        } else {
            self.status = StuckStatus::Normal;
            StuckSignal::Normal
        }
    }

    fn repetition_detected(&self) -> bool {
        self.state.same_fingerprint_count >= self.thresholds.warn_threshold
            || self.state.same_action_count >= self.thresholds.action_repeat_threshold
    }

    /// Text for the decider describing the repetition, while it persists
    pub fn stuck_context(&self) -> Option<String> {
        if !matches!(self.status, StuckStatus::Warn | StuckStatus::Escalated) {
            return None;
        }

        let mut parts = Vec::new();
        if self.state.same_fingerprint_count >= self.thresholds.warn_threshold {
            parts.push(format!(
                "WARNING: The application state has not changed for the last {} observations. \
                 You may be stuck. Try a COMPLETELY DIFFERENT approach.",
                self.state.same_fingerprint_count
            ));
        }
        if self.state.same_action_count >= self.thresholds.action_repeat_threshold
            && let Some((action, target, _)) = &self.last_action
        {
            parts.push(format!(
                "WARNING: You have repeated the exact same action '{}' on '{}' {} times. \
                 This is not working. Try something DIFFERENT.",
                action, target, self.state.same_action_count
            ));
        }
        Some(parts.join("\n"))
    }
}
