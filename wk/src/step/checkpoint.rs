//! Checkpoint tracking within a step

use tracing::{debug, info};

use crate::domain::{Capture, Checkpoint, Decision};

/// Tracks which of a step's checkpoints have been reached
///
/// Conditioned checkpoints are checked against every capture. Milestones
/// without a condition are reached when the decider names them.
#[derive(Debug, Clone)]
pub struct CheckpointTracker {
    checkpoints: Vec<Checkpoint>,
    reached: Vec<String>,
}

impl CheckpointTracker {
    pub fn new(checkpoints: &[Checkpoint]) -> Self {
        Self {
            checkpoints: checkpoints.to_vec(),
            reached: Vec::new(),
        }
    }

    fn is_reached(&self, name: &str) -> bool {
        self.reached.iter().any(|r| r == name)
    }

    fn mark(&mut self, name: &str) {
        info!(checkpoint = %name, "Checkpoint reached");
        self.reached.push(name.to_string());
    }

    /// Evaluate conditions against a capture; returns newly reached names
    pub fn observe_capture(&mut self, capture: &Capture) -> Vec<String> {
        let newly: Vec<String> = self
            .checkpoints
            .iter()
            .filter(|c| !self.is_reached(&c.name))
            .filter(|c| c.condition.as_ref().is_some_and(|cond| cond.is_met_by(capture)))
            .map(|c| c.name.clone())
            .collect();
        for name in &newly {
            self.mark(name);
        }
        newly
    }

    /// Credit a milestone the decider reported
    pub fn observe_decision(&mut self, decision: &Decision) -> Option<String> {
        let name = decision.checkpoint.as_deref()?;
        let known = self
            .checkpoints
            .iter()
            .any(|c| c.name == name && c.condition.is_none());
        if !known || self.is_reached(name) {
            debug!(%name, known, "CheckpointTracker::observe_decision: ignoring checkpoint report");
            return None;
        }
        self.mark(name);
        Some(name.to_string())
    }

    pub fn reached(&self) -> &[String] {
        &self.reached
    }

    /// Unmet checkpoint names in declaration order
    pub fn unmet(&self) -> Vec<String> {
        self.checkpoints
            .iter()
            .filter(|c| !self.is_reached(&c.name))
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn has_unmet(&self) -> bool {
        self.checkpoints.iter().any(|c| !self.is_reached(&c.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActionKind, CheckpointCondition};

    fn tracker() -> CheckpointTracker {
        CheckpointTracker::new(&[
            Checkpoint::with_condition("cart", CheckpointCondition::UrlContains("/cart".into())),
            Checkpoint::milestone("coupon-applied"),
        ])
    }

    #[test]
    fn test_condition_reached_once() {
        let mut t = tracker();
        let capture = Capture::new("img").with_url("https://shop.test/cart");
        assert_eq!(t.observe_capture(&capture), vec!["cart".to_string()]);
        assert!(t.observe_capture(&capture).is_empty());
        assert_eq!(t.unmet(), vec!["coupon-applied".to_string()]);
    }

    #[test]
    fn test_milestone_from_decision() {
        let mut t = tracker();
        let decision = Decision::new(ActionKind::Click, "Apply", "").with_checkpoint("coupon-applied");
        assert_eq!(t.observe_decision(&decision), Some("coupon-applied".to_string()));
        assert_eq!(t.observe_decision(&decision), None);
        assert!(t.has_unmet());
    }

    #[test]
    fn test_decider_cannot_claim_conditioned_or_unknown() {
        let mut t = tracker();
        let claim = Decision::new(ActionKind::Click, "x", "").with_checkpoint("cart");
        assert_eq!(t.observe_decision(&claim), None);
        let unknown = Decision::new(ActionKind::Click, "x", "").with_checkpoint("nope");
        assert_eq!(t.observe_decision(&unknown), None);
        assert!(t.reached().is_empty());
    }

    #[test]
    fn test_no_checkpoints() {
        let t = CheckpointTracker::new(&[]);
        assert!(!t.has_unmet());
        assert!(t.unmet().is_empty());
    }
}
