//! Step events - fire-and-forget activity stream
//!
//! The runner emits events through an optional [`EventEmitter`]. Anyone
//! interested (a progress display, a log writer) subscribes to the
//! [`EventBus`]. Nothing in the engine waits on subscribers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::{ActionKind, TerminalReason};
use crate::router::Tier;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Observable step activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StepEvent {
    StepStarted {
        run_id: String,
        step_id: String,
        goal: String,
    },
    Escalated {
        run_id: String,
        step_id: String,
        action_number: u32,
        tier: Tier,
    },
    StuckWarning {
        run_id: String,
        step_id: String,
        action_number: u32,
        same_fingerprint_count: u32,
        same_action_count: u32,
    },
    ActionExecuted {
        run_id: String,
        step_id: String,
        action_number: u32,
        action: ActionKind,
        target: String,
        success: bool,
        duration_ms: u64,
    },
    CheckpointReached {
        run_id: String,
        step_id: String,
        checkpoint: String,
    },
    BudgetWarning {
        run_id: String,
        step_id: String,
        spent_usd: f64,
        cap_usd: f64,
    },
    StepFinished {
        run_id: String,
        step_id: String,
        passed: bool,
        terminal_reason: TerminalReason,
        action_count: u32,
        cost_usd: f64,
    },
}

impl StepEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            StepEvent::StepStarted { .. } => "StepStarted",
            StepEvent::Escalated { .. } => "Escalated",
            StepEvent::StuckWarning { .. } => "StuckWarning",
            StepEvent::ActionExecuted { .. } => "ActionExecuted",
            StepEvent::CheckpointReached { .. } => "CheckpointReached",
            StepEvent::BudgetWarning { .. } => "BudgetWarning",
            StepEvent::StepFinished { .. } => "StepFinished",
        }
    }

    pub fn run_id(&self) -> &str {
        match self {
            StepEvent::StepStarted { run_id, .. }
            | StepEvent::Escalated { run_id, .. }
            | StepEvent::StuckWarning { run_id, .. }
            | StepEvent::ActionExecuted { run_id, .. }
            | StepEvent::CheckpointReached { run_id, .. }
            | StepEvent::BudgetWarning { run_id, .. }
            | StepEvent::StepFinished { run_id, .. } => run_id,
        }
    }
}

/// Broadcast hub for step events
pub struct EventBus {
    tx: broadcast::Sender<StepEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Dropped silently when nobody is listening
    pub fn emit(&self, event: StepEvent) {
        debug!(event_type = event.event_type(), run_id = event.run_id(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StepEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Emitter that stamps every event with `run_id`
    pub fn emitter_for(&self, run_id: impl Into<String>) -> EventEmitter {
        let run_id = run_id.into();
        debug!(%run_id, "EventBus::emitter_for: creating emitter");
        EventEmitter {
            tx: self.tx.clone(),
            run_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Cheap-to-clone handle bound to one run
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<StepEvent>,
    run_id: String,
}

impl EventEmitter {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn emit(&self, event: StepEvent) {
        debug!(event_type = event.event_type(), "EventEmitter::emit");
        let _ = self.tx.send(event);
    }

    pub fn step_started(&self, step_id: &str, goal: &str) {
        self.emit(StepEvent::StepStarted {
            run_id: self.run_id.clone(),
            step_id: step_id.to_string(),
            goal: goal.to_string(),
        });
    }

    pub fn escalated(&self, step_id: &str, action_number: u32, tier: Tier) {
        self.emit(StepEvent::Escalated {
            run_id: self.run_id.clone(),
            step_id: step_id.to_string(),
            action_number,
            tier,
        });
    }

    pub fn stuck_warning(&self, step_id: &str, action_number: u32, same_fingerprint_count: u32, same_action_count: u32) {
        self.emit(StepEvent::StuckWarning {
            run_id: self.run_id.clone(),
            step_id: step_id.to_string(),
            action_number,
            same_fingerprint_count,
            same_action_count,
        });
    }

    pub fn action_executed(
        &self,
        step_id: &str,
        action_number: u32,
        action: ActionKind,
        target: &str,
        success: bool,
        duration_ms: u64,
    ) {
        self.emit(StepEvent::ActionExecuted {
            run_id: self.run_id.clone(),
            step_id: step_id.to_string(),
            action_number,
            action,
            target: target.to_string(),
            success,
            duration_ms,
        });
    }

    pub fn checkpoint_reached(&self, step_id: &str, checkpoint: &str) {
        self.emit(StepEvent::CheckpointReached {
            run_id: self.run_id.clone(),
            step_id: step_id.to_string(),
            checkpoint: checkpoint.to_string(),
        });
    }

    pub fn budget_warning(&self, step_id: &str, spent_usd: f64, cap_usd: f64) {
        self.emit(StepEvent::BudgetWarning {
            run_id: self.run_id.clone(),
            step_id: step_id.to_string(),
            spent_usd,
            cap_usd,
        });
    }

    pub fn step_finished(
        &self,
        step_id: &str,
        passed: bool,
        terminal_reason: TerminalReason,
        action_count: u32,
        cost_usd: f64,
    ) {
        self.emit(StepEvent::StepFinished {
            run_id: self.run_id.clone(),
            step_id: step_id.to_string(),
            passed,
            terminal_reason,
            action_count,
            cost_usd,
        });
    }
}
