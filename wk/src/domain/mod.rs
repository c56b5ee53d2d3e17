//! Domain types for the step engine

mod decision;
mod perception;
mod step;

pub use decision::{ActionKind, Decision, PARSE_ERROR_PREFIX};
pub use perception::{Capture, PerceptionRecord, fingerprint};
pub use step::{
    ActionRecord, ActionResult, Checkpoint, CheckpointCondition, StepResult, StepSpec, StuckOverrides, TerminalReason,
};
