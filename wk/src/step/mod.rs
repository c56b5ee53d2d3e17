//! Step execution
//!
//! [`StepRunner::execute_step`] owns the perceive/decide/act loop. Per
//! iteration it:
//!
//! 1. stops on the deadline, the action limit or the cost ceiling
//! 2. perceives, checks checkpoints, compacts the decision context
//! 3. routes to a tier and asks the decider
//! 4. charges the call and feeds the stuck detector
//! 5. finishes on success or a stuck report, skips the action on escalation,
//!    otherwise executes it and re-checks the ceiling

mod checkpoint;
mod runner;

pub use checkpoint::CheckpointTracker;
pub use runner::StepRunner;
