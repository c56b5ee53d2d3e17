//! walker - perceive/decide/act step engine
//!
//! Drives autonomous "walk the application" test steps. Given a natural
//! language goal, the engine repeatedly perceives application state, asks a
//! decider what to do, executes the action, and stops when the goal is met,
//! progress stalls, or a limit runs out.
//!
//! # Modules
//!
//! - [`step`] - the step runner loop
//! - [`stuck`] - no-progress detection and escalation
//! - [`router`] - category and escalation to model tier
//! - [`cost`] - per-call pricing and the per-run cap
//! - [`compactor`] - bounded decision context
//! - [`journey`] - multi-step runs with the ledger budget gate
//! - [`capability`] - perceiver, decider and executor traits
//! - [`config`] - configuration types and loading
//!
//! Completed runs are recorded in the hash-chained ledger from the
//! `costledger` crate.

pub mod capability;
pub mod cli;
pub mod compactor;
pub mod config;
pub mod cost;
pub mod domain;
pub mod error;
pub mod events;
pub mod journey;
pub mod router;
pub mod step;
pub mod stuck;

pub use capability::{ActionExecutor, DecideRequest, DecideResponse, Decider, FallbackDecider, Perceiver};
pub use compactor::{ContextContent, ContextEntry, ConversationCompactor, DecisionContext};
pub use config::Config;
pub use cost::{CostAccountant, CostSummary, PriceTable, TierPrice, TokenUsage};
pub use domain::{
    ActionKind, ActionRecord, ActionResult, Capture, Checkpoint, CheckpointCondition, Decision, PerceptionRecord,
    StepResult, StepSpec, StuckOverrides, TerminalReason, fingerprint,
};
pub use error::{BudgetExceededError, DeciderTransportError, EngineError, ExecutionError, PerceptionError};
pub use events::{EventBus, EventEmitter, StepEvent};
pub use journey::{Journey, JourneyResult, JourneyRunner};
pub use router::{ActionCategory, ModelRouter, Tier};
pub use step::StepRunner;
pub use stuck::{StuckDetector, StuckSignal, StuckState, StuckThresholds};
