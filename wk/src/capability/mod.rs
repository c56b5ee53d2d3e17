//! Capability traits supplied by the caller
//!
//! The engine never perceives, decides or acts by itself. Each of those is a
//! single-method async trait; any implementation can be plugged in.

use async_trait::async_trait;

use crate::compactor::ContextEntry;
use crate::cost::TokenUsage;
use crate::domain::{ActionResult, Decision, PerceptionRecord};
use crate::error::{DeciderTransportError, ExecutionError, PerceptionError};
use crate::router::{ActionCategory, Tier};

mod fallback;
#[cfg(test)]
pub mod mock;

pub use fallback::FallbackDecider;

/// Captures the current application state
#[async_trait]
pub trait Perceiver: Send + Sync {
    async fn perceive(&self) -> Result<PerceptionRecord, PerceptionError>;
}

/// Everything the decider gets for one decision
#[derive(Debug, Clone)]
pub struct DecideRequest {
    pub goal: String,
    pub perception: PerceptionRecord,
    pub ui_context: Option<String>,
    /// Repetition warning while the stuck detector sees no progress
    pub stuck_context: Option<String>,
    /// Post-compaction history, oldest first, including the current capture
    pub context: Vec<ContextEntry>,
    /// Skip any local model and go straight to the primary capability
    pub force_api: bool,
    pub tier: Tier,
    pub category: ActionCategory,
    pub action_number: u32,
}

/// The decider's answer and what it cost
#[derive(Debug, Clone, PartialEq)]
pub struct DecideResponse {
    pub decision: Decision,
    pub usage: TokenUsage,
    /// Tier that actually produced the decision
    pub served_by: Tier,
    /// A local model was tried first and failed
    pub fell_back: bool,
}

impl DecideResponse {
    pub fn new(decision: Decision, usage: TokenUsage, served_by: Tier) -> Self {
        Self {
            decision,
            usage,
            served_by,
            fell_back: false,
        }
    }
}

/// Proposes the next action
#[async_trait]
pub trait Decider: Send + Sync {
    async fn decide(&self, request: DecideRequest) -> Result<DecideResponse, DeciderTransportError>;
}

/// Carries out a proposed action against the application
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, decision: &Decision) -> Result<ActionResult, ExecutionError>;
}
