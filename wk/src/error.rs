//! Engine error types
//!
//! Infrastructure failures (perception, decider transport, ledger I/O) surface
//! to the caller unmodified. Everything that describes the *application under
//! test* (stuck, limits, budget) is captured in the StepResult instead.

use costledger::{BudgetStatus, LedgerError};
use thiserror::Error;

/// Errors that abort a step or a run
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cumulative budget exceeded: {reason}")]
    CumulativeBudgetExceeded { reason: String, status: BudgetStatus },

    #[error(transparent)]
    Perception(#[from] PerceptionError),

    #[error(transparent)]
    DeciderTransport(#[from] DeciderTransportError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl EngineError {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        EngineError::Configuration(message.into())
    }

    /// Tooling broke, as opposed to the application under test misbehaving
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            EngineError::Perception(_) | EngineError::DeciderTransport(_) | EngineError::Ledger(_)
        )
    }
}

/// The perception capability could not capture application state
#[derive(Debug, Clone, Error)]
#[error("Perception failed: {message}")]
pub struct PerceptionError {
    pub message: String,
}

impl PerceptionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The decision-making capability could not be reached or answered unusably
#[derive(Debug, Clone, Error)]
#[error("Decider transport error: {message}")]
pub struct DeciderTransportError {
    pub message: String,
}

impl DeciderTransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A single action could not be carried out; recorded, not fatal
#[derive(Debug, Clone, Error)]
#[error("Execution error: {message}")]
pub struct ExecutionError {
    pub message: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The per-run cost cap was crossed
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Run budget exceeded: ${spent_usd:.4} > ${cap_usd:.2} limit")]
pub struct BudgetExceededError {
    pub spent_usd: f64,
    pub cap_usd: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infrastructure_classification() {
        assert!(EngineError::from(PerceptionError::new("no display")).is_infrastructure());
        assert!(EngineError::from(DeciderTransportError::new("503")).is_infrastructure());
        assert!(!EngineError::config("bad threshold").is_infrastructure());
    }

    #[test]
    fn test_budget_exceeded_message() {
        let err = BudgetExceededError {
            spent_usd: 1.2,
            cap_usd: 1.0,
        };
        assert_eq!(err.to_string(), "Run budget exceeded: $1.2000 > $1.00 limit");
    }

    #[test]
    fn test_transparent_messages() {
        let err = EngineError::from(PerceptionError::new("screen capture denied"));
        assert_eq!(err.to_string(), "Perception failed: screen capture denied");
    }
}
