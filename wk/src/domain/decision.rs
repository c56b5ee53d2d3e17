//! Decision - one proposed next action from the decider

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Prefix marking a Decision synthesized from unparseable model output
pub const PARSE_ERROR_PREFIX: &str = "[Parse error]";

/// A flat JSON object with a non-empty `"action"` string, anywhere in prose
const EMBEDDED_DECISION_PATTERN: &str = r#"(?s)\{[^{}]*"action"\s*:\s*"[^"]+?"[^{}]*\}"#;

/// The kinds of action a decider may propose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Click,
    Fill,
    Keyboard,
    Scroll,
    Wait,
    Navigate,
    Done,
    Stuck,
}

impl ActionKind {
    /// Actions that end the step instead of touching the application
    pub fn is_terminal(self) -> bool {
        matches!(self, ActionKind::Done | ActionKind::Stuck)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::Click => "click",
            ActionKind::Fill => "fill",
            ActionKind::Keyboard => "keyboard",
            ActionKind::Scroll => "scroll",
            ActionKind::Wait => "wait",
            ActionKind::Navigate => "navigate",
            ActionKind::Done => "done",
            ActionKind::Stuck => "stuck",
        };
        write!(f, "{}", s)
    }
}

/// What the decider wants to do next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: ActionKind,
    /// Element description; empty for actions without a target
    #[serde(default, deserialize_with = "null_as_empty")]
    pub target: String,
    /// Text to type, key name, URL or wait duration depending on `action`
    #[serde(default, deserialize_with = "null_as_empty")]
    pub value: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub reasoning: String,
    #[serde(default)]
    pub goal_achieved: bool,
    /// What the decider saw on this capture
    #[serde(default, deserialize_with = "null_as_empty")]
    pub observation: String,
    #[serde(default)]
    pub ux_notes: Option<String>,
    /// Name of a checkpoint the decider believes was just reached
    #[serde(default)]
    pub checkpoint: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl Decision {
    /// Create a decision with the given action, target and value
    pub fn new(action: ActionKind, target: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            action,
            target: target.into(),
            value: value.into(),
            reasoning: String::new(),
            goal_achieved: false,
            observation: String::new(),
            ux_notes: None,
            checkpoint: None,
        }
    }

    /// Decision declaring the goal complete
    pub fn done(observation: impl Into<String>) -> Self {
        Self::new(ActionKind::Done, "", "")
            .with_goal_achieved(true)
            .with_observation(observation)
    }

    /// Decision admitting the decider cannot proceed
    pub fn stuck(observation: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self::new(ActionKind::Stuck, "", "")
            .with_observation(observation)
            .with_reasoning(reasoning)
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_observation(mut self, observation: impl Into<String>) -> Self {
        self.observation = observation.into();
        self
    }

    pub fn with_goal_achieved(mut self, goal_achieved: bool) -> Self {
        self.goal_achieved = goal_achieved;
        self
    }

    pub fn with_ux_notes(mut self, notes: impl Into<String>) -> Self {
        self.ux_notes = Some(notes.into());
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: impl Into<String>) -> Self {
        self.checkpoint = Some(checkpoint.into());
        self
    }

    /// The (action, target, value) tuple used for repetition detection
    pub fn action_key(&self) -> (ActionKind, &str, &str) {
        (self.action, self.target.as_str(), self.value.as_str())
    }

    /// Whether this decision ends the step successfully
    pub fn claims_success(&self) -> bool {
        self.goal_achieved || self.action == ActionKind::Done
    }

    /// Whether this decision was synthesized from unparseable output
    pub fn is_parse_error(&self) -> bool {
        self.action == ActionKind::Stuck && self.observation.starts_with(PARSE_ERROR_PREFIX)
    }

    /// Parse a decision from raw model output
    ///
    /// Accepts bare JSON, JSON wrapped in a markdown code fence, or prose with
    /// a single embedded JSON object carrying an `"action"` key. Anything else
    /// becomes a `stuck` decision marked with [`PARSE_ERROR_PREFIX`].
    pub fn from_model_text(raw: &str) -> Self {
        debug!(len = raw.len(), "from_model_text: called");
        let text = strip_code_fence(raw.trim());

        let err = match serde_json::from_str::<Decision>(text) {
            Ok(decision) => return decision,
            Err(e) => e,
        };

        match find_embedded(raw) {
            Ok(Some(decision)) => {
                debug!("from_model_text: extracted embedded JSON from prose");
                return decision;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Embedded decision pattern failed to compile"),
        }

        let snippet: String = raw.chars().take(200).collect();
        warn!(error = %err, raw = %snippet, "Failed to parse decider response");
        Self::stuck(
            format!("{} Raw response: {}", PARSE_ERROR_PREFIX, snippet),
            format!("Could not parse response as JSON: {}", err),
        )
    }
}

/// First embedded JSON object in `raw` that parses as a Decision
fn find_embedded(raw: &str) -> Result<Option<Decision>, regex::Error> {
    let re = Regex::new(EMBEDDED_DECISION_PATTERN)?;
    Ok(re
        .find_iter(raw)
        .find_map(|m| serde_json::from_str::<Decision>(m.as_str()).ok()))
}

fn strip_code_fence(text: &str) -> &str {
    if !text.starts_with("```") {
        return text;
    }
    let body = match text.find('\n') {
        Some(idx) => &text[idx + 1..],
        None => return text,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
