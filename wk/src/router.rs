//! Model Router - picks a decision-making tier per iteration
//!
//! The router is a pure lookup. Escalation state lives in the stuck detector
//! and reaches the router only as the `escalation_level` argument.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::ActionKind;

/// Cost/capability class of a decision-making model, cheapest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Local,
    Fast,
    Standard,
    Strong,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Local, Tier::Fast, Tier::Standard, Tier::Strong];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Local => "local",
            Tier::Fast => "fast",
            Tier::Standard => "standard",
            Tier::Strong => "strong",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tier::ALL
            .into_iter()
            .find(|t| t.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("Unknown tier '{}'. Expected one of: local, fast, standard, strong", s))
    }
}

/// What kind of decision is being asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    InitialAssessment,
    Navigation,
    Click,
    Scroll,
    Wait,
    Keyboard,
    FormFill,
    CheckpointVerification,
    Done,
    Stuck,
}

impl ActionCategory {
    pub const ALL: [ActionCategory; 10] = [
        ActionCategory::InitialAssessment,
        ActionCategory::Navigation,
        ActionCategory::Click,
        ActionCategory::Scroll,
        ActionCategory::Wait,
        ActionCategory::Keyboard,
        ActionCategory::FormFill,
        ActionCategory::CheckpointVerification,
        ActionCategory::Done,
        ActionCategory::Stuck,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionCategory::InitialAssessment => "initial_assessment",
            ActionCategory::Navigation => "navigation",
            ActionCategory::Click => "click",
            ActionCategory::Scroll => "scroll",
            ActionCategory::Wait => "wait",
            ActionCategory::Keyboard => "keyboard",
            ActionCategory::FormFill => "form_fill",
            ActionCategory::CheckpointVerification => "checkpoint_verification",
            ActionCategory::Done => "done",
            ActionCategory::Stuck => "stuck",
        }
    }
}

impl From<ActionKind> for ActionCategory {
    fn from(action: ActionKind) -> Self {
        match action {
            ActionKind::Click => ActionCategory::Click,
            ActionKind::Fill => ActionCategory::FormFill,
            ActionKind::Keyboard => ActionCategory::Keyboard,
            ActionKind::Scroll => ActionCategory::Scroll,
            ActionKind::Wait => ActionCategory::Wait,
            ActionKind::Navigate => ActionCategory::Navigation,
            ActionKind::Done => ActionCategory::Done,
            ActionKind::Stuck => ActionCategory::Stuck,
        }
    }
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.to_lowercase().replace('-', "_");
        ActionCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| format!("Unknown action category '{}'", s))
    }
}

/// Category to tier table
pub type RoutingTable = BTreeMap<ActionCategory, Tier>;

/// Built-in table: simple actions on the fast tier, reasoning-heavy ones on standard
pub fn default_routing_table() -> RoutingTable {
    debug!("default_routing_table: called");
    use ActionCategory::*;
    [
        (Navigation, Tier::Fast),
        (Click, Tier::Fast),
        (Scroll, Tier::Fast),
        (Wait, Tier::Fast),
        (Done, Tier::Fast),
        (Keyboard, Tier::Fast),
        (FormFill, Tier::Standard),
        (InitialAssessment, Tier::Standard),
        (CheckpointVerification, Tier::Standard),
    ]
    .into_iter()
    .collect()
}

/// Maps (category, escalation level) to a tier
#[derive(Debug, Clone)]
pub struct ModelRouter {
    table: RoutingTable,
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new(default_routing_table())
    }
}

impl ModelRouter {
    pub fn new(table: RoutingTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Strongest tier present in the table; `Strong` for an empty table
    pub fn strongest(&self) -> Tier {
        self.table.values().copied().max().unwrap_or(Tier::Strong)
    }

    /// Pick the tier for one decision
    ///
    /// Any escalation forces the strongest configured tier, except for `stuck`
    /// which keeps its mapping since the step is ending anyway. Categories the
    /// table does not mention also get the strongest tier.
    pub fn route(&self, category: ActionCategory, escalation_level: u8) -> Tier {
        let tier = if escalation_level > 0 && category != ActionCategory::Stuck {
            self.strongest()
        } else {
            self.table.get(&category).copied().unwrap_or_else(|| self.strongest())
        };
        debug!(%category, escalation_level, %tier, "ModelRouter::route: called");
        tier
    }
}
