//! Conversation Compactor - bounds the decision context within a step
//!
//! Only the most recent `keep_recent` captures are handed to the decider
//! raw. Older ones are swapped for a one-line summary built from the
//! observation the decider made on them. Summaries never turn back into raw
//! captures.

use std::sync::Arc;

use tracing::debug;

use crate::domain::Capture;

pub const DEFAULT_KEEP_RECENT: usize = 3;

const NO_OBSERVATION: &str = "no observation recorded";

/// Payload of one context entry
#[derive(Debug, Clone, PartialEq)]
pub enum ContextContent {
    Raw(Arc<Capture>),
    Summary(String),
}

/// One perception in the decision context
#[derive(Debug, Clone, PartialEq)]
pub struct ContextEntry {
    pub action_number: u32,
    pub content: ContextContent,
    /// Observation from the decision made on this capture
    pub observation: Option<String>,
}

impl ContextEntry {
    pub fn is_raw(&self) -> bool {
        matches!(self.content, ContextContent::Raw(_))
    }

    fn summary_text(&self) -> String {
        let observation = self
            .observation
            .as_deref()
            .filter(|o| !o.is_empty())
            .unwrap_or(NO_OBSERVATION);
        format!("[Capture from action {} -- {}]", self.action_number, observation)
    }
}

/// Ordered perception history for one step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionContext {
    entries: Vec<ContextEntry>,
}

impl DecisionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_capture(&mut self, action_number: u32, capture: Arc<Capture>) {
        self.entries.push(ContextEntry {
            action_number,
            content: ContextContent::Raw(capture),
            observation: None,
        });
    }

    /// Attach the decider's observation to the newest entry
    pub fn annotate_last(&mut self, observation: &str) {
        if let Some(entry) = self.entries.last_mut() {
            entry.observation = Some(observation.to_string());
        }
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn raw_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_raw()).count()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConversationCompactor {
    keep_recent: usize,
}

impl Default for ConversationCompactor {
    fn default() -> Self {
        Self::new(DEFAULT_KEEP_RECENT)
    }
}

impl ConversationCompactor {
    pub fn new(keep_recent: usize) -> Self {
        Self { keep_recent }
    }

    pub fn keep_recent(&self) -> usize {
        self.keep_recent
    }

    /// Summarize every raw capture older than the newest `keep_recent`
    ///
    /// Returns how many entries were compacted by this call.
    pub fn compact(&self, context: &mut DecisionContext) -> usize {
        let raw = context.raw_count();
        if raw <= self.keep_recent {
            return 0;
        }

        let mut to_compact = raw - self.keep_recent;
        let mut compacted = 0;
        for entry in context.entries.iter_mut() {
            if to_compact == 0 {
                break;
            }
            if entry.is_raw() {
                entry.content = ContextContent::Summary(entry.summary_text());
                to_compact -= 1;
                compacted += 1;
            }
        }
        debug!(compacted, keep_recent = self.keep_recent, "ConversationCompactor::compact: called");
        compacted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn context_with(n: u32) -> DecisionContext {
        let mut ctx = DecisionContext::new();
        for i in 1..=n {
            ctx.push_capture(i, Arc::new(Capture::new(format!("payload-{}", i))));
            ctx.annotate_last(&format!("saw screen {}", i));
        }
        ctx
    }

    #[test]
    fn test_under_limit_untouched() {
        let mut ctx = context_with(3);
        assert_eq!(ConversationCompactor::default().compact(&mut ctx), 0);
        assert_eq!(ctx.raw_count(), 3);
    }

    #[test]
    fn test_old_entries_summarized() {
        let mut ctx = context_with(5);
        assert_eq!(ConversationCompactor::default().compact(&mut ctx), 2);
        assert_eq!(ctx.raw_count(), 3);
        assert_eq!(
            ctx.entries()[0].content,
            ContextContent::Summary("[Capture from action 1 -- saw screen 1]".to_string())
        );
        assert!(ctx.entries()[2].is_raw());
        assert!(ctx.entries()[4].is_raw());
    }

    #[test]
    fn test_missing_observation_placeholder() {
        let mut ctx = DecisionContext::new();
        ctx.push_capture(1, Arc::new(Capture::new("a")));
        ctx.push_capture(2, Arc::new(Capture::new("b")));
        ConversationCompactor::new(1).compact(&mut ctx);
        assert_eq!(
            ctx.entries()[0].content,
            ContextContent::Summary("[Capture from action 1 -- no observation recorded]".to_string())
        );
    }

    #[test]
    fn test_incremental_compaction() {
        let compactor = ConversationCompactor::default();
        let mut ctx = DecisionContext::new();
        for i in 1..=10 {
            ctx.push_capture(i, Arc::new(Capture::new("p")));
            compactor.compact(&mut ctx);
            ctx.annotate_last("obs");
            assert!(ctx.raw_count() <= 3);
        }
        assert_eq!(ctx.len(), 10);
        assert!(ctx.entries()[7..].iter().all(ContextEntry::is_raw));
    }

    proptest! {
        #[test]
        fn prop_compaction_is_idempotent(n in 0u32..20, keep in 0usize..6) {
            let compactor = ConversationCompactor::new(keep);
            let mut ctx = context_with(n);
            compactor.compact(&mut ctx);
            let once = ctx.clone();
            prop_assert_eq!(compactor.compact(&mut ctx), 0);
            prop_assert_eq!(ctx, once);
        }

        #[test]
        fn prop_newest_stay_raw(n in 1u32..20, keep in 1usize..6) {
            let mut ctx = context_with(n);
            ConversationCompactor::new(keep).compact(&mut ctx);
            let expected_raw = (n as usize).min(keep);
            prop_assert_eq!(ctx.raw_count(), expected_raw);
            let tail = &ctx.entries()[ctx.len() - expected_raw..];
            prop_assert!(tail.iter().all(ContextEntry::is_raw));
        }
    }
}
