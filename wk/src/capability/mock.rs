//! Mock capabilities for unit tests

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::*;
use crate::domain::Capture;

enum PerceiverMode {
    Novel,
    Frozen,
    Scripted(Vec<Result<Capture, PerceptionError>>),
}

/// Mock perceiver: a new screen every call, the same screen forever, or a script
pub struct MockPerceiver {
    mode: PerceiverMode,
    call_count: AtomicUsize,
}

impl MockPerceiver {
    pub fn novel() -> Self {
        Self::with_mode(PerceiverMode::Novel)
    }

    pub fn frozen() -> Self {
        Self::with_mode(PerceiverMode::Frozen)
    }

    pub fn scripted(captures: Vec<Result<Capture, PerceptionError>>) -> Self {
        Self::with_mode(PerceiverMode::Scripted(captures))
    }

    fn with_mode(mode: PerceiverMode) -> Self {
        Self {
            mode,
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Perceiver for MockPerceiver {
    async fn perceive(&self) -> Result<PerceptionRecord, PerceptionError> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        debug!(%idx, "MockPerceiver::perceive: called");
        match &self.mode {
            PerceiverMode::Novel => Ok(PerceptionRecord::from_capture(Capture::new(format!("screen-{}", idx)))),
            PerceiverMode::Frozen => Ok(PerceptionRecord::from_capture(Capture::new("frozen-screen"))),
            PerceiverMode::Scripted(script) => match script.get(idx) {
                Some(Ok(capture)) => Ok(PerceptionRecord::from_capture(capture.clone())),
                Some(Err(e)) => Err(e.clone()),
                None => Err(PerceptionError::new("No more mock captures")),
            },
        }
    }
}

/// Mock decider replaying canned decisions
pub struct MockDecider {
    responses: Vec<Result<Decision, DeciderTransportError>>,
    repeat_last: bool,
    usage: TokenUsage,
    tier: Option<Tier>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<DecideRequest>>,
}

impl MockDecider {
    pub fn new(responses: Vec<Result<Decision, DeciderTransportError>>) -> Self {
        debug!(response_count = %responses.len(), "MockDecider::new: called");
        Self {
            responses,
            repeat_last: false,
            usage: TokenUsage::default(),
            tier: None,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Returns the same decision on every call
    pub fn repeating(decision: Decision) -> Self {
        let mut mock = Self::new(vec![Ok(decision)]);
        mock.repeat_last = true;
        mock
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Report this tier as the serving tier instead of the requested one
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<DecideRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Decider for MockDecider {
    async fn decide(&self, request: DecideRequest) -> Result<DecideResponse, DeciderTransportError> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        debug!(%idx, tier = %request.tier, "MockDecider::decide: called");
        let served_by = self.tier.unwrap_or(request.tier);
        self.requests.lock().unwrap().push(request);

        let scripted = match self.responses.get(idx) {
            Some(r) => Some(r),
            None if self.repeat_last => self.responses.last(),
            None => None,
        };
        match scripted {
            Some(Ok(decision)) => Ok(DecideResponse::new(decision.clone(), self.usage, served_by)),
            Some(Err(e)) => Err(e.clone()),
            None => Err(DeciderTransportError::new("No more mock responses")),
        }
    }
}

/// Mock executor; succeeds unless scripted otherwise
pub struct MockExecutor {
    results: Vec<Result<ActionResult, ExecutionError>>,
    delay: Duration,
    call_count: AtomicUsize,
    executed: Mutex<Vec<Decision>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::scripted(Vec::new())
    }

    pub fn scripted(results: Vec<Result<ActionResult, ExecutionError>>) -> Self {
        Self {
            results,
            delay: Duration::ZERO,
            call_count: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Sleep this long inside every execute call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<Decision> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionExecutor for MockExecutor {
    async fn execute(&self, decision: &Decision) -> Result<ActionResult, ExecutionError> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        debug!(%idx, action = %decision.action, "MockExecutor::execute: called");
        self.executed.lock().unwrap().push(decision.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.results.get(idx) {
            Some(result) => result.clone(),
            None => Ok(ActionResult::ok(self.delay)),
        }
    }
}

/// Minimal request for exercising deciders directly
pub fn request_for(tier: Tier, force_api: bool) -> DecideRequest {
    DecideRequest {
        goal: "Reach the dashboard".to_string(),
        perception: PerceptionRecord::from_capture(Capture::new("screen")),
        ui_context: None,
        stuck_context: None,
        context: Vec::new(),
        force_api,
        tier,
        category: ActionCategory::Click,
        action_number: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ActionKind;

    #[tokio::test]
    async fn test_mock_decider_returns_responses() {
        let decider = MockDecider::new(vec![
            Ok(Decision::new(ActionKind::Click, "A", "")),
            Ok(Decision::new(ActionKind::Click, "B", "")),
        ]);
        let first = decider.decide(request_for(Tier::Fast, false)).await.unwrap();
        let second = decider.decide(request_for(Tier::Fast, false)).await.unwrap();
        assert_eq!(first.decision.target, "A");
        assert_eq!(second.decision.target, "B");
        assert!(decider.decide(request_for(Tier::Fast, false)).await.is_err());
        assert_eq!(decider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_perceiver_modes() {
        let novel = MockPerceiver::novel();
        let a = novel.perceive().await.unwrap();
        let b = novel.perceive().await.unwrap();
        assert_ne!(a.fingerprint, b.fingerprint);

        let frozen = MockPerceiver::frozen();
        let a = frozen.perceive().await.unwrap();
        let b = frozen.perceive().await.unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
    }
}
