//! Local-first decider with a paid fallback

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{DecideRequest, DecideResponse, Decider};
use crate::error::DeciderTransportError;
use crate::router::Tier;

/// Tries a zero-cost local decider first, then the primary one
///
/// The local decider is only consulted when the routed tier is `local` and
/// `force_api` is off. A transport error or an unparseable answer from it
/// sends the same request to the primary decider at `fallback_tier` with
/// `force_api` set, and the response is marked `fell_back` so the runner keeps
/// `force_api` for the rest of the step. Failures of the primary decider are
/// returned as-is.
pub struct FallbackDecider<L, P> {
    local: L,
    primary: P,
    fallback_tier: Tier,
}

impl<L: Decider, P: Decider> FallbackDecider<L, P> {
    pub fn new(local: L, primary: P, fallback_tier: Tier) -> Self {
        Self {
            local,
            primary,
            fallback_tier,
        }
    }

    pub fn local(&self) -> &L {
        &self.local
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }
}

#[async_trait]
impl<L: Decider, P: Decider> Decider for FallbackDecider<L, P> {
    async fn decide(&self, mut request: DecideRequest) -> Result<DecideResponse, DeciderTransportError> {
        debug!(tier = %request.tier, force_api = request.force_api, "FallbackDecider::decide: called");

        if request.tier == Tier::Local && !request.force_api {
            match self.local.decide(request.clone()).await {
                Ok(response) if !response.decision.is_parse_error() => return Ok(response),
                Ok(_) => {
                    warn!(
                        action_number = request.action_number,
                        "Local decider returned unparseable response, falling back"
                    );
                }
                Err(e) => {
                    warn!(action_number = request.action_number, error = %e, "Local decider failed, falling back");
                }
            }
            request.force_api = true;
            request.tier = self.fallback_tier;
            let mut response = self.primary.decide(request).await?;
            response.fell_back = true;
            return Ok(response);
        }

        if request.tier == Tier::Local {
            debug!("FallbackDecider::decide: force_api set, skipping local decider");
            request.tier = self.fallback_tier;
        }
        self.primary.decide(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::mock::{MockDecider, request_for};
    use crate::domain::{ActionKind, Decision};

    #[tokio::test]
    async fn test_local_success_stays_local() {
        let local = MockDecider::new(vec![Ok(Decision::new(ActionKind::Click, "Next", ""))]).with_tier(Tier::Local);
        let primary = MockDecider::new(vec![]);
        let decider = FallbackDecider::new(local, primary, Tier::Standard);

        let response = decider.decide(request_for(Tier::Local, false)).await.unwrap();
        assert_eq!(response.served_by, Tier::Local);
        assert!(!response.fell_back);
        assert_eq!(decider.primary().call_count(), 0);
    }

    #[tokio::test]
    async fn test_local_failure_falls_back_with_force_api() {
        let local = MockDecider::new(vec![Err(DeciderTransportError::new("connection refused"))]);
        let primary = MockDecider::new(vec![Ok(Decision::new(ActionKind::Click, "Next", ""))]);
        let decider = FallbackDecider::new(local, primary, Tier::Standard);

        let response = decider.decide(request_for(Tier::Local, false)).await.unwrap();
        assert!(response.fell_back);
        let seen = decider.primary().requests();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].force_api);
        assert_eq!(seen[0].tier, Tier::Standard);
    }

    #[tokio::test]
    async fn test_unparseable_local_answer_falls_back() {
        let local = MockDecider::new(vec![Ok(Decision::from_model_text("no json here"))]);
        let primary = MockDecider::new(vec![Ok(Decision::new(ActionKind::Scroll, "page", "down"))]);
        let decider = FallbackDecider::new(local, primary, Tier::Fast);

        let response = decider.decide(request_for(Tier::Local, false)).await.unwrap();
        assert!(response.fell_back);
        assert_eq!(response.decision.action, ActionKind::Scroll);
    }

    #[tokio::test]
    async fn test_force_api_skips_local() {
        let local = MockDecider::new(vec![]);
        let primary = MockDecider::new(vec![Ok(Decision::new(ActionKind::Wait, "", "1"))]);
        let decider = FallbackDecider::new(local, primary, Tier::Standard);

        let response = decider.decide(request_for(Tier::Local, true)).await.unwrap();
        assert!(!response.fell_back);
        assert_eq!(decider.local().call_count(), 0);
        assert_eq!(decider.primary().requests()[0].tier, Tier::Standard);
    }

    #[tokio::test]
    async fn test_primary_error_propagates() {
        let local = MockDecider::new(vec![Err(DeciderTransportError::new("down"))]);
        let primary = MockDecider::new(vec![Err(DeciderTransportError::new("503"))]);
        let decider = FallbackDecider::new(local, primary, Tier::Standard);

        let err = decider.decide(request_for(Tier::Local, false)).await.unwrap_err();
        assert_eq!(err.message, "503");
    }
}
