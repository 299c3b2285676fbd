//! Narrative provider boundary.
//!
//! The LLM is a black-box text-completion service behind `NarrativeGateway`.
//! The gateway wrapper owns retries: retryable failures (timeout, rate
//! limit, 5xx) back off exponentially with a cap; everything else fails
//! fast. When retries exhaust, callers degrade to the deterministic
//! template in [`fallback`] rather than block the pipeline; the template
//! is grounded by construction.

pub mod error;
pub mod fallback;
pub mod http;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::warn;

use crate::canonical::CanonicalInputData;
use crate::grounding::GroundingEntry;

pub use error::{ErrorContext, ProviderError};
pub use fallback::template_draft;
pub use http::HttpNarrativeProvider;

/// A generated narrative with the claims that must survive grounding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeDraft {
    pub narrative: String,
    pub claims: Vec<GroundingEntry>,
}

/// Request to the narrative boundary: the canonical input is the single
/// source of truth the model may reference.
#[derive(Debug, Clone)]
pub struct NarrativeRequest {
    pub canonical: CanonicalInputData,
    /// Team state id ("healthy"/"at_risk"/...) for tone.
    pub team_state: String,
    /// Ranked driver parameter ids.
    pub top_drivers: Vec<String>,
}

#[async_trait::async_trait]
pub trait NarrativeGateway: Send + Sync {
    async fn generate(&self, req: &NarrativeRequest) -> Result<NarrativeDraft, ProviderError>;
}

/// Retry policy for the gateway wrapper.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

/// Wraps any provider with classified-retry semantics.
pub struct RetryingGateway<P> {
    inner: P,
    config: GatewayConfig,
}

impl<P: NarrativeGateway> RetryingGateway<P> {
    pub fn new(inner: P) -> Self {
        Self::with_config(inner, GatewayConfig::default())
    }

    pub fn with_config(inner: P, config: GatewayConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait::async_trait]
impl<P: NarrativeGateway> NarrativeGateway for RetryingGateway<P> {
    async fn generate(&self, req: &NarrativeRequest) -> Result<NarrativeDraft, ProviderError> {
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..=self.config.max_retries {
            match self.inner.generate(req).await {
                Ok(draft) => return Ok(draft),
                Err(err) => {
                    if !err.is_retryable() || attempt == self.config.max_retries {
                        return Err(err);
                    }
                    let delay = backoff_delay(self.config.retry_base_delay, attempt);
                    warn!(
                        code = err.code(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "narrative provider failed, retrying"
                    );
                    last_error = Some(err);
                    sleep(delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ProviderError::provider("narrative", "unknown", "unknown error", false)
        }))
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u64.pow(attempt.min(5));
    base * multiplier as u32
}

/// Generate with the gateway and degrade to the deterministic template when
/// the provider is unavailable. Never propagates a provider failure.
pub async fn generate_or_fallback<G: NarrativeGateway>(
    gateway: &G,
    req: &NarrativeRequest,
) -> NarrativeDraft {
    match gateway.generate(req).await {
        Ok(draft) => draft,
        Err(err) => {
            warn!(
                code = err.code(),
                error = %err,
                "narrative provider exhausted, using deterministic template"
            );
            template_draft(&req.canonical, &req.team_state, &req.top_drivers)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        calls: AtomicU32,
        fail_times: u32,
        retryable: bool,
    }

    #[async_trait::async_trait]
    impl NarrativeGateway for FlakyProvider {
        async fn generate(&self, req: &NarrativeRequest) -> Result<NarrativeDraft, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                return Err(ProviderError::provider(
                    "test",
                    "m",
                    "transient",
                    self.retryable,
                ));
            }
            Ok(NarrativeDraft {
                narrative: format!("ok for {}", req.canonical.team_id),
                claims: vec![],
            })
        }
    }

    fn request() -> NarrativeRequest {
        NarrativeRequest {
            canonical: CanonicalInputData {
                org_id: "acme".into(),
                team_id: "platform".into(),
                week_start_iso: "2026-07-27".into(),
                users: Default::default(),
            },
            team_state: "at_risk".into(),
            top_drivers: vec!["emotional_load".into()],
        }
    }

    #[tokio::test]
    async fn retryable_failure_is_retried_to_success() {
        let gateway = RetryingGateway::with_config(
            FlakyProvider {
                calls: AtomicU32::new(0),
                fail_times: 2,
                retryable: true,
            },
            GatewayConfig {
                max_retries: 2,
                retry_base_delay: Duration::from_millis(1),
            },
        );
        let draft = gateway.generate(&request()).await.unwrap();
        assert_eq!(draft.narrative, "ok for platform");
    }

    #[tokio::test]
    async fn non_retryable_failure_fails_fast() {
        let provider = FlakyProvider {
            calls: AtomicU32::new(0),
            fail_times: 10,
            retryable: false,
        };
        let gateway = RetryingGateway::with_config(
            provider,
            GatewayConfig {
                max_retries: 3,
                retry_base_delay: Duration::from_millis(1),
            },
        );
        let err = gateway.generate(&request()).await.unwrap_err();
        assert_eq!(err.code(), "provider_error");
        // Exactly one call: no retries on a permanent failure.
        assert_eq!(gateway.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_fall_back_to_template() {
        let gateway = RetryingGateway::with_config(
            FlakyProvider {
                calls: AtomicU32::new(0),
                fail_times: 10,
                retryable: true,
            },
            GatewayConfig {
                max_retries: 1,
                retry_base_delay: Duration::from_millis(1),
            },
        );
        let draft = generate_or_fallback(&gateway, &request()).await;
        assert!(!draft.narrative.is_empty());
        assert!(!draft.claims.is_empty());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(8));
        assert_eq!(backoff_delay(base, 9), Duration::from_secs(32));
    }
}
