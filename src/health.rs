//! Health-check protocol and the bounded online-poll loop.
//!
//! Polling is the only retry mechanism in the system: a fixed delay between
//! attempts, bounded by a configured attempt count, blocking the caller. The
//! probe sits behind a trait so tests inject scripted states with zero delay.

use std::time::Duration;

use async_trait::async_trait;

use crate::client::{classify_request_error, ApiClient};
use crate::clienv;
use crate::error::{OrchestratorError, Result};

#[derive(Debug)]
pub enum HealthState {
    /// Nothing is listening yet; worth retrying.
    Offline,
    /// The daemon answered in a way that will not self-resolve; abort.
    Error(OrchestratorError),
    /// The daemon is up.
    Online,
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self, expect_authenticated: bool) -> HealthState;
}

/// Probes `GET /api/v1/stackd/version` over the pinned-certificate client.
pub struct VersionProbe<'a> {
    client: &'a ApiClient,
}

impl<'a> VersionProbe<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HealthProbe for VersionProbe<'_> {
    async fn check(&self, expect_authenticated: bool) -> HealthState {
        let path = format!("/api/v1/{}/version", clienv::SERVICE_NAME);
        let resp = match self.client.get(&path).await {
            Ok(resp) => resp,
            Err(e) => {
                return match classify_request_error(&e) {
                    // A handshake failure will not self-resolve.
                    err @ OrchestratorError::Trust(_) => HealthState::Error(err),
                    OrchestratorError::Network(reason) => {
                        tracing::trace!(%reason, "Health check: offline");
                        HealthState::Offline
                    }
                    err => HealthState::Error(err),
                };
            }
        };

        let status = resp.status().as_u16();
        let body = resp.json::<serde_json::Value>().await.unwrap_or_default();
        classify_response(status, &body, expect_authenticated)
    }
}

/// Pure classification of a health-check response, per the protocol:
/// 401 means online when credentials exist, error when they should not yet be
/// required; a success body must carry a version field; anything else errors.
pub fn classify_response(
    status: u16,
    body: &serde_json::Value,
    expect_authenticated: bool,
) -> HealthState {
    if status == 401 {
        return if expect_authenticated {
            HealthState::Online
        } else {
            HealthState::Error(OrchestratorError::UnexpectedResponse(
                "daemon demands credentials before any were provisioned; \
                 delete and reinitialize the web service"
                    .to_string(),
            ))
        };
    }

    if !(200..300).contains(&status) {
        return HealthState::Error(OrchestratorError::UnexpectedResponse(format!(
            "HTTP {status}"
        )));
    }

    match body.get("version").and_then(|v| v.as_str()) {
        Some(version) if !version.is_empty() => {
            tracing::debug!(version, "Health check: online");
            HealthState::Online
        }
        _ => HealthState::Error(OrchestratorError::UnexpectedResponse(
            "response body has no version field".to_string(),
        )),
    }
}

/// Polls until the daemon reports online, an error state aborts, or the
/// attempt budget is exhausted. Exactly `retry_max` probes, never more.
pub async fn wait_online(
    probe: &dyn HealthProbe,
    expect_authenticated: bool,
    retry_max: u32,
    retry_delay: Duration,
) -> Result<()> {
    for attempt in 1..=retry_max {
        tracing::trace!(attempt, retry_max, "Polling health endpoint");
        match probe.check(expect_authenticated).await {
            HealthState::Online => {
                tracing::info!(attempt, "Web service is online");
                return Ok(());
            }
            HealthState::Error(e) => return Err(e),
            HealthState::Offline => {
                if attempt < retry_max {
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }

    Err(OrchestratorError::Network(format!(
        "web service did not come online after {retry_max} attempts; check the log at {}",
        clienv::web_log_path().display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays a fixed sequence of states and counts probe calls.
    struct ScriptedProbe {
        states: Mutex<Vec<HealthState>>,
        calls: AtomicU32,
    }

    impl ScriptedProbe {
        fn new(states: Vec<HealthState>) -> Self {
            let mut states = states;
            states.reverse();
            Self {
                states: Mutex::new(states),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn check(&self, _expect_authenticated: bool) -> HealthState {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.states
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(HealthState::Offline)
        }
    }

    #[tokio::test]
    async fn test_online_on_third_attempt_succeeds() {
        let probe = ScriptedProbe::new(vec![
            HealthState::Offline,
            HealthState::Offline,
            HealthState::Online,
        ]);
        wait_online(&probe, false, 3, Duration::ZERO).await.unwrap();
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test]
    async fn test_budget_exhausted_after_exactly_three_attempts() {
        let probe = ScriptedProbe::new(vec![
            HealthState::Offline,
            HealthState::Offline,
            HealthState::Offline,
        ]);
        let err = wait_online(&probe, false, 3, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Network(_)));
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test]
    async fn test_error_state_aborts_without_retry() {
        let probe = ScriptedProbe::new(vec![
            HealthState::Error(OrchestratorError::Trust("bad cert".to_string())),
            HealthState::Online,
        ]);
        let err = wait_online(&probe, false, 5, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Trust(_)));
        assert_eq!(probe.calls(), 1);
    }

    #[test]
    fn test_401_is_online_when_authenticated_expected() {
        let state = classify_response(401, &serde_json::Value::Null, true);
        assert!(matches!(state, HealthState::Online));
    }

    #[test]
    fn test_401_is_error_during_first_init() {
        let state = classify_response(401, &serde_json::Value::Null, false);
        assert!(matches!(
            state,
            HealthState::Error(OrchestratorError::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn test_version_body_is_online() {
        let body = serde_json::json!({ "version": "2.4.1" });
        assert!(matches!(
            classify_response(200, &body, false),
            HealthState::Online
        ));
    }

    #[test]
    fn test_other_shapes_are_errors() {
        let body = serde_json::json!({ "status": "ok" });
        assert!(matches!(
            classify_response(200, &body, false),
            HealthState::Error(_)
        ));
        assert!(matches!(
            classify_response(500, &serde_json::Value::Null, false),
            HealthState::Error(_)
        ));
    }
}
