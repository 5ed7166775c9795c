//! Credential gate: wait until the instance-metadata service hands out
//! IAM credentials before anything is launched.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{info, warn};

use crate::error::{InitError, InitResult, ProbeError};

pub const DEFAULT_CREDENTIALS_URL: &str =
    "http://169.254.169.254/latest/meta-data/iam/security-credentials";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Retry budget for the credential gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPolicy {
    pub url: String,
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self {
            url: DEFAULT_CREDENTIALS_URL.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// The gate passed. `attempts` counts the successful probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    pub attempts: u32,
}

/// Something that can be asked whether credentials are available yet.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn probe(&self) -> Result<(), ProbeError>;
}

/// Probes the instance-metadata credentials endpoint over HTTP.
pub struct MetadataClient {
    client: Client,
    url: String,
}

impl MetadataClient {
    pub fn new(policy: &CredentialPolicy) -> InitResult<Self> {
        let client = Client::builder()
            .timeout(policy.attempt_timeout)
            .build()
            .map_err(|e| InitError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            url: policy.url.clone(),
        })
    }
}

#[async_trait]
impl CredentialSource for MetadataClient {
    async fn probe(&self) -> Result<(), ProbeError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ProbeError::Transport(e.to_string()))?;
        match resp.status() {
            StatusCode::OK => Ok(()),
            status => Err(ProbeError::Status(status.as_u16())),
        }
    }
}

/// Probe `source` until it succeeds or `policy.max_attempts` probes have failed.
///
/// Every failed attempt is logged and followed by `policy.retry_delay`.
pub async fn await_credentials(
    source: &dyn CredentialSource,
    policy: &CredentialPolicy,
) -> InitResult<Ready> {
    let max_attempts = policy.max_attempts;
    for attempt in 1..=max_attempts {
        match source.probe().await {
            Ok(()) => {
                info!(attempt, "got successful response from iam instance profile, continuing");
                return Ok(Ready { attempts: attempt });
            }
            Err(e) => {
                warn!(
                    attempt,
                    max_attempts,
                    error = %e,
                    "failed to get credentials. attempt {attempt} of {max_attempts}"
                );
            }
        }
        tokio::time::sleep(policy.retry_delay).await;
    }

    Err(InitError::CredentialsExhausted {
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` probes, then succeeds.
    struct FlakySource {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakySource {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialSource for FlakySource {
        async fn probe(&self) -> Result<(), ProbeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                Err(ProbeError::Status(404))
            } else {
                Ok(())
            }
        }
    }

    fn policy_for(url: String) -> CredentialPolicy {
        CredentialPolicy {
            url,
            max_attempts: 3,
            attempt_timeout: Duration::from_millis(500),
            retry_delay: Duration::from_millis(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ready_on_first_success() {
        let source = FlakySource::new(0);
        let ready = await_credentials(&source, &CredentialPolicy::default())
            .await
            .unwrap();
        assert_eq!(ready.attempts, 1);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_after_nineteen_failures() {
        let source = FlakySource::new(19);
        let ready = await_credentials(&source, &CredentialPolicy::default())
            .await
            .unwrap();
        assert_eq!(ready.attempts, 20);
        assert_eq!(source.calls(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_after_max_attempts() {
        let source = FlakySource::new(u32::MAX);
        let result = await_credentials(&source, &CredentialPolicy::default()).await;
        assert!(matches!(
            result,
            Err(InitError::CredentialsExhausted { attempts: 20 })
        ));
        assert_eq!(source.calls(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempts_wait_retry_delay() {
        let source = FlakySource::new(2);
        let start = tokio::time::Instant::now();
        await_credentials(&source, &CredentialPolicy::default())
            .await
            .unwrap();
        assert!(start.elapsed() >= 2 * DEFAULT_RETRY_DELAY);
        assert!(start.elapsed() < 3 * DEFAULT_RETRY_DELAY);
    }

    #[tokio::test]
    async fn metadata_client_accepts_200() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/latest/meta-data/iam/security-credentials");
                then.status(200).body("my-role");
            })
            .await;

        let client =
            MetadataClient::new(&policy_for(server.url("/latest/meta-data/iam/security-credentials")))
                .unwrap();
        assert!(client.probe().await.is_ok());
        mock.assert_calls_async(1).await;
    }

    #[tokio::test]
    async fn metadata_client_rejects_other_success_codes() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/creds");
                then.status(204);
            })
            .await;

        let client = MetadataClient::new(&policy_for(server.url("/creds"))).unwrap();
        assert!(matches!(client.probe().await, Err(ProbeError::Status(204))));
    }

    #[tokio::test]
    async fn gate_retries_against_failing_endpoint() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/creds");
                then.status(500);
            })
            .await;

        let policy = policy_for(server.url("/creds"));
        let client = MetadataClient::new(&policy).unwrap();
        let result = await_credentials(&client, &policy).await;

        assert!(matches!(
            result,
            Err(InitError::CredentialsExhausted { attempts: 3 })
        ));
        mock.assert_calls_async(3).await;
    }

    #[tokio::test]
    async fn metadata_client_reports_transport_errors() {
        // Nothing listens on port 1.
        let client = MetadataClient::new(&policy_for("http://127.0.0.1:1/creds".into())).unwrap();
        assert!(matches!(
            client.probe().await,
            Err(ProbeError::Transport(_))
        ));
    }
}
