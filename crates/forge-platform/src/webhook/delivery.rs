// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Webhook delivery engine.
//!
//! Sends payloads to consumer webhooks with HMAC signing, a fixed retry
//! schedule, and a per-URL circuit breaker. Delivery is synchronous and
//! in-order within one request's pump; the circuit map is the only
//! process-wide state and is advisory (it is rebuilt lazily after a
//! restart).

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::{Payload, WebhookConfig};

type HmacSha256 = Hmac<Sha256>;

/// Delay before each delivery attempt. Attempt 1 is immediate.
pub const RETRY_DELAYS: [Duration; 5] = [
    Duration::ZERO,
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(30),
    Duration::from_secs(60),
];

/// User-Agent header on every outbound POST.
const PLATFORM_USER_AGENT: &str = "Forge-Platform/1.0";

/// Response body excerpt cap for error reporting.
const BODY_EXCERPT_BYTES: usize = 1024;

/// Lifetime of a detached [`DeliveryEngine::deliver_async`] task.
const ASYNC_DELIVERY_TIMEOUT: Duration = Duration::from_secs(120);

/// Delivery policy knobs.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Per-attempt HTTP timeout.
    pub timeout: Duration,
    /// Attempt cap for synchronous delivery; clamped to the delay table.
    pub max_retries: usize,
    /// Consecutive failures before a URL's circuit opens.
    pub circuit_threshold: u32,
    /// How long an opened circuit stays open.
    pub circuit_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 5,
            circuit_threshold: 5,
            circuit_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&crate::config::Config> for DeliveryConfig {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            timeout: config.webhook_timeout,
            max_retries: config.webhook_max_retries,
            circuit_threshold: config.webhook_circuit_threshold,
            circuit_timeout: config.webhook_circuit_timeout,
        }
    }
}

/// Errors from webhook delivery.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WebhookError {
    /// The destination URL's circuit is open; no attempt was made.
    #[error("circuit breaker open for {url}")]
    CircuitOpen {
        /// The destination URL.
        url: String,
    },

    /// The consumer answered 4xx; the payload is not retried.
    #[error("webhook returned status {status}: {body}")]
    ClientError {
        /// HTTP status code.
        status: u16,
        /// First KiB of the response body.
        body: String,
        /// Attempts made, always 1 more than the retries that preceded it.
        attempts: u32,
    },

    /// All attempts failed with transient errors.
    #[error("webhook delivery failed after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// The last underlying cause.
        last_error: String,
    },

    /// The HTTP client could not be constructed.
    #[error("building webhook client: {0}")]
    BuildClient(#[from] reqwest::Error),
}

impl WebhookError {
    /// Attempts actually made before this error.
    pub fn attempts(&self) -> u32 {
        match self {
            WebhookError::CircuitOpen { .. } | WebhookError::BuildClient(_) => 0,
            WebhookError::ClientError { attempts, .. } => *attempts,
            WebhookError::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Receipt for a successful delivery.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryReceipt {
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// HTTP status of the successful attempt.
    pub status: u16,
}

/// Advisory view of one URL's circuit state.
#[derive(Debug, Clone, Copy, Default)]
pub struct CircuitSnapshot {
    /// Consecutive failed attempts against the URL.
    pub failures: u32,
    /// Deadline until which the circuit is open, if any.
    pub open_until: Option<DateTime<Utc>>,
    /// When the URL last failed a delivery attempt.
    pub last_failed: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct CircuitState {
    failures: u32,
    open_until: Option<DateTime<Utc>>,
    last_failed: Option<DateTime<Utc>>,
}

enum AttemptOutcome {
    Delivered(u16),
    ClientError { status: u16, body: String },
    Failed(String),
}

/// Signs, sends, retries, and circuit-breaks webhook deliveries.
pub struct DeliveryEngine {
    client: reqwest::Client,
    config: DeliveryConfig,
    // Keyed by webhook URL. Held only to read or update the small state
    // tuple, never across I/O.
    circuits: RwLock<HashMap<String, CircuitState>>,
}

impl DeliveryEngine {
    /// Build an engine with the given policy.
    pub fn new(config: DeliveryConfig) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            config,
            circuits: RwLock::new(HashMap::new()),
        })
    }

    /// Deliver a payload synchronously with retries.
    ///
    /// Returns without any HTTP call when the URL's circuit is open. A 2xx
    /// answer stops the loop and closes the circuit; a 4xx answer stops the
    /// loop without retrying (a client error is the consumer's problem, not
    /// a transient fault); anything else consumes the retry schedule.
    pub async fn deliver(
        &self,
        webhook_cfg: &WebhookConfig,
        payload: &Payload,
    ) -> Result<DeliveryReceipt, WebhookError> {
        if self.is_circuit_open(&webhook_cfg.url).await {
            warn!(
                webhook_url = %webhook_cfg.url,
                request_id = %payload.request_id,
                "circuit breaker open, skipping delivery"
            );
            return Err(WebhookError::CircuitOpen {
                url: webhook_cfg.url.clone(),
            });
        }

        let attempts = attempt_cap(self.config.max_retries);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            let delay = RETRY_DELAYS[attempt];
            if !delay.is_zero() {
                debug!(
                    attempt = attempt + 1,
                    delay_secs = delay.as_secs(),
                    request_id = %payload.request_id,
                    "retrying webhook delivery"
                );
                tokio::time::sleep(delay).await;
            }

            match self.deliver_once(webhook_cfg, payload).await {
                AttemptOutcome::Delivered(status) => {
                    self.record_success(&webhook_cfg.url).await;
                    return Ok(DeliveryReceipt {
                        attempts: attempt as u32 + 1,
                        status,
                    });
                }
                AttemptOutcome::ClientError { status, body } => {
                    self.record_failure(&webhook_cfg.url).await;
                    warn!(
                        status_code = status,
                        request_id = %payload.request_id,
                        "webhook returned client error, not retrying"
                    );
                    return Err(WebhookError::ClientError {
                        status,
                        body,
                        attempts: attempt as u32 + 1,
                    });
                }
                AttemptOutcome::Failed(cause) => {
                    self.record_failure(&webhook_cfg.url).await;
                    last_error = cause;
                }
            }
        }

        Err(WebhookError::Exhausted {
            attempts: attempts as u32,
            last_error,
        })
    }

    /// Deliver a payload on a detached task with a bounded lifetime.
    ///
    /// Failures are logged, never reported: the 202 was already sent and a
    /// webhook is the only remaining channel to the consumer.
    pub fn deliver_async(self: std::sync::Arc<Self>, webhook_cfg: WebhookConfig, payload: Payload) {
        let engine = self;
        tokio::spawn(async move {
            let result =
                tokio::time::timeout(ASYNC_DELIVERY_TIMEOUT, engine.deliver(&webhook_cfg, &payload))
                    .await;
            match result {
                Ok(Ok(_)) => {}
                Ok(Err(error)) => error!(
                    %error,
                    request_id = %payload.request_id,
                    webhook_url = %webhook_cfg.url,
                    "async webhook delivery failed"
                ),
                Err(_) => error!(
                    request_id = %payload.request_id,
                    webhook_url = %webhook_cfg.url,
                    "async webhook delivery timed out"
                ),
            }
        });
    }

    /// One POST to the webhook, classified.
    async fn deliver_once(&self, webhook_cfg: &WebhookConfig, payload: &Payload) -> AttemptOutcome {
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(error) => return AttemptOutcome::Failed(format!("serializing payload: {}", error)),
        };

        let mut request = self
            .client
            .post(&webhook_cfg.url)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, PLATFORM_USER_AGENT);

        if !webhook_cfg.secret.is_empty() {
            let timestamp = Utc::now().timestamp().to_string();
            let signature = compute_signature(&webhook_cfg.secret, &timestamp, &body);
            request = request
                .header("X-Forge-Signature", format!("sha256={}", signature))
                .header("X-Forge-Timestamp", timestamp);
        }

        let response = match request.body(body).send().await {
            Ok(response) => response,
            Err(error) => return AttemptOutcome::Failed(format!("sending request: {}", error)),
        };

        let status = response.status();
        if status.is_success() {
            debug!(
                request_id = %payload.request_id,
                status_code = status.as_u16(),
                "webhook delivered successfully"
            );
            return AttemptOutcome::Delivered(status.as_u16());
        }

        let bytes = response.bytes().await.unwrap_or_default();
        let excerpt =
            String::from_utf8_lossy(&bytes[..bytes.len().min(BODY_EXCERPT_BYTES)]).into_owned();

        warn!(
            request_id = %payload.request_id,
            status_code = status.as_u16(),
            response_body = %excerpt,
            "webhook delivery failed"
        );

        if status.is_client_error() {
            AttemptOutcome::ClientError {
                status: status.as_u16(),
                body: excerpt,
            }
        } else {
            AttemptOutcome::Failed(format!(
                "webhook returned status {}: {}",
                status.as_u16(),
                excerpt
            ))
        }
    }

    /// Whether a URL's circuit is currently open.
    pub async fn is_circuit_open(&self, url: &str) -> bool {
        let circuits = self.circuits.read().await;
        match circuits.get(url).and_then(|state| state.open_until) {
            Some(open_until) => open_until > Utc::now(),
            None => false,
        }
    }

    /// Account one failed attempt against a URL, opening the circuit at the
    /// configured threshold.
    pub async fn record_failure(&self, url: &str) {
        let mut circuits = self.circuits.write().await;
        let state = circuits.entry(url.to_string()).or_default();

        state.failures += 1;
        state.last_failed = Some(Utc::now());

        if state.failures >= self.config.circuit_threshold {
            let open_until = Utc::now()
                + chrono::Duration::from_std(self.config.circuit_timeout)
                    .unwrap_or_else(|_| chrono::Duration::seconds(60));
            state.open_until = Some(open_until);
            warn!(
                webhook_url = %url,
                failures = state.failures,
                open_until = %open_until,
                "circuit breaker opened"
            );
        }
    }

    /// Account a successful delivery: the failure count resets and any open
    /// circuit closes.
    pub async fn record_success(&self, url: &str) {
        let mut circuits = self.circuits.write().await;
        if let Some(state) = circuits.get_mut(url) {
            if state.failures > 0 {
                info!(webhook_url = %url, "circuit breaker reset after success");
            }
            state.failures = 0;
            state.open_until = None;
        }
    }

    /// Advisory snapshot of a URL's circuit state.
    pub async fn circuit_snapshot(&self, url: &str) -> CircuitSnapshot {
        let circuits = self.circuits.read().await;
        circuits
            .get(url)
            .map(|state| CircuitSnapshot {
                failures: state.failures,
                open_until: state.open_until,
                last_failed: state.last_failed,
            })
            .unwrap_or_default()
    }
}

/// Effective attempt count: capped by the delay table and never zero. A
/// cap of 0 still means one attempt.
fn attempt_cap(max_retries: usize) -> usize {
    max_retries.min(RETRY_DELAYS.len()).max(1)
}

fn compute_signature(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
