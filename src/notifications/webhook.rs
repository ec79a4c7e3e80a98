//! # Webhook Client
//!
//! Posts [`NotificationEvent`]s as JSON and retries per a [`RetryPolicy`].
//! Status below 400 is success. 429 honours `Retry-After`. Any other 4xx is
//! terminal. 5xx and transport faults are retried until attempts run out.
//! Every outcome is captured in a [`DeliveryResult`] and nothing is raised.

use super::backoff::{next_delay, ResponseClass};
use crate::config::{NotificationSettings, SecuritySettings};
use crate::constants::system;
use crate::error::{BatchflowError, Result};
use crate::execution::RetryPolicy;
use crate::models::{DeliveryResult, DeliveryStatus, NotificationEvent};
use reqwest::Client;
use std::collections::HashMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: Client,
    auth_header: Option<(String, String)>,
}

struct Response {
    status: u16,
    headers: HashMap<String, String>,
    body: String,
}

impl WebhookClient {
    pub fn new(settings: &NotificationSettings, security: &SecuritySettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.http_timeout())
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| {
                BatchflowError::configuration(
                    format!("Failed to build HTTP client: {e}"),
                    "notifications.http_timeout_seconds",
                )
            })?;

        Ok(Self {
            client,
            auth_header: security
                .auth_header()
                .map(|(name, value)| (name.to_string(), value.to_string())),
        })
    }

    pub async fn deliver(&self, event: &NotificationEvent, policy: &RetryPolicy) -> DeliveryResult {
        let started = Instant::now();
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = self.send(event).await;

            let (class, response, error_message) = match outcome {
                Ok(response) => {
                    let class = ResponseClass::classify(response.status, &response.headers);
                    (class, Some(response), None)
                }
                Err(error) => (ResponseClass::ServerError, None, Some(error.to_string())),
            };

            debug!(
                event_id = %event.id,
                endpoint = %event.target_endpoint,
                attempt = attempt,
                status_code = ?response.as_ref().map(|r| r.status),
                "Webhook attempt finished"
            );

            let terminal = match class {
                ResponseClass::Success => Some(DeliveryStatus::Delivered),
                _ if !class.is_retryable() => Some(DeliveryStatus::Rejected),
                _ if attempt >= max_attempts => Some(match class {
                    ResponseClass::RateLimited { .. } => DeliveryStatus::RateLimited,
                    _ => DeliveryStatus::Failed,
                }),
                _ => None,
            };

            if let Some(status) = terminal {
                let result = Self::result(event, status, attempt, response, error_message, started);
                match status {
                    DeliveryStatus::Delivered => info!(
                        event_id = %event.id,
                        endpoint = %event.target_endpoint,
                        attempts = attempt,
                        "Webhook delivered"
                    ),
                    _ => warn!(
                        event_id = %event.id,
                        endpoint = %event.target_endpoint,
                        attempts = attempt,
                        status = ?status,
                        error = ?result.error_message,
                        "Webhook delivery failed"
                    ),
                }
                return result;
            }

            let retry_after = match class {
                ResponseClass::RateLimited { retry_after } => retry_after,
                _ => None,
            };
            let (delay, backoff_type) = next_delay(policy, attempt, retry_after);
            warn!(
                event_id = %event.id,
                attempt = attempt,
                max_attempts = max_attempts,
                delay_ms = delay.as_millis() as u64,
                backoff_type = ?backoff_type,
                "Webhook attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn send(&self, event: &NotificationEvent) -> std::result::Result<Response, reqwest::Error> {
        let mut request = self
            .client
            .post(&event.target_endpoint)
            .header("Content-Type", "application/json")
            .header("X-Event-Type", &event.event_type)
            .header("X-Priority", event.priority.to_string())
            .header("X-Timestamp", event.created_at.to_rfc3339())
            .json(&event.webhook_body());

        if let Some((name, value)) = &self.auth_header {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await.unwrap_or_default();

        Ok(Response {
            status,
            headers,
            body,
        })
    }

    fn result(
        event: &NotificationEvent,
        status: DeliveryStatus,
        attempts: u32,
        response: Option<Response>,
        transport_error: Option<String>,
        started: Instant,
    ) -> DeliveryResult {
        let (status_code, response_headers, response_body) = match response {
            Some(r) => (Some(r.status), r.headers, Some(truncate_body(r.body))),
            None => (None, HashMap::new(), None),
        };

        let error_message = match status {
            DeliveryStatus::Delivered => None,
            DeliveryStatus::RateLimited => Some(format!("Rate limited after {attempts} attempts")),
            DeliveryStatus::Rejected | DeliveryStatus::Failed => transport_error.or_else(|| {
                status_code.map(|code| format!("Webhook endpoint returned status {code}"))
            }),
        };

        DeliveryResult {
            event_id: event.id,
            endpoint: event.target_endpoint.clone(),
            status,
            success: status == DeliveryStatus::Delivered,
            attempts,
            status_code,
            response_headers,
            response_body,
            error_message,
            delivery_time_seconds: started.elapsed().as_secs_f64(),
        }
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() > system::MAX_CAPTURED_BODY_BYTES {
        let mut end = system::MAX_CAPTURED_BODY_BYTES;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

/// Delivery failures as typed errors, for callers that propagate them
impl DeliveryResult {
    pub fn into_result(self) -> Result<DeliveryResult> {
        match self.status {
            DeliveryStatus::Delivered => Ok(self),
            DeliveryStatus::RateLimited => Err(BatchflowError::RateLimitError {
                attempts: self.attempts,
                retry_after_seconds: self
                    .response_headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("retry-after"))
                    .and_then(|(_, v)| v.trim().parse().ok()),
            }),
            DeliveryStatus::Rejected | DeliveryStatus::Failed => {
                Err(BatchflowError::NotificationDeliveryError {
                    message: self
                        .error_message
                        .unwrap_or_else(|| "delivery failed".to_string()),
                    endpoint: self.endpoint,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_truncation_respects_char_boundaries() {
        let body = "é".repeat(600);
        let truncated = truncate_body(body);
        assert!(truncated.len() <= system::MAX_CAPTURED_BODY_BYTES);
        assert_eq!(truncated.chars().count(), 500);
        assert_eq!(truncate_body("short".into()), "short");
    }

    #[test]
    fn test_delivery_result_into_result() {
        let event = NotificationEvent::new("workflow_failed", "wf", "http://hook.test");
        let rejected = WebhookClient::result(
            &event,
            DeliveryStatus::Rejected,
            1,
            Some(Response {
                status: 404,
                headers: HashMap::new(),
                body: "missing".into(),
            }),
            None,
            Instant::now(),
        );
        assert!(!rejected.success);
        assert_eq!(rejected.error_message.as_deref(), Some("Webhook endpoint returned status 404"));
        assert!(matches!(
            rejected.into_result(),
            Err(BatchflowError::NotificationDeliveryError { .. })
        ));
    }

    #[tokio::test]
    async fn test_client_attaches_api_key() {
        let security = SecuritySettings {
            api_key_header: "X-API-Key".into(),
            api_key: Some("secret".into()),
        };
        let client = WebhookClient::new(&NotificationSettings::default(), &security).unwrap();
        assert_eq!(
            client.auth_header,
            Some(("X-API-Key".to_string(), "secret".to_string()))
        );
    }
}
