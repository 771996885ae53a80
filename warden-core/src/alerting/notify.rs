//! Notification channels behind the admission gate.
//!
//! Every channel implements [`Notifier`]; the gate consults each channel's
//! filter during admission, then fans the alert out to the accepters.
//! In tests, a trait abstracts the webhook HTTP call.

use super::{Alert, AlertPriority, ChannelFilter};
use crate::config::WebhookChannelConfig;
use crate::error::AlertError;
use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

/// A delivery channel for admitted alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Stable channel name, used in admission results and logs.
    fn name(&self) -> &str;

    /// Filter the gate consults before offering this channel an alert.
    fn filter(&self) -> &ChannelFilter;

    async fn send(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// Channel that writes alerts into the structured log. Always configured,
/// so an admitted alert is never silently lost even with no webhook set up.
#[derive(Default)]
pub struct LogNotifier {
    filter: ChannelFilter,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(filter: ChannelFilter) -> Self {
        Self { filter }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn filter(&self) -> &ChannelFilter {
        &self.filter
    }

    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        match alert.priority {
            AlertPriority::Critical | AlertPriority::High => warn!(
                alert_id = %alert.alert_id,
                priority = %alert.priority,
                source = %alert.source,
                message = %alert.message,
                "ALERT: {}", alert.title
            ),
            _ => info!(
                alert_id = %alert.alert_id,
                priority = %alert.priority,
                source = %alert.source,
                message = %alert.message,
                "ALERT: {}", alert.title
            ),
        }
        Ok(())
    }
}

/// Trait for webhook HTTP delivery.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post_json(&self, url: &str, payload: &serde_json::Value) -> Result<(), String>;
}

/// Real webhook transport using reqwest.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookTransport for ReqwestTransport {
    async fn post_json(&self, url: &str, payload: &serde_json::Value) -> Result<(), String> {
        let resp = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| format!("HTTP error: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("Webhook POST failed ({status}): {body}"));
        }
        Ok(())
    }
}

/// Channel that POSTs the alert as JSON to a configured URL.
pub struct WebhookNotifier {
    url: String,
    filter: ChannelFilter,
    transport: Box<dyn WebhookTransport>,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookChannelConfig, transport: Box<dyn WebhookTransport>) -> Self {
        Self {
            url: config.url.clone(),
            filter: ChannelFilter {
                critical_only: config.critical_only,
                min_severity: config.min_severity,
            },
            transport,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    fn filter(&self) -> &ChannelFilter {
        &self.filter
    }

    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let payload = json!({
            "alert_id": alert.alert_id,
            "title": alert.title,
            "message": alert.message,
            "priority": alert.priority,
            "severity": alert.severity,
            "source": alert.source,
            "details": alert.details,
            "created_at": alert.created_at.to_rfc3339(),
        });
        self.transport
            .post_json(&self.url, &payload)
            .await
            .map_err(|message| AlertError::ChannelSend {
                channel: self.name().to_string(),
                message,
            })
    }
}

/// Create a webhook notifier with a real HTTP transport.
pub fn create_webhook_notifier(config: &WebhookChannelConfig) -> WebhookNotifier {
    WebhookNotifier::new(config, Box::new(ReqwestTransport::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::AlertSeverity;
    use std::sync::Mutex;

    struct MockTransport {
        posts: Mutex<Vec<(String, serde_json::Value)>>,
        fail_with: Option<String>,
    }

    impl MockTransport {
        fn ok() -> Self {
            Self {
                posts: Mutex::new(Vec::new()),
                fail_with: None,
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                posts: Mutex::new(Vec::new()),
                fail_with: Some(message.to_string()),
            }
        }
    }

    #[async_trait]
    impl WebhookTransport for MockTransport {
        async fn post_json(&self, url: &str, payload: &serde_json::Value) -> Result<(), String> {
            if let Some(message) = &self.fail_with {
                return Err(message.clone());
            }
            self.posts
                .lock()
                .unwrap()
                .push((url.to_string(), payload.clone()));
            Ok(())
        }
    }

    fn webhook_config() -> WebhookChannelConfig {
        WebhookChannelConfig {
            enabled: true,
            url: "https://hooks.example.test/warden".to_string(),
            critical_only: false,
            min_severity: None,
        }
    }

    fn sample_alert() -> Alert {
        Alert::new(
            "Process terminated",
            "warden killed suspicious process",
            AlertPriority::High,
            AlertSeverity::High,
            "response_engine",
        )
    }

    #[tokio::test]
    async fn test_webhook_payload_contents() {
        struct Capture(std::sync::Arc<Mutex<Vec<(String, serde_json::Value)>>>);

        #[async_trait]
        impl WebhookTransport for Capture {
            async fn post_json(
                &self,
                url: &str,
                payload: &serde_json::Value,
            ) -> Result<(), String> {
                self.0.lock().unwrap().push((url.to_string(), payload.clone()));
                Ok(())
            }
        }

        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let notifier = WebhookNotifier::new(&webhook_config(), Box::new(Capture(seen.clone())));
        let alert = sample_alert();
        notifier.send(&alert).await.unwrap();

        let posts = seen.lock().unwrap();
        assert_eq!(posts.len(), 1);
        let (url, payload) = &posts[0];
        assert_eq!(url, "https://hooks.example.test/warden");
        assert_eq!(payload["title"], "Process terminated");
        assert_eq!(payload["priority"], "high");
        assert_eq!(payload["alert_id"], alert.alert_id.as_str());
    }

    #[tokio::test]
    async fn test_webhook_failure_maps_to_channel_error() {
        let notifier = WebhookNotifier::new(
            &webhook_config(),
            Box::new(MockTransport::failing("Webhook POST failed (500): boom")),
        );
        let err = notifier.send(&sample_alert()).await.unwrap_err();
        match err {
            AlertError::ChannelSend { channel, message } => {
                assert_eq!(channel, "webhook");
                assert!(message.contains("500"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_webhook_filter_from_config() {
        let config = WebhookChannelConfig {
            enabled: true,
            url: "https://hooks.example.test/warden".to_string(),
            critical_only: true,
            min_severity: None,
        };
        let notifier = WebhookNotifier::new(&config, Box::new(MockTransport::ok()));
        assert!(!notifier.filter().accepts(&sample_alert()));
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        let notifier = LogNotifier::new();
        assert_eq!(notifier.name(), "log");
        assert!(notifier.send(&sample_alert()).await.is_ok());
    }
}
