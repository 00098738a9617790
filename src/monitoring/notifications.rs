//! Alert notification channels

use super::types::Alert;
use crate::config::{EmailConfig, WebhookConfig};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Destination for alert notifications
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, alert: &Alert) -> Result<()>;
}

/// POSTs the alert payload as JSON
pub struct WebhookChannel {
    client: Client,
    config: WebhookConfig,
}

impl WebhookChannel {
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout.max(1)))
            .use_rustls_tls()
            .build()
            .map_err(|e| GatewayError::transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let mut request = self.client.post(&self.config.url).json(&alert.payload());
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::transport(format!(
                "Webhook {} answered {}",
                self.config.url, status
            )));
        }
        debug!("Delivered alert {} to webhook {}", alert.id, self.config.url);
        Ok(())
    }
}

/// A rendered alert e-mail
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Delivers rendered e-mails; SMTP or an API lives behind this
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, message: &EmailMessage) -> Result<()>;
}

/// Sender that only writes the e-mail to the log
#[derive(Debug, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send_email(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to = %message.to.join(","),
            subject = %message.subject,
            "📧 [ALERT] e-mail notification"
        );
        Ok(())
    }
}

pub struct EmailChannel {
    config: EmailConfig,
    sender: Arc<dyn EmailSender>,
}

impl EmailChannel {
    pub fn new(config: EmailConfig, sender: Arc<dyn EmailSender>) -> Self {
        Self { config, sender }
    }

    pub fn render(&self, alert: &Alert) -> EmailMessage {
        let prefix = self.config.subject_prefix.as_deref().unwrap_or("[MCP Gateway]");
        let subject = format!(
            "{} {} alert: {} on {}",
            prefix,
            alert.severity.to_string().to_uppercase(),
            alert.alert_type,
            alert.server_name
        );

        let mut body = format!(
            "{}\n\nServer: {}\nSeverity: {}\nTime: {}\nAlert ID: {}\n",
            alert.message,
            alert.server_name,
            alert.severity,
            alert.timestamp.to_rfc3339(),
            alert.id
        );
        if let Some(value) = alert.value {
            body.push_str(&format!("Value: {}\n", value));
        }
        if let Some(threshold) = alert.threshold {
            body.push_str(&format!("Threshold: {}\n", threshold));
        }

        EmailMessage {
            from: self.config.from.clone(),
            to: self.config.to.clone(),
            subject,
            body,
        }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        if self.config.to.is_empty() {
            return Ok(());
        }
        self.sender.send_email(&self.render(alert)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::Severity;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingSender {
        sent: Mutex<Vec<EmailMessage>>,
    }

    #[async_trait]
    impl EmailSender for CapturingSender {
        async fn send_email(&self, message: &EmailMessage) -> Result<()> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn alert() -> Alert {
        Alert {
            id: "alert-1".into(),
            timestamp: Utc::now(),
            alert_type: "high_error_rate".into(),
            severity: Severity::High,
            server_name: "fs".into(),
            message: "Error rate 60.0% exceeds 10.0%".into(),
            value: Some(0.6),
            threshold: Some(0.1),
            metadata: json!({}),
            acknowledged: false,
            resolved_at: None,
        }
    }

    #[tokio::test]
    async fn test_email_channel_renders_subject_and_body() {
        let sender = Arc::new(CapturingSender::default());
        let channel = EmailChannel::new(
            EmailConfig {
                from: "gateway@example.com".into(),
                to: vec!["ops@example.com".into()],
                subject_prefix: Some("[prod]".into()),
            },
            sender.clone(),
        );

        channel.send(&alert()).await.unwrap();
        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "[prod] HIGH alert: high_error_rate on fs");
        assert!(sent[0].body.contains("Threshold: 0.1"));
        assert_eq!(sent[0].to, vec!["ops@example.com".to_string()]);
    }

    #[test]
    fn test_payload_shape() {
        let payload = alert().payload();
        assert_eq!(payload["type"], "high_error_rate");
        assert_eq!(payload["severity"], "high");
        assert_eq!(payload["serverName"], "fs");
        assert!(payload.get("acknowledged").is_none());
    }
}
