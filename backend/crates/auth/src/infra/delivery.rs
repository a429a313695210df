//! Delivery adapters
//!
//! `LogDelivery` writes messages to the log (development). `WebhookDelivery`
//! posts a JSON envelope to an external sender. `DeliveryClient` picks one
//! at startup.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;

use crate::application::delivery::{
    DeliveryError, DeliveryMessage, DeliveryOutcome, DeliveryService,
};

/// Logs every message and reports it as sent. Never use in production:
/// codes end up in the log.
#[derive(Debug, Clone, Default)]
pub struct LogDelivery;

impl DeliveryService for LogDelivery {
    async fn send(&self, message: &DeliveryMessage) -> Result<DeliveryOutcome, DeliveryError> {
        tracing::info!(
            channel = message.channel.code(),
            recipient = %message.recipient,
            subject = %message.subject,
            body = %message.body,
            "Delivery (log only)"
        );
        Ok(DeliveryOutcome { sent: true })
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    channel: &'a str,
    recipient: &'a str,
    subject: &'a str,
    body: &'a str,
}

/// POSTs messages to a webhook. Any non-2xx answer is `sent = false`.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    client: Client,
    url: String,
}

impl WebhookDelivery {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    fn sanitize(error: &reqwest::Error) -> String {
        if error.is_timeout() {
            "request timed out".to_string()
        } else if error.is_connect() {
            "connection refused or unreachable".to_string()
        } else {
            "request failed".to_string()
        }
    }
}

impl DeliveryService for WebhookDelivery {
    async fn send(&self, message: &DeliveryMessage) -> Result<DeliveryOutcome, DeliveryError> {
        let envelope = Envelope {
            channel: message.channel.code(),
            recipient: &message.recipient,
            subject: &message.subject,
            body: &message.body,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(Self::sanitize(&e)))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                channel = message.channel.code(),
                status = status.as_u16(),
                "Delivery webhook refused message"
            );
        }
        Ok(DeliveryOutcome {
            sent: status.is_success(),
        })
    }
}

/// Delivery adapter chosen from configuration
#[derive(Debug, Clone)]
pub enum DeliveryClient {
    Log(LogDelivery),
    Webhook(WebhookDelivery),
}

impl DeliveryService for DeliveryClient {
    async fn send(&self, message: &DeliveryMessage) -> Result<DeliveryOutcome, DeliveryError> {
        match self {
            Self::Log(inner) => inner.send(message).await,
            Self::Webhook(inner) => inner.send(message).await,
        }
    }
}
