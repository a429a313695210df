//! Delivery collaborator contract
//!
//! Email and SMS sending lives outside this crate. Adapters are in
//! `infra::delivery`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryChannel {
    Email,
    Sms,
}

impl DeliveryChannel {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
        }
    }
}

/// Channels requested for one code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryChannels {
    #[default]
    Email,
    Sms,
    Both,
}

impl DeliveryChannels {
    pub fn includes_sms(&self) -> bool {
        matches!(self, Self::Sms | Self::Both)
    }

    pub fn includes_email(&self) -> bool {
        matches!(self, Self::Email | Self::Both)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryMessage {
    pub channel: DeliveryChannel,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub sent: bool,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Delivery transport failed: {0}")]
    Transport(String),
    #[error("Delivery rejected: {0}")]
    Rejected(String),
}

#[trait_variant::make(DeliveryService: Send)]
pub trait LocalDeliveryService {
    async fn send(&self, message: &DeliveryMessage) -> Result<DeliveryOutcome, DeliveryError>;
}
