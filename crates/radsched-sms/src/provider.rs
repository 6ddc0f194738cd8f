// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Standardized error taxonomy across all SMS vendors.
///
/// The split that matters operationally: carrier-side trouble (failover
/// to the backup vendor) versus recipient-side trouble (failover would
/// just fail again and risks double-texting a patient).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StandardError {
    InvalidNumber,
    NumberBlocked,
    CarrierViolation,
    RateLimited,
    ProviderError,
    NetworkError,
    InvalidContent,
    Undeliverable,
    Unknown,
}

impl StandardError {
    /// Whether this error class warrants one attempt on the failover
    /// provider. Recipient-side errors never fail over.
    pub fn is_failover_eligible(&self) -> bool {
        matches!(
            self,
            Self::NumberBlocked
                | Self::CarrierViolation
                | Self::RateLimited
                | Self::ProviderError
                | Self::NetworkError
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidNumber => "INVALID_NUMBER",
            Self::NumberBlocked => "NUMBER_BLOCKED",
            Self::CarrierViolation => "CARRIER_VIOLATION",
            Self::RateLimited => "RATE_LIMITED",
            Self::ProviderError => "PROVIDER_ERROR",
            Self::NetworkError => "NETWORK_ERROR",
            Self::InvalidContent => "INVALID_CONTENT",
            Self::Undeliverable => "UNDELIVERABLE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendStatus {
    Queued,
    Sent,
    Delivered,
    Failed,
}

/// Result of one send attempt on one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendOutcome {
    pub provider_message_id: Option<String>,
    pub status: SendStatus,
    pub provider: String,
    pub error_code: Option<StandardError>,
    pub error_message: Option<String>,
}

impl SendOutcome {
    pub fn accepted(provider: &str, message_id: String) -> Self {
        Self {
            provider_message_id: Some(message_id),
            status: SendStatus::Queued,
            provider: provider.to_string(),
            error_code: None,
            error_message: None,
        }
    }

    pub fn failed(provider: &str, code: StandardError, message: impl Into<String>) -> Self {
        Self {
            provider_message_id: None,
            status: SendStatus::Failed,
            provider: provider.to_string(),
            error_code: Some(code),
            error_message: Some(message.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == SendStatus::Failed
    }
}

/// One SMS vendor.
///
/// `send` never returns `Err`: transport problems are reported inside the
/// outcome as `NETWORK_ERROR`, so the dispatcher handles every failure
/// through one path.
#[async_trait]
pub trait SmsProvider: Send + Sync {
    /// Provider name as referenced by tenant configuration.
    fn name(&self) -> &str;

    fn is_enabled(&self) -> bool {
        true
    }

    async fn send(&self, to: &str, body: &str, from: &str) -> SendOutcome;
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
