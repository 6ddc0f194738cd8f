// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::{SendOutcome, SmsProvider, StandardError};

/// Twilio Programmable Messaging adapter.
pub struct TwilioProvider {
    account_sid: String,
    auth_token: String,
    base_url: String,
    enabled: bool,
    client: reqwest::Client,
}

impl TwilioProvider {
    pub fn new(
        account_sid: String,
        auth_token: String,
        base_url: Option<String>,
        enabled: bool,
    ) -> Self {
        Self {
            account_sid,
            auth_token,
            base_url: base_url.unwrap_or_else(|| "https://api.twilio.com".into()),
            enabled,
            client: reqwest::Client::new(),
        }
    }

    /// Map a Twilio REST error code into the shared taxonomy.
    fn map_error_code(code: i64) -> StandardError {
        match code {
            // Malformed or non-mobile destination.
            21211 | 21614 | 30006 => StandardError::InvalidNumber,
            // Recipient opted out or number is on a block list.
            21610 | 30004 => StandardError::NumberBlocked,
            // Carrier filtered the message.
            30007 => StandardError::CarrierViolation,
            // Account or number level throughput exceeded.
            20429 | 21611 => StandardError::RateLimited,
            // Handset unreachable / delivery impossible.
            30003 | 30005 => StandardError::Undeliverable,
            // Body rejected (length, encoding, forbidden content).
            21617 | 21619 => StandardError::InvalidContent,
            _ => StandardError::Unknown,
        }
    }
}

#[async_trait]
impl SmsProvider for TwilioProvider {
    fn name(&self) -> &str {
        "twilio"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn send(&self, to: &str, body: &str, from: &str) -> SendOutcome {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        );
        let form = [("To", to), ("From", from), ("Body", body)];

        let resp = match self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return SendOutcome::failed(self.name(), StandardError::NetworkError, e.to_string())
            }
        };

        let status = resp.status();
        let payload: Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => {
                return SendOutcome::failed(self.name(), StandardError::NetworkError, e.to_string())
            }
        };

        if status.is_success() {
            let sid = payload["sid"].as_str().unwrap_or_default().to_string();
            debug!(sid, "twilio accepted message");
            return SendOutcome::accepted(self.name(), sid);
        }

        if status.is_server_error() {
            return SendOutcome::failed(
                self.name(),
                StandardError::ProviderError,
                format!("HTTP {status}"),
            );
        }

        let code = payload["code"].as_i64().unwrap_or(0);
        let message = payload["message"].as_str().unwrap_or("unknown").to_string();
        SendOutcome::failed(self.name(), Self::map_error_code(code), message)
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
