// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{SendOutcome, SmsProvider, StandardError};

/// Telnyx Messaging API adapter. The usual failover vendor.
pub struct TelnyxProvider {
    api_key: String,
    base_url: String,
    enabled: bool,
    client: reqwest::Client,
}

impl TelnyxProvider {
    pub fn new(api_key: String, base_url: Option<String>, enabled: bool) -> Self {
        Self {
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.telnyx.com".into()),
            enabled,
            client: reqwest::Client::new(),
        }
    }

    /// Map a Telnyx error code string into the shared taxonomy.
    fn map_error_code(code: &str) -> StandardError {
        match code {
            // Destination rejected as invalid.
            "40300" | "40001" => StandardError::InvalidNumber,
            // STOP keyword opt-out recorded at Telnyx.
            "40310" => StandardError::NumberBlocked,
            // Carrier-level spam filtering.
            "40008" | "40320" => StandardError::CarrierViolation,
            "10015" | "42901" => StandardError::RateLimited,
            "40011" => StandardError::Undeliverable,
            "40305" => StandardError::InvalidContent,
            _ => StandardError::Unknown,
        }
    }
}

#[async_trait]
impl SmsProvider for TelnyxProvider {
    fn name(&self) -> &str {
        "telnyx"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn send(&self, to: &str, body: &str, from: &str) -> SendOutcome {
        let payload = json!({ "to": to, "from": from, "text": body });

        let resp = match self
            .client
            .post(format!("{}/v2/messages", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return SendOutcome::failed(self.name(), StandardError::NetworkError, e.to_string())
            }
        };

        let status = resp.status();
        let body: Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => {
                return SendOutcome::failed(self.name(), StandardError::NetworkError, e.to_string())
            }
        };

        if status.is_success() {
            let id = body["data"]["id"].as_str().unwrap_or_default().to_string();
            debug!(id, "telnyx accepted message");
            return SendOutcome::accepted(self.name(), id);
        }

        if status.is_server_error() {
            return SendOutcome::failed(
                self.name(),
                StandardError::ProviderError,
                format!("HTTP {status}"),
            );
        }

        let (code, message) = body["errors"]
            .as_array()
            .and_then(|errs| errs.first())
            .map(|e| {
                (
                    e["code"].as_str().unwrap_or("").to_string(),
                    e["detail"].as_str().unwrap_or("unknown").to_string(),
                )
            })
            .unwrap_or_else(|| (String::new(), "unknown".into()));
        SendOutcome::failed(self.name(), Self::map_error_code(&code), message)
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opt_out_maps_to_number_blocked() {
        assert_eq!(
            TelnyxProvider::map_error_code("40310"),
            StandardError::NumberBlocked
        );
    }

    #[test]
    fn rate_limit_codes() {
        assert_eq!(
            TelnyxProvider::map_error_code("42901"),
            StandardError::RateLimited
        );
    }

    #[test]
    fn unknown_codes_stay_unknown() {
        assert_eq!(TelnyxProvider::map_error_code(""), StandardError::Unknown);
        assert_eq!(
            TelnyxProvider::map_error_code("55555"),
            StandardError::Unknown
        );
    }
}
