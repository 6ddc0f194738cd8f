// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Inbound webhook signature verification.
//!
//! # Security model
//!
//! Carriers sign each webhook with **HMAC-SHA1** over the full request URL
//! concatenated with the POST parameters sorted by key (Twilio's
//! `X-Twilio-Signature` scheme):
//!
//! 1. Sort the form parameters alphabetically by key.
//! 2. Append `key` then `value` for each onto the full request URL.
//! 3. Compute `HMAC-SHA1(auth_token, that_string)` and base64 it.
//! 4. Compare in constant time (`subtle::ConstantTimeEq`).
//!
//! A missing or invalid signature is a hard reject (the transport layer
//! answers 403). Verification may be skipped only behind the explicit
//! development flag, which the caller checks before ever calling in here.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

#[derive(Debug, thiserror::Error)]
pub enum WebhookVerifyError {
    #[error("signature header is missing")]
    MissingSignature,
    #[error("signature does not match")]
    InvalidSignature,
    #[error("internal HMAC error")]
    Internal,
}

/// Verify a carrier webhook signature.
///
/// `url` must be the exact public URL the carrier posted to, including
/// scheme, host, and query string. `params` are the decoded POST form
/// parameters; order does not matter, they are sorted here.
pub fn verify_carrier_signature(
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
    provided_sig: Option<&str>,
) -> Result<(), WebhookVerifyError> {
    let provided = provided_sig.ok_or(WebhookVerifyError::MissingSignature)?;
    if provided.is_empty() {
        return Err(WebhookVerifyError::MissingSignature);
    }

    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut mac = Hmac::<Sha1>::new_from_slice(auth_token.as_bytes())
        .map_err(|_| WebhookVerifyError::Internal)?;
    mac.update(url.as_bytes());
    for (k, v) in sorted {
        mac.update(k.as_bytes());
        mac.update(v.as_bytes());
    }
    let expected = base64_encode(&mac.finalize().into_bytes());

    // Constant-time comparison; length mismatch short-circuits safely
    // because ct_eq over unequal lengths is defined as not-equal.
    if expected.as_bytes().ct_eq(provided.as_bytes()).unwrap_u8() != 1 {
        return Err(WebhookVerifyError::InvalidSignature);
    }
    Ok(())
}

/// Transport-layer entry point: verify unless the development flag says
/// otherwise. The flag comes from `dev.insecure_skip_webhook_verification`
/// and must never be set in production config.
pub fn verify_inbound(
    skip_verification: bool,
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
    provided_sig: Option<&str>,
) -> Result<(), WebhookVerifyError> {
    if skip_verification {
        tracing::warn!("webhook signature verification SKIPPED (dev mode)");
        return Ok(());
    }
    verify_carrier_signature(auth_token, url, params, provided_sig)
}

/// The inbound SMS fields the core consumes, extracted from the webhook
/// form parameters after verification.
#[derive(Debug, Clone)]
pub struct InboundSms {
    pub from: String,
    pub to: String,
    pub body: String,
    pub provider_message_id: Option<String>,
}

impl InboundSms {
    /// Build from decoded form parameters. Returns `None` when the
    /// payload carries no sender or no body (delivery receipts etc.).
    pub fn from_params(params: &[(String, String)]) -> Option<Self> {
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.clone())
        };
        let from = get("From")?;
        let body = get("Body")?;
        Some(Self {
            from,
            to: get("To").unwrap_or_default(),
            body,
            provider_message_id: get("MessageSid").or_else(|| get("SmsSid")),
        })
    }
}

fn base64_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
