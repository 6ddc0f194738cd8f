// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `false`, so fields
/// that should default to enabled need a named function.
fn default_true() -> bool {
    true
}

fn default_tenant_slug() -> String {
    "default".to_string()
}

fn default_encryption_key_env() -> String {
    "RADSCHED_ENCRYPTION_KEY".to_string()
}

fn default_jwt_secret_env() -> String {
    "RADSCHED_JWT_SECRET".to_string()
}

fn default_session_ttl_hours() -> u64 {
    24
}

fn default_slot_timeout_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_send_deadline_secs() -> u64 {
    10
}

/// Process-level configuration.
///
/// Per-tenant settings (provider names, number pools, stacking policy) live
/// in the store, not here. This struct carries only what the process needs
/// before it can reach the store: secrets, the default tenant slug, and
/// operational knobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub carriers: CarriersConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub slot_source: SlotSourceConfig,
    #[serde(default)]
    pub dev: DevConfig,
}

/// External scheduling system endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotSourceConfig {
    /// Base URL of the slot source REST API. Unset means this process
    /// only runs flows that never reach the slot request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable holding the slot source API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

/// Secret material. Values are read from the environment at runtime via the
/// `*_env` fields; inline values are supported for tests but discouraged in
/// version-controlled config files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Environment variable holding the phone encryption key (>= 32 chars).
    #[serde(default = "default_encryption_key_env")]
    pub encryption_key_env: String,
    /// Inline encryption key. Takes precedence over the env var when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
    /// Environment variable holding the JWT secret. The core does not
    /// consume it; it is validated here and handed to the auth layer.
    #[serde(default = "default_jwt_secret_env")]
    pub jwt_secret_env: String,
    /// Default tenant slug used when an inbound event names no tenant.
    #[serde(default = "default_tenant_slug")]
    pub default_tenant: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            encryption_key_env: default_encryption_key_env(),
            encryption_key: None,
            jwt_secret_env: default_jwt_secret_env(),
            default_tenant: default_tenant_slug(),
        }
    }
}

/// Carrier (SMS vendor) accounts, keyed by provider name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CarriersConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twilio: Option<CarrierAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telnyx: Option<CarrierAccount>,
}

/// One carrier account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierAccount {
    /// Account / profile identifier at the carrier.
    pub account_id: String,
    /// Environment variable holding the API auth token. The same token is
    /// used to verify inbound webhook signatures from this carrier.
    pub auth_token_env: String,
    /// Inline token, for tests only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Base URL override for the carrier REST API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl CarrierAccount {
    /// Resolve the auth token: inline value first, then the environment.
    pub fn resolve_auth_token(&self) -> Result<String, ConfigError> {
        if let Some(t) = &self.auth_token {
            return Ok(t.clone());
        }
        std::env::var(&self.auth_token_env)
            .map_err(|_| ConfigError::MissingEnv(self.auth_token_env.clone()))
    }
}

/// Sweep cadence and external-call deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Session lifetime. `expires_at = started_at + session_ttl_hours`.
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: u64,
    /// Age of a pending slot request before the timeout sweep retries it.
    #[serde(default = "default_slot_timeout_secs")]
    pub slot_timeout_secs: u64,
    /// How often the expiry and timeout sweeps are expected to run.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Deadline for a single SMS provider or slot-source HTTP call.
    #[serde(default = "default_send_deadline_secs")]
    pub send_deadline_secs: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            session_ttl_hours: default_session_ttl_hours(),
            slot_timeout_secs: default_slot_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            send_deadline_secs: default_send_deadline_secs(),
        }
    }
}

/// Order analyzer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Logical prompt key prefix used to select stored templates.
    #[serde(default = "default_prompt_prefix")]
    pub prompt_key_prefix: String,
    /// Environment variable holding the LLM API key. When unset or empty
    /// the analyzer runs rules-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Base URL of the completion endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Client-side deadline for one completion call, in seconds.
    #[serde(default = "default_llm_deadline_secs")]
    pub deadline_secs: u64,
}

fn default_prompt_prefix() -> String {
    "order_analysis".to_string()
}

fn default_llm_deadline_secs() -> u64 {
    30
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            prompt_key_prefix: default_prompt_prefix(),
            api_key_env: None,
            base_url: None,
            deadline_secs: default_llm_deadline_secs(),
        }
    }
}

/// Development escape hatches. **All defaults are production-safe.**
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevConfig {
    /// Skip inbound webhook signature verification. The flag is named to be
    /// uncomfortable to leave on anywhere near production.
    #[serde(default)]
    pub insecure_skip_webhook_verification: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    MissingEnv(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Resolve the phone encryption key: inline value first, then env.
    pub fn resolve_encryption_key(&self) -> Result<String, ConfigError> {
        let key = match &self.secrets.encryption_key {
            Some(k) => k.clone(),
            None => std::env::var(&self.secrets.encryption_key_env)
                .map_err(|_| ConfigError::MissingEnv(self.secrets.encryption_key_env.clone()))?,
        };
        if key.chars().count() < 32 {
            return Err(ConfigError::Invalid(
                "encryption key must be at least 32 characters".into(),
            ));
        }
        Ok(key)
    }

    /// Validate everything that must hold before the process serves traffic.
    ///
    /// Checks structure only; env-var presence is checked by the resolve
    /// methods so that `show-config` works without secrets in place.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secrets.default_tenant.trim().is_empty() {
            return Err(ConfigError::Invalid("default_tenant must not be empty".into()));
        }
        if self.scheduling.session_ttl_hours == 0 {
            return Err(ConfigError::Invalid("session_ttl_hours must be > 0".into()));
        }
        if self.scheduling.slot_timeout_secs == 0 {
            return Err(ConfigError::Invalid("slot_timeout_secs must be > 0".into()));
        }
        if self.carriers.twilio.is_none() && self.carriers.telnyx.is_none() {
            return Err(ConfigError::Invalid(
                "at least one carrier account must be configured".into(),
            ));
        }
        Ok(())
    }

    /// Copy with secret material blanked, for `show-config`.
    pub fn redacted(&self) -> Config {
        let mut c = self.clone();
        c.secrets.encryption_key = c.secrets.encryption_key.map(|_| "********".into());
        if let Some(t) = &mut c.carriers.twilio {
            t.auth_token = t.auth_token.as_ref().map(|_| "********".into());
        }
        if let Some(t) = &mut c.carriers.telnyx {
            t.auth_token = t.auth_token.as_ref().map(|_| "********".into());
        }
        c
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
