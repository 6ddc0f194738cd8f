// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsentMethod {
    SmsReply,
    WebForm,
    Verbal,
}

/// One row of consent history for a (tenant, phone-hash).
///
/// History is append-only: revocation and re-consent add rows, they never
/// rewrite older ones. The newest row by `consent_timestamp` is
/// authoritative. Revocation is monotonic: while the newest row carries
/// `revoked_at`, no outbound SMS may be sent to the phone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub phone_hash: String,
    pub consent_given: bool,
    pub consent_timestamp: DateTime<Utc>,
    pub consent_method: ConsentMethod,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revocation_reason: Option<String>,
}

impl ConsentRecord {
    pub fn granted(
        tenant_id: Uuid,
        phone_hash: &str,
        method: ConsentMethod,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            phone_hash: phone_hash.to_string(),
            consent_given: true,
            consent_timestamp: at,
            consent_method: method,
            revoked_at: None,
            revocation_reason: None,
        }
    }

    pub fn revoked(
        tenant_id: Uuid,
        phone_hash: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            phone_hash: phone_hash.to_string(),
            consent_given: false,
            consent_timestamp: at,
            consent_method: ConsentMethod::SmsReply,
            revoked_at: Some(at),
            revocation_reason: Some(reason.to_string()),
        }
    }

    pub fn is_revocation(&self) -> bool {
        self.revoked_at.is_some()
    }
}

#[async_trait]
pub trait ConsentStore: Send + Sync {
    /// Append a consent history row.
    async fn append_consent(&self, record: ConsentRecord) -> Result<(), StoreError>;

    /// Newest consent row for (tenant, phone-hash), if any.
    async fn latest_consent(
        &self,
        tenant_id: Uuid,
        phone_hash: &str,
    ) -> Result<Option<ConsentRecord>, StoreError>;

    /// Whether sends to this phone are currently refused.
    ///
    /// True exactly when the newest row is a revocation. No history at all
    /// means "not revoked" (the consent flow itself decides whether consent
    /// must be captured first).
    async fn is_revoked(&self, tenant_id: Uuid, phone_hash: &str) -> Result<bool, StoreError> {
        Ok(self
            .latest_consent(tenant_id, phone_hash)
            .await?
            .map(|r| r.is_revocation())
            .unwrap_or(false))
    }
}
