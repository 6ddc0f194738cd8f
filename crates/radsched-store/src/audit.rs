// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Message-type tag carried by every outbound message and its audit row.
///
/// The state machine produces the tag; the templating layer produces the
/// body. Inbound rows use [`MessageTag::Inbound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageTag {
    Consent,
    OrderList,
    LocationList,
    SlotList,
    Confirmation,
    Cancellation,
    SafetyFallback,
    Help,
    Inbound,
}

/// One SMS attempt, inbound or outbound.
///
/// Append-only with a 7-year retention contract. Carries the phone hash
/// and last-4 only; the plaintext number never reaches this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub phone_hash: String,
    pub phone_last_four: String,
    pub direction: Direction,
    pub message_tag: MessageTag,
    pub from_number: Option<String>,
    pub provider: Option<String>,
    pub provider_message_id: Option<String>,
    pub success: bool,
    pub error_code: Option<String>,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append_audit(&self, entry: AuditEntry) -> Result<(), StoreError>;

    /// All rows for (tenant, phone-hash), oldest first. Drives the
    /// invariant checks in tests and the ops surface; not a hot path.
    async fn audit_trail(
        &self,
        tenant_id: Uuid,
        phone_hash: &str,
    ) -> Result<Vec<AuditEntry>, StoreError>;
}
