// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::StoreError;

/// What to do with a new order that arrives while a session is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackingPolicy {
    /// Queue the order; promote it when the active session terminates.
    #[default]
    Defer,
    /// Cancel the active session (no outbound message) and start over
    /// with the new order.
    Supersede,
}

/// How multiple orders in one session combine into a slot duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationStacking {
    #[default]
    Sum,
    Max,
}

/// Per-tenant SMS routing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSmsConfig {
    /// Provider name used for first attempts ("twilio", "telnyx", "mock").
    pub primary_provider: String,
    /// Provider used for the single failover attempt, when configured.
    pub failover_provider: Option<String>,
    /// From-number pool for the primary provider. Pools with more than one
    /// number get sticky selection per recipient.
    pub from_numbers: Vec<String>,
    /// From-numbers usable on the failover provider.
    pub failover_from_numbers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub slug: String,
    pub active: bool,
    pub sms: TenantSmsConfig,
    #[serde(default)]
    pub stacking_policy: StackingPolicy,
    #[serde(default)]
    pub duration_stacking: DurationStacking,
    /// CPT code → scan duration minutes; overrides the modality base.
    #[serde(default)]
    pub cpt_duration_overrides: HashMap<String, u32>,
}

#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, StoreError>;
    async fn tenant_by_id(&self, id: Uuid) -> Result<Option<Tenant>, StoreError>;
    async fn upsert_tenant(&self, tenant: Tenant) -> Result<(), StoreError>;
}
