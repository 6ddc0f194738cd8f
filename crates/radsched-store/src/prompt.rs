// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::StoreError;

/// A stored prompt template for the order analyzer.
///
/// Active templates sharing a key prefix form a discrete distribution:
/// one is drawn per analysis with probability `ab_test_weight / Σ weights`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: Uuid,
    /// Logical key, e.g. `order_analysis.v2-concise`. Selection is by
    /// key prefix.
    pub key: String,
    /// Template body with `{{placeholder}}` slots.
    pub template: String,
    /// Model identifier forwarded to the completion client.
    pub model: String,
    pub max_tokens: u32,
    pub is_active: bool,
    /// A/B weight in [0, 100]. Zero-weight templates are never drawn
    /// unless every sibling is also zero.
    pub ab_test_weight: u8,
    pub version: u32,
}

#[async_trait]
pub trait PromptStore: Send + Sync {
    /// All **active** templates whose key starts with `prefix`.
    async fn active_prompts(&self, prefix: &str) -> Result<Vec<PromptTemplate>, StoreError>;

    async fn upsert_prompt(&self, template: PromptTemplate) -> Result<(), StoreError>;
}
