// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::StoreError;

/// One analyzer invocation, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisLogEntry {
    pub id: Uuid,
    pub prompt_id: Option<Uuid>,
    pub prompt_key: Option<String>,
    pub session_id: Option<Uuid>,
    pub model: Option<String>,
    pub input: Value,
    pub output: Option<Value>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub latency_ms: u64,
    pub success: bool,
    pub error_message: Option<String>,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait AnalysisLogStore: Send + Sync {
    async fn append_analysis(&self, entry: AnalysisLogEntry) -> Result<(), StoreError>;

    /// All rows, oldest first. Test and ops surface.
    async fn analysis_log(&self) -> Result<Vec<AnalysisLogEntry>, StoreError>;
}
