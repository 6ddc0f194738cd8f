// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use radsched_catalog::Modality;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Routine,
    Urgent,
    Stat,
}

/// Inbound order event from the integration engine, as received.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEvent {
    pub order_id: String,
    pub modality: String,
    #[serde(default)]
    pub modality_display: Option<String>,
    #[serde(default)]
    pub ordering_provider: Option<String>,
    #[serde(default)]
    pub ordering_facility: Option<String>,
    pub patient_phone: String,
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub order_description: Option<String>,
    #[serde(default)]
    pub cpt: Option<String>,
    #[serde(default)]
    pub queued_at: Option<DateTime<Utc>>,
}

/// De-identified order snapshot stored on the session **by value**.
///
/// Carries no patient identifiers: the session's phone hash is the only
/// link back to a person, and the ordering provider and facility are
/// dropped. Session writes therefore never depend on order-store state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_id: String,
    pub modality: Modality,
    pub display: String,
    pub description: String,
    pub cpt: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

impl OrderSnapshot {
    pub fn from_event(event: &OrderEvent) -> Result<Self, SessionError> {
        let modality: Modality = event
            .modality
            .parse()
            .map_err(|e| SessionError::Validation(format!("order {}: {e}", event.order_id)))?;
        let description = event
            .order_description
            .clone()
            .unwrap_or_else(|| format!("{modality} exam"));
        Ok(Self {
            order_id: event.order_id.clone(),
            modality,
            display: event
                .modality_display
                .clone()
                .unwrap_or_else(|| modality.to_string()),
            description,
            cpt: event.cpt.clone(),
            priority: event.priority.unwrap_or_default(),
        })
    }

    /// Short patient-facing name for this exam.
    pub fn exam_name(&self) -> &str {
        if self.description.is_empty() {
            &self.display
        } else {
            &self.description
        }
    }
}

/// Serialize snapshots into the session's `order_data` JSON array.
pub fn snapshots_to_value(snapshots: &[OrderSnapshot]) -> Value {
    serde_json::to_value(snapshots).unwrap_or(Value::Array(Vec::new()))
}

/// Read snapshots back out of `order_data`.
pub fn snapshots_from_value(value: &Value) -> Result<Vec<OrderSnapshot>, SessionError> {
    serde_json::from_value(value.clone())
        .map_err(|e| SessionError::Validation(format!("corrupt order_data: {e}")))
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
