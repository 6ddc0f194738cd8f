// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Order analysis pipeline.
//!
//! Turns a free-text imaging order into a duration estimate, contrast
//! profile, and equipment needs. Two paths produce the same output shape:
//!
//! - **prompt path**: a stored template is drawn by A/B weight,
//!   interpolated, and sent to the completion client; the JSON reply is
//!   validated and logged;
//! - **rule path**: a deterministic calculus over modality, order tokens,
//!   equipment profile, and patient factors.
//!
//! The rule path is always computed and is the fallback for every prompt
//! path failure, so callers can rely on a fully-populated result.

mod analyzer;
mod client;
mod rules;
mod selection;
mod template;

pub use analyzer::{AnalyzerOptions, OrderAnalyzer};
pub use client::{
    CompletionClient, CompletionRequest, CompletionResponse, HttpCompletionClient,
    ScriptedCompletionClient,
};
pub use rules::{rule_estimate, EquipmentProfile};
pub use selection::weighted_draw;
pub use template::interpolate;

use radsched_catalog::{CapabilityRequirement, Modality};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Analyzer input, one imaging order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAnalysisInput {
    pub order_description: String,
    pub cpt: Option<String>,
    pub modality: Modality,
    pub priority: Option<String>,
    pub clinical_indication: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContrastType {
    None,
    Iv,
    Oral,
    IvAndOral,
}

/// Call metadata attached to every analysis result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub prompt_id: Option<Uuid>,
    pub prompt_key: Option<String>,
    pub model: Option<String>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub latency_ms: u64,
}

/// Analyzer output. Always fully populated, whichever path produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAnalysis {
    pub total_duration_min: u32,
    pub prep_time_min: u32,
    pub scan_time_min: u32,
    pub contrast_required: bool,
    pub contrast_type: ContrastType,
    pub equipment_needs: Vec<CapabilityRequirement>,
    pub patient_instructions: String,
    pub scheduling_notes: String,
    /// True when the prompt path produced this result.
    pub success: bool,
    /// True when the rule path stood in for a failed or absent prompt path.
    pub fallback_to_rules: bool,
    pub metadata: AnalysisMetadata,
}

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("completion API error: {0}")]
    Api(String),

    #[error("completion call timed out after {0}s")]
    Timeout(u64),

    #[error("completion reply is not valid JSON: {0}")]
    Parse(String),

    #[error("completion reply failed validation: {0}")]
    Validation(String),

    #[error("no active prompt template for prefix {0}")]
    NoTemplate(String),
}
