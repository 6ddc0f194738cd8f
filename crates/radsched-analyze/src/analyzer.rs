// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use radsched_catalog::CapabilityRequirement;
use radsched_safety::PatientContext;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use radsched_store::{AnalysisLogEntry, AnalysisLogStore, PromptStore, PromptTemplate};

use crate::{
    interpolate, rule_estimate, rules::EquipmentProfile, weighted_draw, AnalysisMetadata,
    AnalyzeError, CompletionClient, CompletionRequest, ContrastType, OrderAnalysis,
    OrderAnalysisInput,
};

/// Upper bound accepted from the prompt path; anything above is treated
/// as a hallucinated value and rejected.
const MAX_PLAUSIBLE_DURATION_MIN: u32 = 8 * 60;

#[derive(Debug, Clone)]
pub struct AnalyzerOptions {
    pub prompt_key_prefix: String,
    pub deadline_secs: u64,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            prompt_key_prefix: "order_analysis".into(),
            deadline_secs: 30,
        }
    }
}

/// The analysis pipeline: prompt path with rule fallback.
pub struct OrderAnalyzer {
    prompts: Arc<dyn PromptStore>,
    log: Arc<dyn AnalysisLogStore>,
    client: Option<Arc<dyn CompletionClient>>,
    options: AnalyzerOptions,
}

impl OrderAnalyzer {
    pub fn new(
        prompts: Arc<dyn PromptStore>,
        log: Arc<dyn AnalysisLogStore>,
        client: Option<Arc<dyn CompletionClient>>,
        options: AnalyzerOptions,
    ) -> Self {
        Self {
            prompts,
            log,
            client,
            options,
        }
    }

    /// Analyze one order. Never fails: every error path degrades to the
    /// rule estimate, and every invocation appends one analysis log row.
    pub async fn analyze(
        &self,
        input: &OrderAnalysisInput,
        patient: &PatientContext,
        equipment: &EquipmentProfile,
        cpt_override: Option<u32>,
        session_id: Option<Uuid>,
    ) -> OrderAnalysis {
        let rules = rule_estimate(input, patient, equipment, cpt_override);
        let started = Instant::now();

        let attempt = self.prompt_path(input, session_id, &rules, started).await;
        match attempt {
            Ok(analysis) => analysis,
            Err(e) => {
                debug!("prompt path unavailable, using rule estimate: {e}");
                let mut fallback = rules;
                fallback.metadata.latency_ms = started.elapsed().as_millis() as u64;
                self.append_log_full(
                    input,
                    session_id,
                    None,
                    None,
                    None,
                    started,
                    false,
                    Some(e.to_string()),
                )
                .await;
                fallback
            }
        }
    }

    async fn prompt_path(
        &self,
        input: &OrderAnalysisInput,
        session_id: Option<Uuid>,
        rules: &OrderAnalysis,
        started: Instant,
    ) -> Result<OrderAnalysis, AnalyzeError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| AnalyzeError::Api("no completion client configured".into()))?;

        let templates = self
            .prompts
            .active_prompts(&self.options.prompt_key_prefix)
            .await
            .map_err(|e| AnalyzeError::Api(format!("prompt store: {e}")))?;
        let template = weighted_draw(&templates, &mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| AnalyzeError::NoTemplate(self.options.prompt_key_prefix.clone()))?;

        let prompt = interpolate(&template.template, &interpolation_vars(input));
        let req = CompletionRequest {
            model: template.model.clone(),
            prompt,
            max_tokens: template.max_tokens,
        };

        let outcome = tokio::time::timeout(
            Duration::from_secs(self.options.deadline_secs),
            client.complete(req),
        )
        .await
        .map_err(|_| AnalyzeError::Timeout(self.options.deadline_secs))
        .and_then(|r| r);

        match outcome {
            Ok(resp) => match parse_payload(&resp.text) {
                Ok(payload) => {
                    let output = json!({
                        "total_duration_min": payload.total_duration_min,
                        "raw": resp.text,
                    });
                    self.append_log_full(
                        input,
                        session_id,
                        Some(&template),
                        Some(output),
                        Some((resp.prompt_tokens, resp.completion_tokens)),
                        started,
                        true,
                        None,
                    )
                    .await;
                    Ok(merge(payload, rules, &template, &resp, started))
                }
                Err(e) => {
                    warn!(prompt_key = %template.key, "discarding unusable completion: {e}");
                    self.append_log_full(
                        input,
                        session_id,
                        Some(&template),
                        None,
                        Some((resp.prompt_tokens, resp.completion_tokens)),
                        started,
                        false,
                        Some(e.to_string()),
                    )
                    .await;
                    let mut fallback = rules.clone();
                    fallback.metadata = metadata_for(&template, started);
                    Ok(fallback)
                }
            },
            Err(e) => {
                self.append_log_full(
                    input,
                    session_id,
                    Some(&template),
                    None,
                    None,
                    started,
                    false,
                    Some(e.to_string()),
                )
                .await;
                let mut fallback = rules.clone();
                fallback.metadata = metadata_for(&template, started);
                Ok(fallback)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn append_log_full(
        &self,
        input: &OrderAnalysisInput,
        session_id: Option<Uuid>,
        template: Option<&PromptTemplate>,
        output: Option<Value>,
        tokens: Option<(u32, u32)>,
        started: Instant,
        success: bool,
        error_message: Option<String>,
    ) {
        let entry = AnalysisLogEntry {
            id: Uuid::new_v4(),
            prompt_id: template.map(|t| t.id),
            prompt_key: template.map(|t| t.key.clone()),
            session_id,
            model: template.map(|t| t.model.clone()),
            input: serde_json::to_value(input).unwrap_or(Value::Null),
            output,
            prompt_tokens: tokens.map(|t| t.0),
            completion_tokens: tokens.map(|t| t.1),
            latency_ms: started.elapsed().as_millis() as u64,
            success,
            error_message,
            at: Utc::now(),
        };
        // Losing a log row must not fail the analysis itself.
        if let Err(e) = self.log.append_analysis(entry).await {
            warn!("analysis log append failed: {e}");
        }
    }
}

fn interpolation_vars(input: &OrderAnalysisInput) -> HashMap<String, Option<String>> {
    HashMap::from([
        (
            "order_description".to_string(),
            Some(input.order_description.clone()),
        ),
        ("cpt".to_string(), input.cpt.clone()),
        ("modality".to_string(), Some(input.modality.to_string())),
        ("priority".to_string(), input.priority.clone()),
        (
            "clinical_indication".to_string(),
            input.clinical_indication.clone(),
        ),
    ])
}

/// Shape expected back from the model, as JSON.
#[derive(Debug, Deserialize)]
struct LlmPayload {
    total_duration_min: u32,
    prep_time_min: Option<u32>,
    scan_time_min: Option<u32>,
    contrast_required: Option<bool>,
    contrast_type: Option<String>,
    equipment_needs: Option<Vec<String>>,
    patient_instructions: Option<String>,
    scheduling_notes: Option<String>,
}

/// Extract and validate the JSON object embedded in the reply text.
///
/// Models frequently wrap JSON in prose or a markdown fence; the first
/// `{` to the last `}` is taken as the candidate object.
fn parse_payload(text: &str) -> Result<LlmPayload, AnalyzeError> {
    let start = text
        .find('{')
        .ok_or_else(|| AnalyzeError::Parse("no JSON object in reply".into()))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| AnalyzeError::Parse("no JSON object in reply".into()))?;
    if end < start {
        return Err(AnalyzeError::Parse("no JSON object in reply".into()));
    }
    let payload: LlmPayload = serde_json::from_str(&text[start..=end])
        .map_err(|e| AnalyzeError::Parse(e.to_string()))?;

    if payload.total_duration_min == 0 || payload.total_duration_min > MAX_PLAUSIBLE_DURATION_MIN {
        return Err(AnalyzeError::Validation(format!(
            "total_duration_min {} out of range",
            payload.total_duration_min
        )));
    }
    Ok(payload)
}

fn metadata_for(template: &PromptTemplate, started: Instant) -> AnalysisMetadata {
    AnalysisMetadata {
        prompt_id: Some(template.id),
        prompt_key: Some(template.key.clone()),
        model: Some(template.model.clone()),
        prompt_tokens: None,
        completion_tokens: None,
        latency_ms: started.elapsed().as_millis() as u64,
    }
}

/// Combine the validated payload with the rule estimate. The payload wins
/// where it speaks; typed equipment needs come from the rule extraction
/// unless the payload names requirements the mapper recognizes.
fn merge(
    payload: LlmPayload,
    rules: &OrderAnalysis,
    template: &PromptTemplate,
    resp: &crate::CompletionResponse,
    started: Instant,
) -> OrderAnalysis {
    let needs = payload
        .equipment_needs
        .as_deref()
        .map(map_equipment_needs)
        .filter(|mapped| !mapped.is_empty())
        .unwrap_or_else(|| rules.equipment_needs.clone());

    OrderAnalysis {
        total_duration_min: payload.total_duration_min,
        prep_time_min: payload.prep_time_min.unwrap_or(rules.prep_time_min),
        scan_time_min: payload
            .scan_time_min
            .unwrap_or_else(|| payload.total_duration_min.saturating_sub(rules.prep_time_min)),
        contrast_required: payload.contrast_required.unwrap_or(rules.contrast_required),
        contrast_type: payload
            .contrast_type
            .as_deref()
            .and_then(parse_contrast_type)
            .unwrap_or(rules.contrast_type),
        equipment_needs: needs,
        patient_instructions: payload
            .patient_instructions
            .unwrap_or_else(|| rules.patient_instructions.clone()),
        scheduling_notes: payload
            .scheduling_notes
            .unwrap_or_else(|| rules.scheduling_notes.clone()),
        success: true,
        fallback_to_rules: false,
        metadata: AnalysisMetadata {
            prompt_tokens: Some(resp.prompt_tokens),
            completion_tokens: Some(resp.completion_tokens),
            ..metadata_for(template, started)
        },
    }
}

fn parse_contrast_type(s: &str) -> Option<ContrastType> {
    match s.to_lowercase().as_str() {
        "none" => Some(ContrastType::None),
        "iv" => Some(ContrastType::Iv),
        "oral" => Some(ContrastType::Oral),
        "iv_and_oral" | "both" => Some(ContrastType::IvAndOral),
        _ => None,
    }
}

fn map_equipment_needs(labels: &[String]) -> Vec<CapabilityRequirement> {
    labels
        .iter()
        .filter_map(|l| match l.as_str() {
            "ct_min_slice_count" | "ct_64_slice" => {
                Some(CapabilityRequirement::CtMinSliceCount { slices: 64 })
            }
            "ct_cardiac_gating" => Some(CapabilityRequirement::CtCardiacGating),
            "ct_contrast_injector" => Some(CapabilityRequirement::CtContrastInjector),
            "mri_min_field_strength" | "mri_3t" => {
                Some(CapabilityRequirement::MriMinFieldStrength { tesla: 3.0 })
            }
            "mri_wide_bore" => Some(CapabilityRequirement::MriWideBore),
            "mammo_3d_tomo" => Some(CapabilityRequirement::Mammo3dTomo),
            "mammo_stereo_biopsy" => Some(CapabilityRequirement::MammoStereoBiopsy),
            _ => None,
        })
        .collect()
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
