// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Deterministic rule-based duration calculus.
//!
//! The baseline the prompt path is measured against, and the fallback when
//! it fails. The calculus is:
//!
//! ```text
//! total = round(base × equipment_factor) + patient_additions + prep
//! ```
//!
//! with integer arithmetic throughout (round-half-up), so the same inputs
//! produce the same minutes on every platform.

use radsched_catalog::Modality;
use radsched_safety::{contrast_kind, required_capabilities, ContrastKind, PatientContext};

use crate::{AnalysisMetadata, ContrastType, OrderAnalysis, OrderAnalysisInput};

/// The equipment characteristics that modify scan time.
///
/// Taken from the chosen location's unit when one is known, or from the
/// best unit the order's requirements select. `None` applies no factor.
#[derive(Debug, Clone, Default)]
pub struct EquipmentProfile {
    pub ct_slice_count: Option<u16>,
    pub mri_field_strength: Option<f32>,
    pub mri_wide_bore: bool,
}

fn base_minutes(modality: Modality) -> u32 {
    match modality {
        Modality::Ct => 30,
        Modality::Mri => 45,
        Modality::Mg => 20,
        Modality::Us => 30,
        Modality::Xr => 15,
        // No dedicated baseline; CT's is the closest stand-in.
        Modality::Nm | Modality::Pet | Modality::Fl => 30,
    }
}

/// Equipment speed factors in percent. Multiplicative when several apply.
fn equipment_factor_pct(modality: Modality, equipment: &EquipmentProfile) -> Vec<u32> {
    let mut factors = Vec::new();
    match modality {
        Modality::Mri => {
            if equipment.mri_field_strength.map_or(false, |f| f >= 3.0) {
                factors.push(70);
            }
            if equipment.mri_wide_bore {
                factors.push(105);
            }
        }
        Modality::Ct => {
            if let Some(slices) = equipment.ct_slice_count {
                if slices >= 256 {
                    factors.push(75);
                } else if slices >= 64 {
                    factors.push(85);
                }
            }
        }
        _ => {}
    }
    factors
}

/// `round(base × Π(factors))` with round-half-up integer arithmetic.
fn apply_factors(base: u32, factors_pct: &[u32]) -> u32 {
    let mut num: u64 = 1;
    let mut den: u64 = 1;
    for f in factors_pct {
        num *= *f as u64;
        den *= 100;
    }
    ((base as u64 * num + den / 2) / den) as u32
}

fn patient_additions(description_lower: &str, patient: &PatientContext) -> u32 {
    let mut add = 0;
    if patient.claustrophobic || description_lower.contains("claustrophob") {
        add += 15;
    }
    if patient.mobility_impaired || description_lower.contains("wheelchair") {
        add += 10;
    }
    if patient.bariatric {
        add += 10;
    }
    if patient.age_years.map_or(false, |a| a >= 80) {
        add += 5;
    }
    add
}

fn prep_minutes(modality: Modality, kind: ContrastKind) -> u32 {
    let iv_applies = matches!(modality, Modality::Ct | Modality::Mri);
    match kind {
        ContrastKind::None => 0,
        ContrastKind::Iv => {
            if iv_applies {
                15
            } else {
                0
            }
        }
        ContrastKind::Oral => 75,
        ContrastKind::IvAndOral => 75 + if iv_applies { 15 } else { 0 },
    }
}

/// Compute the deterministic estimate.
///
/// `cpt_override` replaces the modality base when the tenant maps this
/// CPT code to a fixed scan duration.
pub fn rule_estimate(
    input: &OrderAnalysisInput,
    patient: &PatientContext,
    equipment: &EquipmentProfile,
    cpt_override: Option<u32>,
) -> OrderAnalysis {
    let lower = input.order_description.to_lowercase();
    let kind = contrast_kind(&input.order_description);
    let base = cpt_override.unwrap_or_else(|| base_minutes(input.modality));

    let factors = equipment_factor_pct(input.modality, equipment);
    let scan = apply_factors(base, &factors) + patient_additions(&lower, patient);
    let prep = prep_minutes(input.modality, kind);

    let needs = required_capabilities(&input.order_description, input.modality, patient);

    let contrast_required = kind != ContrastKind::None;
    let scheduling_notes = if needs.is_empty() {
        String::new()
    } else {
        let labels: Vec<&str> = needs.iter().map(|n| n.label()).collect();
        format!("requires: {}", labels.join(", "))
    };

    OrderAnalysis {
        total_duration_min: scan + prep,
        prep_time_min: prep,
        scan_time_min: scan,
        contrast_required,
        contrast_type: match kind {
            ContrastKind::None => ContrastType::None,
            ContrastKind::Iv => ContrastType::Iv,
            ContrastKind::Oral => ContrastType::Oral,
            ContrastKind::IvAndOral => ContrastType::IvAndOral,
        },
        equipment_needs: needs,
        patient_instructions: patient_instructions(kind),
        scheduling_notes,
        success: false,
        fallback_to_rules: true,
        metadata: AnalysisMetadata::default(),
    }
}

fn patient_instructions(kind: ContrastKind) -> String {
    match kind {
        ContrastKind::None => "Arrive 15 minutes before your appointment.".to_string(),
        ContrastKind::Iv => {
            "Arrive 30 minutes early. Do not eat for 4 hours before your exam.".to_string()
        }
        ContrastKind::Oral | ContrastKind::IvAndOral => {
            "Arrive 90 minutes early to drink the oral contrast. Do not eat for 4 hours before your exam."
                .to_string()
        }
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
