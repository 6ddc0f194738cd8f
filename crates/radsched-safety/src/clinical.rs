// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Clinical rules: allergy, renal function, contrast wash-out.

use chrono::{Duration, NaiveDate};
use radsched_catalog::Modality;
use serde::{Deserialize, Serialize};

use crate::{BlockReason, OrderFacts, WarningReason};

/// Days a prior contrast study keeps the wash-out warning active.
const CONTRAST_WASHOUT_DAYS: i64 = 7;

const EGFR_BLOCK_BELOW: f64 = 30.0;
const EGFR_WARN_BELOW: f64 = 45.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllergySeverity {
    Mild,
    Moderate,
    Severe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allergy {
    pub allergen: String,
    pub severity: AllergySeverity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabResult {
    pub name: String,
    pub value: f64,
    pub observed_on: NaiveDate,
}

/// The clinical facts the gate consults. Everything is optional; an empty
/// context gates nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientContext {
    pub allergies: Vec<Allergy>,
    pub labs: Vec<LabResult>,
    /// Date of the most recent prior contrast-enhanced study, if known.
    pub last_contrast_study: Option<NaiveDate>,
    pub weight_kg: Option<f32>,
    pub bariatric: bool,
    pub claustrophobic: bool,
    pub mobility_impaired: bool,
    pub age_years: Option<u32>,
}

pub(crate) struct ClinicalFindings {
    pub blocks: Vec<BlockReason>,
    pub warnings: Vec<WarningReason>,
    pub min_schedule_date: Option<NaiveDate>,
}

/// Apply the clinical rules. All of them are conditioned on the order
/// actually requiring contrast; a non-contrast study is never flagged here.
pub(crate) fn evaluate(
    order: &OrderFacts,
    patient: &PatientContext,
    requires_contrast: bool,
    today: NaiveDate,
) -> ClinicalFindings {
    let mut findings = ClinicalFindings {
        blocks: Vec::new(),
        warnings: Vec::new(),
        min_schedule_date: None,
    };
    if !requires_contrast {
        return findings;
    }

    match worst_contrast_allergy(patient, order.modality) {
        Some(AllergySeverity::Severe) => findings.blocks.push(BlockReason::ContrastAllergySevere),
        Some(_) => findings.warnings.push(WarningReason::ContrastAllergy),
        None => {}
    }

    if let Some(egfr) = latest_egfr(patient) {
        if egfr < EGFR_BLOCK_BELOW {
            findings.blocks.push(BlockReason::RenalFunctionCritical);
        } else if egfr < EGFR_WARN_BELOW {
            findings.warnings.push(WarningReason::RenalFunctionLow);
        }
    }

    if let Some(prior) = patient.last_contrast_study {
        if today - prior < Duration::days(CONTRAST_WASHOUT_DAYS) {
            findings.warnings.push(WarningReason::RecentContrast);
            findings.min_schedule_date = Some(prior + Duration::days(CONTRAST_WASHOUT_DAYS));
        }
    }

    findings
}

/// Worst allergy relevant to the ordered contrast agent.
///
/// CT uses iodinated agents, MRI uses gadolinium. A generic "contrast"
/// allergen counts for both; unrelated allergens (penicillin, latex) never
/// participate.
fn worst_contrast_allergy(
    patient: &PatientContext,
    modality: Modality,
) -> Option<AllergySeverity> {
    patient
        .allergies
        .iter()
        .filter(|a| allergen_relevant(&a.allergen, modality))
        .map(|a| a.severity)
        .max_by_key(|s| match s {
            AllergySeverity::Mild => 0,
            AllergySeverity::Moderate => 1,
            AllergySeverity::Severe => 2,
        })
}

fn allergen_relevant(allergen: &str, modality: Modality) -> bool {
    let lower = allergen.to_lowercase();
    if lower.contains("contrast") {
        return true;
    }
    match modality {
        Modality::Ct | Modality::Pet => lower.contains("iodin"),
        Modality::Mri => lower.contains("gadolin"),
        _ => false,
    }
}

/// Most recent eGFR result, by observation date.
fn latest_egfr(patient: &PatientContext) -> Option<f64> {
    patient
        .labs
        .iter()
        .filter(|l| {
            let n = l.name.to_lowercase();
            n.contains("egfr") || n == "gfr"
        })
        .max_by_key(|l| l.observed_on)
        .map(|l| l.value)
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
