// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Safety and capability gate.
//!
//! A pure function over (order, patient context, candidate locations):
//! no storage, no clock, no I/O. The caller supplies `today` so the
//! wash-out window is testable. The gate never talks to the patient;
//! it returns a decision and the state machine chooses the words.

mod capability;
mod clinical;
mod contrast;

pub use capability::required_capabilities;
pub use clinical::{Allergy, AllergySeverity, LabResult, PatientContext};
pub use contrast::{contrast_kind, requires_contrast, ContrastKind};

use chrono::NaiveDate;
use radsched_catalog::{CapabilityRequirement, Catalog, Modality};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The order fields the gate consults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFacts {
    pub description: String,
    pub modality: Modality,
    pub cpt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GateDecision {
    Proceed,
    ProceedWithWarnings,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockReason {
    ContrastAllergySevere,
    RenalFunctionCritical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningReason {
    ContrastAllergy,
    RenalFunctionLow,
    RecentContrast,
}

/// Gate output, consumed by the state machine and the slot request builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateAssessment {
    pub decision: GateDecision,
    pub blocks: Vec<BlockReason>,
    pub warnings: Vec<WarningReason>,
    /// Earliest allowed appointment date (contrast wash-out).
    pub min_schedule_date: Option<NaiveDate>,
    /// Candidate locations that can host the order, in candidate order.
    pub eligible_locations: Vec<Uuid>,
    /// Equipment requirements derived from the order and patient.
    pub required_capabilities: Vec<CapabilityRequirement>,
}

impl GateAssessment {
    pub fn is_blocked(&self) -> bool {
        self.decision == GateDecision::Block
    }
}

/// Evaluate the gate.
///
/// `candidates` restricts the eligible set (e.g. to the tenant's locations);
/// `None` considers the whole catalog. `today` anchors the wash-out window.
pub fn evaluate(
    order: &OrderFacts,
    patient: &PatientContext,
    catalog: &Catalog,
    candidates: Option<&[Uuid]>,
    today: NaiveDate,
) -> GateAssessment {
    let contrast = requires_contrast(&order.description);

    let findings = clinical::evaluate(order, patient, contrast, today);
    let required = required_capabilities(&order.description, order.modality, patient);
    let eligible = catalog
        .eligible_locations(order.modality, &required, candidates)
        .iter()
        .map(|l| l.id)
        .collect();

    let decision = if !findings.blocks.is_empty() {
        GateDecision::Block
    } else if !findings.warnings.is_empty() {
        GateDecision::ProceedWithWarnings
    } else {
        GateDecision::Proceed
    };

    GateAssessment {
        decision,
        blocks: findings.blocks,
        warnings: findings.warnings,
        min_schedule_date: findings.min_schedule_date,
        eligible_locations: eligible,
        required_capabilities: required,
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
