// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Order signal → equipment requirement extraction.

use radsched_catalog::{CapabilityRequirement, Modality};

use crate::clinical::PatientContext;
use crate::contrast::requires_contrast;

/// Slice floor shared by angiography and cardiac CT protocols.
const CT_ADVANCED_SLICE_FLOOR: u16 = 64;

/// Derive the equipment requirements for an order.
///
/// Signals come from the order description; the patient contributes the
/// bariatric requirement and MRI accommodation needs. The result is
/// deduplicated and order-independent.
pub fn required_capabilities(
    description: &str,
    modality: Modality,
    patient: &PatientContext,
) -> Vec<CapabilityRequirement> {
    let lower = description.to_lowercase();
    let mut reqs: Vec<CapabilityRequirement> = Vec::new();
    let mut push = |req: CapabilityRequirement, reqs: &mut Vec<CapabilityRequirement>| {
        if !reqs.contains(&req) {
            reqs.push(req);
        }
    };

    match modality {
        Modality::Ct => {
            let cardiac = lower.contains("cardiac") || lower.contains("coronary");
            let angio = has_token(&lower, "cta")
                || lower.contains("ct angio")
                || lower.contains("angiography");
            if cardiac {
                push(
                    CapabilityRequirement::CtMinSliceCount {
                        slices: CT_ADVANCED_SLICE_FLOOR,
                    },
                    &mut reqs,
                );
                push(CapabilityRequirement::CtCardiacGating, &mut reqs);
            }
            if angio {
                push(
                    CapabilityRequirement::CtMinSliceCount {
                        slices: CT_ADVANCED_SLICE_FLOOR,
                    },
                    &mut reqs,
                );
                push(CapabilityRequirement::CtContrastInjector, &mut reqs);
            }
            if requires_contrast(description) {
                push(CapabilityRequirement::CtContrastInjector, &mut reqs);
            }
        }
        Modality::Mri => {
            if has_token(&lower, "3t") || lower.contains("high field") {
                push(
                    CapabilityRequirement::MriMinFieldStrength { tesla: 3.0 },
                    &mut reqs,
                );
            }
            if lower.contains("wide bore")
                || lower.contains("claustrophob")
                || lower.contains("bariatric")
                || patient.claustrophobic
            {
                push(CapabilityRequirement::MriWideBore, &mut reqs);
            }
        }
        Modality::Mg => {
            if lower.contains("3d")
                || has_token(&lower, "dbt")
                || lower.contains("tomosynthesis")
            {
                push(CapabilityRequirement::Mammo3dTomo, &mut reqs);
            }
            if lower.contains("stereotactic") {
                push(CapabilityRequirement::MammoStereoBiopsy, &mut reqs);
            }
        }
        _ => {}
    }

    if patient.bariatric {
        push(
            CapabilityRequirement::BariatricSupport {
                patient_weight_kg: patient.weight_kg.unwrap_or(f32::MAX),
            },
            &mut reqs,
        );
    } else if let Some(weight) = patient.weight_kg {
        // No flag, but a known weight still has to fit the table rating.
        push(
            CapabilityRequirement::BariatricSupport {
                patient_weight_kg: weight,
            },
            &mut reqs,
        );
    }

    reqs
}

fn has_token(lower: &str, token: &str) -> bool {
    lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|t| t == token)
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
