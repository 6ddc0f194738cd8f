// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// A single equipment requirement derived from an order.
///
/// The serialized form is what crosses the wire to the slot source as
/// `requiredCapabilities[]`, so the tags are part of the external contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "capability", rename_all = "snake_case")]
pub enum CapabilityRequirement {
    CtMinSliceCount { slices: u16 },
    CtCardiacGating,
    CtContrastInjector,
    MriMinFieldStrength { tesla: f32 },
    MriWideBore,
    Mammo3dTomo,
    MammoStereoBiopsy,
    BariatricSupport { patient_weight_kg: f32 },
}

impl CapabilityRequirement {
    /// Short label for logs and scheduling notes.
    pub fn label(&self) -> &'static str {
        match self {
            Self::CtMinSliceCount { .. } => "ct_min_slice_count",
            Self::CtCardiacGating => "ct_cardiac_gating",
            Self::CtContrastInjector => "ct_contrast_injector",
            Self::MriMinFieldStrength { .. } => "mri_min_field_strength",
            Self::MriWideBore => "mri_wide_bore",
            Self::Mammo3dTomo => "mammo_3d_tomo",
            Self::MammoStereoBiopsy => "mammo_stereo_biopsy",
            Self::BariatricSupport { .. } => "bariatric_support",
        }
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
