// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::CapabilityRequirement;

/// Imaging technique class, as it appears on the order wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Ct,
    Mri,
    Us,
    Xr,
    Mg,
    Nm,
    Pet,
    Fl,
}

#[derive(Debug, Error)]
#[error("unknown modality: {0}")]
pub struct ModalityParseError(pub String);

impl FromStr for Modality {
    type Err = ModalityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CT" => Ok(Self::Ct),
            "MRI" | "MR" => Ok(Self::Mri),
            "US" => Ok(Self::Us),
            "XR" | "CR" | "DX" => Ok(Self::Xr),
            "MG" => Ok(Self::Mg),
            "NM" => Ok(Self::Nm),
            "PET" | "PT" => Ok(Self::Pet),
            "FL" | "RF" => Ok(Self::Fl),
            other => Err(ModalityParseError(other.to_string())),
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ct => "CT",
            Self::Mri => "MRI",
            Self::Us => "US",
            Self::Xr => "XR",
            Self::Mg => "MG",
            Self::Nm => "NM",
            Self::Pet => "PET",
            Self::Fl => "FL",
        };
        write!(f, "{s}")
    }
}

/// One installed imaging unit at a location.
///
/// Capability columns are modality-specific; columns for other modalities
/// stay at their defaults and are never consulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquipmentUnit {
    pub modality: Modality,
    pub active: bool,

    // CT
    pub ct_slice_count: Option<u16>,
    pub ct_has_cardiac: bool,
    pub ct_has_contrast_injector: bool,
    pub ct_dual_energy: bool,

    // MRI
    pub mri_field_strength: Option<f32>,
    pub mri_bore_width_cm: Option<u16>,
    pub mri_has_cardiac: bool,
    pub mri_wide_bore: bool,

    // Mammography
    pub mammo_3d_tomo: bool,
    pub mammo_stereo_biopsy: bool,

    // Any modality
    pub max_patient_weight_kg: Option<f32>,
    pub has_bariatric_table: bool,
}

impl EquipmentUnit {
    /// An active unit of the given modality with no capabilities set.
    pub fn new(modality: Modality) -> Self {
        Self {
            modality,
            active: true,
            ct_slice_count: None,
            ct_has_cardiac: false,
            ct_has_contrast_injector: false,
            ct_dual_energy: false,
            mri_field_strength: None,
            mri_bore_width_cm: None,
            mri_has_cardiac: false,
            mri_wide_bore: false,
            mammo_3d_tomo: false,
            mammo_stereo_biopsy: false,
            max_patient_weight_kg: None,
            has_bariatric_table: false,
        }
    }

    /// Whether this unit satisfies a single requirement.
    ///
    /// Unset numeric columns (`None`) never satisfy a threshold.
    pub fn meets(&self, req: &CapabilityRequirement) -> bool {
        match req {
            CapabilityRequirement::CtMinSliceCount { slices } => {
                self.ct_slice_count.map_or(false, |s| s >= *slices)
            }
            CapabilityRequirement::CtCardiacGating => self.ct_has_cardiac,
            CapabilityRequirement::CtContrastInjector => self.ct_has_contrast_injector,
            CapabilityRequirement::MriMinFieldStrength { tesla } => {
                self.mri_field_strength.map_or(false, |f| f >= *tesla)
            }
            CapabilityRequirement::MriWideBore => self.mri_wide_bore,
            CapabilityRequirement::Mammo3dTomo => self.mammo_3d_tomo,
            CapabilityRequirement::MammoStereoBiopsy => self.mammo_stereo_biopsy,
            CapabilityRequirement::BariatricSupport { patient_weight_kg } => {
                self.has_bariatric_table
                    || self
                        .max_patient_weight_kg
                        .map_or(false, |max| max >= *patient_weight_kg)
            }
        }
    }

    pub fn meets_all(&self, reqs: &[CapabilityRequirement]) -> bool {
        reqs.iter().all(|r| self.meets(r))
    }
}

/// An imaging location the patient can be offered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    /// Front-desk callback number, used in patient-facing messages.
    pub phone: String,
    pub active: bool,
    pub units: Vec<EquipmentUnit>,
}

impl Location {
    /// True when an active unit of `modality` meets every requirement.
    pub fn can_host(&self, modality: Modality, required: &[CapabilityRequirement]) -> bool {
        self.active
            && self
                .units
                .iter()
                .any(|u| u.active && u.modality == modality && u.meets_all(required))
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
