// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Equipment catalog: which imaging locations can perform which orders.
//!
//! A location owns one equipment row per installed unit. Eligibility is a
//! pure function: a location can host an order iff at least one **active**
//! unit of the ordered modality meets **all** required capabilities.

mod capability;
mod equipment;

pub use capability::CapabilityRequirement;
pub use equipment::{EquipmentUnit, Location, Modality, ModalityParseError};

use uuid::Uuid;

/// In-memory view of the tenant's locations.
///
/// The catalog is read-mostly; callers hold it per request. The store is
/// authoritative and reloads replace the whole value.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    locations: Vec<Location>,
}

impl Catalog {
    pub fn new(locations: Vec<Location>) -> Self {
        Self { locations }
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn location(&self, id: Uuid) -> Option<&Location> {
        self.locations.iter().find(|l| l.id == id)
    }

    /// Ids of all active locations belonging to a tenant, in catalog order.
    pub fn tenant_locations(&self, tenant_id: Uuid) -> Vec<Uuid> {
        self.locations
            .iter()
            .filter(|l| l.tenant_id == tenant_id && l.active)
            .map(|l| l.id)
            .collect()
    }

    /// All active locations able to host `modality` with `required` capabilities.
    ///
    /// When `candidates` is given, the result is restricted to that set, in
    /// candidate order. Otherwise all locations are considered in catalog
    /// order. Inactive locations and inactive units never qualify.
    pub fn eligible_locations(
        &self,
        modality: Modality,
        required: &[CapabilityRequirement],
        candidates: Option<&[Uuid]>,
    ) -> Vec<&Location> {
        let considered: Vec<&Location> = match candidates {
            Some(ids) => ids.iter().filter_map(|id| self.location(*id)).collect(),
            None => self.locations.iter().collect(),
        };
        considered
            .into_iter()
            .filter(|loc| loc.can_host(modality, required))
            .collect()
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
