// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use radsched_safety::PatientContext;
use uuid::Uuid;

use crate::SessionError;

/// Clinical context lookup, keyed by (tenant, phone-hash).
///
/// The RIS adapter behind this trait maps the phone back to a chart;
/// the core never stores that mapping. An empty context is a valid
/// answer and gates nothing.
#[async_trait]
pub trait PatientContextSource: Send + Sync {
    async fn patient_context(
        &self,
        tenant_id: Uuid,
        phone_hash: &str,
    ) -> Result<PatientContext, SessionError>;
}

/// Fixed context table for tests and rules-only deployments.
#[derive(Default)]
pub struct StaticPatientContexts {
    by_phone_hash: Mutex<HashMap<String, PatientContext>>,
}

impl StaticPatientContexts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, phone_hash: &str, context: PatientContext) {
        self.by_phone_hash
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(phone_hash.to_string(), context);
    }
}

#[async_trait]
impl PatientContextSource for StaticPatientContexts {
    async fn patient_context(
        &self,
        _tenant_id: Uuid,
        phone_hash: &str,
    ) -> Result<PatientContext, SessionError> {
        Ok(self
            .by_phone_hash
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(phone_hash)
            .cloned()
            .unwrap_or_default())
    }
}
