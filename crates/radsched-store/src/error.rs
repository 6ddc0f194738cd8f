// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Optimistic write lost the race; reload and retry the transition.
    #[error("version conflict on {entity} {id}")]
    Conflict { entity: &'static str, id: String },

    /// An active session already exists for this (tenant, phone-hash).
    #[error("active session already exists for tenant {tenant_id} phone {phone_hash_prefix}…")]
    ActiveSessionExists {
        tenant_id: String,
        phone_hash_prefix: String,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Backend hiccup worth retrying (connection drop, timeout, deadlock).
    #[error("transient storage error: {0}")]
    Transient(String),

    /// Backend is down; callers surface this as exit code 3.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
