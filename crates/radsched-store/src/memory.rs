// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! In-memory backend.
//!
//! Enforces the same invariants the relational backend contracts:
//! the active-session uniqueness guard is checked under the same lock
//! that performs the insert, and session updates are compare-and-set on
//! the version counter. Used by tests and by single-process deployments
//! that accept losing state on restart.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    AnalysisLogEntry, AnalysisLogStore, AuditEntry, AuditSink, ConsentRecord, ConsentStore,
    PromptStore, PromptTemplate, QueuedOrder, Session, SessionState, SessionStore, StoreError,
    Tenant, TenantStore,
};

#[derive(Default)]
struct Inner {
    tenants: HashMap<Uuid, Tenant>,
    sessions: HashMap<Uuid, Session>,
    consent: Vec<ConsentRecord>,
    prompts: Vec<PromptTemplate>,
    audit: Vec<AuditEntry>,
    analysis: Vec<AnalysisLogEntry>,
    queued_orders: Vec<QueuedOrder>,
}

/// Process-local store. Cheap to clone behind an `Arc`.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a writer panicked mid-update; the data is
        // test-scoped, so recover rather than cascade.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TenantStore for MemoryStore {
    async fn tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, StoreError> {
        Ok(self.lock().tenants.values().find(|t| t.slug == slug).cloned())
    }

    async fn tenant_by_id(&self, id: Uuid) -> Result<Option<Tenant>, StoreError> {
        Ok(self.lock().tenants.get(&id).cloned())
    }

    async fn upsert_tenant(&self, tenant: Tenant) -> Result<(), StoreError> {
        self.lock().tenants.insert(tenant.id, tenant);
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, session: Session) -> Result<(), StoreError> {
        let mut inner = self.lock();
        // Uniqueness guard: one non-terminal session per (tenant, phone).
        // Checked and inserted under one lock, like a unique partial index.
        let clash = inner.sessions.values().any(|s| {
            s.tenant_id == session.tenant_id
                && s.phone_hash == session.phone_hash
                && !s.is_terminal()
        });
        if clash {
            return Err(StoreError::ActiveSessionExists {
                tenant_id: session.tenant_id.to_string(),
                phone_hash_prefix: session.phone_hash.chars().take(8).collect(),
            });
        }
        inner.sessions.insert(session.id, session);
        Ok(())
    }

    async fn update_session(&self, session: &Session) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let stored = inner
            .sessions
            .get_mut(&session.id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "session",
                id: session.id.to_string(),
            })?;
        if stored.version != session.version {
            return Err(StoreError::Conflict {
                entity: "session",
                id: session.id.to_string(),
            });
        }
        let mut updated = session.clone();
        updated.version += 1;
        let new_version = updated.version;
        *stored = updated;
        Ok(new_version)
    }

    async fn session(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.lock().sessions.get(&id).cloned())
    }

    async fn active_session(
        &self,
        tenant_id: Uuid,
        phone_hash: &str,
    ) -> Result<Option<Session>, StoreError> {
        Ok(self
            .lock()
            .sessions
            .values()
            .find(|s| {
                s.tenant_id == tenant_id && s.phone_hash == phone_hash && !s.is_terminal()
            })
            .cloned())
    }

    async fn expired_sessions(&self, now: DateTime<Utc>) -> Result<Vec<Session>, StoreError> {
        Ok(self
            .lock()
            .sessions
            .values()
            .filter(|s| !s.is_terminal() && s.expires_at < now)
            .cloned()
            .collect())
    }

    async fn stale_slot_requests(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError> {
        Ok(self
            .lock()
            .sessions
            .values()
            .filter(|s| {
                s.state == SessionState::AwaitingSlots
                    && s.slot_request_failed_at.is_none()
                    && s.slot_request_sent_at.map_or(false, |t| t < cutoff)
            })
            .cloned()
            .collect())
    }

    async fn enqueue_order(&self, order: QueuedOrder) -> Result<(), StoreError> {
        self.lock().queued_orders.push(order);
        Ok(())
    }

    async fn dequeue_order(
        &self,
        tenant_id: Uuid,
        phone_hash: &str,
    ) -> Result<Option<QueuedOrder>, StoreError> {
        let mut inner = self.lock();
        let pos = inner
            .queued_orders
            .iter()
            .position(|q| q.tenant_id == tenant_id && q.phone_hash == phone_hash);
        Ok(pos.map(|i| inner.queued_orders.remove(i)))
    }
}

#[async_trait]
impl ConsentStore for MemoryStore {
    async fn append_consent(&self, record: ConsentRecord) -> Result<(), StoreError> {
        self.lock().consent.push(record);
        Ok(())
    }

    async fn latest_consent(
        &self,
        tenant_id: Uuid,
        phone_hash: &str,
    ) -> Result<Option<ConsentRecord>, StoreError> {
        Ok(self
            .lock()
            .consent
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.phone_hash == phone_hash)
            .max_by_key(|r| r.consent_timestamp)
            .cloned())
    }
}

#[async_trait]
impl PromptStore for MemoryStore {
    async fn active_prompts(&self, prefix: &str) -> Result<Vec<PromptTemplate>, StoreError> {
        Ok(self
            .lock()
            .prompts
            .iter()
            .filter(|p| p.is_active && p.key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn upsert_prompt(&self, template: PromptTemplate) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(existing) = inner.prompts.iter_mut().find(|p| p.id == template.id) {
            *existing = template;
        } else {
            inner.prompts.push(template);
        }
        Ok(())
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn append_audit(&self, entry: AuditEntry) -> Result<(), StoreError> {
        self.lock().audit.push(entry);
        Ok(())
    }

    async fn audit_trail(
        &self,
        tenant_id: Uuid,
        phone_hash: &str,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self
            .lock()
            .audit
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.phone_hash == phone_hash)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AnalysisLogStore for MemoryStore {
    async fn append_analysis(&self, entry: AnalysisLogEntry) -> Result<(), StoreError> {
        self.lock().analysis.push(entry);
        Ok(())
    }

    async fn analysis_log(&self) -> Result<Vec<AnalysisLogEntry>, StoreError> {
        Ok(self.lock().analysis.clone())
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
