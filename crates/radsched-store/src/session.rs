// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::StoreError;

/// Conversation lifecycle states.
///
/// `Confirmed`, `Cancelled`, and `Expired` are terminal; a terminal session
/// is immutable except for audit timestamps, and its (tenant, phone-hash)
/// slot is free for a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    ConsentPending,
    ChoosingOrder,
    ChoosingLocation,
    ChoosingTime,
    AwaitingSlots,
    Confirmed,
    Cancelled,
    Expired,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Cancelled | Self::Expired)
    }
}

/// One patient's in-flight scheduling dialog.
///
/// `order_data` holds the de-identified order snapshot array **by value**
/// so session writes never depend on order-store mutations. `version` is
/// the optimistic-concurrency counter: every successful update increments
/// it, and writers must present the version they read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub phone_hash: String,
    pub phone_encrypted: String,
    pub state: SessionState,
    /// JSON array of de-identified order snapshots.
    pub order_data: Value,
    /// Index into `order_data` once the patient picked an order.
    pub chosen_order: Option<usize>,
    /// Location ids as last offered, in message order. A numeric reply N
    /// selects `offered_locations[N-1]`.
    pub offered_locations: Vec<Uuid>,
    /// Slot objects as last offered, in message order (JSON array).
    pub offered_slots: Value,
    pub location_id: Option<Uuid>,
    pub slot_time: Option<DateTime<Utc>>,
    pub from_number: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// `started_at` + TTL. Never advances after creation.
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub slot_request_sent_at: Option<DateTime<Utc>>,
    pub slot_retry_count: u8,
    pub slot_request_failed_at: Option<DateTime<Utc>>,
    /// Unknown replies seen in the current choice state.
    pub reprompt_count: u8,
    pub version: u64,
}

impl Session {
    pub fn new(
        tenant_id: Uuid,
        phone_hash: &str,
        phone_encrypted: &str,
        initial_state: SessionState,
        order_data: Value,
        ttl_hours: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            phone_hash: phone_hash.to_string(),
            phone_encrypted: phone_encrypted.to_string(),
            state: initial_state,
            order_data,
            chosen_order: None,
            offered_locations: Vec::new(),
            offered_slots: Value::Array(Vec::new()),
            location_id: None,
            slot_time: None,
            from_number: None,
            started_at: now,
            updated_at: now,
            expires_at: now + Duration::hours(ttl_hours as i64),
            completed_at: None,
            slot_request_sent_at: None,
            slot_retry_count: 0,
            slot_request_failed_at: None,
            reprompt_count: 0,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to a terminal state and stamp completion.
    pub fn finish(&mut self, state: SessionState, now: DateTime<Utc>) {
        debug_assert!(state.is_terminal());
        self.state = state;
        self.completed_at = Some(now);
        self.updated_at = now;
    }
}

/// An order deferred because a session was already active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedOrder {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub phone_hash: String,
    pub order_data: Value,
    pub queued_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session.
    ///
    /// Fails with [`StoreError::ActiveSessionExists`] when a non-terminal
    /// session already holds the (tenant, phone-hash) slot. This is the
    /// uniqueness guard; callers must not check-then-insert around it.
    async fn create_session(&self, session: Session) -> Result<(), StoreError>;

    /// Compare-and-set update.
    ///
    /// `session.version` must equal the stored version; on success the
    /// stored row gets `version + 1` and the new version is returned.
    /// [`StoreError::Conflict`] means another writer won; reload and
    /// recompute the transition.
    async fn update_session(&self, session: &Session) -> Result<u64, StoreError>;

    async fn session(&self, id: Uuid) -> Result<Option<Session>, StoreError>;

    /// The non-terminal session for (tenant, phone-hash), if one exists.
    async fn active_session(
        &self,
        tenant_id: Uuid,
        phone_hash: &str,
    ) -> Result<Option<Session>, StoreError>;

    /// Non-terminal sessions with `expires_at < now` (TTL sweep input).
    async fn expired_sessions(&self, now: DateTime<Utc>) -> Result<Vec<Session>, StoreError>;

    /// Sessions in `AWAITING_SLOTS` whose request was sent before `cutoff`
    /// and has not failed yet (timeout sweep input).
    async fn stale_slot_requests(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError>;

    /// Park an order behind the active session.
    async fn enqueue_order(&self, order: QueuedOrder) -> Result<(), StoreError>;

    /// Oldest queued order for (tenant, phone-hash), removed from the queue.
    async fn dequeue_order(
        &self,
        tenant_id: Uuid,
        phone_hash: &str,
    ) -> Result<Option<QueuedOrder>, StoreError>;
}
