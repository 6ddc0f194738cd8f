// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use radsched_analyze::{EquipmentProfile, OrderAnalysisInput, OrderAnalyzer};
use radsched_catalog::{Catalog, Location, Modality};
use radsched_identity::{last_four, normalize_phone, phone_hash, PhoneCipher};
use radsched_safety::{GateAssessment, OrderFacts, PatientContext};
use radsched_sms::{DispatchError, InboundSms, SendRequest, SmsDispatcher};
use radsched_store::{
    with_retry, AuditEntry, AuditSink, ConsentMethod, ConsentRecord, ConsentStore, Direction,
    DurationStacking, MessageTag, QueuedOrder, Session, SessionState, SessionStore,
    StackingPolicy, StoreError, Tenant, TenantStore,
};

use crate::keywords::{classify, Reply};
use crate::messages;
use crate::order::{snapshots_from_value, snapshots_to_value, OrderEvent, OrderSnapshot};
use crate::patients::PatientContextSource;
use crate::slots::{BookingRequest, Slot, SlotRequest, SlotSource};
use crate::SessionError;

/// Menu caps: a numbered SMS menu stops being usable past one digit, and
/// five times is the sweet spot between choice and scroll.
const MAX_OFFERED_LOCATIONS: usize = 9;
const MAX_OFFERED_SLOTS: usize = 5;

/// Attempts for the read-compute-write cycle when CAS loses a race.
const CAS_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub session_ttl_hours: u64,
    /// Age of an unanswered slot request before the sweep acts on it.
    pub slot_timeout_secs: u64,
    /// Deadline for one slot-source HTTP call.
    pub slot_call_deadline_secs: u64,
    /// Unknown replies tolerated per choice state before cancelling.
    pub max_reprompts: u8,
    /// Slot request retries before giving up.
    pub slot_max_retries: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_ttl_hours: 24,
            slot_timeout_secs: 60,
            slot_call_deadline_secs: 10,
            max_reprompts: 3,
            slot_max_retries: 1,
        }
    }
}

/// What happened to an inbound order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderDisposition {
    SessionStarted(Uuid),
    /// Safety gate blocked the order; session created and cancelled with
    /// the "please call" message.
    Blocked(Uuid),
    /// No active location can host the order.
    NoEligibleLocation(Uuid),
    /// A session was already active; the order is queued behind it.
    Deferred,
    /// The active session was cancelled in favor of this order.
    Superseded(Uuid),
    /// Latest consent is a revocation; no session, nothing sent.
    RefusedRevoked,
}

/// What happened to an inbound SMS reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundDisposition {
    Advanced(SessionState),
    Reprompted,
    Cancelled,
    /// Global keyword handled without a session state change.
    OutOfBand,
    NoSession,
    Ignored,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub transitioned: usize,
}

/// The conversation engine. One instance serves every tenant; all state
/// lives in the store.
pub struct ConversationEngine {
    sessions: Arc<dyn SessionStore>,
    consent: Arc<dyn ConsentStore>,
    tenants: Arc<dyn TenantStore>,
    audit: Arc<dyn AuditSink>,
    dispatcher: Arc<SmsDispatcher>,
    slot_source: Arc<dyn SlotSource>,
    analyzer: Arc<OrderAnalyzer>,
    patients: Arc<dyn PatientContextSource>,
    catalog: Catalog,
    cipher: Arc<PhoneCipher>,
    config: EngineConfig,
}

impl ConversationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        consent: Arc<dyn ConsentStore>,
        tenants: Arc<dyn TenantStore>,
        audit: Arc<dyn AuditSink>,
        dispatcher: Arc<SmsDispatcher>,
        slot_source: Arc<dyn SlotSource>,
        analyzer: Arc<OrderAnalyzer>,
        patients: Arc<dyn PatientContextSource>,
        catalog: Catalog,
        cipher: Arc<PhoneCipher>,
        config: EngineConfig,
    ) -> Self {
        Self {
            sessions,
            consent,
            tenants,
            audit,
            dispatcher,
            slot_source,
            analyzer,
            patients,
            catalog,
            cipher,
            config,
        }
    }

    // ── Order events ──────────────────────────────────────────────────────────

    pub async fn handle_order_event(
        &self,
        tenant_slug: &str,
        event: OrderEvent,
    ) -> Result<OrderDisposition, SessionError> {
        self.handle_order_batch(tenant_slug, vec![event]).await
    }

    /// Handle one or more orders for the same patient arriving together.
    ///
    /// Same-modality batches are scheduled as one combined appointment
    /// (duration per the tenant's stacking rule); mixed-modality batches
    /// go through order disambiguation first.
    pub async fn handle_order_batch(
        &self,
        tenant_slug: &str,
        events: Vec<OrderEvent>,
    ) -> Result<OrderDisposition, SessionError> {
        let first = events
            .first()
            .ok_or_else(|| SessionError::Validation("empty order batch".into()))?;
        let tenant = self.tenant_by_slug(tenant_slug).await?;
        let phone = normalize_phone(&first.patient_phone)?;
        for e in &events[1..] {
            if normalize_phone(&e.patient_phone)? != phone {
                return Err(SessionError::Validation(
                    "order batch spans multiple patients".into(),
                ));
            }
        }
        let hash = phone_hash(&phone);
        let snapshots: Vec<OrderSnapshot> = events
            .iter()
            .map(OrderSnapshot::from_event)
            .collect::<Result<_, _>>()?;
        let now = Utc::now();

        if let Some(active) = self.sessions.active_session(tenant.id, &hash).await? {
            match tenant.stacking_policy {
                StackingPolicy::Defer => {
                    info!(session = %active.id, "session active, deferring new order");
                    self.sessions
                        .enqueue_order(QueuedOrder {
                            id: Uuid::new_v4(),
                            tenant_id: tenant.id,
                            phone_hash: hash.clone(),
                            order_data: snapshots_to_value(&snapshots),
                            queued_at: now,
                        })
                        .await?;
                    return Ok(OrderDisposition::Deferred);
                }
                StackingPolicy::Supersede => {
                    info!(session = %active.id, "superseding active session");
                    let mut cancelled = active.clone();
                    cancelled.finish(SessionState::Cancelled, now);
                    self.sessions.update_session(&cancelled).await?;
                    let started = self
                        .start_session(&tenant, &phone, &hash, snapshots, now)
                        .await?;
                    return Ok(match started {
                        OrderDisposition::SessionStarted(id) => OrderDisposition::Superseded(id),
                        other => other,
                    });
                }
            }
        }

        self.start_session(&tenant, &phone, &hash, snapshots, now).await
    }

    async fn start_session(
        &self,
        tenant: &Tenant,
        phone: &str,
        hash: &str,
        snapshots: Vec<OrderSnapshot>,
        now: DateTime<Utc>,
    ) -> Result<OrderDisposition, SessionError> {
        let latest = self.consent.latest_consent(tenant.id, hash).await?;
        if latest.as_ref().map_or(false, |c| c.is_revocation()) {
            info!("phone has revoked consent, not starting a session");
            return Ok(OrderDisposition::RefusedRevoked);
        }
        let has_consent = latest.map_or(false, |c| c.consent_given);

        let patient = self.patients.patient_context(tenant.id, hash).await?;
        let mixed_modalities = snapshots
            .iter()
            .any(|s| s.modality != snapshots[0].modality);

        let initial = if !has_consent {
            SessionState::ConsentPending
        } else if mixed_modalities {
            SessionState::ChoosingOrder
        } else {
            SessionState::ChoosingLocation
        };

        let encrypted = self.cipher.encrypt(phone)?;
        let mut session = Session::new(
            tenant.id,
            hash,
            &encrypted,
            initial,
            snapshots_to_value(&snapshots),
            self.config.session_ttl_hours,
            now,
        );

        // Gate up front: a blocked order never gets a menu, whatever the
        // consent situation.
        let gate = self.gate_for(tenant, &snapshots[0], &patient, None, now);
        if gate.is_blocked() {
            if !self.create_or_defer(tenant, &session, &snapshots, now).await? {
                return Ok(OrderDisposition::Deferred);
            }
            let id = session.id;
            let body = messages::safety_fallback(self.office_phone(None).as_deref());
            let prior = session.clone();
            let mut cancelled = session;
            cancelled.finish(SessionState::Cancelled, now);
            self.advance(
                tenant,
                &prior,
                cancelled,
                Some((MessageTag::SafetyFallback, body, false)),
                now,
            )
            .await?;
            return Ok(OrderDisposition::Blocked(id));
        }

        let (tag, body) = match initial {
            SessionState::ConsentPending => (
                MessageTag::Consent,
                messages::consent_prompt(snapshots[0].exam_name()),
            ),
            SessionState::ChoosingOrder => {
                let names: Vec<&str> = snapshots.iter().map(|s| s.exam_name()).collect();
                (MessageTag::OrderList, messages::order_list(&names))
            }
            SessionState::ChoosingLocation => {
                if gate.eligible_locations.is_empty() {
                    if !self.create_or_defer(tenant, &session, &snapshots, now).await? {
                        return Ok(OrderDisposition::Deferred);
                    }
                    let id = session.id;
                    let body = messages::safety_fallback(self.office_phone(None).as_deref());
                    let prior = session.clone();
                    let mut cancelled = session;
                    cancelled.finish(SessionState::Cancelled, now);
                    self.advance(
                        tenant,
                        &prior,
                        cancelled,
                        Some((MessageTag::SafetyFallback, body, false)),
                        now,
                    )
                    .await?;
                    return Ok(OrderDisposition::NoEligibleLocation(id));
                }
                session.offered_locations = gate
                    .eligible_locations
                    .iter()
                    .copied()
                    .take(MAX_OFFERED_LOCATIONS)
                    .collect();
                let locations = self.locations_by_ids(&session.offered_locations);
                (
                    MessageTag::LocationList,
                    messages::location_list(snapshots[0].exam_name(), &locations, None),
                )
            }
            _ => unreachable!("initial state is never terminal"),
        };

        if !self.create_or_defer(tenant, &session, &snapshots, now).await? {
            return Ok(OrderDisposition::Deferred);
        }
        let prior = session.clone();
        let after = self
            .advance(tenant, &prior, session, Some((tag, body, false)), now)
            .await?;
        Ok(OrderDisposition::SessionStarted(after.id))
    }

    /// Insert the session, or queue the order when a concurrent writer
    /// took the (tenant, phone) slot first. Returns `false` on deferral.
    async fn create_or_defer(
        &self,
        tenant: &Tenant,
        session: &Session,
        snapshots: &[OrderSnapshot],
        now: DateTime<Utc>,
    ) -> Result<bool, SessionError> {
        match self.sessions.create_session(session.clone()).await {
            Ok(()) => Ok(true),
            Err(StoreError::ActiveSessionExists { .. }) => {
                info!("lost session-creation race, deferring order");
                self.sessions
                    .enqueue_order(QueuedOrder {
                        id: Uuid::new_v4(),
                        tenant_id: tenant.id,
                        phone_hash: session.phone_hash.clone(),
                        order_data: snapshots_to_value(snapshots),
                        queued_at: now,
                    })
                    .await?;
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    // ── Inbound SMS ───────────────────────────────────────────────────────────

    /// Process one verified inbound SMS.
    ///
    /// The webhook layer has already checked the carrier signature; this
    /// method audits the message, honors global keywords, and advances
    /// the matching session. Lost CAS races are retried with a fresh read.
    pub async fn handle_inbound_sms(
        &self,
        tenant_slug: &str,
        inbound: &InboundSms,
    ) -> Result<InboundDisposition, SessionError> {
        let tenant = self.tenant_by_slug(tenant_slug).await?;
        let phone = normalize_phone(&inbound.from)?;
        let hash = phone_hash(&phone);
        let now = Utc::now();

        let entry = AuditEntry {
            id: Uuid::new_v4(),
            tenant_id: tenant.id,
            phone_hash: hash.clone(),
            phone_last_four: last_four(&phone),
            direction: Direction::Inbound,
            message_tag: MessageTag::Inbound,
            from_number: None,
            provider: None,
            provider_message_id: inbound.provider_message_id.clone(),
            success: true,
            error_code: None,
            at: now,
        };
        with_retry("audit inbound sms", || self.audit.append_audit(entry.clone())).await?;

        let reply = classify(&inbound.body);

        // Global keywords are honored with or without an active session.
        match reply {
            Reply::Stop => return self.handle_stop(&tenant, &phone, &hash, now).await,
            Reply::Help => {
                let body = messages::help(self.office_phone(None).as_deref());
                self.send_loose(&tenant, &phone, &hash, MessageTag::Help, body, false)
                    .await
                    .ok();
                return Ok(InboundDisposition::OutOfBand);
            }
            _ => {}
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some(session) = self.sessions.active_session(tenant.id, &hash).await? else {
                debug!("inbound reply matches no active session");
                return Ok(InboundDisposition::NoSession);
            };
            match self.apply_reply(&tenant, session, reply, now).await {
                Err(SessionError::Storage(StoreError::Conflict { .. }))
                    if attempt < CAS_ATTEMPTS =>
                {
                    debug!(attempt, "session write conflict, retrying with fresh read");
                    continue;
                }
                other => return other,
            }
        }
    }

    async fn handle_stop(
        &self,
        tenant: &Tenant,
        phone: &str,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<InboundDisposition, SessionError> {
        self.consent
            .append_consent(ConsentRecord::revoked(tenant.id, hash, "SMS STOP", now))
            .await?;

        if let Some(active) = self.sessions.active_session(tenant.id, hash).await? {
            let prior = active.clone();
            let mut cancelled = active;
            cancelled.finish(SessionState::Cancelled, now);
            // The acknowledgment is the one send allowed past revocation.
            self.advance(
                tenant,
                &prior,
                cancelled,
                Some((MessageTag::Cancellation, messages::stop_ack(), true)),
                now,
            )
            .await?;
            return Ok(InboundDisposition::Cancelled);
        }

        // Out-of-band STOP still gets the carrier-mandated acknowledgment.
        self.send_loose(tenant, phone, hash, MessageTag::Cancellation, messages::stop_ack(), true)
            .await
            .ok();
        Ok(InboundDisposition::OutOfBand)
    }

    async fn apply_reply(
        &self,
        tenant: &Tenant,
        session: Session,
        reply: Reply,
        now: DateTime<Utc>,
    ) -> Result<InboundDisposition, SessionError> {
        match session.state {
            SessionState::ConsentPending => match reply {
                Reply::Yes => self.grant_consent_and_offer(tenant, session, now).await,
                Reply::No => {
                    let body = messages::goodbye(self.office_phone(None).as_deref());
                    self.cancel_with(tenant, session, MessageTag::Cancellation, body, now)
                        .await?;
                    Ok(InboundDisposition::Cancelled)
                }
                _ => self.reprompt(tenant, session, now).await,
            },
            SessionState::ChoosingOrder => match reply {
                Reply::Choice(n) => self.choose_order(tenant, session, n as usize, now).await,
                _ => self.reprompt(tenant, session, now).await,
            },
            SessionState::ChoosingLocation => match reply {
                Reply::Choice(n) => self.choose_location(tenant, session, n as usize, now).await,
                _ => self.reprompt(tenant, session, now).await,
            },
            SessionState::ChoosingTime => match reply {
                Reply::Choice(n) => self.choose_time(tenant, session, n as usize, now).await,
                _ => self.reprompt(tenant, session, now).await,
            },
            // A reply while the slot request is in flight changes nothing;
            // the answer arrives or the sweep acts.
            SessionState::AwaitingSlots => Ok(InboundDisposition::Ignored),
            _ => Ok(InboundDisposition::Ignored),
        }
    }

    async fn grant_consent_and_offer(
        &self,
        tenant: &Tenant,
        session: Session,
        now: DateTime<Utc>,
    ) -> Result<InboundDisposition, SessionError> {
        self.consent
            .append_consent(ConsentRecord::granted(
                tenant.id,
                &session.phone_hash,
                ConsentMethod::SmsReply,
                now,
            ))
            .await?;

        let snapshots = self.snapshots(&session)?;
        let mixed = snapshots.iter().any(|s| s.modality != snapshots[0].modality);
        if mixed {
            let names: Vec<&str> = snapshots.iter().map(|s| s.exam_name()).collect();
            let body = messages::order_list(&names);
            let prior = session.clone();
            let mut next = session;
            next.state = SessionState::ChoosingOrder;
            next.reprompt_count = 0;
            self.advance(tenant, &prior, next, Some((MessageTag::OrderList, body, false)), now)
                .await?;
            return Ok(InboundDisposition::Advanced(SessionState::ChoosingOrder));
        }

        self.offer_locations(tenant, session, &snapshots[0], now).await
    }

    /// Move a session into `CHOOSING_LOCATION` for the given order,
    /// re-running the gate against the current catalog.
    async fn offer_locations(
        &self,
        tenant: &Tenant,
        session: Session,
        order: &OrderSnapshot,
        now: DateTime<Utc>,
    ) -> Result<InboundDisposition, SessionError> {
        let patient = self
            .patients
            .patient_context(tenant.id, &session.phone_hash)
            .await?;
        let gate = self.gate_for(tenant, order, &patient, None, now);

        if gate.is_blocked() || gate.eligible_locations.is_empty() {
            let body = messages::safety_fallback(self.office_phone(None).as_deref());
            self.cancel_with(tenant, session, MessageTag::SafetyFallback, body, now)
                .await?;
            return Ok(InboundDisposition::Cancelled);
        }

        let prior = session.clone();
        let mut next = session;
        next.state = SessionState::ChoosingLocation;
        next.offered_locations = gate
            .eligible_locations
            .iter()
            .copied()
            .take(MAX_OFFERED_LOCATIONS)
            .collect();
        next.reprompt_count = 0;
        let locations = self.locations_by_ids(&next.offered_locations);
        let body = messages::location_list(order.exam_name(), &locations, None);
        self.advance(
            tenant,
            &prior,
            next,
            Some((MessageTag::LocationList, body, false)),
            now,
        )
        .await?;
        Ok(InboundDisposition::Advanced(SessionState::ChoosingLocation))
    }

    async fn choose_order(
        &self,
        tenant: &Tenant,
        session: Session,
        n: usize,
        now: DateTime<Utc>,
    ) -> Result<InboundDisposition, SessionError> {
        let snapshots = self.snapshots(&session)?;
        if n == 0 || n > snapshots.len() {
            return self.reprompt(tenant, session, now).await;
        }
        let order = snapshots[n - 1].clone();
        let mut chosen = session;
        chosen.chosen_order = Some(n - 1);
        self.offer_locations(tenant, chosen, &order, now).await
    }

    async fn choose_location(
        &self,
        tenant: &Tenant,
        session: Session,
        n: usize,
        now: DateTime<Utc>,
    ) -> Result<InboundDisposition, SessionError> {
        let Some(&location_id) = session
            .offered_locations
            .get(n.wrapping_sub(1))
            .filter(|_| n >= 1)
        else {
            return self.reprompt(tenant, session, now).await;
        };

        let snapshots = self.snapshots(&session)?;
        let order = self.chosen_snapshot(&session, &snapshots).clone();
        let patient = self
            .patients
            .patient_context(tenant.id, &session.phone_hash)
            .await?;

        // Guard: the choice must still pass the gate for this location.
        let gate = self.gate_for(tenant, &order, &patient, Some(&[location_id]), now);
        if gate.is_blocked() || gate.eligible_locations.is_empty() {
            return self.reprompt(tenant, session, now).await;
        }

        let duration = self
            .required_duration(tenant, &session, &snapshots, &patient, location_id)
            .await;

        // AWAITING_SLOTS is persisted together with the request timestamp
        // before the external call, so a cancelled task leaves nothing
        // half-open for the timeout sweep to misread.
        let prior = session.clone();
        let mut next = session;
        next.location_id = Some(location_id);
        next.state = SessionState::AwaitingSlots;
        next.slot_request_sent_at = Some(now);
        next.slot_retry_count = 0;
        next.slot_request_failed_at = None;
        next.reprompt_count = 0;
        let next = self.advance(tenant, &prior, next, None, now).await?;

        let request = SlotRequest {
            tenant_id: tenant.id,
            location_id,
            modality: order.modality,
            required_duration_minutes: duration,
            earliest_date: earliest_date(&gate, now),
            required_capabilities: gate.required_capabilities,
        };
        self.fetch_and_process(tenant, next, &request, now).await
    }

    /// Fire the slot-source call and process an immediate answer. A slow
    /// or failing source leaves the session in `AWAITING_SLOTS` for the
    /// timeout sweep.
    async fn fetch_and_process(
        &self,
        tenant: &Tenant,
        session: Session,
        request: &SlotRequest,
        now: DateTime<Utc>,
    ) -> Result<InboundDisposition, SessionError> {
        let deadline = StdDuration::from_secs(self.config.slot_call_deadline_secs);
        match tokio::time::timeout(deadline, self.slot_source.fetch_slots(request)).await {
            Ok(Ok(slots)) => self.process_slot_response(tenant, session, slots, now).await,
            Ok(Err(e)) => {
                warn!("slot source error, leaving session awaiting retry: {e}");
                Ok(InboundDisposition::Advanced(SessionState::AwaitingSlots))
            }
            Err(_) => {
                warn!("slot source call exceeded deadline, awaiting retry");
                Ok(InboundDisposition::Advanced(SessionState::AwaitingSlots))
            }
        }
    }

    async fn process_slot_response(
        &self,
        tenant: &Tenant,
        session: Session,
        slots: Vec<Slot>,
        now: DateTime<Utc>,
    ) -> Result<InboundDisposition, SessionError> {
        let snapshots = self.snapshots(&session)?;
        let order = self.chosen_snapshot(&session, &snapshots).clone();

        if slots.is_empty() {
            // Offer the remaining locations, or give up if none are left.
            let tried = session.location_id;
            let remaining: Vec<Uuid> = session
                .offered_locations
                .iter()
                .copied()
                .filter(|id| Some(*id) != tried)
                .collect();
            if remaining.is_empty() {
                let body = messages::slot_failure(self.office_phone(Some(&session)).as_deref());
                self.cancel_with(tenant, session, MessageTag::Cancellation, body, now)
                    .await?;
                return Ok(InboundDisposition::Cancelled);
            }
            let prior = session.clone();
            let mut next = session;
            next.state = SessionState::ChoosingLocation;
            next.location_id = None;
            next.slot_request_sent_at = None;
            next.offered_locations = remaining;
            next.reprompt_count = 0;
            let locations = self.locations_by_ids(&next.offered_locations);
            let body = messages::location_list(
                order.exam_name(),
                &locations,
                Some(messages::no_slots_notice()),
            );
            self.advance(
                tenant,
                &prior,
                next,
                Some((MessageTag::LocationList, body, false)),
                now,
            )
            .await?;
            return Ok(InboundDisposition::Advanced(SessionState::ChoosingLocation));
        }

        let shown: Vec<Slot> = slots.into_iter().take(MAX_OFFERED_SLOTS).collect();
        let location_name = session
            .location_id
            .and_then(|id| self.catalog.location(id))
            .map(|l| l.name.clone())
            .unwrap_or_else(|| "the imaging center".into());
        let body = messages::slot_list(&shown, &location_name);

        let prior = session.clone();
        let mut next = session;
        next.state = SessionState::ChoosingTime;
        next.offered_slots = serde_json::to_value(&shown).unwrap_or_default();
        next.slot_request_sent_at = None;
        next.reprompt_count = 0;
        self.advance(tenant, &prior, next, Some((MessageTag::SlotList, body, false)), now)
            .await?;
        Ok(InboundDisposition::Advanced(SessionState::ChoosingTime))
    }

    async fn choose_time(
        &self,
        tenant: &Tenant,
        session: Session,
        n: usize,
        now: DateTime<Utc>,
    ) -> Result<InboundDisposition, SessionError> {
        let slots: Vec<Slot> = serde_json::from_value(session.offered_slots.clone())
            .map_err(|e| SessionError::Validation(format!("corrupt offered_slots: {e}")))?;
        let Some(slot) = slots.get(n.wrapping_sub(1)).filter(|_| n >= 1) else {
            return self.reprompt(tenant, session, now).await;
        };

        let snapshots = self.snapshots(&session)?;
        let to_book: Vec<&OrderSnapshot> = match session.chosen_order {
            Some(i) => snapshots.get(i).into_iter().collect(),
            None => snapshots
                .iter()
                .filter(|s| s.modality == snapshots[0].modality)
                .collect(),
        };

        let deadline = StdDuration::from_secs(self.config.slot_call_deadline_secs);
        for order in &to_book {
            let booking = BookingRequest {
                tenant_id: tenant.id,
                slot_id: slot.slot_id.clone(),
                order_id: order.order_id.clone(),
                patient_phone_encrypted: session.phone_encrypted.clone(),
            };
            let result = tokio::time::timeout(deadline, self.slot_source.book(&booking)).await;
            let failed = !matches!(result, Ok(Ok(())));
            if failed {
                warn!(order = %order.order_id, "booking failed, cancelling session");
                let body = messages::slot_failure(self.office_phone(Some(&session)).as_deref());
                self.cancel_with(tenant, session, MessageTag::Cancellation, body, now)
                    .await?;
                return Ok(InboundDisposition::Cancelled);
            }
        }

        let exam = self.chosen_snapshot(&session, &snapshots).exam_name().to_string();
        let location_name = session
            .location_id
            .and_then(|id| self.catalog.location(id))
            .map(|l| l.name.clone())
            .unwrap_or_else(|| "the imaging center".into());
        let body = messages::confirmation(&exam, &location_name, &slot.datetime);

        let prior = session.clone();
        let mut next = session;
        next.slot_time = Some(slot.datetime);
        next.finish(SessionState::Confirmed, now);
        let next = self
            .advance(tenant, &prior, next, Some((MessageTag::Confirmation, body, false)), now)
            .await?;
        self.promote_next_queued(tenant, &next.phone_hash, &next.phone_encrypted)
            .await;
        Ok(InboundDisposition::Advanced(SessionState::Confirmed))
    }

    async fn reprompt(
        &self,
        tenant: &Tenant,
        session: Session,
        now: DateTime<Utc>,
    ) -> Result<InboundDisposition, SessionError> {
        if session.reprompt_count >= self.config.max_reprompts {
            let body = messages::goodbye(self.office_phone(Some(&session)).as_deref());
            self.cancel_with(tenant, session, MessageTag::Cancellation, body, now)
                .await?;
            return Ok(InboundDisposition::Cancelled);
        }
        let (tag, menu) = self.prompt_for(&session)?;
        let body = format!("{} {}", messages::reprompt_prefix(), menu);
        let prior = session.clone();
        let mut next = session;
        next.reprompt_count += 1;
        self.advance(tenant, &prior, next, Some((tag, body, false)), now).await?;
        Ok(InboundDisposition::Reprompted)
    }

    /// Rebuild the current menu for a re-prompt.
    fn prompt_for(&self, session: &Session) -> Result<(MessageTag, String), SessionError> {
        let snapshots = self.snapshots(session)?;
        let order = self.chosen_snapshot(session, &snapshots);
        match session.state {
            SessionState::ConsentPending => Ok((
                MessageTag::Consent,
                messages::consent_prompt(order.exam_name()),
            )),
            SessionState::ChoosingOrder => {
                let names: Vec<&str> = snapshots.iter().map(|s| s.exam_name()).collect();
                Ok((MessageTag::OrderList, messages::order_list(&names)))
            }
            SessionState::ChoosingLocation => {
                let locations = self.locations_by_ids(&session.offered_locations);
                Ok((
                    MessageTag::LocationList,
                    messages::location_list(order.exam_name(), &locations, None),
                ))
            }
            SessionState::ChoosingTime => {
                let slots: Vec<Slot> = serde_json::from_value(session.offered_slots.clone())
                    .unwrap_or_default();
                let location_name = session
                    .location_id
                    .and_then(|id| self.catalog.location(id))
                    .map(|l| l.name.clone())
                    .unwrap_or_else(|| "the imaging center".into());
                Ok((MessageTag::SlotList, messages::slot_list(&slots, &location_name)))
            }
            other => Err(SessionError::Validation(format!(
                "no prompt for state {other:?}"
            ))),
        }
    }

    // ── Sweeps ────────────────────────────────────────────────────────────────

    /// Move every non-terminal session past its TTL to `EXPIRED`.
    /// No message is sent. Idempotent; safe on any cadence.
    pub async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<SweepReport, SessionError> {
        let expired = self.sessions.expired_sessions(now).await?;
        let mut report = SweepReport {
            examined: expired.len(),
            transitioned: 0,
        };
        for session in expired {
            let mut next = session;
            next.finish(SessionState::Expired, now);
            match self.sessions.update_session(&next).await {
                Ok(_) => report.transitioned += 1,
                // Another writer beat the sweep; it will be re-examined
                // next tick if still live.
                Err(StoreError::Conflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if report.transitioned > 0 {
            info!(count = report.transitioned, "expired sessions");
        }
        Ok(report)
    }

    /// Retry or fail slot requests older than the timeout.
    ///
    /// First timeout: increment the retry counter and re-request. Second:
    /// record the failure and cancel with the "call us" message.
    pub async fn retry_slot_timeouts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, SessionError> {
        let cutoff = now - Duration::seconds(self.config.slot_timeout_secs as i64);
        let stale = self.sessions.stale_slot_requests(cutoff).await?;
        let mut report = SweepReport {
            examined: stale.len(),
            transitioned: 0,
        };

        for session in stale {
            let Some(tenant) = self.tenants.tenant_by_id(session.tenant_id).await? else {
                warn!(session = %session.id, "stale slot request for unknown tenant");
                continue;
            };

            if session.slot_retry_count >= self.config.slot_max_retries {
                let body = messages::slot_failure(self.office_phone(Some(&session)).as_deref());
                let prior = session.clone();
                let mut next = session;
                next.slot_request_failed_at = Some(now);
                next.finish(SessionState::Cancelled, now);
                match self
                    .advance(&tenant, &prior, next, Some((MessageTag::Cancellation, body, false)), now)
                    .await
                {
                    Ok(_) => report.transitioned += 1,
                    Err(SessionError::Storage(StoreError::Conflict { .. })) => continue,
                    Err(e) => {
                        warn!(session = %prior.id, "slot-failure cancel failed: {e}");
                        continue;
                    }
                }
                continue;
            }

            let prior = session.clone();
            let mut next = session;
            next.slot_retry_count += 1;
            next.slot_request_sent_at = Some(now);
            let next = match self.advance(&tenant, &prior, next, None, now).await {
                Ok(s) => s,
                Err(SessionError::Storage(StoreError::Conflict { .. })) => continue,
                Err(e) => return Err(e),
            };
            report.transitioned += 1;

            match self.rebuild_request(&tenant, &next, now).await {
                Ok(request) => {
                    let _ = self.fetch_and_process(&tenant, next, &request, now).await;
                }
                Err(e) => warn!(session = %next.id, "could not rebuild slot request: {e}"),
            }
        }
        Ok(report)
    }

    /// Reconstruct the slot request for a session already in
    /// `AWAITING_SLOTS`. Deterministic given the same snapshot, patient
    /// context, and catalog.
    async fn rebuild_request(
        &self,
        tenant: &Tenant,
        session: &Session,
        now: DateTime<Utc>,
    ) -> Result<SlotRequest, SessionError> {
        let location_id = session.location_id.ok_or_else(|| {
            SessionError::Validation("awaiting slots without a location".into())
        })?;
        let snapshots = self.snapshots(session)?;
        let order = self.chosen_snapshot(session, &snapshots).clone();
        let patient = self
            .patients
            .patient_context(tenant.id, &session.phone_hash)
            .await?;
        let gate = self.gate_for(tenant, &order, &patient, Some(&[location_id]), now);
        let duration = self
            .required_duration(tenant, session, &snapshots, &patient, location_id)
            .await;
        Ok(SlotRequest {
            tenant_id: tenant.id,
            location_id,
            modality: order.modality,
            required_duration_minutes: duration,
            earliest_date: earliest_date(&gate, now),
            required_capabilities: gate.required_capabilities,
        })
    }

    // ── Transition plumbing ───────────────────────────────────────────────────

    /// Persist a transition, then send its message.
    ///
    /// Order matters: persistence failure sends nothing; a terminal send
    /// failure rolls the state back and cancels the session without a
    /// further message; the audit rows of the failed attempt survive.
    async fn advance(
        &self,
        tenant: &Tenant,
        prior: &Session,
        mut next: Session,
        message: Option<(MessageTag, String, bool)>,
        now: DateTime<Utc>,
    ) -> Result<Session, SessionError> {
        next.updated_at = now;
        next.version = prior.version;
        next.version = self.sessions.update_session(&next).await?;

        let Some((tag, body, allow_revoked)) = message else {
            return Ok(next);
        };

        let to_phone = self.cipher.decrypt(&next.phone_encrypted)?;
        let request = SendRequest {
            tenant,
            to_phone: &to_phone,
            phone_hash: &next.phone_hash,
            body: &body,
            tag,
            from_override: next.from_number.as_deref(),
            allow_revoked,
        };

        match self.dispatcher.dispatch(request).await {
            Ok(outcome) => {
                // Remember the sender so the patient keeps seeing one number.
                if next.from_number.as_deref() != Some(outcome.from_number.as_str()) {
                    next.from_number = Some(outcome.from_number);
                    next.version = self.sessions.update_session(&next).await?;
                }
                Ok(next)
            }
            Err(DispatchError::Revoked) => {
                // Revoked underneath the transition: stop quietly.
                info!(session = %next.id, "consent revoked mid-session, cancelling");
                let mut cancelled = next.clone();
                cancelled.finish(SessionState::Cancelled, now);
                self.sessions.update_session(&cancelled).await?;
                Ok(cancelled)
            }
            Err(e @ DispatchError::Final { .. }) => {
                warn!(session = %next.id, "terminal send failure, rolling back and cancelling: {e}");
                self.rollback_and_cancel(prior, next.version, now).await?;
                Err(e.into())
            }
            Err(e) => {
                // Configuration-class failure: restore the prior state and
                // surface the error; nothing was sent.
                let restored_version = self.rollback(prior, next.version, now).await?;
                debug!(version = restored_version, "transition rolled back");
                Err(e.into())
            }
        }
    }

    async fn rollback(
        &self,
        prior: &Session,
        at_version: u64,
        now: DateTime<Utc>,
    ) -> Result<u64, SessionError> {
        let mut restored = prior.clone();
        restored.version = at_version;
        restored.updated_at = now;
        Ok(self.sessions.update_session(&restored).await?)
    }

    async fn rollback_and_cancel(
        &self,
        prior: &Session,
        at_version: u64,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        let version = self.rollback(prior, at_version, now).await?;
        let mut cancelled = prior.clone();
        cancelled.version = version;
        cancelled.finish(SessionState::Cancelled, now);
        self.sessions.update_session(&cancelled).await?;
        Ok(())
    }

    /// Cancel with a message and promote any queued order.
    async fn cancel_with(
        &self,
        tenant: &Tenant,
        session: Session,
        tag: MessageTag,
        body: String,
        now: DateTime<Utc>,
    ) -> Result<Session, SessionError> {
        let prior = session.clone();
        let mut next = session;
        next.finish(SessionState::Cancelled, now);
        let next = self.advance(tenant, &prior, next, Some((tag, body, false)), now).await?;
        self.promote_next_queued(tenant, &next.phone_hash, &next.phone_encrypted)
            .await;
        Ok(next)
    }

    /// Start a session for the oldest queued order, if any. Best effort:
    /// a failure here is logged and the order stays consumable by ops.
    async fn promote_next_queued(&self, tenant: &Tenant, hash: &str, phone_encrypted: &str) {
        let queued = match self.sessions.dequeue_order(tenant.id, hash).await {
            Ok(Some(q)) => q,
            Ok(None) => return,
            Err(e) => {
                warn!("dequeue failed: {e}");
                return;
            }
        };
        let result = async {
            let phone = self.cipher.decrypt(phone_encrypted)?;
            let snapshots = snapshots_from_value(&queued.order_data)?;
            self.start_session(tenant, &phone, hash, snapshots, Utc::now())
                .await
        }
        .await;
        match result {
            Ok(d) => info!(?d, "promoted queued order"),
            Err(e) => warn!(order = %queued.id, "queued order promotion failed: {e}"),
        }
    }

    /// Send outside any session (STOP/HELP without an active dialog).
    async fn send_loose(
        &self,
        tenant: &Tenant,
        to_phone: &str,
        hash: &str,
        tag: MessageTag,
        body: String,
        allow_revoked: bool,
    ) -> Result<(), SessionError> {
        self.dispatcher
            .dispatch(SendRequest {
                tenant,
                to_phone,
                phone_hash: hash,
                body: &body,
                tag,
                from_override: None,
                allow_revoked,
            })
            .await?;
        Ok(())
    }

    // ── Lookups and derivations ───────────────────────────────────────────────

    async fn tenant_by_slug(&self, slug: &str) -> Result<Tenant, SessionError> {
        let tenant = self
            .tenants
            .tenant_by_slug(slug)
            .await?
            .ok_or_else(|| SessionError::Validation(format!("unknown tenant: {slug}")))?;
        if !tenant.active {
            return Err(SessionError::TenantInactive(slug.to_string()));
        }
        Ok(tenant)
    }

    fn snapshots(&self, session: &Session) -> Result<Vec<OrderSnapshot>, SessionError> {
        let snapshots = snapshots_from_value(&session.order_data)?;
        if snapshots.is_empty() {
            return Err(SessionError::Validation("session carries no orders".into()));
        }
        Ok(snapshots)
    }

    fn chosen_snapshot<'a>(
        &self,
        session: &Session,
        snapshots: &'a [OrderSnapshot],
    ) -> &'a OrderSnapshot {
        session
            .chosen_order
            .and_then(|i| snapshots.get(i))
            .unwrap_or(&snapshots[0])
    }

    /// Run the safety gate, scoped to the tenant's locations unless an
    /// explicit candidate set narrows it further.
    fn gate_for(
        &self,
        tenant: &Tenant,
        order: &OrderSnapshot,
        patient: &PatientContext,
        candidates: Option<&[Uuid]>,
        now: DateTime<Utc>,
    ) -> GateAssessment {
        let facts = OrderFacts {
            description: order.description.clone(),
            modality: order.modality,
            cpt: order.cpt.clone(),
        };
        let scoped: Vec<Uuid> = match candidates {
            Some(ids) => ids.to_vec(),
            None => self.catalog.tenant_locations(tenant.id),
        };
        radsched_safety::evaluate(&facts, patient, &self.catalog, Some(&scoped), now.date_naive())
    }

    /// Combined appointment duration for the orders this session will book.
    async fn required_duration(
        &self,
        tenant: &Tenant,
        session: &Session,
        snapshots: &[OrderSnapshot],
        patient: &PatientContext,
        location_id: Uuid,
    ) -> u32 {
        let mut relevant: Vec<&OrderSnapshot> = match session.chosen_order {
            Some(i) => snapshots.get(i).into_iter().collect(),
            None => snapshots
                .iter()
                .filter(|s| s.modality == snapshots[0].modality)
                .collect(),
        };
        if relevant.is_empty() {
            // Stale chosen_order index; fall back to the first order.
            relevant.push(&snapshots[0]);
        }
        let equipment = self.equipment_profile(location_id, relevant[0].modality);

        let mut durations = Vec::with_capacity(relevant.len());
        for snap in relevant {
            let input = OrderAnalysisInput {
                order_description: snap.description.clone(),
                cpt: snap.cpt.clone(),
                modality: snap.modality,
                priority: Some(format!("{:?}", snap.priority).to_lowercase()),
                clinical_indication: None,
            };
            let cpt_override = snap
                .cpt
                .as_ref()
                .and_then(|c| tenant.cpt_duration_overrides.get(c))
                .copied();
            let analysis = self
                .analyzer
                .analyze(&input, patient, &equipment, cpt_override, Some(session.id))
                .await;
            durations.push(analysis.total_duration_min);
        }

        match tenant.duration_stacking {
            DurationStacking::Sum => durations.iter().sum(),
            DurationStacking::Max => durations.into_iter().max().unwrap_or(0),
        }
    }

    /// Best unit of the modality at a location, as a duration profile.
    fn equipment_profile(&self, location_id: Uuid, modality: Modality) -> EquipmentProfile {
        let mut profile = EquipmentProfile::default();
        let Some(location) = self.catalog.location(location_id) else {
            return profile;
        };
        for unit in location.units.iter().filter(|u| u.active && u.modality == modality) {
            profile.ct_slice_count = profile.ct_slice_count.max(unit.ct_slice_count);
            profile.mri_field_strength = match (profile.mri_field_strength, unit.mri_field_strength)
            {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
            profile.mri_wide_bore |= unit.mri_wide_bore;
        }
        profile
    }

    fn locations_by_ids(&self, ids: &[Uuid]) -> Vec<&Location> {
        ids.iter().filter_map(|id| self.catalog.location(*id)).collect()
    }

    fn office_phone(&self, session: Option<&Session>) -> Option<String> {
        session
            .and_then(|s| s.location_id)
            .and_then(|id| self.catalog.location(id))
            .map(|l| l.phone.clone())
            .or_else(|| self.catalog.locations().first().map(|l| l.phone.clone()))
            .filter(|p| !p.is_empty())
    }
}

/// Earliest bookable date: today, pushed out by the safety gate's
/// wash-out floor when present.
fn earliest_date(gate: &GateAssessment, now: DateTime<Utc>) -> NaiveDate {
    let today = now.date_naive();
    gate.min_schedule_date.map_or(today, |d| d.max(today))
}
