// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Engine tests over the in-memory store with scripted collaborators.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use uuid::Uuid;

use radsched_analyze::{AnalyzerOptions, OrderAnalyzer};
use radsched_catalog::{Catalog, EquipmentUnit, Location, Modality};
use radsched_identity::{phone_hash, PhoneCipher};
use radsched_safety::{Allergy, AllergySeverity, PatientContext};
use radsched_sms::{InboundSms, ScriptedSmsProvider, SmsDispatcher, SmsProvider};
use radsched_store::{
    ConsentMethod, ConsentRecord, ConsentStore, MemoryStore, SessionState, SessionStore,
    StackingPolicy, Tenant, TenantSmsConfig, TenantStore,
};

use crate::{
    ConversationEngine, EngineConfig, InboundDisposition, OrderDisposition, OrderEvent,
    ScriptedSlotSource, SessionError, Slot, SlotSourceError, StaticPatientContexts,
};

const KEY: &str = "0123456789abcdef0123456789abcdef";
const PATIENT_PHONE: &str = "+15551234567";

struct Harness {
    store: Arc<MemoryStore>,
    sms: Arc<ScriptedSmsProvider>,
    slot_source: Arc<ScriptedSlotSource>,
    patients: Arc<StaticPatientContexts>,
    engine: ConversationEngine,
    tenant: Tenant,
    ct_location: Uuid,
    ct_location_b: Uuid,
    mri_3t_location: Uuid,
}

fn catalog(tenant_id: Uuid) -> (Catalog, Uuid, Uuid, Uuid) {
    let ct_unit = EquipmentUnit {
        ct_slice_count: Some(64),
        ct_has_contrast_injector: true,
        ..EquipmentUnit::new(Modality::Ct)
    };
    let ct_a = Location {
        id: Uuid::new_v4(),
        tenant_id,
        name: "Mercy West".into(),
        phone: "+15550001111".into(),
        active: true,
        units: vec![ct_unit.clone()],
    };
    let ct_b = Location {
        id: Uuid::new_v4(),
        tenant_id,
        name: "Downtown Imaging".into(),
        phone: "+15550002222".into(),
        active: true,
        units: vec![ct_unit],
    };
    let mri_3t = Location {
        id: Uuid::new_v4(),
        tenant_id,
        name: "Northside MRI".into(),
        phone: "+15550003333".into(),
        active: true,
        units: vec![EquipmentUnit {
            mri_field_strength: Some(3.0),
            ..EquipmentUnit::new(Modality::Mri)
        }],
    };
    let mri_15t = Location {
        id: Uuid::new_v4(),
        tenant_id,
        name: "Valley MRI".into(),
        phone: "+15550004444".into(),
        active: true,
        units: vec![EquipmentUnit {
            mri_field_strength: Some(1.5),
            ..EquipmentUnit::new(Modality::Mri)
        }],
    };
    let (a, b, m) = (ct_a.id, ct_b.id, mri_3t.id);
    (Catalog::new(vec![ct_a, ct_b, mri_3t, mri_15t]), a, b, m)
}

async fn harness_with(
    sms: Arc<ScriptedSmsProvider>,
    slot_source: Arc<ScriptedSlotSource>,
    stacking: StackingPolicy,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let tenant = Tenant {
        id: Uuid::new_v4(),
        slug: "default".into(),
        active: true,
        sms: TenantSmsConfig {
            primary_provider: "mock".into(),
            failover_provider: None,
            from_numbers: vec!["+15559990000".into()],
            failover_from_numbers: vec![],
        },
        stacking_policy: stacking,
        duration_stacking: Default::default(),
        cpt_duration_overrides: Default::default(),
    };
    store.upsert_tenant(tenant.clone()).await.unwrap();

    let dispatcher = Arc::new(SmsDispatcher::new(
        vec![sms.clone() as Arc<dyn SmsProvider>],
        store.clone(),
        store.clone(),
        StdDuration::from_secs(10),
    ));
    let analyzer = Arc::new(OrderAnalyzer::new(
        store.clone(),
        store.clone(),
        None,
        AnalyzerOptions::default(),
    ));
    let patients = Arc::new(StaticPatientContexts::new());
    let (catalog, ct_a, ct_b, mri) = catalog(tenant.id);

    let engine = ConversationEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        dispatcher,
        slot_source.clone(),
        analyzer,
        patients.clone(),
        catalog,
        Arc::new(PhoneCipher::from_process_key(KEY).unwrap()),
        EngineConfig::default(),
    );

    Harness {
        store,
        sms,
        slot_source,
        patients,
        engine,
        tenant,
        ct_location: ct_a,
        ct_location_b: ct_b,
        mri_3t_location: mri,
    }
}

async fn harness() -> Harness {
    let slots = vec![
        slot_at("S1", 1),
        slot_at("S2", 2),
        slot_at("S3", 3),
    ];
    harness_with(
        Arc::new(ScriptedSmsProvider::accepting("mock")),
        Arc::new(ScriptedSlotSource::always(slots)),
        StackingPolicy::Defer,
    )
    .await
}

fn slot_at(id: &str, days_out: i64) -> Slot {
    Slot {
        slot_id: id.into(),
        datetime: Utc::now() + Duration::days(days_out),
        duration_minutes: 30,
        location_id: Uuid::nil(),
        resource_id: None,
    }
}

fn ct_order() -> OrderEvent {
    serde_json::from_value(serde_json::json!({
        "orderId": "ORD-CT-1",
        "modality": "CT",
        "patientPhone": PATIENT_PHONE,
        "orderDescription": "CT Chest with Contrast",
        "cpt": "71260",
        "priority": "routine"
    }))
    .unwrap()
}

fn mri_order() -> OrderEvent {
    serde_json::from_value(serde_json::json!({
        "orderId": "ORD-MRI-1",
        "modality": "MRI",
        "patientPhone": PATIENT_PHONE,
        "orderDescription": "MRI Brain 3T"
    }))
    .unwrap()
}

fn reply(body: &str) -> InboundSms {
    InboundSms {
        from: PATIENT_PHONE.into(),
        to: "+15559990000".into(),
        body: body.into(),
        provider_message_id: Some("SMin".into()),
    }
}

async fn grant_consent(h: &Harness) {
    h.store
        .append_consent(ConsentRecord::granted(
            h.tenant.id,
            &phone_hash(PATIENT_PHONE),
            ConsentMethod::WebForm,
            Utc::now() - Duration::minutes(5),
        ))
        .await
        .unwrap();
}

async fn active_session(h: &Harness) -> radsched_store::Session {
    h.store
        .active_session(h.tenant.id, &phone_hash(PATIENT_PHONE))
        .await
        .unwrap()
        .expect("active session")
}

// ── Session creation and consent ──────────────────────────────────────────────

#[tokio::test]
async fn first_contact_starts_in_consent_pending() {
    let h = harness().await;
    let d = h.engine.handle_order_event("default", ct_order()).await.unwrap();
    assert!(matches!(d, OrderDisposition::SessionStarted(_)));

    let session = active_session(&h).await;
    assert_eq!(session.state, SessionState::ConsentPending);
    assert!(session.started_at <= session.updated_at);
    assert!(session.updated_at <= session.expires_at);

    let sent = h.sms.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].body.contains("YES"));
    assert!(sent[0].body.contains("CT Chest with Contrast"));
}

#[tokio::test]
async fn yes_reply_grants_consent_and_offers_locations() {
    let h = harness().await;
    h.engine.handle_order_event("default", ct_order()).await.unwrap();

    let d = h.engine.handle_inbound_sms("default", &reply("YES")).await.unwrap();
    assert_eq!(
        d,
        InboundDisposition::Advanced(SessionState::ChoosingLocation)
    );

    let session = active_session(&h).await;
    assert_eq!(session.state, SessionState::ChoosingLocation);
    assert_eq!(session.offered_locations.len(), 2);

    let latest = h
        .store
        .latest_consent(h.tenant.id, &phone_hash(PATIENT_PHONE))
        .await
        .unwrap()
        .unwrap();
    assert!(latest.consent_given);
    assert_eq!(latest.consent_method, ConsentMethod::SmsReply);

    let sent = h.sms.sent();
    let body = &sent.last().unwrap().body;
    assert!(body.contains("1. Mercy West"));
    assert!(body.contains("2. Downtown Imaging"));
}

#[tokio::test]
async fn prior_consent_skips_straight_to_locations() {
    let h = harness().await;
    grant_consent(&h).await;
    h.engine.handle_order_event("default", ct_order()).await.unwrap();
    assert_eq!(active_session(&h).await.state, SessionState::ChoosingLocation);
}

#[tokio::test]
async fn no_reply_during_consent_cancels_with_goodbye() {
    let h = harness().await;
    h.engine.handle_order_event("default", ct_order()).await.unwrap();
    let d = h.engine.handle_inbound_sms("default", &reply("NO")).await.unwrap();
    assert_eq!(d, InboundDisposition::Cancelled);
    assert!(h
        .store
        .active_session(h.tenant.id, &phone_hash(PATIENT_PHONE))
        .await
        .unwrap()
        .is_none());
    assert!(h.sms.sent().last().unwrap().body.contains("won't schedule"));
}

// ── Safety gate integration ───────────────────────────────────────────────────

#[tokio::test]
async fn severe_contrast_allergy_blocks_and_cancels() {
    let h = harness().await;
    h.patients.insert(
        &phone_hash(PATIENT_PHONE),
        PatientContext {
            allergies: vec![Allergy {
                allergen: "Iodinated contrast".into(),
                severity: AllergySeverity::Severe,
            }],
            ..PatientContext::default()
        },
    );
    let d = h.engine.handle_order_event("default", ct_order()).await.unwrap();
    assert!(matches!(d, OrderDisposition::Blocked(_)));

    // Session exists, terminal, with the fallback message sent.
    assert!(h
        .store
        .active_session(h.tenant.id, &phone_hash(PATIENT_PHONE))
        .await
        .unwrap()
        .is_none());
    let sent = h.sms.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].body.contains("Please call"));
}

#[tokio::test]
async fn capability_filter_offers_only_capable_locations() {
    let h = harness().await;
    grant_consent(&h).await;
    h.engine.handle_order_event("default", mri_order()).await.unwrap();

    let session = active_session(&h).await;
    assert_eq!(session.offered_locations, vec![h.mri_3t_location]);

    let sent = h.sms.sent();
    let body = &sent.last().unwrap().body;
    assert!(body.contains("1. Northside MRI"));
    assert!(!body.contains("Valley MRI"));
}

// ── Location and time selection ───────────────────────────────────────────────

#[tokio::test]
async fn location_choice_fetches_slots_and_offers_times() {
    let h = harness().await;
    grant_consent(&h).await;
    h.engine.handle_order_event("default", ct_order()).await.unwrap();

    let d = h.engine.handle_inbound_sms("default", &reply("1")).await.unwrap();
    assert_eq!(d, InboundDisposition::Advanced(SessionState::ChoosingTime));

    let session = active_session(&h).await;
    assert_eq!(session.state, SessionState::ChoosingTime);
    assert_eq!(session.location_id, Some(h.ct_location));
    assert!(session.slot_request_sent_at.is_none());

    let sent = h.sms.sent();
    let body = &sent.last().unwrap().body;
    assert!(body.contains("Available times at Mercy West"));
    assert!(body.contains("1."));
}

#[tokio::test]
async fn time_choice_books_and_confirms() {
    let h = harness().await;
    grant_consent(&h).await;
    h.engine.handle_order_event("default", ct_order()).await.unwrap();
    h.engine.handle_inbound_sms("default", &reply("1")).await.unwrap();

    let d = h.engine.handle_inbound_sms("default", &reply("2")).await.unwrap();
    assert_eq!(d, InboundDisposition::Advanced(SessionState::Confirmed));

    let bookings = h.slot_source.bookings();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].slot_id, "S2");
    assert_eq!(bookings[0].order_id, "ORD-CT-1");

    let sent = h.sms.sent();
    let body = &sent.last().unwrap().body;
    assert!(body.contains("You're booked"));

    // Terminal session frees the slot and is stamped complete.
    let done = h
        .store
        .active_session(h.tenant.id, &phone_hash(PATIENT_PHONE))
        .await
        .unwrap();
    assert!(done.is_none());
}

#[tokio::test]
async fn empty_slots_reoffer_remaining_locations() {
    let h = harness_with(
        Arc::new(ScriptedSmsProvider::accepting("mock")),
        Arc::new(ScriptedSlotSource::new(vec![Ok(vec![])])),
        StackingPolicy::Defer,
    )
    .await;
    grant_consent(&h).await;
    h.engine.handle_order_event("default", ct_order()).await.unwrap();

    let d = h.engine.handle_inbound_sms("default", &reply("1")).await.unwrap();
    assert_eq!(
        d,
        InboundDisposition::Advanced(SessionState::ChoosingLocation)
    );

    let session = active_session(&h).await;
    assert_eq!(session.offered_locations, vec![h.ct_location_b]);
    let sent = h.sms.sent();
    let body = &sent.last().unwrap().body;
    assert!(body.starts_with("No times are open"));
    assert!(body.contains("Downtown Imaging"));
}

#[tokio::test]
async fn booking_failure_cancels_with_call_us() {
    struct FailingBooking(ScriptedSlotSource);
    #[async_trait::async_trait]
    impl crate::SlotSource for FailingBooking {
        async fn fetch_slots(
            &self,
            req: &crate::SlotRequest,
        ) -> Result<Vec<Slot>, SlotSourceError> {
            self.0.fetch_slots(req).await
        }
        async fn book(
            &self,
            _req: &crate::BookingRequest,
        ) -> Result<(), SlotSourceError> {
            Err(SlotSourceError::Rejected("slot taken".into()))
        }
    }

    let store_slots = ScriptedSlotSource::always(vec![slot_at("S1", 1)]);
    let h = harness_with(
        Arc::new(ScriptedSmsProvider::accepting("mock")),
        Arc::new(ScriptedSlotSource::new(vec![])),
        StackingPolicy::Defer,
    )
    .await;
    // Rebuild the engine with the failing-booking source.
    let h2 = Harness {
        engine: ConversationEngine::new(
            h.store.clone(),
            h.store.clone(),
            h.store.clone(),
            h.store.clone(),
            Arc::new(SmsDispatcher::new(
                vec![h.sms.clone() as Arc<dyn SmsProvider>],
                h.store.clone(),
                h.store.clone(),
                StdDuration::from_secs(10),
            )),
            Arc::new(FailingBooking(store_slots)),
            Arc::new(OrderAnalyzer::new(
                h.store.clone(),
                h.store.clone(),
                None,
                AnalyzerOptions::default(),
            )),
            h.patients.clone(),
            catalog(h.tenant.id).0,
            Arc::new(PhoneCipher::from_process_key(KEY).unwrap()),
            EngineConfig::default(),
        ),
        ..h
    };

    grant_consent(&h2).await;
    h2.engine.handle_order_event("default", ct_order()).await.unwrap();
    h2.engine.handle_inbound_sms("default", &reply("1")).await.unwrap();
    let d = h2.engine.handle_inbound_sms("default", &reply("1")).await.unwrap();
    assert_eq!(d, InboundDisposition::Cancelled);
    assert!(h2
        .sms
        .sent()
        .last()
        .unwrap()
        .body
        .contains("couldn't confirm"));
}

// ── STOP, HELP, and reprompts ─────────────────────────────────────────────────

#[tokio::test]
async fn stop_revokes_and_cancels() {
    let h = harness().await;
    grant_consent(&h).await;
    h.engine.handle_order_event("default", ct_order()).await.unwrap();

    let d = h.engine.handle_inbound_sms("default", &reply("STOP")).await.unwrap();
    assert_eq!(d, InboundDisposition::Cancelled);
    assert!(h
        .store
        .is_revoked(h.tenant.id, &phone_hash(PATIENT_PHONE))
        .await
        .unwrap());
    assert!(h.sms.sent().last().unwrap().body.contains("unsubscribed"));

    // A new order for the revoked phone starts nothing and sends nothing.
    let count_before = h.sms.sent_count();
    let d = h.engine.handle_order_event("default", ct_order()).await.unwrap();
    assert_eq!(d, OrderDisposition::RefusedRevoked);
    assert_eq!(h.sms.sent_count(), count_before);
}

#[tokio::test]
async fn stop_without_session_is_honored_out_of_band() {
    let h = harness().await;
    let d = h.engine.handle_inbound_sms("default", &reply("stop")).await.unwrap();
    assert_eq!(d, InboundDisposition::OutOfBand);
    assert!(h
        .store
        .is_revoked(h.tenant.id, &phone_hash(PATIENT_PHONE))
        .await
        .unwrap());
}

#[tokio::test]
async fn help_is_answered_without_state_change() {
    let h = harness().await;
    grant_consent(&h).await;
    h.engine.handle_order_event("default", ct_order()).await.unwrap();
    let before = active_session(&h).await;

    let d = h.engine.handle_inbound_sms("default", &reply("HELP")).await.unwrap();
    assert_eq!(d, InboundDisposition::OutOfBand);
    assert_eq!(active_session(&h).await.state, before.state);
    assert!(h.sms.sent().last().unwrap().body.contains("STOP"));
}

#[tokio::test]
async fn unknown_replies_reprompt_then_cancel() {
    let h = harness().await;
    grant_consent(&h).await;
    h.engine.handle_order_event("default", ct_order()).await.unwrap();

    for _ in 0..3 {
        let d = h
            .engine
            .handle_inbound_sms("default", &reply("what?"))
            .await
            .unwrap();
        assert_eq!(d, InboundDisposition::Reprompted);
    }
    let d = h.engine.handle_inbound_sms("default", &reply("what?")).await.unwrap();
    assert_eq!(d, InboundDisposition::Cancelled);
}

#[tokio::test]
async fn out_of_range_choice_reprompts() {
    let h = harness().await;
    grant_consent(&h).await;
    h.engine.handle_order_event("default", ct_order()).await.unwrap();
    let d = h.engine.handle_inbound_sms("default", &reply("9")).await.unwrap();
    assert_eq!(d, InboundDisposition::Reprompted);
    assert_eq!(active_session(&h).await.state, SessionState::ChoosingLocation);
}

#[tokio::test]
async fn reply_with_no_session_is_reported() {
    let h = harness().await;
    let d = h.engine.handle_inbound_sms("default", &reply("1")).await.unwrap();
    assert_eq!(d, InboundDisposition::NoSession);
}

// ── Sweeps ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn slot_timeout_retries_once_then_cancels() {
    // Slot source that always errors keeps the session in AWAITING_SLOTS.
    let h = harness_with(
        Arc::new(ScriptedSmsProvider::accepting("mock")),
        Arc::new(ScriptedSlotSource::new(vec![
            Err(SlotSourceError::Unavailable("down".into())),
            Err(SlotSourceError::Unavailable("still down".into())),
        ])),
        StackingPolicy::Defer,
    )
    .await;
    grant_consent(&h).await;
    h.engine.handle_order_event("default", ct_order()).await.unwrap();
    h.engine.handle_inbound_sms("default", &reply("1")).await.unwrap();

    // Age the pending request past the 60s timeout.
    let mut session = active_session(&h).await;
    assert_eq!(session.state, SessionState::AwaitingSlots);
    session.slot_request_sent_at = Some(Utc::now() - Duration::seconds(70));
    session.version = h.store.update_session(&session).await.unwrap();

    let report = h.engine.retry_slot_timeouts(Utc::now()).await.unwrap();
    assert_eq!(report.transitioned, 1);
    let session = active_session(&h).await;
    assert_eq!(session.state, SessionState::AwaitingSlots);
    assert_eq!(session.slot_retry_count, 1);
    assert_eq!(h.slot_source.fetch_count(), 2);

    // Second timeout: record the failure and cancel with "call us".
    let mut session = active_session(&h).await;
    session.slot_request_sent_at = Some(Utc::now() - Duration::seconds(70));
    h.store.update_session(&session).await.unwrap();

    let report = h.engine.retry_slot_timeouts(Utc::now()).await.unwrap();
    assert_eq!(report.transitioned, 1);
    let done = h
        .store
        .session(session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.state, SessionState::Cancelled);
    assert!(done.slot_request_failed_at.is_some());
    assert!(h.sms.sent().last().unwrap().body.contains("couldn't confirm"));
}

#[tokio::test]
async fn expiry_sweep_is_silent_and_idempotent() {
    let h = harness().await;
    grant_consent(&h).await;
    h.engine.handle_order_event("default", ct_order()).await.unwrap();

    let mut session = active_session(&h).await;
    session.expires_at = Utc::now() - Duration::minutes(1);
    h.store.update_session(&session).await.unwrap();

    let sent_before = h.sms.sent_count();
    let report = h.engine.expire_sessions(Utc::now()).await.unwrap();
    assert_eq!(report.transitioned, 1);

    let expired = h.store.session(session.id).await.unwrap().unwrap();
    assert_eq!(expired.state, SessionState::Expired);
    assert!(expired.completed_at.is_some());
    assert_eq!(h.sms.sent_count(), sent_before);

    // Second run finds nothing.
    let report = h.engine.expire_sessions(Utc::now()).await.unwrap();
    assert_eq!(report.examined, 0);
}

// ── Multi-order policies ──────────────────────────────────────────────────────

#[tokio::test]
async fn second_order_is_deferred_and_promoted_after_cancel() {
    let h = harness().await;
    h.engine.handle_order_event("default", ct_order()).await.unwrap();
    let first = active_session(&h).await;

    let d = h.engine.handle_order_event("default", mri_order()).await.unwrap();
    assert_eq!(d, OrderDisposition::Deferred);
    assert_eq!(active_session(&h).await.id, first.id);

    // Declining consent cancels the first session and promotes the queued
    // MRI order into a fresh one.
    h.engine.handle_inbound_sms("default", &reply("NO")).await.unwrap();
    let promoted = active_session(&h).await;
    assert_ne!(promoted.id, first.id);
    let snapshots = crate::snapshots_from_value(&promoted.order_data).unwrap();
    assert_eq!(snapshots[0].order_id, "ORD-MRI-1");
}

#[tokio::test]
async fn supersede_policy_replaces_active_session() {
    let h = harness_with(
        Arc::new(ScriptedSmsProvider::accepting("mock")),
        Arc::new(ScriptedSlotSource::always(vec![slot_at("S1", 1)])),
        StackingPolicy::Supersede,
    )
    .await;
    grant_consent(&h).await;
    h.engine.handle_order_event("default", ct_order()).await.unwrap();
    let first = active_session(&h).await;
    let sent_before = h.sms.sent_count();

    let d = h.engine.handle_order_event("default", mri_order()).await.unwrap();
    assert!(matches!(d, OrderDisposition::Superseded(_)));

    let old = h.store.session(first.id).await.unwrap().unwrap();
    assert_eq!(old.state, SessionState::Cancelled);
    let current = active_session(&h).await;
    assert_ne!(current.id, first.id);
    // The cancellation itself sent nothing; only the new session's
    // location list went out.
    assert_eq!(h.sms.sent_count(), sent_before + 1);
}

#[tokio::test]
async fn concurrent_orders_produce_one_session_and_one_deferral() {
    let h = harness().await;
    let (a, b) = tokio::join!(
        h.engine.handle_order_event("default", ct_order()),
        h.engine.handle_order_event("default", mri_order()),
    );
    let dispositions = [a.unwrap(), b.unwrap()];
    let started = dispositions
        .iter()
        .filter(|d| matches!(d, OrderDisposition::SessionStarted(_)))
        .count();
    let deferred = dispositions
        .iter()
        .filter(|d| matches!(d, OrderDisposition::Deferred))
        .count();
    assert_eq!(started, 1);
    assert_eq!(deferred, 1);

    // Exactly one non-terminal session row exists.
    assert!(h
        .store
        .active_session(h.tenant.id, &phone_hash(PATIENT_PHONE))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn mixed_modality_batch_disambiguates_first() {
    let h = harness().await;
    grant_consent(&h).await;
    h.engine
        .handle_order_batch("default", vec![ct_order(), mri_order()])
        .await
        .unwrap();
    let session = active_session(&h).await;
    assert_eq!(session.state, SessionState::ChoosingOrder);
    let sent = h.sms.sent();
    let body = &sent.last().unwrap().body;
    assert!(body.contains("1. CT Chest with Contrast"));
    assert!(body.contains("2. MRI Brain 3T"));

    // Picking the MRI narrows locations to the 3T site.
    let d = h.engine.handle_inbound_sms("default", &reply("2")).await.unwrap();
    assert_eq!(
        d,
        InboundDisposition::Advanced(SessionState::ChoosingLocation)
    );
    let session = active_session(&h).await;
    assert_eq!(session.offered_locations, vec![h.mri_3t_location]);
}

// ── Error surfaces ────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_tenant_is_a_validation_error() {
    let h = harness().await;
    let err = h.engine.handle_order_event("nope", ct_order()).await.unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));
}

#[tokio::test]
async fn inactive_tenant_is_refused() {
    let h = harness().await;
    let mut t = h.tenant.clone();
    t.active = false;
    h.store.upsert_tenant(t).await.unwrap();
    let err = h.engine.handle_order_event("default", ct_order()).await.unwrap_err();
    assert!(matches!(err, SessionError::TenantInactive(_)));
}

#[tokio::test]
async fn invalid_phone_is_rejected() {
    let h = harness().await;
    let mut order = ct_order();
    order.patient_phone = "12345".into();
    assert!(h.engine.handle_order_event("default", order).await.is_err());
}
