// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// End-to-end scheduling scenarios over the in-memory store with scripted
/// SMS, slot-source, and completion collaborators.
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use uuid::Uuid;

use radsched_analyze::{AnalyzerOptions, OrderAnalyzer};
use radsched_catalog::{Catalog, EquipmentUnit, Location, Modality};
use radsched_identity::{phone_hash, PhoneCipher};
use radsched_safety::{Allergy, AllergySeverity, PatientContext};
use radsched_session::{
    ConversationEngine, EngineConfig, InboundDisposition, OrderDisposition, OrderEvent,
    ScriptedSlotSource, Slot, StaticPatientContexts,
};
use radsched_sms::{
    InboundSms, ScriptedSmsProvider, SendOutcome, SmsDispatcher, SmsProvider, StandardError,
};
use radsched_store::{
    AuditSink, ConsentMethod, ConsentRecord, ConsentStore, Direction, MemoryStore, MessageTag,
    SessionState, SessionStore, StackingPolicy, Tenant, TenantSmsConfig, TenantStore,
};

const KEY: &str = "integration-test-key-0123456789abcdef";
const PHONE: &str = "+15551234567";

struct World {
    store: Arc<MemoryStore>,
    primary: Arc<ScriptedSmsProvider>,
    backup: Arc<ScriptedSmsProvider>,
    slot_source: Arc<ScriptedSlotSource>,
    patients: Arc<StaticPatientContexts>,
    engine: ConversationEngine,
    tenant: Tenant,
    mri_3t: Uuid,
}

async fn world(primary_scripts: Vec<SendOutcome>, slots: Vec<Slot>) -> World {
    let store = Arc::new(MemoryStore::new());
    let tenant = Tenant {
        id: Uuid::new_v4(),
        slug: "default".into(),
        active: true,
        sms: TenantSmsConfig {
            primary_provider: "primary".into(),
            failover_provider: Some("backup".into()),
            from_numbers: vec!["+15559990001".into(), "+15559990002".into()],
            failover_from_numbers: vec!["+15558880001".into()],
        },
        stacking_policy: StackingPolicy::Defer,
        duration_stacking: Default::default(),
        cpt_duration_overrides: Default::default(),
    };
    store.upsert_tenant(tenant.clone()).await.unwrap();

    let ct = EquipmentUnit {
        ct_slice_count: Some(64),
        ct_has_contrast_injector: true,
        ..EquipmentUnit::new(Modality::Ct)
    };
    let mri_strong = EquipmentUnit {
        mri_field_strength: Some(3.0),
        ..EquipmentUnit::new(Modality::Mri)
    };
    let mri_weak = EquipmentUnit {
        mri_field_strength: Some(1.5),
        ..EquipmentUnit::new(Modality::Mri)
    };
    let tenant_id = tenant.id;
    let mk = |name: &str, units: Vec<EquipmentUnit>| Location {
        id: Uuid::new_v4(),
        tenant_id,
        name: name.into(),
        phone: "+15550001111".into(),
        active: true,
        units,
    };
    let a = mk("Mercy West", vec![ct.clone(), mri_weak.clone()]);
    let b = mk("Northside", vec![mri_strong]);
    let c = mk("Valley", vec![ct, mri_weak]);
    let mri_3t = b.id;
    let catalog = Catalog::new(vec![a, b, c]);

    let primary = Arc::new(ScriptedSmsProvider::new("primary", primary_scripts));
    let backup = Arc::new(ScriptedSmsProvider::accepting("backup"));
    let dispatcher = Arc::new(SmsDispatcher::new(
        vec![
            primary.clone() as Arc<dyn SmsProvider>,
            backup.clone() as Arc<dyn SmsProvider>,
        ],
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
    let slot_source = Arc::new(ScriptedSlotSource::always(slots));

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

    World {
        store,
        primary,
        backup,
        slot_source,
        patients,
        engine,
        tenant,
        mri_3t,
    }
}

fn slots() -> Vec<Slot> {
    (1..=3)
        .map(|n| Slot {
            slot_id: format!("S{n}"),
            datetime: Utc::now() + Duration::days(n),
            duration_minutes: 45,
            location_id: Uuid::nil(),
            resource_id: Some(format!("scanner-{n}")),
        })
        .collect()
}

fn order(modality: &str, description: &str) -> OrderEvent {
    serde_json::from_value(serde_json::json!({
        "orderId": format!("ORD-{modality}-77"),
        "modality": modality,
        "patientPhone": PHONE,
        "orderDescription": description,
        "queuedAt": Utc::now().to_rfc3339(),
    }))
    .unwrap()
}

fn sms(body: &str) -> InboundSms {
    InboundSms {
        from: PHONE.into(),
        to: "+15559990001".into(),
        body: body.into(),
        provider_message_id: Some("SMxyz".into()),
    }
}

async fn pre_consent(w: &World) {
    w.store
        .append_consent(ConsentRecord::granted(
            w.tenant.id,
            &phone_hash(PHONE),
            ConsentMethod::WebForm,
            Utc::now() - Duration::hours(1),
        ))
        .await
        .unwrap();
}

// ── S1: severe contrast allergy blocks and cancels ───────────────────────────

#[tokio::test]
async fn severe_allergy_blocks_scheduling_with_call_us_message() {
    let w = world(vec![], slots()).await;
    w.patients.insert(
        &phone_hash(PHONE),
        PatientContext {
            allergies: vec![Allergy {
                allergen: "Iodinated contrast".into(),
                severity: AllergySeverity::Severe,
            }],
            ..PatientContext::default()
        },
    );

    let d = w
        .engine
        .handle_order_event("default", order("CT", "CT Chest with Contrast"))
        .await
        .unwrap();
    assert!(matches!(d, OrderDisposition::Blocked(_)));

    // The safety fallback went out and was audited with its tag.
    let trail = w
        .store
        .audit_trail(w.tenant.id, &phone_hash(PHONE))
        .await
        .unwrap();
    let fallback: Vec<_> = trail
        .iter()
        .filter(|e| e.message_tag == MessageTag::SafetyFallback)
        .collect();
    assert_eq!(fallback.len(), 1);
    assert!(fallback[0].success);
    assert!(w.primary.sent()[0].body.contains("Please call"));
}

// ── S2: capability filtering narrows the location list ───────────────────────

#[tokio::test]
async fn three_tesla_order_offers_only_the_capable_location() {
    let w = world(vec![], slots()).await;
    pre_consent(&w).await;

    w.engine
        .handle_order_event("default", order("MRI", "MRI Brain 3T"))
        .await
        .unwrap();

    let session = w
        .store
        .active_session(w.tenant.id, &phone_hash(PHONE))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.state, SessionState::ChoosingLocation);
    assert_eq!(session.offered_locations, vec![w.mri_3t]);

    let body = &w.primary.sent()[0].body;
    assert!(body.contains("1. Northside"));
    assert!(!body.contains("Mercy West"));
    assert!(!body.contains("Valley"));
}

// ── S3: provider failover during confirmation ────────────────────────────────

#[tokio::test]
async fn confirmation_survives_primary_provider_failure() {
    // Location list and slot list succeed on the primary; the
    // confirmation send hits a provider error and fails over.
    let scripts = vec![
        SendOutcome::accepted("primary", "m1".into()),
        SendOutcome::accepted("primary", "m2".into()),
        SendOutcome::failed("primary", StandardError::ProviderError, "HTTP 500"),
    ];
    let w = world(scripts, slots()).await;
    pre_consent(&w).await;

    w.engine
        .handle_order_event("default", order("CT", "CT Chest with Contrast"))
        .await
        .unwrap();
    w.engine
        .handle_inbound_sms("default", &sms("1"))
        .await
        .unwrap();
    let d = w
        .engine
        .handle_inbound_sms("default", &sms("3"))
        .await
        .unwrap();

    // The failure is invisible to the patient: booked and confirmed.
    assert_eq!(d, InboundDisposition::Advanced(SessionState::Confirmed));
    assert_eq!(w.slot_source.bookings().len(), 1);
    assert_eq!(w.slot_source.bookings()[0].slot_id, "S3");
    assert_eq!(w.backup.sent_count(), 1);

    // One audit row per attempt: failed primary, successful failover.
    let trail = w
        .store
        .audit_trail(w.tenant.id, &phone_hash(PHONE))
        .await
        .unwrap();
    let confirmation: Vec<_> = trail
        .iter()
        .filter(|e| e.message_tag == MessageTag::Confirmation)
        .collect();
    assert_eq!(confirmation.len(), 2);
    assert!(!confirmation[0].success);
    assert_eq!(confirmation[0].error_code.as_deref(), Some("PROVIDER_ERROR"));
    assert!(confirmation[1].success);
    assert_eq!(confirmation[1].from_number.as_deref(), Some("+15558880001"));
}

// ── Audit completeness over a full conversation ──────────────────────────────

#[tokio::test]
async fn every_message_has_exactly_one_audit_row() {
    let w = world(vec![], slots()).await;

    w.engine
        .handle_order_event("default", order("CT", "CT Abdomen"))
        .await
        .unwrap();
    w.engine.handle_inbound_sms("default", &sms("YES")).await.unwrap();
    w.engine.handle_inbound_sms("default", &sms("1")).await.unwrap();
    w.engine.handle_inbound_sms("default", &sms("2")).await.unwrap();

    let trail = w
        .store
        .audit_trail(w.tenant.id, &phone_hash(PHONE))
        .await
        .unwrap();
    let outbound: Vec<_> = trail
        .iter()
        .filter(|e| e.direction == Direction::Outbound)
        .collect();
    let inbound: Vec<_> = trail
        .iter()
        .filter(|e| e.direction == Direction::Inbound)
        .collect();

    assert_eq!(outbound.len(), w.primary.sent_count());
    assert_eq!(inbound.len(), 3);

    let tags: Vec<MessageTag> = outbound.iter().map(|e| e.message_tag).collect();
    assert_eq!(
        tags,
        vec![
            MessageTag::Consent,
            MessageTag::LocationList,
            MessageTag::SlotList,
            MessageTag::Confirmation,
        ]
    );
    for entry in outbound {
        assert!(entry.provider_message_id.is_some());
        assert_eq!(entry.phone_last_four, "4567");
    }
}

// ── Revocation is monotonic until superseded ─────────────────────────────────

#[tokio::test]
async fn no_successful_send_after_revocation_until_new_consent() {
    let w = world(vec![], slots()).await;
    pre_consent(&w).await;

    w.engine
        .handle_order_event("default", order("CT", "CT Abdomen"))
        .await
        .unwrap();
    w.engine.handle_inbound_sms("default", &sms("STOP")).await.unwrap();
    let revoked_at = Utc::now();

    // New orders are refused outright.
    let d = w
        .engine
        .handle_order_event("default", order("MRI", "MRI knee"))
        .await
        .unwrap();
    assert_eq!(d, OrderDisposition::RefusedRevoked);

    let trail = w
        .store
        .audit_trail(w.tenant.id, &phone_hash(PHONE))
        .await
        .unwrap();
    let late_success = trail.iter().any(|e| {
        e.direction == Direction::Outbound
            && e.success
            && e.at > revoked_at
            && e.message_tag != MessageTag::Cancellation
    });
    assert!(!late_success, "no outbound success may follow revocation");

    // A newer consent record reopens the channel.
    w.store
        .append_consent(ConsentRecord::granted(
            w.tenant.id,
            &phone_hash(PHONE),
            ConsentMethod::WebForm,
            Utc::now(),
        ))
        .await
        .unwrap();
    let d = w
        .engine
        .handle_order_event("default", order("MRI", "MRI knee"))
        .await
        .unwrap();
    assert!(matches!(d, OrderDisposition::SessionStarted(_)));
}

// ── Sticky sender across a conversation ──────────────────────────────────────

#[tokio::test]
async fn patient_sees_one_sender_number_for_the_whole_dialog() {
    let w = world(vec![], slots()).await;
    pre_consent(&w).await;

    w.engine
        .handle_order_event("default", order("CT", "CT Abdomen"))
        .await
        .unwrap();
    w.engine.handle_inbound_sms("default", &sms("1")).await.unwrap();
    w.engine.handle_inbound_sms("default", &sms("1")).await.unwrap();

    let froms: Vec<String> = w.primary.sent().iter().map(|s| s.from.clone()).collect();
    assert!(froms.len() >= 3);
    assert!(
        froms.windows(2).all(|pair| pair[0] == pair[1]),
        "froms: {froms:?}"
    );
}

// ── Session TTL invariants ───────────────────────────────────────────────────

#[tokio::test]
async fn session_timestamps_are_ordered_and_ttl_never_advances() {
    let w = world(vec![], slots()).await;
    pre_consent(&w).await;
    w.engine
        .handle_order_event("default", order("CT", "CT Abdomen"))
        .await
        .unwrap();

    let before = w
        .store
        .active_session(w.tenant.id, &phone_hash(PHONE))
        .await
        .unwrap()
        .unwrap();
    let expires_at = before.expires_at;
    assert!(before.started_at <= before.updated_at);
    assert!(before.updated_at <= before.expires_at);
    assert_eq!(expires_at, before.started_at + Duration::hours(24));

    w.engine.handle_inbound_sms("default", &sms("1")).await.unwrap();
    let after = w
        .store
        .active_session(w.tenant.id, &phone_hash(PHONE))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.expires_at, expires_at);
    assert!(after.updated_at >= before.updated_at);
}
