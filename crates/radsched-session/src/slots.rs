// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use radsched_catalog::{CapabilityRequirement, Modality};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// One offerable appointment slot, as the slot source reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub slot_id: String,
    pub datetime: DateTime<Utc>,
    pub duration_minutes: u32,
    pub location_id: Uuid,
    #[serde(default)]
    pub resource_id: Option<String>,
}

/// Availability query sent to the slot source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotRequest {
    pub tenant_id: Uuid,
    pub location_id: Uuid,
    pub modality: Modality,
    pub required_duration_minutes: u32,
    /// Never earlier than the safety gate's `min_schedule_date`.
    pub earliest_date: NaiveDate,
    pub required_capabilities: Vec<CapabilityRequirement>,
}

/// Booking command. Idempotent by (tenant, slot, order).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub tenant_id: Uuid,
    pub slot_id: String,
    pub order_id: String,
    pub patient_phone_encrypted: String,
}

#[derive(Debug, Error)]
pub enum SlotSourceError {
    #[error("slot source call timed out")]
    Timeout,

    #[error("slot source unavailable: {0}")]
    Unavailable(String),

    #[error("slot source rejected the request: {0}")]
    Rejected(String),
}

/// The external scheduling system holding authoritative availability.
#[async_trait]
pub trait SlotSource: Send + Sync {
    async fn fetch_slots(&self, request: &SlotRequest) -> Result<Vec<Slot>, SlotSourceError>;

    /// Book a slot. Re-booking the same (tenant, slot, order) succeeds
    /// without a second reservation.
    async fn book(&self, request: &BookingRequest) -> Result<(), SlotSourceError>;
}

/// REST adapter to the external scheduling system.
///
/// Speaks the documented wire contract: `POST /slots/search` with a
/// [`SlotRequest`], `POST /bookings` with a [`BookingRequest`]. The
/// engine applies its own deadline; this client only maps transport and
/// status errors.
pub struct HttpSlotSource {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpSlotSource {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            base_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(format!("{}{path}", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }
}

#[async_trait]
impl SlotSource for HttpSlotSource {
    async fn fetch_slots(&self, request: &SlotRequest) -> Result<Vec<Slot>, SlotSourceError> {
        let resp = self
            .request("/slots/search")
            .json(request)
            .send()
            .await
            .map_err(|e| SlotSourceError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SlotSourceError::Rejected(format!("HTTP {}", resp.status())));
        }
        resp.json()
            .await
            .map_err(|e| SlotSourceError::Rejected(format!("malformed slot list: {e}")))
    }

    async fn book(&self, request: &BookingRequest) -> Result<(), SlotSourceError> {
        let resp = self
            .request("/bookings")
            .json(request)
            .send()
            .await
            .map_err(|e| SlotSourceError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SlotSourceError::Rejected(format!("HTTP {}", resp.status())));
        }
        Ok(())
    }
}

/// Scripted slot source for tests.
///
/// `fetch_slots` pops the next scripted result; an exhausted queue reports
/// the source unavailable so tests notice unexpected extra calls. Bookings
/// are recorded with idempotency handled the way the real source contracts.
pub struct ScriptedSlotSource {
    fetches: Mutex<Vec<Result<Vec<Slot>, SlotSourceError>>>,
    bookings: Mutex<Vec<BookingRequest>>,
    booked_keys: Mutex<HashSet<(Uuid, String, String)>>,
    fetch_count: Mutex<usize>,
}

impl ScriptedSlotSource {
    pub fn new(fetches: Vec<Result<Vec<Slot>, SlotSourceError>>) -> Self {
        Self {
            fetches: Mutex::new(fetches),
            bookings: Mutex::new(Vec::new()),
            booked_keys: Mutex::new(HashSet::new()),
            fetch_count: Mutex::new(0),
        }
    }

    /// A source that answers every fetch with the same slots. Sixteen
    /// scripted responses is far more than any single test drives.
    pub fn always(slots: Vec<Slot>) -> Self {
        Self::new((0..16).map(|_| Ok(slots.clone())).collect())
    }

    pub fn bookings(&self) -> Vec<BookingRequest> {
        self.bookings.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn fetch_count(&self) -> usize {
        *self.fetch_count.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SlotSource for ScriptedSlotSource {
    async fn fetch_slots(&self, _request: &SlotRequest) -> Result<Vec<Slot>, SlotSourceError> {
        *self.fetch_count.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        let mut fetches = self.fetches.lock().unwrap_or_else(|e| e.into_inner());
        if fetches.is_empty() {
            return Err(SlotSourceError::Unavailable("script exhausted".into()));
        }
        fetches.remove(0)
    }

    async fn book(&self, request: &BookingRequest) -> Result<(), SlotSourceError> {
        let key = (
            request.tenant_id,
            request.slot_id.clone(),
            request.order_id.clone(),
        );
        let mut keys = self.booked_keys.lock().unwrap_or_else(|e| e.into_inner());
        if keys.insert(key) {
            self.bookings
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(request.clone());
        }
        Ok(())
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
