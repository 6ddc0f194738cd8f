// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Conversation state machine.
//!
//! Owns one patient's scheduling dialog from order arrival to a terminal
//! state. Every handler follows the same discipline: read the session,
//! compute the next state, persist it under the uniqueness guard with
//! compare-and-set, and only then emit at most one outbound SMS. A failed
//! persist sends nothing; a terminally failed send rolls the transition
//! back and cancels the session so a broken number is never spammed.

mod keywords;
mod machine;
mod messages;
mod order;
mod patients;
mod slots;
#[cfg(test)]
mod tests;

pub use keywords::{classify, Reply};
pub use machine::{
    ConversationEngine, EngineConfig, InboundDisposition, OrderDisposition, SweepReport,
};
pub use order::{snapshots_from_value, snapshots_to_value, OrderEvent, OrderSnapshot, Priority};
pub use patients::{PatientContextSource, StaticPatientContexts};
pub use slots::{
    BookingRequest, HttpSlotSource, ScriptedSlotSource, Slot, SlotRequest, SlotSource,
    SlotSourceError,
};

use radsched_identity::IdentityError;
use radsched_sms::DispatchError;
use radsched_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("tenant {0} is not active")]
    TenantInactive(String),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    SlotSource(#[from] slots::SlotSourceError),
}
