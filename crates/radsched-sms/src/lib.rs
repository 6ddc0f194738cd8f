// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Multi-provider SMS dispatch.
//!
//! One call sends exactly one message for a tenant and returns a
//! standardized result. The dispatcher owns provider selection, the
//! sticky from-number pool, the failover policy, consent refusal, and
//! the per-attempt audit contract. Concrete providers map their native
//! error codes into the shared taxonomy; nothing above this crate ever
//! sees a vendor code.

mod dispatcher;
mod mock;
mod provider;
mod telnyx;
mod twilio;
mod webhook;

pub use dispatcher::{DispatchError, DispatchOutcome, SendRequest, SmsDispatcher};
pub use mock::{RecordedSend, ScriptedSmsProvider};
pub use provider::{SendOutcome, SendStatus, SmsProvider, StandardError};
pub use telnyx::TelnyxProvider;
pub use twilio::TwilioProvider;
pub use webhook::{verify_carrier_signature, verify_inbound, InboundSms, WebhookVerifyError};
