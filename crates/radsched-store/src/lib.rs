// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Entity model and storage contracts.
//!
//! The concrete database is an external collaborator; this crate owns the
//! entity types, the async trait surface the rest of the system programs
//! against, and an in-memory backend that enforces the same invariants a
//! relational backend would:
//!
//! - at most one non-terminal session per (tenant, phone-hash), the moral
//!   equivalent of a unique partial index;
//! - optimistic concurrency on sessions via a version counter;
//! - append-only consent history and audit log.

mod analysis;
mod audit;
mod consent;
mod error;
mod memory;
mod prompt;
mod retry;
mod session;
mod tenant;

pub use analysis::{AnalysisLogEntry, AnalysisLogStore};
pub use audit::{AuditEntry, AuditSink, Direction, MessageTag};
pub use consent::{ConsentMethod, ConsentRecord, ConsentStore};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use prompt::{PromptStore, PromptTemplate};
pub use retry::with_retry;
pub use session::{QueuedOrder, Session, SessionState, SessionStore};
pub use tenant::{DurationStacking, StackingPolicy, Tenant, TenantSmsConfig, TenantStore};
