// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Phone identity primitives.
//!
//! Patient phone numbers are PHI. They exist in exactly two storable forms:
//!
//! - a **lookup hash**: SHA-256 hex over the digit-only normalized number,
//!   used as the key for consent records, sessions, and audit rows;
//! - an **encrypted form**: ChaCha20-Poly1305 over the digit-only normalized
//!   number, the only form from which an outbound SMS may be addressed.
//!
//! The plaintext number is never persisted and never logged. Display
//! surfaces get the last four digits only.

pub mod crypto;
pub mod phone;

pub use crypto::PhoneCipher;
pub use phone::{last_four, normalize_phone, phone_hash, sticky_index};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid phone number: {0}")]
    InvalidPhone(String),

    #[error("encryption key must be at least {min} characters, got {got}")]
    KeyTooShort { min: usize, got: usize },

    #[error("ciphertext is malformed: {0}")]
    Ciphertext(String),
}
