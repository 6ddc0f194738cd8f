// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use sha2::{Digest, Sha256};

use crate::IdentityError;

/// Normalize a raw phone number to E.164.
///
/// Accepted inputs and their results:
/// - 10 digits (`"5551234567"`, `"(555) 123-4567"`) → `+15551234567`
/// - 11 digits starting with `1` → `+` prefix added
/// - already `+`-prefixed with 11-15 digits → kept, formatting stripped
///
/// Everything else is rejected. Formatting characters (spaces, dashes,
/// dots, parentheses) are stripped before the digit count is taken.
pub fn normalize_phone(raw: &str) -> Result<String, IdentityError> {
    let trimmed = raw.trim();
    let has_plus = trimmed.starts_with('+');
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();

    if has_plus {
        if (11..=15).contains(&digits.len()) {
            return Ok(format!("+{digits}"));
        }
        return Err(IdentityError::InvalidPhone(format!(
            "{} digits after '+'",
            digits.len()
        )));
    }

    match digits.len() {
        10 => Ok(format!("+1{digits}")),
        11 if digits.starts_with('1') => Ok(format!("+{digits}")),
        n => Err(IdentityError::InvalidPhone(format!("{n} digits"))),
    }
}

/// Digit-only form of a normalized number (the `+` dropped).
///
/// Both the lookup hash and the encrypted form are computed over this
/// representation so that `+15551234567` and `15551234567` collide.
fn digits_only(normalized: &str) -> &str {
    normalized.strip_prefix('+').unwrap_or(normalized)
}

/// SHA-256 hex (64 chars, lowercase) over the digit-only normalized phone.
///
/// This is the PHI-safe lookup key for consent, sessions, and audit.
pub fn phone_hash(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(digits_only(normalized).as_bytes());
    hex::encode(hasher.finalize())
}

/// Last four digits for display and audit surfaces.
pub fn last_four(normalized: &str) -> String {
    let d = digits_only(normalized);
    d.chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect()
}

/// Stable pool index for sticky-sender selection.
///
/// Hashes the (already hashed) phone key once more and folds the first
/// eight bytes into a u64. The result depends only on the input string
/// and the pool size, so it is identical across processes and restarts.
pub fn sticky_index(phone_hash: &str, pool_len: usize) -> usize {
    debug_assert!(pool_len > 0);
    let mut hasher = Sha256::new();
    hasher.update(phone_hash.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) % pool_len as u64) as usize
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
