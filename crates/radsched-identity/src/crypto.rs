// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Reversible phone encryption.
//!
//! # Security model
//!
//! The plaintext number is needed exactly once per outbound send, so it is
//! stored under an authenticated cipher rather than hashed. ChaCha20-Poly1305
//! with a fresh random 96-bit nonce per encryption; the stored form is
//! `base64(nonce ∥ ciphertext ∥ tag)`. The data key is derived from the
//! process encryption key (>= 32 characters, from config) by a single
//! SHA-256, so key rotation is a config change plus a re-encryption sweep.
//!
//! Decryption failures are indistinguishable between a wrong key and a
//! tampered ciphertext. Callers treat both as fatal for the row.

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    ChaCha20Poly1305, Nonce,
};
use sha2::{Digest, Sha256};

use crate::IdentityError;

/// Minimum length of the process encryption key, in characters.
pub const MIN_KEY_CHARS: usize = 32;

const NONCE_LEN: usize = 12;

/// AEAD cipher over digit-only normalized phone numbers.
pub struct PhoneCipher {
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for PhoneCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhoneCipher").finish_non_exhaustive()
    }
}

impl PhoneCipher {
    /// Derive the data key from the process encryption key.
    pub fn from_process_key(process_key: &str) -> Result<Self, IdentityError> {
        if process_key.chars().count() < MIN_KEY_CHARS {
            return Err(IdentityError::KeyTooShort {
                min: MIN_KEY_CHARS,
                got: process_key.chars().count(),
            });
        }
        let mut hasher = Sha256::new();
        hasher.update(process_key.as_bytes());
        let key = hasher.finalize();
        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|_| IdentityError::Ciphertext("key derivation failed".into()))?;
        Ok(Self { cipher })
    }

    /// Encrypt a normalized phone number.
    ///
    /// The `+` prefix is dropped before encryption so the ciphertext always
    /// covers the digit-only form, matching the hash input.
    pub fn encrypt(&self, normalized_phone: &str) -> Result<String, IdentityError> {
        let plaintext = normalized_phone.strip_prefix('+').unwrap_or(normalized_phone);
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| IdentityError::Ciphertext("encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(base64_encode(&out))
    }

    /// Decrypt a stored phone ciphertext back to `+`-prefixed E.164.
    pub fn decrypt(&self, stored: &str) -> Result<String, IdentityError> {
        let raw = base64_decode(stored)
            .map_err(|e| IdentityError::Ciphertext(format!("base64: {e}")))?;
        if raw.len() <= NONCE_LEN {
            return Err(IdentityError::Ciphertext("too short".into()));
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| IdentityError::Ciphertext("authentication failed".into()))?;
        let digits = String::from_utf8(plaintext)
            .map_err(|_| IdentityError::Ciphertext("not UTF-8".into()))?;
        Ok(format!("+{digits}"))
    }
}

fn base64_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

fn base64_decode(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(data)
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
