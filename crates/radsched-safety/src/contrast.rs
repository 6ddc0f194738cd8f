// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Contrast detection over free-text order descriptions.

/// Phrases that mark an order as contrast-requiring.
const CONTRAST_PHRASES: &[&str] = &[
    "with contrast",
    "w/ contrast",
    "w/contrast",
    "ct angiography",
    "mr angiography",
];

/// Single tokens that imply contrast (angiography protocols).
const CONTRAST_TOKENS: &[&str] = &["cta", "mra"];

/// Phrases that explicitly negate contrast; these win over any positive.
const NO_CONTRAST_PHRASES: &[&str] = &["without contrast", "w/o contrast", "wo contrast"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContrastKind {
    None,
    Iv,
    Oral,
    /// Both IV and oral (e.g. CT abdomen/pelvis protocols).
    IvAndOral,
}

/// Whether the order requires contrast administration.
///
/// An explicit "without contrast" override wins, which also covers
/// "with and without" protocols being conservatively treated as
/// non-contrast only when no positive signal remains.
pub fn requires_contrast(description: &str) -> bool {
    let lower = description.to_lowercase();

    // "with and without contrast" is a contrast study; a plain negation
    // is not. Strip the negation phrases and look at what remains.
    let explicit_negation = NO_CONTRAST_PHRASES.iter().any(|p| lower.contains(p));
    let has_with_and_without = lower.contains("with and without");

    if explicit_negation && !has_with_and_without {
        return false;
    }

    CONTRAST_PHRASES.iter().any(|p| lower.contains(p))
        || tokens(&lower).any(|t| CONTRAST_TOKENS.contains(&t))
        || has_with_and_without
}

/// What kind of contrast the protocol calls for.
pub fn contrast_kind(description: &str) -> ContrastKind {
    if !requires_contrast(description) {
        return ContrastKind::None;
    }
    let lower = description.to_lowercase();
    let oral = lower.contains("oral contrast");
    let iv = !oral || lower.contains("iv contrast") || lower.contains("with contrast");
    match (iv, oral) {
        (true, true) => ContrastKind::IvAndOral,
        (false, true) => ContrastKind::Oral,
        _ => ContrastKind::Iv,
    }
}

/// Alphanumeric word split; avoids "cta" matching inside longer words.
fn tokens(lower: &str) -> impl Iterator<Item = &str> {
    lower.split(|c: char| !c.is_ascii_alphanumeric()).filter(|t| !t.is_empty())
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
