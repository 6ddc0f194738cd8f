// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Inbound reply classification.

/// Carrier-mandated opt-out keywords, matched on the whole trimmed body.
const STOP_KEYWORDS: &[&str] = &["STOP", "STOPALL", "UNSUBSCRIBE", "CANCEL", "END", "QUIT"];

const HELP_KEYWORDS: &[&str] = &["HELP", "INFO"];

const YES_KEYWORDS: &[&str] = &["YES", "Y", "YEAH", "YEP"];

const NO_KEYWORDS: &[&str] = &["NO", "N", "NOPE"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Global opt-out; honored in any state and out-of-band.
    Stop,
    /// Global help request; honored in any state and out-of-band.
    Help,
    Yes,
    No,
    /// A 1-based menu choice.
    Choice(u32),
    Unknown,
}

/// Classify one inbound SMS body.
///
/// Keywords match the whole message case-insensitively so "stop please"
/// does NOT opt out (carrier behavior), but "1." and "#2" still count as
/// choices.
pub fn classify(body: &str) -> Reply {
    let trimmed = body.trim();
    let upper = trimmed.to_uppercase();

    if STOP_KEYWORDS.contains(&upper.as_str()) {
        return Reply::Stop;
    }
    if HELP_KEYWORDS.contains(&upper.as_str()) {
        return Reply::Help;
    }
    if YES_KEYWORDS.contains(&upper.as_str()) {
        return Reply::Yes;
    }
    if NO_KEYWORDS.contains(&upper.as_str()) {
        return Reply::No;
    }

    let digits: String = trimmed
        .trim_start_matches(['#', '(', '['])
        .trim_end_matches(['.', ')', ']'])
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    if !digits.is_empty() && digits.len() == trimmed.chars().filter(|c| c.is_ascii_alphanumeric()).count() {
        if let Ok(n) = digits.parse::<u32>() {
            if (1..=99).contains(&n) {
                return Reply::Choice(n);
            }
        }
    }

    Reply::Unknown
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
