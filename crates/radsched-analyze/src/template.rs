// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

/// Placeholder value used when an interpolation variable is absent.
pub const NOT_PROVIDED: &str = "Not provided";

/// Substitute every `{{name}}` placeholder in `template`.
///
/// Names are looked up case-sensitively in `vars`; absent or `None`
/// values become the literal `"Not provided"`. There is no nesting and
/// no conditional syntax. A stray `{{` with no closing `}}` is copied
/// through verbatim.
pub fn interpolate(template: &str, vars: &HashMap<String, Option<String>>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = after[..end].trim();
                match vars.get(name) {
                    Some(Some(value)) => out.push_str(value),
                    _ => out.push_str(NOT_PROVIDED),
                }
                rest = &after[end + 2..];
            }
            None => {
                // Unterminated placeholder: keep the raw text.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
