// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use rand::Rng;

use radsched_store::PromptTemplate;

/// Draw one template from the active set, weighted by `ab_test_weight`.
///
/// Weights define a discrete distribution: template `i` is drawn with
/// probability `weight_i / Σ weights`. When every weight is zero the draw
/// degenerates to uniform so a misconfigured set still selects something.
/// Returns `None` only for an empty slice.
pub fn weighted_draw<'a, R: Rng>(
    templates: &'a [PromptTemplate],
    rng: &mut R,
) -> Option<&'a PromptTemplate> {
    if templates.is_empty() {
        return None;
    }
    if templates.len() == 1 {
        return templates.first();
    }

    let total: u32 = templates.iter().map(|t| t.ab_test_weight as u32).sum();
    if total == 0 {
        return templates.get(rng.gen_range(0..templates.len()));
    }

    let mut roll = rng.gen_range(0..total);
    for t in templates {
        let w = t.ab_test_weight as u32;
        if roll < w {
            return Some(t);
        }
        roll -= w;
    }
    // Unreachable: roll < total and the weights sum to total.
    templates.last()
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    use super::*;

    fn template(key: &str, weight: u8) -> PromptTemplate {
        PromptTemplate {
            id: Uuid::new_v4(),
            key: key.into(),
            template: "{{order_description}}".into(),
            model: "haiku".into(),
            max_tokens: 512,
            is_active: true,
            ab_test_weight: weight,
            version: 1,
        }
    }

    #[test]
    fn empty_set_draws_nothing() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(weighted_draw(&[], &mut rng).is_none());
    }

    #[test]
    fn single_template_always_wins() {
        let mut rng = StdRng::seed_from_u64(1);
        let set = [template("a", 0)];
        for _ in 0..10 {
            assert_eq!(weighted_draw(&set, &mut rng).unwrap().key, "a");
        }
    }

    #[test]
    fn zero_weight_is_never_drawn_next_to_positive_weights() {
        let mut rng = StdRng::seed_from_u64(7);
        let set = [template("never", 0), template("always", 100)];
        for _ in 0..1000 {
            assert_eq!(weighted_draw(&set, &mut rng).unwrap().key, "always");
        }
    }

    #[test]
    fn all_zero_weights_fall_back_to_uniform() {
        let mut rng = StdRng::seed_from_u64(42);
        let set = [template("a", 0), template("b", 0)];
        let mut seen_a = false;
        let mut seen_b = false;
        for _ in 0..200 {
            match weighted_draw(&set, &mut rng).unwrap().key.as_str() {
                "a" => seen_a = true,
                _ => seen_b = true,
            }
        }
        assert!(seen_a && seen_b);
    }

    #[test]
    fn empirical_frequency_tracks_weights() {
        // 75/25 split over 20k draws; allow ±3 percentage points.
        let mut rng = StdRng::seed_from_u64(1234);
        let set = [template("heavy", 75), template("light", 25)];
        let n = 20_000;
        let mut heavy = 0usize;
        for _ in 0..n {
            if weighted_draw(&set, &mut rng).unwrap().key == "heavy" {
                heavy += 1;
            }
        }
        let freq = heavy as f64 / n as f64;
        assert!((freq - 0.75).abs() < 0.03, "heavy frequency {freq}");
    }
}
