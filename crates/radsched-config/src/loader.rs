// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Candidate config files, weakest first. A later layer overrides the
/// fields it sets in an earlier one, so site ops can pin defaults in
/// `/etc` while a workspace file tweaks only what it needs.
fn layer_paths() -> Vec<PathBuf> {
    let mut layers: Vec<PathBuf> = ["/etc/radsched/config.yaml", "/etc/radsched/config.yml"]
        .into_iter()
        .map(PathBuf::from)
        .collect();

    if let Some(home) = dirs::home_dir() {
        for name in ["config.yaml", "config.yml"] {
            layers.push(home.join(".config/radsched").join(name));
        }
    }

    for local in [
        ".radsched/config.yaml",
        ".radsched/config.yml",
        "radsched.yaml",
        "radsched.yml",
    ] {
        layers.push(PathBuf::from(local));
    }

    layers
}

/// Assemble the process configuration.
///
/// Every layer file that exists is parsed and overlaid in order; a path
/// passed via `--config` lands on top and, unlike the search-path
/// layers, must exist. With no files at all the built-in defaults apply.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let mut stack = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in layer_paths() {
        if !path.is_file() {
            continue;
        }
        debug!(path = %path.display(), "applying config layer");
        overlay(&mut stack, parse_file(&path)?);
    }

    if let Some(path) = explicit {
        let expanded = shellexpand::tilde(&path.to_string_lossy()).to_string();
        debug!(path = %expanded, "applying --config layer");
        overlay(&mut stack, parse_file(Path::new(&expanded))?);
    }

    if matches!(&stack, serde_yaml::Value::Mapping(m) if m.is_empty()) {
        return Ok(Config::default());
    }
    serde_yaml::from_value(stack).context("merged configuration does not match the schema")
}

fn parse_file(path: &Path) -> anyhow::Result<serde_yaml::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Overlay `top` onto `base`. Mappings merge key by key; anything else
/// (scalars, sequences) is replaced wholesale by the newer layer.
fn overlay(base: &mut serde_yaml::Value, top: serde_yaml::Value) {
    match (base, top) {
        (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(top_map)) => {
            for (key, value) in top_map {
                match base_map.get_mut(&key) {
                    Some(slot) if slot.is_mapping() && value.is_mapping() => {
                        overlay(slot, value)
                    }
                    Some(slot) => *slot = value,
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (other, top) => *other = top,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn overlay_replaces_scalars() {
        let mut base = yaml("slot_timeout_secs: 60");
        overlay(&mut base, yaml("slot_timeout_secs: 90"));
        assert_eq!(base["slot_timeout_secs"].as_i64(), Some(90));
    }

    #[test]
    fn overlay_keeps_untouched_siblings() {
        let mut base = yaml("session_ttl_hours: 24\nsweep_interval_secs: 30");
        overlay(&mut base, yaml("sweep_interval_secs: 15"));
        assert_eq!(base["session_ttl_hours"].as_i64(), Some(24));
        assert_eq!(base["sweep_interval_secs"].as_i64(), Some(15));
    }

    #[test]
    fn overlay_recurses_into_nested_sections() {
        let mut base = yaml("carriers:\n  twilio:\n    account_id: AC1\n    enabled: true");
        overlay(&mut base, yaml("carriers:\n  twilio:\n    enabled: false"));
        assert_eq!(base["carriers"]["twilio"]["account_id"].as_str(), Some("AC1"));
        assert_eq!(base["carriers"]["twilio"]["enabled"].as_bool(), Some(false));
    }

    #[test]
    fn overlay_adds_sections_missing_from_base() {
        let mut base = yaml("secrets:\n  default_tenant: default");
        overlay(&mut base, yaml("dev:\n  insecure_skip_webhook_verification: true"));
        assert_eq!(base["secrets"]["default_tenant"].as_str(), Some("default"));
        assert_eq!(
            base["dev"]["insecure_skip_webhook_verification"].as_bool(),
            Some(true)
        );
    }

    #[test]
    fn missing_explicit_config_is_a_hard_error() {
        assert!(load(Some(Path::new("/tmp/radsched-no-such-file.yaml"))).is_err());
    }

    #[test]
    fn empty_search_yields_builtin_defaults() {
        let cfg = load(None).unwrap();
        assert_eq!(cfg.secrets.default_tenant, "default");
        assert_eq!(cfg.scheduling.session_ttl_hours, 24);
        assert!(!cfg.dev.insecure_skip_webhook_verification);
    }

    #[test]
    fn explicit_layer_wins_over_defaults_field_by_field() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "secrets:\n  default_tenant: mercy-west\nscheduling:\n  slot_timeout_secs: 45"
        )
        .unwrap();
        let cfg = load(Some(file.path())).unwrap();
        assert_eq!(cfg.secrets.default_tenant, "mercy-west");
        assert_eq!(cfg.scheduling.slot_timeout_secs, 45);
        // Fields the file is silent on keep their defaults.
        assert_eq!(cfg.scheduling.sweep_interval_secs, 30);
        assert_eq!(cfg.scheduling.session_ttl_hours, 24);
    }
}
