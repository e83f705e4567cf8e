//! mb_candidates
//!
//! Runtime configuration, candidate data model, and the candidate resolver
//! (C5): turns a raw configuration map plus an environment mapping into an
//! ordered list of admissible [`Candidate`]s and a list of fallback reason
//! codes explaining every entry that was skipped.
//!
//! No network calls happen here. Resolution only reads the environment map
//! it is handed and never the process environment directly, so it stays
//! trivially testable.

use std::collections::HashMap;

use mb_common::Budget;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Master switch plus the knobs governing fan-out and context bridging.
///
/// Any non-positive or non-numeric input to a positive-int field silently
/// falls back to its default; only candidate-level defects produce fallback
/// reasons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub enabled: bool,
    pub timeout_sec: u64,
    pub max_parallel: usize,
    pub include_default_model: bool,
    pub context_bridge: bool,
    pub budget: Budget,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_sec: 25,
            max_parallel: 3,
            include_default_model: true,
            context_bridge: true,
            budget: Budget::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse from the raw configuration map delivered to the core (see
    /// spec §6 "Configuration (input)"). Unrecognized or malformed keys are
    /// ignored; recognized keys with the wrong shape fall back to default.
    pub fn from_raw(raw: &serde_json::Value) -> Self {
        let defaults = Self::default();
        Self {
            enabled: raw.get("enabled").and_then(|v| v.as_bool()).unwrap_or(defaults.enabled),
            timeout_sec: positive_u64(raw.get("timeout_sec"), defaults.timeout_sec),
            max_parallel: mb_common::positive_usize(raw.get("max_parallel"), defaults.max_parallel),
            include_default_model: raw
                .get("include_default_model")
                .and_then(|v| v.as_bool())
                .unwrap_or(defaults.include_default_model),
            context_bridge: raw
                .get("context_bridge")
                .and_then(|v| v.as_bool())
                .unwrap_or(defaults.context_bridge),
            budget: Budget::from_raw(raw.get("budget")),
        }
    }
}

fn positive_u64(value: Option<&serde_json::Value>, default: u64) -> u64 {
    match value.and_then(|v| v.as_i64()) {
        Some(n) if n > 0 => n as u64,
        _ => default,
    }
}

/// One entry of the `candidates` sequence in the raw configuration map,
/// before resolution/admission.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCandidate {
    pub id: String,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_key_env: String,
}

/// A single `candidates` array entry that failed to parse as a
/// [`RawCandidate`] — never surfaced as a fallback reason code (the
/// admission plane's reason codes are the closed set in spec §6); logged and
/// skipped so one malformed entry doesn't drop the rest of the array.
#[derive(Debug, Error)]
pub enum CandidateError {
    #[error("malformed candidate entry: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Parse the `candidates` key of a raw configuration map. A missing or
/// non-array value resolves to empty — the resolver will then surface
/// `NO_ENABLED_CANDIDATES`. Each entry is parsed independently: one entry
/// missing a required field (`id`/`provider`/`model`) is skipped without
/// dropping the rest of the array.
pub fn parse_raw_candidates(raw: &serde_json::Value) -> Vec<RawCandidate> {
    let Some(entries) = raw.get("candidates").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| match serde_json::from_value::<RawCandidate>(entry.clone()) {
            Ok(candidate) => Some(candidate),
            Err(err) => {
                tracing::warn!(error = %CandidateError::from(err), "skipping malformed candidate entry");
                None
            }
        })
        .collect()
}

/// A resolved, admissible remote model endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub enabled: bool,
    pub api_key_env: String,
    pub api_key: Option<String>,
    pub is_default: bool,
}

impl Candidate {
    /// A candidate is external iff its provider is the pluggable
    /// HTTP-compatible class and it is not the session default. Only
    /// external candidates engage the context bridge.
    pub fn is_external(&self) -> bool {
        self.provider == "openai_compatible" && !self.is_default
    }
}

/// Stable, uppercase-ASCII fallback reason codes. Format is `CODE` or
/// `CODE: detail`.
pub mod reason {
    pub const NO_ENABLED_CANDIDATES: &str = "NO_ENABLED_CANDIDATES";
    pub const UNSUPPORTED_PROVIDER: &str = "UNSUPPORTED_PROVIDER";
    pub const MISSING_API_KEY: &str = "MISSING_API_KEY";
    pub const DEFAULT_MODEL_UNAVAILABLE: &str = "DEFAULT_MODEL_UNAVAILABLE";
}

/// Output of [`resolve_candidates`]: admitted candidates in input order
/// (externals first, in config order, then the default if appended) plus
/// every fallback reason discovered along the way, in discovery order.
#[derive(Debug, Clone, Default)]
pub struct ResolveOutput {
    pub candidates: Vec<Candidate>,
    pub reasons: Vec<String>,
}

/// Resolve admissible candidates from the enabled raw entries, the
/// environment mapping, and (if configured) the session default candidate.
///
/// See spec §4.5 for the exact processing order; reasons are appended in
/// that order and are never deduplicated — repeated identical causes each
/// get their own entry (see spec §9 open question (a)).
pub fn resolve_candidates(
    raw_candidates: &[RawCandidate],
    runtime: &RuntimeConfig,
    default_candidate: Option<Candidate>,
    env: &HashMap<String, String>,
) -> ResolveOutput {
    let mut reasons = Vec::new();
    let mut candidates = Vec::new();

    let enabled_raw: Vec<&RawCandidate> = raw_candidates.iter().filter(|c| c.enabled).collect();
    if enabled_raw.is_empty() {
        reasons.push(format!("{}: candidates[*].enabled=true count=0", reason::NO_ENABLED_CANDIDATES));
    }

    for raw in enabled_raw {
        if raw.provider != "openai_compatible" {
            reasons.push(format!(
                "{}: id={}, provider={}",
                reason::UNSUPPORTED_PROVIDER,
                raw.id,
                raw.provider
            ));
            continue;
        }
        if raw.api_key_env.trim().is_empty() {
            reasons.push(format!("{}: candidate_id={}", reason::MISSING_API_KEY, raw.id));
            continue;
        }
        let resolved_key = env.get(&raw.api_key_env).map(|v| v.trim()).filter(|v| !v.is_empty());
        match resolved_key {
            Some(key) => candidates.push(Candidate {
                id: raw.id.clone(),
                provider: raw.provider.clone(),
                model: raw.model.clone(),
                base_url: raw.base_url.clone(),
                enabled: true,
                api_key_env: raw.api_key_env.clone(),
                api_key: Some(key.to_string()),
                is_default: false,
            }),
            None => reasons.push(format!("{}: candidate_id={}", reason::MISSING_API_KEY, raw.id)),
        }
    }

    if runtime.include_default_model {
        match default_candidate {
            Some(default) => candidates.push(default),
            None => reasons.push(format!("{}: include_default_model=true", reason::DEFAULT_MODEL_UNAVAILABLE)),
        }
    }

    ResolveOutput { candidates, reasons }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn raw(id: &str, provider: &str, enabled: bool, api_key_env: &str) -> RawCandidate {
        RawCandidate {
            id: id.into(),
            provider: provider.into(),
            model: "gpt-test".into(),
            base_url: None,
            enabled,
            api_key_env: api_key_env.into(),
        }
    }

    #[test]
    fn runtime_config_defaults_when_raw_is_empty_object() {
        let cfg = RuntimeConfig::from_raw(&serde_json::json!({}));
        assert_eq!(cfg, RuntimeConfig::default());
    }

    #[test]
    fn runtime_config_falls_back_on_non_positive_ints() {
        let cfg = RuntimeConfig::from_raw(&serde_json::json!({"timeout_sec": -1, "max_parallel": 0}));
        assert_eq!(cfg.timeout_sec, 25);
        assert_eq!(cfg.max_parallel, 3);
    }

    #[test]
    fn parse_raw_candidates_skips_malformed_entry_but_keeps_the_rest() {
        let raw = serde_json::json!({
            "candidates": [
                {"id": "good", "provider": "openai_compatible", "model": "gpt-test", "enabled": true, "api_key_env": "A_KEY"},
                {"id": "bad-missing-model", "provider": "openai_compatible", "enabled": true},
            ]
        });
        let parsed = parse_raw_candidates(&raw);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, "good");
    }

    #[test]
    fn parse_raw_candidates_is_empty_when_candidates_key_is_missing() {
        assert!(parse_raw_candidates(&serde_json::json!({})).is_empty());
    }

    #[test]
    fn no_enabled_candidates_reason_when_all_disabled() {
        let raws = vec![raw("a", "openai_compatible", false, "A_KEY")];
        let out = resolve_candidates(&raws, &RuntimeConfig { include_default_model: false, ..RuntimeConfig::default() }, None, &env(&[]));
        assert!(out.candidates.is_empty());
        assert_eq!(out.reasons, vec!["NO_ENABLED_CANDIDATES: candidates[*].enabled=true count=0"]);
    }

    #[test]
    fn unsupported_provider_is_skipped_with_reason() {
        let raws = vec![raw("a", "anthropic_native", true, "A_KEY")];
        let out = resolve_candidates(&raws, &RuntimeConfig { include_default_model: false, ..RuntimeConfig::default() }, None, &env(&[]));
        assert!(out.candidates.is_empty());
        assert_eq!(out.reasons, vec!["UNSUPPORTED_PROVIDER: id=a, provider=anthropic_native"]);
    }

    #[test]
    fn missing_api_key_env_field_is_skipped() {
        let raws = vec![raw("a", "openai_compatible", true, "")];
        let out = resolve_candidates(&raws, &RuntimeConfig { include_default_model: false, ..RuntimeConfig::default() }, None, &env(&[]));
        assert!(out.candidates.is_empty());
        assert_eq!(out.reasons, vec!["MISSING_API_KEY: candidate_id=a"]);
    }

    #[test]
    fn missing_or_blank_env_value_is_skipped() {
        let raws = vec![raw("a", "openai_compatible", true, "A_KEY")];
        let out = resolve_candidates(&raws, &RuntimeConfig { include_default_model: false, ..RuntimeConfig::default() }, None, &env(&[("A_KEY", "   ")]));
        assert!(out.candidates.is_empty());
        assert_eq!(out.reasons, vec!["MISSING_API_KEY: candidate_id=a"]);
    }

    #[test]
    fn admits_valid_external_candidate_in_config_order() {
        let raws = vec![
            raw("a", "openai_compatible", true, "A_KEY"),
            raw("b", "openai_compatible", true, "B_KEY"),
        ];
        let out = resolve_candidates(
            &raws,
            &RuntimeConfig { include_default_model: false, ..RuntimeConfig::default() },
            None,
            &env(&[("A_KEY", "sk-a"), ("B_KEY", "sk-b")]),
        );
        assert!(out.reasons.is_empty());
        assert_eq!(out.candidates.len(), 2);
        assert_eq!(out.candidates[0].id, "a");
        assert_eq!(out.candidates[1].id, "b");
        assert!(out.candidates.iter().all(|c| c.is_external()));
    }

    #[test]
    fn default_candidate_is_appended_last_and_is_not_external() {
        let raws = vec![raw("a", "openai_compatible", true, "A_KEY")];
        let default = Candidate {
            id: "session-default".into(),
            provider: "openai_compatible".into(),
            model: "local".into(),
            base_url: None,
            enabled: true,
            api_key_env: String::new(),
            api_key: None,
            is_default: true,
        };
        let out = resolve_candidates(&raws, &RuntimeConfig::default(), Some(default), &env(&[("A_KEY", "sk-a")]));
        assert_eq!(out.candidates.len(), 2);
        assert_eq!(out.candidates.last().unwrap().id, "session-default");
        assert!(!out.candidates.last().unwrap().is_external());
    }

    #[test]
    fn default_model_unavailable_reason_when_requested_but_absent() {
        let out = resolve_candidates(&[], &RuntimeConfig::default(), None, &env(&[]));
        assert!(out.reasons.contains(&"DEFAULT_MODEL_UNAVAILABLE: include_default_model=true".to_string()));
    }
}
