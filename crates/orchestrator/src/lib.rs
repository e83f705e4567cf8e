//! mb_orchestrator
//!
//! The Orchestrator (C8): the single entry point that strings together
//! config loading, candidate resolution (C5), context bridging (C2-C4),
//! payload construction (C6), and fan-out dispatch (C7) into one
//! [`CompareRuntimeOutput`].
//!
//! There is no process-wide state; every parameter flows through [`run`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use mb_candidates::{parse_raw_candidates, resolve_candidates, Candidate, RuntimeConfig};
use mb_context::{ContextPack, ExplicitSnippetInput};
use mb_executor::{ModelCaller, NormalizedResult};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("dispatch failed: {0}")]
    Dispatch(#[from] mb_executor::ExecutorError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Fanout,
    Single,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    On,
    Off,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Metadata {
    pub bridge: BridgeState,
    pub files: usize,
    pub snippets: usize,
    pub redactions: usize,
    pub truncated: bool,
}

/// The full, serializable result of one comparison run.
#[derive(Debug, Clone, Serialize)]
pub struct CompareRuntimeOutput {
    pub mode: Mode,
    pub metadata: Metadata,
    pub results: Vec<NormalizedResult>,
    pub fallback_reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_pack: Option<ContextPack>,
}

/// Everything the orchestrator needs for one run. Borrowed, not owned: the
/// caller keeps ownership of the workspace path, env map, and explicit
/// extraction hints across the whole invocation.
pub struct RunInput<'a> {
    pub raw_config: &'a serde_json::Value,
    pub question: &'a str,
    pub workspace: &'a Path,
    pub explicit_files: &'a [String],
    pub explicit_snippets: &'a [ExplicitSnippetInput],
    pub env: &'a HashMap<String, String>,
    pub default_candidate: Option<Candidate>,
}

pub async fn run(input: RunInput<'_>, caller: Arc<dyn ModelCaller>) -> Result<CompareRuntimeOutput, OrchestratorError> {
    let runtime = RuntimeConfig::from_raw(input.raw_config);
    let raw_candidates = parse_raw_candidates(input.raw_config);
    tracing::debug!(enabled = runtime.enabled, context_bridge = runtime.context_bridge, raw_candidates = raw_candidates.len(), "config loaded");

    let mut reasons: Vec<String> = Vec::new();
    if !runtime.enabled {
        reasons.push("FEATURE_DISABLED: multi_model.enabled=false".to_string());
        tracing::warn!("feature disabled, forcing single mode");
    }

    let resolved = resolve_candidates(&raw_candidates, &runtime, input.default_candidate, input.env);
    let candidates = resolved.candidates;
    for reason in &resolved.reasons {
        tracing::debug!(reason = %reason, "candidate fallback reason");
    }
    reasons.extend(resolved.reasons);

    let callable_external_exists = candidates.iter().any(|c| c.is_external());
    let bridge = if runtime.context_bridge { BridgeState::On } else { BridgeState::Off };

    let mut empty_pack_fallback = false;
    let pack: Option<ContextPack> = if runtime.context_bridge && callable_external_exists {
        let built = mb_context::build_pack(input.question, input.workspace, &runtime.budget, input.explicit_files, input.explicit_snippets);
        tracing::debug!(files = built.meta.files, snippets = built.meta.snippets, truncated = built.meta.truncated, "context pack built");
        if built.is_empty() {
            empty_pack_fallback = true;
            reasons.push("CONTEXT_PACK_EMPTY: facts=0 snippets=0".to_string());
            tracing::warn!("context pack empty, falling back to single mode");
        }
        Some(built)
    } else {
        if !runtime.context_bridge && callable_external_exists {
            reasons.push("CONTEXT_BRIDGE_BYPASSED: context_bridge=false".to_string());
        }
        None
    };

    let payload = mb_payload::build(input.question, runtime.context_bridge, pack.clone());

    let metadata = match &pack {
        Some(p) => Metadata { bridge, files: p.meta.files, snippets: p.meta.snippets, redactions: p.meta.redaction_count, truncated: p.meta.truncated },
        None => Metadata { bridge, files: 0, snippets: 0, redactions: 0, truncated: false },
    };

    let fanout = runtime.enabled && candidates.len() >= 2 && !empty_pack_fallback;
    tracing::debug!(mode = if fanout { "fanout" } else { "single" }, candidates = candidates.len(), "mode decided");
    let (mode, dispatch_candidates) = if fanout {
        (Mode::Fanout, candidates)
    } else {
        if candidates.len() < 2 {
            reasons.push(format!("INSUFFICIENT_USABLE_MODELS: {}<2", candidates.len()));
        }
        let picked = pick_single_candidate(&candidates);
        (Mode::Single, picked.into_iter().collect())
    };

    if dispatch_candidates.is_empty() {
        return Ok(CompareRuntimeOutput { mode, metadata, results: Vec::new(), fallback_reasons: reasons, context_pack: pack });
    }

    let results = mb_executor::dispatch(&dispatch_candidates, &payload, runtime.timeout_sec, runtime.max_parallel, caller).await?;

    Ok(CompareRuntimeOutput { mode, metadata, results, fallback_reasons: reasons, context_pack: pack })
}

fn pick_single_candidate(candidates: &[Candidate]) -> Option<Candidate> {
    candidates.iter().find(|c| c.is_default).or_else(|| candidates.first()).cloned()
}
