//! mb_payload
//!
//! The Payload Constructor (C6): builds the JSON object shared byte-for-byte
//! across every dispatched candidate, and computes its signature.
//!
//! The payload's dynamic shape (`{question}` vs `{question, context_pack}`)
//! is modeled with `Option<ContextPack>` rather than a hand-rolled tag —
//! `Option` already is Rust's native sum type for "present or absent".

use mb_context::ContextPack;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("failed to canonicalize payload: {0}")]
    Canon(#[from] mb_common::CanonError),
}

/// The shared payload dispatched to every candidate in a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payload {
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_pack: Option<ContextPack>,
}

/// Build the payload per spec §4.6: attach the pack only when context
/// bridging is on AND a pack was actually built.
pub fn build(question: &str, context_bridge: bool, pack: Option<ContextPack>) -> Payload {
    let context_pack = if context_bridge { pack } else { None };
    Payload { question: question.to_string(), context_pack }
}

/// Lowercase hex SHA-256 of the payload's canonical JSON serialization
/// (sorted keys, no insignificant whitespace). The same signature must be
/// attached to every result dispatched from one `Payload`.
pub fn signature(payload: &Payload) -> Result<String, PayloadError> {
    Ok(mb_common::sha256_hex_canonical_json(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mb_context::PackMeta;
    use pretty_assertions::assert_eq;

    fn pack() -> ContextPack {
        ContextPack { facts: vec!["a.rs:1-2 (source=keyword_search)".into()], snippets: vec![], meta: PackMeta::default() }
    }

    #[test]
    fn question_only_when_bridge_off() {
        let payload = build("hello", false, Some(pack()));
        assert!(payload.context_pack.is_none());
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 1);
    }

    #[test]
    fn question_only_when_no_pack_present() {
        let payload = build("hello", true, None);
        assert!(payload.context_pack.is_none());
    }

    #[test]
    fn includes_context_pack_when_bridging_and_pack_present() {
        let payload = build("hello", true, Some(pack()));
        assert!(payload.context_pack.is_some());
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("context_pack").is_some());
    }

    #[test]
    fn signature_is_stable_for_equivalent_payloads() {
        let a = build("hello", true, Some(pack()));
        let b = build("hello", true, Some(pack()));
        assert_eq!(signature(&a).unwrap(), signature(&b).unwrap());
    }

    #[test]
    fn signature_differs_when_question_differs() {
        let a = build("hello", false, None);
        let b = build("goodbye", false, None);
        assert_ne!(signature(&a).unwrap(), signature(&b).unwrap());
    }

    #[test]
    fn signature_is_bare_lowercase_hex() {
        let sig = signature(&build("hello", false, None)).unwrap();
        assert_eq!(sig.len(), 64);
        assert_eq!(sig, sig.to_ascii_lowercase());
        assert!(!sig.contains(':'));
    }
}
