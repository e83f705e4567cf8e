//! mb_providers
//!
//! Concrete [`mb_executor::ModelCaller`] implementations. Transport and
//! response normalization only: no policy, no redaction, no retries. The
//! executor is the only thing that interprets success/failure/timeout.

use std::time::Duration;

use async_trait::async_trait;
use mb_candidates::Candidate;
use mb_executor::{CallerError, CallerReply, ModelCaller};
use mb_payload::Payload;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Transport-level failures local to this crate, converted to
/// [`CallerError`] at the [`ModelCaller`] boundary. Mirrors the teacher's
/// `pie_providers::ProviderError` split between a network-layer variant and
/// an unexpected-shape variant.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("candidate {0} has no base_url")]
    MissingBaseUrl(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Serialize)]
struct ChatMsg {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenAICompatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMsg>,
    temperature: f64,
}

/// Calls any OpenAI-chat-completions-compatible endpoint. The candidate's
/// `base_url` supplies the host, `api_key` (if any) becomes a bearer token,
/// and the shared [`Payload`] is rendered into a single user message.
pub struct OpenAICompatCaller {
    client: Client,
}

impl OpenAICompatCaller {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

impl Default for OpenAICompatCaller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelCaller for OpenAICompatCaller {
    async fn call(&self, candidate: &Candidate, payload: &Payload, timeout_sec: u64) -> Result<CallerReply, CallerError> {
        call_openai_compat(&self.client, candidate, payload, timeout_sec)
            .await
            .map_err(|e| CallerError::new(e.to_string()))
    }
}

async fn call_openai_compat(
    client: &Client,
    candidate: &Candidate,
    payload: &Payload,
    timeout_sec: u64,
) -> Result<CallerReply, ProviderError> {
    let base_url = candidate.base_url.as_deref().ok_or_else(|| ProviderError::MissingBaseUrl(candidate.id.clone()))?;
    let url = format!("{}/v1/chat/completions", base_url.trim_end_matches('/'));

    let body = OpenAICompatRequest { model: &candidate.model, messages: build_messages(payload), temperature: 0.2 };

    let mut request = client.post(url).timeout(Duration::from_secs(timeout_sec.max(1))).json(&body);
    if let Some(key) = candidate.api_key.as_deref().filter(|k| !k.is_empty()) {
        request = request.bearer_auth(key);
    }

    let response = request.send().await?;
    let raw: Value = response.json().await?;
    Ok(normalize_reply(raw))
}

fn build_messages(payload: &Payload) -> Vec<ChatMsg> {
    let mut messages = vec![ChatMsg {
        role: "system".into(),
        content: "You are one of several models answering the same question for side-by-side comparison. \
                  Answer the question directly, using any provided context."
            .into(),
    }];

    let mut user_content = payload.question.clone();
    if let Some(pack) = &payload.context_pack {
        if !pack.facts.is_empty() {
            user_content.push_str("\n\nFacts:\n");
            for fact in &pack.facts {
                user_content.push_str("- ");
                user_content.push_str(fact);
                user_content.push('\n');
            }
        }
        for snippet in &pack.snippets {
            user_content.push_str(&format!("\n--- {}:{}-{} ---\n{}\n", snippet.path, snippet.start_line, snippet.end_line, snippet.content));
        }
    }
    messages.push(ChatMsg { role: "user".into(), content: user_content });
    messages
}

fn normalize_reply(raw: Value) -> CallerReply {
    let content = raw
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c0| c0.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str());

    match content {
        Some(text) => CallerReply::Text(text.to_string()),
        None => match raw {
            Value::Object(map) => CallerReply::Mapping(map),
            other => CallerReply::Other(other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_with_context() -> Payload {
        use mb_context::{ContextPack, PackMeta, Snippet, SnippetSource};
        let pack = ContextPack {
            facts: vec!["a.rs:1-2 (source=keyword_search)".into()],
            snippets: vec![Snippet {
                path: "a.rs".into(),
                start_line: 1,
                end_line: 2,
                content: "fn main() {}".into(),
                source: SnippetSource::KeywordSearch,
                priority: 2,
            }],
            meta: PackMeta::default(),
        };
        mb_payload::build("explain main", true, Some(pack))
    }

    #[test]
    fn build_messages_includes_facts_and_snippets_in_user_message() {
        let messages = build_messages(&payload_with_context());
        assert_eq!(messages[0].role, "system");
        let user = &messages[1];
        assert_eq!(user.role, "user");
        assert!(user.content.contains("explain main"));
        assert!(user.content.contains("a.rs:1-2"));
        assert!(user.content.contains("fn main() {}"));
    }

    #[test]
    fn build_messages_without_context_pack_is_just_the_question() {
        let payload = mb_payload::build("hello", false, None);
        let messages = build_messages(&payload);
        assert_eq!(messages[1].content, "hello");
    }

    #[tokio::test]
    async fn candidate_without_base_url_fails_before_any_network_call() {
        let candidate = Candidate {
            id: "no-url".into(),
            provider: "openai_compatible".into(),
            model: "gpt-test".into(),
            base_url: None,
            enabled: true,
            api_key_env: "X".into(),
            api_key: Some("sk-x".into()),
            is_default: false,
        };
        let payload = mb_payload::build("hello", false, None);
        let err = call_openai_compat(&Client::new(), &candidate, &payload, 5).await.unwrap_err();
        assert!(matches!(err, ProviderError::MissingBaseUrl(id) if id == "no-url"));
    }

    #[test]
    fn normalize_reply_extracts_chat_completions_content() {
        let raw = serde_json::json!({"choices": [{"message": {"content": "hi there"}}]});
        match normalize_reply(raw) {
            CallerReply::Text(s) => assert_eq!(s, "hi there"),
            other => panic!("expected text reply, got {other:?}"),
        }
    }

    #[test]
    fn normalize_reply_falls_back_to_mapping_when_shape_is_unrecognized() {
        let raw = serde_json::json!({"result": "unexpected shape"});
        match normalize_reply(raw) {
            CallerReply::Mapping(map) => assert_eq!(map.get("result").unwrap(), "unexpected shape"),
            other => panic!("expected mapping reply, got {other:?}"),
        }
    }
}
