//! mb_executor
//!
//! The Fan-out Executor (C7): dispatches one byte-identical payload to every
//! admitted candidate, bounded by a worker pool and a single global
//! wall-clock deadline. No shared mutable state crosses candidate calls
//! beyond the immutable payload.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mb_candidates::Candidate;
use mb_payload::Payload;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to sign payload: {0}")]
    Signature(#[from] mb_payload::PayloadError),
}

/// A model caller's raw, un-normalized reply. Mirrors the three shapes the
/// spec allows a caller to hand back: `string | mapping | other`.
#[derive(Debug, Clone)]
pub enum CallerReply {
    Text(String),
    Mapping(serde_json::Map<String, serde_json::Value>),
    Other(serde_json::Value),
}

/// A model caller's failure. Carries only a message: the executor does not
/// interpret failure causes, only reports them.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct CallerError(pub String);

impl CallerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// The injected model caller. Implementations MAY fail by returning `Err`;
/// they SHOULD treat `timeout_sec` as an advisory upper bound and return
/// promptly once cancellation is observed (dropping the future).
#[async_trait]
pub trait ModelCaller: Send + Sync {
    async fn call(&self, candidate: &Candidate, payload: &Payload, timeout_sec: u64) -> Result<CallerReply, CallerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
    Timeout,
}

/// One candidate's dispatch outcome. `answer` is present iff `status ==
/// Success`; `error` is present iff it is not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedResult {
    pub candidate_id: String,
    pub status: Status,
    pub latency_ms: u64,
    pub payload_signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NormalizedResult {
    fn timeout(candidate_id: String, timeout_sec: u64, payload_signature: String) -> Self {
        Self {
            candidate_id,
            status: Status::Timeout,
            latency_ms: timeout_sec.saturating_mul(1000),
            payload_signature,
            answer: None,
            error: Some("request timeout".to_string()),
        }
    }

    fn synthesized_error(candidate_id: String, timeout_sec: u64, payload_signature: String, message: String) -> Self {
        Self {
            candidate_id,
            status: Status::Error,
            latency_ms: timeout_sec.saturating_mul(1000),
            payload_signature,
            answer: None,
            error: Some(message),
        }
    }
}

/// Dispatch `payload` to every candidate, preserving candidate input order in
/// the returned results regardless of completion order.
pub async fn dispatch(
    candidates: &[Candidate],
    payload: &Payload,
    timeout_sec: u64,
    max_parallel: usize,
    caller: Arc<dyn ModelCaller>,
) -> Result<Vec<NormalizedResult>, ExecutorError> {
    let signature = mb_payload::signature(payload)?;
    tracing::debug!(candidates = candidates.len(), timeout_sec, max_parallel, "dispatch starting");

    if candidates.len() == 1 {
        let result = run_single(&candidates[0], payload, timeout_sec, &signature, caller.as_ref()).await;
        tracing::info!(candidate_id = %result.candidate_id, status = ?result.status, latency_ms = result.latency_ms, "dispatch finished");
        return Ok(vec![result]);
    }

    let pool_size = max_parallel.min(candidates.len()).max(1);
    let semaphore = Arc::new(Semaphore::new(pool_size));
    let deadline = Duration::from_secs(timeout_sec.max(1));

    // Each candidate gets its own JoinHandle plus an AbortHandle kept aside so
    // a per-task timeout can cancel exactly that task without touching the
    // others. The handles are raced concurrently below via `join_all`, not
    // awaited one at a time — a sequential await-per-index loop would block
    // on whichever candidate is ordered first, silently discarding an
    // already-finished later candidate's result if an earlier one hangs past
    // the deadline.
    let mut abort_handles = Vec::with_capacity(candidates.len());
    let mut timed_calls = Vec::with_capacity(candidates.len());

    for candidate in candidates.iter().cloned() {
        let semaphore = semaphore.clone();
        let payload = payload.clone();
        let caller = caller.clone();
        let call_signature = signature.clone();
        let timeout_signature = signature.clone();
        let candidate_id = candidate.id.clone();

        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
            run_call(&candidate, &payload, timeout_sec, &call_signature, caller.as_ref()).await
        });
        abort_handles.push(handle.abort_handle());

        timed_calls.push(async move {
            match time::timeout(deadline, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => {
                    NormalizedResult::synthesized_error(candidate_id, timeout_sec, timeout_signature, join_err.to_string())
                }
                Err(_elapsed) => NormalizedResult::timeout(candidate_id, timeout_sec, timeout_signature),
            }
        });
    }

    let results: Vec<NormalizedResult> = futures::future::join_all(timed_calls).await;

    for (idx, result) in results.iter().enumerate() {
        if result.status == Status::Timeout {
            tracing::warn!(candidate_id = %result.candidate_id, timeout_sec, "candidate deadline fired, cancelling in-flight call");
            abort_handles[idx].abort();
        }
        tracing::info!(candidate_id = %result.candidate_id, status = ?result.status, latency_ms = result.latency_ms, "dispatch finished");
    }

    Ok(results)
}

async fn run_call(
    candidate: &Candidate,
    payload: &Payload,
    timeout_sec: u64,
    signature: &str,
    caller: &dyn ModelCaller,
) -> NormalizedResult {
    tracing::debug!(candidate_id = %candidate.id, "dispatch starting");
    let start = Instant::now();
    match caller.call(candidate, payload, timeout_sec).await {
        Ok(reply) => success_result(candidate, start, signature, reply),
        Err(e) => error_result(candidate, start, signature, e.0),
    }
}

async fn run_single(
    candidate: &Candidate,
    payload: &Payload,
    timeout_sec: u64,
    signature: &str,
    caller: &dyn ModelCaller,
) -> NormalizedResult {
    let deadline = Duration::from_secs(timeout_sec.max(1));
    let start = Instant::now();
    match time::timeout(deadline, caller.call(candidate, payload, timeout_sec)).await {
        Ok(Ok(reply)) => success_result(candidate, start, signature, reply),
        Ok(Err(e)) => error_result(candidate, start, signature, e.0),
        Err(_elapsed) => NormalizedResult::timeout(candidate.id.clone(), timeout_sec, signature.to_string()),
    }
}

fn success_result(candidate: &Candidate, start: Instant, signature: &str, reply: CallerReply) -> NormalizedResult {
    NormalizedResult {
        candidate_id: candidate.id.clone(),
        status: Status::Success,
        latency_ms: start.elapsed().as_millis() as u64,
        payload_signature: signature.to_string(),
        answer: Some(normalize_answer(reply)),
        error: None,
    }
}

fn error_result(candidate: &Candidate, start: Instant, signature: &str, message: String) -> NormalizedResult {
    NormalizedResult {
        candidate_id: candidate.id.clone(),
        status: Status::Error,
        latency_ms: start.elapsed().as_millis() as u64,
        payload_signature: signature.to_string(),
        answer: None,
        error: Some(message),
    }
}

/// String verbatim; mapping's first present `answer|content|text|output` key
/// coerced to string; missing key falls back to compact JSON; anything else
/// takes its string form.
fn normalize_answer(reply: CallerReply) -> String {
    match reply {
        CallerReply::Text(s) => s,
        CallerReply::Mapping(map) => {
            for key in ["answer", "content", "text", "output"] {
                if let Some(value) = map.get(key) {
                    return coerce_to_string(value);
                }
            }
            serde_json::Value::Object(map).to_string()
        }
        CallerReply::Other(value) => coerce_to_string(&value),
    }
}

fn coerce_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
