//! HTTP surface: run-debate and quota-status endpoints.
//!
//! `POST /api/debate` admits the request against the quota ledger,
//! then runs the debate either buffered (one JSON document, plain
//! HTTP error statuses) or streaming (newline-delimited JSON progress
//! events; failures after the stream starts become terminal `error`
//! events). `GET /api/quota` reports per-model standing and consumes
//! nothing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use adjudication::events::ChannelSink;
use adjudication::protocol::types::{Side, Turn};
use adjudication::providers::{ApiKeys, ClientSet, ModelKey, DEFAULT_CALL_TIMEOUT};
use adjudication::quota::{required_units, AuditLog, AuditOutcome, AuditRecord};
use adjudication::{
    AdmissionGate, DebateEngine, DebateError, DebateRequest, NullSink, ProgressEvent,
    ProgressSink,
};

#[derive(Clone)]
pub struct AppState {
    pub clients: Arc<ClientSet>,
    pub gate: Arc<AdmissionGate>,
    pub audit: Arc<dyn AuditLog>,
    pub debate_timeout: Duration,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/debate", post(run_debate))
        .route("/api/quota", get(quota_status))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct RunDebateBody {
    pub claim: String,
    /// Clients may also spell this field `turns`.
    #[serde(alias = "turns")]
    pub rounds: u32,
    pub pro_model: ModelKey,
    pub con_model: ModelKey,
    pub judge_model: ModelKey,
    #[serde(default)]
    pub first_speaker: Option<Side>,
    #[serde(default)]
    pub stream: bool,
    /// Caller-supplied provider keys. When present, the caller pays
    /// their own way and the quota ledger is bypassed.
    #[serde(default)]
    pub user_api_keys: Option<ApiKeys>,
}

impl RunDebateBody {
    fn into_request(self) -> (DebateRequest, bool, Option<ApiKeys>) {
        let request = DebateRequest {
            claim: self.claim,
            rounds: self.rounds,
            pro_model: self.pro_model,
            con_model: self.con_model,
            judge_model: self.judge_model,
            first_speaker: self.first_speaker.unwrap_or(Side::Pro),
        };
        (request, self.stream, self.user_api_keys)
    }
}

/// Caller identity: first hop of `x-forwarded-for` when present,
/// otherwise the peer address.
fn identity_from(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| peer.ip().to_string())
}

fn error_response(err: &DebateError, transcript: &[Turn]) -> Response {
    let status = StatusCode::from_u16(err.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut body = json!({
        "error": { "kind": err.kind(), "message": err.to_string() },
        "transcript": transcript,
    });
    if let DebateError::QuotaExceeded {
        model,
        tier,
        reset_at,
    } = err
    {
        body["error"]["model"] = json!(model);
        body["error"]["tier"] = json!(tier);
        body["error"]["reset_at"] = json!(reset_at);
    }
    (status, Json(body)).into_response()
}

fn ndjson_line(event: &ProgressEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(line) => Some(format!("{line}\n")),
        Err(err) => {
            warn!(%err, "unserializable progress event dropped");
            None
        }
    }
}

/// Aborts the debate task when the response stream is dropped, so a
/// caller disconnect stops further provider calls.
struct AbortOnDrop(tokio::task::AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn append_audit(
    audit: &dyn AuditLog,
    identity: &str,
    request: &DebateRequest,
    outcome: AuditOutcome,
) {
    let record = AuditRecord {
        at: Utc::now(),
        identity: identity.to_string(),
        claim: request.claim.clone(),
        models: vec![request.pro_model, request.con_model, request.judge_model],
        outcome,
    };
    if let Err(err) = audit.append(&record).await {
        warn!(%err, "audit append failed");
    }
}

async fn run_debate(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<RunDebateBody>,
) -> Response {
    let identity = identity_from(&headers, peer);
    let (request, stream, user_keys) = body.into_request();

    if let Err(err) = request.validate() {
        return error_response(&err, &[]);
    }

    // Callers with their own keys pay their own way; everyone else
    // goes through the admission gate.
    let clients = match user_keys {
        Some(keys) if keys.any_present() => {
            match ClientSet::from_keys(&keys, DEFAULT_CALL_TIMEOUT) {
                Ok(set) => {
                    append_audit(&*state.audit, &identity, &request, AuditOutcome::UserKeys)
                        .await;
                    Arc::new(set)
                }
                Err(err) => return error_response(&DebateError::Provider(err), &[]),
            }
        }
        _ => {
            match state.gate.admit(&identity, &request).await {
                Ok(ticket) => {
                    append_audit(
                        &*state.audit,
                        &identity,
                        &request,
                        AuditOutcome::Admitted {
                            total_units: ticket.total_units(),
                        },
                    )
                    .await;
                }
                Err(err) => {
                    if let DebateError::QuotaExceeded {
                        model,
                        tier,
                        reset_at,
                    } = &err
                    {
                        append_audit(
                            &*state.audit,
                            &identity,
                            &request,
                            AuditOutcome::Rejected {
                                model: *model,
                                tier: *tier,
                                reset_at: *reset_at,
                            },
                        )
                        .await;
                    }
                    return error_response(&err, &[]);
                }
            }
            Arc::clone(&state.clients)
        }
    };

    info!(
        identity,
        rounds = request.rounds,
        total_units = required_units(&request).values().sum::<u32>(),
        stream,
        "debate admitted"
    );

    if stream {
        run_streaming(clients, request, state.debate_timeout)
    } else {
        run_buffered(clients, request, state.debate_timeout).await
    }
}

fn run_streaming(
    clients: Arc<ClientSet>,
    request: DebateRequest,
    debate_timeout: Duration,
) -> Response {
    let (sink, rx) = ChannelSink::new();
    let sink = Arc::new(sink);
    let engine = DebateEngine::new(clients, sink.clone() as Arc<dyn ProgressSink>);

    let task = tokio::spawn(async move {
        // Engine failures already produced a terminal error event;
        // only a timeout needs one synthesized here.
        if tokio::time::timeout(debate_timeout, engine.run(&request))
            .await
            .is_err()
        {
            sink.emit(ProgressEvent::Error {
                kind: "timeout".into(),
                message: format!("debate exceeded {}s", debate_timeout.as_secs()),
                status: 500,
                transcript: Vec::new(),
            });
        }
    });

    // The guard lives inside the stream: dropping the response body
    // aborts the debate task.
    let guard = AbortOnDrop(task.abort_handle());
    let stream = UnboundedReceiverStream::new(rx).filter_map(move |event| {
        let _keep = &guard;
        ndjson_line(&event).map(Ok::<String, std::convert::Infallible>)
    });
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn run_buffered(
    clients: Arc<ClientSet>,
    request: DebateRequest,
    debate_timeout: Duration,
) -> Response {
    // The buffered response is built from the returned record; the
    // events themselves have no consumer here.
    let engine = DebateEngine::new(clients, Arc::new(NullSink) as Arc<dyn ProgressSink>);

    match tokio::time::timeout(debate_timeout, engine.run(&request)).await {
        Ok(Ok(record)) => Json(record).into_response(),
        Ok(Err(failure)) => error_response(&failure.error, failure.transcript.turns()),
        Err(_) => error_response(
            &DebateError::Internal(anyhow::anyhow!(
                "debate exceeded {}s",
                debate_timeout.as_secs()
            )),
            &[],
        ),
    }
}

async fn quota_status(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let identity = identity_from(&headers, peer);
    match state.gate.ledger().status(&identity).await {
        Ok(models) => Json(json!({ "identity": identity, "models": models })).into_response(),
        Err(err) => error_response(&DebateError::Store(err), &[]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "203.0.113.9:4242".parse().unwrap()
    }

    #[test]
    fn identity_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "198.51.100.7, 10.0.0.1".parse().unwrap(),
        );
        assert_eq!(identity_from(&headers, peer()), "198.51.100.7");
    }

    #[test]
    fn identity_falls_back_to_peer_address() {
        assert_eq!(identity_from(&HeaderMap::new(), peer()), "203.0.113.9");

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "  ".parse().unwrap());
        assert_eq!(identity_from(&headers, peer()), "203.0.113.9");
    }

    #[test]
    fn body_defaults() {
        let json = r#"{
            "claim": "c",
            "rounds": 2,
            "pro_model": "claude",
            "con_model": "gpt4",
            "judge_model": "gemini"
        }"#;
        let body: RunDebateBody = serde_json::from_str(json).unwrap();
        let (request, stream, keys) = body.into_request();
        assert_eq!(request.first_speaker, Side::Pro);
        assert!(!stream);
        assert!(keys.is_none());
    }

    #[test]
    fn con_first_and_stream_parse() {
        let json = r#"{
            "claim": "c",
            "rounds": 1,
            "pro_model": "claude",
            "con_model": "grok",
            "judge_model": "gemini",
            "first_speaker": "con",
            "stream": true
        }"#;
        let body: RunDebateBody = serde_json::from_str(json).unwrap();
        let (request, stream, _) = body.into_request();
        assert_eq!(request.first_speaker, Side::Con);
        assert!(stream);
    }

    #[test]
    fn quota_error_body_carries_details() {
        let err = DebateError::QuotaExceeded {
            model: ModelKey::Gpt4,
            tier: adjudication::QuotaTier::Global,
            reset_at: Utc::now(),
        };
        let response = error_response(&err, &[]);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn ndjson_lines_end_with_newline() {
        let line = ndjson_line(&ProgressEvent::TotalSteps { total: 5 }).unwrap();
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["type"], "total_steps");
    }

    #[test]
    fn body_accepts_turns_spelling_for_rounds() {
        let json = r#"{
            "claim": "c",
            "turns": 3,
            "pro_model": "claude",
            "con_model": "gpt4",
            "judge_model": "gemini"
        }"#;
        let body: RunDebateBody = serde_json::from_str(json).unwrap();
        assert_eq!(body.rounds, 3);
    }

    #[tokio::test]
    async fn dropping_the_stream_aborts_the_debate_task() {
        let (sink, rx) = ChannelSink::new();
        let task = tokio::spawn(async move {
            loop {
                sink.emit(ProgressEvent::TotalSteps { total: 1 });
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });
        let guard = AbortOnDrop(task.abort_handle());
        let stream = UnboundedReceiverStream::new(rx).filter_map(move |event| {
            let _keep = &guard;
            ndjson_line(&event)
        });

        drop(stream);
        let err = task.await.unwrap_err();
        assert!(err.is_cancelled());
    }

    // ── scripted end-to-end transport tests ──────────────────────────

    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use adjudication::providers::{ModelClient, ProviderError};

    struct ScriptedClient {
        responses: Mutex<VecDeque<String>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            })
        }
    }

    #[async_trait::async_trait]
    impl ModelClient for ScriptedClient {
        fn model_id(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            _system_prompt: &str,
            _user_prompt: &str,
            _max_tokens: u32,
        ) -> Result<String, ProviderError> {
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default())
        }
    }

    const ARGUMENT: &str = r#"{"url": "https://example.com", "quote": "q", "context": "c", "argument": "a"}"#;
    const VERDICT: &str = r#"{"verdict": "supported", "explanation": "e"}"#;

    fn scripted_clients(pro: Vec<&str>, con: Vec<&str>, judge: Vec<&str>) -> Arc<ClientSet> {
        let mut clients: HashMap<ModelKey, Arc<dyn ModelClient>> = HashMap::new();
        clients.insert(ModelKey::Claude, ScriptedClient::new(pro));
        clients.insert(ModelKey::Gpt4, ScriptedClient::new(con));
        clients.insert(ModelKey::Gemini, ScriptedClient::new(judge));
        Arc::new(ClientSet::from_clients(clients))
    }

    fn one_round_request() -> DebateRequest {
        DebateRequest {
            claim: "c".into(),
            rounds: 1,
            pro_model: ModelKey::Claude,
            con_model: ModelKey::Gpt4,
            judge_model: ModelKey::Gemini,
            first_speaker: Side::Pro,
        }
    }

    #[tokio::test]
    async fn buffered_success_returns_the_record() {
        let clients = scripted_clients(vec![ARGUMENT], vec![ARGUMENT], vec![VERDICT]);
        let response =
            run_buffered(clients, one_round_request(), Duration::from_secs(5)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let record: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(record["verdict"]["label"], "supported");
        assert_eq!(record["transcript"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn buffered_failure_maps_status_and_keeps_partial_transcript() {
        // Con never produces JSON, so the debate dies after the retry
        // with pro's turn already on the record.
        let clients = scripted_clients(
            vec![ARGUMENT],
            vec!["not json", "still not json"],
            vec![VERDICT],
        );
        let response =
            run_buffered(clients, one_round_request(), Duration::from_secs(5)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["kind"], "parse");
        assert_eq!(body["transcript"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn streaming_body_is_ndjson_ending_in_complete() {
        let clients = scripted_clients(vec![ARGUMENT], vec![ARGUMENT], vec![VERDICT]);
        let response = run_streaming(clients, one_round_request(), Duration::from_secs(5));
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/x-ndjson"
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let events: Vec<serde_json::Value> = std::str::from_utf8(&bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(events.first().unwrap()["type"], "init");
        assert_eq!(events.last().unwrap()["type"], "complete");
        assert_eq!(
            events.iter().filter(|e| e["type"] == "turn").count(),
            2
        );
    }
}
