//! Axum-based webhook gateway.
//!
//! Receives provider webhooks, gates them on the shared service token,
//! and hands triggering deliveries to a background task so the caller
//! always gets a fast, uniform acknowledgment. All downstream outcomes
//! (fetch, review, comment, failure) are observable only through logs,
//! keyed by a per-delivery UUID.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::Value;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::llm::CompletionClient;
use crate::providers::{
    BitbucketClient, BitbucketEventHandler, EventHandler, GitLabClient, GitLabEventHandler,
};
use crate::review::CodeReviewer;

/// Maximum webhook body size (1 MiB). Merge request payloads are small;
/// anything larger is not a webhook.
pub const MAX_BODY_SIZE: usize = 1_048_576;
/// Request timeout for the inbound side. The review itself runs in the
/// background and is not bounded by this.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Shared gateway state: the token gate plus one handler per configured
/// provider. A provider without credentials stays `None` and its route
/// answers 404.
#[derive(Clone)]
pub struct AppState {
    service_token: String,
    gitlab: Option<Arc<dyn EventHandler>>,
    bitbucket: Option<Arc<dyn EventHandler>>,
}

impl AppState {
    /// Wire the handlers from configuration: one completion client and
    /// reviewer shared across providers, one REST client per provider.
    pub fn from_config(config: &Config) -> Result<Self> {
        let completion = CompletionClient::new(
            config.openai_api_url.clone(),
            config.openai_api_key.clone(),
            config.model.clone(),
        )?;
        let reviewer = CodeReviewer::new(completion);

        let gitlab = match config.gitlab {
            Some(ref gitlab) => {
                let client = GitLabClient::new(&gitlab.api_url, &gitlab.access_token)?;
                Some(Arc::new(GitLabEventHandler::new(
                    client,
                    reviewer.clone(),
                    gitlab.review_mode,
                )) as Arc<dyn EventHandler>)
            }
            None => None,
        };

        let bitbucket = match config.bitbucket {
            Some(ref bitbucket) => {
                let client = BitbucketClient::new(&bitbucket.api_url, &bitbucket.access_token)?;
                Some(Arc::new(BitbucketEventHandler::new(client, reviewer.clone()))
                    as Arc<dyn EventHandler>)
            }
            None => None,
        };

        Ok(Self {
            service_token: config.service_token.clone(),
            gitlab,
            bitbucket,
        })
    }
}

/// Run the webhook gateway until the process is stopped.
pub async fn run_gateway(host: &str, port: u16, config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let state = AppState::from_config(&config)?;
    tracing::info!(
        %addr,
        gitlab = state.gitlab.is_some(),
        bitbucket = state.bitbucket.is_some(),
        "code review gateway listening"
    );

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/code-review/gitlab", post(handle_gitlab_webhook))
        .route("/code-review/bitbucket", post(handle_bitbucket_webhook))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ));

    axum::serve(listener, app).await?;

    Ok(())
}

async fn handle_health() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

#[derive(Debug, Deserialize)]
struct ServiceTokenQuery {
    service_token: Option<String>,
}

async fn handle_gitlab_webhook(
    State(state): State<AppState>,
    Query(query): Query<ServiceTokenQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    accept_delivery(state.gitlab.clone(), &state.service_token, query, &headers, &body)
}

async fn handle_bitbucket_webhook(
    State(state): State<AppState>,
    Query(query): Query<ServiceTokenQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    accept_delivery(
        state.bitbucket.clone(),
        &state.service_token,
        query,
        &headers,
        &body,
    )
}

/// Shared webhook intake: token gate, provider availability, JSON decode,
/// trigger check, background dispatch. Everything past the dispatch is
/// fire-and-forget; the caller always sees the uniform acknowledgment.
fn accept_delivery(
    handler: Option<Arc<dyn EventHandler>>,
    service_token: &str,
    query: ServiceTokenQuery,
    headers: &HeaderMap,
    body: &Bytes,
) -> (StatusCode, Json<Value>) {
    if query.service_token.as_deref() != Some(service_token) {
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"error": "Invalid service token"})),
        );
    }

    let Some(handler) = handler else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Provider not configured"})),
        );
    };

    let Ok(payload) = serde_json::from_slice::<Value>(body) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Invalid JSON payload"})),
        );
    };

    if handler.should_trigger(headers, &payload) {
        dispatch(handler, payload);
    }

    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

/// Run one delivery in the background. The task owns its payload; its
/// failure is logged and dropped, never unwound into the server. The
/// whole future runs inside a `delivery` span so every log event down in
/// the handler carries the delivery id and provider.
fn dispatch(handler: Arc<dyn EventHandler>, payload: Value) {
    let delivery_id = Uuid::new_v4();
    let span = tracing::info_span!("delivery", %delivery_id, provider = handler.provider());

    tokio::spawn(
        async move {
            tracing::info!("delivery accepted");
            match handler.handle_event(&payload).await {
                Ok(()) => tracing::info!("delivery handled"),
                Err(e) => tracing::error!("delivery failed: {e:#}"),
            }
        }
        .instrument(span),
    );
}

// ══════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReviewMode;
    use axum::http::HeaderValue;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn state_with_gitlab(gitlab_url: &str, completion_url: &str) -> AppState {
        let client = GitLabClient::new(gitlab_url, "test-token").unwrap();
        let reviewer = CodeReviewer::new(
            CompletionClient::new(completion_url, "test-key", "gpt-test").unwrap(),
        );
        AppState {
            service_token: "secret".into(),
            gitlab: Some(Arc::new(GitLabEventHandler::new(
                client,
                reviewer,
                ReviewMode::Batch,
            ))),
            bitbucket: None,
        }
    }

    fn offline_state() -> AppState {
        state_with_gitlab("http://127.0.0.1:9", "http://127.0.0.1:9")
    }

    fn token(value: Option<&str>) -> ServiceTokenQuery {
        ServiceTokenQuery {
            service_token: value.map(str::to_owned),
        }
    }

    fn mr_open_payload() -> Value {
        json!({
            "project": {"id": 42},
            "object_attributes": {"iid": 7, "action": "open"}
        })
    }

    fn mr_hook_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-gitlab-event", HeaderValue::from_static("Merge Request Hook"));
        headers
    }

    fn body_of(payload: &Value) -> Bytes {
        Bytes::from(serde_json::to_vec(payload).unwrap())
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, Json(body)) = handle_health().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn wrong_service_token_is_forbidden() {
        let state = offline_state();
        let (status, _) = handle_gitlab_webhook(
            State(state),
            Query(token(Some("wrong"))),
            mr_hook_headers(),
            body_of(&mr_open_payload()),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn missing_service_token_is_forbidden() {
        let state = offline_state();
        let (status, _) = handle_gitlab_webhook(
            State(state),
            Query(token(None)),
            mr_hook_headers(),
            body_of(&mr_open_payload()),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unconfigured_provider_is_not_found() {
        let state = offline_state();
        let (status, _) = handle_bitbucket_webhook(
            State(state),
            Query(token(Some("secret"))),
            HeaderMap::new(),
            Bytes::from_static(b"{}"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn undecodable_body_is_bad_request() {
        let state = offline_state();
        let (status, _) = handle_gitlab_webhook(
            State(state),
            Query(token(Some("secret"))),
            mr_hook_headers(),
            Bytes::from_static(b"not json"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn non_triggering_delivery_is_acknowledged_without_dispatch() {
        let gitlab = MockServer::start().await;
        let completion = MockServer::start().await;
        // Any fetch would show up here; expect none.
        Mock::given(method("GET"))
            .and(path("/projects/42/merge_requests/7/diffs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(0)
            .mount(&gitlab)
            .await;

        let state = state_with_gitlab(&gitlab.uri(), &completion.uri());
        let payload = json!({
            "project": {"id": 42},
            "object_attributes": {"iid": 7, "action": "close"}
        });
        let (status, Json(body)) = handle_gitlab_webhook(
            State(state),
            Query(token(Some("secret"))),
            mr_hook_headers(),
            body_of(&payload),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn missing_event_header_is_acknowledged_without_dispatch() {
        let state = offline_state();
        let (status, Json(body)) = handle_gitlab_webhook(
            State(state),
            Query(token(Some("secret"))),
            HeaderMap::new(),
            body_of(&mr_open_payload()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn triggering_delivery_acks_immediately_and_reviews_in_background() {
        let gitlab = MockServer::start().await;
        let completion = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/projects/42/merge_requests/7/diffs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"new_path": "src/a.rs", "diff": "+fn a() {}"}
            ])))
            .mount(&gitlab)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant",
                    "content": r#"{"should_comment": false, "issues": "", "suggestions": ""}"#}}]
            })))
            .mount(&completion)
            .await;

        let state = state_with_gitlab(&gitlab.uri(), &completion.uri());
        let (status, Json(body)) = handle_gitlab_webhook(
            State(state),
            Query(token(Some("secret"))),
            mr_hook_headers(),
            body_of(&mr_open_payload()),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok"}));

        // The review runs on a spawned task; wait for the completion call
        // to land rather than for the response.
        for _ in 0..100 {
            if !completion.received_requests().await.unwrap().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("background delivery never reached the completion service");
    }

    #[tokio::test]
    async fn failing_background_delivery_does_not_propagate() {
        // Fetch will fail (nothing listens on the port); the ack must
        // still be immediate and OK.
        let state = offline_state();
        let (status, _) = handle_gitlab_webhook(
            State(state),
            Query(token(Some("secret"))),
            mr_hook_headers(),
            body_of(&mr_open_payload()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    /// Collects formatted log output so tests can assert on it.
    #[derive(Clone, Default)]
    struct CaptureWriter(Arc<std::sync::Mutex<Vec<u8>>>);

    impl CaptureWriter {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CaptureWriter {
        type Writer = CaptureWriter;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn handler_stage_logs_carry_the_delivery_id() {
        let gitlab = MockServer::start().await;
        let completion = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/projects/42/merge_requests/7/diffs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"new_path": "src/a.rs", "diff": "+fn a() {}"}
            ])))
            .mount(&gitlab)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant",
                    "content": r#"{"should_comment": false, "issues": "", "suggestions": ""}"#}}]
            })))
            .mount(&completion)
            .await;

        let logs = CaptureWriter::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let client = GitLabClient::new(gitlab.uri(), "test-token").unwrap();
        let reviewer = CodeReviewer::new(
            CompletionClient::new(completion.uri(), "test-key", "gpt-test").unwrap(),
        );
        let handler: Arc<dyn EventHandler> =
            Arc::new(GitLabEventHandler::new(client, reviewer, ReviewMode::Batch));
        dispatch(handler, mr_open_payload());

        for _ in 0..100 {
            if logs.contents().contains("delivery handled") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let output = logs.contents();
        // The stage log is emitted deep inside the handler; the span on
        // the spawned future must have attached the delivery fields.
        let fetched = output
            .lines()
            .find(|line| line.contains("fetched merge request changes"))
            .expect("stage log never emitted");
        assert!(fetched.contains("delivery_id="));
        assert!(fetched.contains("gitlab"));
    }

    #[test]
    fn state_from_config_respects_configured_providers() {
        let config = Config {
            service_token: "secret".into(),
            openai_api_key: "sk-test".into(),
            openai_api_url: "https://api.openai.com/v1".into(),
            model: "gpt-test".into(),
            gitlab: Some(crate::config::GitLabConfig {
                api_url: "https://gitlab.example.com/api/v4".into(),
                access_token: "glpat-test".into(),
                review_mode: ReviewMode::Batch,
            }),
            bitbucket: None,
        };

        let state = AppState::from_config(&config).unwrap();
        assert!(state.gitlab.is_some());
        assert!(state.bitbucket.is_none());
        assert_eq!(state.service_token, "secret");
    }
}
