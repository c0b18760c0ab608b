use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Serialize;
use tokio::net::TcpListener;

use dsk_auth::{CookieRefresher, CredentialStore};
use dsk_protocol::{
    unix_now, ChatCompletionRequest, ErrorBody, ModelCard, ModelList, DONE_SENTINEL,
};
use dsk_providers::{ChatBackend, CompletionRequest};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::prompt::reduce;
use crate::recovery::AuthRecovery;
use crate::registry::SessionRegistry;
use crate::translate::{aggregate, translate, ChunkTranslator};

pub const CONVERSATION_HEADER: &str = "x-conversation-id";
const MODEL_OWNER: &str = "deepseek";

struct AppState {
    config: GatewayConfig,
    backend: Arc<dyn ChatBackend>,
    registry: Arc<SessionRegistry>,
    recovery: Arc<AuthRecovery>,
    start_time: Instant,
    started_at: i64,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    conversations: usize,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct RefreshResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stderr: Option<String>,
}

/// The OpenAI-compatible HTTP front end.
pub struct GatewayServer {
    config: GatewayConfig,
    backend: Arc<dyn ChatBackend>,
    registry: Arc<SessionRegistry>,
    recovery: Arc<AuthRecovery>,
}

impl GatewayServer {
    pub fn new(
        config: GatewayConfig,
        backend: Arc<dyn ChatBackend>,
        credentials: Arc<CredentialStore>,
        refresher: Arc<dyn CookieRefresher>,
    ) -> Self {
        Self {
            config,
            backend,
            registry: Arc::new(SessionRegistry::new()),
            recovery: Arc::new(AuthRecovery::new(credentials, refresher)),
        }
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    pub fn recovery(&self) -> Arc<AuthRecovery> {
        self.recovery.clone()
    }

    pub fn router(&self) -> Router {
        let state = Arc::new(AppState {
            config: self.config.clone(),
            backend: self.backend.clone(),
            registry: self.registry.clone(),
            recovery: self.recovery.clone(),
            start_time: Instant::now(),
            started_at: unix_now(),
        });
        Router::new()
            .route("/v1/models", axum::routing::get(models_handler))
            .route("/v1/chat/completions", axum::routing::post(chat_handler))
            .route("/refresh_cookies", axum::routing::post(refresh_handler))
            .route("/health", axum::routing::get(health_handler))
            .with_state(state)
    }

    pub async fn start(&self, host: &str, port: u16) -> Result<(), GatewayError> {
        let app = self.router();
        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| GatewayError::ServerError(e.to_string()))?;

        tracing::info!(backend = self.backend.name(), "Gateway listening on http://{}", addr);

        axum::serve(listener, app)
            .await
            .map_err(|e| GatewayError::ServerError(e.to_string()))?;

        Ok(())
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.start_time.elapsed().as_secs(),
        conversations: state.registry.len(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn models_handler(State(state): State<Arc<AppState>>) -> Json<ModelList> {
    let data = state
        .config
        .models
        .iter()
        .map(|id| ModelCard::new(id.as_str(), state.started_at, MODEL_OWNER))
        .collect();
    Json(ModelList::new(data))
}

async fn refresh_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.recovery.refresh_now().await {
        Ok(()) => (
            StatusCode::OK,
            Json(RefreshResponse {
                success: true,
                message: "Cookies refreshed".to_string(),
                stdout: None,
                stderr: None,
            }),
        )
            .into_response(),
        Err(err) => {
            let status = if err.is_timeout() {
                StatusCode::GATEWAY_TIMEOUT
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            let (stdout, stderr) = err.output();
            (
                status,
                Json(RefreshResponse {
                    success: false,
                    message: err.to_string(),
                    stdout: stdout.map(str::to_string),
                    stderr: stderr.map(str::to_string),
                }),
            )
                .into_response()
        }
    }
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let Json(request) = payload.map_err(|e| GatewayError::InvalidRequest(e.body_text()))?;
    let prompt = reduce(&request.messages)?;

    let model = request
        .model
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| state.config.default_model())
        .to_string();
    let conversation_id = request
        .conversation_id()
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::info!(
        conversation_id = %conversation_id,
        model = %model,
        messages = request.messages.len(),
        stream = request.stream,
        "chat completion request"
    );

    let backend = &state.backend;
    let recovery = &state.recovery;
    let turn = &recovery.begin();
    let lease = state
        .registry
        .resolve(&conversation_id, move || {
            recovery.run(turn, "create_session", move || backend.create_session())
        })
        .await?;

    let completion = CompletionRequest {
        thinking_enabled: state.config.thinking_enabled,
        search_enabled: state.config.search_enabled,
        ..CompletionRequest::new(lease.session_id(), prompt)
    }
    .with_parent(lease.parent_message_id().map(str::to_string));

    let fragments = recovery
        .run(turn, "complete", move || backend.complete(completion.clone()))
        .await?;
    let translator = ChunkTranslator::new(model);

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&conversation_id) {
        headers.insert(HeaderName::from_static(CONVERSATION_HEADER), value);
    }

    if !request.stream {
        let (response, outcome) = aggregate(fragments, translator)
            .await
            .map_err(GatewayError::Backend)?;
        if let Some(message_id) = outcome.committable_id() {
            lease.advance(message_id);
        }
        return Ok((headers, Json(response)).into_response());
    }

    let chunks = translate(fragments, translator, move |outcome| {
        if let Some(message_id) = outcome.committable_id() {
            lease.advance(message_id);
        }
    });

    let events = async_stream::stream! {
        futures::pin_mut!(chunks);
        while let Some(item) = chunks.next().await {
            match item {
                Ok(chunk) => {
                    let data = serde_json::to_string(&chunk).unwrap_or_default();
                    yield Ok::<_, Infallible>(Event::default().data(data));
                }
                Err(err) => {
                    tracing::error!(error = %err, "backend stream failed mid-response");
                    let err = GatewayError::Backend(err);
                    let body = ErrorBody::new(err.error_type(), err.to_string());
                    let data = serde_json::to_string(&body).unwrap_or_default();
                    yield Ok(Event::default().data(data));
                }
            }
        }
        yield Ok(Event::default().data(DONE_SENTINEL));
    };

    Ok((headers, Sse::new(events).keep_alive(KeepAlive::default())).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBackend, MockRefresher};

    async fn start_test_server(backend: MockBackend) -> String {
        let server = GatewayServer::new(
            GatewayConfig::default(),
            Arc::new(backend),
            Arc::new(CredentialStore::new("tok")),
            Arc::new(MockRefresher::succeeding()),
        );
        let app = server.router();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://127.0.0.1:{}", addr.port())
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let url = start_test_server(MockBackend::new(&["hi"])).await;

        let resp = reqwest::get(format!("{}/health", url)).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["conversations"], 0);
        assert!(body["uptime_secs"].is_u64());
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_models_endpoint() {
        let url = start_test_server(MockBackend::new(&["hi"])).await;

        let body: serde_json::Value = reqwest::get(format!("{}/v1/models", url))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["object"], "list");
        assert_eq!(body["data"][0]["id"], "deepseek-chat");
        assert_eq!(body["data"][0]["object"], "model");
        assert_eq!(body["data"][0]["owned_by"], "deepseek");
        assert!(body["data"][0]["created"].is_i64());
    }

    #[tokio::test]
    async fn test_malformed_json_is_structured_400() {
        let url = start_test_server(MockBackend::new(&["hi"])).await;

        let resp = reqwest::Client::new()
            .post(format!("{}/v1/chat/completions", url))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["type"], "invalid_request_error");
        assert!(body["error"]["param"].is_null());
    }

    #[tokio::test]
    async fn test_unknown_role_is_rejected() {
        let url = start_test_server(MockBackend::new(&["hi"])).await;

        let resp = reqwest::Client::new()
            .post(format!("{}/v1/chat/completions", url))
            .json(&serde_json::json!({
                "messages": [{"role": "tool", "content": "x"}]
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }
}
