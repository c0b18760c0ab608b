//! HTTP client for the cookie-authenticated chat backend.

use async_trait::async_trait;
use dsk_auth::CredentialStore;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::classify::{classify_envelope, classify_status, parse_envelope};
use crate::traits::{BackendResult, FragmentStream};
use crate::{BackendConfig, BackendError, ChatBackend, CompletionRequest, RawFragment, SessionId};

const CREATE_SESSION_PATH: &str = "/api/v0/chat_session/create";
const COMPLETION_PATH: &str = "/api/v0/chat/completion";
const DONE_MARKER: &str = "[DONE]";

/// Backend client. Credentials are read from the shared store on every
/// request so an in-place cookie refresh applies to the next call.
pub struct DeepSeekClient {
    client: Client,
    config: BackendConfig,
    credentials: Arc<CredentialStore>,
}

impl DeepSeekClient {
    pub fn new(config: BackendConfig, credentials: Arc<CredentialStore>) -> BackendResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BackendError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            config,
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url_trimmed(), path)
    }

    async fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let auth = self.credentials.request_auth().await;
        let user_agent = auth
            .user_agent
            .unwrap_or_else(|| self.config.default_user_agent.clone());

        let builder = builder
            .bearer_auth(&auth.bearer)
            .header(USER_AGENT, user_agent)
            .header("x-client-platform", "web");

        match auth.cookie {
            Some(cookie) => builder.header(COOKIE, cookie),
            None => builder,
        }
    }

    /// Turn a non-success response into a classified error.
    async fn check_status(response: Response) -> BackendResult<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }

    fn is_event_stream(response: &Response) -> bool {
        response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"))
    }

    fn fragments(response: Response) -> FragmentStream {
        let stream = async_stream::stream! {
            let mut events = response.bytes_stream().eventsource();
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(BackendError::StreamError(e.to_string()));
                        return;
                    }
                };

                let data = event.data.trim();
                if data.is_empty() {
                    continue;
                }
                if data == DONE_MARKER {
                    yield Ok(RawFragment::terminal("stop"));
                    return;
                }

                match parse_frame(data) {
                    Ok(Some(fragment)) => {
                        let terminal = fragment.is_terminal();
                        yield Ok(fragment);
                        if terminal {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(BackendError::MalformedFragment(reason)) => {
                        tracing::warn!(%reason, "skipping malformed backend fragment");
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        };

        Box::pin(stream)
    }
}

#[async_trait]
impl ChatBackend for DeepSeekClient {
    async fn create_session(&self) -> BackendResult<SessionId> {
        let request = self
            .client
            .post(self.url(CREATE_SESSION_PATH))
            .json(&CreateSessionBody { character_id: None });
        let response = self.authorized(request).await.send().await?;
        let response = Self::check_status(response).await?;

        let body = response.text().await?;
        let envelope: Envelope = serde_json::from_str(&body)
            .map_err(|e| BackendError::InvalidResponse(format!("session envelope: {}", e)))?;
        if envelope.code != 0 {
            return Err(classify_envelope(envelope.code, &envelope.msg));
        }

        let id = envelope.session_id().ok_or_else(|| {
            BackendError::InvalidResponse("session envelope carried no session id".to_string())
        })?;
        tracing::debug!(session_id = %id, "created backend chat session");
        Ok(id)
    }

    async fn complete(&self, request: CompletionRequest) -> BackendResult<FragmentStream> {
        let body = CompletionBody {
            chat_session_id: &request.session_id,
            parent_message_id: request.parent_message_id.as_deref(),
            prompt: &request.prompt,
            ref_file_ids: Vec::new(),
            thinking_enabled: request.thinking_enabled,
            search_enabled: request.search_enabled,
        };
        let builder = self
            .client
            .post(self.url(COMPLETION_PATH))
            .header(ACCEPT, "text/event-stream")
            .json(&body);
        let response = self.authorized(builder).await.send().await?;
        let response = Self::check_status(response).await?;

        if !Self::is_event_stream(&response) {
            // Errors arrive as a JSON envelope with status 200.
            let text = response.text().await?;
            return Err(match parse_envelope(&text) {
                Some((code, message)) if code != 0 => classify_envelope(code, &message),
                _ => BackendError::InvalidResponse(format!(
                    "expected an event stream, got: {}",
                    text.chars().take(200).collect::<String>()
                )),
            });
        }

        Ok(Self::fragments(response))
    }

    fn name(&self) -> &str {
        "deepseek"
    }
}

/// Parse one `data:` payload.
///
/// Returns `Ok(None)` for frames with neither choices nor a message id,
/// `MalformedFragment` for unparseable JSON, and a classified error for an
/// error envelope.
fn parse_frame(data: &str) -> BackendResult<Option<RawFragment>> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| BackendError::MalformedFragment(format!("{}: {}", e, data)))?;

    if let Some(code) = value.get("code").and_then(Value::as_i64) {
        if code != 0 {
            let message = value
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Err(classify_envelope(code, message));
        }
    }

    let frame: StreamFrame = serde_json::from_value(value)
        .map_err(|e| BackendError::MalformedFragment(format!("{}: {}", e, data)))?;

    let raw_id = frame
        .message_id
        .as_ref()
        .or(frame.response_message_id.as_ref())
        .and_then(id_string);
    let Some(choice) = frame.choices.into_iter().next() else {
        return Ok(raw_id.map(|id| RawFragment {
            raw_created_at: frame.created,
            ..RawFragment::default().with_id(id)
        }));
    };

    let content = match choice.delta {
        Some(FrameDelta {
            content: Some(content),
            kind,
        }) if kind.as_deref() != Some("thinking") => content,
        _ => String::new(),
    };

    Ok(Some(RawFragment {
        content,
        finish_reason: choice.finish_reason,
        raw_id,
        raw_created_at: frame.created,
    }))
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// API request/response types
#[derive(Debug, Serialize)]
struct CreateSessionBody {
    character_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    chat_session_id: &'a str,
    parent_message_id: Option<&'a str>,
    prompt: &'a str,
    ref_file_ids: Vec<String>,
    thinking_enabled: bool,
    search_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<EnvelopeData>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    #[serde(default)]
    biz_data: Option<Value>,
}

impl Envelope {
    fn session_id(&self) -> Option<String> {
        let biz = self.data.as_ref()?.biz_data.as_ref()?;
        biz.get("id")
            .or_else(|| biz.get("chat_session").and_then(|s| s.get("id")))
            .and_then(id_string)
    }
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(default)]
    created: Option<i64>,
    #[serde(default)]
    message_id: Option<Value>,
    #[serde(default)]
    response_message_id: Option<Value>,
    #[serde(default)]
    choices: Vec<FrameChoice>,
}

#[derive(Debug, Deserialize)]
struct FrameChoice {
    #[serde(default)]
    delta: Option<FrameDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FrameDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}
