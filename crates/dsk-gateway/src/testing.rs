//! In-process doubles for the backend and the cookie refresher.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dsk_auth::{CookieArtifact, CookieRefresher, RefreshError, REQUIRED_COOKIE};
use dsk_providers::{
    BackendError, BackendResult, ChatBackend, CompletionRequest, FragmentStream, RawFragment,
    SessionId,
};
use futures::{stream, StreamExt};

/// Scripted backend.
///
/// Sessions are named `session-<n>`; every completion streams the configured
/// text pieces followed by a terminal fragment, all carrying the message id
/// `msg-<n>`. Queued errors are single-use, like the real failures they
/// stand in for.
pub struct MockBackend {
    pieces: Vec<String>,
    create_delay: Option<Duration>,
    create_errors: Mutex<VecDeque<BackendError>>,
    complete_errors: Mutex<VecDeque<BackendError>>,
    mid_stream_error: Option<String>,
    fragment_delay: Option<Duration>,
    create_count: AtomicUsize,
    complete_count: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockBackend {
    pub fn new(pieces: &[&str]) -> Self {
        Self {
            pieces: pieces.iter().map(|p| p.to_string()).collect(),
            create_delay: None,
            create_errors: Mutex::new(VecDeque::new()),
            complete_errors: Mutex::new(VecDeque::new()),
            mid_stream_error: None,
            fragment_delay: None,
            create_count: AtomicUsize::new(0),
            complete_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    /// Queue an error for the next `create_session` call.
    pub fn with_create_error(self, error: BackendError) -> Self {
        self.create_errors.lock().unwrap().push_back(error);
        self
    }

    /// Queue an error for the next `complete` call.
    pub fn with_complete_error(self, error: BackendError) -> Self {
        self.complete_errors.lock().unwrap().push_back(error);
        self
    }

    /// Replace the terminal fragment with a stream error.
    pub fn with_mid_stream_error(mut self, message: &str) -> Self {
        self.mid_stream_error = Some(message.to_string());
        self
    }

    /// Pause before yielding each fragment.
    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = Some(delay);
        self
    }

    pub fn create_count(&self) -> usize {
        self.create_count.load(Ordering::SeqCst)
    }

    pub fn complete_count(&self) -> usize {
        self.complete_count.load(Ordering::SeqCst)
    }

    /// Every completion request received, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn create_session(&self) -> BackendResult<SessionId> {
        let n = self.create_count.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.create_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(format!("session-{}", n))
    }

    async fn complete(&self, request: CompletionRequest) -> BackendResult<FragmentStream> {
        let n = self.complete_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request);

        if let Some(err) = self.complete_errors.lock().unwrap().pop_front() {
            return Err(err);
        }

        let message_id = format!("msg-{}", n);
        let mut items: Vec<BackendResult<RawFragment>> = self
            .pieces
            .iter()
            .map(|piece| Ok(RawFragment::text(piece.as_str()).with_id(message_id.as_str())))
            .collect();
        items.push(match &self.mid_stream_error {
            Some(message) => Err(BackendError::StreamError(message.clone())),
            None => Ok(RawFragment::terminal("stop").with_id(message_id)),
        });

        match self.fragment_delay {
            Some(delay) => Ok(Box::pin(stream::iter(items).then(move |item| async move {
                tokio::time::sleep(delay).await;
                item
            }))),
            None => Ok(Box::pin(stream::iter(items))),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Refresher returning a fixed outcome.
pub struct MockRefresher {
    failure: Option<RefreshError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockRefresher {
    pub fn succeeding() -> Self {
        Self {
            failure: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: RefreshError) -> Self {
        Self {
            failure: Some(error),
            ..Self::succeeding()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CookieRefresher for MockRefresher {
    async fn refresh(&self) -> Result<CookieArtifact, RefreshError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }

        let mut cookies = BTreeMap::new();
        cookies.insert(REQUIRED_COOKIE.to_string(), format!("refreshed-{}", n));
        Ok(CookieArtifact {
            cookies,
            user_agent: "MockAgent/1.0".to_string(),
        })
    }
}
