use crate::CookieArtifact;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;

/// Process-wide backend credentials: a fixed bearer token plus a cookie
/// artifact that is replaced in place whenever a refresh succeeds.
pub struct CredentialStore {
    token: SecretString,
    state: RwLock<CookieState>,
}

#[derive(Default)]
struct CookieState {
    cookies: Option<CookieArtifact>,
    generation: u64,
}

/// Header material for a single outbound request.
#[derive(Clone, PartialEq, Eq)]
pub struct RequestAuth {
    pub bearer: String,
    pub cookie: Option<String>,
    pub user_agent: Option<String>,
}

impl std::fmt::Debug for RequestAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestAuth")
            .field("bearer", &"[REDACTED]")
            .field("cookie", &self.cookie.as_ref().map(|_| "[REDACTED]"))
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            state: RwLock::new(CookieState::default()),
        }
    }

    /// Seed the store with an artifact loaded at startup. Does not bump the
    /// generation.
    pub fn with_cookies(self, cookies: CookieArtifact) -> Self {
        Self {
            state: RwLock::new(CookieState {
                cookies: Some(cookies),
                generation: 0,
            }),
            ..self
        }
    }

    pub async fn request_auth(&self) -> RequestAuth {
        let state = self.state.read().await;
        let cookies = state.cookies.as_ref();
        RequestAuth {
            bearer: self.token.expose_secret().to_string(),
            cookie: cookies.and_then(CookieArtifact::cookie_header),
            user_agent: cookies.and_then(|c| c.user_agent()).map(str::to_string),
        }
    }

    /// Install a freshly refreshed artifact. Returns the new generation.
    pub async fn install(&self, cookies: CookieArtifact) -> u64 {
        let mut state = self.state.write().await;
        state.cookies = Some(cookies);
        state.generation += 1;
        state.generation
    }

    /// Number of successful refreshes installed so far.
    pub async fn generation(&self) -> u64 {
        self.state.read().await.generation
    }

    pub async fn has_cookies(&self) -> bool {
        self.state.read().await.cookies.is_some()
    }
}
