use crate::{AuthError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Cookie that must be present for an artifact to be usable.
pub const REQUIRED_COOKIE: &str = "cf_clearance";

/// Cookie bundle written by the bypass command.
///
/// ```json
/// { "cookies": { "cf_clearance": "..." }, "user_agent": "Mozilla/5.0 ..." }
/// ```
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieArtifact {
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    #[serde(default)]
    pub user_agent: String,
}

impl std::fmt::Debug for CookieArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieArtifact")
            .field("cookies", &self.cookies.keys().collect::<Vec<_>>())
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl CookieArtifact {
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Read and validate an artifact from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let artifact = Self::from_json(&content)?;
        artifact.validate()?;
        Ok(artifact)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AuthError::StorageError(format!("Failed to create dir: {}", e)))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .map_err(|e| AuthError::StorageError(format!("Failed to write: {}", e)))?;
        Ok(())
    }

    /// The artifact is usable only with a non-blank `cf_clearance` cookie.
    pub fn validate(&self) -> Result<()> {
        match self.cookies.get(REQUIRED_COOKIE) {
            Some(value) if !value.trim().is_empty() => Ok(()),
            _ => Err(AuthError::MissingCookie(REQUIRED_COOKIE.to_string())),
        }
    }

    /// `Cookie` header value (`name=value; name=value`), if any cookies exist.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn user_agent(&self) -> Option<&str> {
        let ua = self.user_agent.trim();
        (!ua.is_empty()).then_some(ua)
    }
}

/// `<data_local_dir>/dsk/cookies.json`
pub fn default_artifact_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("dsk").join("cookies.json"))
}
