//! Cookie refresh through an external bypass command.

use crate::{AuthError, CookieArtifact};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// Why a refresh attempt produced no usable cookies.
///
/// `Clone` so that every request waiting on a shared refresh can observe the
/// same outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("refresh command timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("failed to start refresh command: {0}")]
    Spawn(String),

    #[error("refresh command failed ({status})")]
    ProcessFailed {
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("cookie artifact was not created at {path}")]
    ArtifactMissing { path: String, stdout: String },

    #[error("cannot clear previous cookie artifact: {0}")]
    ClearArtifact(String),

    #[error("cookie artifact is invalid: {0}")]
    InvalidArtifact(String),

    #[error("cookie artifact is missing required cookie `{name}`")]
    MissingCookie { name: String },
}

impl RefreshError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Captured process output, when the failure carries any.
    pub fn output(&self) -> (Option<&str>, Option<&str>) {
        match self {
            Self::ProcessFailed { stdout, stderr, .. } => (Some(stdout), Some(stderr)),
            Self::ArtifactMissing { stdout, .. } => (Some(stdout), None),
            _ => (None, None),
        }
    }
}

/// Produces a fresh cookie artifact.
#[async_trait]
pub trait CookieRefresher: Send + Sync {
    async fn refresh(&self) -> Result<CookieArtifact, RefreshError>;
}

/// Environment variable telling the refresh command where to write cookies.
pub const ARTIFACT_PATH_ENV: &str = "DSK_COOKIES_PATH";

/// Runs an external command and reads the artifact it writes.
///
/// Success requires exit status 0 and a valid artifact at `artifact_path`
/// written by this run; any file left there beforehand is removed first.
/// The child is killed if the timeout elapses.
#[derive(Debug, Clone)]
pub struct CommandRefresher {
    program: String,
    args: Vec<String>,
    artifact_path: PathBuf,
    timeout: Duration,
    working_dir: Option<PathBuf>,
}

impl CommandRefresher {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

    pub fn new(program: impl Into<String>, artifact_path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            artifact_path: artifact_path.into(),
            timeout: Self::DEFAULT_TIMEOUT,
            working_dir: None,
        }
    }

    /// Build from a whitespace-separated command line such as
    /// `python3 dsk/bypass.py`. Returns `None` for a blank line.
    pub fn from_command_line(line: &str, artifact_path: impl Into<PathBuf>) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, artifact_path).with_args(parts.collect()))
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn clear_artifact(&self) -> Result<(), RefreshError> {
        match tokio::fs::remove_file(&self.artifact_path).await {
            Ok(()) => {
                tracing::debug!(
                    path = %self.artifact_path.display(),
                    "removed previous cookie artifact"
                );
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RefreshError::ClearArtifact(format!(
                "{}: {}",
                self.artifact_path.display(),
                e
            ))),
        }
    }

    fn read_artifact(&self, stdout: String) -> Result<CookieArtifact, RefreshError> {
        if !self.artifact_path.exists() {
            return Err(RefreshError::ArtifactMissing {
                path: self.artifact_path.display().to_string(),
                stdout,
            });
        }

        CookieArtifact::load(&self.artifact_path).map_err(|e| match e {
            AuthError::MissingCookie(name) => RefreshError::MissingCookie { name },
            other => RefreshError::InvalidArtifact(other.to_string()),
        })
    }
}

#[async_trait]
impl CookieRefresher for CommandRefresher {
    async fn refresh(&self) -> Result<CookieArtifact, RefreshError> {
        self.clear_artifact().await?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env(ARTIFACT_PATH_ENV, &self.artifact_path)
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        tracing::info!(
            program = %self.program,
            timeout_secs = self.timeout.as_secs(),
            "running cookie refresh command"
        );

        let child = cmd
            .spawn()
            .map_err(|e| RefreshError::Spawn(format!("{}: {}", self.program, e)))?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(RefreshError::Spawn(e.to_string())),
            Err(_) => {
                return Err(RefreshError::Timeout {
                    secs: self.timeout.as_secs(),
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(RefreshError::ProcessFailed {
                status: output.status.to_string(),
                stdout,
                stderr,
            });
        }

        self.read_artifact(stdout)
    }
}
