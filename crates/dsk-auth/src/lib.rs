//! Authentication infrastructure for the dsk bridge.
//!
//! The backend authenticates with a bearer token plus a set of browser cookies
//! (most importantly `cf_clearance`). Cookies expire; an external bypass
//! command produces a fresh cookie artifact, which is installed into the
//! process-wide [`CredentialStore`] in place.

mod cookies;
mod credentials;
mod error;
mod refresh;

pub use cookies::{default_artifact_path, CookieArtifact, REQUIRED_COOKIE};
pub use credentials::{CredentialStore, RequestAuth};
pub use error::{AuthError, Result};
pub use refresh::{CommandRefresher, CookieRefresher, RefreshError, ARTIFACT_PATH_ENV};
pub use secrecy::SecretString;
