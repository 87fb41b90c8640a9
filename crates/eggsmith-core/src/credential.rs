//! Session-scoped elevation secret.

use crate::error::{EggsmithError, EggsmithResult};
use std::fmt;
use zeroize::Zeroizing;

/// The one secret that authorizes every privileged invocation for a session.
///
/// It is supplied once at startup, never persisted and wiped from memory when
/// the last reference drops. Share it across workers as `Arc<SessionCredential>`.
pub struct SessionCredential {
    secret: Zeroizing<String>,
}

impl SessionCredential {
    /// Wrap a freshly prompted secret. Empty or whitespace-only input is refused.
    pub fn new(secret: impl Into<String>) -> EggsmithResult<Self> {
        let secret = Zeroizing::new(secret.into());
        if secret.trim().is_empty() {
            return Err(EggsmithError::AuthenticationMissing);
        }
        Ok(Self { secret })
    }

    pub(crate) fn expose(&self) -> &str {
        self.secret.as_str()
    }

    /// Replace any occurrence of the secret in `line` with a placeholder.
    pub fn redact(&self, line: &str) -> String {
        if line.contains(self.expose()) {
            line.replace(self.expose(), "********")
        } else {
            line.to_string()
        }
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionCredential(<redacted>)")
    }
}
