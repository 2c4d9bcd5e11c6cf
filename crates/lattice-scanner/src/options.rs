//! Per-call scan options

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Username/password pair for a private registry
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCredentials {
    /// Registry username
    pub username: String,
    /// Registry password or token
    pub password: String,
}

impl RegistryCredentials {
    /// Create credentials from a username and password
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// Keep passwords out of logs and panic messages.
impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Inputs to a single scan Job compilation
#[derive(Clone, Debug, Default)]
pub struct ScanOptions {
    /// Namespace the scan Job and its Secret are created in
    pub namespace: String,
    /// Service account the scan pod runs as
    pub service_account_name: String,
    /// Deadline for the whole Job; `None` (or zero) means unbounded
    pub scan_job_timeout: Option<Duration>,
    /// Credentials keyed by the exact image reference they unlock
    pub image_credentials: HashMap<String, RegistryCredentials>,
}

impl ScanOptions {
    /// Create options for the given namespace and service account
    pub fn new(namespace: impl Into<String>, service_account_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            service_account_name: service_account_name.into(),
            ..Default::default()
        }
    }

    /// Set the Job deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.scan_job_timeout = Some(timeout);
        self
    }

    /// Set credentials for one image reference
    pub fn with_credentials(
        mut self,
        image: impl Into<String>,
        credentials: RegistryCredentials,
    ) -> Self {
        self.image_credentials.insert(image.into(), credentials);
        self
    }

    /// `activeDeadlineSeconds` for the Job, rounded up to whole seconds, or
    /// `None` when unbounded
    pub fn active_deadline_seconds(&self) -> Option<i64> {
        self.scan_job_timeout
            .filter(|d| !d.is_zero())
            .map(|d| d.as_secs() + u64::from(d.subsec_nanos() > 0))
            .map(|secs| i64::try_from(secs).unwrap_or(i64::MAX))
    }
}
