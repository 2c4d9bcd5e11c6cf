//! Scanner configuration
//!
//! Every setting has an environment variable and a default so the controller
//! can be configured from its Deployment alone. The same struct is flattened
//! into the `lattice-scan` CLI, where flags override the environment.

use std::collections::HashMap;
use std::time::Duration;

use clap::Parser;

use crate::options::{RegistryCredentials, ScanOptions};

/// Default Trivy image repository
pub const DEFAULT_TRIVY_IMAGE: &str = "aquasec/trivy";

/// Default Trivy version (image tag)
pub const DEFAULT_TRIVY_VERSION: &str = "0.11.0";

/// Scanner backend and scan Job settings
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
pub struct ScannerConfig {
    /// Namespace scan Jobs and credential Secrets are created in
    #[arg(long, env = "LATTICE_SCAN_NAMESPACE", default_value = "lattice-scan")]
    pub scan_namespace: String,

    /// Service account scan pods run as
    #[arg(
        long,
        env = "LATTICE_SCAN_SERVICE_ACCOUNT",
        default_value = "lattice-scanner"
    )]
    pub service_account: String,

    /// Deadline for each scan Job in seconds (unset or 0 for no deadline)
    #[arg(long, env = "LATTICE_SCAN_JOB_TIMEOUT_SECS")]
    pub scan_job_timeout_secs: Option<u64>,

    /// Enable the Trivy scanner backend
    #[arg(
        long,
        env = "LATTICE_SCANNER_TRIVY_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub trivy_enabled: bool,

    /// Trivy image repository
    #[arg(long, env = "LATTICE_SCANNER_TRIVY_IMAGE", default_value = DEFAULT_TRIVY_IMAGE)]
    pub trivy_image: String,

    /// Trivy version, used as the image tag and reported as the scanner version
    #[arg(
        long,
        env = "LATTICE_SCANNER_TRIVY_VERSION",
        default_value = DEFAULT_TRIVY_VERSION
    )]
    pub trivy_version: String,
}

impl ScannerConfig {
    /// Load configuration from environment variables and defaults only
    pub fn from_env() -> Result<Self, clap::Error> {
        Self::try_parse_from(["lattice-scanner"])
    }

    /// Full Trivy image reference (`repository:tag`)
    pub fn trivy_image_ref(&self) -> String {
        format!("{}:{}", self.trivy_image, self.trivy_version)
    }

    /// Scan Job deadline, `None` when unbounded
    pub fn scan_job_timeout(&self) -> Option<Duration> {
        self.scan_job_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Build per-call scan options with the given registry credentials
    pub fn scan_options(
        &self,
        image_credentials: HashMap<String, RegistryCredentials>,
    ) -> ScanOptions {
        ScanOptions {
            namespace: self.scan_namespace.clone(),
            service_account_name: self.service_account.clone(),
            scan_job_timeout: self.scan_job_timeout(),
            image_credentials,
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            scan_namespace: "lattice-scan".to_string(),
            service_account: "lattice-scanner".to_string(),
            scan_job_timeout_secs: None,
            trivy_enabled: true,
            trivy_image: DEFAULT_TRIVY_IMAGE.to_string(),
            trivy_version: DEFAULT_TRIVY_VERSION.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn flag_defaults_match_default_impl() {
        let command = ScannerConfig::command();
        let flag_default = |id: &str| {
            command
                .get_arguments()
                .find(|arg| arg.get_id() == id)
                .and_then(|arg| arg.get_default_values().first())
                .map(|value| value.to_string_lossy().into_owned())
        };
        let defaults = ScannerConfig::default();

        assert_eq!(flag_default("scan_namespace"), Some(defaults.scan_namespace));
        assert_eq!(flag_default("service_account"), Some(defaults.service_account));
        assert_eq!(flag_default("scan_job_timeout_secs"), None);
        assert_eq!(defaults.scan_job_timeout_secs, None);
        assert_eq!(flag_default("trivy_enabled").as_deref(), Some("true"));
        assert!(defaults.trivy_enabled);
        assert_eq!(flag_default("trivy_image"), Some(defaults.trivy_image));
        assert_eq!(flag_default("trivy_version"), Some(defaults.trivy_version));
    }

    #[test]
    fn flags_override_defaults() {
        let config = ScannerConfig::try_parse_from([
            "lattice-scanner",
            "--scan-namespace",
            "security",
            "--trivy-version",
            "0.12.0",
            "--trivy-enabled",
            "false",
            "--scan-job-timeout-secs",
            "600",
        ])
        .unwrap();

        assert_eq!(config.scan_namespace, "security");
        assert_eq!(config.trivy_image_ref(), "aquasec/trivy:0.12.0");
        assert!(!config.trivy_enabled);
        assert_eq!(config.scan_job_timeout(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn zero_timeout_is_unbounded() {
        let config = ScannerConfig {
            scan_job_timeout_secs: Some(0),
            ..Default::default()
        };
        assert_eq!(config.scan_job_timeout(), None);
    }

    #[test]
    fn scan_options_carry_config() {
        let config = ScannerConfig {
            scan_job_timeout_secs: Some(120),
            ..Default::default()
        };
        let creds = HashMap::from([(
            "registry.example/private:1".to_string(),
            RegistryCredentials::new("robot", "token"),
        )]);

        let options = config.scan_options(creds);
        assert_eq!(options.namespace, "lattice-scan");
        assert_eq!(options.service_account_name, "lattice-scanner");
        assert_eq!(options.active_deadline_seconds(), Some(120));
        assert_eq!(options.image_credentials.len(), 1);
    }
}
