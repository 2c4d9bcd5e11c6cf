//! Vulnerability scan Job compiler and report adapter for Lattice
//!
//! Compiles a workload's pod spec into a one-shot Kubernetes Job that scans
//! every container image, plus an optional Secret holding private registry
//! credentials. After the Job completes, each scan container's logs are
//! converted into a typed `VulnerabilityReport`.
//!
//! Backends implement [`VulnerabilityScanner`] and are selected from
//! [`ScannerConfig`] via [`scanner_from_config`]. Nothing in this crate talks
//! to the Kubernetes API; submitting Jobs and reading logs is the caller's job.

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod image;
pub mod job;
pub mod options;
pub mod report;
pub mod scanner;
pub mod telemetry;
pub mod trivy;
pub mod workload;

pub use config::ScannerConfig;
pub use error::ScanError;
pub use job::ScanJobStatus;
pub use options::{RegistryCredentials, ScanOptions};
pub use report::{Severity, VulnerabilityReport};
pub use scanner::{scanner_from_config, ScanJob, VulnerabilityScanner};
pub use workload::{ContainerImages, WorkloadRef};

/// Result type alias using [`ScanError`]
pub type Result<T> = std::result::Result<T, ScanError>;

/// Label key identifying the kind of the scanned workload
pub const LABEL_RESOURCE_KIND: &str = "scan.lattice.dev/resource-kind";

/// Label key identifying the name of the scanned workload
pub const LABEL_RESOURCE_NAME: &str = "scan.lattice.dev/resource-name";

/// Label key identifying the namespace of the scanned workload
pub const LABEL_RESOURCE_NAMESPACE: &str = "scan.lattice.dev/resource-namespace";

/// Annotation key holding the JSON container name → image reference map
pub const ANNOTATION_CONTAINER_IMAGES: &str = "scan.lattice.dev/container-images";

/// Standard managed-by label key
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of the managed-by label on every scan resource
pub const MANAGED_BY_VALUE: &str = "lattice-scanner";
