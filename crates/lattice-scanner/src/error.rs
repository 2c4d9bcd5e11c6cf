//! Error types for scan Job compilation and report conversion
//!
//! Every variant carries enough context (workload, container, image) to
//! identify the failing input without re-reading it. None of these errors are
//! retried inside the crate; the caller decides whether to resubmit a Job.

use thiserror::Error;

/// Errors produced while compiling scan Jobs or converting scan output
#[derive(Debug, Error)]
pub enum ScanError {
    /// Job metadata could not be serialized
    #[error("failed to build scan job for {workload}: {source}")]
    Construction {
        /// Workload the Job was being built for (`Kind/namespace/name`)
        workload: String,
        /// Underlying serialization failure
        #[source]
        source: serde_json::Error,
    },

    /// A container in the pod spec has no image
    #[error("container '{container}' of {workload} has no image")]
    MissingImage {
        /// Workload the container belongs to (`Kind/namespace/name`)
        workload: String,
        /// Name of the container without an image
        container: String,
    },

    /// Scan output was empty, truncated or not valid scanner JSON
    #[error("failed to parse scan output for image {image}: {message}")]
    Parse {
        /// Image reference the output was produced for
        image: String,
        /// Description of what failed
        message: String,
    },

    /// Image reference could not be split into registry, repository and tag
    #[error("invalid image reference '{reference}': {message}")]
    ImageReference {
        /// The offending reference
        reference: String,
        /// Description of what's invalid
        message: String,
    },

    /// The container-images annotation on a Job is missing or malformed
    #[error("invalid container images annotation on job {job}: {message}")]
    InvalidAnnotation {
        /// Name of the Job
        job: String,
        /// Description of what failed
        message: String,
    },

    /// A workload manifest does not carry a pod template
    #[error("unsupported workload: {message}")]
    UnsupportedWorkload {
        /// Description of what's unsupported
        message: String,
    },

    /// Configuration does not enable any scanner backend
    #[error("no vulnerability scanner backend is enabled")]
    NoScannerEnabled,
}

impl ScanError {
    /// Create a parse error for the given image
    pub fn parse(image: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Parse {
            image: image.into(),
            message: msg.into(),
        }
    }

    /// Create an image reference error
    pub fn image_reference(reference: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ImageReference {
            reference: reference.into(),
            message: msg.into(),
        }
    }

    /// Create an annotation error for the given Job
    pub fn invalid_annotation(job: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidAnnotation {
            job: job.into(),
            message: msg.into(),
        }
    }

    /// Create an unsupported workload error
    pub fn unsupported_workload(msg: impl Into<String>) -> Self {
        Self::UnsupportedWorkload {
            message: msg.into(),
        }
    }

    /// Whether resubmitting a fresh scan Job could plausibly succeed.
    ///
    /// Parse failures usually mean the scan container crashed before writing
    /// its report. Every other variant is a property of the input and will
    /// fail again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }
}
