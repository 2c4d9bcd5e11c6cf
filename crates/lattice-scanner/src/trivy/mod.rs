//! Trivy scanner backend
//!
//! Scan Jobs download the vulnerability database once in an init container
//! and share it with one scan container per workload container through an
//! `emptyDir`. Each scan container prints Trivy's JSON report to stdout.

mod job;
mod report;

use std::io::Read;

use k8s_openapi::api::core::v1::PodSpec;

use crate::config::ScannerConfig;
use crate::error::ScanError;
use crate::options::ScanOptions;
use crate::report::{ScannerInfo, VulnerabilityReport};
use crate::scanner::{ScanJob, VulnerabilityScanner};
use crate::workload::WorkloadRef;

pub use job::{build_scan_job, CredentialField, CredentialKey, CACHE_DIR, CACHE_VOLUME};
pub use report::parse_report;

/// Scanner name reported in vulnerability reports
pub const SCANNER_NAME: &str = "Trivy";

/// Scanner vendor reported in vulnerability reports
pub const SCANNER_VENDOR: &str = "Aqua Security";

/// Trivy backend configured with the image its Jobs run
#[derive(Clone, Debug)]
pub struct TrivyScanner {
    image: String,
    version: String,
}

impl TrivyScanner {
    /// Create a backend from scanner configuration
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            image: config.trivy_image_ref(),
            version: config.trivy_version.clone(),
        }
    }

    /// Image reference every scan Job container runs
    pub fn image(&self) -> &str {
        &self.image
    }

    fn scanner_info(&self) -> ScannerInfo {
        ScannerInfo {
            name: SCANNER_NAME.to_string(),
            vendor: SCANNER_VENDOR.to_string(),
            version: self.version.clone(),
        }
    }
}

impl VulnerabilityScanner for TrivyScanner {
    fn name(&self) -> &'static str {
        "trivy"
    }

    fn new_scan_job(
        &self,
        workload: &WorkloadRef,
        spec: &PodSpec,
        options: &ScanOptions,
    ) -> Result<ScanJob, ScanError> {
        build_scan_job(workload, spec, options, &self.image)
    }

    fn parse_vulnerability_report(
        &self,
        image_ref: &str,
        output: &mut dyn Read,
    ) -> Result<VulnerabilityReport, ScanError> {
        parse_report(image_ref, output, self.scanner_info())
    }
}
