//! Scanner backend abstraction
//!
//! A backend knows how to turn a workload into a scan Job and how to read the
//! output of one of that Job's containers. The controller only ever talks to
//! `dyn VulnerabilityScanner`, so backends can be swapped through config.

use std::io::Read;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PodSpec, Secret};
use tracing::info;

use crate::config::ScannerConfig;
use crate::error::ScanError;
use crate::options::ScanOptions;
use crate::report::VulnerabilityReport;
use crate::trivy::TrivyScanner;
use crate::workload::WorkloadRef;

/// Compiled scan Job and its optional credentials Secret.
///
/// When present, the Secret has the same name and namespace as the Job.
#[derive(Clone, Debug)]
pub struct ScanJob {
    /// Job that scans every container image of the workload
    pub job: Job,
    /// Registry credentials referenced by the Job's containers
    pub secret: Option<Secret>,
}

/// Capability set of a vulnerability scanner backend
pub trait VulnerabilityScanner: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &'static str;

    /// Compile a scan Job for every container in `spec`
    fn new_scan_job(
        &self,
        workload: &WorkloadRef,
        spec: &PodSpec,
        options: &ScanOptions,
    ) -> Result<ScanJob, ScanError>;

    /// Convert the complete output of one scan container into a report
    fn parse_vulnerability_report(
        &self,
        image_ref: &str,
        output: &mut dyn Read,
    ) -> Result<VulnerabilityReport, ScanError>;
}

/// Select the scanner backend enabled in `config`
pub fn scanner_from_config(
    config: &ScannerConfig,
) -> Result<Box<dyn VulnerabilityScanner>, ScanError> {
    if config.trivy_enabled {
        info!(image = %config.trivy_image_ref(), "Using Trivy vulnerability scanner");
        return Ok(Box::new(TrivyScanner::new(config)));
    }
    Err(ScanError::NoScannerEnabled)
}
