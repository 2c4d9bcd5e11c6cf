//! Vulnerability report types
//!
//! Scanner-agnostic shape of a single image's scan result. Backends convert
//! their native output into this record.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Vulnerability severity, ordered from least to most severe
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Severity not provided or not recognized
    #[default]
    Unknown,
    /// Low severity
    Low,
    /// Medium severity
    Medium,
    /// High severity
    High,
    /// Critical severity
    Critical,
}

impl Severity {
    /// Parse a scanner-provided severity, case-insensitively.
    ///
    /// Anything unrecognized maps to [`Severity::Unknown`].
    pub fn from_scanner(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "CRITICAL" => Self::Critical,
            "HIGH" => Self::High,
            "MEDIUM" => Self::Medium,
            "LOW" => Self::Low,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "UNKNOWN"),
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Scanner that produced a report
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerInfo {
    /// Scanner name (e.g. `Trivy`)
    pub name: String,
    /// Scanner vendor
    pub vendor: String,
    /// Scanner version
    pub version: String,
}

/// Registry hosting the scanned image
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registry {
    /// Registry host, with optional port
    pub server: String,
}

/// Scanned image within its registry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Repository path
    pub repository: String,
    /// Image tag, if the reference had one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Image digest, if the reference had one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Per-severity vulnerability counts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilitySummary {
    /// Number of critical vulnerabilities
    pub critical_count: u32,
    /// Number of high vulnerabilities
    pub high_count: u32,
    /// Number of medium vulnerabilities
    pub medium_count: u32,
    /// Number of low vulnerabilities
    pub low_count: u32,
    /// Number of vulnerabilities with unknown severity
    pub unknown_count: u32,
}

impl VulnerabilitySummary {
    /// Count vulnerabilities by severity
    pub fn from_vulnerabilities(vulnerabilities: &[Vulnerability]) -> Self {
        let mut summary = Self::default();
        for v in vulnerabilities {
            match v.severity {
                Severity::Critical => summary.critical_count += 1,
                Severity::High => summary.high_count += 1,
                Severity::Medium => summary.medium_count += 1,
                Severity::Low => summary.low_count += 1,
                Severity::Unknown => summary.unknown_count += 1,
            }
        }
        summary
    }

    /// Total number of vulnerabilities
    pub fn total(&self) -> u32 {
        self.critical_count
            + self.high_count
            + self.medium_count
            + self.low_count
            + self.unknown_count
    }
}

/// A single vulnerability finding
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vulnerability {
    /// Advisory identifier (e.g. `CVE-2020-1234`)
    pub vulnerability_id: String,
    /// Affected package
    pub resource: String,
    /// Installed package version
    pub installed_version: String,
    /// First fixed version, empty when no fix exists
    #[serde(default)]
    pub fixed_version: String,
    /// Severity
    pub severity: Severity,
    /// Layer that introduced the package, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_id: Option<String>,
    /// Short title
    #[serde(default)]
    pub title: String,
    /// Long description
    #[serde(default)]
    pub description: String,
    /// Reference links
    #[serde(default)]
    pub links: Vec<String>,
}

/// Vulnerability report for one image
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilityReport {
    /// Image reference exactly as it appeared in the pod spec
    pub image_ref: String,
    /// Scanner that produced the report
    pub scanner: ScannerInfo,
    /// Registry of the scanned image
    pub registry: Registry,
    /// Scanned image
    pub artifact: Artifact,
    /// Per-severity counts
    pub summary: VulnerabilitySummary,
    /// All findings
    pub vulnerabilities: Vec<Vulnerability>,
}

impl VulnerabilityReport {
    /// Highest severity among the findings, `None` when clean
    pub fn max_severity(&self) -> Option<Severity> {
        self.vulnerabilities.iter().map(|v| v.severity).max()
    }
}
