//! Trivy JSON output conversion
//!
//! Accepts both output shapes Trivy has shipped: the legacy top-level array
//! of results and the `{"SchemaVersion": 2, "Results": [...]}` object.
//! Pod logs interleave Trivy's stderr log lines with the JSON on stdout, so
//! anything before the first line opening a JSON document is skipped.

use std::io::Read;

use serde::Deserialize;
use tracing::debug;

use crate::error::ScanError;
use crate::image::ImageRef;
use crate::report::{
    Artifact, Registry, ScannerInfo, Severity, Vulnerability, VulnerabilityReport,
    VulnerabilitySummary,
};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TrivyOutput {
    Legacy(Vec<TrivyResult>),
    Report {
        // Required: tells a report apart from any other JSON object
        #[serde(rename = "SchemaVersion")]
        _schema_version: u32,
        #[serde(rename = "Results", default)]
        results: Option<Vec<TrivyResult>>,
    },
}

impl TrivyOutput {
    fn into_results(self) -> Vec<TrivyResult> {
        match self {
            Self::Legacy(results) => results,
            Self::Report { results, .. } => results.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TrivyResult {
    #[serde(rename = "Target")]
    target: String,
    #[serde(rename = "Vulnerabilities", default)]
    vulnerabilities: Option<Vec<TrivyVulnerability>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyVulnerability {
    #[serde(rename = "VulnerabilityID")]
    vulnerability_id: String,
    pkg_name: String,
    #[serde(default)]
    installed_version: Option<String>,
    #[serde(default)]
    fixed_version: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "PrimaryURL", default)]
    primary_url: Option<String>,
    #[serde(default)]
    references: Option<Vec<String>>,
    #[serde(default)]
    layer: Option<TrivyLayer>,
}

#[derive(Debug, Deserialize)]
struct TrivyLayer {
    #[serde(rename = "Digest", default)]
    digest: Option<String>,
    #[serde(rename = "DiffID", default)]
    diff_id: Option<String>,
}

impl TrivyVulnerability {
    fn into_vulnerability(self) -> Vulnerability {
        let layer_id = self
            .layer
            .and_then(|l| l.diff_id.filter(|d| !d.is_empty()).or(l.digest))
            .filter(|id| !id.is_empty());

        let mut links = Vec::new();
        if let Some(url) = self.primary_url.filter(|u| !u.is_empty()) {
            links.push(url);
        }
        for reference in self.references.unwrap_or_default() {
            if !links.contains(&reference) {
                links.push(reference);
            }
        }

        Vulnerability {
            vulnerability_id: self.vulnerability_id,
            resource: self.pkg_name,
            installed_version: self.installed_version.unwrap_or_default(),
            fixed_version: self.fixed_version.unwrap_or_default(),
            severity: Severity::from_scanner(self.severity.as_deref().unwrap_or_default()),
            layer_id,
            title: self.title.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            links,
        }
    }
}

/// Convert the complete output of a Trivy scan container into a report.
///
/// Fails with [`ScanError::Parse`] when the output is empty, truncated or not
/// Trivy JSON, and with [`ScanError::ImageReference`] when `image_ref` can't
/// be attributed to a registry and repository.
pub fn parse_report(
    image_ref: &str,
    output: &mut dyn Read,
    scanner: ScannerInfo,
) -> Result<VulnerabilityReport, ScanError> {
    let mut raw = String::new();
    output.read_to_string(&mut raw).map_err(|e| {
        ScanError::parse(image_ref, format!("failed to read scan output: {}", e))
    })?;

    let document = json_document(&raw)
        .ok_or_else(|| ScanError::parse(image_ref, "scan output contains no JSON document"))?;

    // Only the first document counts; trailing log lines are ignored.
    let parsed = serde_json::Deserializer::from_str(document)
        .into_iter::<TrivyOutput>()
        .next()
        .ok_or_else(|| ScanError::parse(image_ref, "scan output contains no JSON document"))?
        .map_err(|e| ScanError::parse(image_ref, e.to_string()))?;

    let image = ImageRef::parse(image_ref)?;

    let mut vulnerabilities = Vec::new();
    for result in parsed.into_results() {
        let found = result.vulnerabilities.unwrap_or_default();
        debug!(
            image = %image_ref,
            target = %result.target,
            vulnerabilities = found.len(),
            "Converted Trivy result"
        );
        vulnerabilities.extend(found.into_iter().map(TrivyVulnerability::into_vulnerability));
    }

    Ok(VulnerabilityReport {
        image_ref: image_ref.to_string(),
        scanner,
        registry: Registry {
            server: image.registry,
        },
        artifact: Artifact {
            repository: image.repository,
            tag: image.tag,
            digest: image.digest,
        },
        summary: VulnerabilitySummary::from_vulnerabilities(&vulnerabilities),
        vulnerabilities,
    })
}

/// Slice of `raw` starting at the first line that opens a JSON array or object
fn json_document(raw: &str) -> Option<&str> {
    let mut offset = 0;
    for line in raw.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with('[') || trimmed.starts_with('{') {
            return Some(&raw[offset + line.len() - trimmed.len()..]);
        }
        offset += line.len();
    }
    None
}
