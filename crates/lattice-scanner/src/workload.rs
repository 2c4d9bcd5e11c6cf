//! Workload identity and container image bookkeeping
//!
//! A scan Job is stamped with the identity of the workload it scans and
//! carries a `container name → image` map in an annotation, so the caller can
//! pair each scan container's logs with the image it scanned.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Pod, PodSpec, ReplicationController};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ScanError;
use crate::{
    ANNOTATION_CONTAINER_IMAGES, LABEL_MANAGED_BY, LABEL_RESOURCE_KIND, LABEL_RESOURCE_NAME,
    LABEL_RESOURCE_NAMESPACE, MANAGED_BY_VALUE,
};

/// Identity of the workload being scanned
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadRef {
    /// Resource kind (e.g. `Deployment`)
    pub kind: String,
    /// Resource name
    pub name: String,
    /// Resource namespace
    pub namespace: String,
}

impl WorkloadRef {
    /// Create a workload reference from its parts
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Build the identity of any typed Kubernetes resource
    pub fn from_resource<K>(obj: &K) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        Self {
            kind: K::kind(&()).into_owned(),
            name: obj.name_any(),
            namespace: obj.namespace().unwrap_or_default(),
        }
    }

    /// Traceability labels shared by the scan Job, its pods and its Secret
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_RESOURCE_KIND.to_string(), self.kind.clone()),
            (LABEL_RESOURCE_NAME.to_string(), self.name.clone()),
            (LABEL_RESOURCE_NAMESPACE.to_string(), self.namespace.clone()),
            (LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string()),
        ])
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Container name → image reference map, serialized as a JSON object
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerImages(BTreeMap<String, String>);

impl ContainerImages {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the image of a container
    pub fn insert(&mut self, container: impl Into<String>, image: impl Into<String>) {
        self.0.insert(container.into(), image.into());
    }

    /// Image reference of the named container
    pub fn get(&self, container: &str) -> Option<&str> {
        self.0.get(container).map(String::as_str)
    }

    /// Number of containers recorded
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no containers are recorded
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate `(container, image)` pairs in container name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(c, i)| (c.as_str(), i.as_str()))
    }

    /// Encode as the JSON object stored in the Job annotation
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.0)
    }

    /// Decode from the JSON object stored in the Job annotation
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json).map(Self)
    }

    /// Recover the map from a scan Job's container-images annotation
    pub fn from_job(job: &Job) -> Result<Self, ScanError> {
        let name = job.name_any();
        let annotation = job
            .annotations()
            .get(ANNOTATION_CONTAINER_IMAGES)
            .ok_or_else(|| {
                ScanError::invalid_annotation(
                    &name,
                    format!("missing {} annotation", ANNOTATION_CONTAINER_IMAGES),
                )
            })?;
        Self::from_json(annotation).map_err(|e| ScanError::invalid_annotation(&name, e.to_string()))
    }
}

impl FromIterator<(String, String)> for ContainerImages {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Extract the workload identity and pod spec from a workload manifest.
///
/// Supports bare Pods and every built-in controller that owns a pod template:
/// Deployment, ReplicaSet, ReplicationController, StatefulSet, DaemonSet, Job
/// and CronJob. The manifest must carry `apiVersion` and `kind`.
pub fn pod_spec_from_manifest(
    manifest: serde_json::Value,
) -> Result<(WorkloadRef, PodSpec), ScanError> {
    let kind = manifest
        .get("kind")
        .and_then(|k| k.as_str())
        .ok_or_else(|| ScanError::unsupported_workload("manifest has no kind"))?
        .to_string();

    match kind.as_str() {
        "Pod" => extract(manifest, |p: Pod| p.spec),
        "Deployment" => extract(manifest, |d: Deployment| {
            d.spec.and_then(|s| s.template.spec)
        }),
        "ReplicaSet" => extract(manifest, |r: ReplicaSet| {
            r.spec.and_then(|s| s.template).and_then(|t| t.spec)
        }),
        "ReplicationController" => extract(manifest, |r: ReplicationController| {
            r.spec.and_then(|s| s.template).and_then(|t| t.spec)
        }),
        "StatefulSet" => extract(manifest, |s: StatefulSet| {
            s.spec.and_then(|s| s.template.spec)
        }),
        "DaemonSet" => extract(manifest, |d: DaemonSet| {
            d.spec.and_then(|s| s.template.spec)
        }),
        "Job" => extract(manifest, |j: Job| j.spec.and_then(|s| s.template.spec)),
        "CronJob" => extract(manifest, |c: CronJob| {
            c.spec
                .and_then(|s| s.job_template.spec)
                .and_then(|s| s.template.spec)
        }),
        other => Err(ScanError::unsupported_workload(format!(
            "kind '{}' has no pod template",
            other
        ))),
    }
}

fn extract<K>(
    manifest: serde_json::Value,
    pod_spec: impl FnOnce(K) -> Option<PodSpec>,
) -> Result<(WorkloadRef, PodSpec), ScanError>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let obj: K = serde_json::from_value(manifest).map_err(|e| {
        ScanError::unsupported_workload(format!("invalid {} manifest: {}", K::kind(&()), e))
    })?;
    let workload = WorkloadRef::from_resource(&obj);
    let spec = pod_spec(obj).ok_or_else(|| {
        ScanError::unsupported_workload(format!("{} has no pod spec", workload))
    })?;
    Ok((workload, spec))
}
