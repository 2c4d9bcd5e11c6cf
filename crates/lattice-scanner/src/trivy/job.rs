//! Trivy scan Job construction
//!
//! Builds one Kubernetes Job per workload:
//! - An init container downloads the vulnerability DB into the `data` emptyDir
//! - One scan container per workload container runs `trivy` against its image
//!   with `--skip-update`, reusing the downloaded DB
//! - Registry credentials go into a Secret named after the Job and reach the
//!   scan containers only through `secretKeyRef` env vars
//! - `backoffLimit: 0` so a failed scan fails the whole Job

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec,
    ResourceRequirements, Secret, SecretKeySelector, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use tracing::debug;
use uuid::Uuid;

use crate::error::ScanError;
use crate::options::ScanOptions;
use crate::scanner::ScanJob;
use crate::workload::{ContainerImages, WorkloadRef};
use crate::ANNOTATION_CONTAINER_IMAGES;

/// Name of the shared vulnerability DB volume
pub const CACHE_VOLUME: &str = "data";

/// Mount path of the shared vulnerability DB volume
pub const CACHE_DIR: &str = "/var/lib/trivy";

const ENV_USERNAME: &str = "TRIVY_USERNAME";
const ENV_PASSWORD: &str = "TRIVY_PASSWORD";

/// Which half of a registry credential a Secret key holds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CredentialField {
    /// Registry username
    Username,
    /// Registry password
    Password,
}

impl fmt::Display for CredentialField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Username => write!(f, "username"),
            Self::Password => write!(f, "password"),
        }
    }
}

/// Secret data key for one credential field of one container.
///
/// Renders as `<container>.<field>`, e.g. `app.username`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CredentialKey<'a> {
    /// Workload container the credential belongs to
    pub container: &'a str,
    /// Credential field
    pub field: CredentialField,
}

impl<'a> CredentialKey<'a> {
    /// Key for `field` of `container`
    pub fn new(container: &'a str, field: CredentialField) -> Self {
        Self { container, field }
    }
}

impl fmt::Display for CredentialKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.container, self.field)
    }
}

/// Build a Trivy scan Job (and credentials Secret, if needed) for a workload.
///
/// The Job gets a fresh UUID name; the Secret, when any container image has
/// credentials in `options`, shares that name and namespace.
pub fn build_scan_job(
    workload: &WorkloadRef,
    spec: &PodSpec,
    options: &ScanOptions,
    trivy_image: &str,
) -> Result<ScanJob, ScanError> {
    let job_name = Uuid::new_v4().to_string();
    let labels = workload.labels();

    let mut container_images = ContainerImages::new();
    let mut secret_data: BTreeMap<String, ByteString> = BTreeMap::new();
    let mut containers = Vec::with_capacity(spec.containers.len());

    for c in &spec.containers {
        let image = c.image.as_deref().ok_or_else(|| ScanError::MissingImage {
            workload: workload.to_string(),
            container: c.name.clone(),
        })?;
        container_images.insert(&c.name, image);

        let mut env = Vec::new();
        if let Some(creds) = options.image_credentials.get(image) {
            let username_key = CredentialKey::new(&c.name, CredentialField::Username).to_string();
            let password_key = CredentialKey::new(&c.name, CredentialField::Password).to_string();

            secret_data.insert(
                username_key.clone(),
                ByteString(creds.username.as_bytes().to_vec()),
            );
            secret_data.insert(
                password_key.clone(),
                ByteString(creds.password.as_bytes().to_vec()),
            );

            env.push(secret_env_var(ENV_USERNAME, &job_name, username_key));
            env.push(secret_env_var(ENV_PASSWORD, &job_name, password_key));
        }

        containers.push(scan_container(&c.name, image, trivy_image, env));
    }

    let container_images_json = container_images
        .to_json()
        .map_err(|source| ScanError::Construction {
            workload: workload.to_string(),
            source,
        })?;

    let secret = (!secret_data.is_empty()).then(|| Secret {
        metadata: ObjectMeta {
            name: Some(job_name.clone()),
            namespace: Some(options.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(secret_data),
        ..Default::default()
    });

    debug!(
        job = %job_name,
        workload = %workload,
        containers = containers.len(),
        credentials = secret.is_some(),
        "Compiled Trivy scan job"
    );

    let job = Job {
        metadata: ObjectMeta {
            name: Some(job_name.clone()),
            namespace: Some(options.namespace.clone()),
            labels: Some(labels.clone()),
            annotations: Some(BTreeMap::from([(
                ANNOTATION_CONTAINER_IMAGES.to_string(),
                container_images_json,
            )])),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            completions: Some(1),
            active_deadline_seconds: options.active_deadline_seconds(),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    service_account_name: Some(options.service_account_name.clone()),
                    automount_service_account_token: Some(false),
                    volumes: Some(vec![Volume {
                        name: CACHE_VOLUME.to_string(),
                        empty_dir: Some(EmptyDirVolumeSource::default()),
                        ..Default::default()
                    }]),
                    init_containers: Some(vec![download_db_container(&job_name, trivy_image)]),
                    containers,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    };

    Ok(ScanJob { job, secret })
}

fn download_db_container(name: &str, trivy_image: &str) -> Container {
    Container {
        name: name.to_string(),
        image: Some(trivy_image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        termination_message_policy: Some("FallbackToLogsOnError".to_string()),
        command: Some(vec!["trivy".to_string()]),
        args: Some(vec![
            "--download-db-only".to_string(),
            "--cache-dir".to_string(),
            CACHE_DIR.to_string(),
        ]),
        volume_mounts: Some(vec![cache_mount()]),
        ..Default::default()
    }
}

fn scan_container(
    name: &str,
    target_image: &str,
    trivy_image: &str,
    env: Vec<EnvVar>,
) -> Container {
    Container {
        name: name.to_string(),
        image: Some(trivy_image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        termination_message_policy: Some("FallbackToLogsOnError".to_string()),
        env: (!env.is_empty()).then_some(env),
        command: Some(vec!["trivy".to_string()]),
        args: Some(vec![
            "--skip-update".to_string(),
            "--cache-dir".to_string(),
            CACHE_DIR.to_string(),
            "--no-progress".to_string(),
            "--format".to_string(),
            "json".to_string(),
            target_image.to_string(),
        ]),
        resources: Some(ResourceRequirements {
            requests: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("100m".to_string())),
                ("memory".to_string(), Quantity("100M".to_string())),
            ])),
            limits: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("500m".to_string())),
                ("memory".to_string(), Quantity("500M".to_string())),
            ])),
            ..Default::default()
        }),
        volume_mounts: Some(vec![cache_mount()]),
        ..Default::default()
    }
}

fn cache_mount() -> VolumeMount {
    VolumeMount {
        name: CACHE_VOLUME.to_string(),
        mount_path: CACHE_DIR.to_string(),
        read_only: Some(false),
        ..Default::default()
    }
}

fn secret_env_var(name: &str, secret_name: &str, key: String) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret_name.to_string(),
                key,
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::options::RegistryCredentials;
    use crate::{LABEL_RESOURCE_KIND, LABEL_RESOURCE_NAME, LABEL_RESOURCE_NAMESPACE};

    const TRIVY_IMAGE: &str = "aquasec/trivy:0.11.0";

    fn pod_spec(containers: &[(&str, &str)]) -> PodSpec {
        PodSpec {
            containers: containers
                .iter()
                .map(|(name, image)| Container {
                    name: name.to_string(),
                    image: Some(image.to_string()),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn workload() -> WorkloadRef {
        WorkloadRef::new("Deployment", "web", "shop")
    }

    fn options() -> ScanOptions {
        ScanOptions::new("lattice-scan", "lattice-scanner")
    }

    fn pod(job: &Job) -> &PodSpec {
        job.spec.as_ref().unwrap().template.spec.as_ref().unwrap()
    }

    fn private_options() -> ScanOptions {
        options().with_credentials(
            "registry.example/private:1",
            RegistryCredentials::new("robot-user-7f", "p4ss-9x"),
        )
    }

    #[test]
    fn credential_key_format() {
        assert_eq!(
            CredentialKey::new("app", CredentialField::Username).to_string(),
            "app.username"
        );
        assert_eq!(
            CredentialKey::new("app", CredentialField::Password).to_string(),
            "app.password"
        );
    }

    #[test]
    fn single_public_container() {
        let scan = build_scan_job(
            &workload(),
            &pod_spec(&[("app", "nginx:1.19")]),
            &options(),
            TRIVY_IMAGE,
        )
        .unwrap();

        assert!(scan.secret.is_none());
        let pod = pod(&scan.job);
        assert_eq!(pod.init_containers.as_ref().unwrap().len(), 1);
        assert_eq!(pod.containers.len(), 1);

        let container = &pod.containers[0];
        assert_eq!(container.name, "app");
        assert_eq!(container.image.as_deref(), Some(TRIVY_IMAGE));
        assert_eq!(
            container.args.as_ref().unwrap().last().map(String::as_str),
            Some("nginx:1.19")
        );
        assert!(container.env.is_none());
    }

    #[test]
    fn one_scan_container_per_input_in_order() {
        for n in 1..=6 {
            let names: Vec<String> = (0..n).map(|i| format!("c{}", i)).collect();
            let images: Vec<String> = (0..n).map(|i| format!("repo/image-{}:v{}", i, i)).collect();
            let pairs: Vec<(&str, &str)> = names
                .iter()
                .zip(&images)
                .map(|(name, image)| (name.as_str(), image.as_str()))
                .collect();

            let scan =
                build_scan_job(&workload(), &pod_spec(&pairs), &options(), TRIVY_IMAGE).unwrap();
            let pod = pod(&scan.job);

            assert_eq!(pod.init_containers.as_ref().unwrap().len(), 1);
            assert_eq!(pod.containers.len(), n);
            for (container, (name, image)) in pod.containers.iter().zip(&pairs) {
                assert_eq!(container.name, *name);
                assert_eq!(container.image.as_deref(), Some(TRIVY_IMAGE));
                assert_eq!(
                    container.args.as_ref().unwrap().last().map(String::as_str),
                    Some(*image)
                );
            }
        }
    }

    #[test]
    fn container_images_annotation_round_trips() {
        let pairs = [("app", "registry.example/private:1"), ("sidecar", "nginx:1.19")];
        let scan =
            build_scan_job(&workload(), &pod_spec(&pairs), &options(), TRIVY_IMAGE).unwrap();

        let images = ContainerImages::from_job(&scan.job).unwrap();
        let expected: ContainerImages = pairs
            .iter()
            .map(|(c, i)| (c.to_string(), i.to_string()))
            .collect();
        assert_eq!(images, expected);
    }

    #[test]
    fn secret_only_for_images_with_credentials() {
        let scan = build_scan_job(
            &workload(),
            &pod_spec(&[("app", "registry.example/private:1"), ("sidecar", "nginx:1.19")]),
            &private_options(),
            TRIVY_IMAGE,
        )
        .unwrap();

        let pod = pod(&scan.job);
        assert_eq!(pod.containers.len(), 2);

        let secret = scan.secret.expect("secret for private image");
        let data = secret.data.as_ref().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data["app.username"].0, b"robot-user-7f");
        assert_eq!(data["app.password"].0, b"p4ss-9x");
        assert_eq!(secret.type_.as_deref(), Some("Opaque"));

        let app_env = pod.containers[0].env.as_ref().unwrap();
        assert_eq!(app_env.len(), 2);
        let keys: Vec<_> = app_env
            .iter()
            .map(|e| {
                let selector = e
                    .value_from
                    .as_ref()
                    .and_then(|v| v.secret_key_ref.as_ref())
                    .unwrap();
                assert_eq!(Some(selector.name.as_str()), scan.job.metadata.name.as_deref());
                assert!(e.value.is_none());
                (e.name.as_str(), selector.key.as_str())
            })
            .collect();
        assert_eq!(
            keys,
            vec![
                ("TRIVY_USERNAME", "app.username"),
                ("TRIVY_PASSWORD", "app.password")
            ]
        );

        assert!(pod.containers[1].env.is_none());
    }

    #[test]
    fn secret_has_two_entries_per_matched_container() {
        let options = private_options().with_credentials(
            "ghcr.io/org/worker:2",
            RegistryCredentials::new("bot", "ghp_token"),
        );
        let scan = build_scan_job(
            &workload(),
            &pod_spec(&[
                ("app", "registry.example/private:1"),
                ("worker", "ghcr.io/org/worker:2"),
                ("proxy", "envoyproxy/envoy:v1.16"),
            ]),
            &options,
            TRIVY_IMAGE,
        )
        .unwrap();

        let data = scan.secret.unwrap().data.unwrap();
        let keys: Vec<_> = data.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "app.password",
                "app.username",
                "worker.password",
                "worker.username"
            ]
        );
    }

    #[test]
    fn job_never_embeds_credential_values() {
        let scan = build_scan_job(
            &workload(),
            &pod_spec(&[("app", "registry.example/private:1")]),
            &private_options(),
            TRIVY_IMAGE,
        )
        .unwrap();

        let job_json = serde_json::to_string(&scan.job).unwrap();
        assert!(!job_json.contains("robot-user-7f"));
        assert!(!job_json.contains("p4ss-9x"));
    }

    #[test]
    fn secret_shares_job_name_namespace_and_labels() {
        let scan = build_scan_job(
            &workload(),
            &pod_spec(&[("app", "registry.example/private:1")]),
            &private_options(),
            TRIVY_IMAGE,
        )
        .unwrap();
        let secret = scan.secret.unwrap();

        assert_eq!(secret.metadata.name, scan.job.metadata.name);
        assert_eq!(secret.metadata.namespace.as_deref(), Some("lattice-scan"));
        assert_eq!(secret.metadata.labels, scan.job.metadata.labels);
    }

    #[test]
    fn job_names_are_unique_uuids() {
        let spec = pod_spec(&[("app", "nginx:1.19")]);
        let a = build_scan_job(&workload(), &spec, &options(), TRIVY_IMAGE).unwrap();
        let b = build_scan_job(&workload(), &spec, &options(), TRIVY_IMAGE).unwrap();

        let name_a = a.job.metadata.name.unwrap();
        assert!(Uuid::parse_str(&name_a).is_ok());
        assert_ne!(Some(name_a), b.job.metadata.name);
    }

    #[test]
    fn job_labels_identify_workload() {
        let scan = build_scan_job(
            &workload(),
            &pod_spec(&[("app", "nginx:1.19")]),
            &options(),
            TRIVY_IMAGE,
        )
        .unwrap();

        let labels = scan.job.metadata.labels.as_ref().unwrap();
        assert_eq!(labels[LABEL_RESOURCE_KIND], "Deployment");
        assert_eq!(labels[LABEL_RESOURCE_NAME], "web");
        assert_eq!(labels[LABEL_RESOURCE_NAMESPACE], "shop");

        let template_labels = scan
            .job
            .spec
            .as_ref()
            .unwrap()
            .template
            .metadata
            .as_ref()
            .unwrap()
            .labels
            .as_ref();
        assert_eq!(template_labels, Some(labels));
        assert_eq!(scan.job.metadata.namespace.as_deref(), Some("lattice-scan"));
    }

    #[test]
    fn job_execution_policy() {
        let scan = build_scan_job(
            &workload(),
            &pod_spec(&[("app", "nginx:1.19")]),
            &options(),
            TRIVY_IMAGE,
        )
        .unwrap();

        let spec = scan.job.spec.as_ref().unwrap();
        assert_eq!(spec.backoff_limit, Some(0));
        assert_eq!(spec.completions, Some(1));
        assert_eq!(spec.active_deadline_seconds, None);

        let pod = pod(&scan.job);
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.automount_service_account_token, Some(false));
        assert_eq!(pod.service_account_name.as_deref(), Some("lattice-scanner"));
    }

    #[test]
    fn deadline_is_propagated() {
        let scan = build_scan_job(
            &workload(),
            &pod_spec(&[("app", "nginx:1.19")]),
            &options().with_timeout(Duration::from_secs(900)),
            TRIVY_IMAGE,
        )
        .unwrap();
        assert_eq!(scan.job.spec.unwrap().active_deadline_seconds, Some(900));
    }

    #[test]
    fn init_container_downloads_db_into_shared_volume() {
        let scan = build_scan_job(
            &workload(),
            &pod_spec(&[("app", "nginx:1.19"), ("sidecar", "redis:6")]),
            &options(),
            TRIVY_IMAGE,
        )
        .unwrap();
        let pod = pod(&scan.job);

        let volumes = pod.volumes.as_ref().unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].name, CACHE_VOLUME);
        assert!(volumes[0].empty_dir.is_some());

        let init = &pod.init_containers.as_ref().unwrap()[0];
        assert_eq!(Some(init.name.as_str()), scan.job.metadata.name.as_deref());
        assert_eq!(init.image.as_deref(), Some(TRIVY_IMAGE));
        assert!(init
            .args
            .as_ref()
            .unwrap()
            .contains(&"--download-db-only".to_string()));

        for container in std::iter::once(init).chain(&pod.containers) {
            let mounts = container.volume_mounts.as_ref().unwrap();
            assert_eq!(mounts.len(), 1);
            assert_eq!(mounts[0].name, CACHE_VOLUME);
            assert_eq!(mounts[0].mount_path, CACHE_DIR);
            assert_eq!(mounts[0].read_only, Some(false));
        }
    }

    #[test]
    fn scan_containers_use_structured_output_and_skip_update() {
        let scan = build_scan_job(
            &workload(),
            &pod_spec(&[("app", "nginx:1.19")]),
            &options(),
            TRIVY_IMAGE,
        )
        .unwrap();
        let container = &pod(&scan.job).containers[0];

        assert_eq!(container.command, Some(vec!["trivy".to_string()]));
        assert_eq!(
            container.args.as_ref().unwrap(),
            &vec![
                "--skip-update",
                "--cache-dir",
                CACHE_DIR,
                "--no-progress",
                "--format",
                "json",
                "nginx:1.19"
            ]
        );
    }

    #[test]
    fn scan_containers_have_bounded_resources() {
        let scan = build_scan_job(
            &workload(),
            &pod_spec(&[("app", "nginx:1.19")]),
            &options(),
            TRIVY_IMAGE,
        )
        .unwrap();
        let resources = pod(&scan.job).containers[0].resources.as_ref().unwrap();
        let requests = resources.requests.as_ref().unwrap();
        let limits = resources.limits.as_ref().unwrap();

        assert_eq!(requests["cpu"], Quantity("100m".to_string()));
        assert_eq!(requests["memory"], Quantity("100M".to_string()));
        assert_eq!(limits["cpu"], Quantity("500m".to_string()));
        assert_eq!(limits["memory"], Quantity("500M".to_string()));
    }

    #[test]
    fn container_without_image_is_rejected() {
        let spec = PodSpec {
            containers: vec![Container {
                name: "app".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let err = build_scan_job(&workload(), &spec, &options(), TRIVY_IMAGE).unwrap_err();
        assert!(matches!(err, ScanError::MissingImage { ref container, .. } if container == "app"));
    }
}
