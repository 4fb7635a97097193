//! Job template construction (spec §4.4, component C4): a pure function from
//! (tenant, project, run kind, terraform args) to a `batch/v1` `Job` object.
//!
//! Grounded on `original_source/internal/executor/k8sjobs.go::createTerraformJobTemplate`.
//! Volume/volume-mount wiring (plugin-cache PVC, aws-creds secret, conditional
//! main.tf/versions.tf/variables.tf ConfigMaps) and the resource envelope are
//! carried over field for field; only the job-naming scheme is changed (see
//! `job_name`, SPEC_FULL.md §7).

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EnvVar, KeyToPath, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, ResourceRequirements,
    SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

use crate::k8s::KubernetesGateway;

pub const PLUGIN_CACHE_DIR: &str = "/root/.terraform.d/plugin-cache";
const RUNNER_IMAGE: &str = "hashicorp/terraform:latest";
const TF_FILE_NAMES: [&str; 3] = ["main.tf", "versions.tf", "variables.tf"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Plan,
    Apply,
    Destroy,
    StateList,
    Show,
}

impl RunKind {
    pub fn label(self) -> &'static str {
        match self {
            RunKind::Plan => "plan",
            RunKind::Apply => "apply",
            RunKind::Destroy => "destroy",
            RunKind::StateList => "state-list",
            RunKind::Show => "show",
        }
    }

    /// The terraform subcommand invocation appended after `init`.
    pub fn terraform_args(self) -> Vec<String> {
        match self {
            RunKind::Plan => vec!["plan".into(), "-input=false".into(), "-no-color".into()],
            RunKind::Apply => vec!["apply".into(), "-input=false".into(), "-no-color".into(), "-auto-approve".into()],
            RunKind::Destroy => vec!["destroy".into(), "-input=false".into(), "-no-color".into(), "-auto-approve".into()],
            RunKind::StateList => vec!["state".into(), "list".into(), "-no-color".into()],
            RunKind::Show => vec!["show".into(), "-no-color".into()],
        }
    }
}

/// Tenant-qualified job name for every run kind. Unlike the Go source (which
/// only qualifies Plan/GetStateList job names by tenant and lets Apply/Destroy
/// collide across tenants), every kind here carries the tenant id — see
/// SPEC_FULL.md §7 for the rationale.
pub fn job_name(tenant: &str, kind: RunKind, timestamp: &str) -> String {
    format!("terraform-{}-{tenant}-{timestamp}", kind.label())
}

/// Tenant-qualified plugin-cache PVC name, matching
/// `original_source/internal/executor/k8sjobs.go`'s `<namespace>-plugin-cache`
/// convention — one PVC per tenant, not a single PVC shared across tenants.
pub fn plugin_cache_pvc_name(tenant: &str) -> String {
    format!("{tenant}-plugin-cache")
}

pub struct JobBuilder<'a> {
    gateway: &'a dyn KubernetesGateway,
}

impl<'a> JobBuilder<'a> {
    pub fn new(gateway: &'a dyn KubernetesGateway) -> Self {
        JobBuilder { gateway }
    }

    pub async fn build(&self, name: &str, tenant: &str, project: &str, kind: RunKind) -> anyhow::Result<Job> {
        let env_vars = self.env_vars(tenant, project).await?;
        let (volume_mounts, volumes) = self.volumes(tenant, project).await?;

        let args = kind.terraform_args().join(" ");
        let command = format!("terraform init -no-color -input=false && terraform {args}");

        let labels = BTreeMap::from([
            ("app".to_string(), "terraform-executor".to_string()),
            ("user".to_string(), tenant.to_string()),
            ("project".to_string(), project.to_string()),
            ("type".to_string(), kind.label().to_string()),
        ]);

        Ok(Job {
            metadata: ObjectMeta { name: Some(name.to_string()), namespace: Some(tenant.to_string()), labels: Some(labels.clone()), ..Default::default() },
            spec: Some(JobSpec {
                backoff_limit: Some(0),
                ttl_seconds_after_finished: Some(120),
                completions: Some(1),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta { labels: Some(labels), ..Default::default() }),
                    spec: Some(PodSpec {
                        restart_policy: Some("Never".to_string()),
                        containers: vec![Container {
                            name: "runner".to_string(),
                            working_dir: Some("/root".to_string()),
                            image: Some(RUNNER_IMAGE.to_string()),
                            command: Some(vec!["/bin/sh".to_string(), "-c".to_string(), command]),
                            env: Some(env_vars),
                            volume_mounts: Some(volume_mounts),
                            resources: Some(ResourceRequirements {
                                limits: Some(BTreeMap::from([
                                    ("cpu".to_string(), Quantity("500m".to_string())),
                                    ("memory".to_string(), Quantity("1Gi".to_string())),
                                ])),
                                requests: Some(BTreeMap::from([
                                    ("cpu".to_string(), Quantity("200m".to_string())),
                                    ("memory".to_string(), Quantity("512Mi".to_string())),
                                ])),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }],
                        volumes: Some(volumes),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    async fn env_vars(&self, tenant: &str, project: &str) -> anyhow::Result<Vec<EnvVar>> {
        let mut env_vars = Vec::new();
        let secret_name = format!("{project}.env");
        if let Some(secret) = self.gateway.get_secret(tenant, &secret_name).await? {
            if let Some(data) = secret.data {
                for (key, value) in data {
                    env_vars.push(EnvVar { name: key, value: Some(String::from_utf8_lossy(&value.0).into_owned()), ..Default::default() });
                }
            }
        }
        env_vars.push(EnvVar { name: "TF_IN_AUTOMATION".to_string(), value: Some("true".to_string()), ..Default::default() });
        env_vars.push(EnvVar { name: "TF_PLUGIN_CACHE_DIR".to_string(), value: Some(PLUGIN_CACHE_DIR.to_string()), ..Default::default() });
        Ok(env_vars)
    }

    async fn volumes(&self, tenant: &str, project: &str) -> anyhow::Result<(Vec<VolumeMount>, Vec<Volume>)> {
        let mut mounts = vec![
            VolumeMount { name: "plugin-cache".to_string(), mount_path: PLUGIN_CACHE_DIR.to_string(), ..Default::default() },
            VolumeMount { name: "aws-creds".to_string(), mount_path: "/root/.aws".to_string(), ..Default::default() },
        ];
        let mut volumes = vec![
            Volume {
                name: "plugin-cache".to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: plugin_cache_pvc_name(tenant),
                    read_only: Some(false),
                }),
                ..Default::default()
            },
            Volume {
                name: "aws-creds".to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some("aws-profile".to_string()),
                    items: Some(vec![KeyToPath { key: "credentials".to_string(), path: "credentials".to_string(), ..Default::default() }]),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ];

        for tf_file in TF_FILE_NAMES {
            let config_map_name = format!("{project}.{tf_file}");
            if self.gateway.get_config_map(tenant, &config_map_name).await?.is_some() {
                let volume_name = tf_file.trim_end_matches(".tf").to_string();
                mounts.push(VolumeMount {
                    name: volume_name.clone(),
                    mount_path: format!("/root/{tf_file}"),
                    sub_path: Some(tf_file.to_string()),
                    ..Default::default()
                });
                volumes.push(Volume {
                    name: volume_name,
                    config_map: Some(ConfigMapVolumeSource { name: config_map_name, ..Default::default() }),
                    ..Default::default()
                });
            }
        }

        Ok((mounts, volumes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_name_is_tenant_qualified_for_every_kind() {
        for kind in [RunKind::Plan, RunKind::Apply, RunKind::Destroy, RunKind::StateList, RunKind::Show] {
            let name = job_name("acme", kind, "20260727120000");
            assert!(name.contains("acme"), "{name} missing tenant for {kind:?}");
            assert!(name.starts_with(&format!("terraform-{}-", kind.label())));
        }
    }

    #[test]
    fn apply_args_auto_approve() {
        assert_eq!(RunKind::Apply.terraform_args(), vec!["apply", "-input=false", "-no-color", "-auto-approve"]);
    }
}
