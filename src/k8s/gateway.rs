//! Typed wrapper around the cluster API (spec §4.1, component C1).
//!
//! Every method distinguishes *not-found* from other failures: `get_*`
//! operations return `Ok(None)` when the object is absent, and `create_*`
//! operations treat AlreadyExists as success, per the "idiomatic creation"
//! note in spec.md §9. Higher layers (the reconciler, the job builder) never
//! see a provider-specific error type.
//!
//! Grounded on `original_source/internal/k8s/methods.go`, adapted to async
//! `kube`-rs `Api<K>` calls in the style of `services/kube_client.rs` (see
//! its `is_error_code` helper).

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Secret};
use kube::api::{DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use std::collections::BTreeMap;

use crate::errors::{ExecutorError, Result};

pub const EXPIRATION_LABEL: &str = "expirationDate";
pub const EXPIRATION_FORMAT: &str = "%Y%m%d-%H%M%S";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KubernetesGateway: Send + Sync {
    async fn namespace_exists(&self, name: &str) -> Result<bool>;
    async fn create_namespace(&self, name: &str) -> Result<()>;

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;
    async fn create_config_map(&self, namespace: &str, name: &str, key: &str, content: &str) -> Result<()>;
    async fn update_config_map(&self, namespace: &str, name: &str, key: &str, content: &str) -> Result<()>;
    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;
    async fn create_or_update_secret(&self, namespace: &str, name: &str, data: BTreeMap<String, String>) -> Result<()>;
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;

    async fn create_or_update_aws_creds_secret(
        &self,
        namespace: &str,
        access_key: &str,
        secret_key: &str,
        session_token: &str,
        expiration: DateTime<Utc>,
    ) -> Result<()>;

    async fn ensure_plugin_cache_pvc(&self, namespace: &str, name: &str) -> Result<()>;

    async fn create_job(&self, namespace: &str, job: Job) -> Result<()>;
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>>;
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()>;

    async fn list_pods_by_label(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>>;
    async fn get_pod_logs(&self, namespace: &str, pod_name: &str, container: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
}

impl KubeGateway {
    pub fn new(client: Client) -> Self {
        KubeGateway { client }
    }

    fn is_not_found(err: &kube::Error) -> bool {
        matches!(err, kube::Error::Api(resp) if resp.code == 404)
    }

    fn is_conflict(err: &kube::Error) -> bool {
        matches!(err, kube::Error::Api(resp) if resp.code == 409)
    }
}

#[async_trait]
impl KubernetesGateway for KubeGateway {
    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        let api: Api<k8s_openapi::api::core::v1::Namespace> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(_) => Ok(true),
            Err(err) if Self::is_not_found(&err) => Ok(false),
            Err(err) => Err(ExecutorError::Other(err.into())),
        }
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        let api: Api<k8s_openapi::api::core::v1::Namespace> = Api::all(self.client.clone());
        let ns = k8s_openapi::api::core::v1::Namespace {
            metadata: kube::api::ObjectMeta { name: Some(name.to_string()), ..Default::default() },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => Ok(()),
            Err(err) if Self::is_conflict(&err) => Ok(()),
            Err(err) => Err(ExecutorError::Other(err.into())),
        }
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(cm) => Ok(Some(cm)),
            Err(err) if Self::is_not_found(&err) => Ok(None),
            Err(err) => Err(ExecutorError::Other(err.into())),
        }
    }

    async fn create_config_map(&self, namespace: &str, name: &str, key: &str, content: &str) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let cm = ConfigMap {
            metadata: kube::api::ObjectMeta { name: Some(name.to_string()), ..Default::default() },
            data: Some(BTreeMap::from([(key.to_string(), content.to_string())])),
            ..Default::default()
        };
        match api.create(&PostParams::default(), &cm).await {
            Ok(_) => Ok(()),
            Err(err) if Self::is_conflict(&err) => self.update_config_map(namespace, name, key, content).await,
            Err(err) => Err(ExecutorError::Other(err.into())),
        }
    }

    async fn update_config_map(&self, namespace: &str, name: &str, key: &str, content: &str) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "data": { key: content } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|err| ExecutorError::Other(err.into()))
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(err) if Self::is_not_found(&err) => Ok(()),
            Err(err) => Err(ExecutorError::Other(err.into())),
        }
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(err) if Self::is_not_found(&err) => Ok(None),
            Err(err) => Err(ExecutorError::Other(err.into())),
        }
    }

    async fn create_or_update_secret(&self, namespace: &str, name: &str, data: BTreeMap<String, String>) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = Secret {
            metadata: kube::api::ObjectMeta { name: Some(name.to_string()), ..Default::default() },
            string_data: Some(data),
            ..Default::default()
        };
        match api.create(&PostParams::default(), &secret).await {
            Ok(_) => Ok(()),
            Err(err) if Self::is_conflict(&err) => {
                let patch = serde_json::json!({ "stringData": secret.string_data });
                api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await
                    .map(|_| ())
                    .map_err(|err| ExecutorError::Other(err.into()))
            }
            Err(err) => Err(ExecutorError::Other(err.into())),
        }
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(err) if Self::is_not_found(&err) => Ok(()),
            Err(err) => Err(ExecutorError::Other(err.into())),
        }
    }

    async fn create_or_update_aws_creds_secret(
        &self,
        namespace: &str,
        access_key: &str,
        secret_key: &str,
        session_token: &str,
        expiration: DateTime<Utc>,
    ) -> Result<()> {
        let credentials = format!(
            "[tfstate]\naws_access_key_id = {access_key}\naws_secret_access_key = {secret_key}\naws_session_token = {session_token}\n"
        );

        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = Secret {
            metadata: kube::api::ObjectMeta {
                name: Some("aws-profile".to_string()),
                labels: Some(BTreeMap::from([(
                    EXPIRATION_LABEL.to_string(),
                    expiration.format(EXPIRATION_FORMAT).to_string(),
                )])),
                ..Default::default()
            },
            string_data: Some(BTreeMap::from([("credentials".to_string(), credentials)])),
            ..Default::default()
        };

        match api.create(&PostParams::default(), &secret).await {
            Ok(_) => Ok(()),
            Err(err) if Self::is_conflict(&err) => {
                // Labels are immutable via a strategic merge of `data`/`stringData`
                // alone, so fetch the live object for its `resourceVersion` and
                // replace that one rather than a freshly-constructed copy.
                let mut existing = api.get("aws-profile").await.map_err(|err| ExecutorError::Other(err.into()))?;
                existing.metadata.labels = secret.metadata.labels;
                existing.string_data = secret.string_data;
                existing.data = None;
                api.replace("aws-profile", &PostParams::default(), &existing)
                    .await
                    .map(|_| ())
                    .map_err(|err| ExecutorError::Other(err.into()))
            }
            Err(err) => Err(ExecutorError::Other(err.into())),
        }
    }

    async fn ensure_plugin_cache_pvc(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let pvc = PersistentVolumeClaim {
            metadata: kube::api::ObjectMeta { name: Some(name.to_string()), ..Default::default() },
            spec: Some(k8s_openapi::api::core::v1::PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                resources: Some(k8s_openapi::api::core::v1::VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        k8s_openapi::apimachinery::pkg::api::resource::Quantity("1Gi".to_string()),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        match api.create(&PostParams::default(), &pvc).await {
            Ok(_) => Ok(()),
            Err(err) if Self::is_conflict(&err) => Ok(()),
            Err(err) => Err(ExecutorError::Other(err.into())),
        }
    }

    async fn create_job(&self, namespace: &str, job: Job) -> Result<()> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), &job)
            .await
            .map(|_| ())
            .map_err(|err| ExecutorError::SubmitFailure(err.into()))
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(job) => Ok(Some(job)),
            Err(err) if Self::is_not_found(&err) => Ok(None),
            Err(err) => Err(ExecutorError::Other(err.into())),
        }
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(err) if Self::is_not_found(&err) => Ok(()),
            Err(err) => Err(ExecutorError::Other(err.into())),
        }
    }

    async fn list_pods_by_label(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|err| ExecutorError::Other(err.into()))?;
        Ok(pods.items)
    }

    async fn get_pod_logs(&self, namespace: &str, pod_name: &str, container: &str) -> Result<String> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams { container: Some(container.to_string()), ..Default::default() };
        api.logs(pod_name, &params)
            .await
            .context("fetching pod logs")
            .map_err(ExecutorError::Other)
    }
}
