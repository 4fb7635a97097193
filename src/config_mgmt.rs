//! Configuration-management CRUD (spec §4.6's write side): the get-or-create
//! and clear operations that maintain a project's `main.tf`, `versions.tf`,
//! `variables.tf`, and `<project>.env` Secret.
//!
//! Grounded on `original_source/internal/executor/code.go` field for field:
//! `AppendCode` newline-concatenates onto an existing ConfigMap key,
//! `AddSecretVar` appends HCL `variable` blocks, `DeleteProject` fans out to
//! every `Clear*` call and joins failures with `"; "`.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::Result;
use crate::k8s::KubernetesGateway;
use crate::reconcile::Reconciler;
use crate::templates::{render_versions_tf, ProviderSpec, TerraformTemplateData};

const MAIN_TF_KEY: &str = "main.tf";
const VERSIONS_TF_KEY: &str = "versions.tf";
const VARIABLES_TF_KEY: &str = "variables.tf";

pub struct ConfigManager {
    k8s: Arc<dyn KubernetesGateway>,
    reconciler: Arc<Reconciler>,
    bucket: String,
}

impl ConfigManager {
    pub fn new(k8s: Arc<dyn KubernetesGateway>, reconciler: Arc<Reconciler>, bucket: String) -> Self {
        ConfigManager { k8s, reconciler, bucket }
    }

    fn config_map_name(project: &str, suffix: &str) -> String {
        format!("{project}.{suffix}")
    }

    pub async fn append_code(&self, tenant: &str, project: &str, code: &str) -> Result<()> {
        self.reconciler.ensure_resources(tenant).await?;
        let name = Self::config_map_name(project, MAIN_TF_KEY);

        match self.k8s.get_config_map(tenant, &name).await? {
            Some(cm) => {
                let existing = cm.data.as_ref().and_then(|d| d.get(MAIN_TF_KEY)).cloned().unwrap_or_default();
                let updated = format!("{existing}\n{code}");
                self.k8s.update_config_map(tenant, &name, MAIN_TF_KEY, &updated).await
            }
            None => self.k8s.create_config_map(tenant, &name, MAIN_TF_KEY, code).await,
        }
    }

    pub async fn clear_code(&self, tenant: &str, project: &str) -> Result<()> {
        self.reconciler.ensure_resources(tenant).await?;
        self.k8s.delete_config_map(tenant, &Self::config_map_name(project, MAIN_TF_KEY)).await
    }

    pub async fn add_providers(&self, tenant: &str, project: &str, providers: Vec<ProviderSpec>) -> Result<()> {
        self.reconciler.ensure_resources(tenant).await?;

        let data = TerraformTemplateData { bucket: self.bucket.clone(), user_id: tenant.to_string(), project: project.to_string(), providers };
        let rendered = render_versions_tf(&data).map_err(crate::errors::ExecutorError::Other)?;

        let name = Self::config_map_name(project, VERSIONS_TF_KEY);
        match self.k8s.get_config_map(tenant, &name).await? {
            Some(_) => self.k8s.update_config_map(tenant, &name, VERSIONS_TF_KEY, &rendered).await,
            None => self.k8s.create_config_map(tenant, &name, VERSIONS_TF_KEY, &rendered).await,
        }
    }

    pub async fn clear_providers(&self, tenant: &str, project: &str) -> Result<()> {
        self.reconciler.ensure_resources(tenant).await?;
        self.k8s.delete_config_map(tenant, &Self::config_map_name(project, VERSIONS_TF_KEY)).await
    }

    pub async fn add_secret_env(&self, tenant: &str, project: &str, entries: BTreeMap<String, String>) -> Result<()> {
        self.reconciler.ensure_resources(tenant).await?;
        let name = format!("{project}.env");

        let mut merged = match self.k8s.get_secret(tenant, &name).await? {
            Some(secret) => secret
                .string_data
                .or_else(|| secret.data.map(|d| d.into_iter().map(|(k, v)| (k, String::from_utf8_lossy(&v.0).into_owned())).collect()))
                .unwrap_or_default(),
            None => BTreeMap::new(),
        };
        merged.extend(entries);

        self.k8s.create_or_update_secret(tenant, &name, merged).await
    }

    pub async fn clear_secret_env(&self, tenant: &str, project: &str) -> Result<()> {
        self.reconciler.ensure_resources(tenant).await?;
        self.k8s.delete_secret(tenant, &format!("{project}.env")).await
    }

    pub async fn add_secret_vars(&self, tenant: &str, project: &str, secrets: BTreeMap<String, String>) -> Result<()> {
        self.reconciler.ensure_resources(tenant).await?;
        let name = Self::config_map_name(project, VARIABLES_TF_KEY);

        let existing = self.k8s.get_config_map(tenant, &name).await?.and_then(|cm| cm.data.and_then(|d| d.get(VARIABLES_TF_KEY).cloned()));
        let mut content = existing.clone().unwrap_or_default();
        for (key, value) in &secrets {
            content.push_str(&Self::variable_block(key, value));
        }

        match existing {
            Some(_) => self.k8s.update_config_map(tenant, &name, VARIABLES_TF_KEY, &content).await,
            None => self.k8s.create_config_map(tenant, &name, VARIABLES_TF_KEY, &content).await,
        }
    }

    fn variable_block(name: &str, value: &str) -> String {
        format!("variable \"{name}\" {{\n  type = string\n  default = \"{value}\"\n}}\n")
    }

    pub async fn clear_secret_vars(&self, tenant: &str, project: &str) -> Result<()> {
        self.reconciler.ensure_resources(tenant).await?;
        self.k8s.delete_config_map(tenant, &Self::config_map_name(project, VARIABLES_TF_KEY)).await
    }

    pub async fn create_project(&self, tenant: &str) -> Result<()> {
        self.reconciler.ensure_resources(tenant).await
    }

    pub async fn delete_project(&self, tenant: &str, project: &str) -> Result<()> {
        self.reconciler.ensure_resources(tenant).await?;

        let mut failures = Vec::new();
        if let Err(err) = self.clear_code(tenant, project).await {
            failures.push(format!("failed to clear code: {err}"));
        }
        if let Err(err) = self.clear_providers(tenant, project).await {
            failures.push(format!("failed to clear providers: {err}"));
        }
        if let Err(err) = self.clear_secret_vars(tenant, project).await {
            failures.push(format!("failed to clear secret variables: {err}"));
        }
        if let Err(err) = self.clear_secret_env(tenant, project).await {
            failures.push(format!("failed to clear secret env variables: {err}"));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(crate::errors::ExecutorError::Other(anyhow::anyhow!(failures.join("; "))))
        }
    }

    pub async fn get_main_tf(&self, tenant: &str, project: &str) -> Result<String> {
        self.reconciler.ensure_resources(tenant).await?;
        let name = Self::config_map_name(project, MAIN_TF_KEY);

        let cm = self
            .k8s
            .get_config_map(tenant, &name)
            .await?
            .ok_or_else(|| crate::errors::ExecutorError::NotFound(format!("main.tf for project {project}")))?;

        cm.data
            .and_then(|d| d.get(MAIN_TF_KEY).cloned())
            .ok_or_else(|| crate::errors::ExecutorError::NotFound(format!("main.tf for project {project}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::gateway::MockCloudIdentityGateway;
    use crate::k8s::gateway::MockKubernetesGateway;
    use k8s_openapi::api::core::v1::ConfigMap;

    #[test]
    fn variable_block_matches_hcl_shape() {
        let block = ConfigManager::variable_block("api_key", "secret-value");
        assert_eq!(block, "variable \"api_key\" {\n  type = string\n  default = \"secret-value\"\n}\n");
    }

    /// A `Reconciler` whose `ensure_resources` is a no-op because every
    /// tenant resource is already reported as present. Backed by its own
    /// mock since `ConfigManager` holds a separate gateway handle from the
    /// one it hands to its `Reconciler`.
    fn passthrough_reconciler() -> Arc<Reconciler> {
        let mut k8s = MockKubernetesGateway::new();
        k8s.expect_namespace_exists().returning(|_| Ok(true));
        k8s.expect_ensure_plugin_cache_pvc().returning(|_, _| Ok(()));
        let mut aws = MockCloudIdentityGateway::new();
        aws.expect_role_exists().returning(|_| Ok(true));
        Arc::new(Reconciler::new(Arc::new(k8s), Arc::new(aws)))
    }

    #[tokio::test]
    async fn append_code_creates_config_map_when_absent() {
        let mut k8s = MockKubernetesGateway::new();
        k8s.expect_get_config_map().returning(|_, _| Ok(None));
        k8s.expect_create_config_map().withf(|_, _, _, content| *content == "resource \"x\" {}").returning(|_, _, _, _| Ok(()));

        let manager = ConfigManager::new(Arc::new(k8s), passthrough_reconciler(), "bucket".to_string());
        manager.append_code("acme", "infra", "resource \"x\" {}").await.unwrap();
    }

    #[tokio::test]
    async fn append_code_appends_newline_when_present() {
        let mut k8s = MockKubernetesGateway::new();
        k8s.expect_get_config_map().returning(|_, _| {
            Ok(Some(ConfigMap { data: Some(BTreeMap::from([("main.tf".to_string(), "existing".to_string())])), ..Default::default() }))
        });
        k8s.expect_update_config_map().withf(|_, _, _, content| *content == "existing\nmore").returning(|_, _, _, _| Ok(()));

        let manager = ConfigManager::new(Arc::new(k8s), passthrough_reconciler(), "bucket".to_string());
        manager.append_code("acme", "infra", "more").await.unwrap();
    }
}
