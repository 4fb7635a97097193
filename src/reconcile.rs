//! Resource reconciler (spec §4.3, component C3): the four idempotent
//! "ensure" steps every run RPC performs before submitting a job.
//!
//! Grounded on `original_source/internal/executor/terraform.go`'s
//! `ensureNamespace`/`ensureUserRole`/`ensureAWSCredentials`. The plugin-cache
//! PVC step has no Go counterpart in the filtered source (it's implied by the
//! job template's volume mounts) and is grounded on
//! `createTerraformJobTemplate`'s tenant-qualified `<namespace>-plugin-cache`
//! volume instead.

use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use std::sync::Arc;

use crate::aws::CloudIdentityGateway;
use crate::errors::{ExecutorError, ReconcileStep, Result};
use crate::k8s::gateway::EXPIRATION_FORMAT;
use crate::k8s::KubernetesGateway;

const CREDENTIAL_REFRESH_THRESHOLD: ChronoDuration = ChronoDuration::minutes(10);

pub struct Reconciler {
    k8s: Arc<dyn KubernetesGateway>,
    aws: Arc<dyn CloudIdentityGateway>,
}

impl Reconciler {
    pub fn new(k8s: Arc<dyn KubernetesGateway>, aws: Arc<dyn CloudIdentityGateway>) -> Self {
        Reconciler { k8s, aws }
    }

    /// Ensures a tenant's namespace, IAM role, AWS credentials secret, and
    /// plugin-cache PVC all exist, in that order. The first failing step
    /// short-circuits the rest.
    pub async fn ensure_resources(&self, tenant: &str) -> Result<()> {
        self.ensure_namespace(tenant).await?;
        self.ensure_user_role(tenant).await?;
        self.ensure_aws_credentials(tenant).await?;
        self.ensure_plugin_cache(tenant).await?;
        Ok(())
    }

    async fn ensure_namespace(&self, tenant: &str) -> Result<()> {
        let exists = self
            .k8s
            .namespace_exists(tenant)
            .await
            .map_err(|err| ExecutorError::reconcile(ReconcileStep::Namespace, err))?;
        if !exists {
            self.k8s
                .create_namespace(tenant)
                .await
                .map_err(|err| ExecutorError::reconcile(ReconcileStep::Namespace, err))?;
        }
        Ok(())
    }

    async fn ensure_user_role(&self, tenant: &str) -> Result<()> {
        let exists = self.aws.role_exists(tenant).await?;
        if exists {
            return Ok(());
        }

        let caller_arn = self.aws.caller_arn().await?;
        let trust_policy = format!(
            r#"{{
    "Version": "2012-10-17",
    "Statement": [{{
        "Effect": "Allow",
        "Principal": {{ "AWS": "{caller_arn}" }},
        "Action": "sts:AssumeRole"
    }}]
}}"#
        );
        self.aws.create_role(tenant, &trust_policy).await
    }

    async fn ensure_aws_credentials(&self, tenant: &str) -> Result<()> {
        if let Some(secret) = self
            .k8s
            .get_secret(tenant, "aws-profile")
            .await
            .map_err(|err| ExecutorError::reconcile(ReconcileStep::Credentials, err))?
        {
            if let Some(still_fresh) = Self::credentials_still_fresh(&secret) {
                if still_fresh {
                    return Ok(());
                }
            }
        }

        let account_id = self.aws.account_id().await?;
        let role_arn = format!("arn:aws:iam::{account_id}:role{}{tenant}", crate::aws::gateway::ROLE_PATH);
        let creds = self.aws.assume_role(&role_arn, &format!("terraform-{tenant}")).await?;

        self.k8s
            .create_or_update_aws_creds_secret(tenant, &creds.access_key_id, &creds.secret_access_key, &creds.session_token, creds.expiration)
            .await
            .map_err(|err| ExecutorError::reconcile(ReconcileStep::Credentials, err))
    }

    async fn ensure_plugin_cache(&self, tenant: &str) -> Result<()> {
        self.k8s
            .ensure_plugin_cache_pvc(tenant, &crate::job_builder::plugin_cache_pvc_name(tenant))
            .await
            .map_err(|err| ExecutorError::reconcile(ReconcileStep::PluginCache, err))
    }

    /// `None` means the label was missing or unparsable and a refresh should
    /// be attempted; `Some(false)` means it parsed but has expired or is
    /// inside the refresh-ahead window.
    fn credentials_still_fresh(secret: &k8s_openapi::api::core::v1::Secret) -> Option<bool> {
        let labels = secret.metadata.labels.as_ref()?;
        let raw = labels.get(crate::k8s::gateway::EXPIRATION_LABEL)?;
        let naive = NaiveDateTime::parse_from_str(raw, EXPIRATION_FORMAT).ok()?;
        let expiration = naive.and_utc();
        Some(expiration - Utc::now() > CREDENTIAL_REFRESH_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Secret;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn secret_with_expiration(label: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                labels: Some(BTreeMap::from([("expirationDate".to_string(), label.to_string())])),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn fresh_credentials_outside_refresh_window() {
        let expiration = (Utc::now() + ChronoDuration::minutes(30)).format(EXPIRATION_FORMAT).to_string();
        let secret = secret_with_expiration(&expiration);
        assert_eq!(Reconciler::credentials_still_fresh(&secret), Some(true));
    }

    #[test]
    fn stale_credentials_inside_refresh_window() {
        let expiration = (Utc::now() + ChronoDuration::minutes(5)).format(EXPIRATION_FORMAT).to_string();
        let secret = secret_with_expiration(&expiration);
        assert_eq!(Reconciler::credentials_still_fresh(&secret), Some(false));
    }

    #[test]
    fn missing_label_forces_refresh() {
        let secret = Secret::default();
        assert_eq!(Reconciler::credentials_still_fresh(&secret), None);
    }

    #[test]
    fn unparsable_label_forces_refresh() {
        let secret = secret_with_expiration("not-a-date");
        assert_eq!(Reconciler::credentials_still_fresh(&secret), None);
    }

    #[tokio::test]
    async fn ensure_resources_creates_everything_from_scratch() {
        let mut k8s = crate::k8s::gateway::MockKubernetesGateway::new();
        k8s.expect_namespace_exists().returning(|_| Ok(false));
        k8s.expect_create_namespace().returning(|_| Ok(()));
        k8s.expect_get_secret().returning(|_, _| Ok(None));
        k8s.expect_create_or_update_aws_creds_secret().returning(|_, _, _, _, _| Ok(()));
        k8s.expect_ensure_plugin_cache_pvc().returning(|_, _| Ok(()));

        let mut aws = crate::aws::gateway::MockCloudIdentityGateway::new();
        aws.expect_role_exists().returning(|_| Ok(false));
        aws.expect_account_id().returning(|| Ok("123456789012".to_string()));
        aws.expect_caller_arn().returning(|| Ok("arn:aws:iam::123456789012:user/deployer".to_string()));
        aws.expect_create_role().withf(|_, policy| policy.contains("arn:aws:iam::123456789012:user/deployer")).returning(|_, _| Ok(()));
        aws.expect_assume_role().returning(|_, _| {
            Ok(crate::aws::TemporaryCredentials {
                access_key_id: "AKIA".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: "token".to_string(),
                expiration: Utc::now() + ChronoDuration::hours(1),
            })
        });

        let reconciler = Reconciler::new(Arc::new(k8s), Arc::new(aws));
        reconciler.ensure_resources("acme").await.unwrap();
    }

    #[tokio::test]
    async fn ensure_resources_skips_creation_when_everything_exists() {
        let mut k8s = crate::k8s::gateway::MockKubernetesGateway::new();
        k8s.expect_namespace_exists().returning(|_| Ok(true));
        k8s.expect_get_secret().returning(|_, _| {
            let fresh = (Utc::now() + ChronoDuration::hours(1)).format(EXPIRATION_FORMAT).to_string();
            Ok(Some(secret_with_expiration(&fresh)))
        });
        k8s.expect_ensure_plugin_cache_pvc().returning(|_, _| Ok(()));

        let mut aws = crate::aws::gateway::MockCloudIdentityGateway::new();
        aws.expect_role_exists().returning(|_| Ok(true));

        let reconciler = Reconciler::new(Arc::new(k8s), Arc::new(aws));
        reconciler.ensure_resources("acme").await.unwrap();
    }
}
