//! Tenant IAM role lifecycle and temporary credential minting (spec §4.2,
//! component C2).
//!
//! Grounded on `original_source/internal/awsclient/client.go`: the
//! `/app/uptimeai/` role path, the per-account S3 boundary policy ARN, the
//! compensating role delete when boundary attachment fails, and the
//! 3600-second (1 hour) assume-role session duration are all carried over
//! verbatim. The trust policy Principal uses `GetCallerIdentity`'s ARN rather
//! than the account root, matching `terraform.go`'s deliberate choice to
//! scope `AssumeRole` to the specific caller.

use async_trait::async_trait;
use aws_sdk_iam::types::Tag;
use chrono::{DateTime, Utc};

use crate::errors::{ExecutorError, Result};

use super::client::AwsClients;

pub const ROLE_PATH: &str = "/app/uptimeai/";
const ASSUME_ROLE_DURATION_SECS: i32 = 3600;

pub struct TemporaryCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CloudIdentityGateway: Send + Sync {
    async fn account_id(&self) -> Result<String>;
    async fn caller_arn(&self) -> Result<String>;
    async fn role_exists(&self, role_name: &str) -> Result<bool>;
    async fn create_role(&self, role_name: &str, trust_policy: &str) -> Result<()>;
    async fn assume_role(&self, role_arn: &str, session_name: &str) -> Result<TemporaryCredentials>;
}

pub struct IamGateway {
    clients: AwsClients,
}

impl IamGateway {
    pub fn new(clients: AwsClients) -> Self {
        IamGateway { clients }
    }

    fn boundary_policy_arn(account_id: &str) -> String {
        format!("arn:aws:iam::{account_id}:policy/s3-boundary")
    }

    async fn caller_identity(&self) -> Result<aws_sdk_sts::operation::get_caller_identity::GetCallerIdentityOutput> {
        self.clients
            .sts
            .get_caller_identity()
            .send()
            .await
            .map_err(|err| ExecutorError::reconcile(crate::errors::ReconcileStep::IamRole, anyhow::anyhow!(err)))
    }
}

#[async_trait]
impl CloudIdentityGateway for IamGateway {
    async fn account_id(&self) -> Result<String> {
        self.caller_identity()
            .await?
            .account
            .ok_or_else(|| ExecutorError::reconcile(crate::errors::ReconcileStep::IamRole, anyhow::anyhow!("caller identity missing account id")))
    }

    async fn caller_arn(&self) -> Result<String> {
        self.caller_identity()
            .await?
            .arn
            .ok_or_else(|| ExecutorError::reconcile(crate::errors::ReconcileStep::IamRole, anyhow::anyhow!("caller identity missing arn")))
    }

    async fn role_exists(&self, role_name: &str) -> Result<bool> {
        match self.clients.iam.get_role().role_name(role_name).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_entity_exception() {
                    Ok(false)
                } else {
                    Err(ExecutorError::reconcile(crate::errors::ReconcileStep::IamRole, anyhow::anyhow!(service_err)))
                }
            }
        }
    }

    async fn create_role(&self, role_name: &str, trust_policy: &str) -> Result<()> {
        let account_id = self.account_id().await?;
        let boundary_arn = Self::boundary_policy_arn(&account_id);

        self.clients
            .iam
            .create_role()
            .role_name(role_name)
            .path(ROLE_PATH)
            .assume_role_policy_document(trust_policy)
            .permissions_boundary(&boundary_arn)
            .tags(Tag::builder().key("UserId").value(role_name).build().map_err(|e| {
                ExecutorError::reconcile(crate::errors::ReconcileStep::IamRole, anyhow::anyhow!(e))
            })?)
            .tags(Tag::builder().key("CreatedBy").value("terraform-executor").build().map_err(|e| {
                ExecutorError::reconcile(crate::errors::ReconcileStep::IamRole, anyhow::anyhow!(e))
            })?)
            .tags(
                Tag::builder()
                    .key("CreatedAt")
                    .value(Utc::now().to_rfc3339())
                    .build()
                    .map_err(|e| ExecutorError::reconcile(crate::errors::ReconcileStep::IamRole, anyhow::anyhow!(e)))?,
            )
            .send()
            .await
            .map_err(|err| ExecutorError::reconcile(crate::errors::ReconcileStep::IamRole, anyhow::anyhow!(err)))?;

        if let Err(attach_err) = self.clients.iam.attach_role_policy().role_name(role_name).policy_arn(&boundary_arn).send().await {
            return match self.clients.iam.delete_role().role_name(role_name).send().await {
                Ok(_) => Err(ExecutorError::reconcile(crate::errors::ReconcileStep::IamRole, anyhow::anyhow!(attach_err))),
                Err(delete_err) => Err(ExecutorError::reconcile(
                    crate::errors::ReconcileStep::IamRole,
                    anyhow::anyhow!("failed to attach policy and cleanup role: {attach_err} (cleanup error: {delete_err})"),
                )),
            };
        }

        Ok(())
    }

    async fn assume_role(&self, role_arn: &str, session_name: &str) -> Result<TemporaryCredentials> {
        let output = self
            .clients
            .sts
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(session_name)
            .duration_seconds(ASSUME_ROLE_DURATION_SECS)
            .send()
            .await
            .map_err(|err| ExecutorError::reconcile(crate::errors::ReconcileStep::Credentials, anyhow::anyhow!(err)))?;

        let creds = output.credentials.ok_or_else(|| {
            ExecutorError::reconcile(crate::errors::ReconcileStep::Credentials, anyhow::anyhow!("no credentials returned"))
        })?;

        let expiration = DateTime::from_timestamp(creds.expiration.secs(), 0).ok_or_else(|| {
            ExecutorError::reconcile(crate::errors::ReconcileStep::Credentials, anyhow::anyhow!("invalid expiration timestamp"))
        })?;

        Ok(TemporaryCredentials {
            access_key_id: creds.access_key_id,
            secret_access_key: creds.secret_access_key,
            session_token: creds.session_token,
            expiration,
        })
    }
}
