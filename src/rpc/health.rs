//! Health RPC (spec §4 ambient surface): reports per-component connectivity
//! the way `original_source/internal/health/service.go::Check` does —
//! Kubernetes reachability and AWS account-identity reachability, rolled up
//! into an overall `SERVING`/`NOT_SERVING` status.

use std::collections::HashMap;
use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::aws::CloudIdentityGateway;
use crate::k8s::KubernetesGateway;

use super::proto::health_server::Health;
use super::proto::health_check_response::ServingStatus;
use super::proto::{HealthCheckRequest, HealthCheckResponse};

pub struct HealthSvc {
    k8s: Arc<dyn KubernetesGateway>,
    aws: Arc<dyn CloudIdentityGateway>,
}

impl HealthSvc {
    pub fn new(k8s: Arc<dyn KubernetesGateway>, aws: Arc<dyn CloudIdentityGateway>) -> Self {
        HealthSvc { k8s, aws }
    }
}

#[tonic::async_trait]
impl Health for HealthSvc {
    async fn check(&self, _request: Request<HealthCheckRequest>) -> Result<Response<HealthCheckResponse>, Status> {
        let mut components = HashMap::new();
        let mut errors = HashMap::new();

        match self.k8s.namespace_exists("kube-system").await {
            Ok(_) => {
                components.insert("kubernetes".to_string(), ServingStatus::Serving as i32);
            }
            Err(err) => {
                components.insert("kubernetes".to_string(), ServingStatus::NotServing as i32);
                errors.insert("kubernetes".to_string(), err.to_string());
            }
        }

        match self.aws.account_id().await {
            Ok(_) => {
                components.insert("aws".to_string(), ServingStatus::Serving as i32);
            }
            Err(err) => {
                components.insert("aws".to_string(), ServingStatus::NotServing as i32);
                errors.insert("aws".to_string(), err.to_string());
            }
        }

        let overall = if components.values().all(|status| *status == ServingStatus::Serving as i32) {
            ServingStatus::Serving
        } else {
            ServingStatus::NotServing
        };

        Ok(Response::new(HealthCheckResponse { status: overall as i32, components, errors }))
    }
}
