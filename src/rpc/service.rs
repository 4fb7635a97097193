//! `Executor` gRPC service implementation: wires the reconciler, job builder,
//! job runner, and configuration manager together behind the RPC surface
//! defined in `proto/executor.proto`.
//!
//! Grounded on `original_source/internal/executor/terraform.go`'s RPC
//! handlers (`Plan`/`Apply`/`Destroy`/`GetStateList`) for the run RPCs, and
//! `code.go` for the configuration CRUD RPCs. `GetTFShow` and `StreamLogs`
//! have no Go counterpart in the filtered source and are grounded directly
//! on spec.md §4.5/§4.6.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::info;

use crate::aws::CloudIdentityGateway;
use crate::config_mgmt::ConfigManager;
use crate::job_builder::{job_name, JobBuilder, RunKind};
use crate::job_runner::{JobRunner, RunOutcome};
use crate::k8s::KubernetesGateway;
use crate::reconcile::Reconciler;

use super::proto::executor_server::Executor;
use super::proto::*;

const JOB_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

type LogSender = mpsc::Sender<Result<LogChunk, Status>>;

pub struct ExecutorSvc {
    k8s: Arc<dyn KubernetesGateway>,
    kube_client: kube::Client,
    reconciler: Arc<Reconciler>,
    config_manager: Arc<ConfigManager>,
    log_streams: Mutex<HashMap<String, LogSender>>,
}

impl ExecutorSvc {
    pub fn new(k8s: Arc<dyn KubernetesGateway>, aws: Arc<dyn CloudIdentityGateway>, kube_client: kube::Client, bucket: String) -> Self {
        let reconciler = Arc::new(Reconciler::new(k8s.clone(), aws));
        let config_manager = Arc::new(ConfigManager::new(k8s.clone(), reconciler.clone(), bucket));
        ExecutorSvc { k8s, kube_client, reconciler, config_manager, log_streams: Mutex::new(HashMap::new()) }
    }

    async fn run(&self, tenant: &str, project: &str, request_id: &str, kind: RunKind) -> Result<RunOutcome, Status> {
        if let Err(err) = self.reconciler.ensure_resources(tenant).await {
            return Err(Status::ok_or_detail(err));
        }

        let timestamp = Utc::now().format(JOB_TIMESTAMP_FORMAT).to_string();
        let name = job_name(tenant, kind, &timestamp);

        let job = {
            let builder = JobBuilder::new(self.k8s.as_ref());
            builder
                .build(&name, tenant, project, kind)
                .await
                .map_err(|err| Status::ok_or_detail(crate::errors::ExecutorError::BuildFailure(err)))?
        };

        let sink = self.log_forwarder(request_id, tenant, project).await;

        let runner = JobRunner::new(self.k8s.clone(), self.kube_client.clone());
        let outcome = runner.run(tenant, &name, job, sink).await;

        self.log_streams.lock().await.remove(request_id);

        outcome.map_err(|err| Status::ok_or_detail(err))
    }

    /// If a client registered a `StreamLogs` call under `request_id`, spawns
    /// a task translating raw diff strings from the tailer into `LogChunk`
    /// messages on that stream, and returns the channel the tailer writes to.
    async fn log_forwarder(&self, request_id: &str, tenant: &str, project: &str) -> Option<mpsc::Sender<String>> {
        if request_id.is_empty() {
            return None;
        }
        let client_sender = self.log_streams.lock().await.get(request_id).cloned()?;

        let (tx, mut rx) = mpsc::channel::<String>(64);
        let request_id = request_id.to_string();
        let tenant = tenant.to_string();
        let project = project.to_string();

        tokio::spawn(async move {
            while let Some(log_line) = rx.recv().await {
                let chunk = LogChunk { request_id: request_id.clone(), user_id: tenant.clone(), project: project.clone(), log_line };
                if client_sender.send(Ok(chunk)).await.is_err() {
                    break;
                }
            }
        });

        Some(tx)
    }
}

/// Lifts a domain error into the category-prefixed string the reply's
/// `error` field carries, per spec §7 — run RPCs never fail at the
/// transport level, only `Timeout`/unrecoverable setup issues do.
trait StatusExt {
    fn ok_or_detail(err: crate::errors::ExecutorError) -> Status;
}

impl StatusExt for Status {
    fn ok_or_detail(err: crate::errors::ExecutorError) -> Status {
        Status::internal(err.to_reply_message())
    }
}

#[tonic::async_trait]
impl Executor for ExecutorSvc {
    async fn create_project(&self, request: Request<CreateProjectRequest>) -> Result<Response<CreateProjectResponse>, Status> {
        let req = request.into_inner();
        match self.config_manager.create_project(&req.user_id).await {
            Ok(()) => Ok(Response::new(CreateProjectResponse { success: true, error: String::new() })),
            Err(err) => Ok(Response::new(CreateProjectResponse { success: false, error: err.to_reply_message() })),
        }
    }

    async fn delete_project(&self, request: Request<DeleteProjectRequest>) -> Result<Response<DeleteProjectResponse>, Status> {
        let req = request.into_inner();
        match self.config_manager.delete_project(&req.user_id, &req.project).await {
            Ok(()) => Ok(Response::new(DeleteProjectResponse { success: true, error: String::new() })),
            Err(err) => Ok(Response::new(DeleteProjectResponse { success: false, error: err.to_reply_message() })),
        }
    }

    async fn append_code(&self, request: Request<AppendCodeRequest>) -> Result<Response<AppendCodeResponse>, Status> {
        let req = request.into_inner();
        match self.config_manager.append_code(&req.user_id, &req.project, &req.code).await {
            Ok(()) => Ok(Response::new(AppendCodeResponse { success: true, error: String::new() })),
            Err(err) => Ok(Response::new(AppendCodeResponse { success: false, error: err.to_reply_message() })),
        }
    }

    async fn clear_code(&self, request: Request<ClearCodeRequest>) -> Result<Response<ClearCodeResponse>, Status> {
        let req = request.into_inner();
        match self.config_manager.clear_code(&req.user_id, &req.project).await {
            Ok(()) => Ok(Response::new(ClearCodeResponse { success: true, error: String::new() })),
            Err(err) => Ok(Response::new(ClearCodeResponse { success: false, error: err.to_reply_message() })),
        }
    }

    async fn add_providers(&self, request: Request<AddProvidersRequest>) -> Result<Response<AddProvidersResponse>, Status> {
        let req = request.into_inner();
        let providers = req
            .providers
            .into_iter()
            .map(|p| crate::templates::ProviderSpec { name: p.name, source: p.source, version: p.version })
            .collect();
        match self.config_manager.add_providers(&req.user_id, &req.project, providers).await {
            Ok(()) => Ok(Response::new(AddProvidersResponse { success: true, error: String::new() })),
            Err(err) => Ok(Response::new(AddProvidersResponse { success: false, error: err.to_reply_message() })),
        }
    }

    async fn clear_providers(&self, request: Request<ClearProvidersRequest>) -> Result<Response<ClearProvidersResponse>, Status> {
        let req = request.into_inner();
        match self.config_manager.clear_providers(&req.user_id, &req.project).await {
            Ok(()) => Ok(Response::new(ClearProvidersResponse { success: true, error: String::new() })),
            Err(err) => Ok(Response::new(ClearProvidersResponse { success: false, error: err.to_reply_message() })),
        }
    }

    async fn add_secret_env(&self, request: Request<AddSecretEnvRequest>) -> Result<Response<AddSecretEnvResponse>, Status> {
        let req = request.into_inner();
        let entries: BTreeMap<String, String> = req.secrets.into_iter().map(|s| (s.name, s.value)).collect();
        match self.config_manager.add_secret_env(&req.user_id, &req.project, entries).await {
            Ok(()) => Ok(Response::new(AddSecretEnvResponse { success: true, error: String::new() })),
            Err(err) => Ok(Response::new(AddSecretEnvResponse { success: false, error: err.to_reply_message() })),
        }
    }

    async fn clear_secret_env(&self, request: Request<ClearSecretEnvRequest>) -> Result<Response<ClearSecretEnvResponse>, Status> {
        let req = request.into_inner();
        match self.config_manager.clear_secret_env(&req.user_id, &req.project).await {
            Ok(()) => Ok(Response::new(ClearSecretEnvResponse { success: true, error: String::new() })),
            Err(err) => Ok(Response::new(ClearSecretEnvResponse { success: false, error: err.to_reply_message() })),
        }
    }

    async fn add_secret_var(&self, request: Request<AddSecretVarRequest>) -> Result<Response<AddSecretVarResponse>, Status> {
        let req = request.into_inner();
        let entries: BTreeMap<String, String> = req.secrets.into_iter().map(|s| (s.name, s.value)).collect();
        match self.config_manager.add_secret_vars(&req.user_id, &req.project, entries).await {
            Ok(()) => Ok(Response::new(AddSecretVarResponse { success: true, error: String::new() })),
            Err(err) => Ok(Response::new(AddSecretVarResponse { success: false, error: err.to_reply_message() })),
        }
    }

    async fn clear_secret_vars(&self, request: Request<ClearSecretVarsRequest>) -> Result<Response<ClearSecretVarsResponse>, Status> {
        let req = request.into_inner();
        match self.config_manager.clear_secret_vars(&req.user_id, &req.project).await {
            Ok(()) => Ok(Response::new(ClearSecretVarsResponse { success: true, error: String::new() })),
            Err(err) => Ok(Response::new(ClearSecretVarsResponse { success: false, error: err.to_reply_message() })),
        }
    }

    async fn get_main_tf(&self, request: Request<GetMainTfRequest>) -> Result<Response<GetMainTfResponse>, Status> {
        let req = request.into_inner();
        match self.config_manager.get_main_tf(&req.user_id, &req.project).await {
            Ok(content) => Ok(Response::new(GetMainTfResponse { success: true, content, error: String::new() })),
            Err(err) => Ok(Response::new(GetMainTfResponse { success: false, content: String::new(), error: err.to_reply_message() })),
        }
    }

    async fn plan(&self, request: Request<PlanRequest>) -> Result<Response<PlanResponse>, Status> {
        let req = request.into_inner();
        info!(user_id = %req.user_id, project = %req.project, "plan requested");
        match self.run(&req.user_id, &req.project, &req.request_id, RunKind::Plan).await {
            Ok(outcome) => Ok(Response::new(PlanResponse { success: outcome.success, plan_output: outcome.output, error: outcome.error.unwrap_or_default() })),
            Err(status) => Ok(Response::new(PlanResponse { success: false, plan_output: String::new(), error: status.message().to_string() })),
        }
    }

    async fn apply(&self, request: Request<ApplyRequest>) -> Result<Response<ApplyResponse>, Status> {
        let req = request.into_inner();
        info!(user_id = %req.user_id, project = %req.project, "apply requested");
        match self.run(&req.user_id, &req.project, &req.request_id, RunKind::Apply).await {
            Ok(outcome) => Ok(Response::new(ApplyResponse { success: outcome.success, apply_output: outcome.output, error: outcome.error.unwrap_or_default() })),
            Err(status) => Ok(Response::new(ApplyResponse { success: false, apply_output: String::new(), error: status.message().to_string() })),
        }
    }

    async fn destroy(&self, request: Request<DestroyRequest>) -> Result<Response<DestroyResponse>, Status> {
        let req = request.into_inner();
        info!(user_id = %req.user_id, project = %req.project, "destroy requested");
        match self.run(&req.user_id, &req.project, &req.request_id, RunKind::Destroy).await {
            Ok(outcome) => Ok(Response::new(DestroyResponse { success: outcome.success, destroy_output: outcome.output, error: outcome.error.unwrap_or_default() })),
            Err(status) => Ok(Response::new(DestroyResponse { success: false, destroy_output: String::new(), error: status.message().to_string() })),
        }
    }

    async fn get_state_list(&self, request: Request<GetStateListRequest>) -> Result<Response<GetStateListResponse>, Status> {
        let req = request.into_inner();
        match self.run(&req.user_id, &req.project, &req.request_id, RunKind::StateList).await {
            Ok(outcome) => {
                Ok(Response::new(GetStateListResponse { success: outcome.success, state_list_output: outcome.output, error: outcome.error.unwrap_or_default() }))
            }
            Err(status) => Ok(Response::new(GetStateListResponse { success: false, state_list_output: String::new(), error: status.message().to_string() })),
        }
    }

    async fn get_tf_show(&self, request: Request<GetTfShowRequest>) -> Result<Response<GetTfShowResponse>, Status> {
        let req = request.into_inner();
        match self.run(&req.user_id, &req.project, &req.request_id, RunKind::Show).await {
            Ok(outcome) => Ok(Response::new(GetTfShowResponse { success: outcome.success, content: outcome.output, error: outcome.error.unwrap_or_default() })),
            Err(status) => Ok(Response::new(GetTfShowResponse { success: false, content: String::new(), error: status.message().to_string() })),
        }
    }

    type StreamLogsStream = ReceiverStream<Result<LogChunk, Status>>;

    async fn stream_logs(&self, request: Request<StreamLogsRequest>) -> Result<Response<Self::StreamLogsStream>, Status> {
        let req = request.into_inner();
        if req.request_id.is_empty() {
            return Err(Status::invalid_argument("request_id is required"));
        }

        let (tx, rx) = mpsc::channel(64);
        self.log_streams.lock().await.insert(req.request_id.clone(), tx);
        info!(request_id = %req.request_id, "log stream attached");

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
