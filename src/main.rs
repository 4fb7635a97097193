//! Entrypoint: bootstraps logging, the Kubernetes and AWS clients, and the
//! gRPC server (spec §2/§3). Grounded on `original_source/cmd/server/main.go`
//! and `api/handlers/main.go`.

use std::sync::Arc;

use terraform_executor::aws::{AwsClients, IamGateway};
use terraform_executor::config::Settings;
use terraform_executor::k8s::{client, KubeGateway};
use terraform_executor::rpc::health::HealthSvc;
use terraform_executor::rpc::proto::executor_server::ExecutorServer;
use terraform_executor::rpc::proto::health_server::HealthServer;
use terraform_executor::rpc::proto::FILE_DESCRIPTOR_SET;
use terraform_executor::rpc::ExecutorSvc;

use tonic::transport::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env();
    init_logging(settings.debug);
    info!(listen_addr = %settings.listen_addr, bucket = %settings.bucket_name, debug = settings.debug, "starting terraform-executor");

    let kube_client = client::connect(settings.kubeconfig.as_deref()).await?;
    let k8s: Arc<dyn terraform_executor::k8s::KubernetesGateway> = Arc::new(KubeGateway::new(kube_client.clone()));

    let aws_clients = AwsClients::from_env().await;
    let aws: Arc<dyn terraform_executor::aws::CloudIdentityGateway> = Arc::new(IamGateway::new(aws_clients));

    let executor_svc = ExecutorSvc::new(k8s.clone(), aws.clone(), kube_client, settings.bucket_name.clone());
    let health_svc = HealthSvc::new(k8s, aws);

    let reflection_service = tonic_reflection::server::Builder::configure().register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET).build()?;

    let addr = settings.listen_addr.parse()?;
    Server::builder()
        .add_service(ExecutorServer::new(executor_svc))
        .add_service(HealthServer::new(health_svc))
        .add_service(reflection_service)
        .serve(addr)
        .await?;

    Ok(())
}

/// `RUST_LOG` takes precedence when set; otherwise `TF_EXECUTOR_DEBUG`
/// switches the default verbosity between `info` and `debug`.
fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).json().init();
}
