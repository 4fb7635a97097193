//! AWS client bootstrap: default credential chain, one client bundle shared
//! across tenants (spec §4.2).
//!
//! Grounded on `original_source/internal/awsclient/client.go::NewAWSClient`,
//! translated from the Go SDK's `config.LoadDefaultConfig` to
//! `aws_config::load_defaults`.

use aws_sdk_iam::Client as IamClient;
use aws_sdk_sts::Client as StsClient;

#[derive(Clone)]
pub struct AwsClients {
    pub iam: IamClient,
    pub sts: StsClient,
}

impl AwsClients {
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        AwsClients { iam: IamClient::new(&config), sts: StsClient::new(&config) }
    }
}
