//! Cluster connection bootstrap: explicit kubeconfig path, then in-cluster
//! service-account config, then the default user kubeconfig (spec §4.1).
//!
//! Grounded on `services/kube_client.rs::create_kube_client[_in_cluster]`,
//! adapted from its single kubeconfig-path/in-cluster fallback to the
//! three-way fallback spec.md calls for.

use kube::config::{KubeConfigOptions, Kubeconfig};

pub async fn connect(kubeconfig_path: Option<&str>) -> anyhow::Result<kube::Client> {
    let client = if let Some(path) = kubeconfig_path {
        from_kubeconfig_path(path).await?
    } else {
        match kube::Client::try_default().await {
            Ok(client) => client,
            Err(_) => from_default_user_kubeconfig().await?,
        }
    };

    // Verify connectivity up front so a misconfigured cluster surfaces at
    // startup rather than on the first tenant's reconciliation call.
    client.apiserver_version().await?;
    Ok(client)
}

async fn from_kubeconfig_path(path: &str) -> anyhow::Result<kube::Client> {
    let kubeconfig = Kubeconfig::read_from(path)?;
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
    Ok(kube::Client::try_from(config)?)
}

async fn from_default_user_kubeconfig() -> anyhow::Result<kube::Client> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    let path = home.join(".kube").join("config");
    let kubeconfig = Kubeconfig::read_from(&path)
        .map_err(|err| anyhow::anyhow!("no in-cluster config and no kubeconfig at {}: {err}", path.display()))?;
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
    Ok(kube::Client::try_from(config)?)
}
