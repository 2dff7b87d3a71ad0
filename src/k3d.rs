use crate::{
    command::{
        CommandRunner,
        Invocation,
    },
    error::Result,
};
use std::path::Path;

/// Where k3d mounts the mkcert root CA inside server nodes.
const ROOT_CA_MOUNT: &str = "/etc/ssl/certs/mkcert-rootCA.pem";

pub struct ClusterSpec<'a> {
    pub name: &'a str,
    pub docker_network: &'a str,
    pub https_port: u16,
    pub http_port: u16,
    pub mkcert_root_ca: &'a Path,
}

pub async fn cluster_exists(runner: &dyn CommandRunner, name: &str) -> Result<bool> {
    let output = runner
        .run(Invocation::new("k3d", ["cluster", "get", name]).unchecked())
        .await?;
    Ok(output.success())
}

pub async fn delete_cluster(runner: &dyn CommandRunner, name: &str) -> Result<()> {
    if !cluster_exists(runner, name).await? {
        return Ok(());
    }
    info!("Deleting k3d cluster: {name}");
    runner
        .run(Invocation::new("k3d", ["cluster", "delete", name]))
        .await?;
    Ok(())
}

/// Create the cluster (traefik disabled, mkcert root CA mounted) unless it already exists.
pub async fn ensure_cluster(runner: &dyn CommandRunner, spec: &ClusterSpec<'_>) -> Result<bool> {
    if cluster_exists(runner, spec.name).await? {
        debug!(name = spec.name, "cluster already exists, skipping");
        return Ok(false);
    }

    info!("Creating k3d cluster: {}", spec.name);
    runner.run(create_command(spec)).await?;
    Ok(true)
}

fn create_command(spec: &ClusterSpec<'_>) -> Invocation {
    Invocation::new(
        "k3d",
        [
            "cluster".to_string(),
            "create".to_string(),
            spec.name.to_string(),
            "--network".to_string(),
            spec.docker_network.to_string(),
            "--k3s-arg".to_string(),
            "--disable=traefik@server:0".to_string(),
            "--volume".to_string(),
            format!("{}:{ROOT_CA_MOUNT}@server:*", spec.mkcert_root_ca.display()),
            "--port".to_string(),
            format!("{}:443@loadbalancer", spec.https_port),
            "--port".to_string(),
            format!("{}:80@loadbalancer", spec.http_port),
        ],
    )
}
