use crate::{
    command::{
        failure,
        CommandRunner,
        Invocation,
    },
    error::{
        Error,
        Result,
    },
};
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    net::IpAddr,
};

#[derive(Debug, Deserialize)]
struct NetworkEndpoint {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

/// IP of `container` on `network`, or its first assigned IP (by network name) when `network` is unset or the
/// container isn't attached to it.
pub async fn container_ip(runner: &dyn CommandRunner, container: &str, network: Option<&str>) -> Result<IpAddr> {
    let invocation = Invocation::new(
        "docker",
        ["inspect", container, "-f", "{{json .NetworkSettings.Networks}}"],
    )
    .unchecked();
    let output = runner.run(invocation.clone()).await?;
    if !output.success() {
        if output.stderr.contains("No such object") || output.stderr.contains("No such container") {
            return Err(Error::DependencyUnavailable(format!(
                "container {container} does not exist"
            )));
        }
        return Err(failure(invocation, &output));
    }

    let stdout = output.stdout.trim();
    let networks: BTreeMap<String, NetworkEndpoint> = if stdout.is_empty() || stdout == "null" {
        BTreeMap::new()
    } else {
        serde_json::from_str(stdout)?
    };

    let preferred = network.and_then(|name| networks.get(name)).filter(|ep| !ep.ip_address.is_empty());
    let endpoint = preferred.or_else(|| networks.values().find(|ep| !ep.ip_address.is_empty()));

    let Some(endpoint) = endpoint else {
        return Err(Error::DependencyUnavailable(format!(
            "could not determine IP for container {container}"
        )));
    };

    endpoint.ip_address.parse().map_err(|_| {
        Error::InvalidArgument(format!(
            "container {container} reports a malformed IP {:?}",
            endpoint.ip_address
        ))
    })
}

pub async fn network_exists(runner: &dyn CommandRunner, name: &str) -> Result<bool> {
    let output = runner
        .run(Invocation::new("docker", ["network", "inspect", name]).unchecked())
        .await?;
    Ok(output.success())
}

/// Create the docker network unless it exists. Returns whether it had to be created.
pub async fn ensure_network(runner: &dyn CommandRunner, name: &str) -> Result<bool> {
    if network_exists(runner, name).await? {
        debug!(%name, "docker network already exists");
        return Ok(false);
    }
    info!("Creating Docker network: {name}");
    runner
        .run(Invocation::new("docker", ["network", "create", name]))
        .await?;
    Ok(true)
}

/// Append `ip hostname` to the container's `/etc/hosts` unless an equivalent line is already there.
///
/// Docker may regenerate `/etc/hosts` when the container restarts, so this has to be re-applied after restarts.
pub async fn ensure_container_hosts_entry(
    runner: &dyn CommandRunner,
    container: &str,
    ip: IpAddr,
    hostname: &str,
) -> Result<()> {
    let script = hosts_pin_script(ip, hostname)?;
    runner
        .run(Invocation::new("docker", ["exec", container, "sh", "-c", script.as_str()]))
        .await?;
    debug!(%container, %ip, %hostname, "ensured container /etc/hosts pin");
    Ok(())
}

fn hosts_pin_script(ip: IpAddr, hostname: &str) -> Result<String> {
    let valid = !hostname.is_empty()
        && !hostname.starts_with(['-', '.'])
        && hostname.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if !valid {
        return Err(Error::InvalidArgument(format!("invalid hostname {hostname:?}")));
    }

    let ip_pattern = ip.to_string().replace('.', r"\.");
    let host_pattern = hostname.replace('.', r"\.");
    Ok(format!(
        r"set -eu; grep -qE '^[[:space:]]*{ip_pattern}[[:space:]]+.*\b{host_pattern}\b' /etc/hosts || echo '{ip} {hostname}' >> /etc/hosts"
    ))
}
