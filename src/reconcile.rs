//! Cross-cluster name resolution for a CP/DP pair of k3d clusters.
//!
//! Pods in each cluster reach the other plane through hostnames pinned in their CoreDNS `NodeHosts`. The data-plane
//! node additionally needs `houston.<base>` in its own `/etc/hosts`, because kubelet/containerd resolve registry
//! auth endpoints through the node, not through CoreDNS.
//!
//! IPs assigned by k3d change when the host's container runtime restarts, so this is meant to be re-run; every
//! step converges to the same state.

use crate::{
    command::CommandRunner,
    context::{
        ClusterContext,
        NetworkSettings,
    },
    docker,
    error::Result,
    kubectl::{
        self,
        COREDNS_CONFIGMAP,
        KUBE_SYSTEM,
        NODE_HOSTS_KEY,
    },
    nodehosts::{
        self,
        CP_MARKER,
        DP_MARKER,
    },
    services::public_ip_from_service,
};
use std::{
    net::IpAddr,
    time::Duration,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub cp_ingress_ip: IpAddr,
    pub dp_node_ip: IpAddr,
}

#[instrument(level = "debug", skip_all)]
pub async fn reconcile(runner: &dyn CommandRunner, settings: &NetworkSettings) -> Result<ReconcileReport> {
    let cp_ingress_ip = public_ip_from_service(runner, &settings.cp, &settings.cp.ingress_service).await?;
    let dp_node_ip = docker::container_ip(
        runner,
        &settings.dp.node_container,
        settings.docker_network.as_deref(),
    )
    .await?;
    info!(%cp_ingress_ip, %dp_node_ip, "resolved cross-cluster addresses");

    // Data-plane pods calling the control plane.
    pin_node_hosts(
        runner,
        &settings.dp,
        cp_ingress_ip,
        &nodehosts::cp_hostnames(&settings.base_domain),
        CP_MARKER,
        settings.coredns_timeout,
    )
    .await?;

    // Control-plane pods calling the data plane.
    pin_node_hosts(
        runner,
        &settings.cp,
        dp_node_ip,
        &nodehosts::dp_hostnames(&settings.dp_domain()),
        DP_MARKER,
        settings.coredns_timeout,
    )
    .await?;

    pin_dp_node_houston(runner, settings, cp_ingress_ip).await?;

    Ok(ReconcileReport {
        cp_ingress_ip,
        dp_node_ip,
    })
}

/// Point `houston.<base>` at the control-plane ingress in the data-plane node's `/etc/hosts`.
pub async fn pin_dp_node_houston(
    runner: &dyn CommandRunner,
    settings: &NetworkSettings,
    cp_ingress_ip: IpAddr,
) -> Result<()> {
    docker::ensure_container_hosts_entry(
        runner,
        &settings.dp.node_container,
        cp_ingress_ip,
        &settings.houston_host(),
    )
    .await
}

/// Render `hostnames -> ip` into `cluster`'s CoreDNS NodeHosts, write the ConfigMap back and restart CoreDNS.
pub async fn pin_node_hosts(
    runner: &dyn CommandRunner,
    cluster: &ClusterContext,
    ip: IpAddr,
    hostnames: &[String],
    marker: &str,
    coredns_timeout: Duration,
) -> Result<()> {
    let context = cluster.kube_context.as_str();
    let current = kubectl::get_configmap(runner, context, KUBE_SYSTEM, COREDNS_CONFIGMAP).await?;

    let mut data = current.data.clone().unwrap_or_default();
    let existing = data.get(NODE_HOSTS_KEY).map(String::as_str).unwrap_or_default();
    let rendered = nodehosts::render(existing, &ip.to_string(), hostnames, marker)?;
    if rendered == existing {
        debug!(%context, %marker, "NodeHosts already up to date");
    }
    data.insert(NODE_HOSTS_KEY.to_string(), rendered);

    kubectl::apply(runner, context, &kubectl::minimal_configmap(&current, data)).await?;
    // Also when unchanged: a previous write may never have been picked up.
    kubectl::restart_coredns(runner, context, coredns_timeout).await?;

    info!(%context, %ip, %marker, "pinned {} hostnames in CoreDNS NodeHosts", hostnames.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::test_settings,
        error::Error,
        testing::{
            container_networks_json,
            coredns_configmap_json,
            load_balancer_service_json,
            ScriptedRunner,
        },
    };

    fn healthy_pair() -> ScriptedRunner {
        ScriptedRunner::new()
            .on(
                &["--context", "k3d-control", "-n", "astronomer", "get", "svc", "astronomer-cp-nginx"],
                &load_balancer_service_json("astronomer-cp-nginx", "astronomer", &["172.18.0.4"]),
            )
            .on(
                &["docker", "inspect", "k3d-data-server-0"],
                &container_networks_json(&[("astronomer-net", "172.18.0.7")]),
            )
            .on(
                &["--context", "k3d-data", "-n", "kube-system", "get", "configmap", "coredns"],
                &coredns_configmap_json("172.18.0.7 k3d-data-server-0\n10.9.9.9 houston.localtest.me\n"),
            )
            .on(
                &["--context", "k3d-control", "-n", "kube-system", "get", "configmap", "coredns"],
                &coredns_configmap_json(
                    "172.18.0.3 k3d-control-server-0\n172.18.0.2 dp01.localtest.me  # astronomer-dp\n",
                ),
            )
    }

    fn applied_node_hosts(runner: &ScriptedRunner, context: &str) -> String {
        let apply = runner
            .calls_matching(&["--context", context, "apply", "-f", "-"])
            .pop()
            .expect("configmap applied");
        let cm: serde_json::Value = serde_json::from_str(apply.stdin.as_deref().unwrap()).unwrap();
        cm["data"]["NodeHosts"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn pins_both_directions_and_the_dp_node() {
        let runner = healthy_pair();

        let report = reconcile(&runner, &test_settings().network()).await.unwrap();

        assert_eq!(
            report,
            ReconcileReport {
                cp_ingress_ip: "172.18.0.4".parse().unwrap(),
                dp_node_ip: "172.18.0.7".parse().unwrap(),
            }
        );

        assert_eq!(
            applied_node_hosts(&runner, "k3d-data"),
            "172.18.0.7 k3d-data-server-0\n\n\
             172.18.0.4 localtest.me houston.localtest.me app.localtest.me grafana.localtest.me  # astronomer-cp\n"
        );
        assert_eq!(
            applied_node_hosts(&runner, "k3d-control"),
            "172.18.0.3 k3d-control-server-0\n\
             172.18.0.7 dp01.localtest.me deployments.dp01.localtest.me registry.dp01.localtest.me \
             commander.dp01.localtest.me elasticsearch.dp01.localtest.me prom-proxy.dp01.localtest.me \
             prometheus.dp01.localtest.me  # astronomer-dp\n"
        );

        let exec = runner.calls_matching(&["docker", "exec", "k3d-data-server-0"]);
        assert_eq!(exec.len(), 1);
        assert!(exec[0].argv.last().unwrap().contains("echo '172.18.0.4 houston.localtest.me'"));
    }

    #[tokio::test]
    async fn data_plane_is_updated_and_restarted_before_control_plane() {
        let runner = healthy_pair();

        reconcile(&runner, &test_settings().network()).await.unwrap();

        let steps = runner
            .calls()
            .iter()
            .filter_map(|call| {
                let context = call.argv.get(2)?.as_str();
                if call.contains(&["apply", "-f", "-"]) {
                    Some(format!("apply {context}"))
                } else if call.contains(&["wait", "--for=condition=ready"]) {
                    Some(format!("ready {context}"))
                } else {
                    None
                }
            })
            .collect::<Vec<_>>();
        assert_eq!(
            steps,
            vec!["apply k3d-data", "ready k3d-data", "apply k3d-control", "ready k3d-control"]
        );
    }

    #[tokio::test]
    async fn applied_configmap_keeps_other_keys() {
        let runner = healthy_pair();

        reconcile(&runner, &test_settings().network()).await.unwrap();

        let apply = runner.calls_matching(&["--context", "k3d-data", "apply"]).pop().unwrap();
        let cm: serde_json::Value = serde_json::from_str(apply.stdin.as_deref().unwrap()).unwrap();
        assert!(cm["data"]["Corefile"].as_str().unwrap().contains("NodeHosts"));
        assert!(cm["metadata"].get("resourceVersion").is_none());
    }

    #[tokio::test]
    async fn missing_ingress_ip_aborts_before_touching_any_cluster() {
        let runner = ScriptedRunner::new().on(
            &["get", "svc", "astronomer-cp-nginx"],
            &load_balancer_service_json("astronomer-cp-nginx", "astronomer", &[]),
        );

        let err = reconcile(&runner, &test_settings().network()).await.unwrap_err();

        assert!(matches!(err, Error::DependencyUnavailable(_)), "{err:?}");
        assert!(runner.calls_matching(&["apply"]).is_empty());
        assert!(runner.calls_matching(&["docker", "exec"]).is_empty());
    }

    #[tokio::test]
    async fn failed_apply_aborts_the_reconcile() {
        let runner = ScriptedRunner::new()
            .fail(
                &["--context", "k3d-data", "apply"],
                1,
                "error: the server has asked for the client to provide credentials",
            )
            .on(
                &["get", "svc"],
                &load_balancer_service_json("astronomer-cp-nginx", "astronomer", &["172.18.0.4"]),
            )
            .on(&["docker", "inspect"], &container_networks_json(&[("astronomer-net", "172.18.0.7")]))
            .on(&["get", "configmap", "coredns"], &coredns_configmap_json(""));

        let err = reconcile(&runner, &test_settings().network()).await.unwrap_err();

        assert!(matches!(err, Error::ExternalCommand { .. }), "{err:?}");
        assert!(runner.calls_matching(&["--context", "k3d-control", "apply"]).is_empty());
    }

    #[tokio::test]
    async fn rerun_applies_identical_node_hosts() {
        let first = healthy_pair();
        reconcile(&first, &test_settings().network()).await.unwrap();
        let dp_hosts = applied_node_hosts(&first, "k3d-data");

        let second = ScriptedRunner::new()
            .on(
                &["get", "svc"],
                &load_balancer_service_json("astronomer-cp-nginx", "astronomer", &["172.18.0.4"]),
            )
            .on(&["docker", "inspect"], &container_networks_json(&[("astronomer-net", "172.18.0.7")]))
            .on(&["k3d-data", "-n", "kube-system", "get", "configmap"], &coredns_configmap_json(&dp_hosts))
            .on(&["get", "configmap"], &coredns_configmap_json(""));
        reconcile(&second, &test_settings().network()).await.unwrap();

        assert_eq!(applied_node_hosts(&second, "k3d-data"), dp_hosts);
    }
}
