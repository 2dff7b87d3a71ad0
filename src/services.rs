use crate::{
    command::{
        failure,
        CommandRunner,
    },
    context::ClusterContext,
    error::{
        Error,
        Result,
    },
    kubectl,
};
use k8s_openapi::api::core::v1::Service;
use std::net::IpAddr;

/// The externally reachable IP of `service`: its load balancer ingress IP.
///
/// A missing Service, a Service that is not of type LoadBalancer, or one whose load balancer has not been provisioned
/// yet is [`Error::DependencyUnavailable`].
pub async fn public_ip_from_service(
    runner: &dyn CommandRunner,
    cluster: &ClusterContext,
    service: &str,
) -> Result<IpAddr> {
    let ns = cluster.namespace.as_str();
    let context = cluster.kube_context.as_str();

    let invocation = kubectl::command(context, ["-n", ns, "get", "svc", service, "-o", "json"]).unchecked();
    let output = runner.run(invocation.clone()).await?;
    if !output.success() {
        if output.stderr.contains("NotFound") {
            return Err(Error::DependencyUnavailable(format!(
                "Service {ns}/{service} does not exist (context={context})"
            )));
        }
        return Err(failure(invocation, &output));
    }

    let svc: Service = serde_json::from_str(&output.stdout)?;
    let ips = service_ips(&svc);

    select_ip(ips, service, ns).ok_or_else(|| {
        Error::DependencyUnavailable(format!(
            "Service {ns}/{service} has no LoadBalancer ingress IP (context={context})"
        ))
    })
}

fn service_ips(svc: &Service) -> Vec<IpAddr> {
    if svc.spec.as_ref().and_then(|spec| spec.type_.as_deref()) != Some("LoadBalancer") {
        debug!(
            "Service {}/{} is not a LoadBalancer",
            svc.metadata.namespace.as_deref().unwrap_or_default(),
            svc.metadata.name.as_deref().unwrap_or_default()
        );
        return Vec::new();
    }

    svc.status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map(|ingress| {
            ingress
                .iter()
                .filter_map(|i| i.ip.as_deref()?.parse::<IpAddr>().ok())
                .collect()
        })
        .unwrap_or_default()
}

fn select_ip(ips: Vec<IpAddr>, name: &str, ns: &str) -> Option<IpAddr> {
    match &ips[..] {
        [] => None,
        [ip] => Some(*ip),
        ips => {
            warn!("Service {ns}/{name} has multiple load balancer ips, using the first ipv4 one or the first one if none are ipv4");
            Some(ips.iter().find(|ip| ip.is_ipv4()).copied().unwrap_or(ips[0]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        load_balancer_service_json,
        ScriptedRunner,
    };

    fn cp() -> ClusterContext {
        ClusterContext::k3d("control", "astronomer", "astronomer-cp-nginx".to_string())
    }

    #[tokio::test]
    async fn returns_load_balancer_ip() {
        let runner = ScriptedRunner::new().on(
            &["get", "svc", "astronomer-cp-nginx"],
            &load_balancer_service_json("astronomer-cp-nginx", "astronomer", &["172.18.0.4"]),
        );

        let ip = public_ip_from_service(&runner, &cp(), "astronomer-cp-nginx").await.unwrap();

        assert_eq!(ip, "172.18.0.4".parse::<IpAddr>().unwrap());
        assert!(runner.calls()[0].contains(&["kubectl", "--context", "k3d-control", "-n", "astronomer"]));
    }

    #[tokio::test]
    async fn prefers_ipv4_when_several_ips_are_assigned() {
        let runner = ScriptedRunner::new().on(
            &["get", "svc"],
            &load_balancer_service_json("svc", "astronomer", &["fd00::4", "172.18.0.5"]),
        );

        let ip = public_ip_from_service(&runner, &cp(), "svc").await.unwrap();

        assert_eq!(ip, "172.18.0.5".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn pending_load_balancer_is_dependency_unavailable() {
        let runner = ScriptedRunner::new().on(&["get", "svc"], &load_balancer_service_json("svc", "astronomer", &[]));

        let err = public_ip_from_service(&runner, &cp(), "svc").await.unwrap_err();

        assert!(matches!(err, Error::DependencyUnavailable(_)), "{err:?}");
    }

    #[tokio::test]
    async fn missing_service_is_dependency_unavailable() {
        let runner = ScriptedRunner::new().fail(
            &["get", "svc"],
            1,
            r#"Error from server (NotFound): services "svc" not found"#,
        );

        let err = public_ip_from_service(&runner, &cp(), "svc").await.unwrap_err();

        assert!(matches!(err, Error::DependencyUnavailable(_)), "{err:?}");
    }

    #[tokio::test]
    async fn other_kubectl_failures_stay_command_errors() {
        let runner = ScriptedRunner::new().fail(&["get", "svc"], 1, "Unable to connect to the server");

        let err = public_ip_from_service(&runner, &cp(), "svc").await.unwrap_err();

        assert!(matches!(err, Error::ExternalCommand { exit_code: 1, .. }), "{err:?}");
    }

    #[tokio::test]
    async fn cluster_ip_service_with_external_ips_is_dependency_unavailable() {
        let svc = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "svc", "namespace": "astronomer" },
            "spec": { "type": "ClusterIP", "externalIPs": ["10.1.2.3"] }
        });
        let runner = ScriptedRunner::new().on(&["get", "svc"], &svc.to_string());

        let err = public_ip_from_service(&runner, &cp(), "svc").await.unwrap_err();

        assert!(matches!(err, Error::DependencyUnavailable(_)), "{err:?}");
    }
}
