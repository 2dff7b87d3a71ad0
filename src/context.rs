use std::{
    path::PathBuf,
    time::Duration,
};

/// One of the two k3d clusters as seen from the tools we shell out to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterContext {
    /// kubectl / helm context name.
    pub kube_context: String,
    /// Namespace the platform is installed into.
    pub namespace: String,
    /// Docker container running the cluster's server node.
    pub node_container: String,
    /// The plane's ingress controller Service.
    pub ingress_service: String,
}

impl ClusterContext {
    /// Names as k3d derives them from the cluster name.
    pub fn k3d(cluster: &str, namespace: &str, ingress_service: String) -> Self {
        Self {
            kube_context: format!("k3d-{cluster}"),
            namespace: namespace.to_string(),
            node_container: format!("k3d-{cluster}-server-0"),
            ingress_service,
        }
    }
}

/// Everything the cross-cluster network reconcile needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSettings {
    pub base_domain: String,
    pub dp_domain_prefix: String,
    pub cp: ClusterContext,
    pub dp: ClusterContext,
    /// Docker network both clusters are attached to. Picks the node IP when a container sits on several networks.
    pub docker_network: Option<String>,
    /// How long to wait for restarted CoreDNS pods to become ready.
    pub coredns_timeout: Duration,
}

impl NetworkSettings {
    /// `<prefix>.<base>`, the data plane's own domain.
    pub fn dp_domain(&self) -> String {
        dp_domain(&self.dp_domain_prefix, &self.base_domain)
    }

    pub fn houston_host(&self) -> String {
        format!("houston.{}", self.base_domain)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ports {
    pub cp_https: u16,
    pub cp_http: u16,
    pub dp_https: u16,
    pub dp_http: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNames {
    pub cp: String,
    pub dp: String,
}

/// Immutable configuration for a full setup run. Built once from CLI arguments and passed by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupSettings {
    pub base_domain: String,
    pub dp_domain_prefix: String,
    pub namespace: String,
    pub release_name: String,
    pub docker_network: String,
    pub clusters: ClusterNames,
    pub ports: Ports,
    pub tls_secret_name: String,
    pub mkcert_root_ca_secret_name: String,
    pub mkcert_root_ca_secret_key: String,
    pub helm_timeout: Duration,
    pub helm_debug: bool,
    /// Directory containing the platform chart's `Chart.yaml`.
    pub chart_dir: PathBuf,
    /// Where helper-installed tools (`bin/mkcert`) and generated certs (`certs/`) live.
    pub helper_dir: PathBuf,
    /// Where to write the Helm values files. A fresh temp dir when unset.
    pub values_dir: Option<PathBuf>,
    pub coredns_timeout: Duration,
}

impl SetupSettings {
    pub fn cp(&self) -> ClusterContext {
        ClusterContext::k3d(
            &self.clusters.cp,
            &self.namespace,
            format!("{}-cp-nginx", self.release_name),
        )
    }

    pub fn dp(&self) -> ClusterContext {
        ClusterContext::k3d(
            &self.clusters.dp,
            &self.namespace,
            format!("{}-dp-nginx", self.release_name),
        )
    }

    pub fn dp_domain(&self) -> String {
        dp_domain(&self.dp_domain_prefix, &self.base_domain)
    }

    pub fn network(&self) -> NetworkSettings {
        NetworkSettings {
            base_domain: self.base_domain.clone(),
            dp_domain_prefix: self.dp_domain_prefix.clone(),
            cp: self.cp(),
            dp: self.dp(),
            docker_network: Some(self.docker_network.clone()),
            coredns_timeout: self.coredns_timeout,
        }
    }

    pub fn certs_dir(&self) -> PathBuf {
        self.helper_dir.join("certs")
    }

    pub fn tls_cert_path(&self) -> PathBuf {
        self.certs_dir().join("astronomer-tls.pem")
    }

    pub fn tls_key_path(&self) -> PathBuf {
        self.certs_dir().join("astronomer-tls.key")
    }
}

fn dp_domain(prefix: &str, base: &str) -> String {
    format!("{prefix}.{base}")
}

#[cfg(test)]
pub(crate) fn test_settings() -> SetupSettings {
    SetupSettings {
        base_domain: "localtest.me".to_string(),
        dp_domain_prefix: "dp01".to_string(),
        namespace: "astronomer".to_string(),
        release_name: "astronomer".to_string(),
        docker_network: "astronomer-net".to_string(),
        clusters: ClusterNames {
            cp: "control".to_string(),
            dp: "data".to_string(),
        },
        ports: Ports {
            cp_https: 8443,
            cp_http: 8080,
            dp_https: 8444,
            dp_http: 8081,
        },
        tls_secret_name: "astronomer-tls".to_string(),
        mkcert_root_ca_secret_name: "mkcert-root-ca".to_string(),
        mkcert_root_ca_secret_key: "cert.pem".to_string(),
        helm_timeout: Duration::from_secs(60 * 60),
        helm_debug: false,
        chart_dir: PathBuf::from("."),
        helper_dir: PathBuf::from("/nonexistent/astronomer-software"),
        values_dir: None,
        coredns_timeout: Duration::from_secs(120),
    }
}
