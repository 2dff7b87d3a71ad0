#[macro_use]
extern crate tracing;

use clap::Parser;
use cpdp_k3d::{
    command::ProcessRunner,
    context::{
        ClusterContext,
        ClusterNames,
        NetworkSettings,
        Ports,
        SetupSettings,
    },
    nodehosts,
    reconcile,
    setup::{
        self,
        SetupFlags,
    },
};
use eyre::{
    eyre,
    Result,
};
use std::{
    io::Read as _,
    path::PathBuf,
    time::Duration,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about)]
enum Args {
    /// Bring up the CP and DP clusters and install the platform into both
    Setup(ArgsSetup),
    /// Re-pin cross-cluster DNS after the clusters' IPs changed
    Reconcile(ArgsReconcile),
    /// Render a NodeHosts blob read from stdin with one managed line, without touching any cluster
    RenderNodeHosts(ArgsRenderNodeHosts),
}

#[derive(Parser)]
struct ArgsSetup {
    #[clap(long, default_value = "localtest.me")]
    base_domain: String,

    #[clap(long, default_value = "dp01")]
    dp_domain_prefix: String,

    #[clap(long, default_value = "astronomer")]
    namespace: String,

    #[clap(long, default_value = "astronomer")]
    release_name: String,

    #[clap(long, default_value = "astronomer-net")]
    docker_network: String,

    #[clap(long, default_value = "control")]
    cp_cluster_name: String,

    #[clap(long, default_value = "data")]
    dp_cluster_name: String,

    #[clap(long, default_value_t = 8443)]
    cp_https_port: u16,

    #[clap(long, default_value_t = 8080)]
    cp_http_port: u16,

    #[clap(long, default_value_t = 8444)]
    dp_https_port: u16,

    #[clap(long, default_value_t = 8081)]
    dp_http_port: u16,

    #[clap(long, default_value = "astronomer-tls")]
    tls_secret_name: String,

    #[clap(long, default_value = "mkcert-root-ca")]
    mkcert_root_ca_secret_name: String,

    #[clap(long, default_value = "cert.pem")]
    mkcert_root_ca_secret_key: String,

    #[clap(
        long,
        env = "HELM_TIMEOUT",
        default_value = "60m",
        value_parser = humantime::parse_duration
    )]
    helm_timeout: Duration,

    #[clap(long)]
    helm_debug: bool,

    #[clap(
        long,
        help = "Run `helm dependency update` before installing (off by default; local charts are already vendored)"
    )]
    helm_deps_update: bool,

    #[clap(long, help = "Delete and recreate k3d clusters if they exist")]
    recreate_clusters: bool,

    #[clap(long)]
    skip_certs: bool,

    #[clap(long)]
    skip_clusters: bool,

    #[clap(long)]
    skip_secrets: bool,

    #[clap(long)]
    skip_helm: bool,

    #[clap(long)]
    skip_dns_reconcile: bool,

    #[clap(long, help = "Skip the DP node /etc/hosts pin")]
    skip_node_registry_check: bool,

    #[clap(long, help = "Directory to write cp-values.yaml + dp-values.yaml. Defaults to a temp directory")]
    values_dir: Option<PathBuf>,

    #[clap(long, default_value = ".", help = "Directory containing the platform chart's Chart.yaml")]
    chart_dir: PathBuf,

    #[clap(
        long,
        env = "ASTRONOMER_HELPER_DIR",
        help = "Helper tools and certs directory [default: $HOME/.local/share/astronomer-software]"
    )]
    helper_dir: Option<PathBuf>,

    #[clap(long, default_value = "120s", value_parser = humantime::parse_duration)]
    coredns_timeout: Duration,
}

impl ArgsSetup {
    fn into_parts(self) -> Result<(SetupSettings, SetupFlags)> {
        let helper_dir = match self.helper_dir {
            Some(dir) => dir,
            None => std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".local/share/astronomer-software"))
                .ok_or_else(|| eyre!("HOME is not set; pass --helper-dir"))?,
        };

        let settings = SetupSettings {
            base_domain: self.base_domain,
            dp_domain_prefix: self.dp_domain_prefix,
            namespace: self.namespace,
            release_name: self.release_name,
            docker_network: self.docker_network,
            clusters: ClusterNames {
                cp: self.cp_cluster_name,
                dp: self.dp_cluster_name,
            },
            ports: Ports {
                cp_https: self.cp_https_port,
                cp_http: self.cp_http_port,
                dp_https: self.dp_https_port,
                dp_http: self.dp_http_port,
            },
            tls_secret_name: self.tls_secret_name,
            mkcert_root_ca_secret_name: self.mkcert_root_ca_secret_name,
            mkcert_root_ca_secret_key: self.mkcert_root_ca_secret_key,
            helm_timeout: self.helm_timeout,
            helm_debug: self.helm_debug,
            chart_dir: self.chart_dir,
            helper_dir,
            values_dir: self.values_dir,
            coredns_timeout: self.coredns_timeout,
        };
        let flags = SetupFlags {
            skip_certs: self.skip_certs,
            skip_clusters: self.skip_clusters,
            skip_secrets: self.skip_secrets,
            skip_helm: self.skip_helm,
            skip_dns_reconcile: self.skip_dns_reconcile,
            skip_node_registry_check: self.skip_node_registry_check,
            recreate_clusters: self.recreate_clusters,
            helm_deps_update: self.helm_deps_update,
        };
        Ok((settings, flags))
    }
}

#[derive(Parser)]
struct ArgsReconcile {
    #[clap(long, env = "CP_CONTEXT", default_value = "k3d-control")]
    cp_context: String,

    #[clap(long, env = "DP_CONTEXT", default_value = "k3d-data")]
    dp_context: String,

    #[clap(long, env = "PLATFORM_NAMESPACE", default_value = "astronomer")]
    platform_namespace: String,

    #[clap(long, env = "BASE_DOMAIN", default_value = "localtest.me")]
    base_domain: String,

    #[clap(long, env = "DP_DOMAIN_PREFIX", default_value = "dp01")]
    dp_domain_prefix: String,

    #[clap(long, env = "CP_NODE_CONTAINER", default_value = "k3d-control-server-0")]
    cp_node_container: String,

    #[clap(long, env = "DP_NODE_CONTAINER", default_value = "k3d-data-server-0")]
    dp_node_container: String,

    #[clap(long, env = "CP_INGRESS_SERVICE", default_value = "astronomer-cp-nginx")]
    cp_ingress_service: String,

    #[clap(long, env = "DP_INGRESS_SERVICE", default_value = "astronomer-dp-nginx")]
    dp_ingress_service: String,

    #[clap(
        long,
        env = "DOCKER_NETWORK",
        help = "Network to take the DP node IP from. Defaults to the node's first network"
    )]
    docker_network: Option<String>,

    #[clap(long, default_value = "120s", value_parser = humantime::parse_duration)]
    coredns_timeout: Duration,
}

impl From<ArgsReconcile> for NetworkSettings {
    fn from(args: ArgsReconcile) -> Self {
        NetworkSettings {
            base_domain: args.base_domain,
            dp_domain_prefix: args.dp_domain_prefix,
            cp: ClusterContext {
                kube_context: args.cp_context,
                namespace: args.platform_namespace.clone(),
                node_container: args.cp_node_container,
                ingress_service: args.cp_ingress_service,
            },
            dp: ClusterContext {
                kube_context: args.dp_context,
                namespace: args.platform_namespace,
                node_container: args.dp_node_container,
                ingress_service: args.dp_ingress_service,
            },
            docker_network: args.docker_network,
            coredns_timeout: args.coredns_timeout,
        }
    }
}

#[derive(Parser)]
struct ArgsRenderNodeHosts {
    #[clap(long, help = "IP every hostname is pinned to")]
    ip: String,

    #[clap(long, help = "Marker identifying the managed line")]
    marker: String,

    #[clap(long = "hostname", required = true, help = "Hostname to pin (repeatable)")]
    hostnames: Vec<String>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let debug = std::env::var("DEBUG")
            .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        EnvFilter::new(if debug { "debug" } else { "warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let code = match Args::parse() {
        Args::Setup(args) => {
            let (settings, flags) = args.into_parts()?;
            debug!(?settings, ?flags, "starting setup");
            setup::run(&ProcessRunner, &settings, &flags).await
        }
        Args::Reconcile(args) => {
            let settings = NetworkSettings::from(args);
            debug!(?settings, "starting reconcile");
            let report = reconcile::reconcile(&ProcessRunner, &settings).await?;
            println!("CP ingress LB IP: {}", report.cp_ingress_ip);
            println!("DP node IP: {}", report.dp_node_ip);
            0
        }
        Args::RenderNodeHosts(args) => {
            let mut existing = String::new();
            std::io::stdin().read_to_string(&mut existing)?;
            print!(
                "{}",
                nodehosts::render(&existing, &args.ip, &args.hostnames, &args.marker)?
            );
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
