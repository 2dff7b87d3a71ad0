//! End-to-end bring-up of a control-plane and a data-plane k3d cluster with the platform chart installed in both.
//!
//! Every step is idempotent, so a failed run is recovered by running again. Nothing is rolled back.

use crate::{
    certs::{
        self,
        TlsMaterial,
    },
    command::{
        require_executable,
        CommandRunner,
    },
    context::SetupSettings,
    docker,
    error::{
        Error,
        Result,
    },
    helm,
    k3d::{
        self,
        ClusterSpec,
    },
    kubectl,
    milestones::Milestones,
    reconcile,
    services::public_ip_from_service,
    values,
};
use std::{
    fs,
    net::IpAddr,
    path::Path,
};

const PREREQUISITES: [(&str, &str); 4] = [
    ("docker", "Install Docker Desktop/OrbStack and ensure `docker` works."),
    ("k3d", "Install k3d (e.g. `brew install k3d` on macOS)."),
    ("kubectl", "Install kubectl and ensure it is in PATH."),
    ("helm", "Install helm and ensure it is in PATH."),
];

const PRE_DP_RECONCILE: &str = "Pre-DP: update DP CoreDNS NodeHosts for CP ingress";
const RECONCILE: &str = "Reconcile cross-cluster DNS + node-level hosts pins";
const NODE_PIN: &str = "DP node: pin houston.<baseDomain> to CP ingress (node /etc/hosts)";

/// Which stages to run. Every skipped stage still shows up in the summary with the flag as its reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetupFlags {
    pub skip_certs: bool,
    pub skip_clusters: bool,
    pub skip_secrets: bool,
    pub skip_helm: bool,
    pub skip_dns_reconcile: bool,
    pub skip_node_registry_check: bool,
    pub recreate_clusters: bool,
    pub helm_deps_update: bool,
}

/// Run the whole setup and print the summary. Returns the process exit code.
pub async fn run(runner: &dyn CommandRunner, settings: &SetupSettings, flags: &SetupFlags) -> i32 {
    run_with(runner, settings, flags, &mut Milestones::new()).await
}

/// [`run`] recording into `milestones`. A failing step is marked failed before the summary is printed, so no row is
/// left running.
#[instrument(level = "debug", skip_all)]
pub async fn run_with(
    runner: &dyn CommandRunner,
    settings: &SetupSettings,
    flags: &SetupFlags,
    milestones: &mut Milestones,
) -> i32 {
    match run_steps(runner, settings, flags, milestones).await {
        Ok(()) => {
            milestones.print_summary_table();
            print_host_suggestions(runner, settings).await;
            println!("\n✅ Completed.");
            0
        }
        Err(err) => {
            error!("setup failed: {err}");
            milestones.fail_active_if_any(err.to_string());
            milestones.print_summary_table();
            println!("\n❌ Failed: {err}");
            1
        }
    }
}

/// The setup stages in order. On error the failing milestone is left running for the caller to mark.
pub async fn run_steps(
    runner: &dyn CommandRunner,
    settings: &SetupSettings,
    flags: &SetupFlags,
    milestones: &mut Milestones,
) -> Result<()> {
    let id = milestones.start("Validate prerequisites (docker/k3d/kubectl/helm)");
    for (program, hint) in PREREQUISITES {
        require_executable(runner, program, hint).await?;
    }
    if !flags.skip_helm {
        helm::ensure_chart(&settings.chart_dir)?;
    }
    milestones.done(id, None);

    let id = milestones.start(&format!("Ensure Docker network `{}` exists", settings.docker_network));
    let created = docker::ensure_network(runner, &settings.docker_network).await?;
    milestones.done(id, created.then(|| "created".to_string()));

    let tls = if flags.skip_certs {
        milestones.skip("Generate TLS certs (mkcert) with CP+DP SANs", "--skip-certs set");
        // Clusters and secrets still need the root CA and the previously generated pair.
        certs::existing_tls_material(runner, settings).await?
    } else {
        let id = milestones.start("Generate TLS certs (mkcert) with CP+DP SANs");
        let tls = certs::ensure_tls_certs(runner, settings).await?;
        milestones.done(
            id,
            Some(format!("cert={} key={}", tls.cert.display(), tls.key.display())),
        );
        tls
    };

    let clusters_title = format!(
        "Ensure k3d clusters exist (CP={}, DP={})",
        settings.clusters.cp, settings.clusters.dp
    );
    if flags.skip_clusters {
        milestones.skip(&clusters_title, "--skip-clusters set");
    } else {
        let id = milestones.start(&clusters_title);
        let created = ensure_clusters(runner, settings, &tls.root_ca, flags.recreate_clusters).await?;
        milestones.done(id, (!created.is_empty()).then(|| format!("created={}", created.join(","))));
    }

    if flags.skip_secrets {
        milestones.skip("Apply namespace + secrets in both clusters", "--skip-secrets set");
    } else {
        let id = milestones.start(&format!(
            "Apply namespace + secrets in both clusters (ns={})",
            settings.namespace
        ));
        apply_secrets(runner, settings, &tls).await?;
        milestones.done(
            id,
            Some(format!(
                "tlsSecret={} caSecret={}",
                settings.tls_secret_name, settings.mkcert_root_ca_secret_name
            )),
        );
    }

    let id = milestones.start("Write CP/DP Helm values files");
    let values_files = values::write_values_files(settings, settings.values_dir.as_deref())?;
    milestones.done(id, Some(format!("dir={}", values_files.dir.display())));

    let network = settings.network();

    if flags.skip_helm {
        milestones.skip("Helm dependency update + CP/DP install", "--skip-helm set");
    } else {
        if flags.helm_deps_update {
            let id = milestones.start("Helm dependency update");
            helm::dependency_update(runner, &settings.chart_dir).await?;
            milestones.done(id, None);
        } else {
            milestones.skip("Helm dependency update", "Disabled by default (vendored local charts)");
        }

        let cp = settings.cp();
        let id = milestones.start(&format!(
            "Helm install/upgrade Control Plane (context={})",
            cp.kube_context
        ));
        helm::upgrade_install(runner, &release(settings, &cp.kube_context, &values_files.cp)).await?;
        milestones.done(id, None);

        // Data-plane components talk to the control plane while starting up, so the CP names have to resolve
        // inside the DP cluster before its install.
        if flags.skip_dns_reconcile {
            milestones.skip(PRE_DP_RECONCILE, "--skip-dns-reconcile set");
        } else {
            let id = milestones.start(PRE_DP_RECONCILE);
            let report = reconcile::reconcile(runner, &network).await?;
            milestones.done(id, Some(report_detail(&report)));
        }

        let dp = settings.dp();
        let id = milestones.start(&format!(
            "Helm install/upgrade Data Plane (context={})",
            dp.kube_context
        ));
        helm::upgrade_install(runner, &release(settings, &dp.kube_context, &values_files.dp)).await?;
        milestones.done(id, None);
    }

    if flags.skip_dns_reconcile {
        milestones.skip(RECONCILE, "--skip-dns-reconcile set");
    } else {
        let id = milestones.start(RECONCILE);
        info!("Reconciling k3d cross-cluster DNS + node-level hosts pins");
        let report = reconcile::reconcile(runner, &network).await?;
        milestones.done(id, Some(report_detail(&report)));
    }

    if flags.skip_node_registry_check {
        milestones.skip(NODE_PIN, "--skip-node-registry-check set");
    } else {
        let id = milestones.start(NODE_PIN);
        let cp_ingress_ip = public_ip_from_service(runner, &network.cp, &network.cp.ingress_service).await?;
        reconcile::pin_dp_node_houston(runner, &network, cp_ingress_ip).await?;
        milestones.done(id, Some(format!("{cp_ingress_ip} {}", network.houston_host())));
    }

    Ok(())
}

/// Create both clusters if missing, deleting them first when `recreate` is set. Returns the names created.
async fn ensure_clusters(
    runner: &dyn CommandRunner,
    settings: &SetupSettings,
    root_ca: &Path,
    recreate: bool,
) -> Result<Vec<String>> {
    if recreate {
        k3d::delete_cluster(runner, &settings.clusters.cp).await?;
        k3d::delete_cluster(runner, &settings.clusters.dp).await?;
    }

    let specs = [
        ClusterSpec {
            name: &settings.clusters.cp,
            docker_network: &settings.docker_network,
            https_port: settings.ports.cp_https,
            http_port: settings.ports.cp_http,
            mkcert_root_ca: root_ca,
        },
        ClusterSpec {
            name: &settings.clusters.dp,
            docker_network: &settings.docker_network,
            https_port: settings.ports.dp_https,
            http_port: settings.ports.dp_http,
            mkcert_root_ca: root_ca,
        },
    ];

    let mut created = Vec::new();
    for spec in &specs {
        if k3d::ensure_cluster(runner, spec).await? {
            created.push(spec.name.to_string());
        }
    }
    Ok(created)
}

async fn apply_secrets(runner: &dyn CommandRunner, settings: &SetupSettings, tls: &TlsMaterial) -> Result<()> {
    let read = |path: &Path| fs::read(path).map_err(|err| Error::io(path, err));
    let cert = read(&tls.cert)?;
    let key = read(&tls.key)?;
    let root_ca = read(&tls.root_ca)?;

    let ns = settings.namespace.as_str();
    let tls_secret = kubectl::tls_secret(ns, &settings.tls_secret_name, cert, key);
    let ca_secret = kubectl::opaque_secret(
        ns,
        &settings.mkcert_root_ca_secret_name,
        &settings.mkcert_root_ca_secret_key,
        root_ca,
    );

    for cluster in [settings.cp(), settings.dp()] {
        let context = cluster.kube_context.as_str();
        kubectl::apply_namespace(runner, context, ns).await?;
        kubectl::apply(runner, context, &tls_secret).await?;
        kubectl::apply(runner, context, &ca_secret).await?;
        debug!(%context, %ns, "applied namespace and secrets");
    }
    Ok(())
}

fn release<'a>(settings: &'a SetupSettings, kube_context: &'a str, values_file: &'a Path) -> helm::Release<'a> {
    helm::Release {
        name: &settings.release_name,
        chart_dir: &settings.chart_dir,
        namespace: &settings.namespace,
        kube_context,
        values_file,
        timeout: settings.helm_timeout,
        debug: settings.helm_debug,
    }
}

fn report_detail(report: &reconcile::ReconcileReport) -> String {
    format!("cpIngress={} dpNode={}", report.cp_ingress_ip, report.dp_node_ip)
}

/// Lines to add to the host's `/etc/hosts` to reach both planes through their load balancers.
pub fn host_suggestions(cp_ip: IpAddr, dp_ip: IpAddr, base: &str, dp: &str) -> [String; 2] {
    [
        format!(
            "{dp_ip} {dp} deployments.{dp} registry.{dp} commander.{dp} prometheus.{dp} prom-proxy.{dp} elasticsearch.{dp}"
        ),
        format!(
            "{cp_ip} {base} app.{base} houston.{base} grafana.{base} prometheus.{base} elasticsearch.{base} \
             alertmanager.{base} registry.{base}"
        ),
    ]
}

async fn lookup_host_suggestions(runner: &dyn CommandRunner, settings: &SetupSettings) -> Result<[String; 2]> {
    let cp = settings.cp();
    let dp = settings.dp();
    let cp_ip = public_ip_from_service(runner, &cp, &cp.ingress_service).await?;
    let dp_ip = public_ip_from_service(runner, &dp, &dp.ingress_service).await?;
    Ok(host_suggestions(cp_ip, dp_ip, &settings.base_domain, &settings.dp_domain()))
}

async fn print_host_suggestions(runner: &dyn CommandRunner, settings: &SetupSettings) {
    match lookup_host_suggestions(runner, settings).await {
        Ok(lines) => {
            println!("\nAdd the following entries to your host `/etc/hosts` (if your host can route to these LB IPs):\n");
            for line in lines {
                println!("{line}");
            }
        }
        Err(err) => warn!("could not look up ingress IPs for host /etc/hosts suggestions: {err}"),
    }
}
