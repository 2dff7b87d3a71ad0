//! Helm values for the two releases. Both planes share one baseline sized for a laptop; the control plane adds
//! the UI and Houston, the data plane only Commander.

use crate::{
    context::SetupSettings,
    error::{
        Error,
        Result,
    },
};
use serde_json::{
    json,
    Value,
};
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};

pub const CP_VALUES_FILE: &str = "cp-values.yaml";
pub const DP_VALUES_FILE: &str = "dp-values.yaml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuesFiles {
    pub dir: PathBuf,
    pub cp: PathBuf,
    pub dp: PathBuf,
}

pub fn cp_values(settings: &SetupSettings) -> Value {
    let base = &settings.base_domain;
    let mut values = common_values(settings, "unified", "");
    values["astronomer"] = json!({
        "astroUI": {
            "replicas": 1,
            "env": [
                { "name": "APP_API_LOC_HTTPS", "value": format!("https://houston.{base}/v1") },
                { "name": "APP_API_LOC_WSS", "value": format!("wss://houston.{base}/ws") },
            ],
        },
        "houston": {
            "replicas": 1,
            "worker": { "replicas": 1 },
            "config": {
                "emailConfirmation": false,
                "publicSignups": false,
                "cors": { "allowedOrigins": [format!("https://app.{base}")] },
                "auth": { "local": { "enabled": true } },
                "deployments": {
                    "configureDagDeployment": true,
                    "hardDeleteDeployment": true,
                },
            },
        },
        "commander": { "replicas": 1 },
        "registry": {},
    });
    values
}

pub fn dp_values(settings: &SetupSettings) -> Value {
    let mut values = common_values(settings, "data", &settings.dp_domain_prefix);
    values["astronomer"] = json!({
        "commander": { "replicas": 1 },
        "registry": {},
    });
    values
}

fn common_values(settings: &SetupSettings, plane_mode: &str, domain_prefix: &str) -> Value {
    json!({
        "global": {
            "baseDomain": settings.base_domain,
            "plane": {
                "mode": plane_mode,
                "domainPrefix": domain_prefix,
            },
            "tlsSecret": settings.tls_secret_name,
            "postgresqlEnabled": true,
            "prometheusPostgresExporterEnabled": true,
            "privateCaCerts": [settings.mkcert_root_ca_secret_name],
            "nats": { "enabled": true, "replicas": 1 },
            "networkPolicy": { "enabled": false },
            "defaultDenyNetworkPolicy": false,
            "deployRollbackEnabled": true,
            "taskUsageMetricsEnabled": true,
            "vectorEnabled": true,
            "elasticsearchEnabled": true,
            "dagOnlyDeployment": { "enabled": true },
        },
        "tags": {
            "platform": true,
            "logging": true,
            "monitoring": true,
            "postgresql": true,
            "nats": true,
        },
        "nginx": {
            "replicas": 1,
            "replicasDefaultBackend": 1,
        },
        "nats": {
            "cluster": { "enabled": false, "replicas": 1 },
            "resources": { "requests": { "cpu": "50m", "memory": "64Mi" } },
        },
        "elasticsearch": {
            "common": { "env": { "NUMBER_OF_MASTERS": "1" } },
            "master": {
                "replicas": 1,
                "heapMemory": "256m",
                "resources": { "requests": { "memory": "512Mi" } },
            },
            "data": {
                "replicas": 1,
                "heapMemory": "512m",
                "resources": { "requests": { "memory": "1Gi" } },
            },
            "client": {
                "replicas": 1,
                "heapMemory": "256m",
                "resources": { "requests": { "memory": "512Mi" } },
            },
            "images": {
                "es": {
                    "repository": "docker.elastic.co/elasticsearch/elasticsearch",
                    "tag": "8.18.6",
                },
            },
        },
    })
}

/// Write both values files into `dir` (a fresh temp dir when `None`) and return their paths.
pub fn write_values_files(settings: &SetupSettings, dir: Option<&Path>) -> Result<ValuesFiles> {
    let dir = match dir {
        Some(dir) => {
            fs::create_dir_all(dir).map_err(|err| Error::io(dir, err))?;
            dir.to_path_buf()
        }
        None => tempfile::Builder::new()
            .prefix("astro-k3d-")
            .tempdir()
            .map_err(|err| Error::io(std::env::temp_dir(), err))?
            .keep(),
    };

    let files = ValuesFiles {
        cp: dir.join(CP_VALUES_FILE),
        dp: dir.join(DP_VALUES_FILE),
        dir,
    };
    write_yaml(&files.cp, &cp_values(settings))?;
    write_yaml(&files.dp, &dp_values(settings))?;
    Ok(files)
}

fn write_yaml(path: &Path, values: &Value) -> Result<()> {
    let yaml = serde_yaml::to_string(values)?;
    fs::write(path, yaml).map_err(|err| Error::io(path, err))
}
