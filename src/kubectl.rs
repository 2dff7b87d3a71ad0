//! kubectl operations used by the setup and reconcile flows. Objects travel as JSON on stdin/stdout.

use crate::{
    command::{
        timeout_secs,
        CommandRunner,
        Invocation,
    },
    error::Result,
};
use k8s_openapi::{
    api::core::v1::{
        ConfigMap,
        Namespace,
        Secret,
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
    ByteString,
};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    time::Duration,
};

pub const KUBE_SYSTEM: &str = "kube-system";
pub const COREDNS_CONFIGMAP: &str = "coredns";
pub const COREDNS_SELECTOR: &str = "k8s-app=kube-dns";
pub const NODE_HOSTS_KEY: &str = "NodeHosts";

/// `kubectl --context <context> <args...>`
pub fn command<I, S>(context: &str, args: I) -> Invocation
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut argv = vec!["--context".to_string(), context.to_string()];
    argv.extend(args.into_iter().map(Into::into));
    Invocation::new("kubectl", argv)
}

pub async fn get_configmap(runner: &dyn CommandRunner, context: &str, ns: &str, name: &str) -> Result<ConfigMap> {
    let output = runner
        .run(command(context, ["-n", ns, "get", "configmap", name, "-o", "json"]))
        .await?;
    Ok(serde_json::from_str(&output.stdout)?)
}

/// `kubectl apply -f -` with `object` serialized as JSON on stdin.
pub async fn apply<T: Serialize>(runner: &dyn CommandRunner, context: &str, object: &T) -> Result<()> {
    let manifest = serde_json::to_string(object)?;
    runner
        .run(command(context, ["apply", "-f", "-"]).stdin(manifest))
        .await?;
    Ok(())
}

/// The parts of `current` we own when writing it back: identity, labels and data. Server-populated metadata
/// (resourceVersion, uid, managedFields) is left out so the apply is a plain full replace of `data`.
pub fn minimal_configmap(current: &ConfigMap, data: BTreeMap<String, String>) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: current.metadata.name.clone(),
            namespace: current.metadata.namespace.clone(),
            labels: current.metadata.labels.clone(),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// CoreDNS reads NodeHosts at startup, so changes only take effect after the pods are replaced.
pub async fn restart_coredns(runner: &dyn CommandRunner, context: &str, timeout: Duration) -> Result<()> {
    runner
        .run(command(
            context,
            ["-n", KUBE_SYSTEM, "delete", "pod", "-l", COREDNS_SELECTOR],
        ))
        .await?;
    runner
        .run(command(
            context,
            [
                "-n".to_string(),
                KUBE_SYSTEM.to_string(),
                "wait".to_string(),
                "--for=condition=ready".to_string(),
                "pod".to_string(),
                "-l".to_string(),
                COREDNS_SELECTOR.to_string(),
                format!("--timeout={}", timeout_secs(timeout)),
            ],
        ))
        .await?;
    Ok(())
}

pub async fn apply_namespace(runner: &dyn CommandRunner, context: &str, name: &str) -> Result<()> {
    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    apply(runner, context, &namespace).await
}

pub fn tls_secret(ns: &str, name: &str, cert_pem: Vec<u8>, key_pem: Vec<u8>) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ns.to_string()),
            ..Default::default()
        },
        type_: Some("kubernetes.io/tls".to_string()),
        data: Some(BTreeMap::from_iter([
            ("tls.crt".to_string(), ByteString(cert_pem)),
            ("tls.key".to_string(), ByteString(key_pem)),
        ])),
        ..Default::default()
    }
}

pub fn opaque_secret(ns: &str, name: &str, key: &str, contents: Vec<u8>) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ns.to_string()),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(BTreeMap::from_iter([(key.to_string(), ByteString(contents))])),
        ..Default::default()
    }
}
