use crate::{
    command::{
        CommandOutput,
        CommandRunner,
        Invocation,
    },
    error::Result,
};
use std::sync::Mutex;

struct Rule {
    fragment: Vec<String>,
    output: CommandOutput,
}

/// A [`CommandRunner`] that never spawns anything. The first rule whose argv fragment matches decides the output;
/// anything unmatched succeeds with empty output. Every invocation is recorded.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    rules: Vec<Rule>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(mut self, fragment: &[&str], output: CommandOutput) -> Self {
        self.rules.push(Rule {
            fragment: fragment.iter().map(|s| s.to_string()).collect(),
            output,
        });
        self
    }

    pub(crate) fn on(self, fragment: &[&str], stdout: &str) -> Self {
        self.respond(
            fragment,
            CommandOutput {
                stdout: stdout.to_string(),
                ..Default::default()
            },
        )
    }

    pub(crate) fn fail(self, fragment: &[&str], exit_code: i32, stderr: &str) -> Self {
        self.respond(
            fragment,
            CommandOutput {
                stderr: stderr.to_string(),
                exit_code,
                ..Default::default()
            },
        )
    }

    pub(crate) fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_matching(&self, fragment: &[&str]) -> Vec<Invocation> {
        self.calls().into_iter().filter(|inv| inv.contains(fragment)).collect()
    }

    pub(crate) fn count_program(&self, program: &str) -> usize {
        self.calls().iter().filter(|inv| inv.program() == program).count()
    }
}

#[async_trait::async_trait]
impl CommandRunner for ScriptedRunner {
    async fn spawn(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(invocation.clone());
        let output = self
            .rules
            .iter()
            .find(|rule| {
                let fragment = rule.fragment.iter().map(String::as_str).collect::<Vec<_>>();
                invocation.contains(&fragment)
            })
            .map(|rule| rule.output.clone())
            .unwrap_or_default();
        Ok(output)
    }
}

/// `kubectl get configmap -o json` output for a CoreDNS ConfigMap.
pub(crate) fn coredns_configmap_json(node_hosts: &str) -> String {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": "coredns",
            "namespace": "kube-system",
            "labels": { "objectset.rio.cattle.io/hash": "abc123" },
            "resourceVersion": "4711",
            "uid": "0b3c8f5e-6f1e-4a4e-9d0e-1c2b3a4d5e6f"
        },
        "data": {
            "Corefile": ".:53 {\n    hosts /etc/coredns/NodeHosts {\n        ttl 60\n        reload 15s\n        fallthrough\n    }\n}\n",
            "NodeHosts": node_hosts
        }
    })
    .to_string()
}

/// `kubectl get svc -o json` output for a LoadBalancer Service with the given ingress IPs.
pub(crate) fn load_balancer_service_json(name: &str, namespace: &str, ips: &[&str]) -> String {
    let ingress = ips.iter().map(|ip| serde_json::json!({ "ip": ip })).collect::<Vec<_>>();
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": name, "namespace": namespace },
        "spec": { "type": "LoadBalancer", "ports": [{ "port": 443 }] },
        "status": { "loadBalancer": { "ingress": ingress } }
    })
    .to_string()
}

/// `docker inspect -f '{{json .NetworkSettings.Networks}}'` output.
pub(crate) fn container_networks_json(networks: &[(&str, &str)]) -> String {
    let map = networks
        .iter()
        .map(|(name, ip)| (name.to_string(), serde_json::json!({ "IPAddress": ip, "Gateway": "" })))
        .collect::<serde_json::Map<_, _>>();
    serde_json::Value::Object(map).to_string()
}
