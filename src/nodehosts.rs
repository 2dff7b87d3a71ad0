//! Rendering of hosts-file formatted text (CoreDNS `NodeHosts`, `/etc/hosts`) with one managed line per marker.
//!
//! A managed line is an ordinary active mapping carrying a `# <marker>` suffix:
//!
//! ```text
//! 172.18.0.4 houston.localtest.me app.localtest.me  # astronomer-cp
//! ```
//!
//! CoreDNS ignores comment-only lines, so the pin has to be an active line; the suffix is what lets us find and
//! replace it on the next run without touching the entries k3d (or an operator) wrote.

use crate::error::{
    Error,
    Result,
};

/// Marker for control-plane hostnames pinned inside the data-plane cluster.
pub const CP_MARKER: &str = "astronomer-cp";
/// Marker for data-plane hostnames pinned inside the control-plane cluster.
pub const DP_MARKER: &str = "astronomer-dp";

/// Merge `ip -> hostnames` into `existing`, keyed by `marker`.
///
/// - Legacy comment lines starting with `# <marker>:` are dropped.
/// - The first line containing `# <marker>` is replaced in place by the desired line; later ones are dropped.
/// - Any other active line naming one of `hostnames` after its IP is dropped as a whole, even if it also names
///   hostnames we don't manage.
/// - Without an existing managed line, the desired line is appended after a blank separator.
///
/// Everything else is passed through untouched and in order. The result always ends in exactly one newline.
pub fn render<S: AsRef<str>>(existing: &str, ip: &str, hostnames: &[S], marker: &str) -> Result<String> {
    let hostnames = validate(ip, hostnames, marker)?;

    let managed_suffix = format!("# {marker}");
    let legacy_prefix = format!("# {marker}:");
    let wanted = format!("{ip} {}  {managed_suffix}", hostnames.join(" "));

    let mut out: Vec<&str> = Vec::new();
    let mut replaced = false;

    for line in existing.lines() {
        if line.starts_with(&legacy_prefix) {
            continue;
        }

        if line.contains(&managed_suffix) {
            if !replaced {
                out.push(&wanted);
                replaced = true;
            }
            continue;
        }

        let stripped = line.trim();
        if !stripped.is_empty() && !stripped.starts_with('#') && claims_any(stripped, &hostnames) {
            trace!(%line, %marker, "dropping stale hosts entry");
            continue;
        }

        out.push(line);
    }

    if !replaced {
        if out.last().is_some_and(|last| !last.trim().is_empty()) {
            out.push("");
        }
        out.push(&wanted);
    }

    let mut rendered = out.join("\n").trim_end_matches('\n').to_string();
    rendered.push('\n');
    Ok(rendered)
}

/// True if any token after the leading IP is one of `hostnames`.
fn claims_any(line: &str, hostnames: &[&str]) -> bool {
    line.split_whitespace().skip(1).any(|token| hostnames.contains(&token))
}

fn validate<'a, S: AsRef<str>>(ip: &str, hostnames: &'a [S], marker: &str) -> Result<Vec<&'a str>> {
    if ip.is_empty() || ip.contains(char::is_whitespace) {
        return Err(Error::InvalidArgument(format!("invalid ip {ip:?}")));
    }
    if marker.is_empty() || marker.contains(char::is_whitespace) {
        return Err(Error::InvalidArgument(format!("invalid marker {marker:?}")));
    }
    if hostnames.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "no hostnames to pin to {ip} under marker {marker:?}"
        )));
    }

    let mut unique: Vec<&str> = Vec::with_capacity(hostnames.len());
    for hostname in hostnames.iter().map(AsRef::as_ref) {
        if hostname.is_empty() || hostname.contains(char::is_whitespace) || hostname.contains('#') {
            return Err(Error::InvalidArgument(format!("invalid hostname {hostname:?}")));
        }
        if !unique.contains(&hostname) {
            unique.push(hostname);
        }
    }
    Ok(unique)
}

/// Hostnames served by the control-plane ingress.
pub fn cp_hostnames(base_domain: &str) -> Vec<String> {
    vec![
        base_domain.to_string(),
        format!("houston.{base_domain}"),
        format!("app.{base_domain}"),
        format!("grafana.{base_domain}"),
    ]
}

/// Hostnames served by the data plane under its own domain (`<prefix>.<base>`).
pub fn dp_hostnames(dp: &str) -> Vec<String> {
    let mut hostnames = vec![dp.to_string()];
    hostnames.extend(
        [
            "deployments",
            "registry",
            "commander",
            "elasticsearch",
            "prom-proxy",
            "prometheus",
        ]
        .iter()
        .map(|sub| format!("{sub}.{dp}")),
    );
    hostnames
}
