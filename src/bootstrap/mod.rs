//! Node bootstrap script generation
//!
//! Every instance this controller creates boots with a cloud-init script
//! that installs the Kubernetes packages and joins the cluster via kubeadm.
//!
//! # Security Model
//!
//! - The bootstrap token is embedded verbatim in the rendered script
//! - The script therefore has the same sensitivity as the token: it is
//!   handed to the provisioning gateway and never logged or persisted
//! - Rendering is pure formatting; token validity and endpoint reachability
//!   are the cluster administrator's responsibility

use crate::config::SecretString;

/// Render the cloud-init script that joins a node to the cluster
///
/// The script runs once on first boot: install kubelet/kubeadm/kubectl, then
/// `kubeadm join` against the configured endpoint. Formatting only; no
/// validation, no I/O.
pub fn join_script(
    cluster_name: &str,
    cluster_endpoint: &str,
    bootstrap_token: &SecretString,
) -> String {
    format!(
        r#"#!/bin/bash
set -euo pipefail

# Joins this machine to {cluster_name} as a worker node.
export DEBIAN_FRONTEND=noninteractive

apt-get update
apt-get install -y apt-transport-https ca-certificates curl
apt-get install -y kubelet kubeadm kubectl
apt-mark hold kubelet kubeadm kubectl

systemctl enable kubelet

kubeadm join --token {token} {endpoint}
"#,
        cluster_name = cluster_name,
        token = bootstrap_token.expose(),
        endpoint = cluster_endpoint,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> SecretString {
        SecretString::new("abcdef.0123456789abcdef")
    }

    /// Story: The script is a well-formed bash cloud-init payload
    ///
    /// cloud-init executes the body as a script, so it must start with a
    /// shebang and fail fast on any step going wrong.
    #[test]
    fn story_script_is_executable_bash() {
        let script = join_script("prod", "10.0.0.1:6443", &token());

        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("set -euo pipefail"));
    }

    /// Story: The script installs the node components before joining
    #[test]
    fn story_script_installs_kubernetes_packages() {
        let script = join_script("prod", "10.0.0.1:6443", &token());

        assert!(script.contains("apt-get install -y kubelet kubeadm kubectl"));
        assert!(script.contains("apt-mark hold kubelet kubeadm kubectl"));
        assert!(script.contains("systemctl enable kubelet"));
    }

    /// Story: The join line carries the token and the endpoint
    ///
    /// This is the line that actually attaches the node to the cluster; the
    /// token and endpoint land in it exactly as configured.
    #[test]
    fn story_script_joins_the_configured_cluster() {
        let script = join_script("prod", "10.0.0.1:6443", &token());

        assert!(script
            .contains("kubeadm join --token abcdef.0123456789abcdef 10.0.0.1:6443"));
        assert!(script.contains("# Joins this machine to prod"));
    }

    /// Story: Rendering is deterministic
    ///
    /// The same inputs produce the same script, so retried provisioning
    /// attempts hand identical payloads to the gateway.
    #[test]
    fn story_rendering_is_deterministic() {
        let first = join_script("prod", "10.0.0.1:6443", &token());
        let second = join_script("prod", "10.0.0.1:6443", &token());

        assert_eq!(first, second);
    }
}
