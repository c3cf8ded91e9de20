//! Controller configuration
//!
//! Everything the reconciler needs to know at startup: which capacity type to
//! act on, where to create instances, and the material nodes need to join the
//! cluster. All of it is immutable once the controller is running.

use std::fmt;

use crate::scaleway::InstanceTypeTable;
use crate::{DEFAULT_CAPACITY_TYPE, DEFAULT_IMAGE, DEFAULT_ZONE};

/// A string that must never appear in logs or debug output
///
/// Used for the kubeadm bootstrap token and the Scaleway secret key. The
/// value is only reachable through [`SecretString::expose`], which keeps
/// accidental `{:?}` formatting from leaking it.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a secret value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the secret value
    ///
    /// Callers must not log or otherwise persist the returned string.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

/// Settings the reconciler consults on every delivery
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Capacity-type literal this controller acts on; claims requesting
    /// anything else are ignored
    pub capacity_type: String,
    /// Scaleway availability zone instances are created in
    pub zone: String,
    /// Machine image for created instances
    pub image: String,
    /// Name of the cluster nodes join (informational, embedded in the
    /// bootstrap script header)
    pub cluster_name: String,
    /// API server endpoint nodes join, host:port
    pub cluster_endpoint: String,
    /// kubeadm bootstrap token embedded in the join script
    pub bootstrap_token: SecretString,
    /// Mapping from logical GPU classes to Scaleway commercial types
    pub instance_types: InstanceTypeTable,
}

impl ControllerConfig {
    /// Create a configuration with defaults for everything but the cluster
    /// join material
    pub fn new(
        cluster_name: impl Into<String>,
        cluster_endpoint: impl Into<String>,
        bootstrap_token: SecretString,
    ) -> Self {
        Self {
            capacity_type: DEFAULT_CAPACITY_TYPE.to_string(),
            zone: DEFAULT_ZONE.to_string(),
            image: DEFAULT_IMAGE.to_string(),
            cluster_name: cluster_name.into(),
            cluster_endpoint: cluster_endpoint.into(),
            bootstrap_token,
            instance_types: InstanceTypeTable::default(),
        }
    }

    /// Override the capacity-type literal
    pub fn capacity_type(mut self, capacity_type: impl Into<String>) -> Self {
        self.capacity_type = capacity_type.into();
        self
    }

    /// Override the availability zone
    pub fn zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = zone.into();
        self
    }

    /// Override the machine image
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Override the instance type table
    pub fn instance_types(mut self, instance_types: InstanceTypeTable) -> Self {
        self.instance_types = instance_types;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: Secrets never leak through debug formatting
    ///
    /// Config structs get logged with `{:?}` during startup debugging; the
    /// token and API key must come out redacted.
    #[test]
    fn story_secret_string_redacts_debug_output() {
        let token = SecretString::new("abcdef.0123456789abcdef");

        let debug = format!("{:?}", token);
        assert_eq!(debug, "SecretString(***)");
        assert!(!debug.contains("abcdef"));

        // The whole config is safe to debug-print
        let config = ControllerConfig::new("prod", "10.0.0.1:6443", token);
        let debug = format!("{:?}", config);
        assert!(!debug.contains("abcdef"));
        assert!(debug.contains("SecretString(***)"));
    }

    /// Story: The secret is still reachable where it's actually needed
    #[test]
    fn story_secret_string_exposes_value_on_request() {
        let token = SecretString::new("abcdef.0123456789abcdef");
        assert_eq!(token.expose(), "abcdef.0123456789abcdef");

        let copy = token.clone();
        assert_eq!(copy, token);
    }

    /// Story: Defaults cover the common single-zone GPU deployment
    ///
    /// Only the join material is mandatory; zone, image, capacity type, and
    /// the type table all start from their well-known defaults and can be
    /// overridden individually.
    #[test]
    fn story_config_defaults_and_overrides() {
        let config = ControllerConfig::new(
            "prod",
            "10.0.0.1:6443",
            SecretString::new("abcdef.0123456789abcdef"),
        );
        assert_eq!(config.capacity_type, "scaleway-gpu");
        assert_eq!(config.zone, "fr-par-1");
        assert_eq!(config.image, "ubuntu_jammy_gpu_os_12");
        assert_eq!(config.cluster_name, "prod");
        assert_eq!(config.cluster_endpoint, "10.0.0.1:6443");

        let config = config.capacity_type("scaleway-gpu-staging").zone("nl-ams-2");
        assert_eq!(config.capacity_type, "scaleway-gpu-staging");
        assert_eq!(config.zone, "nl-ams-2");
        assert_eq!(config.image, "ubuntu_jammy_gpu_os_12");
    }
}
