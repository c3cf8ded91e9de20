//! Scaleway instance provisioning
//!
//! The reconciler talks to an [`InstanceProvisioner`] trait; the production
//! implementation is [`ScalewayClient`] over the Scaleway Instance API.
//! Everything the reconciler needs to know about an instance travels in
//! [`ProvisioningRequest`] and [`ProvisionedInstance`], so no HTTP detail
//! leaks into lifecycle decisions.

mod client;
mod instance_type;

pub use client::{ScalewayClient, ScalewayClientConfig, DEFAULT_API_URL};
pub use instance_type::InstanceTypeTable;

use std::fmt;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::Error;

/// Tag stamped on every instance this controller creates
pub const MANAGED_BY_TAG: &str = "managed-by=karpenter-scaleway";

/// Tag prefix attributing an instance to the claim it satisfies
pub const CLAIM_TAG_PREFIX: &str = "karpenter-nodeclaim=";

/// Tag prefix carrying the launch ID for at-most-once reconnection
pub const LAUNCH_ID_TAG_PREFIX: &str = "karpenter-launch-id=";

/// Error type for instance gateway operations
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Transport-level failure reaching the API
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API rejected the request
    #[error("api error (status {status}): {message}")]
    Api {
        /// HTTP status the API answered with
        status: u16,
        /// Message extracted from the response body
        message: String,
    },

    /// The requested resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The response body did not match the expected shape
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Returns true if the failure means the resource is already gone
    ///
    /// Teardown treats this as success: the goal was for the instance not to
    /// exist, and it doesn't.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Everything needed to create one instance for one claim
#[derive(Clone)]
pub struct ProvisioningRequest {
    /// Availability zone to create the instance in
    pub zone: String,
    /// Scaleway commercial type (already translated from the logical name)
    pub commercial_type: String,
    /// Machine image identifier
    pub image: String,
    /// Instance name, set to the claim name for operator-facing listings
    pub name: String,
    /// cloud-init script executed on first boot; embeds the bootstrap token
    pub cloud_init: String,
    /// Tags attributing the instance to its claim and launch
    pub tags: Vec<String>,
}

// The cloud-init script embeds the bootstrap token, so it stays out of all
// formatted output.
impl fmt::Debug for ProvisioningRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningRequest")
            .field("zone", &self.zone)
            .field("commercial_type", &self.commercial_type)
            .field("image", &self.image)
            .field("name", &self.name)
            .field("cloud_init", &"<redacted>")
            .field("tags", &self.tags)
            .finish()
    }
}

/// A created (or rediscovered) instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionedInstance {
    /// Server ID assigned by Scaleway
    pub id: String,
    /// Instance name
    pub name: String,
    /// Zone the instance lives in
    pub zone: String,
    /// Commercial type the instance was created as
    pub commercial_type: String,
}

impl ProvisionedInstance {
    /// Durable provider ID recorded on the claim status
    ///
    /// Format: `scaleway://instance/{zone}/{server-id}`. Teardown parses this
    /// back, so the format only changes together with [`parse_provider_id`].
    pub fn provider_id(&self) -> String {
        format!("scaleway://instance/{}/{}", self.zone, self.id)
    }
}

/// Parse a provider ID back into its zone and server ID
pub fn parse_provider_id(provider_id: &str) -> crate::Result<(String, String)> {
    let malformed =
        || Error::validation(format!("malformed provider ID: {}", provider_id));

    let rest = provider_id
        .strip_prefix("scaleway://instance/")
        .ok_or_else(malformed)?;
    let (zone, server_id) = rest.split_once('/').ok_or_else(malformed)?;

    if zone.is_empty() || server_id.is_empty() {
        return Err(malformed());
    }

    Ok((zone.to_string(), server_id.to_string()))
}

/// Trait abstracting the instance gateway for NodeClaims
///
/// This trait allows mocking the Scaleway API in tests while using the real
/// client in production. Implementations must be idempotent-friendly: the
/// reconciler may retry any call after a transient failure.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InstanceProvisioner: Send + Sync {
    /// Create one instance and boot it
    ///
    /// Returns once the instance exists with its cloud-init script attached
    /// and power-on requested. The instance may still be booting.
    async fn create_instance(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<ProvisionedInstance, ProviderError>;

    /// Release an instance
    ///
    /// An instance that no longer exists is reported as
    /// [`ProviderError::NotFound`]; callers on the teardown path treat that
    /// as success.
    async fn delete_instance(&self, zone: &str, server_id: &str) -> Result<(), ProviderError>;

    /// Find the instance carrying the given launch ID tag, if any
    ///
    /// Used to reconnect a claim to an instance whose create response was
    /// lost before it could be recorded.
    async fn find_by_launch_id(
        &self,
        zone: &str,
        launch_id: &str,
    ) -> Result<Option<ProvisionedInstance>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_instance() -> ProvisionedInstance {
        ProvisionedInstance {
            id: "sv-1".to_string(),
            name: "gpu-claim-7tkx9".to_string(),
            zone: "fr-par-1".to_string(),
            commercial_type: "L4-1-24G".to_string(),
        }
    }

    /// Story: Provider IDs survive the write-then-parse round trip
    ///
    /// Provisioning writes the ID into status; teardown parses it back to
    /// find what to release. Both directions must agree on the format.
    #[test]
    fn story_provider_id_round_trips_through_status() {
        let instance = sample_instance();

        let provider_id = instance.provider_id();
        assert_eq!(provider_id, "scaleway://instance/fr-par-1/sv-1");

        let (zone, server_id) = parse_provider_id(&provider_id).unwrap();
        assert_eq!(zone, "fr-par-1");
        assert_eq!(server_id, "sv-1");
    }

    /// Story: Garbage provider IDs are rejected, not misparsed
    ///
    /// A truncated or foreign provider ID (another controller's format) must
    /// fail loudly rather than release some unrelated server.
    #[test]
    fn story_malformed_provider_ids_are_rejected() {
        for bad in [
            "",
            "sv-1",
            "aws:///i-0abc",
            "scaleway://instance/",
            "scaleway://instance/fr-par-1",
            "scaleway://instance//sv-1",
            "scaleway://instance/fr-par-1/",
        ] {
            let err = parse_provider_id(bad).unwrap_err();
            assert!(
                err.to_string().contains("malformed provider ID"),
                "expected rejection for {:?}",
                bad
            );
        }
    }

    /// Story: The bootstrap script never appears in debug output
    ///
    /// Requests get logged on failure paths; the cloud-init body (which
    /// embeds the join token) must come out redacted.
    #[test]
    fn story_request_debug_output_redacts_cloud_init() {
        let request = ProvisioningRequest {
            zone: "fr-par-1".to_string(),
            commercial_type: "L4-1-24G".to_string(),
            image: "ubuntu_jammy_gpu_os_12".to_string(),
            name: "gpu-claim-7tkx9".to_string(),
            cloud_init: "#!/bin/bash\nkubeadm join --token abcdef.0123456789abcdef".to_string(),
            tags: vec!["managed-by=karpenter-scaleway".to_string()],
        };

        let debug = format!("{:?}", request);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("abcdef.0123456789abcdef"));
        assert!(!debug.contains("kubeadm join"));
    }

    #[test]
    fn test_not_found_classification() {
        assert!(ProviderError::NotFound("servers/sv-1".to_string()).is_not_found());
        assert!(!ProviderError::Api {
            status: 500,
            message: "boom".to_string()
        }
        .is_not_found());
    }
}
