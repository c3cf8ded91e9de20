//! NodeClaim Custom Resource Definition
//!
//! NodeClaims are Karpenter's request for capacity: "give me a node that
//! satisfies these requirements". This controller consumes the subset of the
//! karpenter.sh surface it needs (requirements, finalizers, deletion
//! timestamp, status) and leaves everything else untouched for other
//! controllers to interpret.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::{Condition, NodeClaimPhase, Requirement};
use crate::{CAPACITY_TYPE_LABEL, INSTANCE_TYPE_LABEL, LAUNCH_ID_ANNOTATION};

/// Specification for a NodeClaim
///
/// Requirements carry everything this controller decides on: the
/// capacity-type requirement selects which controller satisfies the claim,
/// and the instance-type requirement names the GPU class to provision.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "karpenter.sh",
    version = "v1beta1",
    kind = "NodeClaim",
    plural = "nodeclaims",
    status = "NodeClaimStatus",
    namespaced = false,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"ProviderID","type":"string","jsonPath":".status.providerID"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NodeClaimSpec {
    /// Scheduling requirements constraining the node this claim becomes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<Requirement>,

    /// Reference to a provider-specific node class (carried, not interpreted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_class_ref: Option<NodeClassRef>,

    /// Resources the scheduler expects from the node (carried, not interpreted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

impl NodeClaimSpec {
    /// First requirement with the given key, if any
    pub fn requirement(&self, key: &str) -> Option<&Requirement> {
        self.requirements.iter().find(|r| r.key == key)
    }

    /// Returns true if this claim positively requests the given capacity type
    ///
    /// Only an `In` requirement on the capacity-type key whose value set
    /// contains the literal counts. Claims for other capacity types, or with
    /// no capacity-type requirement at all, belong to other controllers.
    pub fn requests_capacity_type(&self, capacity_type: &str) -> bool {
        self.requirements
            .iter()
            .any(|r| r.key == CAPACITY_TYPE_LABEL && r.allows(capacity_type))
    }

    /// Logical instance type requested by this claim
    ///
    /// The first value of the instance-type requirement is authoritative;
    /// additional values are ignored.
    pub fn resolve_instance_type(&self) -> crate::Result<&str> {
        let requirement = self.requirement(INSTANCE_TYPE_LABEL).ok_or_else(|| {
            crate::Error::validation(format!(
                "node claim has no {} requirement",
                INSTANCE_TYPE_LABEL
            ))
        })?;

        requirement
            .values
            .first()
            .map(String::as_str)
            .ok_or_else(|| {
                crate::Error::validation(format!(
                    "{} requirement lists no values",
                    INSTANCE_TYPE_LABEL
                ))
            })
    }
}

/// Reference to the node class that parameterizes provisioning
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeClassRef {
    /// API version of the referenced class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Kind of the referenced class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Name of the referenced class
    pub name: String,
}

/// Resource quantities requested from the node
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ResourceRequirements {
    /// Requested quantities by resource name (e.g., "nvidia.com/gpu": "1")
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

/// Status for a NodeClaim
///
/// Written by this controller for observability; reconciliation decisions
/// never read it back, with one exception: a recorded provider ID marks the
/// claim as already satisfied.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeClaimStatus {
    /// Current phase of the claim lifecycle
    #[serde(default)]
    pub phase: NodeClaimPhase,

    /// Provider ID of the created instance,
    /// `scaleway://instance/{zone}/{server-id}`
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "providerID")]
    pub provider_id: Option<String>,

    /// Human-readable message about current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Conditions representing the claim state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl NodeClaimStatus {
    /// Create a new status with the given phase
    pub fn with_phase(phase: NodeClaimPhase) -> Self {
        Self {
            phase,
            ..Default::default()
        }
    }

    /// Set the phase and return self for chaining
    pub fn phase(mut self, phase: NodeClaimPhase) -> Self {
        self.phase = phase;
        self
    }

    /// Set the provider ID and return self for chaining
    pub fn provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    /// Set the message and return self for chaining
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Add a condition and return self for chaining
    pub fn condition(mut self, condition: Condition) -> Self {
        // Remove existing condition of the same type
        self.conditions.retain(|c| c.type_ != condition.type_);
        self.conditions.push(condition);
        self
    }
}

impl NodeClaim {
    /// Returns true if the claim carries the given finalizer
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .map(|f| f.iter().any(|t| t == finalizer))
            .unwrap_or(false)
    }

    /// Returns true if deletion has been requested for this claim
    pub fn marked_for_deletion(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Launch marker persisted before the first create attempt, if any
    pub fn launch_id(&self) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(LAUNCH_ID_ANNOTATION))
            .map(String::as_str)
    }

    /// Provider ID recorded in status, if an instance was already created
    pub fn provider_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.provider_id.as_deref())
    }
}
