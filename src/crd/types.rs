//! Supporting types for the NodeClaim CRD

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Operator for a scheduling requirement, following Kubernetes
/// NodeSelectorOperator conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[non_exhaustive]
pub enum RequirementOperator {
    /// Value must be in the requirement's value set
    #[default]
    In,
    /// Value must not be in the requirement's value set
    NotIn,
    /// The key must be present, values are ignored
    Exists,
    /// The key must be absent, values are ignored
    DoesNotExist,
    /// Value must be greater than the single listed value
    Gt,
    /// Value must be less than the single listed value
    Lt,
}

impl std::fmt::Display for RequirementOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::In => write!(f, "In"),
            Self::NotIn => write!(f, "NotIn"),
            Self::Exists => write!(f, "Exists"),
            Self::DoesNotExist => write!(f, "DoesNotExist"),
            Self::Gt => write!(f, "Gt"),
            Self::Lt => write!(f, "Lt"),
        }
    }
}

/// A single scheduling requirement on a NodeClaim
///
/// Karpenter expresses everything it knows about the desired node this way:
/// capacity type, instance type, zone, architecture. This controller only
/// interprets the keys it owns and passes over the rest.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Requirement {
    /// Label key the requirement constrains
    pub key: String,

    /// How the values are matched
    #[serde(default)]
    pub operator: RequirementOperator,

    /// Candidate values; meaning depends on the operator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl Requirement {
    /// Create an `In` requirement, the only form this controller emits
    pub fn in_values(
        key: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            key: key.into(),
            operator: RequirementOperator::In,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if this requirement positively admits `value`
    ///
    /// Only `In` requirements admit anything; every other operator is treated
    /// as not expressing interest in a concrete value.
    pub fn allows(&self, value: &str) -> bool {
        self.operator == RequirementOperator::In && self.values.iter().any(|v| v == value)
    }
}

/// Claim lifecycle phase as recorded in status
///
/// Written for observability only; reconciliation never reads it back.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[non_exhaustive]
pub enum NodeClaimPhase {
    /// Claim is waiting for an instance
    #[default]
    Pending,
    /// An instance has been created for this claim
    Provisioned,
    /// The claim is being deleted and its instance released
    Releasing,
}

impl std::fmt::Display for NodeClaimPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Provisioned => write!(f, "Provisioned"),
            Self::Releasing => write!(f, "Releasing"),
        }
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
///
/// This type follows Kubernetes API conventions and can be used
/// for any resource status.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Launched)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}
