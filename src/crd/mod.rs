//! Custom Resource Definitions
//!
//! This module contains the NodeClaim resource surface consumed by the
//! controller.

mod node_claim;
mod types;

pub use node_claim::{
    NodeClaim, NodeClaimSpec, NodeClaimStatus, NodeClassRef, ResourceRequirements,
};
pub use types::{
    Condition, ConditionStatus, NodeClaimPhase, Requirement, RequirementOperator,
};
