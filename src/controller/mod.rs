//! Controller implementation for the NodeClaim CRD
//!
//! This module contains the reconciliation logic for NodeClaim resources.
//! The controller follows the Kubernetes controller pattern with
//! observe-diff-act loops.

mod node_claim;

pub use node_claim::{
    error_policy, reconcile, ClaimClient, ClaimClientImpl, Context, ContextBuilder,
};
