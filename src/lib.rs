//! karpenter-scaleway - Karpenter NodeClaim controller for Scaleway GPU instances
//!
//! This operator watches Karpenter `NodeClaim` resources and satisfies the
//! ones requesting Scaleway GPU capacity by creating (and later releasing)
//! Scaleway instances that join the cluster via kubeadm.
//!
//! # Architecture
//!
//! Reconciliation is level-based:
//! - A watch delivery only names a claim; every decision is taken from a
//!   fresh read of the control plane, never from event payloads or in-memory
//!   state
//! - Each delivery derives a lifecycle stage from the claim's observed fields
//!   and performs at most one lifecycle side effect (add finalizer, create
//!   instance, or release instance and remove finalizer)
//! - Redelivery of the same state is always safe; a launch marker persisted
//!   before the first create attempt keeps instance creation at-most-once
//!   even when a create response is lost
//!
//! # Modules
//!
//! - [`crd`] - The NodeClaim resource surface (requirements, status, conditions)
//! - [`controller`] - Kubernetes controller reconciliation logic
//! - [`scaleway`] - Instance gateway trait, Scaleway Instance API client, and
//!   instance type translation
//! - [`bootstrap`] - cloud-init script that joins created instances to the cluster
//! - [`backoff`] - Per-claim retry delays for the controller error policy
//! - [`config`] - Controller configuration and secret handling
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod backoff;
pub mod bootstrap;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod scaleway;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Well-Known Kubernetes Names
// =============================================================================
// Labels, annotations, and the finalizer this controller reads and writes on
// NodeClaims. Centralizing them here keeps the reconciler, the CRD accessors,
// and test fixtures in agreement.

/// Finalizer this controller owns on NodeClaims it provisions
///
/// Added before any instance is created so a deletion can never observe a
/// claim whose instance exists but whose teardown would be skipped.
pub const FINALIZER: &str = "scaleway.com/finalizer";

/// Annotation persisted on a claim before its first create attempt
///
/// The value also tags the created instance, so a delivery that finds the
/// marker but no recorded provider ID can look the instance up instead of
/// creating a duplicate.
pub const LAUNCH_ID_ANNOTATION: &str = "scaleway.com/launch-id";

/// Requirement key carrying the capacity class a claim asks for
pub const CAPACITY_TYPE_LABEL: &str = "karpenter.sh/capacity-type";

/// Requirement key carrying the logical instance type a claim asks for
pub const INSTANCE_TYPE_LABEL: &str = "node.kubernetes.io/instance-type";

/// Field manager name used for all patches issued by this controller
pub const FIELD_MANAGER: &str = "karpenter-scaleway";

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Capacity-type literal this controller acts on unless configured otherwise
pub const DEFAULT_CAPACITY_TYPE: &str = "scaleway-gpu";

/// Default Scaleway availability zone for created instances
pub const DEFAULT_ZONE: &str = "fr-par-1";

/// Default GPU-capable machine image for created instances
pub const DEFAULT_IMAGE: &str = "ubuntu_jammy_gpu_os_12";
