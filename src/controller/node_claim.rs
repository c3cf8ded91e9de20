//! NodeClaim controller implementation
//!
//! This module implements the reconciliation logic for NodeClaim resources.
//! Reconciliation is level-based: the delivered object is only trusted for
//! its name, current state is re-fetched from the API server, a lifecycle
//! stage is derived from the observed fields, and at most one lifecycle side
//! effect is performed per delivery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

use crate::backoff::BackoffTracker;
use crate::bootstrap;
use crate::config::ControllerConfig;
use crate::crd::{
    Condition, ConditionStatus, NodeClaim, NodeClaimPhase, NodeClaimStatus,
};
use crate::error::RetryClass;
use crate::scaleway::{
    self, InstanceProvisioner, ProvisionedInstance, ProvisioningRequest, CLAIM_TAG_PREFIX,
    LAUNCH_ID_TAG_PREFIX, MANAGED_BY_TAG,
};
use crate::{Error, FIELD_MANAGER, FINALIZER, LAUNCH_ID_ANNOTATION};

/// Trait abstracting Kubernetes client operations for NodeClaims
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production. Every method is idempotent so the
/// reconciler can safely retry after a transient failure.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClaimClient: Send + Sync {
    /// Fetch the current state of a claim
    ///
    /// Returns `None` when the claim no longer exists; a delivery for a
    /// deleted claim is a no-op, not an error.
    async fn get_claim(&self, name: &str) -> Result<Option<NodeClaim>, Error>;

    /// Add a finalizer to a claim if it is not already present
    async fn add_finalizer(&self, name: &str, finalizer: &str) -> Result<(), Error>;

    /// Remove a finalizer from a claim if present
    ///
    /// A claim that no longer exists counts as success; there is nothing
    /// left holding deletion up.
    async fn remove_finalizer(&self, name: &str, finalizer: &str) -> Result<(), Error>;

    /// Set a single annotation on a claim
    async fn set_annotation(&self, name: &str, key: &str, value: &str) -> Result<(), Error>;

    /// Patch the status subresource of a claim
    async fn patch_status(&self, name: &str, status: &NodeClaimStatus) -> Result<(), Error>;
}

/// Real Kubernetes client implementation for claim operations
pub struct ClaimClientImpl {
    client: Client,
}

impl ClaimClientImpl {
    /// Create a new ClaimClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self) -> Api<NodeClaim> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl ClaimClient for ClaimClientImpl {
    async fn get_claim(&self, name: &str) -> Result<Option<NodeClaim>, Error> {
        match self.api().get(name).await {
            Ok(claim) => Ok(Some(claim)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn add_finalizer(&self, name: &str, finalizer: &str) -> Result<(), Error> {
        let api = self.api();
        let claim = api.get(name).await?;

        let mut finalizers = claim.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == finalizer) {
            debug!(claim = %name, "finalizer already present");
            return Ok(());
        }
        finalizers.push(finalizer.to_string());

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });

        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;

        Ok(())
    }

    async fn remove_finalizer(&self, name: &str, finalizer: &str) -> Result<(), Error> {
        let api = self.api();
        let claim = match api.get(name).await {
            Ok(claim) => claim,
            Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut finalizers = claim.metadata.finalizers.unwrap_or_default();
        let before = finalizers.len();
        finalizers.retain(|f| f != finalizer);
        if finalizers.len() == before {
            debug!(claim = %name, "finalizer already absent");
            return Ok(());
        }

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });

        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;

        Ok(())
    }

    async fn set_annotation(&self, name: &str, key: &str, value: &str) -> Result<(), Error> {
        let patch = serde_json::json!({
            "metadata": {
                "annotations": {
                    key: value
                }
            }
        });

        self.api()
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;

        Ok(())
    }

    async fn patch_status(&self, name: &str, status: &NodeClaimStatus) -> Result<(), Error> {
        let status_patch = serde_json::json!({
            "status": status
        });

        self.api()
            .patch_status(
                name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&status_patch),
            )
            .await?;

        Ok(())
    }
}

/// Shared state for claim reconciliation
pub struct Context {
    /// Claim store operations (trait object for testability)
    pub claims: Arc<dyn ClaimClient>,
    /// Instance gateway (trait object for testability)
    pub provisioner: Arc<dyn InstanceProvisioner>,
    /// Immutable controller configuration
    pub config: ControllerConfig,
    /// Per-claim retry delays consumed by the error policy
    pub backoff: BackoffTracker,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client, config: ControllerConfig) -> ContextBuilder {
        ContextBuilder::new(client, config)
    }

    /// Create a context for testing with custom mock clients
    ///
    /// This method is primarily for unit tests where a real Kubernetes
    /// client is not available. For production code, use [`Context::builder`].
    #[cfg(test)]
    pub fn for_testing(
        claims: Arc<dyn ClaimClient>,
        provisioner: Arc<dyn InstanceProvisioner>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            claims,
            provisioner,
            config,
            backoff: BackoffTracker::default(),
        }
    }
}

/// Builder for constructing [`Context`] instances
///
/// # Examples
///
/// Production context over the Scaleway API:
/// ```ignore
/// let ctx = Context::builder(client, config)
///     .provisioner(Arc::new(scaleway_client))
///     .build()?;
/// ```
pub struct ContextBuilder {
    client: Client,
    config: ControllerConfig,
    claims: Option<Arc<dyn ClaimClient>>,
    provisioner: Option<Arc<dyn InstanceProvisioner>>,
}

impl ContextBuilder {
    /// Create a new builder with the given Kubernetes client and config
    fn new(client: Client, config: ControllerConfig) -> Self {
        Self {
            client,
            config,
            claims: None,
            provisioner: None,
        }
    }

    /// Override the claim client (primarily for testing)
    pub fn claim_client(mut self, claims: Arc<dyn ClaimClient>) -> Self {
        self.claims = Some(claims);
        self
    }

    /// Set the instance gateway
    pub fn provisioner(mut self, provisioner: Arc<dyn InstanceProvisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Build the Context
    ///
    /// Fails when no provisioner was supplied; unlike the claim client there
    /// is no default that can be derived from the Kubernetes client alone.
    pub fn build(self) -> crate::Result<Context> {
        let provisioner = self
            .provisioner
            .ok_or_else(|| Error::config("context requires an instance provisioner"))?;

        let claims = match self.claims {
            Some(claims) => claims,
            None => Arc::new(ClaimClientImpl::new(self.client)),
        };

        Ok(Context {
            claims,
            provisioner,
            config: self.config,
            backoff: BackoffTracker::default(),
        })
    }
}

/// Lifecycle stage derived from a claim's observed fields
///
/// Derivation looks at three things, in order of precedence: the
/// capacity-type requirement, the deletion timestamp, and this controller's
/// finalizer. The persisted status phase is never an input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ClaimLifecycle {
    /// The claim requests a capacity type this controller does not serve
    Irrelevant,
    /// Ours, not yet protected by the finalizer
    PendingProvision,
    /// Ours and finalized; an instance may be created
    ReadyToProvision,
    /// Being deleted while we still hold the finalizer
    PendingTeardown,
    /// Being deleted with our finalizer already gone
    Released,
}

fn classify(claim: &NodeClaim, capacity_type: &str) -> ClaimLifecycle {
    if !claim.spec.requests_capacity_type(capacity_type) {
        return ClaimLifecycle::Irrelevant;
    }

    let finalized = claim.has_finalizer(FINALIZER);
    if claim.marked_for_deletion() {
        if finalized {
            ClaimLifecycle::PendingTeardown
        } else {
            ClaimLifecycle::Released
        }
    } else if finalized {
        ClaimLifecycle::ReadyToProvision
    } else {
        ClaimLifecycle::PendingProvision
    }
}

/// Reconcile a NodeClaim resource
///
/// The delivered object only names the claim: the current state is re-read
/// from the API server so every decision reflects the control plane's truth
/// at reconcile time, not the (possibly stale) watch payload. The derived
/// lifecycle stage then selects exactly one side effect:
///
/// - `PendingProvision`: add the finalizer, defer provisioning
/// - `ReadyToProvision`: translate the claim and create one instance
/// - `PendingTeardown`: release the instance, then remove the finalizer
/// - `Irrelevant` / `Released`: nothing
///
/// # Arguments
///
/// * `claim` - The NodeClaim resource to reconcile
/// * `ctx` - Shared controller context
///
/// # Returns
///
/// Returns an `Action` indicating when to requeue the resource, or an error
/// if reconciliation failed.
#[instrument(skip(claim, ctx), fields(claim = %claim.name_any()))]
pub async fn reconcile(claim: Arc<NodeClaim>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = claim.name_any();
    debug!("reconciling node claim");

    let Some(claim) = ctx.claims.get_claim(&name).await? else {
        debug!("claim no longer exists");
        ctx.backoff.reset(&name);
        return Ok(Action::await_change());
    };

    let lifecycle = classify(&claim, &ctx.config.capacity_type);
    debug!(?lifecycle, "derived claim lifecycle");

    let action = match lifecycle {
        ClaimLifecycle::Irrelevant => {
            debug!(
                capacity_type = %ctx.config.capacity_type,
                "claim does not request our capacity type"
            );
            Action::await_change()
        }
        ClaimLifecycle::PendingProvision => begin_provision(&claim, &ctx).await?,
        ClaimLifecycle::ReadyToProvision => provision(&claim, &ctx).await?,
        ClaimLifecycle::PendingTeardown => teardown(&claim, &ctx).await?,
        ClaimLifecycle::Released => {
            debug!("claim already released");
            Action::await_change()
        }
    };

    ctx.backoff.reset(&name);
    Ok(action)
}

/// Protect a fresh claim with the finalizer; provisioning waits for the
/// next delivery
///
/// Ordering matters: once an instance exists, its claim must never be
/// deletable without passing through teardown, so the finalizer lands in a
/// delivery of its own before anything is created.
async fn begin_provision(claim: &NodeClaim, ctx: &Context) -> Result<Action, Error> {
    let name = claim.name_any();

    ctx.claims.add_finalizer(&name, FINALIZER).await?;
    info!(finalizer = FINALIZER, "added finalizer");

    Ok(Action::requeue(Duration::from_secs(5)))
}

/// Create the instance for a finalized claim
async fn provision(claim: &NodeClaim, ctx: &Context) -> Result<Action, Error> {
    let name = claim.name_any();

    // A recorded provider ID means an earlier delivery finished the job.
    if let Some(provider_id) = claim.provider_id() {
        debug!(%provider_id, "instance already recorded on status");
        return Ok(Action::await_change());
    }

    let logical = match claim.spec.resolve_instance_type() {
        Ok(logical) => logical,
        Err(e) => {
            warn!(error = %e, "claim has no usable instance type requirement");
            record_launch_failure(claim, ctx, "MissingInstanceType", &e).await?;
            return Err(e);
        }
    };

    let commercial_type = match ctx.config.instance_types.translate(logical) {
        Ok(commercial) => commercial.to_string(),
        Err(e) => {
            warn!(error = %e, "claim names an unsupported instance type");
            record_launch_failure(claim, ctx, "UnsupportedInstanceType", &e).await?;
            return Err(e);
        }
    };

    let launch_id = match claim.launch_id() {
        Some(id) => {
            // The marker without a recorded provider ID means a create may
            // already have happened whose response was lost. Look before
            // creating a duplicate.
            debug!(launch_id = %id, "launch marker present, checking for existing instance");
            if let Some(instance) = ctx
                .provisioner
                .find_by_launch_id(&ctx.config.zone, id)
                .await?
            {
                info!(
                    server_id = %instance.id,
                    launch_id = %id,
                    "adopting instance from interrupted launch"
                );
                record_launched(claim, ctx, &instance).await?;
                return Ok(Action::await_change());
            }
            id.to_string()
        }
        None => {
            // Persisted before the create call so a lost response can be
            // reconnected to the claim on redelivery.
            let id = Uuid::new_v4().to_string();
            ctx.claims
                .set_annotation(&name, LAUNCH_ID_ANNOTATION, &id)
                .await?;
            debug!(launch_id = %id, "persisted launch marker");
            id
        }
    };

    let request = ProvisioningRequest {
        zone: ctx.config.zone.clone(),
        commercial_type,
        image: ctx.config.image.clone(),
        name: name.clone(),
        cloud_init: bootstrap::join_script(
            &ctx.config.cluster_name,
            &ctx.config.cluster_endpoint,
            &ctx.config.bootstrap_token,
        ),
        tags: vec![
            format!("{}{}", CLAIM_TAG_PREFIX, name),
            format!("{}{}", LAUNCH_ID_TAG_PREFIX, launch_id),
            MANAGED_BY_TAG.to_string(),
        ],
    };

    let instance = ctx.provisioner.create_instance(&request).await?;
    info!(
        server_id = %instance.id,
        commercial_type = %instance.commercial_type,
        zone = %instance.zone,
        "created instance for claim"
    );

    record_launched(claim, ctx, &instance).await?;

    Ok(Action::await_change())
}

/// Release a deleting claim's instance, then let deletion proceed
async fn teardown(claim: &NodeClaim, ctx: &Context) -> Result<Action, Error> {
    let name = claim.name_any();

    match locate_instance(claim, ctx).await? {
        Some((zone, server_id)) => {
            record_releasing(claim, ctx).await?;
            release_instance(ctx, &zone, &server_id).await?;
        }
        None => {
            debug!("no instance attributed to claim, nothing to release");
        }
    }

    ctx.claims.remove_finalizer(&name, FINALIZER).await?;
    info!("released claim and removed finalizer");

    Ok(Action::await_change())
}

/// Find the instance a deleting claim is attributed to, if any
///
/// The recorded provider ID is authoritative. A claim without one may still
/// own an instance if its create response was lost, so the launch marker is
/// checked second. A malformed provider ID falls through to the marker
/// lookup rather than wedging deletion behind the finalizer.
async fn locate_instance(
    claim: &NodeClaim,
    ctx: &Context,
) -> Result<Option<(String, String)>, Error> {
    if let Some(provider_id) = claim.provider_id() {
        match scaleway::parse_provider_id(provider_id) {
            Ok(target) => return Ok(Some(target)),
            Err(e) => {
                warn!(error = %e, %provider_id, "ignoring unparseable provider ID");
            }
        }
    }

    if let Some(launch_id) = claim.launch_id() {
        let found = ctx
            .provisioner
            .find_by_launch_id(&ctx.config.zone, launch_id)
            .await?;
        return Ok(found.map(|instance| (instance.zone, instance.id)));
    }

    Ok(None)
}

async fn release_instance(ctx: &Context, zone: &str, server_id: &str) -> Result<(), Error> {
    match ctx.provisioner.delete_instance(zone, server_id).await {
        Ok(()) => {
            info!(%server_id, %zone, "instance released");
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            // The goal was for the instance not to exist. It doesn't.
            debug!(%server_id, "instance already gone");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Error policy for the controller
///
/// Called when reconciliation fails. Deterministic failures wait for the
/// claim to change; everything else retries with per-claim exponential
/// backoff so one stuck claim cannot hammer the API.
///
/// # Arguments
///
/// * `claim` - The NodeClaim that failed reconciliation
/// * `error` - The error that occurred
/// * `ctx` - Shared controller context (holds the backoff tracker)
pub fn error_policy(claim: Arc<NodeClaim>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = claim.name_any();
    error!(
        ?error,
        claim = %name,
        "reconciliation failed"
    );

    match error.retry_class() {
        RetryClass::AwaitChange => Action::await_change(),
        RetryClass::Backoff => Action::requeue(ctx.backoff.next_delay(&name)),
    }
}

/// Record a created (or adopted) instance on the claim status
async fn record_launched(
    claim: &NodeClaim,
    ctx: &Context,
    instance: &ProvisionedInstance,
) -> Result<(), Error> {
    let name = claim.name_any();

    let condition = Condition::new(
        "Launched",
        ConditionStatus::True,
        "InstanceCreated",
        format!(
            "instance {} ({}) created in {}",
            instance.id, instance.commercial_type, instance.zone
        ),
    );

    let status = NodeClaimStatus::with_phase(NodeClaimPhase::Provisioned)
        .provider_id(instance.provider_id())
        .message(format!("instance {} provisioned", instance.id))
        .condition(condition);

    ctx.claims.patch_status(&name, &status).await?;

    info!("updated status to Provisioned");
    Ok(())
}

/// Record a deterministic launch failure on the claim status
///
/// The failed Launched condition is the operator-facing explanation of why
/// the claim will not be satisfied until its spec changes.
async fn record_launch_failure(
    claim: &NodeClaim,
    ctx: &Context,
    reason: &str,
    error: &Error,
) -> Result<(), Error> {
    let name = claim.name_any();

    let condition = Condition::new(
        "Launched",
        ConditionStatus::False,
        reason,
        error.to_string(),
    );

    let status = NodeClaimStatus::with_phase(NodeClaimPhase::Pending)
        .message(error.to_string())
        .condition(condition);

    ctx.claims.patch_status(&name, &status).await?;

    info!(reason, "recorded launch failure");
    Ok(())
}

/// Record that the claim's instance is being released
async fn record_releasing(claim: &NodeClaim, ctx: &Context) -> Result<(), Error> {
    let already_releasing = claim
        .status
        .as_ref()
        .map(|s| s.phase == NodeClaimPhase::Releasing)
        .unwrap_or(false);
    if already_releasing {
        return Ok(());
    }

    let status =
        NodeClaimStatus::with_phase(NodeClaimPhase::Releasing).message("releasing instance");

    ctx.claims.patch_status(&claim.name_any(), &status).await
}
