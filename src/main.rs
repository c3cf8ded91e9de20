//! karpenter-scaleway - Karpenter node provisioning for Scaleway GPU instances

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use karpenter_scaleway::config::{ControllerConfig, SecretString};
use karpenter_scaleway::controller::{error_policy, reconcile, Context};
use karpenter_scaleway::crd::NodeClaim;
use karpenter_scaleway::scaleway::{
    InstanceTypeTable, ScalewayClient, ScalewayClientConfig, DEFAULT_API_URL,
};
use karpenter_scaleway::{DEFAULT_CAPACITY_TYPE, DEFAULT_IMAGE, DEFAULT_ZONE, FIELD_MANAGER};

/// Karpenter NodeClaim controller that provisions Scaleway GPU instances
#[derive(Parser, Debug)]
#[command(name = "karpenter-scaleway", version, about, long_about = None)]
struct Cli {
    /// Generate the NodeClaim CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Install the NodeClaim CRD on startup (for clusters without Karpenter's
    /// own CRDs)
    #[arg(long)]
    install_crds: bool,

    /// Capacity type this controller serves; claims requesting anything else
    /// are ignored
    #[arg(long, env = "CAPACITY_TYPE", default_value = DEFAULT_CAPACITY_TYPE)]
    capacity_type: String,

    /// Scaleway availability zone for created instances
    #[arg(long, env = "SCW_ZONE", default_value = DEFAULT_ZONE)]
    zone: String,

    /// Machine image for created instances
    #[arg(long, env = "SCW_IMAGE", default_value = DEFAULT_IMAGE)]
    image: String,

    /// Name of the cluster created nodes join
    #[arg(long, env = "CLUSTER_NAME")]
    cluster_name: Option<String>,

    /// API server endpoint created nodes join (host:port)
    #[arg(long, env = "CLUSTER_ENDPOINT")]
    cluster_endpoint: Option<String>,

    /// kubeadm bootstrap token (prefer --bootstrap-token-file over the
    /// environment)
    #[arg(long, env = "SCW_BOOTSTRAP_TOKEN", hide_env_values = true)]
    bootstrap_token: Option<String>,

    /// File containing the kubeadm bootstrap token
    #[arg(long)]
    bootstrap_token_file: Option<std::path::PathBuf>,

    /// Scaleway project that owns created instances
    #[arg(long, env = "SCW_PROJECT_ID")]
    project_id: Option<String>,

    /// Scaleway API secret key
    #[arg(long, env = "SCW_SECRET_KEY", hide_env_values = true)]
    secret_key: Option<String>,

    /// Scaleway API base URL
    #[arg(long, env = "SCW_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// YAML file mapping logical GPU classes to Scaleway commercial types
    ///
    /// Replaces the built-in table entirely when given.
    #[arg(long)]
    instance_types_file: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        // Generate CRD YAML
        let crd = serde_yaml::to_string(&NodeClaim::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    run_controller(cli).await
}

/// Assemble the controller configuration from flags, environment, and files
async fn controller_config(cli: &Cli) -> anyhow::Result<ControllerConfig> {
    let cluster_name = cli
        .cluster_name
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--cluster-name (or CLUSTER_NAME) is required"))?;
    let cluster_endpoint = cli
        .cluster_endpoint
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--cluster-endpoint (or CLUSTER_ENDPOINT) is required"))?;

    let bootstrap_token = match &cli.bootstrap_token_file {
        Some(path) => {
            let token = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to read token file {:?}: {}", path, e))?;
            token.trim().to_string()
        }
        None => cli.bootstrap_token.clone().ok_or_else(|| {
            anyhow::anyhow!("--bootstrap-token-file or SCW_BOOTSTRAP_TOKEN is required")
        })?,
    };

    let instance_types = match &cli.instance_types_file {
        Some(path) => {
            let yaml = tokio::fs::read_to_string(path).await.map_err(|e| {
                anyhow::anyhow!("Failed to read instance types file {:?}: {}", path, e)
            })?;
            InstanceTypeTable::from_yaml(&yaml)?
        }
        None => InstanceTypeTable::default(),
    };

    Ok(ControllerConfig::new(
        cluster_name,
        cluster_endpoint,
        SecretString::new(bootstrap_token),
    )
    .capacity_type(cli.capacity_type.clone())
    .zone(cli.zone.clone())
    .image(cli.image.clone())
    .instance_types(instance_types))
}

/// Build the Scaleway API client from CLI credentials
fn scaleway_client(cli: &Cli) -> anyhow::Result<ScalewayClient> {
    let project_id = cli
        .project_id
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--project-id (or SCW_PROJECT_ID) is required"))?;
    let secret_key = cli
        .secret_key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--secret-key (or SCW_SECRET_KEY) is required"))?;

    let config = ScalewayClientConfig::new(project_id, SecretString::new(secret_key))
        .api_url(cli.api_url.clone());

    ScalewayClient::new(config)
        .map_err(|e| anyhow::anyhow!("Failed to create Scaleway client: {}", e))
}

/// Ensure the NodeClaim CRD is installed
///
/// Uses server-side apply so the CRD schema always matches this binary's
/// version. Opt-in: clusters running upstream Karpenter already carry the
/// CRD and own its lifecycle.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("Installing NodeClaim CRD...");
    crds.patch(
        "nodeclaims.karpenter.sh",
        &params,
        &Patch::Apply(&NodeClaim::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install NodeClaim CRD: {}", e))?;

    tracing::info!("NodeClaim CRD installed/updated");
    Ok(())
}

/// Run in controller mode - watches NodeClaims and provisions instances
async fn run_controller(cli: Cli) -> anyhow::Result<()> {
    tracing::info!("karpenter-scaleway controller starting...");

    let config = controller_config(&cli).await?;
    let provisioner = scaleway_client(&cli)?;

    tracing::info!(
        capacity_type = %config.capacity_type,
        zone = %config.zone,
        image = %config.image,
        instance_types = ?config.instance_types.supported(),
        "Controller configuration loaded"
    );

    // Create Kubernetes client
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if cli.install_crds {
        ensure_crds_installed(&client).await?;
    }

    let ctx = Arc::new(
        Context::builder(client.clone(), config)
            .provisioner(Arc::new(provisioner))
            .build()?,
    );

    let claims: Api<NodeClaim> = Api::all(client);

    tracing::info!("Starting NodeClaim controller...");

    Controller::new(claims, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "NodeClaim reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "NodeClaim reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("karpenter-scaleway controller shutting down");
    Ok(())
}
