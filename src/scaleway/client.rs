//! HTTP client for the Scaleway Instance API
//!
//! Implements [`InstanceProvisioner`] over the zonal Instance API. Creating
//! an instance is three calls: create the server, attach the cloud-init
//! script, and power it on. Servers are created stopped, so the script is
//! always in place before first boot.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{
    InstanceProvisioner, ProviderError, ProvisionedInstance, ProvisioningRequest,
    LAUNCH_ID_TAG_PREFIX,
};
use crate::config::SecretString;

/// Public Scaleway API endpoint
pub const DEFAULT_API_URL: &str = "https://api.scaleway.com";

const AUTH_HEADER: &str = "X-Auth-Token";

/// Connection settings for [`ScalewayClient`]
#[derive(Clone, Debug)]
pub struct ScalewayClientConfig {
    /// Base URL of the Scaleway API
    pub api_url: String,
    /// Project that owns created instances
    pub project_id: String,
    /// API secret key sent as X-Auth-Token
    pub secret_key: SecretString,
    /// Per-request timeout
    pub timeout: Duration,
}

impl ScalewayClientConfig {
    /// Create a configuration against the public API with a 30s timeout
    pub fn new(project_id: impl Into<String>, secret_key: SecretString) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            project_id: project_id.into(),
            secret_key,
            timeout: Duration::from_secs(30),
        }
    }

    /// Override the API base URL
    pub fn api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Override the per-request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Client for the Scaleway Instance API
///
/// One instance is shared across all reconciliations; reqwest pools
/// connections internally.
pub struct ScalewayClient {
    http: reqwest::Client,
    config: ScalewayClientConfig,
}

impl ScalewayClient {
    /// Build a client from the given configuration
    pub fn new(config: ScalewayClientConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self { http, config })
    }

    fn url(&self, zone: &str, path: &str) -> String {
        format!("{}/instance/v1/zones/{}{}", self.config.api_url, zone, path)
    }

    /// Turn a non-success response into the matching [`ProviderError`]
    async fn error_for(response: reqwest::Response) -> ProviderError {
        let status = response.status();
        let path = response.url().path().to_string();

        if status == reqwest::StatusCode::NOT_FOUND {
            return ProviderError::NotFound(path);
        }

        // Scaleway error bodies carry a "message" field; fall back to the
        // raw body when they don't.
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|e| e.message)
            .unwrap_or(body);

        ProviderError::Api {
            status: status.as_u16(),
            message,
        }
    }

    async fn create_server(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<ScalewayServer, ProviderError> {
        let url = self.url(&request.zone, "/servers");
        debug!(name = %request.name, commercial_type = %request.commercial_type, "creating server");

        let response = self
            .http
            .post(&url)
            .header(AUTH_HEADER, self.config.secret_key.expose())
            .json(&json!({
                "name": request.name,
                "commercial_type": request.commercial_type,
                "image": request.image,
                "project": self.config.project_id,
                "tags": request.tags,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let body = response.text().await?;
        let created: CreateServerResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Decode(format!("create server response: {}", e)))?;
        Ok(created.server)
    }

    async fn set_cloud_init(
        &self,
        zone: &str,
        server_id: &str,
        script: &str,
    ) -> Result<(), ProviderError> {
        let url = self.url(zone, &format!("/servers/{}/user_data/cloud-init", server_id));
        debug!(%server_id, "attaching cloud-init script");

        let response = self
            .http
            .patch(&url)
            .header(AUTH_HEADER, self.config.secret_key.expose())
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(script.to_string())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        Ok(())
    }

    async fn server_action(
        &self,
        zone: &str,
        server_id: &str,
        action: &str,
    ) -> Result<(), ProviderError> {
        let url = self.url(zone, &format!("/servers/{}/action", server_id));
        debug!(%server_id, %action, "requesting server action");

        let response = self
            .http
            .post(&url)
            .header(AUTH_HEADER, self.config.secret_key.expose())
            .json(&json!({ "action": action }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        Ok(())
    }

    async fn list_servers_by_tag(
        &self,
        zone: &str,
        tag: &str,
    ) -> Result<Vec<ScalewayServer>, ProviderError> {
        let url = self.url(zone, "/servers");

        let response = self
            .http
            .get(&url)
            .header(AUTH_HEADER, self.config.secret_key.expose())
            .query(&[("tags", tag)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let body = response.text().await?;
        let listed: ListServersResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Decode(format!("list servers response: {}", e)))?;
        Ok(listed.servers)
    }
}

#[async_trait]
impl InstanceProvisioner for ScalewayClient {
    async fn create_instance(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<ProvisionedInstance, ProviderError> {
        let server = self.create_server(request).await?;
        self.set_cloud_init(&request.zone, &server.id, &request.cloud_init)
            .await?;
        self.server_action(&request.zone, &server.id, "poweron")
            .await?;

        Ok(ProvisionedInstance {
            id: server.id,
            name: server.name,
            zone: request.zone.clone(),
            commercial_type: server.commercial_type,
        })
    }

    async fn delete_instance(&self, zone: &str, server_id: &str) -> Result<(), ProviderError> {
        self.server_action(zone, server_id, "terminate").await
    }

    async fn find_by_launch_id(
        &self,
        zone: &str,
        launch_id: &str,
    ) -> Result<Option<ProvisionedInstance>, ProviderError> {
        let tag = format!("{}{}", LAUNCH_ID_TAG_PREFIX, launch_id);
        let servers = self.list_servers_by_tag(zone, &tag).await?;

        Ok(servers.into_iter().next().map(|server| ProvisionedInstance {
            id: server.id,
            name: server.name,
            zone: zone.to_string(),
            commercial_type: server.commercial_type,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct ScalewayServer {
    id: String,
    name: String,
    commercial_type: String,
}

#[derive(Debug, Deserialize)]
struct CreateServerResponse {
    server: ScalewayServer,
}

#[derive(Debug, Deserialize)]
struct ListServersResponse {
    #[serde(default)]
    servers: Vec<ScalewayServer>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{
        body_partial_json, body_string_contains, header, method, path, query_param,
    };
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> ScalewayClient {
        let config = ScalewayClientConfig::new("proj-1", SecretString::new("test-secret"))
            .api_url(server.uri());
        ScalewayClient::new(config).unwrap()
    }

    fn server_body(id: &str, name: &str) -> serde_json::Value {
        json!({
            "server": {
                "id": id,
                "name": name,
                "commercial_type": "L4-1-24G",
                "state": "stopped",
                "tags": ["managed-by=karpenter-scaleway"]
            }
        })
    }

    fn sample_request() -> ProvisioningRequest {
        ProvisioningRequest {
            zone: "fr-par-1".to_string(),
            commercial_type: "L4-1-24G".to_string(),
            image: "ubuntu_jammy_gpu_os_12".to_string(),
            name: "gpu-claim-7tkx9".to_string(),
            cloud_init: "#!/bin/bash\nkubeadm join --token tok 10.0.0.1:6443".to_string(),
            tags: vec![
                "karpenter-nodeclaim=gpu-claim-7tkx9".to_string(),
                "karpenter-launch-id=3f8e2a60-0000-4000-8000-c0ffee000001".to_string(),
                "managed-by=karpenter-scaleway".to_string(),
            ],
        }
    }

    /// Story: Creating an instance is create + cloud-init + poweron
    ///
    /// The server is created stopped, the join script is attached, and only
    /// then is power-on requested, so a node can never boot without its
    /// bootstrap configuration. Every call authenticates with the secret key.
    #[tokio::test]
    async fn story_create_instance_provisions_boots_and_tags() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/instance/v1/zones/fr-par-1/servers"))
            .and(header(AUTH_HEADER, "test-secret"))
            .and(body_partial_json(json!({
                "name": "gpu-claim-7tkx9",
                "commercial_type": "L4-1-24G",
                "image": "ubuntu_jammy_gpu_os_12",
                "project": "proj-1",
            })))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(server_body("sv-1", "gpu-claim-7tkx9")),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("PATCH"))
            .and(path(
                "/instance/v1/zones/fr-par-1/servers/sv-1/user_data/cloud-init",
            ))
            .and(header(AUTH_HEADER, "test-secret"))
            .and(header("content-type", "text/plain"))
            .and(body_string_contains("kubeadm join"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/instance/v1/zones/fr-par-1/servers/sv-1/action"))
            .and(header(AUTH_HEADER, "test-secret"))
            .and(body_partial_json(json!({ "action": "poweron" })))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "task": {"id": "t-1"} })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let instance = client.create_instance(&sample_request()).await.unwrap();

        assert_eq!(instance.id, "sv-1");
        assert_eq!(instance.name, "gpu-claim-7tkx9");
        assert_eq!(instance.zone, "fr-par-1");
        assert_eq!(instance.commercial_type, "L4-1-24G");
        assert_eq!(
            instance.provider_id(),
            "scaleway://instance/fr-par-1/sv-1"
        );
    }

    /// Story: API rejections surface status and message
    ///
    /// When the zone has no capacity left, the operator needs Scaleway's own
    /// words in the error, not a generic failure.
    #[tokio::test]
    async fn story_create_surfaces_api_rejection_with_message() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/instance/v1/zones/fr-par-1/servers"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "message": "not enough L4-1-24G capacity in fr-par-1"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.create_instance(&sample_request()).await.unwrap_err();

        match err {
            ProviderError::Api { status, message } => {
                assert_eq!(status, 400);
                assert!(message.contains("not enough L4-1-24G capacity"));
            }
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    /// Story: Releasing an instance issues a terminate action
    #[tokio::test]
    async fn story_delete_issues_terminate_action() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/instance/v1/zones/fr-par-1/servers/sv-1/action"))
            .and(body_partial_json(json!({ "action": "terminate" })))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "task": {"id": "t-2"} })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client.delete_instance("fr-par-1", "sv-1").await.unwrap();
    }

    /// Story: Releasing an already-gone instance reports NotFound
    ///
    /// The teardown path maps this to success; the client's job is only to
    /// classify it correctly.
    #[tokio::test]
    async fn story_delete_missing_instance_reports_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/instance/v1/zones/fr-par-1/servers/sv-gone/action"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "message": "resource is not found"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .delete_instance("fr-par-1", "sv-gone")
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }

    /// Story: A lost create response is recovered through the launch tag
    ///
    /// The lookup filters on the exact launch-id tag and returns the first
    /// match; no match means the create genuinely never happened.
    #[tokio::test]
    async fn story_find_by_launch_id_returns_tagged_instance() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/instance/v1/zones/fr-par-1/servers"))
            .and(query_param(
                "tags",
                "karpenter-launch-id=3f8e2a60-0000-4000-8000-c0ffee000001",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "servers": [{
                    "id": "sv-7",
                    "name": "gpu-claim-7tkx9",
                    "commercial_type": "L4-1-24G"
                }]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let found = client
            .find_by_launch_id("fr-par-1", "3f8e2a60-0000-4000-8000-c0ffee000001")
            .await
            .unwrap();

        let instance = found.expect("should find the tagged instance");
        assert_eq!(instance.id, "sv-7");
        assert_eq!(instance.zone, "fr-par-1");
    }

    /// Story: No tagged instance means the create never happened
    #[tokio::test]
    async fn story_find_by_launch_id_returns_none_when_untagged() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/instance/v1/zones/fr-par-1/servers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "servers": [] })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let found = client
            .find_by_launch_id("fr-par-1", "3f8e2a60-0000-4000-8000-c0ffee000001")
            .await
            .unwrap();

        assert!(found.is_none());
    }

    /// Story: A response that doesn't match the wire shape is a decode error
    ///
    /// Distinct from transport and API errors so an API contract drift shows
    /// up clearly in logs.
    #[tokio::test]
    async fn story_malformed_create_response_is_decode_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/instance/v1/zones/fr-par-1/servers"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "instance": {} })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.create_instance(&sample_request()).await.unwrap_err();

        assert!(matches!(err, ProviderError::Decode(_)));
    }
}
