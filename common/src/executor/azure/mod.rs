// Azure Resource Manager adapter
//
// Thin REST client behind `ResourceOperations`. Long-running operations are
// fire-and-forget: an accepted (2xx) response counts as success.

pub mod credential;

use crate::config::AzureConfig;
use crate::errors::ExecutionError;
use crate::executor::ResourceOperations;
use crate::models::{AutoscaleCapacity, AutoscaleSettingRef};
use crate::resource_id::ResourceId;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

pub use credential::{
    AccessToken, CachedCredential, ClientSecretCredential, IdentitySource,
    ManagedIdentityCredential, TokenCredential, MANAGEMENT_SCOPE,
};

const COMPUTE_API_VERSION: &str = "2023-03-01";
const AUTOSCALE_API_VERSION: &str = "2022-10-01";
const MYSQL_FLEXIBLE_API_VERSION: &str = "2021-05-01";
const AUTHORIZATION_API_VERSION: &str = "2022-04-01";

/// Effective permissions of the caller on a resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub not_actions: Vec<String>,
    #[serde(default)]
    pub data_actions: Vec<String>,
    #[serde(default)]
    pub not_data_actions: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionPage {
    #[serde(default)]
    value: Vec<Permission>,
    #[serde(default)]
    next_link: Option<String>,
}

/// AzureResourceClient talks to the management plane with a bearer token
pub struct AzureResourceClient {
    client: Client,
    endpoint: String,
    credential: Arc<dyn TokenCredential>,
}

impl AzureResourceClient {
    /// Build a client from configuration.
    ///
    /// Uses a client secret credential when tenant, client id and secret are
    /// all configured, managed identity otherwise.
    pub fn from_config(config: &AzureConfig) -> Result<Self, ExecutionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| {
                ExecutionError::AzureRequestFailed(format!("Failed to create HTTP client: {}", e))
            })?;

        let inner: Box<dyn TokenCredential> =
            match (&config.tenant_id, &config.client_id, &config.client_secret) {
                (Some(tenant_id), Some(client_id), Some(client_secret)) => {
                    info!(tenant_id = %tenant_id, client_id = %client_id, "Using client secret credential");
                    Box::new(ClientSecretCredential::new(
                        client.clone(),
                        config.authority_host.clone(),
                        tenant_id.clone(),
                        client_id.clone(),
                        client_secret.clone(),
                    ))
                }
                _ => {
                    let source = IdentitySource::from_env();
                    info!(source = ?source, "Using managed identity credential");
                    Box::new(ManagedIdentityCredential::new(
                        client.clone(),
                        source,
                        config.client_id.clone(),
                    ))
                }
            };

        Ok(Self::new(
            client,
            config.management_endpoint.clone(),
            Arc::new(CachedCredential::new(inner)),
        ))
    }

    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        credential: Arc<dyn TokenCredential>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            credential,
        }
    }

    /// Acquire the first token so credential problems surface at startup
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<(), ExecutionError> {
        let token = self.credential.get_token(MANAGEMENT_SCOPE).await?;
        info!(expires_at = %token.expires_at, "Azure credential initialized");
        Ok(())
    }

    /// List the caller's effective permissions on a resource, following pagination
    #[instrument(skip(self), fields(resource = %resource_id))]
    pub async fn list_permissions(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Vec<Permission>, ExecutionError> {
        let mut url = format!(
            "{}{}/providers/Microsoft.Authorization/permissions?api-version={}",
            self.endpoint,
            resource_id.as_str(),
            AUTHORIZATION_API_VERSION
        );
        let mut permissions = Vec::new();

        loop {
            let body = self
                .send(Method::GET, &url, None)
                .await?
                .ok_or_else(|| ExecutionError::InvalidResponse("empty permission list".to_string()))?;
            let page: PermissionPage = serde_json::from_value(body)
                .map_err(|e| ExecutionError::InvalidResponse(e.to_string()))?;
            permissions.extend(page.value);

            match page.next_link {
                Some(next) if !next.is_empty() => url = next,
                _ => break,
            }
        }

        Ok(permissions)
    }

    fn resource_url(&self, resource_id: &ResourceId, action: Option<&str>, api_version: &str) -> String {
        match action {
            Some(action) => format!(
                "{}{}/{}?api-version={}",
                self.endpoint,
                resource_id.as_str(),
                action,
                api_version
            ),
            None => format!(
                "{}{}?api-version={}",
                self.endpoint,
                resource_id.as_str(),
                api_version
            ),
        }
    }

    fn autoscale_url(&self, setting: &AutoscaleSettingRef) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Insights/autoscalesettings/{}?api-version={}",
            self.endpoint,
            setting.subscription_id,
            setting.resource_group,
            setting.name,
            AUTOSCALE_API_VERSION
        )
    }

    /// Send an authenticated request. Returns the JSON body when there is one.
    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<Option<Value>, ExecutionError> {
        let token = self.credential.get_token(MANAGEMENT_SCOPE).await?;
        debug!(method = %method, url = %url, "Sending Azure request");

        let mut request = self
            .client
            .request(method.clone(), url)
            .bearer_auth(&token.token);
        request = match body {
            Some(body) => request.json(&body),
            // ARM rejects bodiless POSTs without a length
            None if method == Method::POST => request.header(reqwest::header::CONTENT_LENGTH, 0),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status == StatusCode::NOT_FOUND {
            return Err(ExecutionError::ResourceNotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(ExecutionError::AzureApiError {
                status: status.as_u16(),
                url: url.to_string(),
                body: text,
            });
        }

        debug!(status = %status, "Azure request accepted");
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| ExecutionError::InvalidResponse(e.to_string()))
    }

    async fn get_autoscale_setting(
        &self,
        setting: &AutoscaleSettingRef,
    ) -> Result<Value, ExecutionError> {
        self.send(Method::GET, &self.autoscale_url(setting), None)
            .await?
            .ok_or_else(|| ExecutionError::InvalidResponse("empty autoscale setting".to_string()))
    }
}

fn capacity_field(capacity: &Value, field: &str) -> Result<u32, ExecutionError> {
    let value = capacity.get(field).ok_or_else(|| {
        ExecutionError::InvalidResponse(format!("autoscale capacity has no '{}'", field))
    })?;
    let parsed = match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        _ => None,
    };
    parsed.ok_or_else(|| {
        ExecutionError::InvalidResponse(format!("autoscale capacity '{}' is not a count", field))
    })
}

fn parse_capacity(setting: &Value) -> Result<Option<AutoscaleCapacity>, ExecutionError> {
    let Some(capacity) = setting.pointer("/properties/profiles/0/capacity") else {
        return Ok(None);
    };
    Ok(Some(AutoscaleCapacity {
        min: capacity_field(capacity, "minimum")?,
        max: capacity_field(capacity, "maximum")?,
        default: capacity_field(capacity, "default")?,
    }))
}

#[async_trait]
impl ResourceOperations for AzureResourceClient {
    #[instrument(skip(self), fields(resource = %vm))]
    async fn resize_vm(&self, vm: &ResourceId, size: &str) -> Result<(), ExecutionError> {
        let body = json!({ "properties": { "hardwareProfile": { "vmSize": size } } });
        self.send(
            Method::PATCH,
            &self.resource_url(vm, None, COMPUTE_API_VERSION),
            Some(body),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(resource = %vm))]
    async fn start_vm(&self, vm: &ResourceId) -> Result<(), ExecutionError> {
        self.send(
            Method::POST,
            &self.resource_url(vm, Some("start"), COMPUTE_API_VERSION),
            None,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(resource = %vm))]
    async fn deallocate_vm(&self, vm: &ResourceId) -> Result<(), ExecutionError> {
        self.send(
            Method::POST,
            &self.resource_url(vm, Some("deallocate"), COMPUTE_API_VERSION),
            None,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(setting = %setting.name))]
    async fn get_autoscale_capacity(
        &self,
        setting: &AutoscaleSettingRef,
    ) -> Result<Option<AutoscaleCapacity>, ExecutionError> {
        parse_capacity(&self.get_autoscale_setting(setting).await?)
    }

    /// Read-modify-write of the first profile's capacity
    #[instrument(skip(self), fields(setting = %setting.name))]
    async fn set_autoscale_capacity(
        &self,
        setting: &AutoscaleSettingRef,
        capacity: AutoscaleCapacity,
    ) -> Result<(), ExecutionError> {
        let mut current = self.get_autoscale_setting(setting).await?;

        let profile = current
            .pointer_mut("/properties/profiles/0")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| {
                ExecutionError::InvalidResponse(format!(
                    "autoscale setting {} has no profile",
                    setting.name
                ))
            })?;
        profile.insert(
            "capacity".to_string(),
            json!({
                "minimum": capacity.min.to_string(),
                "maximum": capacity.max.to_string(),
                "default": capacity.default.to_string(),
            }),
        );

        self.send(Method::PUT, &self.autoscale_url(setting), Some(current))
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(resource = %server))]
    async fn start_mysql_flexible_server(
        &self,
        server: &ResourceId,
    ) -> Result<(), ExecutionError> {
        self.send(
            Method::POST,
            &self.resource_url(server, Some("start"), MYSQL_FLEXIBLE_API_VERSION),
            None,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(resource = %server))]
    async fn stop_mysql_flexible_server(&self, server: &ResourceId) -> Result<(), ExecutionError> {
        self.send(
            Method::POST,
            &self.resource_url(server, Some("stop"), MYSQL_FLEXIBLE_API_VERSION),
            None,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VM_PATH: &str =
        "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm";
    const AUTOSCALE_PATH: &str =
        "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Insights/autoscalesettings/as";

    struct StaticCredential;

    #[async_trait]
    impl TokenCredential for StaticCredential {
        async fn get_token(&self, _scope: &str) -> Result<AccessToken, ExecutionError> {
            Ok(AccessToken {
                token: "test-token".to_string(),
                expires_at: Utc::now() + ChronoDuration::hours(1),
            })
        }
    }

    fn client(server: &MockServer) -> AzureResourceClient {
        AzureResourceClient::new(Client::new(), server.uri(), Arc::new(StaticCredential))
    }

    fn vm() -> ResourceId {
        ResourceId::parse(VM_PATH).unwrap()
    }

    fn setting() -> AutoscaleSettingRef {
        AutoscaleSettingRef {
            subscription_id: "sub".to_string(),
            resource_group: "rg".to_string(),
            name: "as".to_string(),
        }
    }

    fn autoscale_body(min: &str, max: &str, default: &str) -> Value {
        json!({
            "location": "westeurope",
            "properties": {
                "enabled": true,
                "profiles": [{
                    "name": "default",
                    "capacity": {"minimum": min, "maximum": max, "default": default},
                    "rules": []
                }]
            }
        })
    }

    #[tokio::test]
    async fn test_start_vm_posts_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{}/start", VM_PATH)))
            .and(query_param("api-version", COMPUTE_API_VERSION))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).start_vm(&vm()).await.unwrap();
    }

    #[tokio::test]
    async fn test_deallocate_vm() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{}/deallocate", VM_PATH)))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).deallocate_vm(&vm()).await.unwrap();
    }

    #[tokio::test]
    async fn test_resize_vm_patches_hardware_profile() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(VM_PATH))
            .and(body_partial_json(
                json!({"properties": {"hardwareProfile": {"vmSize": "Standard_B2s"}}}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "vm"})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .resize_vm(&vm(), "Standard_B2s")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_api_error_is_reported_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_string("Conflict"))
            .mount(&server)
            .await;

        let result = client(&server).start_vm(&vm()).await;
        assert!(matches!(
            result,
            Err(ExecutionError::AzureApiError { status: 409, .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_resource_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = client(&server).stop_mysql_flexible_server(&vm()).await;
        assert!(matches!(result, Err(ExecutionError::ResourceNotFound(_))));
    }

    #[tokio::test]
    async fn test_get_autoscale_capacity_parses_string_counts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(AUTOSCALE_PATH))
            .and(query_param("api-version", AUTOSCALE_API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(autoscale_body("1", "5", "2")))
            .mount(&server)
            .await;

        let capacity = client(&server)
            .get_autoscale_capacity(&setting())
            .await
            .unwrap();
        assert_eq!(
            capacity,
            Some(AutoscaleCapacity {
                min: 1,
                max: 5,
                default: 2
            })
        );
    }

    #[tokio::test]
    async fn test_get_autoscale_capacity_without_profile() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"properties": {"profiles": []}})),
            )
            .mount(&server)
            .await;

        let capacity = client(&server)
            .get_autoscale_capacity(&setting())
            .await
            .unwrap();
        assert_eq!(capacity, None);
    }

    #[tokio::test]
    async fn test_set_autoscale_capacity_rewrites_first_profile() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(AUTOSCALE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(autoscale_body("1", "5", "2")))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(AUTOSCALE_PATH))
            .and(body_partial_json(json!({
                "location": "westeurope",
                "properties": {"profiles": [{
                    "name": "default",
                    "capacity": {"minimum": "0", "maximum": "0", "default": "0"}
                }]}
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .set_autoscale_capacity(&setting(), AutoscaleCapacity::ZERO)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_permissions_follows_next_link() {
        let server = MockServer::start().await;
        let permissions_path = format!("{}/providers/Microsoft.Authorization/permissions", VM_PATH);
        Mock::given(method("GET"))
            .and(path(permissions_path.clone()))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"actions": ["Microsoft.Compute/virtualMachines/start/action"], "notActions": []}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(permissions_path.clone()))
            .and(query_param("api-version", AUTHORIZATION_API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"actions": ["*/read"], "notActions": []}],
                "nextLink": format!("{}{}?page=2", server.uri(), permissions_path)
            })))
            .mount(&server)
            .await;

        let permissions = client(&server).list_permissions(&vm()).await.unwrap();
        assert_eq!(permissions.len(), 2);
        assert_eq!(permissions[0].actions, vec!["*/read".to_string()]);
    }

    #[tokio::test]
    async fn test_initialize_fetches_a_token() {
        let server = MockServer::start().await;
        client(&server).initialize().await.unwrap();
    }
}
