//! Infisical secret backend client

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{header, Client};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info};
use url::Url;

use crate::errors::AgentError;
use crate::secrets::{Secret, SecretBackend, SecretFolder};

/// Refresh the access token this long before it expires
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Infisical connection settings
#[derive(Debug, Clone)]
pub struct InfisicalConfig {
    pub site_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub project_id: String,
    pub environment: String,
}

struct AccessToken {
    raw: SecretString,
    expires_at: Instant,
}

impl AccessToken {
    fn is_expired(&self) -> bool {
        Instant::now() + TOKEN_EXPIRY_MARGIN >= self.expires_at
    }
}

/// Universal-auth client for the Infisical REST API
pub struct InfisicalClient {
    client: Client,
    config: InfisicalConfig,
    token: RwLock<Option<AccessToken>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Deserialize)]
struct FoldersResponse {
    #[serde(default)]
    folders: Vec<FolderDto>,
}

#[derive(Deserialize)]
struct FolderDto {
    name: String,
}

#[derive(Deserialize)]
struct SecretsResponse {
    #[serde(default)]
    secrets: Vec<SecretDto>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretDto {
    secret_key: String,
    #[serde(default)]
    secret_value: String,
}

impl InfisicalClient {
    /// Create a client and authenticate once
    pub async fn connect(config: InfisicalConfig) -> Result<Self, AgentError> {
        let site_url = normalize_site_url(&config.site_url)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let infisical = Self {
            client,
            config: InfisicalConfig { site_url, ..config },
            token: RwLock::new(None),
        };

        infisical.login().await?;
        Ok(infisical)
    }

    async fn login(&self) -> Result<SecretString, AgentError> {
        let url = format!("{}/api/v1/auth/universal-auth/login", self.config.site_url);
        debug!("POST {} (universal auth)", url);

        let body = serde_json::json!({
            "clientId": self.config.client_id,
            "clientSecret": self.config.client_secret.expose_secret(),
        });

        let response = self.client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Infisical authentication failed: {} - {}", status, body);
            return Err(AgentError::AuthError(format!(
                "Infisical authentication failed: {} - {}",
                status, body
            )));
        }

        let login: LoginResponse = response.json().await?;
        let raw = SecretString::from(login.access_token);

        let mut cached = self.token.write().await;
        *cached = Some(AccessToken {
            raw: raw.clone(),
            expires_at: Instant::now() + Duration::from_secs(login.expires_in),
        });

        info!("Authenticated with Infisical, token valid for {}s", login.expires_in);
        Ok(raw)
    }

    async fn access_token(&self) -> Result<SecretString, AgentError> {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref().filter(|t| !t.is_expired()) {
                return Ok(token.raw.clone());
            }
        }
        self.login().await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, AgentError> {
        let url = format!("{}{}", self.config.site_url, path);
        debug!("GET {}", url);

        let token = self.access_token().await?;
        let response = self
            .client
            .get(&url)
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            )
            .query(query)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP GET failed: {} - {}", status, body);
            return Err(AgentError::SecretError(format!("{}: {}", status, body)));
        }

        Ok(response.json().await?)
    }
}

/// Validate the base URL and strip any trailing slash
fn normalize_site_url(raw: &str) -> Result<String, AgentError> {
    let url = Url::parse(raw)
        .map_err(|e| AgentError::ConfigError(format!("invalid secret backend URL {:?}: {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AgentError::ConfigError(format!(
            "secret backend URL must be http(s): {}",
            raw
        )));
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

#[async_trait]
impl SecretBackend for InfisicalClient {
    async fn list_folders(&self, path: &str) -> Result<Vec<SecretFolder>, AgentError> {
        let response: FoldersResponse = self
            .get(
                "/api/v1/folders",
                &[
                    ("workspaceId", self.config.project_id.as_str()),
                    ("environment", self.config.environment.as_str()),
                    ("path", path),
                ],
            )
            .await?;

        Ok(response
            .folders
            .into_iter()
            .map(|f| SecretFolder { name: f.name })
            .collect())
    }

    async fn list_secrets(&self, path: &str) -> Result<Vec<Secret>, AgentError> {
        let response: SecretsResponse = self
            .get(
                "/api/v3/secrets/raw",
                &[
                    ("workspaceId", self.config.project_id.as_str()),
                    ("environment", self.config.environment.as_str()),
                    ("secretPath", path),
                    ("expandSecretReferences", "true"),
                ],
            )
            .await?;

        Ok(response
            .secrets
            .into_iter()
            .map(|s| Secret {
                key: s.secret_key,
                value: s.secret_value,
            })
            .collect())
    }
}
