//! Registry credential check
//!
//! Pull credentials are otherwise only exercised on the first image pull.
//! [`verify_login`] asks the registry's `/v2/` endpoint up front, following a
//! bearer-token challenge when the registry delegates auth to a token service.

use std::time::Duration;

use reqwest::{header, Client, StatusCode};
use secrecy::ExposeSecret;
use tracing::{debug, info};
use url::Url;

use crate::errors::AgentError;
use crate::runtime::docker::RegistryAuth;

const DOCKER_HUB_HOSTS: [&str; 3] = ["docker.io", "index.docker.io", "registry-1.docker.io"];
const DOCKER_HUB_API: &str = "https://registry-1.docker.io/v2/";

/// `WWW-Authenticate: Bearer ...` parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
}

/// Registry API root for a configured server address.
///
/// Bare hosts default to https. Docker Hub aliases map to its API host.
pub fn api_base_url(server_address: &str) -> Result<Url, AgentError> {
    let trimmed = server_address.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(AgentError::ConfigError(
            "registry server address is empty".to_string(),
        ));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    let mut url = Url::parse(&with_scheme).map_err(|e| {
        AgentError::ConfigError(format!("invalid registry address {}: {}", server_address, e))
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(AgentError::ConfigError(format!(
            "unsupported registry scheme: {}",
            url.scheme()
        )));
    }

    if url
        .host_str()
        .is_some_and(|host| DOCKER_HUB_HOSTS.contains(&host))
    {
        return Url::parse(DOCKER_HUB_API)
            .map_err(|e| AgentError::ConfigError(e.to_string()));
    }

    url.set_path("/v2/");
    url.set_query(None);
    Ok(url)
}

pub fn parse_bearer_challenge(value: &str) -> Option<BearerChallenge> {
    let (scheme, params) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut realm = None;
    let mut service = None;
    for pair in params.split(',') {
        let Some((key, val)) = pair.trim().split_once('=') else {
            continue;
        };
        let val = val.trim().trim_matches('"').to_string();
        match key.trim() {
            "realm" => realm = Some(val),
            "service" => service = Some(val),
            _ => {}
        }
    }

    Some(BearerChallenge {
        realm: realm?,
        service,
    })
}

/// Fail unless the registry accepts `auth`
pub async fn verify_login(auth: &RegistryAuth) -> Result<(), AgentError> {
    let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
    verify_login_with(&client, auth).await
}

pub async fn verify_login_with(client: &Client, auth: &RegistryAuth) -> Result<(), AgentError> {
    let url = api_base_url(&auth.server_address)?;

    info!("Checking registry credentials against {}...", url);
    let response = client
        .get(url.clone())
        .basic_auth(&auth.username, Some(auth.password.expose_secret()))
        .send()
        .await?;

    match response.status() {
        status if status.is_success() => {
            info!("Registry login succeeded for {}", auth.username);
            Ok(())
        }
        StatusCode::UNAUTHORIZED => {
            let challenge = response
                .headers()
                .get(header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_bearer_challenge);

            match challenge {
                Some(challenge) => token_login(client, auth, &challenge).await,
                None => Err(AgentError::AuthError(format!(
                    "registry {} rejected credentials for {}",
                    url, auth.username
                ))),
            }
        }
        status => Err(AgentError::AuthError(format!(
            "registry {} answered {}",
            url, status
        ))),
    }
}

async fn token_login(
    client: &Client,
    auth: &RegistryAuth,
    challenge: &BearerChallenge,
) -> Result<(), AgentError> {
    debug!("Registry delegates auth to {}", challenge.realm);

    let mut request = client
        .get(&challenge.realm)
        .basic_auth(&auth.username, Some(auth.password.expose_secret()));
    if let Some(service) = &challenge.service {
        request = request.query(&[("service", service)]);
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(AgentError::AuthError(format!(
            "token service {} rejected credentials for {}: {}",
            challenge.realm,
            auth.username,
            response.status()
        )));
    }

    info!("Registry login succeeded for {}", auth.username);
    Ok(())
}
