//! Docker runtime over the daemon API

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::{CreateImageOptions, ListImagesOptions, RemoveImageOptions};
use bollard::models::{
    EndpointSettings, HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum,
};
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::Docker;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::errors::AgentError;
use crate::runtime::{
    ContainerFilter, ContainerRuntime, ContainerState, ContainerSummary, CreateContainerSpec,
    ImageSummary, NetworkSummary,
};

/// Private registry credentials sent with every pull
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    pub server_address: String,
    pub username: String,
    pub password: SecretString,
}

impl RegistryAuth {
    fn credentials(&self) -> DockerCredentials {
        DockerCredentials {
            username: Some(self.username.clone()),
            password: Some(self.password.expose_secret().to_string()),
            serveraddress: Some(self.server_address.clone()),
            ..Default::default()
        }
    }
}

/// [`ContainerRuntime`] backed by the local Docker daemon
pub struct DockerRuntime {
    docker: Docker,
    auth: RegistryAuth,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the local socket, and verify the
    /// daemon answers
    pub async fn connect(auth: RegistryAuth) -> Result<Self, AgentError> {
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;
        let version = docker.version().await?;
        info!(
            "Connected to Docker {} (API {})",
            version.version.unwrap_or_default(),
            version.api_version.unwrap_or_default()
        );
        Ok(Self { docker, auth })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn pull_image(&self, image: &str) -> Result<(), AgentError> {
        let (from_image, tag) = split_image_ref(image);
        let options = CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };

        let mut stream = self
            .docker
            .create_image(Some(options), None, Some(self.auth.credentials()));

        // Drain the progress stream; the pull is only complete at its end
        while let Some(item) = stream.next().await {
            let info = item?;
            if let Some(error) = info.error {
                return Err(AgentError::DeployError(format!(
                    "pull of {} failed: {}",
                    image, error
                )));
            }
            if let Some(status) = info.status {
                debug!(image = %image, "{}", status);
            }
        }

        info!("Image pull completed: {}", image);
        Ok(())
    }

    async fn list_containers(
        &self,
        filter: &ContainerFilter,
    ) -> Result<Vec<ContainerSummary>, AgentError> {
        let options = ListContainersOptions::<String> {
            all: true,
            filters: container_filters(filter),
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                names: c.names.unwrap_or_default(),
                networks: c
                    .network_settings
                    .and_then(|n| n.networks)
                    .map(|n| n.into_keys().collect())
                    .unwrap_or_default(),
                state: ContainerState::parse(c.state.as_deref().unwrap_or_default()),
            })
            .filter(|c| !c.id.is_empty())
            .collect())
    }

    async fn stop_container(&self, id: &str, grace_secs: i64) -> Result<(), AgentError> {
        self.docker
            .stop_container(id, Some(StopContainerOptions { t: grace_secs }))
            .await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), AgentError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    async fn create_container(&self, spec: &CreateContainerSpec) -> Result<String, AgentError> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await?;
        for warning in &response.warnings {
            debug!(container = %spec.name, "create warning: {}", warning);
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), AgentError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn list_networks(&self, name: &str) -> Result<Vec<NetworkSummary>, AgentError> {
        let options = ListNetworksOptions {
            filters: HashMap::from([("name".to_string(), vec![name.to_string()])]),
        };
        let networks = self.docker.list_networks(Some(options)).await?;
        Ok(networks
            .into_iter()
            .map(|n| NetworkSummary {
                id: n.id.unwrap_or_default(),
                name: n.name.unwrap_or_default(),
            })
            .collect())
    }

    async fn create_network(&self, name: &str) -> Result<(), AgentError> {
        let options = CreateNetworkOptions {
            name: name.to_string(),
            ..Default::default()
        };
        self.docker.create_network(options).await?;
        Ok(())
    }

    async fn list_dangling_images(&self) -> Result<Vec<ImageSummary>, AgentError> {
        let options = ListImagesOptions::<String> {
            filters: HashMap::from([("dangling".to_string(), vec!["true".to_string()])]),
            ..Default::default()
        };
        let images = self.docker.list_images(Some(options)).await?;
        Ok(images
            .into_iter()
            .map(|i| ImageSummary {
                id: i.id,
                repo_tags: i.repo_tags,
            })
            .collect())
    }

    async fn remove_image(&self, id: &str, force: bool) -> Result<(), AgentError> {
        self.docker
            .remove_image(
                id,
                Some(RemoveImageOptions {
                    force,
                    ..Default::default()
                }),
                None,
            )
            .await?;
        Ok(())
    }
}

/// Split an image reference into repository and tag for the pull API.
///
/// An empty tag makes the daemon pull every tag, so untagged references
/// default to `latest`. Digest references are passed through whole.
pub fn split_image_ref(image: &str) -> (String, String) {
    if image.contains('@') {
        return (image.to_string(), String::new());
    }

    let last_segment_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[last_segment_start..].rfind(':') {
        Some(i) => {
            let split = last_segment_start + i;
            (image[..split].to_string(), image[split + 1..].to_string())
        }
        None => (image.to_string(), "latest".to_string()),
    }
}

fn container_filters(filter: &ContainerFilter) -> HashMap<String, Vec<String>> {
    let mut filters = HashMap::new();
    let pairs = [
        ("ancestor", &filter.ancestor),
        ("name", &filter.name),
        ("network", &filter.network),
    ];
    for (key, value) in pairs {
        if let Some(value) = value {
            filters.insert(key.to_string(), vec![value.clone()]);
        }
    }
    filters
}

/// Build the daemon's create request from a [`CreateContainerSpec`]
pub fn container_config(spec: &CreateContainerSpec) -> Config<String> {
    let (exposed_ports, port_bindings) = match &spec.port {
        Some(port) => (
            Some(HashMap::from([(port.container_port.clone(), HashMap::new())])),
            Some(HashMap::from([(
                port.container_port.clone(),
                Some(vec![PortBinding {
                    host_ip: port.host_ip.clone(),
                    host_port: port.host_port.clone(),
                }]),
            )])),
        ),
        None => (None, None),
    };

    let restart_policy = spec.restart_always.then(|| RestartPolicy {
        name: Some(RestartPolicyNameEnum::ALWAYS),
        maximum_retry_count: None,
    });

    Config {
        image: Some(spec.image.clone()),
        env: Some(spec.env.clone()),
        exposed_ports,
        host_config: Some(HostConfig {
            port_bindings,
            restart_policy,
            ..Default::default()
        }),
        networking_config: Some(bollard::container::NetworkingConfig {
            endpoints_config: HashMap::from([(
                spec.network.clone(),
                EndpointSettings::default(),
            )]),
        }),
        ..Default::default()
    }
}
