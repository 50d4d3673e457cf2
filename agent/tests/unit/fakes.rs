//! In-memory stand-ins for the container runtime, secret backend and
//! message feed

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{Barrier, Notify};

use depman::bus::{Acker, BusMessage, MessageFeed};
use depman::errors::AgentError;
use depman::models::deployment::{ContainerSpec, DeploymentIntent, Metadata, ReplicaSpec};
use depman::runtime::{
    ContainerFilter, ContainerRuntime, ContainerState, ContainerSummary, CreateContainerSpec,
    ImageSummary, NetworkSummary,
};
use depman::secrets::loader::SecretSink;
use depman::secrets::{Secret, SecretBackend, SecretFolder};

// =============================== CONTAINER RUNTIME ================================ //

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub network: Option<String>,
    pub state: ContainerState,
    pub spec: Option<CreateContainerSpec>,
}

#[derive(Debug, Clone)]
pub struct FakeImage {
    pub id: String,
    pub dangling: bool,
}

#[derive(Debug, Default)]
pub struct RuntimeState {
    pub containers: Vec<FakeContainer>,
    pub networks: Vec<String>,
    pub images: Vec<FakeImage>,
    pub pulled: Vec<String>,
    pub created: Vec<CreateContainerSpec>,
    pub stopped: Vec<String>,
    pub removed: Vec<String>,
    pub failing_pulls: HashSet<String>,
    pub failing_stops: HashSet<String>,
    pub gated_pulls: HashMap<String, Arc<Notify>>,
    pub failing_cleanup: bool,
    next_id: u32,
}

/// Container daemon held in memory. Listing filters are as loose as the real
/// daemon's: `ancestor` matches any tag of the repository and `name` matches
/// substrings.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_network(&self, name: &str) {
        self.state.lock().unwrap().networks.push(name.to_string());
    }

    pub fn add_container(
        &self,
        name: &str,
        image: &str,
        network: Option<&str>,
        state: ContainerState,
    ) -> String {
        let mut guard = self.state.lock().unwrap();
        let id = guard.allocate_id();
        guard.containers.push(FakeContainer {
            id: id.clone(),
            name: name.to_string(),
            image: image.to_string(),
            network: network.map(str::to_string),
            state,
            spec: None,
        });
        id
    }

    pub fn add_image(&self, id: &str, dangling: bool) {
        self.state.lock().unwrap().images.push(FakeImage {
            id: id.to_string(),
            dangling,
        });
    }

    pub fn fail_pull(&self, image: &str) {
        self.state.lock().unwrap().failing_pulls.insert(image.to_string());
    }

    /// Hold pulls of `image` until the returned gate is notified
    pub fn gate_pull(&self, image: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state
            .lock()
            .unwrap()
            .gated_pulls
            .insert(image.to_string(), gate.clone());
        gate
    }

    /// Fail the host-wide listings the janitor relies on
    pub fn fail_cleanup(&self) {
        self.state.lock().unwrap().failing_cleanup = true;
    }

    pub fn fail_stop(&self, id: &str) {
        self.state.lock().unwrap().failing_stops.insert(id.to_string());
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.state.lock().unwrap().containers.clone()
    }

    pub fn container(&self, id: &str) -> Option<FakeContainer> {
        self.containers().into_iter().find(|c| c.id == id)
    }

    pub fn named(&self, name: &str) -> Vec<FakeContainer> {
        self.containers()
            .into_iter()
            .filter(|c| c.name == name)
            .collect()
    }

    pub fn networks(&self) -> Vec<String> {
        self.state.lock().unwrap().networks.clone()
    }

    pub fn images(&self) -> Vec<FakeImage> {
        self.state.lock().unwrap().images.clone()
    }

    pub fn created(&self) -> Vec<CreateContainerSpec> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn pulled(&self) -> Vec<String> {
        self.state.lock().unwrap().pulled.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }
}

impl RuntimeState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("c{:04}", self.next_id)
    }
}

fn repository(image: &str) -> &str {
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => repo,
        _ => image,
    }
}

fn matches(container: &FakeContainer, filter: &ContainerFilter) -> bool {
    if let Some(ancestor) = &filter.ancestor {
        if repository(&container.image) != repository(ancestor) {
            return false;
        }
    }
    if let Some(name) = &filter.name {
        if !container.name.contains(name.as_str()) {
            return false;
        }
    }
    if let Some(network) = &filter.network {
        if container.network.as_deref() != Some(network.as_str()) {
            return false;
        }
    }
    true
}

fn not_found(what: &str, id: &str) -> AgentError {
    AgentError::DeployError(format!("no such {}: {}", what, id))
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn pull_image(&self, image: &str) -> Result<(), AgentError> {
        let gate = self.state.lock().unwrap().gated_pulls.get(image).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state.lock().unwrap();
        if state.failing_pulls.contains(image) {
            return Err(AgentError::DeployError(format!(
                "pull access denied for {}",
                image
            )));
        }
        state.pulled.push(image.to_string());
        Ok(())
    }

    async fn list_containers(
        &self,
        filter: &ContainerFilter,
    ) -> Result<Vec<ContainerSummary>, AgentError> {
        let state = self.state.lock().unwrap();
        if state.failing_cleanup && *filter == ContainerFilter::all() {
            return Err(AgentError::DeployError("daemon unavailable".to_string()));
        }
        Ok(state
            .containers
            .iter()
            .filter(|c| matches(c, filter))
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                image: c.image.clone(),
                names: vec![format!("/{}", c.name)],
                networks: c.network.iter().cloned().collect(),
                state: c.state.clone(),
            })
            .collect())
    }

    async fn stop_container(&self, id: &str, _grace_secs: i64) -> Result<(), AgentError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_stops.contains(id) {
            return Err(AgentError::DeployError(format!("cannot stop {}", id)));
        }
        let container = state
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| not_found("container", id))?;
        container.state = ContainerState::Exited;
        state.stopped.push(id.to_string());
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), AgentError> {
        let mut state = self.state.lock().unwrap();
        let index = state
            .containers
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| not_found("container", id))?;
        if !force && state.containers[index].state == ContainerState::Running {
            return Err(AgentError::DeployError(format!(
                "container {} is running",
                id
            )));
        }
        state.containers.remove(index);
        state.removed.push(id.to_string());
        Ok(())
    }

    async fn create_container(&self, spec: &CreateContainerSpec) -> Result<String, AgentError> {
        let mut state = self.state.lock().unwrap();
        if !state.networks.contains(&spec.network) {
            return Err(not_found("network", &spec.network));
        }
        if state.containers.iter().any(|c| c.name == spec.name) {
            return Err(AgentError::DeployError(format!(
                "container name {} already in use",
                spec.name
            )));
        }

        let id = state.allocate_id();
        state.containers.push(FakeContainer {
            id: id.clone(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            network: Some(spec.network.clone()),
            state: ContainerState::Created,
            spec: Some(spec.clone()),
        });
        state.created.push(spec.clone());
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), AgentError> {
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| not_found("container", id))?;
        container.state = ContainerState::Running;
        Ok(())
    }

    async fn list_networks(&self, name: &str) -> Result<Vec<NetworkSummary>, AgentError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .networks
            .iter()
            .filter(|n| n.contains(name))
            .map(|n| NetworkSummary {
                id: format!("net-{}", n),
                name: n.clone(),
            })
            .collect())
    }

    async fn create_network(&self, name: &str) -> Result<(), AgentError> {
        self.state.lock().unwrap().networks.push(name.to_string());
        Ok(())
    }

    async fn list_dangling_images(&self) -> Result<Vec<ImageSummary>, AgentError> {
        let state = self.state.lock().unwrap();
        if state.failing_cleanup {
            return Err(AgentError::DeployError("daemon unavailable".to_string()));
        }
        Ok(state
            .images
            .iter()
            .filter(|i| i.dangling)
            .map(|i| ImageSummary {
                id: i.id.clone(),
                repo_tags: vec![],
            })
            .collect())
    }

    async fn remove_image(&self, id: &str, _force: bool) -> Result<(), AgentError> {
        let mut state = self.state.lock().unwrap();
        let index = state
            .images
            .iter()
            .position(|i| i.id == id)
            .ok_or_else(|| not_found("image", id))?;
        state.images.remove(index);
        Ok(())
    }
}

// ================================ SECRET BACKEND ================================== //

#[derive(Debug, Default)]
pub struct FakeBackend {
    folders: HashMap<String, Vec<String>>,
    secrets: HashMap<String, Vec<(String, String)>>,
    failing_folder_lists: HashSet<String>,
    failing_secret_lists: HashSet<String>,
    secret_calls: AtomicUsize,
    fetch_barrier: Option<Arc<Barrier>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn folder(mut self, parent: &str, name: &str) -> Self {
        self.folders
            .entry(parent.to_string())
            .or_default()
            .push(name.to_string());
        self
    }

    pub fn secret(mut self, path: &str, key: &str, value: &str) -> Self {
        self.secrets
            .entry(path.to_string())
            .or_default()
            .push((key.to_string(), value.to_string()));
        self
    }

    pub fn fail_folder_list(mut self, path: &str) -> Self {
        self.failing_folder_lists.insert(path.to_string());
        self
    }

    pub fn fail_secret_list(mut self, path: &str) -> Self {
        self.failing_secret_lists.insert(path.to_string());
        self
    }

    /// Each secret fetch waits until `n` fetches are in flight together
    pub fn rendezvous(mut self, n: usize) -> Self {
        self.fetch_barrier = Some(Arc::new(Barrier::new(n)));
        self
    }

    pub fn secret_calls(&self) -> usize {
        self.secret_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretBackend for FakeBackend {
    async fn list_folders(&self, path: &str) -> Result<Vec<SecretFolder>, AgentError> {
        if self.failing_folder_lists.contains(path) {
            return Err(AgentError::SecretError(format!("403 listing {}", path)));
        }
        Ok(self
            .folders
            .get(path)
            .map(|names| {
                names
                    .iter()
                    .map(|name| SecretFolder { name: name.clone() })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_secrets(&self, path: &str) -> Result<Vec<Secret>, AgentError> {
        self.secret_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(barrier) = &self.fetch_barrier {
            barrier.wait().await;
        }
        if self.failing_secret_lists.contains(path) {
            return Err(AgentError::SecretError(format!("500 reading {}", path)));
        }
        Ok(self
            .secrets
            .get(path)
            .map(|pairs| {
                pairs
                    .iter()
                    .map(|(key, value)| Secret {
                        key: key.clone(),
                        value: value.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Collects exported secrets instead of touching the process environment
#[derive(Debug, Default)]
pub struct MemorySink {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySink {
    pub fn get(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.values.lock().unwrap().len()
    }
}

impl SecretSink for MemorySink {
    fn export(&self, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }
}

// ================================= MESSAGE FEED =================================== //

struct RecordingAcker {
    subject: String,
    acked: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Acker for RecordingAcker {
    async fn ack(&self) -> Result<(), AgentError> {
        self.acked.lock().unwrap().push(self.subject.clone());
        Ok(())
    }
}

/// Scripted feed. Ends once the script is exhausted, unless held open.
#[derive(Default)]
pub struct FakeFeed {
    script: VecDeque<Result<(String, Vec<u8>), AgentError>>,
    acked: Arc<Mutex<Vec<String>>>,
    hold_open: bool,
}

impl FakeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(mut self, subject: &str, payload: Vec<u8>) -> Self {
        self.script.push_back(Ok((subject.to_string(), payload)));
        self
    }

    pub fn error(mut self, reason: &str) -> Self {
        self.script
            .push_back(Err(AgentError::BusError(reason.to_string())));
        self
    }

    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Subjects of acknowledged messages, in ack order
    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageFeed for FakeFeed {
    async fn next(&mut self) -> Option<Result<BusMessage, AgentError>> {
        match self.script.pop_front() {
            Some(Ok((subject, payload))) => {
                let acker = RecordingAcker {
                    subject: subject.clone(),
                    acked: self.acked.clone(),
                };
                Some(Ok(BusMessage::new(subject, payload, Box::new(acker))))
            }
            Some(Err(e)) => Some(Err(e)),
            None if self.hold_open => std::future::pending().await,
            None => None,
        }
    }
}

// =================================== FIXTURES ===================================== //

pub fn intent(name: &str, image: &str) -> DeploymentIntent {
    DeploymentIntent {
        kind: "Deployment".to_string(),
        metadata: Metadata {
            name: name.to_string(),
        },
        spec: ReplicaSpec { replicas: 1 },
        container: ContainerSpec {
            name: name.to_string(),
            image: image.to_string(),
            ..Default::default()
        },
    }
}

/// CloudEvent envelope bytes carrying `data`
pub fn event(event_type: &str, data: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "specversion": "1.0",
        "id": uuid::Uuid::new_v4().to_string(),
        "source": "/ci/pipeline",
        "type": event_type,
        "datacontenttype": "application/json",
        "data": data,
    }))
    .unwrap()
}

pub fn image_created(intent: &DeploymentIntent) -> Vec<u8> {
    event(
        "Stack.Containers.ImageCreated",
        serde_json::to_value(intent).unwrap(),
    )
}

pub fn secret_rotated() -> Vec<u8> {
    event("Stack.Secrets.NewSecret2", json!({ "path": "/" }))
}
