//! Event dispatch worker
//!
//! Pulls one message at a time from the feed and routes it by subject:
//! image-created events deploy in their own task, secret rotations reload
//! secrets and recreate every container before the next message is read.
//! Every message is acknowledged once handled, whatever the outcome.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::bus::{BusMessage, MessageFeed};
use crate::deploy::reconciler::Reconciler;
use crate::errors::AgentError;
use crate::models::deployment::DeploymentIntent;
use crate::models::event::{CloudEvent, EventKind};
use crate::secrets::loader::SecretLoader;
use crate::storage::records::RecordStore;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Dispatcher worker options
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Backoff between failed feed reads
    pub feed_error_cooldown: CooldownOptions,
}

/// Everything the dispatcher routes events to
#[derive(Clone)]
pub struct Handlers {
    pub reconciler: Arc<Reconciler>,
    pub loader: Arc<SecretLoader>,
    pub records: Arc<RecordStore>,
}

/// Counters for one worker run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub received: usize,
    pub acked: usize,
    pub undecodable: usize,
    pub ignored: usize,
    pub deploys_succeeded: usize,
    pub deploys_failed: usize,
    pub rotations: usize,
    pub recreated: usize,
    pub feed_errors: usize,
}

/// Run the dispatcher until the feed ends or `shutdown_signal` fires.
///
/// In-flight deploy tasks are awaited before returning.
pub async fn run<M, S, F>(
    options: &Options,
    feed: &mut M,
    handlers: &Handlers,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) -> Stats
where
    M: MessageFeed + ?Sized,
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Dispatcher worker starting...");

    let mut stats = Stats::default();
    let mut deploys: JoinSet<Result<String, AgentError>> = JoinSet::new();
    let mut error_attempt: u32 = 0;

    loop {
        let next = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Dispatcher worker shutting down...");
                break;
            }
            next = feed.next() => next,
        };

        let message = match next {
            Some(Ok(message)) => {
                error_attempt = 0;
                message
            }
            Some(Err(e)) => {
                stats.feed_errors += 1;
                let wait = calc_exp_backoff(&options.feed_error_cooldown, error_attempt);
                error_attempt = error_attempt.saturating_add(1);
                error!("Error reading from message feed, retrying in {:?}: {}", wait, e);

                tokio::select! {
                    _ = &mut shutdown_signal => {
                        info!("Dispatcher worker shutting down...");
                        break;
                    }
                    _ = sleep_fn(wait) => continue,
                }
            }
            None => {
                info!("Message feed closed");
                break;
            }
        };

        stats.received += 1;
        handle(&message, handlers, &mut deploys, &mut stats).await;

        match message.ack().await {
            Ok(()) => stats.acked += 1,
            Err(e) => error!("Error acknowledging message on {}: {}", message.subject, e),
        }

        while let Some(joined) = deploys.try_join_next() {
            record_deploy_result(joined, &mut stats);
        }
    }

    if !deploys.is_empty() {
        info!("Waiting for {} in-flight deploy(s)...", deploys.len());
    }
    while let Some(joined) = deploys.join_next().await {
        record_deploy_result(joined, &mut stats);
    }

    info!("Dispatcher worker stopped: {:?}", stats);
    stats
}

async fn handle(
    message: &BusMessage,
    handlers: &Handlers,
    deploys: &mut JoinSet<Result<String, AgentError>>,
    stats: &mut Stats,
) {
    let event = match CloudEvent::from_slice(&message.payload) {
        Ok(event) => event,
        Err(e) => {
            stats.undecodable += 1;
            error!("Error decoding event envelope on {}: {}", message.subject, e);
            return;
        }
    };

    info!(
        subject = %message.subject,
        "Event received: id={} type={} source={}",
        event.id, event.event_type, event.source
    );

    match EventKind::from_subject(&message.subject) {
        EventKind::ImageCreated => {
            let intent: DeploymentIntent = match event.data_as() {
                Ok(intent) => intent,
                Err(e) => {
                    stats.undecodable += 1;
                    error!("Error decoding deployment intent from event {}: {}", event.id, e);
                    return;
                }
            };

            let handlers = handlers.clone();
            deploys.spawn(async move { deploy_and_record(&handlers, intent).await });
        }
        EventKind::SecretRotated => {
            stats.rotations += 1;
            stats.recreated += rotate(handlers).await;
        }
        EventKind::Unrecognized => {
            stats.ignored += 1;
            info!("Ignoring event {} on unrecognized subject {}", event.id, message.subject);
        }
    }
}

/// Deploy one intent and persist its record under the new container ID
async fn deploy_and_record(
    handlers: &Handlers,
    intent: DeploymentIntent,
) -> Result<String, AgentError> {
    let name = intent.container.name.clone();

    let id = handlers.reconciler.deploy(&intent).await.map_err(|e| {
        error!("Deploy of {} failed: {}", name, e);
        AgentError::DeployError(format!("{}: {}", name, e))
    })?;

    if let Err(e) = handlers.records.put(&id, &intent).await {
        error!("Error saving deployment record for {} ({}): {}", name, id, e);
        return Err(e);
    }

    debug!("Deployment record saved for {} ({})", name, id);
    Ok(id)
}

/// Reload every secret, then recreate all containers. Returns how many
/// containers were recreated.
async fn rotate(handlers: &Handlers) -> usize {
    info!("Secret rotation: reloading secrets");
    if let Err(e) = handlers.loader.load_all().await {
        error!("Error reloading secrets, skipping container recreation: {}", e);
        return 0;
    }

    match handlers.reconciler.recreate_all().await {
        Ok(recreated) => {
            info!("Secret rotation: recreated {} container(s)", recreated.len());
            recreated.len()
        }
        Err(e) => {
            error!("Error recreating containers: {}", e);
            0
        }
    }
}

fn record_deploy_result(
    joined: Result<Result<String, AgentError>, tokio::task::JoinError>,
    stats: &mut Stats,
) {
    match joined {
        Ok(Ok(_)) => stats.deploys_succeeded += 1,
        Ok(Err(_)) => stats.deploys_failed += 1,
        Err(e) => {
            stats.deploys_failed += 1;
            warn!("Deploy task aborted: {}", e);
        }
    }
}
