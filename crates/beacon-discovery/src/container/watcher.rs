//! Long-running container event listener.
//!
//! Runs as its own task, keeps a map of container id to observation, and
//! publishes normalised [`ContainerChange`]s. It never blocks a discovery
//! pass: the map lock is only held for single inserts and removals, and
//! changes are sent with `try_send`.

use std::collections::HashMap;
use std::sync::Arc;

use beacon_types::RawService;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::heuristics::{container_to_service, is_service_container};
use super::runtime::{ContainerEvent, ContainerRuntime};
use crate::error::DiscoveryResult;

/// A change observed on the container runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerChange {
    /// A service container started or was restarted.
    Started(RawService),
    /// A service container stopped; the observation carries its new status.
    Stopped(RawService),
    /// A container was destroyed.
    Removed { container_id: String, name: Option<String> },
}

impl ContainerChange {
    pub fn container_id(&self) -> Option<&str> {
        match self {
            ContainerChange::Started(s) | ContainerChange::Stopped(s) => {
                s.metadata.get("container_id").and_then(|v| v.as_str())
            }
            ContainerChange::Removed { container_id, .. } => Some(container_id),
        }
    }
}

/// Callback invoked for every change, from the watcher task.
pub type ChangeCallback = Arc<dyn Fn(&ContainerChange) + Send + Sync>;

struct WatchState {
    services: Mutex<HashMap<String, RawService>>,
    callback: Option<ChangeCallback>,
    changes: Option<mpsc::Sender<ContainerChange>>,
}

impl WatchState {
    fn publish(&self, change: ContainerChange) {
        if let Some(callback) = &self.callback {
            callback(&change);
        }
        if let Some(tx) = &self.changes {
            if let Err(e) = tx.try_send(change) {
                warn!(error = %e, "Dropping container change, consumer is not keeping up");
            }
        }
    }
}

/// The enhanced container discovery variant.
pub struct ContainerWatcher {
    runtime: Arc<dyn ContainerRuntime>,
    state: Arc<WatchState>,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ContainerWatcher {
    /// Create a watcher; `changes` receives every published change.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        changes: Option<mpsc::Sender<ContainerChange>>,
        callback: Option<ChangeCallback>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            runtime,
            state: Arc::new(WatchState {
                services: Mutex::new(HashMap::new()),
                callback,
                changes,
            }),
            shutdown,
            handle: Mutex::new(None),
        }
    }

    /// Seed the map from running containers and start listening.
    #[instrument(skip(self))]
    pub async fn start(&self) -> DiscoveryResult<()> {
        let mut handle = self.handle.lock().await;
        if handle.as_ref().map_or(false, |h| !h.is_finished()) {
            debug!("Container watcher already running");
            return Ok(());
        }

        let events = self.runtime.events().await?;
        self.seed().await;

        self.shutdown.send_replace(false);
        let stop = self.shutdown.subscribe();
        let runtime = self.runtime.clone();
        let state = self.state.clone();
        *handle = Some(tokio::spawn(watch_loop(runtime, state, events, stop)));
        info!("Container watcher started");
        Ok(())
    }

    async fn seed(&self) {
        let ids = match self.runtime.list_containers(false).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Failed to seed container map");
                return;
            }
        };
        for id in ids {
            if let Ok(details) = self.runtime.inspect_container(&id).await {
                if is_service_container(&details) {
                    let service = container_to_service(&details);
                    self.state.services.lock().await.insert(id, service);
                }
            }
        }
    }

    /// Signal the listener to exit and wait for it.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Container watcher task ended abnormally");
            }
        }
        info!("Container watcher stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .map_or(false, |h| !h.is_finished())
    }

    /// Current view of watched service containers.
    pub async fn snapshot(&self) -> Vec<RawService> {
        let services = self.state.services.lock().await;
        let mut list: Vec<RawService> = services.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }
}

async fn watch_loop(
    runtime: Arc<dyn ContainerRuntime>,
    state: Arc<WatchState>,
    mut events: mpsc::Receiver<ContainerEvent>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    warn!("Container event stream ended");
                    break;
                };
                handle_event(runtime.as_ref(), &state, event).await;
            }
        }
    }
}

async fn handle_event(runtime: &dyn ContainerRuntime, state: &WatchState, event: ContainerEvent) {
    debug!(action = %event.action, container = %event.id, "Container event");
    match event.action.as_str() {
        "start" | "restart" | "unpause" => {
            let details = match runtime.inspect_container(&event.id).await {
                Ok(details) => details,
                Err(e) => {
                    warn!(container = %event.id, error = %e, "Failed to inspect started container");
                    return;
                }
            };
            if !is_service_container(&details) {
                return;
            }
            let service = container_to_service(&details);
            state
                .services
                .lock()
                .await
                .insert(event.id.clone(), service.clone());
            state.publish(ContainerChange::Started(service));
        }
        "die" | "stop" | "kill" | "pause" | "oom" => {
            let updated = {
                let mut services = state.services.lock().await;
                services.get_mut(&event.id).map(|service| {
                    service.status = if event.action == "pause" { "paused" } else { "stopped" }.to_string();
                    service.health_status = None;
                    service.metadata.remove("pid");
                    service.observed_at = chrono::Utc::now();
                    service.clone()
                })
            };
            if let Some(service) = updated {
                state.publish(ContainerChange::Stopped(service));
            }
        }
        "destroy" => {
            let removed = state.services.lock().await.remove(&event.id);
            state.publish(ContainerChange::Removed {
                container_id: event.id,
                name: removed.map(|s| s.name).or(event.name),
            });
        }
        _ => {}
    }
}
