//! The unified discovery orchestrator.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use beacon_discovery::{ContainerChange, DiscoveryError, DiscoverySource};
use beacon_health::{HealthChecker, HealthConfig};
use beacon_metadata::{attach, ExtractorConfig, MetadataExtractor};
use beacon_registry::ServiceRegistry;
use beacon_types::{
    ProbeDescriptor, RawService, RegistrationAction, ServiceFilter, ServiceRecord, SourcePriority,
};
use beacon_validator::{ServiceValidator, ValidatorConfig};
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{DiscoveryOptions, OrchestratorConfig, Stages};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::phase::DiscoveryPhase;
use crate::stats::{DiscoveryStats, SourceStats};
use crate::unify::unify;

/// Callback invoked with a service record.
pub type ServiceCallback = Arc<dyn Fn(&ServiceRecord) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Callbacks {
    /// Ids seen for the first time.
    pub on_discovered: Option<ServiceCallback>,
    /// Ids seen before.
    pub on_updated: Option<ServiceCallback>,
    /// Ids present in the previous pass but absent now.
    pub on_removed: Option<ServiceCallback>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_discovered", &self.on_discovered.is_some())
            .field("on_updated", &self.on_updated.is_some())
            .field("on_removed", &self.on_removed.is_some())
            .finish()
    }
}

type ChangeFeed = mpsc::Receiver<ContainerChange>;

struct Runner {
    handle: JoinHandle<Option<ChangeFeed>>,
    shutdown: watch::Sender<bool>,
}

/// Outcome of one source's `discover` call within a pass.
struct SourceOutcome {
    name: String,
    elapsed: Duration,
    result: Result<Vec<RawService>, String>,
}

pub struct UnifiedDiscoveryBuilder {
    config: OrchestratorConfig,
    sources: Vec<Arc<dyn DiscoverySource>>,
    registry: Option<Arc<ServiceRegistry>>,
    validator: ValidatorConfig,
    health: HealthConfig,
    extractor: ExtractorConfig,
}

impl UnifiedDiscoveryBuilder {
    pub fn source(mut self, source: Arc<dyn DiscoverySource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn sources(mut self, sources: impl IntoIterator<Item = Arc<dyn DiscoverySource>>) -> Self {
        self.sources.extend(sources);
        self
    }

    pub fn registry(mut self, registry: Arc<ServiceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn validator(mut self, config: ValidatorConfig) -> Self {
        self.validator = config;
        self
    }

    pub fn health(mut self, config: HealthConfig) -> Self {
        self.health = config;
        self
    }

    pub fn extractor(mut self, config: ExtractorConfig) -> Self {
        self.extractor = config;
        self
    }

    pub fn build(self) -> OrchestratorResult<UnifiedDiscovery> {
        let priority = SourcePriority::from_names(&self.config.source_priority)
            .map_err(|e| OrchestratorError::Configuration(e.to_string()))?;

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.name().to_string()) {
                return Err(OrchestratorError::Configuration(format!(
                    "duplicate discovery source name: {}",
                    source.name()
                )));
            }
        }

        let (phase, _) = watch::channel(DiscoveryPhase::Idle);
        Ok(UnifiedDiscovery {
            validator: ServiceValidator::new(self.validator)?,
            health: HealthChecker::new(self.health),
            extractor: Arc::new(MetadataExtractor::new(self.extractor)),
            config: self.config,
            priority,
            sources: self.sources,
            registry: self.registry,
            phase,
            pass_lock: Mutex::new(()),
            stats: Mutex::new(DiscoveryStats::default()),
            view: Mutex::new(BTreeMap::new()),
            known: Mutex::new(HashSet::new()),
            callbacks: RwLock::new(Callbacks::default()),
            change_feed: Mutex::new(None),
            runner: Mutex::new(None),
        })
    }
}

/// Runs discovery passes over every configured source:
/// `Discovering → Unifying → Validating → HealthChecking → ExtractingMetadata → Registering`.
///
/// A failing stage or source is logged and counted; the pass always completes.
pub struct UnifiedDiscovery {
    config: OrchestratorConfig,
    priority: SourcePriority,
    sources: Vec<Arc<dyn DiscoverySource>>,
    registry: Option<Arc<ServiceRegistry>>,
    validator: ServiceValidator,
    health: HealthChecker,
    extractor: Arc<MetadataExtractor>,
    phase: watch::Sender<DiscoveryPhase>,
    /// Serializes passes and change-feed updates.
    pass_lock: Mutex<()>,
    stats: Mutex<DiscoveryStats>,
    /// Records from the latest pass, by id.
    view: Mutex<BTreeMap<String, ServiceRecord>>,
    /// Every id reported so far.
    known: Mutex<HashSet<String>>,
    callbacks: RwLock<Callbacks>,
    change_feed: Mutex<Option<ChangeFeed>>,
    runner: Mutex<Option<Runner>>,
}

impl UnifiedDiscovery {
    pub fn builder(config: OrchestratorConfig) -> UnifiedDiscoveryBuilder {
        UnifiedDiscoveryBuilder {
            config,
            sources: Vec::new(),
            registry: None,
            validator: ValidatorConfig::default(),
            health: HealthConfig::default(),
            extractor: ExtractorConfig::default(),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> Option<&Arc<ServiceRegistry>> {
        self.registry.as_ref()
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub fn current_phase(&self) -> DiscoveryPhase {
        *self.phase.borrow()
    }

    /// Follow phase transitions.
    pub fn subscribe_phase(&self) -> watch::Receiver<DiscoveryPhase> {
        self.phase.subscribe()
    }

    fn enter(&self, phase: DiscoveryPhase) {
        debug!(phase = %phase, "Entering discovery phase");
        self.phase.send_replace(phase);
    }

    pub fn set_callbacks(&self, callbacks: Callbacks) {
        match self.callbacks.write() {
            Ok(mut guard) => *guard = callbacks,
            Err(poisoned) => *poisoned.into_inner() = callbacks,
        }
    }

    fn callbacks(&self) -> Callbacks {
        match self.callbacks.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub async fn get_discovery_stats(&self) -> DiscoveryStats {
        let mut stats = self.stats.lock().await.clone();
        stats.continuous_running = self.is_running().await;
        stats
    }

    /// Records from the latest pass matching `filter`, ordered by name.
    pub async fn get_discovered_services(&self, filter: &ServiceFilter) -> Vec<ServiceRecord> {
        let mut records: Vec<ServiceRecord> = self
            .view
            .lock()
            .await
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        records
    }

    async fn run_sources(&self, options: &DiscoveryOptions) -> Vec<SourceOutcome> {
        let timeout = self.config.source_timeout();
        let selected = self.sources.iter().filter(|s| options.includes(s.name()));
        join_all(selected.map(|source| async move {
            let started = Instant::now();
            let result = match tokio::time::timeout(timeout, source.discover()).await {
                Ok(Ok(services)) => Ok(services),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(DiscoveryError::unavailable(
                    source.name(),
                    format!("no response within {:?}", timeout),
                )),
            };
            SourceOutcome {
                name: source.name().to_string(),
                elapsed: started.elapsed(),
                result: result.map_err(|e| e.to_string()),
            }
        }))
        .await
    }

    async fn validate(&self, records: &mut [ServiceRecord]) -> u64 {
        let results = self.validator.validate_all(records).await;
        let mut failures = 0;
        for (record, result) in records.iter_mut().zip(results) {
            if !result.is_valid {
                failures += 1;
                debug!(service = %record.name, issues = ?result.issues, "Service has validation issues");
            }
            record.set_validation(result);
        }
        failures
    }

    async fn check_health(&self, records: &mut [ServiceRecord]) {
        let targets: Vec<(String, ProbeDescriptor)> = records
            .iter()
            .map(|r| (r.id.clone(), ProbeDescriptor::from_record(r)))
            .filter(|(_, d)| !d.is_empty())
            .collect();
        if targets.is_empty() {
            return;
        }
        let mut results: BTreeMap<String, _> =
            self.health.check_all(targets).await.into_iter().collect();
        for record in records.iter_mut() {
            if let Some(result) = results.remove(&record.id) {
                record.set_health(result);
            }
        }
    }

    /// Returns whether extraction ran to completion.
    async fn extract_metadata(&self, records: &mut [ServiceRecord]) -> bool {
        let extractor = Arc::clone(&self.extractor);
        let batch: Vec<ServiceRecord> = records.to_vec();
        let extracted = tokio::task::spawn_blocking(move || {
            batch.iter().map(|r| extractor.extract(r)).collect::<Vec<_>>()
        })
        .await;
        match extracted {
            Ok(all) => {
                for (record, results) in records.iter_mut().zip(all) {
                    attach(record, &results);
                }
                true
            }
            Err(e) => {
                error!(error = %e, "Metadata extraction task failed");
                false
            }
        }
    }

    /// Register every record; returns `(record, was_created)` pairs with the
    /// registry's merged view of each record.
    async fn register(
        &self,
        registry: &ServiceRegistry,
        records: Vec<ServiceRecord>,
        stats: &mut DiscoveryStats,
    ) -> Vec<(ServiceRecord, Option<bool>)> {
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            let result = registry.register(record.clone()).await;
            let created = match result.action {
                RegistrationAction::Created => {
                    stats.created += 1;
                    Some(true)
                }
                RegistrationAction::Updated => {
                    stats.updated += 1;
                    Some(false)
                }
                RegistrationAction::Duplicate => {
                    stats.duplicates += 1;
                    warn!(service = %record.name, message = %result.message, "Duplicate service id");
                    None
                }
                RegistrationAction::Error => {
                    stats.error_count += 1;
                    warn!(service = %record.name, message = %result.message, "Registration failed");
                    None
                }
            };
            let stored = match &result.service_id {
                Some(id) if created.is_some() => registry.get(id).await.unwrap_or(record),
                _ => record,
            };
            out.push((stored, created));
        }
        out
    }

    /// Replace the in-memory view with the pass's records and fire callbacks.
    async fn publish(&self, results: Vec<(ServiceRecord, Option<bool>)>) {
        let callbacks = self.callbacks();
        let mut known = self.known.lock().await;
        let mut view = self.view.lock().await;

        let mut next = BTreeMap::new();
        let mut discovered = Vec::new();
        let mut updated = Vec::new();
        for (record, created) in results {
            let first_seen = created.unwrap_or_else(|| !known.contains(&record.id));
            known.insert(record.id.clone());
            if first_seen {
                discovered.push(record.clone());
            } else {
                updated.push(record.clone());
            }
            next.insert(record.id.clone(), record);
        }
        let removed: Vec<ServiceRecord> = view
            .iter()
            .filter(|(id, _)| !next.contains_key(*id))
            .map(|(_, r)| r.clone())
            .collect();
        *view = next;
        drop(view);
        drop(known);

        fire(&callbacks.on_discovered, &discovered);
        fire(&callbacks.on_updated, &updated);
        fire(&callbacks.on_removed, &removed);
        if !removed.is_empty() {
            info!(removed = removed.len(), "Services no longer observed");
        }
    }

    /// Run one full pass and return the unified records.
    #[instrument(skip(self, options))]
    pub async fn discover_all_services(&self, options: &DiscoveryOptions) -> Vec<ServiceRecord> {
        let _pass = self.pass_lock.lock().await;
        let stages = options.resolve(&self.config);
        let started = Instant::now();
        let mut pass = DiscoveryStats::default();

        self.enter(DiscoveryPhase::Discovering);
        let outcomes = self.run_sources(options).await;
        let mut observations = Vec::new();
        let mut per_source: BTreeMap<String, SourceStats> = BTreeMap::new();
        for outcome in outcomes {
            let entry = per_source.entry(outcome.name.clone()).or_default();
            entry.last_duration_ms = outcome.elapsed.as_millis() as u64;
            match outcome.result {
                Ok(services) => {
                    debug!(source = %outcome.name, services = services.len(), "Source finished");
                    entry.services = services.len();
                    observations.extend(services);
                }
                Err(reason) => {
                    warn!(source = %outcome.name, error = %reason, "Discovery source failed");
                    entry.errors += 1;
                    entry.last_error = Some(reason);
                    pass.error_count += 1;
                }
            }
        }

        self.enter(DiscoveryPhase::Unifying);
        let observed = observations.len();
        let mut records = unify(observations, &self.priority);
        debug!(observed, unified = records.len(), "Unified observations");

        self.run_stages(stages, &mut records, &mut pass).await;

        let results = match (&self.registry, stages.register) {
            (Some(registry), true) => {
                self.enter(DiscoveryPhase::Registering);
                self.register(registry, records, &mut pass).await
            }
            _ => records.into_iter().map(|r| (r, None)).collect(),
        };

        let records: Vec<ServiceRecord> = results.iter().map(|(r, _)| r.clone()).collect();
        let mut health = BTreeMap::new();
        for record in &records {
            let key = record.health_status.map_or("unchecked", |h| h.as_str());
            *health.entry(key.to_string()).or_insert(0) += 1;
        }
        self.publish(results).await;
        self.enter(DiscoveryPhase::Idle);

        let elapsed = started.elapsed();
        let mut stats = self.stats.lock().await;
        stats.total_passes += 1;
        stats.last_pass_at = Some(Utc::now());
        stats.last_pass_duration_ms = elapsed.as_millis() as u64;
        stats.services_in_last_pass = records.len();
        for (name, source) in per_source {
            let entry = stats.per_source.entry(name).or_default();
            entry.services = source.services;
            entry.errors += source.errors;
            entry.last_duration_ms = source.last_duration_ms;
            entry.last_error = source.last_error;
        }
        stats.error_count += pass.error_count;
        stats.created += pass.created;
        stats.updated += pass.updated;
        stats.duplicates += pass.duplicates;
        stats.validation_failures += pass.validation_failures;
        stats.health = health;

        info!(
            services = records.len(),
            errors = pass.error_count,
            created = pass.created,
            updated = pass.updated,
            duration_ms = stats.last_pass_duration_ms,
            "Discovery pass complete"
        );
        records
    }

    async fn run_stages(&self, stages: Stages, records: &mut [ServiceRecord], pass: &mut DiscoveryStats) {
        if stages.validate {
            self.enter(DiscoveryPhase::Validating);
            pass.validation_failures += self.validate(records).await;
        }
        if stages.check_health {
            self.enter(DiscoveryPhase::HealthChecking);
            self.check_health(records).await;
        }
        if stages.extract_metadata {
            self.enter(DiscoveryPhase::ExtractingMetadata);
            if !self.extract_metadata(records).await {
                pass.error_count += 1;
            }
        }
    }

    /// Feed container changes into the continuous loop. Takes effect on the
    /// next `start_continuous_discovery`.
    pub async fn attach_change_feed(&self, feed: ChangeFeed) -> OrchestratorResult<()> {
        if self.is_running().await {
            return Err(OrchestratorError::AlreadyRunning);
        }
        *self.change_feed.lock().await = Some(feed);
        Ok(())
    }

    /// Apply one container change without waiting for the next pass.
    #[instrument(skip(self, change))]
    pub async fn apply_change(&self, change: ContainerChange) {
        let _pass = self.pass_lock.lock().await;
        self.stats.lock().await.change_events += 1;
        let callbacks = self.callbacks();

        match change {
            ContainerChange::Started(raw) | ContainerChange::Stopped(raw) => {
                let mut record = ServiceRecord::from(raw);
                let mut created = None;
                if let (Some(registry), true) = (&self.registry, self.config.register) {
                    let result = registry.register(record.clone()).await;
                    match result.action {
                        RegistrationAction::Created | RegistrationAction::Updated => {
                            created = Some(result.action == RegistrationAction::Created);
                            if let Some(stored) = registry.get(&record.id).await {
                                record = stored;
                            }
                        }
                        _ => warn!(message = %result.message, "Container change not registered"),
                    }
                }
                let first_seen = {
                    let mut known = self.known.lock().await;
                    let first = created.unwrap_or_else(|| !known.contains(&record.id));
                    known.insert(record.id.clone());
                    first
                };
                self.view.lock().await.insert(record.id.clone(), record.clone());
                let callback = if first_seen {
                    &callbacks.on_discovered
                } else {
                    &callbacks.on_updated
                };
                fire(callback, std::slice::from_ref(&record));
            }
            ContainerChange::Removed { container_id, name } => {
                let removed: Vec<ServiceRecord> = {
                    let mut view = self.view.lock().await;
                    let ids: Vec<String> = view
                        .values()
                        .filter(|r| {
                            r.metadata.get("container_id").and_then(|v| v.as_str())
                                == Some(container_id.as_str())
                        })
                        .map(|r| r.id.clone())
                        .collect();
                    ids.iter().filter_map(|id| view.remove(id)).collect()
                };
                if let Some(registry) = &self.registry {
                    for record in &removed {
                        registry.update_status(&record.id, "removed").await;
                    }
                }
                debug!(container_id = %container_id, name = ?name, removed = removed.len(), "Container removed");
                fire(&callbacks.on_removed, &removed);
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.runner
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Start the background loop: a pass every `interval`, plus change-feed
    /// events as they arrive.
    pub async fn start_continuous_discovery(self: &Arc<Self>, interval: Duration) -> OrchestratorResult<()> {
        if interval.is_zero() {
            return Err(OrchestratorError::InvalidInterval);
        }
        let mut runner = self.runner.lock().await;
        if runner.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return Err(OrchestratorError::AlreadyRunning);
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let feed = self.change_feed.lock().await.take();
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_loop(interval, feed, shutdown_rx).await });
        *runner = Some(Runner { handle, shutdown });
        info!(interval_secs = interval.as_secs(), "Continuous discovery started");
        Ok(())
    }

    async fn run_loop(
        self: Arc<Self>,
        interval: Duration,
        mut feed: Option<ChangeFeed>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<ChangeFeed> {
        let options = DiscoveryOptions::default();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = self.discover_all_services(&options) => {}
                        _ = shutdown.changed() => break,
                    }
                    if self.config.cleanup_each_pass {
                        if let Some(registry) = &self.registry {
                            registry.cleanup_stale_services().await;
                        }
                    }
                }
                change = next_change(&mut feed) => match change {
                    Some(change) => self.apply_change(change).await,
                    None => {
                        debug!("Change feed closed");
                        feed = None;
                    }
                },
            }
        }

        self.enter(DiscoveryPhase::Idle);
        info!("Continuous discovery loop exited");
        feed
    }

    /// Signal the loop to stop and wait up to the grace period, aborting it
    /// after that. Returns whether a loop was running.
    pub async fn stop_continuous_discovery(&self) -> bool {
        let Some(mut runner) = self.runner.lock().await.take() else {
            return false;
        };
        runner.shutdown.send_replace(true);

        match tokio::time::timeout(self.config.stop_grace(), &mut runner.handle).await {
            Ok(Ok(feed)) => {
                if feed.is_some() {
                    *self.change_feed.lock().await = feed;
                }
                info!("Continuous discovery stopped");
            }
            Ok(Err(e)) => error!(error = %e, "Continuous discovery task failed"),
            Err(_) => {
                warn!(
                    grace_ms = self.config.stop_grace_ms,
                    "Continuous discovery did not stop in time, aborting"
                );
                runner.handle.abort();
                self.enter(DiscoveryPhase::Idle);
            }
        }
        true
    }

    /// Stop the loop, flush pending registry writes and forget the in-memory view.
    pub async fn cleanup(&self) {
        self.stop_continuous_discovery().await;
        if let Some(registry) = &self.registry {
            let pending = registry.flush().await;
            if pending > 0 {
                warn!(pending, "Registry writes still pending at cleanup");
            }
        }
        self.view.lock().await.clear();
        self.known.lock().await.clear();
        self.enter(DiscoveryPhase::Idle);
        info!("Discovery orchestrator cleaned up");
    }
}

async fn next_change(feed: &mut Option<ChangeFeed>) -> Option<ContainerChange> {
    match feed {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn fire(callback: &Option<ServiceCallback>, records: &[ServiceRecord]) {
    if let Some(callback) = callback {
        for record in records {
            callback(record);
        }
    }
}
