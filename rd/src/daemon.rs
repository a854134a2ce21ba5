//! Wires the engine into one process
//!
//! One in-process event log and correlation store are shared by the
//! dispatcher, the response collectors, the model builders and one worker per
//! provider. Every consumer runs its own [`ConsumerLoop`] task and stops when
//! the shared shutdown flag flips, as does the task purging expired keys
//! from the store.

use std::sync::Arc;
use std::time::Duration;

use eyre::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheQueryEngine, ProposalIndex};
use crate::client::SearchClient;
use crate::collector::{COLLECTOR_GROUP, ResponseCollector};
use crate::config::{Config, ProviderConfig};
use crate::dispatcher::{DISPATCHER_GROUP, Dispatcher};
use crate::events::{ConsumerLoop, ConsumerStats, EventHandler, EventLog, InMemoryEventLog, TopicSelector};
use crate::model::{MODEL_GROUP, ModelBuilder};
use crate::providers::{PROVIDERS_GROUP, ProviderGateway, ProviderWorker, RegistryRoster, create_gateway};
use crate::store::{Correlations, InMemoryStore, sweep_expired};
use crate::waiter::CompletionWaiter;

/// A running engine
pub struct Daemon {
    log: InMemoryEventLog,
    store: Arc<InMemoryStore>,
    correlations: Correlations,
    index: ProposalIndex,
    roster: Arc<RegistryRoster>,
    client: SearchClient,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(String, JoinHandle<ConsumerStats>)>,
    sweeper: JoinHandle<usize>,
}

impl Daemon {
    /// Start with the gateways the configured providers describe
    pub async fn start(config: &Config) -> Result<Self> {
        debug!(providers = config.providers.len(), "Daemon::start: called");
        let gateways = config
            .providers
            .iter()
            .map(|p| create_gateway(p, &config.retry).context(format!("Failed to create gateway for {}", p.id)))
            .collect::<Result<Vec<_>>>()?;
        Self::start_with_gateways(config, gateways).await
    }

    /// Start with caller-supplied gateways; probe timings come from the
    /// provider entry with the same id, or the defaults
    pub async fn start_with_gateways(config: &Config, gateways: Vec<Arc<dyn ProviderGateway>>) -> Result<Self> {
        debug!(gateways = gateways.len(), "Daemon::start_with_gateways: called");
        config.validate().context("Invalid configuration")?;

        let log = InMemoryEventLog::new(config.event_log.clone());
        let shared_log: Arc<dyn EventLog> = Arc::new(log.clone());
        let store = Arc::new(InMemoryStore::new());
        let correlations = Correlations::new(store.clone(), store.clone(), config.correlation.clone());
        let index = ProposalIndex::open(&config.cache.path)
            .context(format!("Failed to open proposal cache at {}", config.cache.path.display()))?;
        let roster = Arc::new(RegistryRoster::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = tokio::spawn(sweep_expired(
            store.clone(),
            config.correlation.sweep_interval(),
            shutdown_rx.clone(),
        ));

        let mut daemon = Self {
            log: log.clone(),
            store,
            correlations: correlations.clone(),
            index: index.clone(),
            roster: roster.clone(),
            client: SearchClient::new(
                shared_log.clone(),
                correlations.clone(),
                CompletionWaiter::new(
                    correlations.clone(),
                    Duration::from_millis(config.waiter.deadline_ms),
                    config.retry.clone(),
                ),
                config.retry.clone(),
            ),
            shutdown_tx,
            tasks: Vec::new(),
            sweeper,
        };

        for gateway in gateways {
            let id = gateway.provider_id().to_string();
            let provider_config = config
                .providers
                .iter()
                .find(|p| p.id == id)
                .cloned()
                .unwrap_or_else(|| ProviderConfig::fixture(&id));
            let worker = ProviderWorker::from_config(gateway, shared_log.clone(), &provider_config);
            let selector = worker.selector();
            daemon
                .spawn_consumer(config, PROVIDERS_GROUP, selector, Arc::new(worker), &shutdown_rx)
                .await?;
            roster
                .register(&id)
                .context(format!("Failed to register provider {id}"))?;
        }

        for instance in 0..config.collector.instances {
            let collector = ResponseCollector::new(correlations.clone(), config.retry.clone(), instance);
            daemon
                .spawn_consumer(
                    config,
                    COLLECTOR_GROUP,
                    ResponseCollector::selector(),
                    Arc::new(collector),
                    &shutdown_rx,
                )
                .await?;
        }

        for instance in 0..config.model.instances {
            let builder = ModelBuilder::new(index.clone(), instance);
            daemon
                .spawn_consumer(config, MODEL_GROUP, ModelBuilder::selector(), Arc::new(builder), &shutdown_rx)
                .await?;
        }

        let dispatcher = Dispatcher::new(
            roster,
            shared_log,
            correlations,
            CacheQueryEngine::new(index, config.cache.hide_expired),
            config.retry.clone(),
        );
        daemon
            .spawn_consumer(
                config,
                DISPATCHER_GROUP,
                Dispatcher::selector(),
                Arc::new(dispatcher),
                &shutdown_rx,
            )
            .await?;

        info!(consumers = daemon.tasks.len(), "Daemon started");
        Ok(daemon)
    }

    async fn spawn_consumer<H>(
        &mut self,
        config: &Config,
        group: &str,
        selector: TopicSelector,
        handler: Arc<H>,
        shutdown_rx: &watch::Receiver<bool>,
    ) -> Result<()>
    where
        H: EventHandler + 'static,
    {
        let consumer = self
            .log
            .subscribe(group, selector)
            .await
            .context(format!("Failed to join consumer group {group}"))?;
        let consumer_loop = ConsumerLoop::new(consumer, config.event_log.max_redeliveries, config.retry.clone());
        let name = handler.name().to_string();
        let rx = shutdown_rx.clone();
        debug!(%name, group, "Daemon::spawn_consumer: spawning");
        let handle = tokio::spawn(async move { consumer_loop.run(handler.as_ref(), rx).await });
        self.tasks.push((name, handle));
        Ok(())
    }

    pub fn client(&self) -> SearchClient {
        self.client.clone()
    }

    pub fn roster(&self) -> Arc<RegistryRoster> {
        self.roster.clone()
    }

    pub fn correlations(&self) -> &Correlations {
        &self.correlations
    }

    pub fn index(&self) -> &ProposalIndex {
        &self.index
    }

    pub fn store(&self) -> &Arc<InMemoryStore> {
        &self.store
    }

    pub fn event_log(&self) -> &InMemoryEventLog {
        &self.log
    }

    /// Stop every consumer and wait for them to finish
    pub async fn shutdown(self) -> Result<()> {
        debug!("Daemon::shutdown: called");
        info!("Daemon shutting down...");
        if self.shutdown_tx.send(true).is_err() {
            debug!("Daemon::shutdown: no consumer left to notify");
        }
        for (name, handle) in self.tasks {
            match handle.await {
                Ok(stats) => debug!(%name, ?stats, "Daemon::shutdown: consumer stopped"),
                Err(e) => warn!(%name, error = %e, "Consumer task failed"),
            }
        }
        match self.sweeper.await {
            Ok(purged) => debug!(purged, "Daemon::shutdown: sweeper stopped"),
            Err(e) => warn!(error = %e, "Sweeper task failed"),
        }
        info!("Daemon stopped");
        Ok(())
    }
}
