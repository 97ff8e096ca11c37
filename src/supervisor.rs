use crate::attribution::AttributionClient;
use crate::config::chains::ChainConfig;
use crate::error::{ConfigError, MonitorError, Result};
use crate::extractor::FactoryEventRegistry;
use crate::storage::batch_writer::{spawn_batch_writer, PersistHandle, WriterGuard};
use crate::storage::contracts_db::ContractsDb;
use crate::utils::config::MonitorConfig;
use crate::worker::ChainWorker;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Duration};

const LIVENESS_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolve the selected network names against the registry: non-EVM and
/// unknown chains are skipped with a warning; an empty result is a fatal
/// config error.
pub fn resolve_networks(selected: &[String]) -> Result<Vec<ChainConfig>> {
    let mut usable = Vec::new();
    for name in selected {
        if ChainConfig::is_non_evm(name) {
            tracing::warn!("Skipping {} - non-EVM chains not yet supported", name);
            continue;
        }
        match ChainConfig::get(name) {
            Some(cfg) => usable.push(cfg),
            None => tracing::warn!("Skipping {} - no RPC endpoints configured", name),
        }
    }
    if usable.is_empty() {
        return Err(ConfigError::NoUsableChains.into());
    }
    Ok(usable)
}

fn spawn_worker(
    config: &MonitorConfig,
    chain: &ChainConfig,
    attribution: &Arc<AttributionClient>,
    persist: &PersistHandle,
    db: &ContractsDb,
    shutdown_tx: &broadcast::Sender<()>,
) -> JoinHandle<()> {
    let worker = ChainWorker::new(
        chain.clone(),
        config.block_check_interval_secs,
        config.scan_batch_size,
        config.confirmation_depth,
        FactoryEventRegistry::default(),
        attribution.clone(),
        persist.clone(),
        db.clone(),
    );
    tokio::spawn(worker.run(shutdown_tx.subscribe()))
}

/// Owns the per-chain workers, the persistence writer, and the liveness
/// monitor. Workers that die unexpectedly are respawned — the cursor in
/// persistence is authoritative, so a restart loses no progress.
pub struct Supervisor {
    config: MonitorConfig,
    chains: Vec<ChainConfig>,
    attribution: Arc<AttributionClient>,
    db: ContractsDb,
    persist: PersistHandle,
    writer_guard: WriterGuard,
    fatal_rx: mpsc::UnboundedReceiver<String>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Supervisor {
    pub fn new(config: MonitorConfig, chains: Vec<ChainConfig>) -> Result<Self> {
        let attribution = Arc::new(
            AttributionClient::new(
                config.attribution_api_url.as_str(),
                config.attribution_api_key.as_str(),
            )
                .map_err(|e| MonitorError::Config(ConfigError::Invalid(e.to_string())))?,
        );
        let db = ContractsDb::open(&config.db_path)
            .map_err(|e| MonitorError::Persistence(e.to_string()))?;
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        let (persist, writer_guard) = spawn_batch_writer(db.clone(), fatal_tx);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            chains,
            attribution,
            db,
            persist,
            writer_guard,
            fatal_rx,
            shutdown_tx,
        })
    }

    /// Run until a shutdown signal (ctrl-c) or a fatal persistence error.
    pub async fn run(self) -> Result<()> {
        let Supervisor {
            config,
            chains,
            attribution,
            db,
            persist,
            writer_guard,
            mut fatal_rx,
            shutdown_tx,
        } = self;

        tracing::info!(
            "Starting monitoring for {} network(s): {}",
            chains.len(),
            chains
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        tracing::info!("Check interval: {} seconds", config.block_check_interval_secs);

        let mut workers: HashMap<String, JoinHandle<()>> = HashMap::new();
        for chain in &chains {
            workers.insert(
                chain.name.clone(),
                spawn_worker(&config, chain, &attribution, &persist, &db, &shutdown_tx),
            );
            tracing::info!("[{}] Worker started", chain.name);
        }

        let mut liveness = interval(LIVENESS_CHECK_INTERVAL);
        liveness.tick().await; // first tick completes immediately

        let fatal_reason = loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received shutdown signal");
                    break None;
                }
                fatal = fatal_rx.recv() => {
                    break Some(fatal.unwrap_or_else(|| "persistence writer exited".to_string()));
                }
                _ = liveness.tick() => {
                    for chain in &chains {
                        let dead = workers
                            .get(&chain.name)
                            .map(|h| h.is_finished())
                            .unwrap_or(true);
                        if dead {
                            tracing::warn!(
                                "[{}] Worker died unexpectedly, restarting...",
                                chain.name
                            );
                            workers.insert(
                                chain.name.clone(),
                                spawn_worker(
                                    &config,
                                    chain,
                                    &attribution,
                                    &persist,
                                    &db,
                                    &shutdown_tx,
                                ),
                            );
                            tracing::info!("[{}] Worker restarted successfully", chain.name);
                        }
                    }
                }
            }
        };

        // Graceful shutdown: stop the workers, then drain persistence.
        tracing::info!("Stopping all monitors...");
        let _ = shutdown_tx.send(());
        for (name, handle) in workers {
            tracing::info!("[{}] Waiting for worker to stop...", name);
            if timeout(WORKER_JOIN_TIMEOUT, handle).await.is_err() {
                tracing::warn!("[{}] Worker did not stop within timeout", name);
            }
        }

        // Give any in-flight enqueues a moment to land before the drain.
        sleep(Duration::from_millis(50)).await;
        match persist.flush().await {
            Ok(count) => tracing::info!("Final flush persisted {} row(s)", count),
            Err(err) => tracing::warn!("Final flush failed: {}", err),
        }
        drop(persist);
        writer_guard
            .close()
            .await
            .map_err(|e| MonitorError::Persistence(e.to_string()))?;
        tracing::info!("Multi-chain contract monitor stopped");

        match fatal_reason {
            Some(reason) => Err(MonitorError::Persistence(reason)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_networks_filters_non_evm_and_unknown() {
        let usable =
            resolve_networks(&names(&["ethereum", "solana", "nonsense", "base"])).unwrap();
        let resolved: Vec<_> = usable.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(resolved, vec!["ethereum", "base"]);
    }

    #[test]
    fn test_resolve_networks_with_nothing_usable_is_fatal() {
        let err = resolve_networks(&names(&["solana", "bitcoin"])).unwrap_err();
        assert!(matches!(
            err,
            MonitorError::Config(ConfigError::NoUsableChains)
        ));
        let err = resolve_networks(&[]).unwrap_err();
        assert!(matches!(
            err,
            MonitorError::Config(ConfigError::NoUsableChains)
        ));
    }
}
