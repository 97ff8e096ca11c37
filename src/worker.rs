use crate::attribution::AttributionClient;
use crate::classifier::{Classification, ContractClassifier};
use crate::config::chains::ChainConfig;
use crate::error::{MonitorError, Result, TransportError};
use crate::extractor::{Deployment, DeploymentExtractor, FactoryEventRegistry};
use crate::rpc::{bounded_exponential_backoff_secs, ChainClient};
use crate::storage::batch_writer::PersistHandle;
use crate::storage::contracts_db::{utc_timestamp, ContractRow, ContractsDb};
use crate::utils::error::compact_error;
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::{sleep, Duration};

const MAX_CONSECUTIVE_ERRORS: u32 = 5;
const BACKOFF_CAP_SECS: u64 = 300;
const ENRICH_FAN_OUT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Scanning,
    Backoff,
    Reinit,
}

/// Compute the inclusive scan window for one iteration, or `None` when the
/// (confirmation-adjusted) tip has not reached the cursor yet.
fn scan_window(cursor: u64, latest: u64, batch_size: u64, depth: u64) -> Option<(u64, u64)> {
    let tip = latest.saturating_sub(depth);
    if tip < cursor {
        return None;
    }
    let end = cursor.saturating_add(batch_size.saturating_sub(1)).min(tip);
    Some((cursor, end))
}

fn backoff_secs(interval_secs: u64, consecutive_errors: u32) -> u64 {
    let streak = consecutive_errors.saturating_sub(1).min(5);
    bounded_exponential_backoff_secs(interval_secs, streak, BACKOFF_CAP_SECS)
}

/// Per-chain pipeline: cursor → scan → extract → classify → attribute →
/// enqueue-write. Runs until the supervisor signals shutdown; transport
/// faults drive the Backoff/Reinit regime without ever regressing the
/// cursor.
pub struct ChainWorker {
    chain: ChainConfig,
    interval: Duration,
    batch_size: u64,
    confirmation_depth: u64,
    registry: FactoryEventRegistry,
    attribution: Arc<AttributionClient>,
    persist: PersistHandle,
    db: ContractsDb,
}

impl ChainWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: ChainConfig,
        interval_secs: u64,
        batch_size: u64,
        confirmation_depth: u64,
        registry: FactoryEventRegistry,
        attribution: Arc<AttributionClient>,
        persist: PersistHandle,
        db: ContractsDb,
    ) -> Self {
        Self {
            chain,
            interval: Duration::from_secs(interval_secs),
            batch_size,
            confirmation_depth,
            registry,
            attribution,
            persist,
            db,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let name = self.chain.name.clone();
        tracing::info!("[{}] Monitoring started", name);

        let mut client = match ChainClient::new(name.as_str(), &self.chain.rpc_urls) {
            Ok(client) => Arc::new(client),
            Err(err) => {
                tracing::error!("[{}] Failed to initialize chain client: {}", name, err);
                return;
            }
        };
        let mut classifier = Arc::new(ContractClassifier::new());
        let extractor = DeploymentExtractor::new(self.registry.clone());

        let mut cursor: Option<u64> = None;
        let mut consecutive_errors: u32 = 0;
        let mut state = WorkerState::Scanning;

        loop {
            if shutdown.try_recv().is_ok() {
                break;
            }

            match state {
                WorkerState::Scanning => {
                    match self
                        .scan_iteration(&client, &classifier, &extractor, &mut cursor)
                        .await
                    {
                        Ok(()) => {
                            consecutive_errors = 0;
                            if !self.sleep_or_shutdown(self.interval, &mut shutdown).await {
                                break;
                            }
                        }
                        Err(err) => {
                            consecutive_errors += 1;
                            tracing::error!(
                                "[{}] Error in monitoring loop (#{}): {}",
                                name,
                                consecutive_errors,
                                err
                            );
                            state = if err.is_transport()
                                && consecutive_errors == MAX_CONSECUTIVE_ERRORS
                            {
                                WorkerState::Reinit
                            } else {
                                WorkerState::Backoff
                            };
                        }
                    }
                }
                WorkerState::Backoff => {
                    let wait = backoff_secs(self.interval.as_secs(), consecutive_errors);
                    tracing::info!("[{}] Retrying in {}s...", name, wait);
                    if !self
                        .sleep_or_shutdown(Duration::from_secs(wait), &mut shutdown)
                        .await
                    {
                        break;
                    }
                    state = WorkerState::Scanning;
                }
                WorkerState::Reinit => {
                    tracing::warn!(
                        "[{}] {} consecutive transport errors; reinitializing chain client",
                        name,
                        consecutive_errors
                    );
                    match self.rebuild(&name).await {
                        Ok(fresh) => {
                            client = Arc::new(fresh);
                            classifier = Arc::new(ContractClassifier::new());
                            consecutive_errors = 0;
                            tracing::info!("[{}] Reinitialized successfully", name);
                            state = WorkerState::Scanning;
                        }
                        Err(err) => {
                            tracing::error!("[{}] Reinitialization failed: {}", name, err);
                            state = WorkerState::Backoff;
                        }
                    }
                }
            }
        }

        tracing::info!("[{}] Monitoring stopped", name);
    }

    /// Rebuild the chain client and prove it with a height probe.
    async fn rebuild(&self, name: &str) -> Result<ChainClient> {
        let client = ChainClient::new(name, &self.chain.rpc_urls)?;
        client.latest_height().await?;
        Ok(client)
    }

    /// Returns false when shutdown fired during the sleep.
    async fn sleep_or_shutdown(
        &self,
        duration: Duration,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> bool {
        tokio::select! {
            _ = sleep(duration) => true,
            _ = shutdown.recv() => false,
        }
    }

    async fn scan_iteration(
        &self,
        client: &Arc<ChainClient>,
        classifier: &Arc<ContractClassifier>,
        extractor: &DeploymentExtractor,
        cursor: &mut Option<u64>,
    ) -> Result<()> {
        let name = self.chain.name.as_str();
        let latest = client.latest_height().await?;

        let current = match *cursor {
            Some(value) => value,
            None => {
                let start = match self
                    .db
                    .last_processed_block(name)
                    .map_err(|e| MonitorError::Persistence(compact_error(e)))?
                {
                    Some(last) => {
                        tracing::info!("[{}] Resuming from block {}", name, last + 1);
                        last + 1
                    }
                    None => {
                        tracing::info!("[{}] Starting fresh from current block {}", name, latest);
                        latest
                    }
                };
                *cursor = Some(start);
                start
            }
        };

        let Some((from, end)) =
            scan_window(current, latest, self.batch_size, self.confirmation_depth)
        else {
            return Ok(());
        };

        tracing::info!("[{}] Processing blocks {} to {}", name, from, end);
        let extraction = extractor.extract_range(client, from, end).await;

        // A range where every single block failed is indistinguishable from a
        // dead endpoint set; surface it as a transport fault so the backoff
        // regime engages instead of silently skipping the whole window.
        let range_len = (end - from + 1) as usize;
        if extraction.failed_blocks.len() == range_len {
            return Err(TransportError::EndpointsExhausted {
                context: format!("block range {from}-{end}"),
                endpoints: client.endpoint_count(),
                last_error: "every block in range failed".to_string(),
            }
            .into());
        }

        if !extraction.deployments.is_empty() {
            tracing::info!(
                "[{}] Found {} contract deployment(s)",
                name,
                extraction.deployments.len()
            );
            self.process_deployments(client, classifier, extraction.deployments)
                .await?;
        }

        self.persist
            .advance_cursor(name, end)
            .await
            .map_err(|e| MonitorError::Persistence(compact_error(e)))?;
        *cursor = Some(end + 1);
        Ok(())
    }

    /// Classify and attribute a batch concurrently (bounded fan-out), then
    /// enqueue rows in the original extraction order. All enrichment
    /// completes before the caller advances the cursor.
    async fn process_deployments(
        &self,
        client: &Arc<ChainClient>,
        classifier: &Arc<ContractClassifier>,
        deployments: Vec<Deployment>,
    ) -> Result<()> {
        let name = self.chain.name.as_str();
        let semaphore = Arc::new(Semaphore::new(ENRICH_FAN_OUT));
        let mut handles = Vec::with_capacity(deployments.len());

        for deployment in deployments {
            let semaphore = semaphore.clone();
            let client = client.clone();
            let classifier = classifier.clone();
            let attribution = self.attribution.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                let classification = match classifier.classify(&client, deployment.contract).await
                {
                    Ok(c) => c,
                    Err(err) => {
                        // The deployment is still recorded, tagged `Error`.
                        tracing::error!("[{}] {}", deployment.chain, err);
                        Classification::error()
                    }
                };
                tracing::info!("[{}] {}", deployment.chain, classification.summary());
                let entity = attribution
                    .lookup(&deployment.chain, deployment.deployer)
                    .await;
                Some((deployment, classification, entity))
            }));
        }

        for handle in handles {
            let Ok(Some((deployment, classification, entity))) = handle.await else {
                // Panicked or dropped enrichment: logged above, batch continues.
                continue;
            };
            let (entity_name, entity_id) = match entity {
                Some(e) => (e.name, e.id),
                None => (None, None),
            };
            let row = ContractRow {
                contract_address: deployment.contract,
                network: deployment.chain.clone(),
                deployer_address: deployment.deployer,
                entity_name,
                entity_id,
                block_number: deployment.block_number,
                transaction_hash: deployment.tx_hash,
                contract_type: classification.primary.as_str().to_string(),
                contract_info: classification.to_info_json(),
                factory_address: deployment.factory,
                deployment_type: deployment.kind.as_str().to_string(),
                timestamp: utc_timestamp(),
            };
            self.persist
                .enqueue(row)
                .await
                .map_err(|e| MonitorError::Persistence(compact_error(e)))?;
            tracing::info!("[{}] Queued contract {:#x}", name, deployment.contract);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_window_waits_below_cursor() {
        assert_eq!(scan_window(100, 99, 10, 0), None);
        assert_eq!(scan_window(100, 100, 10, 0), Some((100, 100)));
    }

    #[test]
    fn test_scan_window_clamps_to_batch_and_tip() {
        // Full batch available.
        assert_eq!(scan_window(100, 500, 10, 0), Some((100, 109)));
        // Tip closer than batch end.
        assert_eq!(scan_window(100, 104, 10, 0), Some((100, 104)));
    }

    #[test]
    fn test_scan_window_respects_confirmation_depth() {
        assert_eq!(scan_window(100, 105, 10, 3), Some((100, 102)));
        assert_eq!(scan_window(100, 102, 10, 3), None);
        // Depth larger than the chain height never underflows.
        assert_eq!(scan_window(0, 2, 10, 5), Some((0, 0)));
    }

    #[test]
    fn test_backoff_schedule_doubles_from_interval_and_caps() {
        // interval 12s: 12, 24, 48, 96, 192, 300(cap), 300...
        assert_eq!(backoff_secs(12, 1), 12);
        assert_eq!(backoff_secs(12, 2), 24);
        assert_eq!(backoff_secs(12, 3), 48);
        assert_eq!(backoff_secs(12, 4), 96);
        assert_eq!(backoff_secs(12, 5), 192);
        assert_eq!(backoff_secs(12, 6), 300);
        assert_eq!(backoff_secs(12, 40), 300);
    }

    #[test]
    fn test_backoff_schedule_matches_transient_outage_scenario() {
        // Four consecutive failures with a 5s interval sleep 5, 10, 20, 40.
        assert_eq!(backoff_secs(5, 1), 5);
        assert_eq!(backoff_secs(5, 2), 10);
        assert_eq!(backoff_secs(5, 3), 20);
        assert_eq!(backoff_secs(5, 4), 40);
    }
}
