use crate::error::{MonitorError, Result};
use crate::rpc::ChainClient;
use alloy::consensus::Transaction; // Trait for .to() on full transactions
use alloy::network::ReceiptResponse;
use alloy::primitives::{keccak256, Address, B256, U160};
use std::time::{SystemTime, UNIX_EPOCH};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentKind {
    Direct,
    Factory,
}

impl DeploymentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentKind::Direct => "direct",
            DeploymentKind::Factory => "factory",
        }
    }
}

/// An observed contract creation, before classification and attribution.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub contract: Address,
    pub chain: String,
    pub deployer: Address,
    pub block_number: u64,
    pub tx_hash: B256,
    pub kind: DeploymentKind,
    pub factory: Option<Address>,
    pub observed_at_ms: u64,
}

/// Where the child contract address lives in a matched factory event.
#[derive(Debug, Clone, Copy)]
pub enum ChildLocation {
    /// Indexed parameter: topics[i] (topic 0 is the signature hash).
    Topic(usize),
    /// Non-indexed parameter: 32-byte word i of the log data.
    DataWord(usize),
}

#[derive(Debug, Clone)]
pub struct FactoryEventSig {
    pub signature: String,
    pub topic0: B256,
    pub child: ChildLocation,
}

impl FactoryEventSig {
    pub fn new(signature: &str, child: ChildLocation) -> Self {
        Self {
            signature: signature.to_string(),
            topic0: keccak256(signature.as_bytes()),
            child,
        }
    }
}

/// Standardized factory events vary across protocols, so the detector runs
/// off a registry rather than a hard-coded constant. The defaults cover the
/// dominant DEX factories plus two generic deployment-event shapes; callers
/// extend the set at construction.
#[derive(Debug, Clone)]
pub struct FactoryEventRegistry {
    signatures: Vec<FactoryEventSig>,
}

impl Default for FactoryEventRegistry {
    fn default() -> Self {
        Self {
            signatures: vec![
                FactoryEventSig::new(
                    "PairCreated(address,address,address,uint256)",
                    ChildLocation::DataWord(0),
                ),
                FactoryEventSig::new(
                    "PoolCreated(address,address,uint24,int24,address)",
                    ChildLocation::DataWord(1),
                ),
                FactoryEventSig::new("ContractDeployed(address)", ChildLocation::DataWord(0)),
                FactoryEventSig::new("Deployed(address)", ChildLocation::DataWord(0)),
            ],
        }
    }
}

impl FactoryEventRegistry {
    pub fn with_signatures(mut self, extra: Vec<FactoryEventSig>) -> Self {
        self.signatures.extend(extra);
        self
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    fn match_log(&self, topics: &[B256], data: &[u8]) -> Option<Address> {
        let topic0 = topics.first()?;
        let sig = self.signatures.iter().find(|s| s.topic0 == *topic0)?;
        child_from_location(sig.child, topics, data)
    }
}

fn child_from_location(location: ChildLocation, topics: &[B256], data: &[u8]) -> Option<Address> {
    let word: [u8; 32] = match location {
        ChildLocation::Topic(i) => (*topics.get(i)?).into(),
        ChildLocation::DataWord(i) => {
            let start = i.checked_mul(32)?;
            let end = start.checked_add(32)?;
            data.get(start..end)?.try_into().ok()?
        }
    };
    // Indexed/ABI-encoded addresses are right-aligned 32-byte words.
    if word[..12].iter().any(|b| *b != 0) {
        return None;
    }
    let addr = Address::from_slice(&word[12..]);
    if addr.is_zero() {
        return None;
    }
    Some(addr)
}

/// Precompiles and other sub-0x14 system addresses are never real
/// deployments; factory logs occasionally reference them.
fn is_precompile(addr: Address) -> bool {
    U160::from_be_bytes(addr.into_array()) <= U160::from(0x13u64)
}

/// Result of a range scan: successfully extracted deployments plus the
/// blocks that could not be processed. A failing block never aborts the
/// range; the caller decides what to do with the failure list.
#[derive(Debug, Default)]
pub struct RangeExtraction {
    pub deployments: Vec<Deployment>,
    pub failed_blocks: Vec<u64>,
}

pub struct DeploymentExtractor {
    registry: FactoryEventRegistry,
}

impl DeploymentExtractor {
    pub fn new(registry: FactoryEventRegistry) -> Self {
        Self { registry }
    }

    /// Extract all deployments in `[from, to]` inclusive, in ascending
    /// (block, tx index, log index) order; a direct deployment precedes any
    /// factory deployments emitted by the same receipt.
    pub async fn extract_range(
        &self,
        client: &ChainClient,
        from: u64,
        to: u64,
    ) -> RangeExtraction {
        let mut out = RangeExtraction::default();
        for height in from..=to {
            match self.extract_block(client, height).await {
                Ok(mut deployments) => out.deployments.append(&mut deployments),
                Err(err) => {
                    tracing::warn!(
                        "[{}] Failed to process block {}: {}",
                        client.chain(),
                        height,
                        err
                    );
                    out.failed_blocks.push(height);
                }
            }
        }
        if !out.failed_blocks.is_empty() {
            tracing::warn!(
                "[{}] Failed to process {} block(s): {:?}",
                client.chain(),
                out.failed_blocks.len(),
                out.failed_blocks
            );
        }
        out
    }

    async fn extract_block(
        &self,
        client: &ChainClient,
        height: u64,
    ) -> Result<Vec<Deployment>> {
        let chain = client.chain().to_string();
        let block = client
            .get_block_with_transactions(height)
            .await?
            .ok_or_else(|| {
                MonitorError::Protocol(format!("block {height} not returned by any endpoint"))
            })?;

        let mut deployments = Vec::new();
        for tx in block.transactions.into_transactions() {
            let tx_hash = *tx.inner.tx_hash();
            let sender = tx.from;
            let is_direct = tx.to().is_none();

            // A transport fault here fails the whole block; a receipt the
            // chain simply does not have is a malformed-block oddity worth
            // naming as such.
            let Some(receipt) = client.get_transaction_receipt(tx_hash).await? else {
                return Err(MonitorError::Protocol(format!(
                    "receipt missing for mined transaction {tx_hash:#x} in block {height}"
                )));
            };

            if is_direct {
                if let Some(contract) = receipt.contract_address() {
                    if !is_precompile(contract) {
                        tracing::info!(
                            "[{}] Found direct deployment: {:#x} by {:#x} in block {}",
                            chain,
                            contract,
                            sender,
                            height
                        );
                        deployments.push(Deployment {
                            contract,
                            chain: chain.clone(),
                            deployer: sender,
                            block_number: height,
                            tx_hash,
                            kind: DeploymentKind::Direct,
                            factory: None,
                            observed_at_ms: now_ms(),
                        });
                    }
                }
            }

            // Factory path: receipt logs matched against the signature
            // registry, in log-index order, after any direct deployment from
            // the same transaction.
            for log in receipt.inner.logs() {
                let Some(child) = self
                    .registry
                    .match_log(log.topics(), log.data().data.as_ref())
                else {
                    continue;
                };
                if is_precompile(child) {
                    continue;
                }
                let emitter = log.address();
                tracing::info!(
                    "[{}] Found factory deployment: {:#x} via factory {:#x} in block {}",
                    chain,
                    child,
                    emitter,
                    height
                );
                deployments.push(Deployment {
                    contract: child,
                    chain: chain.clone(),
                    deployer: sender,
                    block_number: height,
                    tx_hash,
                    kind: DeploymentKind::Factory,
                    factory: Some(emitter),
                    observed_at_ms: now_ms(),
                });
            }
        }
        Ok(deployments)
    }
}
