use crate::error::{Result, TransportError};
use crate::utils::error::compact_error;
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{
    Block, BlockTransactionsKind, TransactionInput, TransactionReceipt, TransactionRequest,
};
use alloy::transports::http::Http;
use reqwest::Client;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};

pub type HttpProvider = RootProvider<Http<Client>>;

const DEFAULT_RPC_CALL_TIMEOUT_MS: u64 = 30_000;
const ROTATION_BACKOFF_BASE_SECS: u64 = 5;
const ROTATION_BACKOFF_CAP_SECS: u64 = 300;
const MAX_ROTATIONS_PER_CALL: u32 = 3;

fn rpc_call_timeout_ms() -> u64 {
    std::env::var("RPC_CALL_TIMEOUT_MS")
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|v| (250..=120_000).contains(v))
        .unwrap_or(DEFAULT_RPC_CALL_TIMEOUT_MS)
}

pub fn bounded_exponential_backoff_secs(base_secs: u64, streak: u32, cap_secs: u64) -> u64 {
    if base_secs == 0 {
        return 0;
    }
    let clamped = streak.min(8);
    base_secs
        .saturating_mul(1u64 << clamped)
        .min(cap_secs.max(base_secs))
}

struct Endpoint {
    url: String,
    provider: Arc<HttpProvider>,
}

/// One chain's RPC surface. Holds the ordered endpoint list and remembers
/// the last endpoint that answered so healthy endpoints are preferred.
///
/// Failure contract: on any error the next endpoint in the rotation is
/// tried; after a full rotation the call sleeps with exponential backoff
/// (5s doubling, capped at 300s) and rotates again, up to 3 rotations,
/// before surfacing a `TransportError`.
pub struct ChainClient {
    chain: String,
    endpoints: Vec<Endpoint>,
    last_good: AtomicUsize,
}

impl ChainClient {
    pub fn new(chain: impl Into<String>, rpc_urls: &[String]) -> Result<Self> {
        let chain = chain.into();
        let mut endpoints = Vec::with_capacity(rpc_urls.len());
        for raw in rpc_urls {
            let url = raw.trim();
            if url.is_empty() {
                continue;
            }
            let parsed = url
                .parse::<reqwest::Url>()
                .map_err(|e| TransportError::InvalidUrl {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
            endpoints.push(Endpoint {
                url: url.to_string(),
                provider: Arc::new(ProviderBuilder::new().on_http(parsed)),
            });
        }
        if endpoints.is_empty() {
            return Err(TransportError::InvalidUrl {
                url: String::new(),
                reason: format!("no RPC endpoints configured for {chain}"),
            }
            .into());
        }
        Ok(Self {
            chain,
            endpoints,
            last_good: AtomicUsize::new(0),
        })
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Run `op` against endpoints starting from the last known-good one,
    /// rotating on failure and backing off between full rotations.
    async fn run_with_failover<T, Op, Fut>(&self, context: &str, mut op: Op) -> Result<T>
    where
        Op: FnMut(Arc<HttpProvider>) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        let timeout_ms = rpc_call_timeout_ms();
        let n = self.endpoints.len();
        let mut last_message = String::new();
        let mut last_was_timeout = false;

        for rotation in 0..MAX_ROTATIONS_PER_CALL {
            if rotation > 0 {
                let backoff = bounded_exponential_backoff_secs(
                    ROTATION_BACKOFF_BASE_SECS,
                    rotation - 1,
                    ROTATION_BACKOFF_CAP_SECS,
                );
                tracing::warn!(
                    "[{}] {} rotation {} exhausted ({}); backing off {}s",
                    self.chain,
                    context,
                    rotation,
                    last_message,
                    backoff
                );
                sleep(Duration::from_secs(backoff)).await;
            }

            let start = self.last_good.load(Ordering::Relaxed);
            for offset in 0..n {
                let idx = (start + offset) % n;
                let endpoint = &self.endpoints[idx];
                match timeout(
                    Duration::from_millis(timeout_ms),
                    op(endpoint.provider.clone()),
                )
                .await
                {
                    Ok(Ok(value)) => {
                        if idx != start {
                            tracing::debug!(
                                "[{}] failover: now preferring endpoint {}",
                                self.chain,
                                endpoint.url
                            );
                        }
                        self.last_good.store(idx, Ordering::Relaxed);
                        return Ok(value);
                    }
                    Ok(Err(err)) => {
                        last_message = compact_error(err);
                        last_was_timeout = false;
                        tracing::debug!(
                            "[{}] {} failed on {}: {}",
                            self.chain,
                            context,
                            endpoint.url,
                            last_message
                        );
                    }
                    Err(_) => {
                        last_message = format!("timed out after {timeout_ms}ms");
                        last_was_timeout = true;
                        tracing::debug!(
                            "[{}] {} timed out on {}",
                            self.chain,
                            context,
                            endpoint.url
                        );
                    }
                }
            }
        }

        // Timeouts count as transport errors; when the final attempt was one,
        // say so in the type rather than burying it in the message.
        if last_was_timeout {
            return Err(TransportError::Timeout {
                context: context.to_string(),
                timeout_ms,
            }
            .into());
        }
        Err(TransportError::EndpointsExhausted {
            context: context.to_string(),
            endpoints: n,
            last_error: last_message,
        }
        .into())
    }

    pub async fn latest_height(&self) -> Result<u64> {
        self.run_with_failover("eth_blockNumber", |p| async move {
            p.get_block_number().await.map_err(anyhow::Error::from)
        })
        .await
    }

    pub async fn get_block_with_transactions(&self, height: u64) -> Result<Option<Block>> {
        self.run_with_failover(&format!("eth_getBlockByNumber(#{height})"), move |p| {
            async move {
                p.get_block_by_number(height.into(), BlockTransactionsKind::Full)
                    .await
                    .map_err(anyhow::Error::from)
            }
        })
        .await
    }

    pub async fn get_transaction_receipt(
        &self,
        tx_hash: B256,
    ) -> Result<Option<TransactionReceipt>> {
        self.run_with_failover(&format!("eth_getTransactionReceipt({tx_hash:#x})"), move |p| {
            async move {
                p.get_transaction_receipt(tx_hash)
                    .await
                    .map_err(anyhow::Error::from)
            }
        })
        .await
    }

    pub async fn get_code(&self, address: Address) -> Result<Bytes> {
        self.run_with_failover(&format!("eth_getCode({address:#x})"), move |p| async move {
            p.get_code_at(address).await.map_err(anyhow::Error::from)
        })
        .await
    }

    /// Read-only call with pre-built calldata (selector + args).
    pub async fn eth_call(&self, to: Address, calldata: Vec<u8>) -> Result<Bytes> {
        let selector_hex = if calldata.len() >= 4 {
            format!("0x{}", hex::encode(&calldata[..4]))
        } else {
            "0x".to_string()
        };
        self.run_with_failover(&format!("eth_call({to:#x}, {selector_hex})"), move |p| {
            let calldata = calldata.clone();
            async move {
                let tx = TransactionRequest::default()
                    .to(to)
                    .input(TransactionInput::new(Bytes::from(calldata)));
                p.call(&tx).await.map_err(anyhow::Error::from)
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_backoff_schedule_matches_contract() {
        // 5s base, doubling, capped at 300s.
        assert_eq!(bounded_exponential_backoff_secs(5, 0, 300), 5);
        assert_eq!(bounded_exponential_backoff_secs(5, 1, 300), 10);
        assert_eq!(bounded_exponential_backoff_secs(5, 2, 300), 20);
        assert_eq!(bounded_exponential_backoff_secs(5, 6, 300), 300);
        assert_eq!(bounded_exponential_backoff_secs(5, 63, 300), 300);
    }

    #[test]
    fn test_client_rejects_empty_and_invalid_endpoint_lists() {
        assert!(ChainClient::new("ethereum", &[]).is_err());
        assert!(ChainClient::new("ethereum", &["not a url".to_string()]).is_err());
        let ok = ChainClient::new(
            "ethereum",
            &[
                "https://eth.llamarpc.com".to_string(),
                " ".to_string(),
                "https://rpc.ankr.com/eth".to_string(),
            ],
        )
        .expect("valid endpoints");
        assert_eq!(ok.endpoint_count(), 2);
        assert_eq!(ok.chain(), "ethereum");
    }

    #[test]
    fn test_call_timeout_env_override_is_clamped() {
        let old = std::env::var("RPC_CALL_TIMEOUT_MS").ok();
        std::env::remove_var("RPC_CALL_TIMEOUT_MS");
        assert_eq!(rpc_call_timeout_ms(), 30_000);
        std::env::set_var("RPC_CALL_TIMEOUT_MS", "100");
        assert_eq!(rpc_call_timeout_ms(), 30_000);
        std::env::set_var("RPC_CALL_TIMEOUT_MS", "5000");
        assert_eq!(rpc_call_timeout_ms(), 5_000);
        match old {
            Some(v) => std::env::set_var("RPC_CALL_TIMEOUT_MS", v),
            None => std::env::remove_var("RPC_CALL_TIMEOUT_MS"),
        }
    }
}
