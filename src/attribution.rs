use crate::utils::error::compact_error;
use alloy::primitives::Address;
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, OnceCell};
use tokio::time::{sleep, Duration, Instant};

const DEFAULT_CACHE_TTL_SECS: u64 = 3_600;
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;
const REQUESTS_PER_SECOND: f64 = 20.0;
const NETWORK_RETRY_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(2);

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn load_cache_ttl_secs() -> u64 {
    std::env::var("ATTRIBUTION_CACHE_TTL_SECS")
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_CACHE_TTL_SECS)
}

fn load_http_timeout_ms() -> u64 {
    std::env::var("ATTRIBUTION_HTTP_TIMEOUT_MS")
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|v| (250..=60_000).contains(v))
        .unwrap_or(DEFAULT_HTTP_TIMEOUT_MS)
}

/// A known entity behind an address. Both fields absent never happens here;
/// "no entity known" is expressed as `None` at the lookup boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub name: Option<String>,
    pub id: Option<String>,
}

// Address intelligence response — https://api.arkm.com/intelligence/address/{addr}
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddressIntelligence {
    /// Current shape: the owning entity.
    arkham_entity: Option<EntityRef>,
    /// Older responses carried a bare `entity` object.
    entity: Option<EntityRef>,
    /// Address-level label when no entity is attached.
    arkham_label: Option<EntityRef>,
}

#[derive(Debug, Clone, Deserialize)]
struct EntityRef {
    name: Option<String>,
    id: Option<String>,
}

/// Pull the entity out of the service's response. The API has shipped three
/// shapes over time; all are tolerated, preferring the entity over the label.
fn extract_entity(body: &AddressIntelligence) -> Option<Entity> {
    for candidate in [&body.arkham_entity, &body.entity, &body.arkham_label] {
        if let Some(entity_ref) = candidate {
            if entity_ref.name.is_some() || entity_ref.id.is_some() {
                return Some(Entity {
                    name: entity_ref.name.clone(),
                    id: entity_ref.id.clone(),
                });
            }
        }
    }
    None
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by every chain worker. Overflow callers park on the
/// sleep until a token accrues; a cache hit never touches the bucket.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    rate_per_sec: f64,
    capacity: f64,
}

impl TokenBucket {
    pub fn new(rate_per_sec: f64, capacity: f64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                // Starts empty: a full initial bucket plus the first second
                // of refill would admit twice the rate in one rolling second.
                tokens: 0.0,
                last_refill: Instant::now(),
            }),
            rate_per_sec,
            capacity,
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let elapsed = state.last_refill.elapsed().as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
                state.last_refill = Instant::now();
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.rate_per_sec)
            };
            sleep(wait).await;
        }
    }

    #[cfg(test)]
    async fn available(&self) -> f64 {
        self.state.lock().await.tokens
    }
}

#[derive(Clone)]
struct CacheEntry {
    result: Option<Entity>,
    expires_at_ms: u64,
}

type CacheKey = (String, Address);

/// Client for the external entity attribution service.
///
/// Contracts: at most 20 network requests per rolling second (token bucket);
/// 1h TTL cache including negative results; at most one in-flight request
/// per (chain, address) with late callers awaiting the same result; one
/// retry after 1s on a network error; a 429 sleeps for the advertised
/// Retry-After (2s default) before one retry.
pub struct AttributionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    bucket: TokenBucket,
    cache: DashMap<CacheKey, CacheEntry>,
    inflight: DashMap<CacheKey, Arc<OnceCell<Option<Entity>>>>,
    cache_ttl_ms: u64,
}

impl AttributionClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(load_http_timeout_ms()))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            bucket: TokenBucket::new(REQUESTS_PER_SECOND, REQUESTS_PER_SECOND),
            cache: DashMap::new(),
            inflight: DashMap::new(),
            cache_ttl_ms: load_cache_ttl_secs().saturating_mul(1_000),
        })
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    fn cache_key(chain: &str, address: Address) -> CacheKey {
        (chain.to_ascii_lowercase(), address)
    }

    fn cache_get(&self, key: &CacheKey) -> Option<Option<Entity>> {
        let entry = self.cache.get(key)?;
        if now_ms() >= entry.expires_at_ms {
            drop(entry);
            self.cache.remove(key);
            return None;
        }
        Some(entry.result.clone())
    }

    fn cache_put(&self, key: CacheKey, result: Option<Entity>) {
        self.cache.insert(
            key,
            CacheEntry {
                result,
                expires_at_ms: now_ms().saturating_add(self.cache_ttl_ms),
            },
        );
    }

    /// Look up the entity behind `(chain, address)`. `None` means no entity
    /// is known — either the service has nothing or the lookup failed after
    /// retries (logged once).
    pub async fn lookup(&self, chain: &str, address: Address) -> Option<Entity> {
        let key = Self::cache_key(chain, address);
        if let Some(cached) = self.cache_get(&key) {
            tracing::debug!("[{}] Cache hit for address {:#x}", chain, address);
            return cached;
        }

        // Coalesce: one network request per key; late callers await it.
        let cell = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        let result = cell
            .get_or_init(|| self.fetch_and_cache(key.clone(), chain, address))
            .await
            .clone();
        self.inflight.remove(&key);
        result
    }

    async fn fetch_and_cache(
        &self,
        key: CacheKey,
        chain: &str,
        address: Address,
    ) -> Option<Entity> {
        let result = self.fetch_with_retry(chain, address).await;
        match result {
            Ok(entity) => {
                self.cache_put(key, entity.clone());
                match &entity {
                    Some(e) => tracing::info!(
                        "[{}] Address {:#x} belongs to entity: {}",
                        chain,
                        address,
                        e.name.as_deref().unwrap_or("<unnamed>")
                    ),
                    None => {
                        tracing::debug!("[{}] Address {:#x} - no entity found", chain, address)
                    }
                }
                entity
            }
            Err(err) => {
                tracing::warn!(
                    "[{}] Attribution lookup failed for {:#x}: {}",
                    chain,
                    address,
                    compact_error(err)
                );
                None
            }
        }
    }

    async fn fetch_with_retry(
        &self,
        chain: &str,
        address: Address,
    ) -> anyhow::Result<Option<Entity>> {
        match self.fetch_once(chain, address).await {
            Ok(entity) => Ok(entity),
            Err(FetchError::RateLimited(retry_after)) => {
                tracing::debug!(
                    "[{}] Attribution service rate limited; retrying in {:?}",
                    chain,
                    retry_after
                );
                sleep(retry_after).await;
                match self.fetch_once(chain, address).await {
                    Ok(entity) => Ok(entity),
                    Err(err) => Err(err.into_anyhow()),
                }
            }
            Err(FetchError::Network(first)) => {
                sleep(NETWORK_RETRY_DELAY).await;
                match self.fetch_once(chain, address).await {
                    Ok(entity) => Ok(entity),
                    Err(_) => Err(anyhow::anyhow!("{first}")),
                }
            }
        }
    }

    async fn fetch_once(
        &self,
        chain: &str,
        address: Address,
    ) -> std::result::Result<Option<Entity>, FetchError> {
        self.bucket.acquire().await;
        let url = format!("{}/intelligence/address/{:#x}", self.base_url, address);
        let response = self
            .http
            .get(&url)
            .header("API-Key", &self.api_key)
            .query(&[("chain", chain)])
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after)
                .unwrap_or(DEFAULT_RETRY_AFTER);
            return Err(FetchError::RateLimited(retry_after));
        }
        if !status.is_success() {
            return Err(FetchError::Network(format!("HTTP {status}")));
        }

        let body: AddressIntelligence = response
            .json()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(extract_entity(&body))
    }
}

enum FetchError {
    Network(String),
    RateLimited(Duration),
}

impl FetchError {
    fn into_anyhow(self) -> anyhow::Error {
        match self {
            FetchError::Network(msg) => anyhow::anyhow!("{msg}"),
            FetchError::RateLimited(_) => anyhow::anyhow!("rate limited after retry"),
        }
    }
}

fn parse_retry_after(raw: &str) -> Option<Duration> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
        .filter(|d| *d <= Duration::from_secs(300))
}
