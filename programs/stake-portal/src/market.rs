//! Marketplace floor prices and lending pool depth for the tracked
//! collections. Both caches are refreshed by background tasks and served
//! from the last snapshot.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::abi;
use crate::chain::{ChainError, ChainReader, COLLECTION_OFFER_CREATED, LOAN_STATUS_PENDING};
use crate::emit;
use crate::error::PortalError;
use crate::events::{FloorPricesRefreshed, PoolStatsRefreshed};
use crate::state::{Currency, FloorPrice, PoolStats, TrackedCollection, POOL_STATS_LOOKBACK_BLOCKS};

pub const MAGIC_EDEN_API_BASE: &str = "https://api-mainnet.magiceden.dev/v3/rtp/apechain";

/// Pause between consecutive marketplace requests in one refresh.
pub const MARKETPLACE_REQUEST_SPACING: Duration = Duration::from_secs(1);

/// Floor ask as reported by the marketplace.
#[derive(Clone, Debug, PartialEq)]
pub struct FloorQuote {
    pub floor_price: f64,
    pub floor_price_usd: Option<f64>,
    pub currency: Currency,
}

#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    /// `None` when the marketplace has no floor ask for the collection.
    async fn fetch_floor(&self, collection: &TrackedCollection) -> Result<Option<FloorQuote>, PortalError>;
}

#[derive(Deserialize)]
struct CollectionsResponse {
    #[serde(default)]
    collections: Vec<CollectionListing>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectionListing {
    floor_ask: Option<FloorAsk>,
}

#[derive(Deserialize)]
struct FloorAsk {
    price: Option<AskPrice>,
}

#[derive(Deserialize)]
struct AskPrice {
    currency: Currency,
    amount: AskAmount,
}

#[derive(Deserialize)]
struct AskAmount {
    decimal: Option<f64>,
    usd: Option<f64>,
}

impl CollectionsResponse {
    fn into_quote(self) -> Option<FloorQuote> {
        let price = self.collections.into_iter().next()?.floor_ask?.price?;
        Some(FloorQuote {
            floor_price: price.amount.decimal?,
            floor_price_usd: price.amount.usd,
            currency: price.currency,
        })
    }
}

pub struct MagicEdenClient {
    http: reqwest::Client,
    api_key: Option<String>,
    api_base: String,
}

impl MagicEdenClient {
    pub fn new(http: reqwest::Client, api_key: Option<String>) -> Self {
        Self {
            http,
            api_key,
            api_base: MAGIC_EDEN_API_BASE.to_string(),
        }
    }
}

#[async_trait]
impl MarketplaceApi for MagicEdenClient {
    async fn fetch_floor(&self, collection: &TrackedCollection) -> Result<Option<FloorQuote>, PortalError> {
        let mut request = self
            .http
            .get(format!("{}/collections/v7", self.api_base))
            .query(&[
                ("contract", collection.contract_address.as_str()),
                ("sortBy", "allTimeVolume"),
            ]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let body: CollectionsResponse = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PortalError::Marketplace(e.to_string()))?
            .json()
            .await
            .map_err(|e| PortalError::Marketplace(e.to_string()))?;
        Ok(body.into_quote())
    }
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FloorPriceSnapshot {
    /// Keyed by collection id and by lowercase contract address.
    pub data: BTreeMap<String, FloorPrice>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// A tracked collection joined with its cached floor price.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDetails {
    #[serde(flatten)]
    pub collection: TrackedCollection,
    pub floor_price: f64,
    #[serde(rename = "floorPriceUSD")]
    pub floor_price_usd: Option<f64>,
    pub currency: Currency,
    pub last_updated: DateTime<Utc>,
}

pub struct FloorPriceCache {
    collections: Vec<TrackedCollection>,
    spacing: Duration,
    snapshot: RwLock<Arc<FloorPriceSnapshot>>,
}

impl FloorPriceCache {
    pub fn new(collections: Vec<TrackedCollection>, spacing: Duration) -> Self {
        Self {
            collections,
            spacing,
            snapshot: RwLock::new(Arc::new(FloorPriceSnapshot::default())),
        }
    }

    pub fn snapshot(&self) -> Arc<FloorPriceSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn floor_price(&self, address: &str) -> Result<FloorPrice, PortalError> {
        self.snapshot()
            .data
            .get(&address.to_lowercase())
            .cloned()
            .ok_or(PortalError::FloorPriceNotFound)
    }

    pub fn collection(&self, address: &str) -> Result<CollectionDetails, PortalError> {
        let collection = self
            .collections
            .iter()
            .find(|c| c.contract_address.eq_ignore_ascii_case(address))
            .ok_or(PortalError::CollectionNotFound)?;
        let floor = self.floor_price(&collection.contract_address)?;
        Ok(CollectionDetails {
            collection: collection.clone(),
            floor_price: floor.floor_price,
            floor_price_usd: floor.floor_price_usd,
            currency: floor.currency,
            last_updated: floor.last_updated,
        })
    }

    /// Fetches every tracked collection in turn. Entries that fail to refresh
    /// keep their previous value. Returns how many were updated.
    pub async fn refresh(&self, market: &dyn MarketplaceApi) -> usize {
        let mut data = self.snapshot().data.clone();
        let mut updated = 0;
        for (i, collection) in self.collections.iter().enumerate() {
            if i > 0 && !self.spacing.is_zero() {
                tokio::time::sleep(self.spacing).await;
            }
            match market.fetch_floor(collection).await {
                Ok(Some(quote)) => {
                    tracing::debug!(
                        collection = %collection.name,
                        floor = quote.floor_price,
                        symbol = %quote.currency.symbol,
                        "floor price updated"
                    );
                    let price = FloorPrice {
                        id: collection.id.clone(),
                        name: collection.name.clone(),
                        symbol: collection.magic_eden_symbol.clone(),
                        floor_price: quote.floor_price,
                        floor_price_usd: quote.floor_price_usd,
                        currency: quote.currency,
                        last_updated: Utc::now(),
                    };
                    data.insert(collection.id.clone(), price.clone());
                    data.insert(collection.contract_address.to_lowercase(), price);
                    updated += 1;
                }
                Ok(None) => tracing::debug!(collection = %collection.name, "no floor ask listed"),
                Err(err) => tracing::warn!(collection = %collection.name, %err, "floor price fetch failed"),
            }
        }

        emit!(FloorPricesRefreshed {
            collections: self.collections.len(),
            updated,
        });
        *self.snapshot.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(FloorPriceSnapshot {
            data,
            last_updated: Some(Utc::now()),
        });
        updated
    }
}

pub fn spawn_floor_refresh(
    cache: Arc<FloorPriceCache>,
    market: Arc<dyn MarketplaceApi>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let updated = cache.refresh(market.as_ref()).await;
            tracing::info!(updated, "floor price cache updated");
        }
    })
}

/// Pending-offer depth per lending collection, keyed by lowercase address.
pub struct PoolStatsCache {
    lending_contract: String,
    lookback_blocks: u64,
    stats: RwLock<Arc<BTreeMap<String, PoolStats>>>,
}

impl PoolStatsCache {
    pub fn new(lending_contract: impl Into<String>) -> Self {
        Self {
            lending_contract: lending_contract.into(),
            lookback_blocks: POOL_STATS_LOOKBACK_BLOCKS,
            stats: RwLock::new(Arc::new(BTreeMap::new())),
        }
    }

    pub fn get(&self, collection: &str) -> Result<PoolStats, PortalError> {
        self.stats
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&collection.to_lowercase())
            .cloned()
            .ok_or(PortalError::PoolStatsNotFound)
    }

    /// Recomputes stats for every active lending collection. Collections that
    /// fail keep their previous stats; inactive or delisted ones are dropped.
    /// Returns how many were updated.
    pub async fn refresh(&self, chain: &dyn ChainReader) -> Result<usize, ChainError> {
        let collections = chain.lending_collections().await?;
        let mut stats = (**self.stats.read().unwrap_or_else(|p| p.into_inner())).clone();
        stats.retain(|address, _| collections.iter().any(|c| c.eq_ignore_ascii_case(address)));
        let mut active = 0;
        for collection in &collections {
            match self.collection_stats(chain, collection).await {
                Ok(Some(entry)) => {
                    tracing::debug!(
                        %collection,
                        available_pool = %entry.available_pool,
                        best_offer = %entry.best_offer,
                        "pool stats updated"
                    );
                    stats.insert(collection.to_lowercase(), entry);
                    active += 1;
                }
                Ok(None) => {
                    if stats.remove(&collection.to_lowercase()).is_some() {
                        tracing::debug!(%collection, "collection inactive, pool stats dropped");
                    }
                }
                Err(err) => tracing::warn!(%collection, %err, "pool stats failed"),
            }
        }

        emit!(PoolStatsRefreshed {
            collections: collections.len(),
            active,
        });
        *self.stats.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(stats);
        Ok(active)
    }

    /// `None` for inactive collections.
    async fn collection_stats(
        &self,
        chain: &dyn ChainReader,
        collection: &str,
    ) -> Result<Option<PoolStats>, ChainError> {
        if !chain.collection_active(collection).await? {
            return Ok(None);
        }
        let head = chain.block_number().await?;
        let topics = vec![
            Some(abi::event_topic(COLLECTION_OFFER_CREATED)),
            None,
            None,
            Some(abi::address_topic(collection)?),
        ];
        let logs = chain
            .logs(
                &self.lending_contract,
                head.saturating_sub(self.lookback_blocks),
                head,
                topics,
            )
            .await?;

        let mut total = U256::zero();
        let mut best = U256::zero();
        for log in &logs {
            let Some(offer_topic) = log.topics.get(1) else {
                continue;
            };
            let offer_bytes = abi::decode_hex(offer_topic)?;
            if offer_bytes.len() != abi::WORD {
                return Err(ChainError::Decode(format!("offer topic has {} bytes", offer_bytes.len())));
            }
            let offer_id = U256::from_big_endian(&offer_bytes);
            match chain.loan_offer(offer_id).await {
                Ok(offer) if offer.status == LOAN_STATUS_PENDING => {
                    total = total.saturating_add(offer.amount);
                    best = best.max(offer.amount);
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(%offer_id, %err, "loan offer lookup failed"),
            }
        }

        Ok(Some(PoolStats {
            available_pool: abi::format_ether(total),
            best_offer: abi::format_ether(best),
            last_updated: Utc::now(),
        }))
    }
}

pub fn spawn_pool_stats_refresh(
    cache: Arc<PoolStatsCache>,
    chain: Arc<dyn ChainReader>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match cache.refresh(chain.as_ref()).await {
                Ok(active) => tracing::info!(active, "pool stats cache updated"),
                Err(err) => tracing::error!(%err, "pool stats refresh failed"),
            }
        }
    })
}
