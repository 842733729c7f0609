//! Read-only access to the collection, staking and lending contracts over
//! Ethereum JSON-RPC.
//!
//! Lending contract layout assumed by the pool stats reader:
//! - `getAllCollectionAddresses() returns (address[])`
//! - `collections(address)` returns a static tuple whose first word is `isActive`
//! - `loanOffers(uint256)` returns a static tuple with `loanAmount` at word
//!   [`LOAN_OFFER_AMOUNT_WORD`] and `status` at word [`LOAN_OFFER_STATUS_WORD`]
//! - `CollectionOfferCreated` indexes `offerId`, `lender`, `collection`

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use primitive_types::U256;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::abi;
use crate::state::StakerInfo;

pub const GET_STAKER_INFO: &str = "getStakerInfo(address)";
pub const GET_POINTS: &str = "getPoints(address)";
pub const BALANCE_OF: &str = "balanceOf(address)";
pub const GET_ALL_COLLECTIONS: &str = "getAllCollectionAddresses()";
pub const COLLECTIONS: &str = "collections(address)";
pub const LOAN_OFFERS: &str = "loanOffers(uint256)";
pub const COLLECTION_OFFER_CREATED: &str =
    "CollectionOfferCreated(uint256,address,address,uint256,uint256,uint256)";

pub const LOAN_OFFER_AMOUNT_WORD: usize = 3;
pub const LOAN_OFFER_STATUS_WORD: usize = 6;
pub const LOAN_STATUS_PENDING: u64 = 0;

/// Widest block span requested in a single `eth_getLogs` call.
pub const LOG_WINDOW_BLOCKS: u64 = 50_000;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("rpc transport: {0}")]
    Transport(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("decode: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        ChainError::Transport(err.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub address: String,
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoanOffer {
    pub amount: U256,
    pub status: u64,
}

/// Contract reads the service depends on; injected so handlers and
/// refreshers can run against a fake chain in tests.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Logs emitted by `address` in `[from, to]`, optionally filtered by topics
    /// (`None` in a position matches anything).
    async fn logs(
        &self,
        address: &str,
        from_block: u64,
        to_block: u64,
        topics: Vec<Option<String>>,
    ) -> Result<Vec<LogEntry>, ChainError>;

    async fn nft_balance(&self, owner: &str) -> Result<u64, ChainError>;
    async fn staker_info(&self, owner: &str) -> Result<StakerInfo, ChainError>;
    async fn points(&self, owner: &str) -> Result<u64, ChainError>;

    async fn lending_collections(&self) -> Result<Vec<String>, ChainError>;
    async fn collection_active(&self, collection: &str) -> Result<bool, ChainError>;
    async fn loan_offer(&self, offer_id: U256) -> Result<LoanOffer, ChainError>;
}

#[derive(Clone, Debug)]
pub struct ContractAddresses {
    pub nft: String,
    pub staking: String,
    pub lending: Option<String>,
}

pub struct RpcChainClient {
    http: reqwest::Client,
    url: String,
    contracts: ContractAddresses,
    next_id: AtomicU64,
}

impl RpcChainClient {
    pub fn new(http: reqwest::Client, url: impl Into<String>, contracts: ContractAddresses) -> Self {
        Self {
            http,
            url: url.into(),
            contracts,
            next_id: AtomicU64::new(1),
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        let response: Value = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.get("error") {
            return Err(ChainError::Rpc {
                code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| ChainError::Decode(format!("{} returned no result", method)))
    }

    async fn call(&self, to: &str, calldata: String) -> Result<Vec<u8>, ChainError> {
        let result = self
            .rpc("eth_call", json!([{ "to": to, "data": calldata }, "latest"]))
            .await?;
        let hex = result
            .as_str()
            .ok_or_else(|| ChainError::Decode("eth_call result is not a string".into()))?;
        abi::decode_hex(hex)
    }

    fn lending(&self) -> Result<&str, ChainError> {
        self.contracts
            .lending
            .as_deref()
            .ok_or_else(|| ChainError::Transport("lending contract not configured".into()))
    }
}

fn quantity(value: &Value) -> Result<u64, ChainError> {
    let s = value
        .as_str()
        .ok_or_else(|| ChainError::Decode("quantity is not a string".into()))?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| ChainError::Decode(e.to_string()))
}

#[async_trait]
impl ChainReader for RpcChainClient {
    async fn block_number(&self) -> Result<u64, ChainError> {
        quantity(&self.rpc("eth_blockNumber", json!([])).await?)
    }

    async fn logs(
        &self,
        address: &str,
        from_block: u64,
        to_block: u64,
        topics: Vec<Option<String>>,
    ) -> Result<Vec<LogEntry>, ChainError> {
        let mut out = Vec::new();
        let mut start = from_block;
        while start <= to_block {
            let end = to_block.min(start.saturating_add(LOG_WINDOW_BLOCKS - 1));
            let filter = json!({
                "address": address,
                "fromBlock": format!("0x{:x}", start),
                "toBlock": format!("0x{:x}", end),
                "topics": topics,
            });
            let result = self.rpc("eth_getLogs", json!([filter])).await?;
            let mut page: Vec<LogEntry> =
                serde_json::from_value(result).map_err(|e| ChainError::Decode(e.to_string()))?;
            out.append(&mut page);
            if end == u64::MAX {
                break;
            }
            start = end + 1;
        }
        Ok(out)
    }

    async fn nft_balance(&self, owner: &str) -> Result<u64, ChainError> {
        let data = abi::encode_call(BALANCE_OF, &[abi::encode_address(owner)?]);
        let out = self.call(&self.contracts.nft, data).await?;
        abi::decode_u64(&out, 0)
    }

    async fn staker_info(&self, owner: &str) -> Result<StakerInfo, ChainError> {
        let data = abi::encode_call(GET_STAKER_INFO, &[abi::encode_address(owner)?]);
        let out = self.call(&self.contracts.staking, data).await?;
        Ok(StakerInfo {
            staked_tokens: abi::decode_uint_array(&out, 0)?
                .into_iter()
                .map(|t| t.to_string())
                .collect(),
            total_points: abi::decode_u64(&out, 1)?,
            tier: abi::decode_u64(&out, 2)?,
            is_minter: abi::decode_bool(&out, 3)?,
        })
    }

    async fn points(&self, owner: &str) -> Result<u64, ChainError> {
        let data = abi::encode_call(GET_POINTS, &[abi::encode_address(owner)?]);
        let out = self.call(&self.contracts.staking, data).await?;
        abi::decode_u64(&out, 0)
    }

    async fn lending_collections(&self) -> Result<Vec<String>, ChainError> {
        let out = self
            .call(self.lending()?, abi::encode_call(GET_ALL_COLLECTIONS, &[]))
            .await?;
        abi::decode_address_array(&out, 0)
    }

    async fn collection_active(&self, collection: &str) -> Result<bool, ChainError> {
        let data = abi::encode_call(COLLECTIONS, &[abi::encode_address(collection)?]);
        let out = self.call(self.lending()?, data).await?;
        abi::decode_bool(&out, 0)
    }

    async fn loan_offer(&self, offer_id: U256) -> Result<LoanOffer, ChainError> {
        let data = abi::encode_call(LOAN_OFFERS, &[abi::encode_uint(offer_id)]);
        let out = self.call(self.lending()?, data).await?;
        Ok(LoanOffer {
            amount: abi::decode_uint(&out, LOAN_OFFER_AMOUNT_WORD)?,
            status: abi::decode_u64(&out, LOAN_OFFER_STATUS_WORD)?,
        })
    }
}
