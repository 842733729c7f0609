use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SESSION_TTL_SECS: u64 = 60 * 60; // 1 hour
pub const SESSION_ID_BYTES: usize = 32;

/// Max age of a wallet verification message timestamp.
pub const MAX_SIGNATURE_AGE_MS: i64 = 10 * 60 * 1000;

pub const VERIFIED_ROLE_THRESHOLD: u64 = 1;
pub const ELITE_ROLE_THRESHOLD: u64 = 10;

pub const POINTS_PER_NFT_PER_DAY: u64 = 5;
pub const MINTER_BONUS_POINTS: u64 = 1_000;
pub const MULTIPLIER_NFT_THRESHOLD: u64 = 10;
pub const SECONDS_PER_DAY: i64 = 86_400;

pub const LEADERBOARD_REFRESH_SECS: u64 = 24 * 60 * 60;
pub const FLOOR_PRICE_REFRESH_SECS: u64 = 30 * 60;
pub const POOL_STATS_REFRESH_SECS: u64 = 2 * 60;

/// Roughly 30 days of blocks on the target chain.
pub const POOL_STATS_LOOKBACK_BLOCKS: u64 = 172_800;
pub const DEFAULT_LEADERBOARD_START_BLOCK: u64 = 6_970_654;

/// A linked Discord identity plus the wallets proven to belong to it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub discord_id: String,
    pub username: String,
    pub is_discord_connected: bool,
    pub wallets: Vec<Wallet>,
    /// unix millis
    pub created_at: i64,
    /// unix millis
    pub expires_at: i64,
}

impl Session {
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at
    }

    pub fn has_wallet(&self, address: &str) -> bool {
        self.wallets
            .iter()
            .any(|w| w.address.eq_ignore_ascii_case(address))
    }

    /// Appends the wallet unless its address is already linked.
    /// Returns whether the list changed.
    pub fn link_wallet(&mut self, wallet: Wallet) -> bool {
        if self.has_wallet(&wallet.address) {
            return false;
        }
        self.wallets.push(wallet);
        true
    }

    pub fn total_nfts(&self) -> u64 {
        self.wallets
            .iter()
            .map(|w| w.total_nfts.unwrap_or(0))
            .fold(0u64, u64::saturating_add)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub address: String,
    pub nft_balance: Option<u64>,
    #[serde(rename = "stakedNFTs")]
    pub staked_nfts: Option<Vec<String>>,
    #[serde(rename = "totalNFTs")]
    pub total_nfts: Option<u64>,
    pub tier: Option<u64>,
    pub total_points: Option<u64>,
    pub is_minter: Option<bool>,
    pub linked_at: Option<i64>,
}

/// Input for a new session; id and timestamps are assigned by the store.
#[derive(Clone, Debug)]
pub struct NewSession {
    pub discord_id: String,
    pub username: String,
}

/// Partial update merged into a stored session. `None` leaves a field as is.
/// Wallets are only ever appended, through [`crate::session_store::SessionStore::link_wallet`].
#[derive(Clone, Debug, Default)]
pub struct SessionUpdate {
    pub discord_id: Option<String>,
    pub username: Option<String>,
    pub is_discord_connected: Option<bool>,
    pub expires_at: Option<i64>,
}

impl SessionUpdate {
    pub fn apply(self, session: &mut Session) {
        if let Some(discord_id) = self.discord_id {
            session.discord_id = discord_id;
        }
        if let Some(username) = self.username {
            session.username = username;
        }
        if let Some(connected) = self.is_discord_connected {
            session.is_discord_connected = connected;
        }
        if let Some(expires_at) = self.expires_at {
            session.expires_at = expires_at;
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub address: String,
    pub points: u64,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardSnapshot {
    pub data: Vec<LeaderboardEntry>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Holdings read from the collection and staking contracts for one address.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StakerInfo {
    pub staked_tokens: Vec<String>,
    pub total_points: u64,
    pub tier: u64,
    pub is_minter: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedCollection {
    pub id: String,
    pub name: String,
    pub contract_address: String,
    pub magic_eden_symbol: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Currency {
    pub name: String,
    pub symbol: String,
    pub decimals: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FloorPrice {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub floor_price: f64,
    #[serde(rename = "floorPriceUSD")]
    pub floor_price_usd: Option<f64>,
    pub currency: Currency,
    pub last_updated: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub available_pool: String,
    pub best_offer: String,
    pub last_updated: DateTime<Utc>,
}

/// Roles granted for a given NFT total.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RoleAssignment {
    pub verified: bool,
    pub elite: bool,
}

impl RoleAssignment {
    pub fn for_total(total_nfts: u64) -> Self {
        Self {
            verified: total_nfts >= VERIFIED_ROLE_THRESHOLD,
            elite: total_nfts >= ELITE_ROLE_THRESHOLD,
        }
    }
}
