use serde::Serialize;

/// A domain event written to the structured log.
pub trait Event: Serialize {
    const NAME: &'static str;
}

pub fn emit<E: Event>(event: &E) {
    match serde_json::to_string(event) {
        Ok(payload) => tracing::info!(target: "events", event = E::NAME, %payload),
        Err(err) => tracing::warn!(target: "events", event = E::NAME, %err, "unserializable event"),
    }
}

#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::events::emit(&$event)
    };
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreated {
    pub session_id: String,
    pub discord_id: String,
    pub source: &'static str,
}

impl Event for SessionCreated {
    const NAME: &'static str = "session_created";
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordLinked {
    pub session_id: String,
    pub discord_id: String,
    pub username: String,
}

impl Event for DiscordLinked {
    const NAME: &'static str = "discord_linked";
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletLinked {
    pub session_id: String,
    pub address: String,
    pub total_nfts: u64,
    pub staked: usize,
}

impl Event for WalletLinked {
    const NAME: &'static str = "wallet_linked";
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolesSynced {
    pub discord_id: String,
    pub total_nfts: u64,
    pub verified: bool,
    pub elite: bool,
}

impl Event for RolesSynced {
    const NAME: &'static str = "roles_synced";
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardRefreshed {
    pub candidates: usize,
    pub entries: usize,
    pub to_block: u64,
}

impl Event for LeaderboardRefreshed {
    const NAME: &'static str = "leaderboard_refreshed";
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FloorPricesRefreshed {
    pub collections: usize,
    pub updated: usize,
}

impl Event for FloorPricesRefreshed {
    const NAME: &'static str = "floor_prices_refreshed";
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatsRefreshed {
    pub collections: usize,
    pub active: usize,
}

impl Event for PoolStatsRefreshed {
    const NAME: &'static str = "pool_stats_refreshed";
}
