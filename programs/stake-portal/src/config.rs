use std::time::Duration;

use crate::error::PortalError;
use crate::state::{
    TrackedCollection, DEFAULT_LEADERBOARD_START_BLOCK, FLOOR_PRICE_REFRESH_SECS,
    LEADERBOARD_REFRESH_SECS, POOL_STATS_REFRESH_SECS, SESSION_TTL_SECS,
};

#[derive(Clone, Debug)]
pub struct DiscordConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub bot_token: String,
    pub guild_id: String,
    pub verified_role_id: String,
    pub elite_role_id: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// Public URL of the frontend that hosts the connect and error pages.
    pub base_url: String,
    pub discord: DiscordConfig,
    pub rpc_url: String,
    pub nft_contract: String,
    pub staking_contract: String,
    pub lending_contract: Option<String>,
    pub leaderboard_start_block: u64,
    pub bot_api_key: String,
    pub frontend_api_key: String,
    pub magic_eden_api_key: Option<String>,
    pub tracked_collections: Vec<TrackedCollection>,
    pub session_ttl: Duration,
    pub leaderboard_refresh: Duration,
    pub floor_price_refresh: Duration,
    pub pool_stats_refresh: Duration,
    /// Take the client address from the last `x-forwarded-for` hop, which
    /// only a reverse proxy in front of the service can vouch for.
    pub trust_proxy: bool,
}

fn required(name: &'static str) -> Result<String, PortalError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(PortalError::MissingConfig(name)),
    }
}

fn optional(name: &'static str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, PortalError>
where
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => raw.parse().map_err(|e: T::Err| PortalError::InvalidConfig {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn address(name: &'static str, value: String) -> Result<String, PortalError> {
    if !crate::abi::is_hex_address(&value) {
        return Err(PortalError::InvalidConfig {
            name,
            reason: format!("{} is not a 20-byte hex address", value),
        });
    }
    Ok(value)
}

impl Config {
    /// Reads the service configuration from the process environment.
    /// Missing required values are reported by name.
    pub fn from_env() -> Result<Self, PortalError> {
        let base_url = required("BASE_URL")?.trim_end_matches('/').to_string();
        let redirect_uri = optional("DISCORD_REDIRECT_URI")
            .unwrap_or_else(|| format!("{}/api/discord/callback", base_url));

        let tracked_collections = match optional("TRACKED_COLLECTIONS") {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| PortalError::InvalidConfig {
                name: "TRACKED_COLLECTIONS",
                reason: e.to_string(),
            })?,
            None => Vec::new(),
        };

        Ok(Self {
            port: parsed("PORT", 3001)?,
            base_url,
            discord: DiscordConfig {
                client_id: required("DISCORD_CLIENT_ID")?,
                client_secret: required("DISCORD_CLIENT_SECRET")?,
                redirect_uri,
                bot_token: required("DISCORD_TOKEN")?,
                guild_id: required("GUILD_ID")?,
                verified_role_id: required("VERIFIED_ROLE_ID")?,
                elite_role_id: required("ELITE_ROLE_ID")?,
            },
            rpc_url: required("PROVIDER_URL")?,
            nft_contract: address("NFT_CONTRACT_ADDRESS", required("NFT_CONTRACT_ADDRESS")?)?,
            staking_contract: address(
                "STAKING_CONTRACT_ADDRESS",
                required("STAKING_CONTRACT_ADDRESS")?,
            )?,
            lending_contract: optional("LENDING_CONTRACT_ADDRESS")
                .map(|v| address("LENDING_CONTRACT_ADDRESS", v))
                .transpose()?,
            leaderboard_start_block: parsed(
                "LEADERBOARD_START_BLOCK",
                DEFAULT_LEADERBOARD_START_BLOCK,
            )?,
            bot_api_key: required("BOT_API_KEY")?,
            frontend_api_key: required("FRONTEND_API_KEY")?,
            magic_eden_api_key: optional("MAGICEDEN_API_KEY"),
            tracked_collections,
            session_ttl: Duration::from_secs(parsed("SESSION_TTL_SECS", SESSION_TTL_SECS)?),
            leaderboard_refresh: Duration::from_secs(LEADERBOARD_REFRESH_SECS),
            floor_price_refresh: Duration::from_secs(FLOOR_PRICE_REFRESH_SECS),
            pool_stats_refresh: Duration::from_secs(POOL_STATS_REFRESH_SECS),
            trust_proxy: parsed("TRUST_PROXY", false)?,
        })
    }

    pub fn connect_page(&self) -> String {
        format!("{}/discord/connect", self.base_url)
    }

    pub fn error_page(&self) -> String {
        format!("{}/error", self.base_url)
    }
}
