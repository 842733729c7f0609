use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;

use stake_portal::chain::{ContractAddresses, RpcChainClient};
use stake_portal::config::Config;
use stake_portal::discord::DiscordHttp;
use stake_portal::leaderboard::{self, LeaderboardCache};
use stake_portal::market::{self, FloorPriceCache, MagicEdenClient, PoolStatsCache, MARKETPLACE_REQUEST_SPACING};
use stake_portal::session_store::MemorySessionStore;
use stake_portal::{routes, AppState, RateLimits};

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(err) => {
            tracing::error!(%err, "invalid configuration");
            std::process::exit(1);
        }
    };

    let http = match reqwest::Client::builder().timeout(UPSTREAM_TIMEOUT).build() {
        Ok(http) => http,
        Err(err) => {
            tracing::error!(%err, "failed to build http client");
            std::process::exit(1);
        }
    };

    let chain = Arc::new(RpcChainClient::new(
        http.clone(),
        config.rpc_url.clone(),
        ContractAddresses {
            nft: config.nft_contract.clone(),
            staking: config.staking_contract.clone(),
            lending: config.lending_contract.clone(),
        },
    ));
    let discord = Arc::new(DiscordHttp::new(http.clone(), config.discord.clone()));
    let marketplace = Arc::new(MagicEdenClient::new(http, config.magic_eden_api_key.clone()));

    let leaderboard = Arc::new(LeaderboardCache::new(
        config.staking_contract.clone(),
        config.leaderboard_start_block,
    ));
    let floor_prices = Arc::new(FloorPriceCache::new(
        config.tracked_collections.clone(),
        MARKETPLACE_REQUEST_SPACING,
    ));
    let pool_stats = Arc::new(PoolStatsCache::new(
        config.lending_contract.clone().unwrap_or_default(),
    ));

    leaderboard::spawn_refresh(leaderboard.clone(), chain.clone(), config.leaderboard_refresh);
    if !config.tracked_collections.is_empty() {
        market::spawn_floor_refresh(floor_prices.clone(), marketplace, config.floor_price_refresh);
    }
    if config.lending_contract.is_some() {
        market::spawn_pool_stats_refresh(pool_stats.clone(), chain.clone(), config.pool_stats_refresh);
    } else {
        tracing::info!("LENDING_CONTRACT_ADDRESS not set, pool stats disabled");
    }

    let state = AppState {
        config: config.clone(),
        sessions: Arc::new(MemorySessionStore::new(config.session_ttl)),
        discord,
        chain,
        leaderboard,
        floor_prices,
        pool_stats,
        limits: Arc::new(RateLimits::default()),
        started_at: Instant::now(),
    };

    tracing::info!(port = config.port, "API server listening");
    warp::serve(routes(state)).run(([0, 0, 0, 0], config.port)).await;
}
