/// # stake portal - NFT Staking Companion Service
///
/// ## Business Process Flow
///
/// 1. Discord Identity:
///    - Member authorizes through Discord OAuth, or the bot posts a webhook
///    - Service opens a session (random 32-byte id, one hour lifetime)
///    - Browser is redirected to the connect page with the session id
///
/// 2. Wallet Linking:
///    a. Proof of Ownership:
///       - Client connects an injected wallet and switches to ApeChain
///       - Wallet signs `Verify wallet ownership` naming the address
///       - Service recovers the signer and checks it against the address
///
///    b. Holdings:
///       - Collection balance and staking position are read from chain
///       - Wallet is appended to the session once per address
///
///    c. Roles:
///       - Verified and elite roles are cleared, then granted by NFT total
///       - Role failures are logged and never fail the link
///
/// 3. Leaderboard and Markets:
///    - Staking contract history is scanned for participants once a day
///    - Points are read per participant and served sorted
///    - Floor prices and lending pool depth refresh on their own timers
///
/// 4. Client Side:
///    - `wallet_connector` wraps the injected provider behind a capability trait
///    - `session_context` mirrors the session and polls until a wallet is linked
///    - `polling` is the shared cancellable backoff loop
///
/// Secrets are checked through the `x-api-key` header. The bot key admits
/// the webhook; the frontend key admits session, wallet and market reads.
pub mod error;
pub mod events;
mod guard;
pub mod processor;
pub mod request_structs;
pub mod state;

pub mod abi;
pub mod chain;
pub mod config;
pub mod discord;
pub mod leaderboard;
pub mod market;
pub mod polling;
pub mod rate_limit;
pub mod rewards;
pub mod session_context;
pub mod session_store;
pub mod wallet_connector;


use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use warp::http::Uri;
use warp::{Filter, Rejection, Reply};

use chain::ChainReader;
use config::Config;
use discord::DiscordApi;
use error::PortalError;
use leaderboard::LeaderboardCache;
use market::{FloorPriceCache, PoolStatsCache};
use rate_limit::EndpointRateLimiter;
use request_structs::{AuthQuery, CallbackQuery, LinkWalletRequest, RewardsQuery, WebhookRequest};
use session_store::SessionStore;

pub struct RateLimits {
    pub basic: EndpointRateLimiter,
    pub wallet: EndpointRateLimiter,
    pub health: EndpointRateLimiter,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            basic: EndpointRateLimiter::basic(),
            wallet: EndpointRateLimiter::wallet(),
            health: EndpointRateLimiter::health(),
        }
    }
}

/// Everything a request handler can reach.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<dyn SessionStore>,
    pub discord: Arc<dyn DiscordApi>,
    pub chain: Arc<dyn ChainReader>,
    pub leaderboard: Arc<LeaderboardCache>,
    pub floor_prices: Arc<FloorPriceCache>,
    pub pool_stats: Arc<PoolStatsCache>,
    pub limits: Arc<RateLimits>,
    pub started_at: Instant,
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Passes only requests whose `x-api-key` matches `expected`.
fn api_key(expected: String) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>("x-api-key")
        .and_then(move |provided: Option<String>| {
            let checked = guard::validate_api_key(&expected, provided.as_deref()).map_err(Rejection::from);
            async move { checked }
        })
        .untuple_one()
}

/// Rate-limit key for the caller: the socket peer, or the last
/// `x-forwarded-for` hop when a trusted proxy appends it.
fn client_key(forwarded: Option<&str>, remote: Option<SocketAddr>, trust_proxy: bool) -> String {
    let proxied = forwarded
        .filter(|_| trust_proxy)
        .and_then(|f| f.rsplit(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    match (proxied, remote) {
        (Some(ip), _) => ip.to_string(),
        (None, Some(remote)) => remote.ip().to_string(),
        (None, None) => "unknown".to_string(),
    }
}

fn client_ip(trust_proxy: bool) -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::header::optional::<String>("x-forwarded-for")
        .and(warp::addr::remote())
        .map(move |forwarded: Option<String>, remote: Option<SocketAddr>| {
            client_key(forwarded.as_deref(), remote, trust_proxy)
        })
}

fn throttle(limiter: &EndpointRateLimiter, key: &str) -> Result<(), PortalError> {
    limiter
        .check_and_record(key)
        .map_err(|retry_after| PortalError::RateLimited { retry_after })
}

fn redirect_to(location: String) -> Result<warp::reply::Response, Rejection> {
    let uri: Uri = location.parse().map_err(|e: warp::http::uri::InvalidUri| {
        PortalError::InvalidConfig {
            name: "BASE_URL",
            reason: e.to_string(),
        }
    })?;
    Ok(warp::redirect::found(uri).into_response())
}

async fn health(state: AppState, ip: String) -> Result<impl Reply, Rejection> {
    throttle(&state.limits.health, &ip)?;
    Ok(warp::reply::json(&processor::health(&state)))
}

/// Starts the Discord login; `sessionId` is round-tripped through `state`.
async fn discord_auth(state: AppState, query: AuthQuery) -> Result<impl Reply, Rejection> {
    redirect_to(processor::discord_authorize_url(&state, &query)?)
}

/// Always redirects: to the connect page on success, the error page otherwise.
async fn discord_callback(state: AppState, query: CallbackQuery) -> Result<impl Reply, Rejection> {
    redirect_to(processor::complete_oauth(&state, &query).await)
}

async fn discord_webhook(
    state: AppState,
    ip: String,
    body: WebhookRequest,
) -> Result<impl Reply, Rejection> {
    throttle(&state.limits.basic, &ip)?;
    let session = processor::register_session(&state, &body)?;
    Ok(warp::reply::json(&json!({
        "success": true,
        "sessionId": session.id,
        "session": session,
    })))
}

async fn get_session(session_id: String, state: AppState, ip: String) -> Result<impl Reply, Rejection> {
    throttle(&state.limits.basic, &ip)?;
    let session = processor::get_session(&state, &session_id)?;
    Ok(warp::reply::json(&session))
}

async fn list_wallets(session_id: String, state: AppState, ip: String) -> Result<impl Reply, Rejection> {
    throttle(&state.limits.basic, &ip)?;
    let wallets = processor::list_wallets(&state, &session_id)?;
    Ok(warp::reply::json(&json!({ "wallets": wallets })))
}

async fn link_wallet(
    session_id: String,
    state: AppState,
    ip: String,
    body: LinkWalletRequest,
) -> Result<impl Reply, Rejection> {
    throttle(&state.limits.wallet, &format!("{}-{}", ip, session_id))?;
    let session = processor::link_wallet(&state, &session_id, &body).await?;
    Ok(warp::reply::json(&json!({ "success": true, "session": session })))
}

async fn leaderboard(state: AppState) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&*processor::leaderboard(&state)))
}

async fn floor_price(address: String, state: AppState) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&processor::floor_price(&state, &address)?))
}

async fn floor_prices(state: AppState) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&*processor::floor_prices(&state)))
}

async fn collection(address: String, state: AppState) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&processor::collection(&state, &address)?))
}

async fn pool_stats(address: String, state: AppState) -> Result<impl Reply, Rejection> {
    let stats = processor::pool_stats(&state, &address)?;
    Ok(warp::reply::json(&json!({ "data": stats })))
}

async fn rewards_estimate(query: RewardsQuery) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&processor::estimate_rewards(&query)))
}

/// The full HTTP surface with CORS, request tracing and JSON error bodies.
pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let bot = api_key(state.config.bot_api_key.clone());
    let frontend = api_key(state.config.frontend_api_key.clone());
    let trust_proxy = state.config.trust_proxy;

    let health = warp::path!("health")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(client_ip(trust_proxy))
        .and_then(health);

    let discord_auth = warp::path!("api" / "discord" / "auth")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(warp::query::<AuthQuery>())
        .and_then(discord_auth);

    let discord_callback = warp::path!("api" / "discord" / "callback")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(warp::query::<CallbackQuery>())
        .and_then(discord_callback);

    let discord_webhook = warp::path!("api" / "discord" / "webhook")
        .and(warp::post())
        .and(bot)
        .and(with_state(state.clone()))
        .and(client_ip(trust_proxy))
        .and(warp::body::json())
        .and_then(discord_webhook);

    let session = warp::path!("api" / "session" / String)
        .and(warp::get())
        .and(frontend.clone())
        .and(with_state(state.clone()))
        .and(client_ip(trust_proxy))
        .and_then(get_session);

    let wallets = warp::path!("api" / "discord" / String / "wallets");
    let list_wallets = wallets
        .clone()
        .and(warp::get())
        .and(frontend.clone())
        .and(with_state(state.clone()))
        .and(client_ip(trust_proxy))
        .and_then(list_wallets);
    let link_wallet = wallets
        .and(warp::post())
        .and(frontend.clone())
        .and(with_state(state.clone()))
        .and(client_ip(trust_proxy))
        .and(warp::body::json())
        .and_then(link_wallet);

    let leaderboard = warp::path!("api" / "leaderboard")
        .and(warp::get())
        .and(frontend.clone())
        .and(with_state(state.clone()))
        .and_then(leaderboard);

    let floor_price = warp::path!("api" / "floor-price" / String)
        .and(warp::get())
        .and(frontend.clone())
        .and(with_state(state.clone()))
        .and_then(floor_price);

    let floor_prices = warp::path!("api" / "floor-prices")
        .and(warp::get())
        .and(frontend.clone())
        .and(with_state(state.clone()))
        .and_then(floor_prices);

    let collection = warp::path!("api" / "collection" / String)
        .and(warp::get())
        .and(frontend.clone())
        .and(with_state(state.clone()))
        .and_then(collection);

    let pool_stats = warp::path!("api" / "pool-stats" / String)
        .and(warp::get())
        .and(frontend)
        .and(with_state(state))
        .and_then(pool_stats);

    let rewards_estimate = warp::path!("api" / "rewards" / "estimate")
        .and(warp::get())
        .and(warp::query::<RewardsQuery>())
        .and_then(rewards_estimate);

    let identity = health
        .or(discord_auth)
        .or(discord_callback)
        .or(discord_webhook)
        .boxed();
    let sessions = session.or(list_wallets).or(link_wallet).boxed();
    let market = leaderboard
        .or(floor_price)
        .or(floor_prices)
        .or(collection)
        .or(pool_stats)
        .or(rewards_estimate)
        .boxed();

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["Content-Type", "Authorization", "x-api-key"]);

    identity
        .or(sessions)
        .or(market)
        .with(cors)
        .with(warp::trace::request())
        .recover(error::handle_rejection)
}
