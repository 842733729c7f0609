use std::sync::Arc;

use chrono::Utc;
use reqwest::Url;
use serde::Serialize;
use serde_json::{json, Value};

use crate::abi;
use crate::discord;
use crate::emit;
use crate::error::PortalError;
use crate::events::{DiscordLinked, RolesSynced, SessionCreated, WalletLinked};
use crate::guard::verify_wallet_signature;
use crate::market::{CollectionDetails, FloorPriceSnapshot};
use crate::request_structs::{AuthQuery, CallbackQuery, LinkWalletRequest, RewardsQuery, WebhookRequest};
use crate::rewards::calculate_staking_rewards;
use crate::session_store::generate_session_id;
use crate::state::{LeaderboardSnapshot, NewSession, PoolStats, Session, SessionUpdate, Wallet};
use crate::AppState;

pub const AUTH_FAILED_MESSAGE: &str = "Authentication failed";

pub fn health(ctx: &AppState) -> Value {
    json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "uptime": ctx.started_at.elapsed().as_secs(),
        "sessions": { "total": ctx.sessions.len() },
    })
}

/// Bot webhook: attaches a Discord identity to the named session, or opens a
/// new session when none is named or the named one has expired.
pub fn register_session(ctx: &AppState, req: &WebhookRequest) -> Result<Session, PortalError> {
    let username = req.validate()?;
    let discord_id = req.discord_id.trim().to_string();

    if let Some(id) = req.session_id() {
        if ctx.sessions.get(id)?.is_some() {
            let session = ctx.sessions.update(
                id,
                SessionUpdate {
                    discord_id: Some(discord_id.clone()),
                    username: Some(username.clone()),
                    is_discord_connected: Some(true),
                    ..Default::default()
                },
            )?;
            emit!(DiscordLinked {
                session_id: session.id.clone(),
                discord_id,
                username,
            });
            return Ok(session);
        }
        tracing::debug!(session_id = %id, "webhook named an unknown session, creating a new one");
    }

    let id = ctx.sessions.create(NewSession {
        discord_id: discord_id.clone(),
        username,
    })?;
    emit!(SessionCreated {
        session_id: id.clone(),
        discord_id,
        source: "webhook",
    });
    ctx.sessions.get(&id)?.ok_or(PortalError::SessionNotFound)
}

pub fn get_session(ctx: &AppState, session_id: &str) -> Result<Session, PortalError> {
    ctx.sessions.get(session_id)?.ok_or(PortalError::SessionNotFound)
}

pub fn list_wallets(ctx: &AppState, session_id: &str) -> Result<Vec<Wallet>, PortalError> {
    Ok(get_session(ctx, session_id)?.wallets)
}

/// Verifies ownership of `req.address`, reads its holdings and appends it to
/// the session, then re-syncs the member's Discord roles.
///
/// Nothing is written unless the address, signature, session and chain reads
/// all check out. Role sync failures are logged and do not fail the request.
pub async fn link_wallet(
    ctx: &AppState,
    session_id: &str,
    req: &LinkWalletRequest,
) -> Result<Session, PortalError> {
    let signed = req.validate()?;
    verify_wallet_signature(
        signed.address,
        signed.message,
        signed.signature,
        signed.timestamp,
        Utc::now().timestamp_millis(),
    )?;

    let session = get_session(ctx, session_id)?;
    if session.has_wallet(signed.address) {
        tracing::debug!(%session_id, address = %signed.address, "wallet already linked");
        return Ok(session);
    }

    let address = abi::to_checksum_address(&abi::address_bytes(signed.address)?);
    let (balance, staker) = tokio::try_join!(
        ctx.chain.nft_balance(&address),
        ctx.chain.staker_info(&address)
    )?;
    let staked = staker.staked_tokens.len();
    let total_nfts = balance.saturating_add(staked as u64);

    let (session, added) = ctx.sessions.link_wallet(
        session_id,
        Wallet {
            address: address.clone(),
            nft_balance: Some(balance),
            staked_nfts: Some(staker.staked_tokens),
            total_nfts: Some(total_nfts),
            tier: Some(staker.tier),
            total_points: Some(staker.total_points),
            is_minter: Some(staker.is_minter),
            linked_at: Some(Utc::now().timestamp_millis()),
        },
    )?;
    if !added {
        tracing::debug!(%session_id, %address, "wallet linked concurrently");
        return Ok(session);
    }
    emit!(WalletLinked {
        session_id: session.id.clone(),
        address,
        total_nfts,
        staked,
    });

    sync_roles(ctx, &session).await;
    Ok(session)
}

async fn sync_roles(ctx: &AppState, session: &Session) {
    let total_nfts = session.total_nfts();
    match ctx.discord.sync_member_roles(&session.discord_id, total_nfts).await {
        Ok(roles) => emit!(RolesSynced {
            discord_id: session.discord_id.clone(),
            total_nfts,
            verified: roles.verified,
            elite: roles.elite,
        }),
        Err(err) => tracing::warn!(
            discord_id = %session.discord_id,
            total_nfts,
            %err,
            "role sync failed"
        ),
    }
}

/// Discord authorize URL; `state` carries the caller's session id when given.
pub fn discord_authorize_url(ctx: &AppState, query: &AuthQuery) -> Result<String, PortalError> {
    let state = match query.session_id.as_deref().filter(|s| !s.is_empty()) {
        Some(id) => id.to_string(),
        None => generate_session_id(),
    };
    discord::authorize_url(&ctx.config.discord, &state)
}

/// Finishes the OAuth round trip and returns where to send the browser:
/// the connect page on success, the error page on any failure.
pub async fn complete_oauth(ctx: &AppState, query: &CallbackQuery) -> String {
    let outcome = link_oauth_identity(ctx, query)
        .await
        .and_then(|session| connect_url(ctx, &session));
    outcome.unwrap_or_else(|err| {
        tracing::warn!(%err, "discord oauth failed");
        error_url(ctx)
    })
}

async fn link_oauth_identity(ctx: &AppState, query: &CallbackQuery) -> Result<Session, PortalError> {
    let (code, state) = query.validate()?;
    let token = ctx.discord.exchange_code(code).await?;
    let identity = ctx.discord.fetch_identity(&token).await?;

    if ctx.sessions.get(state)?.is_some() {
        let session = ctx.sessions.update(
            state,
            SessionUpdate {
                discord_id: Some(identity.id.clone()),
                username: Some(identity.username.clone()),
                is_discord_connected: Some(true),
                ..Default::default()
            },
        )?;
        emit!(DiscordLinked {
            session_id: session.id.clone(),
            discord_id: identity.id,
            username: identity.username,
        });
        return Ok(session);
    }

    let id = ctx.sessions.create(NewSession {
        discord_id: identity.id.clone(),
        username: identity.username,
    })?;
    emit!(SessionCreated {
        session_id: id.clone(),
        discord_id: identity.id,
        source: "oauth",
    });
    get_session(ctx, &id)
}

fn connect_url(ctx: &AppState, session: &Session) -> Result<String, PortalError> {
    Url::parse_with_params(
        &ctx.config.connect_page(),
        &[
            ("sessionId", session.id.as_str()),
            ("username", session.username.as_str()),
            ("discordId", session.discord_id.as_str()),
        ],
    )
    .map(String::from)
    .map_err(|e| PortalError::InvalidConfig {
        name: "BASE_URL",
        reason: e.to_string(),
    })
}

fn error_url(ctx: &AppState) -> String {
    let page = ctx.config.error_page();
    Url::parse_with_params(&page, &[("message", AUTH_FAILED_MESSAGE)])
        .map(String::from)
        .unwrap_or(page)
}

pub fn leaderboard(ctx: &AppState) -> Arc<LeaderboardSnapshot> {
    ctx.leaderboard.snapshot()
}

/// Floor price for one collection, keyed by the lowercase address it was asked for.
pub fn floor_price(ctx: &AppState, address: &str) -> Result<Value, PortalError> {
    let price = ctx.floor_prices.floor_price(address)?;
    let mut data = serde_json::Map::new();
    data.insert(
        address.to_lowercase(),
        json!({
            "floorPrice": price.floor_price,
            "floorPriceUSD": price.floor_price_usd,
            "currency": price.currency,
            "lastUpdated": price.last_updated,
        }),
    );
    Ok(json!({ "data": data }))
}

pub fn floor_prices(ctx: &AppState) -> Arc<FloorPriceSnapshot> {
    ctx.floor_prices.snapshot()
}

pub fn collection(ctx: &AppState, address: &str) -> Result<CollectionDetails, PortalError> {
    ctx.floor_prices.collection(address)
}

pub fn pool_stats(ctx: &AppState, collection: &str) -> Result<PoolStats, PortalError> {
    ctx.pool_stats.get(collection)
}

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardsEstimate {
    pub nfts: u64,
    pub days: u64,
    pub is_minter: bool,
    pub points: u64,
}

pub fn estimate_rewards(query: &RewardsQuery) -> RewardsEstimate {
    RewardsEstimate {
        nfts: query.nfts,
        days: query.days,
        is_minter: query.minter,
        points: calculate_staking_rewards(query.nfts, query.days, query.minter),
    }
}
