use std::convert::Infallible;

use serde_json::json;
use thiserror::Error;
use warp::http::StatusCode;
use warp::{Rejection, Reply};

use crate::chain::ChainError;

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("Missing configuration value {0}")]
    MissingConfig(&'static str),
    #[error("Invalid configuration value {name}: {reason}")]
    InvalidConfig { name: &'static str, reason: String },

    #[error("Invalid API key")]
    InvalidApiKey,
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid wallet address: {0}")]
    InvalidAddress(String),
    #[error("A signed message is required to link a wallet")]
    MissingSignature,
    #[error("Malformed signature")]
    MalformedSignature,
    #[error("Signed message does not reference the wallet address")]
    MessageMismatch,
    #[error("Signed message has expired")]
    StaleSignature,
    #[error("Signed message must carry a Timestamp line")]
    MissingTimestamp,
    #[error("Signature does not match wallet address")]
    InvalidSignature,
    #[error("Invalid query parameter: {0}")]
    InvalidQuery(String),

    #[error("Session not found")]
    SessionNotFound,
    #[error("Collection not found")]
    CollectionNotFound,
    #[error("Floor price data not found")]
    FloorPriceNotFound,
    #[error("Stats not found for collection")]
    PoolStatsNotFound,

    #[error("Too many requests, please try again later")]
    RateLimited { retry_after: u64 },

    #[error("Discord request failed: {0}")]
    Discord(String),
    #[error("Chain request failed: {0}")]
    Chain(#[from] ChainError),
    #[error("Marketplace request failed: {0}")]
    Marketplace(String),
    #[error("Session storage failure: {0}")]
    Storage(String),
}

impl PortalError {
    pub fn status(&self) -> StatusCode {
        match self {
            PortalError::MissingConfig(_)
            | PortalError::InvalidConfig { .. }
            | PortalError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PortalError::InvalidApiKey => StatusCode::FORBIDDEN,
            PortalError::MissingField(_)
            | PortalError::InvalidAddress(_)
            | PortalError::MissingSignature
            | PortalError::MalformedSignature
            | PortalError::MessageMismatch
            | PortalError::StaleSignature
            | PortalError::MissingTimestamp
            | PortalError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            PortalError::InvalidSignature => StatusCode::UNAUTHORIZED,
            PortalError::SessionNotFound
            | PortalError::CollectionNotFound
            | PortalError::FloorPriceNotFound
            | PortalError::PoolStatsNotFound => StatusCode::NOT_FOUND,
            PortalError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            PortalError::Discord(_) | PortalError::Chain(_) | PortalError::Marketplace(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    /// Upstream and storage details stay in the log; callers get a generic message.
    fn public_message(&self) -> String {
        match self {
            PortalError::Discord(_) => "Discord is unavailable, please try again later".into(),
            PortalError::Chain(_) => "Failed to read on-chain holdings".into(),
            PortalError::Marketplace(_) => "Marketplace is unavailable".into(),
            PortalError::Storage(_)
            | PortalError::MissingConfig(_)
            | PortalError::InvalidConfig { .. } => "Internal server error".into(),
            other => other.to_string(),
        }
    }
}

/// Returns early with `$err` unless `$cond` holds.
#[macro_export]
macro_rules! require {
    ($cond:expr, $err:expr) => {
        if !($cond) {
            return Err($err.into());
        }
    };
}

impl warp::reject::Reject for PortalError {}

fn error_reply(status: StatusCode, message: String) -> warp::reply::Response {
    error_body(status, json!({
        "status": "error",
        "code": status.as_u16(),
        "error": message,
    }))
}

fn error_body(status: StatusCode, body: serde_json::Value) -> warp::reply::Response {
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

pub fn into_response(err: &PortalError) -> warp::reply::Response {
    let status = err.status();
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    } else {
        tracing::debug!(error = %err, "request rejected");
    }
    match err {
        PortalError::RateLimited { retry_after } => {
            let mut response = error_body(
                status,
                json!({
                    "status": "error",
                    "code": status.as_u16(),
                    "error": err.public_message(),
                    "retryAfter": retry_after,
                }),
            );
            response.headers_mut().insert(
                warp::http::header::RETRY_AFTER,
                warp::http::HeaderValue::from(*retry_after),
            );
            response
        }
        _ => error_reply(status, err.public_message()),
    }
}

pub async fn handle_rejection(err: Rejection) -> Result<warp::reply::Response, Infallible> {
    if let Some(portal) = err.find::<PortalError>() {
        return Ok(into_response(portal));
    }
    if err.is_not_found() {
        return Ok(error_reply(StatusCode::NOT_FOUND, "Endpoint not found".into()));
    }
    if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            format!("Invalid request body: {}", e),
        ));
    }
    if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            format!("Invalid query string: {}", e),
        ));
    }
    if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(error_reply(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed".into(),
        ));
    }
    tracing::warn!(?err, "unhandled rejection");
    Ok(error_reply(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".into(),
    ))
}
