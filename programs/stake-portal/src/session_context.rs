//! Client-side mirror of a portal session: reads the connect-page
//! parameters, polls the session until a wallet shows up and drives the
//! sign-and-link round trip.

use chrono::Utc;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::polling::{poll_with_backoff, AttemptError, CancelToken, PollError, PollOutcome, PollPolicy};
use crate::state::Session;
use crate::wallet_connector::{WalletCapability, WalletError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid connect url: {0}")]
    InvalidUrl(String),
    #[error("connect url carries no sessionId")]
    MissingSessionId,
    #[error("server returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Wallet(#[from] WalletError),
}

impl ClientError {
    /// Rate limits, server faults and network errors are worth another try.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Http { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            ClientError::Transport(_) => true,
            _ => false,
        }
    }
}

/// Query parameters the OAuth callback puts on the connect page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectParams {
    pub session_id: String,
    pub username: Option<String>,
    pub discord_id: Option<String>,
}

impl ConnectParams {
    pub fn from_url(url: &str) -> Result<Self, ClientError> {
        let url = Url::parse(url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        let mut params = ConnectParams {
            session_id: String::new(),
            username: None,
            discord_id: None,
        };
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "sessionId" => params.session_id = value.into_owned(),
                "username" => params.username = Some(value.into_owned()),
                "discordId" => params.discord_id = Some(value.into_owned()),
                _ => {}
            }
        }
        if params.session_id.is_empty() {
            return Err(ClientError::MissingSessionId);
        }
        Ok(params)
    }
}

/// The message a wallet signs to prove ownership.
pub fn verification_message(address: &str, timestamp_ms: i64) -> String {
    format!(
        "Verify wallet ownership\nWallet: {}\nTimestamp: {}",
        address, timestamp_ms
    )
}

#[derive(Deserialize)]
struct LinkResponse {
    session: Session,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

pub struct SessionContext {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    params: ConnectParams,
    session: Option<Session>,
}

impl SessionContext {
    pub fn new(
        http: reqwest::Client,
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        params: ConnectParams,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            params,
            session: None,
        }
    }

    pub fn params(&self) -> &ConnectParams {
        &self.params
    }

    /// Last session seen from the server.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T, ClientError> {
        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error)
                .unwrap_or_else(|| status.to_string());
            return Err(ClientError::Http {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }

    async fn fetch_once(&self) -> Result<Session, ClientError> {
        let response = self
            .http
            .get(format!("{}/api/session/{}", self.api_base, self.params.session_id))
            .header("x-api-key", &self.api_key)
            .send()
            .await?;
        Self::read_json(response).await
    }

    pub async fn refresh(&mut self) -> Result<&Session, ClientError> {
        let session = self.fetch_once().await?;
        Ok(self.session.insert(session))
    }

    /// Polls the session until at least one wallet is linked.
    pub async fn wait_until_linked(
        &mut self,
        policy: PollPolicy,
        cancel: CancelToken,
    ) -> Result<&Session, PollError<ClientError>> {
        let this = &*self;
        let session = poll_with_backoff(policy, cancel, |attempt| async move {
            match this.fetch_once().await {
                Ok(session) if !session.wallets.is_empty() => Ok(PollOutcome::Ready(session)),
                Ok(_) => Ok(PollOutcome::Pending),
                Err(err) if err.is_transient() => {
                    tracing::debug!(attempt, %err, "session poll failed, retrying");
                    Err(AttemptError::Transient(err))
                }
                Err(err) => Err(AttemptError::Fatal(err)),
            }
        })
        .await?;
        Ok(self.session.insert(session))
    }

    /// Connects `wallet`, signs the verification message and links the
    /// address to this session.
    pub async fn link_wallet(&mut self, wallet: &mut dyn WalletCapability) -> Result<&Session, ClientError> {
        let address = match wallet.address() {
            Some(address) => address.to_string(),
            None => wallet.connect().await?,
        };
        let timestamp = Utc::now().timestamp_millis();
        let message = verification_message(&address, timestamp);
        let signature = wallet.sign(&message).await?;

        let response = self
            .http
            .post(format!(
                "{}/api/discord/{}/wallets",
                self.api_base, self.params.session_id
            ))
            .header("x-api-key", &self.api_key)
            .json(&json!({
                "address": address,
                "signature": signature,
                "message": message,
                "timestamp": timestamp,
            }))
            .send()
            .await?;
        let linked: LinkResponse = Self::read_json(response).await?;
        Ok(self.session.insert(linked.session))
    }
}
