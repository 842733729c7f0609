use percent_encoding::percent_decode_str;
use serde::Deserialize;

use crate::error::PortalError;
use crate::guard::validate_address;
use crate::require;

/// Body of `POST /api/discord/webhook`, sent by the Discord bot after a
/// member runs the link command.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRequest {
    /// Existing session to attach the identity to; a new one is created otherwise.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub discord_id: String,
}

impl WebhookRequest {
    /// Rejects missing fields and returns the percent-decoded username.
    pub fn validate(&self) -> Result<String, PortalError> {
        require!(!self.discord_id.trim().is_empty(), PortalError::MissingField("discordId"));
        require!(!self.username.trim().is_empty(), PortalError::MissingField("username"));
        let username = percent_decode_str(&self.username)
            .decode_utf8()
            .map_err(|_| PortalError::InvalidQuery("username is not valid UTF-8".into()))?;
        Ok(username.into_owned())
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref().filter(|s| !s.is_empty())
    }
}

/// Body of `POST /api/discord/:sessionId/wallets`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkWalletRequest {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Unix millis at which the client built the signed message.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// A link request whose address is well-formed and which carries a signature.
#[derive(Debug)]
pub struct SignedLink<'a> {
    pub address: &'a str,
    pub signature: &'a str,
    pub message: &'a str,
    pub timestamp: Option<i64>,
}

impl LinkWalletRequest {
    pub fn validate(&self) -> Result<SignedLink<'_>, PortalError> {
        let address = self.address.trim();
        require!(!address.is_empty(), PortalError::MissingField("address"));
        validate_address(address)?;

        let signature = self
            .signature
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(PortalError::MissingSignature)?;
        let message = self
            .message
            .as_deref()
            .filter(|m| !m.is_empty())
            .ok_or(PortalError::MissingSignature)?;

        Ok(SignedLink {
            address,
            signature,
            message,
            timestamp: self.timestamp,
        })
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthQuery {
    pub session_id: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

impl CallbackQuery {
    pub fn validate(&self) -> Result<(&str, &str), PortalError> {
        let code = self
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(PortalError::MissingField("code"))?;
        let state = self
            .state
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(PortalError::MissingField("state"))?;
        Ok((code, state))
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RewardsQuery {
    #[serde(default)]
    pub nfts: u64,
    #[serde(default)]
    pub days: u64,
    #[serde(default)]
    pub minter: bool,
}
