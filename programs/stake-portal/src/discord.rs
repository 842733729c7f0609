use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

use crate::config::DiscordConfig;
use crate::error::PortalError;
use crate::state::RoleAssignment;

pub const DISCORD_API_BASE: &str = "https://discord.com/api";
pub const AUTHORIZE_URL: &str = "https://discord.com/api/oauth2/authorize";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct DiscordIdentity {
    pub id: String,
    pub username: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// The Discord calls made during login and role sync.
#[async_trait]
pub trait DiscordApi: Send + Sync {
    /// Trades an OAuth authorization code for a user access token.
    async fn exchange_code(&self, code: &str) -> Result<String, PortalError>;
    async fn fetch_identity(&self, access_token: &str) -> Result<DiscordIdentity, PortalError>;
    /// Clears the verified and elite roles, then grants what `total_nfts` earns.
    async fn sync_member_roles(
        &self,
        discord_id: &str,
        total_nfts: u64,
    ) -> Result<RoleAssignment, PortalError>;
}

pub fn authorize_url(config: &DiscordConfig, state: &str) -> Result<String, PortalError> {
    let url = Url::parse_with_params(
        AUTHORIZE_URL,
        &[
            ("client_id", config.client_id.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", "identify"),
            ("state", state),
        ],
    )
    .map_err(|e| PortalError::Discord(e.to_string()))?;
    Ok(url.into())
}

pub struct DiscordHttp {
    http: reqwest::Client,
    config: DiscordConfig,
    api_base: String,
}

impl DiscordHttp {
    pub fn new(http: reqwest::Client, config: DiscordConfig) -> Self {
        Self {
            http,
            config,
            api_base: DISCORD_API_BASE.to_string(),
        }
    }

    fn role_url(&self, discord_id: &str, role_id: &str) -> String {
        format!(
            "{}/guilds/{}/members/{}/roles/{}",
            self.api_base, self.config.guild_id, discord_id, role_id
        )
    }

    async fn set_role(&self, discord_id: &str, role_id: &str, grant: bool) -> Result<(), PortalError> {
        let url = self.role_url(discord_id, role_id);
        let request = if grant {
            self.http.put(url)
        } else {
            self.http.delete(url)
        };
        request
            .header("Authorization", format!("Bot {}", self.config.bot_token))
            .header("Content-Length", "0")
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PortalError::Discord(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl DiscordApi for DiscordHttp {
    async fn exchange_code(&self, code: &str) -> Result<String, PortalError> {
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        let token: TokenResponse = self
            .http
            .post(format!("{}/oauth2/token", self.api_base))
            .form(&form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PortalError::Discord(format!("token exchange: {}", e)))?
            .json()
            .await
            .map_err(|e| PortalError::Discord(format!("token exchange: {}", e)))?;
        Ok(token.access_token)
    }

    async fn fetch_identity(&self, access_token: &str) -> Result<DiscordIdentity, PortalError> {
        self.http
            .get(format!("{}/users/@me", self.api_base))
            .bearer_auth(access_token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PortalError::Discord(format!("identity fetch: {}", e)))?
            .json()
            .await
            .map_err(|e| PortalError::Discord(format!("identity fetch: {}", e)))
    }

    async fn sync_member_roles(
        &self,
        discord_id: &str,
        total_nfts: u64,
    ) -> Result<RoleAssignment, PortalError> {
        let roles = [
            self.config.verified_role_id.as_str(),
            self.config.elite_role_id.as_str(),
        ];
        for role in roles {
            if let Err(err) = self.set_role(discord_id, role, false).await {
                tracing::warn!(%discord_id, role, %err, "failed to remove role");
            }
        }

        let assignment = RoleAssignment::for_total(total_nfts);
        if assignment.verified {
            self.set_role(discord_id, &self.config.verified_role_id, true).await?;
        }
        if assignment.elite {
            self.set_role(discord_id, &self.config.elite_role_id, true).await?;
        }
        Ok(assignment)
    }
}
