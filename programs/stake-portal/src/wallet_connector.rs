//! Client-side wallet access through an EIP-1193 provider.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Provider error code for a chain the wallet does not know yet.
pub const CHAIN_NOT_ADDED: i64 = 4902;

pub const STORAGE_CONNECTED_KEY: &str = "walletConnected";
pub const STORAGE_ADDRESS_KEY: &str = "walletAddress";

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("provider error {code}: {message}")]
pub struct ProviderError {
    pub code: i64,
    pub message: String,
}

/// An injected EIP-1193 provider (`window.ethereum` in a browser).
#[async_trait]
pub trait InjectedProvider: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError>;
}

/// Key-value persistence for the connection flag (browser local storage).
pub trait ConnectionStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

#[derive(Debug, Default)]
pub struct MemoryStorage(Mutex<HashMap<String, String>>);

impl ConnectionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.0
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).remove(key);
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NativeCurrency {
    pub name: &'static str,
    pub symbol: &'static str,
    pub decimals: u8,
}

/// `wallet_addEthereumChain` parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainDefinition {
    pub chain_id: &'static str,
    pub chain_name: &'static str,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<&'static str>,
    pub block_explorer_urls: Vec<&'static str>,
}

impl ChainDefinition {
    pub fn apechain() -> Self {
        Self {
            chain_id: "0x8173",
            chain_name: "ApeChain",
            native_currency: NativeCurrency {
                name: "APE",
                symbol: "APE",
                decimals: 18,
            },
            rpc_urls: vec!["https://apechain.calderachain.xyz/http"],
            block_explorer_urls: vec!["https://apechain.calderaexplorer.xyz/"],
        }
    }
}

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("No wallet provider found. Please install MetaMask or another browser wallet")]
    ProviderMissing,
    #[error("Wallet is not connected")]
    NotConnected,
    #[error("Wallet returned no accounts")]
    NoAccounts,
    #[error("Please switch to account {0} in your wallet")]
    WrongAccount(String),
    #[error("Unexpected provider response: {0}")]
    UnexpectedResponse(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// What the linking flow needs from a wallet.
#[async_trait]
pub trait WalletCapability: Send + Sync {
    /// Requests account access and returns the selected address.
    async fn connect(&mut self) -> Result<String, WalletError>;
    async fn sign(&self, message: &str) -> Result<String, WalletError>;
    fn address(&self) -> Option<&str>;
    async fn switch_chain(&self, chain: &ChainDefinition) -> Result<(), WalletError>;
    /// Forgets the connection locally; the wallet keeps its permission grant.
    fn disconnect(&mut self);
}

pub struct WalletConnector {
    provider: Option<Arc<dyn InjectedProvider>>,
    storage: Arc<dyn ConnectionStorage>,
    chain: ChainDefinition,
    address: Option<String>,
}

impl WalletConnector {
    pub fn new(provider: Option<Arc<dyn InjectedProvider>>, storage: Arc<dyn ConnectionStorage>) -> Self {
        Self {
            provider,
            storage,
            chain: ChainDefinition::apechain(),
            address: None,
        }
    }

    /// Connector with the address remembered from a previous visit, if any.
    pub fn restore(provider: Option<Arc<dyn InjectedProvider>>, storage: Arc<dyn ConnectionStorage>) -> Self {
        let mut connector = Self::new(provider, storage);
        if connector.storage.get(STORAGE_CONNECTED_KEY).as_deref() == Some("true") {
            connector.address = connector.storage.get(STORAGE_ADDRESS_KEY);
        }
        connector
    }

    pub fn is_connected(&self) -> bool {
        self.address.is_some()
    }

    fn provider(&self) -> Result<&dyn InjectedProvider, WalletError> {
        self.provider.as_deref().ok_or(WalletError::ProviderMissing)
    }

    fn remember(&mut self, address: String) {
        self.storage.set(STORAGE_CONNECTED_KEY, "true");
        self.storage.set(STORAGE_ADDRESS_KEY, &address);
        self.address = Some(address);
    }

    /// Mirrors an `accountsChanged` notification from the provider.
    pub fn on_accounts_changed(&mut self, accounts: &[String]) {
        match accounts.first() {
            Some(address) => self.remember(address.clone()),
            None => self.disconnect(),
        }
    }
}

fn accounts(value: Value) -> Result<Vec<String>, WalletError> {
    serde_json::from_value(value).map_err(|e| WalletError::UnexpectedResponse(e.to_string()))
}

#[async_trait]
impl WalletCapability for WalletConnector {
    async fn connect(&mut self) -> Result<String, WalletError> {
        let provider = self.provider()?;
        let response = provider.request("eth_requestAccounts", json!([])).await?;
        let address = accounts(response)?
            .into_iter()
            .next()
            .ok_or(WalletError::NoAccounts)?;
        self.switch_chain(&self.chain).await?;
        self.remember(address.clone());
        Ok(address)
    }

    async fn sign(&self, message: &str) -> Result<String, WalletError> {
        let provider = self.provider()?;
        let address = self.address.as_deref().ok_or(WalletError::NotConnected)?;

        let available = accounts(provider.request("eth_accounts", json!([])).await?)?;
        if !available.iter().any(|a| a.eq_ignore_ascii_case(address)) {
            return Err(WalletError::WrongAccount(address.to_string()));
        }

        let signature = provider
            .request("personal_sign", json!([message, address]))
            .await?;
        signature
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| WalletError::UnexpectedResponse(signature.to_string()))
    }

    fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    async fn switch_chain(&self, chain: &ChainDefinition) -> Result<(), WalletError> {
        let provider = self.provider()?;
        let current = provider.request("eth_chainId", json!([])).await?;
        if current
            .as_str()
            .is_some_and(|id| id.eq_ignore_ascii_case(chain.chain_id))
        {
            return Ok(());
        }
        match provider
            .request(
                "wallet_switchEthereumChain",
                json!([{ "chainId": chain.chain_id }]),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if err.code == CHAIN_NOT_ADDED => {
                tracing::debug!(chain = chain.chain_name, "adding chain to wallet");
                provider
                    .request("wallet_addEthereumChain", json!([chain]))
                    .await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn disconnect(&mut self) {
        self.address = None;
        self.storage.remove(STORAGE_CONNECTED_KEY);
        self.storage.remove(STORAGE_ADDRESS_KEY);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Scripted provider that records every call.
    pub(crate) struct MockProvider {
        pub accounts: Vec<String>,
        pub chain_id: &'static str,
        pub chain_known: bool,
        pub signature: String,
        pub calls: Mutex<Vec<(String, Value)>>,
    }

    impl MockProvider {
        pub(crate) fn new(account: &str) -> Self {
            Self {
                accounts: vec![account.to_string()],
                chain_id: "0x1",
                chain_known: true,
                signature: "0xsig".into(),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn methods(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
        }
    }

    #[async_trait]
    impl InjectedProvider for MockProvider {
        async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
            self.calls.lock().unwrap().push((method.to_string(), params));
            match method {
                "eth_requestAccounts" | "eth_accounts" => Ok(json!(self.accounts)),
                "eth_chainId" => Ok(json!(self.chain_id)),
                "wallet_switchEthereumChain" if !self.chain_known => Err(ProviderError {
                    code: CHAIN_NOT_ADDED,
                    message: "Unrecognized chain ID".into(),
                }),
                "wallet_switchEthereumChain" | "wallet_addEthereumChain" => Ok(Value::Null),
                "personal_sign" => Ok(json!(self.signature)),
                other => Err(ProviderError {
                    code: -32601,
                    message: format!("unsupported {}", other),
                }),
            }
        }
    }

    const ADDRESS: &str = "0x485242262f1e367144fe432ba858f9ef6f491334";

    #[tokio::test]
    async fn connect_switches_chain_and_persists() {
        let provider = Arc::new(MockProvider::new(ADDRESS));
        let storage = Arc::new(MemoryStorage::default());
        let mut wallet = WalletConnector::new(Some(provider.clone()), storage.clone());

        assert_eq!(wallet.connect().await.unwrap(), ADDRESS);
        assert_eq!(
            provider.methods(),
            ["eth_requestAccounts", "eth_chainId", "wallet_switchEthereumChain"]
        );
        assert_eq!(storage.get(STORAGE_CONNECTED_KEY).as_deref(), Some("true"));

        let restored = WalletConnector::restore(Some(provider), storage);
        assert_eq!(restored.address(), Some(ADDRESS));
    }

    #[tokio::test]
    async fn unknown_chain_is_added() {
        let mut mock = MockProvider::new(ADDRESS);
        mock.chain_known = false;
        let provider = Arc::new(mock);
        let mut wallet = WalletConnector::new(Some(provider.clone()), Arc::new(MemoryStorage::default()));
        wallet.connect().await.unwrap();

        let calls = provider.calls.lock().unwrap();
        let (method, params) = calls.last().unwrap();
        assert_eq!(method, "wallet_addEthereumChain");
        assert_eq!(params[0]["chainId"], "0x8173");
        assert_eq!(params[0]["rpcUrls"][0], "https://apechain.calderachain.xyz/http");
    }

    #[tokio::test]
    async fn already_on_chain_skips_switch() {
        let mut mock = MockProvider::new(ADDRESS);
        mock.chain_id = "0x8173";
        let provider = Arc::new(mock);
        let mut wallet = WalletConnector::new(Some(provider.clone()), Arc::new(MemoryStorage::default()));
        wallet.connect().await.unwrap();
        assert_eq!(provider.methods(), ["eth_requestAccounts", "eth_chainId"]);
    }

    #[tokio::test]
    async fn missing_provider_and_disconnect() {
        let storage = Arc::new(MemoryStorage::default());
        let mut wallet = WalletConnector::new(None, storage.clone());
        assert!(matches!(wallet.connect().await, Err(WalletError::ProviderMissing)));

        wallet.on_accounts_changed(&[ADDRESS.to_string()]);
        assert!(wallet.is_connected());
        wallet.disconnect();
        assert!(!wallet.is_connected());
        assert_eq!(storage.get(STORAGE_ADDRESS_KEY), None);
    }

    #[tokio::test]
    async fn sign_uses_personal_sign_for_connected_account() {
        let provider = Arc::new(MockProvider::new(ADDRESS));
        let mut wallet = WalletConnector::new(Some(provider.clone()), Arc::new(MemoryStorage::default()));
        assert!(matches!(wallet.sign("hi").await, Err(WalletError::NotConnected)));

        wallet.connect().await.unwrap();
        assert_eq!(wallet.sign("hi").await.unwrap(), "0xsig");
        let calls = provider.calls.lock().unwrap();
        let (method, params) = calls.last().unwrap();
        assert_eq!(method, "personal_sign");
        assert_eq!(params, &json!(["hi", ADDRESS]));

        drop(calls);
        wallet.on_accounts_changed(&["0x0000000000000000000000000000000000000001".to_string()]);
        assert!(matches!(wallet.sign("hi").await, Err(WalletError::WrongAccount(_))));
    }
}
