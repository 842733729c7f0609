use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use rand::RngCore;

use crate::error::PortalError;
use crate::state::{NewSession, Session, SessionUpdate, Wallet, SESSION_ID_BYTES, SESSION_TTL_SECS};

/// Storage for linked sessions. Expired records are never returned.
pub trait SessionStore: Send + Sync {
    /// Stores a new session and returns its generated id.
    fn create(&self, session: NewSession) -> Result<String, PortalError>;
    fn get(&self, id: &str) -> Result<Option<Session>, PortalError>;
    /// Merges `update` into the stored session and returns the result.
    fn update(&self, id: &str, update: SessionUpdate) -> Result<Session, PortalError>;
    /// Appends `wallet` unless its address is already linked. The flag tells
    /// whether the wallet list changed.
    fn link_wallet(&self, id: &str, wallet: Wallet) -> Result<(Session, bool), PortalError>;
    fn delete(&self, id: &str) -> Result<bool, PortalError>;
    /// Removes every expired record, returning how many were dropped.
    fn cleanup(&self) -> Result<usize, PortalError>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct StoredRecord {
    expires_at: i64,
    blob: Vec<u8>,
}

/// Process-local store. Records are kept as bincode blobs with their expiry
/// alongside, the same shape a TTL key-value backend would hold.
pub struct MemorySessionStore {
    ttl: Duration,
    records: RwLock<HashMap<String, StoredRecord>>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(SESSION_TTL_SECS))
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn encode(session: &Session) -> Result<StoredRecord, PortalError> {
    let blob = bincode::serialize(session).map_err(|e| PortalError::Storage(e.to_string()))?;
    Ok(StoredRecord {
        expires_at: session.expires_at,
        blob,
    })
}

fn decode(record: &StoredRecord) -> Result<Session, PortalError> {
    bincode::deserialize(&record.blob).map_err(|e| PortalError::Storage(e.to_string()))
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            records: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, StoredRecord>> {
        self.records.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, StoredRecord>> {
        self.records.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Decodes, changes and re-encodes a live record under one write lock.
    fn modify<R>(&self, id: &str, change: impl FnOnce(&mut Session) -> R) -> Result<(Session, R), PortalError> {
        let mut records = self.write();
        let record = records
            .get_mut(id)
            .filter(|r| r.expires_at >= now_ms())
            .ok_or(PortalError::SessionNotFound)?;
        let mut session = decode(record)?;
        let out = change(&mut session);
        *record = encode(&session)?;
        Ok((session, out))
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self, session: NewSession) -> Result<String, PortalError> {
        let now = now_ms();
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        let id = generate_session_id();
        let record = encode(&Session {
            id: id.clone(),
            discord_id: session.discord_id,
            username: session.username,
            is_discord_connected: true,
            wallets: Vec::new(),
            created_at: now,
            expires_at: now.saturating_add(ttl_ms),
        })?;
        self.write().insert(id.clone(), record);

        let removed = self.cleanup()?;
        if removed > 0 {
            tracing::debug!(removed, "expired sessions swept");
        }
        Ok(id)
    }

    fn get(&self, id: &str) -> Result<Option<Session>, PortalError> {
        let records = self.read();
        match records.get(id) {
            Some(record) if record.expires_at >= now_ms() => decode(record).map(Some),
            _ => Ok(None),
        }
    }

    fn update(&self, id: &str, update: SessionUpdate) -> Result<Session, PortalError> {
        self.modify(id, |session| update.apply(session))
            .map(|(session, ())| session)
    }

    fn link_wallet(&self, id: &str, wallet: Wallet) -> Result<(Session, bool), PortalError> {
        self.modify(id, |session| session.link_wallet(wallet))
    }

    fn delete(&self, id: &str) -> Result<bool, PortalError> {
        Ok(self.write().remove(id).is_some())
    }

    fn cleanup(&self) -> Result<usize, PortalError> {
        let now = now_ms();
        let mut records = self.write();
        let before = records.len();
        records.retain(|_, r| r.expires_at >= now);
        Ok(before - records.len())
    }

    fn len(&self) -> usize {
        self.read().len()
    }
}
