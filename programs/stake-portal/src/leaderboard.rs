use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::abi;
use crate::chain::{ChainError, ChainReader};
use crate::emit;
use crate::events::LeaderboardRefreshed;
use crate::state::{LeaderboardEntry, LeaderboardSnapshot};

/// Outcome of a refresh request.
#[derive(Debug, PartialEq, Eq)]
pub enum Refresh {
    Updated { entries: usize },
    /// Another refresh was already running; the snapshot is unchanged.
    Skipped,
}

/// Last computed leaderboard plus the single-flight refresh that replaces it.
pub struct LeaderboardCache {
    staking_contract: String,
    start_block: u64,
    snapshot: RwLock<Arc<LeaderboardSnapshot>>,
    refreshing: AtomicBool,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl LeaderboardCache {
    pub fn new(staking_contract: impl Into<String>, start_block: u64) -> Self {
        Self {
            staking_contract: staking_contract.into(),
            start_block,
            snapshot: RwLock::new(Arc::new(LeaderboardSnapshot::default())),
            refreshing: AtomicBool::new(false),
        }
    }

    /// The last completed snapshot; never waits on a running refresh.
    pub fn snapshot(&self) -> Arc<LeaderboardSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub async fn refresh(&self, chain: &dyn ChainReader) -> Result<Refresh, ChainError> {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(Refresh::Skipped);
        }
        let _guard = InFlight(&self.refreshing);

        let to_block = chain.block_number().await?;
        let logs = chain
            .logs(&self.staking_contract, self.start_block, to_block, Vec::new())
            .await?;

        let candidates = collect_candidates(logs.iter().filter_map(|log| log.topics.get(1)));
        let entries = rank(chain, &candidates).await;

        emit!(LeaderboardRefreshed {
            candidates: candidates.len(),
            entries: entries.len(),
            to_block,
        });

        let count = entries.len();
        *self.snapshot.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(LeaderboardSnapshot {
            data: entries,
            last_updated: Some(Utc::now()),
        });
        Ok(Refresh::Updated { entries: count })
    }
}

/// Distinct non-zero addresses taken from indexed address topics.
fn collect_candidates<'a>(topics: impl Iterator<Item = &'a String>) -> BTreeSet<String> {
    topics
        .filter_map(|topic| match abi::topic_address(topic) {
            Ok(address) => Some(address),
            Err(err) => {
                tracing::debug!(%topic, %err, "skipping undecodable topic");
                None
            }
        })
        .filter(|address| !address.eq_ignore_ascii_case(abi::ZERO_ADDRESS))
        .collect()
}

/// Reads points for each address, drops zero or failed reads and sorts by
/// points descending (address ascending on ties).
async fn rank(chain: &dyn ChainReader, candidates: &BTreeSet<String>) -> Vec<LeaderboardEntry> {
    let mut entries = Vec::with_capacity(candidates.len());
    for address in candidates {
        match chain.points(address).await {
            Ok(0) => {}
            Ok(points) => entries.push(LeaderboardEntry {
                address: address.clone(),
                points,
            }),
            Err(err) => tracing::warn!(%address, %err, "points lookup failed"),
        }
    }
    entries.sort_by(|a, b| b.points.cmp(&a.points).then_with(|| a.address.cmp(&b.address)));
    entries
}

pub fn spawn_refresh(
    cache: Arc<LeaderboardCache>,
    chain: Arc<dyn ChainReader>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match cache.refresh(chain.as_ref()).await {
                Ok(Refresh::Updated { entries }) => tracing::info!(entries, "leaderboard cache updated"),
                Ok(Refresh::Skipped) => tracing::debug!("leaderboard refresh already running"),
                Err(err) => tracing::error!(%err, "leaderboard refresh failed"),
            }
        }
    })
}
