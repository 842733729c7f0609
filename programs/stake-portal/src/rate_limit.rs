use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sliding-window limiter keyed by an arbitrary client key
/// (an IP, or `ip-sessionId` for wallet linking).
pub struct EndpointRateLimiter {
    max_requests: usize,
    window: Duration,
    requests: Mutex<HashMap<String, Vec<Instant>>>,
}

impl EndpointRateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Wallet verification attempts: 50 per 5 minutes.
    pub fn wallet() -> Self {
        Self::new(50, Duration::from_secs(5 * 60))
    }

    /// Session reads and webhook calls: 300 per 15 minutes.
    pub fn basic() -> Self {
        Self::new(300, Duration::from_secs(15 * 60))
    }

    /// Health checks: 100 per minute.
    pub fn health() -> Self {
        Self::new(100, Duration::from_secs(60))
    }

    /// Records the request if allowed; otherwise returns the seconds to wait.
    pub fn check_and_record(&self, key: &str) -> Result<(), u64> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), u64> {
        let mut requests = self.requests.lock().unwrap_or_else(|p| p.into_inner());

        // Keys with nothing left in the window are dropped so the map stays bounded.
        requests.retain(|_, stamps| {
            stamps.retain(|t| now.duration_since(*t) < self.window);
            !stamps.is_empty()
        });

        let stamps = requests.entry(key.to_string()).or_default();
        if stamps.len() >= self.max_requests {
            let elapsed = now.duration_since(stamps[0]);
            let wait = self.window.saturating_sub(elapsed).as_secs() + 1;
            return Err(wait);
        }
        stamps.push(now);
        Ok(())
    }
}
