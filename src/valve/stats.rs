//! `StatsProbe`: the per-client byte-counter capability (spec.md §4.3, §6).
//! All calls into the underlying tool are meant to be serialized through one
//! process-wide mutex (spec.md: "the tool is not re-entrant safe on the
//! target platform"); `InMemoryStatsProbe` keeps that discipline even though
//! nothing downstream of it actually shells out.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

pub type ByteCounts = (u64, u64);

#[async_trait]
pub trait StatsProbe: Send + Sync {
    /// Cumulative `(downloaded_bytes, uploaded_bytes)` for `mac` since it
    /// was bound to the captive portal.
    async fn snapshot(&self, mac: &str) -> Result<ByteCounts, String>;
}

#[derive(Default, Clone, Copy)]
struct Counters {
    down: u64,
    up: u64,
}

/// In-memory stats probe for tests: counters only move when explicitly
/// driven (`add_downloaded`/`add_uploaded`/`reset`), never on a clock.
pub struct InMemoryStatsProbe {
    counters: Mutex<HashMap<String, Counters>>,
}

impl InMemoryStatsProbe {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub async fn add_downloaded(&self, mac: &str, bytes: u64) {
        self.counters.lock().unwrap().entry(mac.to_string()).or_default().down += bytes;
    }

    pub async fn add_uploaded(&self, mac: &str, bytes: u64) {
        self.counters.lock().unwrap().entry(mac.to_string()).or_default().up += bytes;
    }

    /// Simulates the underlying OS counter resetting to zero, e.g. after a
    /// reboot of the captive-portal host.
    pub async fn reset(&self, mac: &str) {
        self.counters.lock().unwrap().remove(mac);
    }
}

impl Default for InMemoryStatsProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatsProbe for InMemoryStatsProbe {
    async fn snapshot(&self, mac: &str) -> Result<ByteCounts, String> {
        let counters = self.counters.lock().unwrap();
        let c = counters.get(mac).copied().unwrap_or_default();
        Ok((c.down, c.up))
    }
}
