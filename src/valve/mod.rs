//! Valve: the boundary to the OS data plane (spec.md §4.3). Per-MAC gate
//! open/close, baseline-relative byte accounting, the `active_macs` set the
//! enforcement loop iterates.
//!
//! No production binding to a captive-portal tool (`nodogsplash`, `vnstat`)
//! ships here; that is out of scope (spec.md §1, §10.9, §11). What ships is
//! the `GateControl`/`StatsProbe` capability split and the `Valve` type that
//! composes them into the state machine spec.md §4.3 describes, grounded on
//! the teacher's `tollgate::network::NetworkDetector` pattern of hiding an
//! OS/network-specific probe behind a small async struct.

mod gate;
mod stats;

pub use gate::{GateControl, GateState, InMemoryGateControl};
pub use stats::{ByteCounts, InMemoryStatsProbe, StatsProbe};

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValveError {
    #[error("invalid mac address: {0}")]
    InvalidMac(String),
    #[error("gate control error: {0}")]
    Gate(String),
    #[error("stats probe error: {0}")]
    Stats(String),
}

/// One MAC's baseline snapshot, recorded at the moment its gate opened (or
/// was last extended) and never touched by a bare extension (spec.md §4.3,
/// §9 REDESIGN FLAG: baseline is preserved across extensions).
#[derive(Debug, Clone, Copy)]
struct Baseline {
    down0: u64,
    up0: u64,
}

/// Composes a `GateControl` and a `StatsProbe` into the Closed →
/// Opened(deadline) → Closed state machine spec.md §4.3 names. All mutating
/// operations serialize through one mutex guarding both the gate map and the
/// baseline map (spec.md: "same or a finer lock").
pub struct Valve<G: GateControl, S: StatsProbe> {
    gate: Arc<G>,
    stats: Arc<S>,
    baselines: Mutex<std::collections::HashMap<String, Baseline>>,
}

impl<G: GateControl, S: StatsProbe> Valve<G, S> {
    pub fn new(gate: Arc<G>, stats: Arc<S>) -> Self {
        Self {
            gate,
            stats,
            baselines: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Enable forwarding for `mac` until `until` (or indefinitely). Idempotent:
    /// re-opening an already-open MAC only replaces the deadline, it never
    /// resets the baseline.
    pub async fn open_gate(
        &self,
        mac: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), ValveError> {
        let mut baselines = self.baselines.lock().await;
        let already_open = matches!(
            self.gate.state(mac).await.map_err(ValveError::Gate)?,
            GateState::Opened(_)
        );
        self.gate
            .open(mac, until)
            .await
            .map_err(ValveError::Gate)?;
        if !already_open || !baselines.contains_key(mac) {
            let (down0, up0) = self.stats.snapshot(mac).await.map_err(ValveError::Stats)?;
            baselines.insert(mac.to_string(), Baseline { down0, up0 });
        }
        Ok(())
    }

    /// Disable forwarding for `mac` and drop its baseline. Idempotent.
    pub async fn close_gate(&self, mac: &str) -> Result<(), ValveError> {
        let mut baselines = self.baselines.lock().await;
        self.gate.close(mac).await.map_err(ValveError::Gate)?;
        baselines.remove(mac);
        Ok(())
    }

    pub async fn set_data_baseline(&self, mac: &str) -> Result<(), ValveError> {
        let (down0, up0) = self.stats.snapshot(mac).await.map_err(ValveError::Stats)?;
        self.baselines
            .lock()
            .await
            .insert(mac.to_string(), Baseline { down0, up0 });
        Ok(())
    }

    pub async fn clear_data_baseline(&self, mac: &str) {
        self.baselines.lock().await.remove(mac);
    }

    pub async fn has_baseline(&self, mac: &str) -> bool {
        self.baselines.lock().await.contains_key(mac)
    }

    /// `(down_now - down0) + (up_now - up0)`, clamped to 0 if the
    /// underlying counter ever resets below the recorded baseline (spec.md
    /// §4.3: "if the OS resets, the caller treats 0").
    pub async fn data_used_since_baseline(&self, mac: &str) -> Result<u64, ValveError> {
        let baseline = {
            let baselines = self.baselines.lock().await;
            *baselines
                .get(mac)
                .ok_or_else(|| ValveError::Stats(format!("no baseline recorded for {mac}")))?
        };
        let (down_now, up_now) = self.stats.snapshot(mac).await.map_err(ValveError::Stats)?;
        let down_delta = down_now.saturating_sub(baseline.down0);
        let up_delta = up_now.saturating_sub(baseline.up0);
        Ok(down_delta + up_delta)
    }

    pub async fn active_macs(&self) -> HashSet<String> {
        self.gate.active_macs().await
    }

    pub fn stats(&self) -> &Arc<S> {
        &self.stats
    }

    pub fn gate(&self) -> &Arc<G> {
        &self.gate
    }
}

pub fn validate_mac(mac: &str) -> Result<(), ValveError> {
    let parts: Vec<&str> = mac.split(':').collect();
    let ok = parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && u8::from_str_radix(p, 16).is_ok());
    if !ok {
        return Err(ValveError::InvalidMac(mac.to_string()));
    }
    Ok(())
}
