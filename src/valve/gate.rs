//! `GateControl`: the per-MAC L3 forwarding capability (spec.md §4.3, §6
//! "Valve external binding", §9 "replace the per-tool exec bindings with
//! small capability interfaces"). The production implementation would shell
//! out to a captive-portal tool (`nodogsplash` et al.); that binding is out
//! of scope, so the only implementation here is `InMemoryGateControl`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Closed,
    Opened(Option<DateTime<Utc>>),
}

#[async_trait]
pub trait GateControl: Send + Sync {
    async fn open(&self, mac: &str, until: Option<DateTime<Utc>>) -> Result<(), String>;
    async fn close(&self, mac: &str) -> Result<(), String>;
    async fn state(&self, mac: &str) -> Result<GateState, String>;
    async fn active_macs(&self) -> HashSet<String>;
}

/// In-memory gate control: a plain map from MAC to its deadline, standing in
/// for whatever OS mechanism actually enables forwarding.
pub struct InMemoryGateControl {
    open: Mutex<HashMap<String, Option<DateTime<Utc>>>>,
}

impl InMemoryGateControl {
    pub fn new() -> Self {
        Self {
            open: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryGateControl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GateControl for InMemoryGateControl {
    async fn open(&self, mac: &str, until: Option<DateTime<Utc>>) -> Result<(), String> {
        self.open.lock().unwrap().insert(mac.to_string(), until);
        Ok(())
    }

    async fn close(&self, mac: &str) -> Result<(), String> {
        self.open.lock().unwrap().remove(mac);
        Ok(())
    }

    async fn state(&self, mac: &str) -> Result<GateState, String> {
        Ok(match self.open.lock().unwrap().get(mac) {
            Some(until) => GateState::Opened(*until),
            None => GateState::Closed,
        })
    }

    async fn active_macs(&self) -> HashSet<String> {
        self.open.lock().unwrap().keys().cloned().collect()
    }
}
