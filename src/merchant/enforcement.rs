//! Enforcement loop (spec.md §4.4.2): a single background task, fixed
//! cadence, that walks every `CustomerSession` and closes out whichever have
//! expired or exhausted their allotment.

use super::session::{SessionKey, SessionMap};
use crate::clock::{system_clock, SharedClock};
use crate::protocol::Metric;
use crate::valve::{GateControl, StatsProbe, Valve};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio_util::sync::CancellationToken;

const MAX_STRIKES: u32 = 3;

pub struct EnforcementLoop<G: GateControl, S: StatsProbe> {
    valve: Arc<Valve<G, S>>,
    sessions: Arc<SessionMap>,
    interval: StdDuration,
    clock: SharedClock,
}

impl<G: GateControl, S: StatsProbe> EnforcementLoop<G, S> {
    pub fn new(valve: Arc<Valve<G, S>>, sessions: Arc<SessionMap>, interval: StdDuration) -> Self {
        Self {
            valve,
            sessions,
            interval,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Run until `cancel` fires, ticking at the configured cadence.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("enforcement loop shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// One enforcement pass over every live session. Exposed directly so
    /// tests can drive it without waiting on a real timer.
    pub async fn tick(&self) {
        for session in self.sessions.all().await {
            let key = SessionKey {
                customer_pubkey: session.customer_pubkey.clone(),
                mac: session.mac.clone(),
            };

            match session.metric {
                Metric::Milliseconds => {
                    if let Some(expires_at) = session.expires_at {
                        if self.clock.now() >= expires_at {
                            self.close(&key).await;
                        }
                    }
                }
                Metric::Bytes => match self.valve.data_used_since_baseline(&session.mac).await {
                    Ok(used) => {
                        self.sessions.clear_strikes(&key).await;
                        self.sessions.record_consumed(&key, used).await;
                        if used >= session.allotment_total {
                            self.close(&key).await;
                        }
                    }
                    Err(e) => {
                        let strikes = self.sessions.record_strike(&key).await;
                        tracing::warn!(
                            mac = %session.mac,
                            strikes,
                            error = %e,
                            "valve stats query failed during enforcement"
                        );
                        if strikes >= MAX_STRIKES {
                            tracing::warn!(
                                mac = %session.mac,
                                "force-closing session after repeated stats failures"
                            );
                            self.close(&key).await;
                        }
                    }
                },
            }
        }
    }

    async fn close(&self, key: &SessionKey) {
        if let Err(e) = self.valve.close_gate(&key.mac).await {
            tracing::warn!(mac = %key.mac, error = %e, "failed to close gate during enforcement");
        }
        self.sessions.remove(key).await;
    }
}
