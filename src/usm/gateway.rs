//! Known-gateway tracking (spec.md §4.5.1): every gateway this host has
//! seen a default route to, re-evaluated every poll cycle rather than
//! blacklisted on first failure.

use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GatewayKey {
    pub interface: String,
    pub gateway_ip: String,
}

#[derive(Debug, Clone)]
pub struct KnownGateway {
    pub interface: String,
    pub gateway_ip: String,
}

/// Read-write-locked map of known gateways (spec.md §5: "writes on
/// discover/remove, reads on iterate").
#[derive(Default)]
pub struct GatewayMap {
    gateways: RwLock<HashMap<GatewayKey, KnownGateway>>,
}

impl GatewayMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// `on_gateway_discovered(interface, gateway_ip)`: adds or updates a
    /// `KnownGateway`.
    pub async fn on_gateway_discovered(&self, interface: &str, gateway_ip: &str) {
        let key = GatewayKey {
            interface: interface.to_string(),
            gateway_ip: gateway_ip.to_string(),
        };
        self.gateways.write().await.insert(
            key,
            KnownGateway {
                interface: interface.to_string(),
                gateway_ip: gateway_ip.to_string(),
            },
        );
    }

    /// Called when `interface`'s default route disappears.
    pub async fn on_interface_down(&self, interface: &str) {
        self.gateways
            .write()
            .await
            .retain(|k, _| k.interface != interface);
    }

    pub async fn all(&self) -> Vec<KnownGateway> {
        self.gateways.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discover_then_rediscover_updates_in_place() {
        let map = GatewayMap::new();
        map.on_gateway_discovered("wlan0", "10.0.0.1").await;
        map.on_gateway_discovered("wlan0", "10.0.0.2").await;

        let all = map.all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].gateway_ip, "10.0.0.2");
    }

    #[tokio::test]
    async fn interface_down_removes_its_gateways() {
        let map = GatewayMap::new();
        map.on_gateway_discovered("wlan0", "10.0.0.1").await;
        map.on_gateway_discovered("eth0", "10.0.0.2").await;

        map.on_interface_down("wlan0").await;

        let all = map.all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].interface, "eth0");
    }
}
