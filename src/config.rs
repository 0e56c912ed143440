//! Configuration contract (spec.md §6, realized in §10.5 of SPEC_FULL.md).
//!
//! A TOML file deserialized into [`Config`]. Unrecognized keys are ignored
//! rather than rejected, matching the spec's "others ignored" contract.
//! Grounded on `bonomat-10101/coordinator`'s TOML-config-at-startup pattern —
//! the nearest in-corpus daemon that reads its configuration this way.

use crate::error::AppError;
use crate::protocol::Metric;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedMint {
    pub url: String,
    pub price_per_step: u64,
    pub price_unit: String,
    pub min_purchase_steps: u64,
    pub min_payout_amount: u64,
    pub min_balance: u64,
    #[serde(default)]
    pub balance_tolerance_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitShare {
    pub identity_ref: String,
    pub factor: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trust {
    #[serde(default)]
    pub allowlist: Option<Vec<String>>,
    #[serde(default)]
    pub blocklist: Option<Vec<String>>,
}

impl Trust {
    pub fn is_permitted(&self, pubkey: &str) -> bool {
        if let Some(blocklist) = &self.blocklist {
            if blocklist.iter().any(|p| p == pubkey) {
                return false;
            }
        }
        if let Some(allowlist) = &self.allowlist {
            return allowlist.iter().any(|p| p == pubkey);
        }
        true
    }
}

fn default_renewal_threshold_ms() -> u64 {
    30_000
}

fn default_renewal_threshold_bytes() -> u64 {
    1_000_000
}

fn default_poll_interval_seconds() -> u64 {
    60
}

fn default_enforcement_interval_seconds() -> u64 {
    2
}

fn default_overpayment_pct() -> f64 {
    1.0
}

/// USM's (buyer-side) spending limits and self-advertised protocol
/// extensions (spec.md §4.5.2 steps 3 and 6). Separate from
/// `AcceptedMint`/`accepted_mints`, which the same config section does
/// double duty for: the mints USM is willing to *pay with* as a buyer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsmConfig {
    pub max_cost_per_session: u64,
    pub max_cost_per_hour: u64,
    #[serde(default = "default_overpayment_pct")]
    pub overpayment_pct: f64,
    #[serde(default)]
    pub overpayment_abs: u64,
    #[serde(default)]
    pub protocol_extensions: Vec<String>,
}

impl Default for UsmConfig {
    fn default() -> Self {
        Self {
            max_cost_per_session: u64::MAX,
            max_cost_per_hour: u64::MAX,
            overpayment_pct: default_overpayment_pct(),
            overpayment_abs: 0,
            protocol_extensions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub metric: Metric,
    pub step_size: u64,
    pub accepted_mints: Vec<AcceptedMint>,
    #[serde(default)]
    pub profit_share: Vec<ProfitShare>,
    #[serde(default)]
    pub trust: Trust,
    #[serde(default = "default_renewal_threshold_ms")]
    pub renewal_threshold_ms: u64,
    #[serde(default = "default_renewal_threshold_bytes")]
    pub renewal_threshold_bytes: u64,
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_enforcement_interval_seconds")]
    pub enforcement_interval_seconds: u64,
    #[serde(default)]
    pub allow_swap_untrusted_mints: bool,
    #[serde(default)]
    pub usm: UsmConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("reading {}: {e}", path.as_ref().display())))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, AppError> {
        let config: Config = toml::from_str(text).map_err(|e| AppError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.step_size == 0 {
            return Err(AppError::Config("step_size must be > 0".into()));
        }
        if self.accepted_mints.is_empty() {
            return Err(AppError::Config(
                "at least one accepted_mints entry is required".into(),
            ));
        }
        let sum: f64 = self.profit_share.iter().map(|p| p.factor).sum();
        if !self.profit_share.is_empty() && (sum - 1.0).abs() > 1e-6 {
            return Err(AppError::Config(format!(
                "profit_share factors must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        metric = "milliseconds"
        step_size = 60000

        [[accepted_mints]]
        url = "https://mint.example.com"
        price_per_step = 1
        price_unit = "sat"
        min_purchase_steps = 1
        min_payout_amount = 5000
        min_balance = 1000
    "#;

    #[test]
    fn parses_minimal_config() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.step_size, 60000);
        assert_eq!(config.accepted_mints.len(), 1);
        assert_eq!(config.poll_interval_seconds, 60);
    }

    #[test]
    fn rejects_zero_step_size() {
        let bad = SAMPLE.replace("step_size = 60000", "step_size = 0");
        assert!(Config::parse(&bad).is_err());
    }

    #[test]
    fn rejects_unbalanced_profit_share() {
        let mut bad = SAMPLE.to_string();
        bad.push_str(
            "\n[[profit_share]]\nidentity_ref = \"a\"\nfactor = 0.3\n[[profit_share]]\nidentity_ref = \"b\"\nfactor = 0.3\n",
        );
        assert!(Config::parse(&bad).is_err());
    }

    #[test]
    fn ignores_unrecognized_keys() {
        let mut extra = SAMPLE.to_string();
        extra.push_str("\nsome_future_option = true\n");
        assert!(Config::parse(&extra).is_ok());
    }

    #[test]
    fn trust_blocklist_overrides_allowlist() {
        let trust = Trust {
            allowlist: Some(vec!["a".into()]),
            blocklist: Some(vec!["a".into()]),
        };
        assert!(!trust.is_permitted("a"));
    }

    #[test]
    fn trust_defaults_permit_everyone() {
        let trust = Trust::default();
        assert!(trust.is_permitted("anyone"));
    }
}
