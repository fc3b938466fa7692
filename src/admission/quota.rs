//! Quota tables and tier matching.
//!
//! Quotas are keyed by client tier and operation class. The table is loaded
//! once from configuration and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::key::OperationClass;
use crate::error::{Result, TurnstileError};

/// Service tier a client belongs to.
///
/// The well-known tiers get their own variants; any other name is carried
/// through as `Custom` so new tiers only need a configuration change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ClientTier {
    Premium,
    Standard,
    Basic,
    Custom(String),
}

impl ClientTier {
    pub fn as_str(&self) -> &str {
        match self {
            ClientTier::Premium => "premium",
            ClientTier::Standard => "standard",
            ClientTier::Basic => "basic",
            ClientTier::Custom(name) => name,
        }
    }
}

impl From<String> for ClientTier {
    fn from(name: String) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "premium" => ClientTier::Premium,
            "standard" => ClientTier::Standard,
            "basic" => ClientTier::Basic,
            _ => ClientTier::Custom(name),
        }
    }
}

impl From<&str> for ClientTier {
    fn from(name: &str) -> Self {
        ClientTier::from(name.to_string())
    }
}

impl From<ClientTier> for String {
    fn from(tier: ClientTier) -> Self {
        tier.as_str().to_string()
    }
}

impl std::fmt::Display for ClientTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits applied to one (tier, operation class) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuotaSpec {
    /// Sustained refill rate of the token bucket
    pub requests_per_minute: f64,
    /// Maximum number of in-flight requests
    pub concurrent_limit: u32,
    /// Token bucket capacity
    pub burst_size: u32,
}

impl QuotaSpec {
    pub fn new(requests_per_minute: f64, concurrent_limit: u32, burst_size: u32) -> Self {
        Self {
            requests_per_minute,
            concurrent_limit,
            burst_size,
        }
    }

    /// Refill rate in tokens per second.
    pub fn refill_rate_per_second(&self) -> f64 {
        self.requests_per_minute / 60.0
    }
}

/// Read and write quotas for one tier. Either may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierQuotas {
    #[serde(default)]
    pub read: Option<QuotaSpec>,
    #[serde(default)]
    pub write: Option<QuotaSpec>,
}

impl TierQuotas {
    pub fn get(&self, operation: OperationClass) -> Option<&QuotaSpec> {
        match operation {
            OperationClass::Read => self.read.as_ref(),
            OperationClass::Write => self.write.as_ref(),
        }
    }
}

/// A complete quota table covering every configured tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuotaTable {
    tiers: HashMap<ClientTier, TierQuotas>,
}

impl QuotaTable {
    /// Create an empty table. Every lookup against it fails.
    pub fn empty() -> Self {
        Self {
            tiers: HashMap::new(),
        }
    }

    /// Load a table from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse quota table: {}", e)))
    }

    /// Set the quotas for a tier, replacing any previous entry.
    pub fn insert(&mut self, tier: ClientTier, quotas: TierQuotas) {
        self.tiers.insert(tier, quotas);
    }

    /// Find the quota for a tier and operation class.
    pub fn find_quota(&self, tier: &ClientTier, operation: OperationClass) -> Option<&QuotaSpec> {
        self.tiers.get(tier)?.get(operation)
    }

    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }
}

impl Default for QuotaTable {
    fn default() -> Self {
        let mut table = QuotaTable::empty();
        table.insert(
            ClientTier::Premium,
            TierQuotas {
                read: Some(QuotaSpec::new(600.0, 50, 100)),
                write: Some(QuotaSpec::new(120.0, 20, 30)),
            },
        );
        table.insert(
            ClientTier::Standard,
            TierQuotas {
                read: Some(QuotaSpec::new(300.0, 30, 50)),
                write: Some(QuotaSpec::new(60.0, 10, 15)),
            },
        );
        table.insert(
            ClientTier::Basic,
            TierQuotas {
                read: Some(QuotaSpec::new(100.0, 10, 20)),
                write: Some(QuotaSpec::new(20.0, 5, 5)),
            },
        );
        table
    }
}
