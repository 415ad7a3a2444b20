//! Tier ordering for reads, writes and backfill.

use serde::Serialize;

/// Storage tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Local,
    Remote,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Local => "local",
            Tier::Remote => "remote",
        }
    }
}

/// Which tiers are consulted, and in what order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierStrategy {
    remote: bool,
}

impl TierStrategy {
    pub fn two_tier() -> Self {
        Self { remote: true }
    }

    pub fn local_only() -> Self {
        Self { remote: false }
    }

    /// Fastest tier first.
    pub fn read_order(&self) -> &'static [Tier] {
        if self.remote {
            &[Tier::Local, Tier::Remote]
        } else {
            &[Tier::Local]
        }
    }

    /// Shared tier first so other instances see the value as early as possible.
    pub fn write_order(&self) -> &'static [Tier] {
        if self.remote {
            &[Tier::Remote, Tier::Local]
        } else {
            &[Tier::Local]
        }
    }

    /// Faster tiers to populate after a hit on `hit`.
    pub fn backfill_targets(&self, hit: Tier) -> &'static [Tier] {
        match hit {
            Tier::Remote => &[Tier::Local],
            Tier::Local => &[],
        }
    }
}
