//! Aggregate health verdict.
//!
//! # Verdicts
//! ```text
//! Unhealthy: any service breaker open, or the pool is closed
//! Degraded:  any service breaker half-open, any host breaker not closed,
//!            or the remote cache tier unreachable
//! Healthy:   otherwise
//! ```

use serde::Serialize;

use crate::resilience::breaker_manager::BreakerHealthReport;
use crate::resilience::circuit_breaker::CircuitState;

/// Probe-facing verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthVerdict {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthVerdict::Healthy => "healthy",
            HealthVerdict::Degraded => "degraded",
            HealthVerdict::Unhealthy => "unhealthy",
        }
    }

    /// Whether the process should keep receiving traffic.
    pub fn is_serving(&self) -> bool {
        *self != HealthVerdict::Unhealthy
    }
}

impl std::fmt::Display for HealthVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker state of one pooled host.
#[derive(Debug, Clone, Serialize)]
pub struct HostHealth {
    pub host: String,
    pub state: CircuitState,
}

/// Remote cache tier status.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteCacheHealth {
    pub reachable: bool,
    pub state: CircuitState,
}

/// Full health report returned by probes.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthVerdict,
    pub services: BreakerHealthReport,
    pub hosts: Vec<HostHealth>,
    /// Absent when the remote tier is disabled.
    pub remote_cache: Option<RemoteCacheHealth>,
    pub pool_closed: bool,
    pub uptime_secs: u64,
}

/// Combine component states into one verdict.
pub fn assess(
    services: &BreakerHealthReport,
    hosts: &[HostHealth],
    remote_cache: Option<&RemoteCacheHealth>,
    pool_closed: bool,
) -> HealthVerdict {
    if pool_closed || !services.healthy {
        return HealthVerdict::Unhealthy;
    }
    let degraded = services.any_in_state(CircuitState::HalfOpen)
        || hosts.iter().any(|h| h.state != CircuitState::Closed)
        || remote_cache.map(|r| !r.reachable).unwrap_or(false);
    if degraded {
        HealthVerdict::Degraded
    } else {
        HealthVerdict::Healthy
    }
}
