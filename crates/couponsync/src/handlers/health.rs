//! Health check endpoints for Kubernetes-style probes.
//!
//! - `/livez` - Basic liveness probe (immediate 200, no checks)
//! - `/healthz` - Breaker, notification hub and cache stats

use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use couponsync_core::resilience::{BreakerStatus, CircuitState, Dependency};

use crate::{
    cache::CacheStats,
    notify::{BrokerState, HubStats},
    state::AppState,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// False when a breaker is open or the broker is degraded.
    pub healthy: bool,
    pub breakers: BTreeMap<Dependency, BreakerStatus>,
    pub notifications: HubStats,
    pub cache: CacheStats,
}

/// GET /livez - Basic liveness probe.
#[axum::debug_handler]
pub async fn livez() -> StatusCode {
    StatusCode::OK
}

/// GET /healthz - Passive stats of every component.
///
/// Always answers 200; degraded components are reported, not fatal.
#[axum::debug_handler]
pub async fn healthz(State(state): State<AppState>) -> Json<HealthReport> {
    let breakers = state.breakers.status();
    let notifications = state.hub.stats();

    let healthy = breakers
        .values()
        .all(|status| status.state != CircuitState::Open)
        && notifications.broker != BrokerState::Degraded;

    Json(HealthReport {
        healthy,
        breakers,
        notifications,
        cache: state.cache.stats(),
    })
}
