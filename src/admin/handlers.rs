use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::config::HostConfig;
use crate::store::{BreakerState, HostRecord, Versioned};

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub hosts: usize,
    pub breakers: HashMap<&'static str, usize>,
}

#[derive(Debug, Serialize)]
pub struct HostStatus {
    pub config: HostConfig,
    /// Stored record; absent until the host sees its first request.
    pub record: Option<HostRecord>,
    pub version: Option<u64>,
    /// True when the record came from the cache because the store was down.
    pub stale: bool,
}

#[derive(Debug, Serialize)]
pub struct ResetResult {
    pub host_key: String,
    pub state: BreakerState,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let mut breakers: HashMap<&'static str, usize> = HashMap::new();
    let status = match state.store.list().await {
        Ok(records) => {
            let stored: HashMap<&str, &Versioned<HostRecord>> =
                records.iter().map(|r| (r.value.host_key.as_str(), r)).collect();
            for host in state.router.hosts() {
                let current = stored
                    .get(host.host_key.as_str())
                    .map(|r| r.value.breaker.state)
                    .unwrap_or(BreakerState::Closed);
                *breakers.entry(current.as_str()).or_default() += 1;
            }
            "operational"
        }
        Err(e) => {
            tracing::warn!(error = %e, "Admin status could not list host records");
            "degraded"
        }
    };

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status,
        uptime_secs: state.started_at.elapsed().as_secs(),
        hosts: state.router.hosts().len(),
        breakers,
    })
}

pub async fn get_hosts(State(state): State<AdminState>) -> Json<Vec<HostStatus>> {
    let mut statuses = Vec::with_capacity(state.router.hosts().len());

    for host in state.router.hosts() {
        let (record, version, stale) = match state.store.read(&host.host_key).await {
            Ok(snapshot) => match snapshot.current {
                Some(found) => (Some(found.value), Some(found.version), snapshot.stale),
                None => (None, None, snapshot.stale),
            },
            Err(e) => {
                tracing::warn!(host = %host.host_key, error = %e, "Admin could not read host record");
                (None, None, true)
            }
        };
        statuses.push(HostStatus {
            config: host.as_ref().clone(),
            record,
            version,
            stale,
        });
    }

    Json(statuses)
}

pub async fn reset_host(
    State(state): State<AdminState>,
    Path(host_key): Path<String>,
) -> Result<Json<ResetResult>, (StatusCode, String)> {
    let host = state
        .router
        .get(&host_key)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("unknown host '{}'", host_key)))?;

    match state.breaker.reset(host).await {
        Ok(true) => Ok(Json(ResetResult {
            host_key,
            state: BreakerState::Closed,
        })),
        Ok(false) => Err((
            StatusCode::CONFLICT,
            format!("reset of '{}' was not persisted, retry", host_key),
        )),
        Err(e) => Err((StatusCode::SERVICE_UNAVAILABLE, e.to_string())),
    }
}
