use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use synapse_core::breaker::{BreakerRegistry, BreakerSnapshot, CircuitState};
use synapse_db::{ping, DbPool};

#[derive(Clone)]
pub struct HealthState {
    pub db_pool: DbPool,
    pub breakers: Arc<BreakerRegistry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub providers: Vec<BreakerSnapshot>,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

/// 503 only when the database is unreachable. An open circuit marks the
/// service degraded but it can still answer cached and resolution requests.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let now = Utc::now();
    let database = database_check(&state.db_pool).await;
    let database_ready = database.status == "ready";
    let providers = state.breakers.snapshots_at(now);
    let circuits_closed = providers.iter().all(|snapshot| snapshot.state != CircuitState::Open);

    let payload = HealthResponse {
        status: if database_ready && circuits_closed { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "synapse-server runtime initialized".to_string(),
        },
        database,
        providers,
        checked_at: now.to_rfc3339(),
    };

    let status_code = if database_ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match ping(pool).await {
        Ok(()) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, Json};
    use synapse_core::breaker::{BreakerConfig, BreakerRegistry, CircuitState};
    use synapse_db::connect_with_settings;

    use crate::health::{health, HealthState};

    fn registry() -> Arc<BreakerRegistry> {
        Arc::new(BreakerRegistry::new(BreakerConfig { failure_threshold: 1, cooldown_secs: 30 }))
    }

    #[tokio::test]
    async fn health_returns_ready_when_database_is_reachable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        let breakers = registry();
        breakers.breaker_for("openai");

        let (status, Json(payload)) =
            health(State(HealthState { db_pool: pool.clone(), breakers })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.providers.len(), 1);
        assert_eq!(payload.providers[0].state, CircuitState::Closed);

        pool.close().await;
    }

    #[tokio::test]
    async fn open_circuit_reports_degraded_but_stays_up() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        let breakers = registry();
        breakers.breaker_for("anthropic").record_failure();

        let (status, Json(payload)) =
            health(State(HealthState { db_pool: pool.clone(), breakers })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.providers[0].provider, "anthropic");
        assert_eq!(payload.providers[0].state, CircuitState::Open);
        assert!(payload.providers[0].retry_after_secs.is_some());

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        pool.close().await;

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool, breakers: registry() })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
        assert_eq!(payload.service.status, "ready");
    }
}
