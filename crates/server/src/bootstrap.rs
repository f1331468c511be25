use std::sync::Arc;
use std::time::Duration;

use synapse_agent::providers::client_from_config;
use synapse_agent::{GenerationPipeline, GuardedClient, ProviderError, TracingBreakerListener};
use synapse_core::audit::{AuditEvent, AuditSink};
use synapse_core::breaker::BreakerRegistry;
use synapse_core::cache::InMemoryResponseCache;
use synapse_core::config::{AppConfig, ConfigError, LoadOptions};
use synapse_db::{connect_with_config, migrations, DbPool, SqlProcessVersionRepository};
use thiserror::Error;
use tracing::info;

use crate::generate::GenerateState;
use crate::health::HealthState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub breakers: Arc<BreakerRegistry>,
    pub generate: GenerateState,
}

impl Application {
    pub fn health_state(&self) -> HealthState {
        HealthState { db_pool: self.db_pool.clone(), breakers: self.breakers.clone() }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("llm provider client could not be built: {0}")]
    Provider(#[source] ProviderError),
}

/// Audit events go to the structured log; the sink contract is best-effort.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();
        info!(
            event_name = "audit.event.recorded",
            correlation_id = %event.correlation_id,
            audit_event_id = %event.event_id,
            audit_event_type = %event.event_type,
            tenant_id = event.tenant_id.as_ref().map(|tenant| tenant.0.as_str()).unwrap_or("unknown"),
            process_id = event.process_id.as_ref().map(|process| process.0.as_str()).unwrap_or("unknown"),
            category = event.category.as_str(),
            outcome = event.outcome.as_str(),
            metadata = %metadata,
            "audit event recorded"
        );
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        llm_provider = config.llm.provider.as_str(),
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let breakers = Arc::new(
        BreakerRegistry::new(config.breaker.clone())
            .with_listener(Arc::new(TracingBreakerListener)),
    );
    let client = client_from_config(&config.llm).map_err(BootstrapError::Provider)?;
    let guarded = GuardedClient::new(client.clone(), breakers.breaker_for(client.name()))
        .with_timeout(Duration::from_secs(config.llm.timeout_secs.max(1)));
    let pipeline = GenerationPipeline::new(guarded, config.llm.model.clone());

    let generate = GenerateState {
        repository: Arc::new(SqlProcessVersionRepository::new(db_pool.clone())),
        pipeline: Arc::new(pipeline),
        cache: Arc::new(InMemoryResponseCache::new()),
        audit: Arc::new(TracingAuditSink),
    };

    info!(
        event_name = "system.bootstrap.pipeline_ready",
        correlation_id = "bootstrap",
        llm_provider = client.name(),
        llm_model = %config.llm.model,
        failure_threshold = config.breaker.failure_threshold,
        cooldown_secs = config.breaker.cooldown_secs,
        "generation pipeline assembled"
    );

    Ok(Application { config, db_pool, breakers, generate })
}
