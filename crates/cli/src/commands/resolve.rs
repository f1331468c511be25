use chrono::Utc;
use clap::Args;
use serde_json::{json, Map, Value};
use synapse_core::config::{AppConfig, LoadOptions};
use synapse_core::domain::process::{Environment, ProcessId, TenantId};
use synapse_core::versioning::{ResolutionError, VersionRequest, VersionResolver};
use synapse_db::{connect_with_config, ProcessVersionRepository, SqlProcessVersionRepository};

use crate::commands::{runtime, CommandResult};

#[derive(Clone, Debug, Args)]
pub struct ResolveArgs {
    #[arg(long, help = "Tenant that owns the process")]
    pub tenant: String,
    #[arg(long, help = "Process identifier")]
    pub process: String,
    #[arg(long, default_value = "production", help = "Target environment (sandbox|production)")]
    pub environment: String,
    #[arg(long, help = "Pin a specific version number instead of the latest active one")]
    pub pin: Option<u32>,
}

enum Failure {
    Database(String),
    Resolution(ResolutionError),
}

pub fn run(args: &ResolveArgs) -> CommandResult {
    let environment = match args.environment.parse::<Environment>() {
        Ok(environment) => environment,
        Err(error) => {
            return CommandResult::failure("resolve", "invalid_argument", error.to_string(), 2);
        }
    };

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "resolve",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match runtime("resolve") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let tenant_id = TenantId(args.tenant.clone());
    let process_id = ProcessId(args.process.clone());
    let request = match args.pin {
        Some(0) => {
            return CommandResult::failure(
                "resolve",
                "invalid_argument",
                ResolutionError::InvalidVersionHeader { raw: "0".to_string() }.to_string(),
                2,
            );
        }
        Some(pin) => VersionRequest::pinned(environment, pin),
        None => VersionRequest::latest(environment),
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| Failure::Database(error.to_string()))?;
        let repository = SqlProcessVersionRepository::new(pool.clone());

        let lookup = async {
            if repository
                .find_process(&tenant_id, &process_id)
                .await
                .map_err(|error| Failure::Database(error.to_string()))?
                .is_none()
            {
                return Err(Failure::Resolution(ResolutionError::ProcessNotFound {
                    process_id: process_id.0.clone(),
                }));
            }
            let versions = repository
                .list_versions(&tenant_id, &process_id)
                .await
                .map_err(|error| Failure::Database(error.to_string()))?;
            VersionResolver::new().resolve_required(&versions, &request).map_err(Failure::Resolution)
        }
        .await;

        pool.close().await;
        lookup
    });

    match result {
        Ok(resolved) => {
            let now = Utc::now();
            let headers: Map<String, Value> = resolved
                .headers_at(now)
                .iter()
                .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
                .collect();
            let data = json!({
                "tenantId": tenant_id.0,
                "processId": process_id.0,
                "environment": environment.as_str(),
                "version": resolved.version.version,
                "versionId": resolved.version.id.0,
                "status": resolved.version.status.as_code(),
                "isPinned": resolved.is_pinned,
                "isDeprecated": resolved.is_deprecated,
                "latestVersion": resolved.latest_version,
                "sunsetDate": resolved.sunset_date.map(|sunset| sunset.to_rfc3339()),
                "deprecationMessage": resolved.deprecation_message_at(now),
                "headers": headers,
            });
            CommandResult::success_with_data(
                "resolve",
                format!(
                    "process `{}` resolves to version {} in {}",
                    process_id.0,
                    resolved.version.version,
                    environment.as_str()
                ),
                data,
            )
        }
        Err(Failure::Database(message)) => {
            CommandResult::failure("resolve", "db_connectivity", message, 4)
        }
        Err(Failure::Resolution(error)) => CommandResult::failure(
            "resolve",
            "resolution",
            format!("{}: {error}", error.code()),
            6,
        ),
    }
}
