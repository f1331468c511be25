use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use synapse_agent::{GenerationOutput, GenerationPipeline, GenerationRequest};
use synapse_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use synapse_core::cache::{CacheKey, ResponseCache};
use synapse_core::domain::process::{Environment, ProcessId, TenantId};
use synapse_core::errors::{ApplicationError, ErrorCode, InterfaceError};
use synapse_core::schema::ValidationIssue;
use synapse_core::versioning::{
    parse_pin_header, ResolutionError, ResolvedVersion, VersionHeaders, VersionRequest,
    VersionResolver, HEADER_VERSION,
};
use synapse_db::ProcessVersionRepository;
use tracing::{info, warn};
use uuid::Uuid;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const TIMEOUT_HEADER: &str = "x-request-timeout-ms";

#[derive(Clone)]
pub struct GenerateState {
    pub repository: Arc<dyn ProcessVersionRepository>,
    pub pipeline: Arc<GenerationPipeline>,
    pub cache: Arc<dyn ResponseCache>,
    pub audit: Arc<dyn AuditSink>,
}

pub fn router(state: GenerateState) -> Router {
    Router::new()
        .route("/api/v1/processes/{process_id}/generate", post(generate_production))
        .route("/api/v1/sandbox/processes/{process_id}/generate", post(generate_sandbox))
        .with_state(state)
}

async fn generate_production(
    State(state): State<GenerateState>,
    Path(process_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    generate(state, Environment::Production, ProcessId(process_id), headers, body).await
}

async fn generate_sandbox(
    State(state): State<GenerateState>,
    Path(process_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    generate(state, Environment::Sandbox, ProcessId(process_id), headers, body).await
}

/// A failed request, plus the version headers when resolution got that far.
struct Rejection {
    error: InterfaceError,
    version_headers: Option<VersionHeaders>,
    version: Option<u32>,
}

impl From<InterfaceError> for Rejection {
    fn from(error: InterfaceError) -> Self {
        Self { error, version_headers: None, version: None }
    }
}

async fn generate(
    state: GenerateState,
    environment: Environment,
    process_id: ProcessId,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let correlation_id = header_str(&headers, REQUEST_ID_HEADER)
        .filter(|value| !value.trim().is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let Some(tenant_id) = header_str(&headers, TENANT_HEADER)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| TenantId(value.to_owned()))
    else {
        let error = InterfaceError::new(ErrorCode::Unauthorized, "missing tenant identity")
            .with_correlation_id(&correlation_id);
        info!(
            event_name = "generation.request.unauthorized",
            correlation_id = %correlation_id,
            process_id = %process_id.0,
            "request rejected without tenant identity"
        );
        return error_response(error, None);
    };

    let outcome =
        serve(&state, environment, &tenant_id, &process_id, &headers, &body, &correlation_id)
            .await;

    let (response, audit_outcome, code, version) = match outcome {
        Ok((payload, version_headers, version)) => {
            let response = success_response(payload, &version_headers);
            (response, AuditOutcome::Success, None, Some(version))
        }
        Err(rejection) => {
            let error = rejection.error.with_correlation_id(&correlation_id);
            let code = error.code;
            if code.is_operational_alert() {
                warn!(
                    event_name = "generation.request.failed",
                    correlation_id = %correlation_id,
                    process_id = %process_id.0,
                    code = %code,
                    message = %error.message,
                    "generation request failed"
                );
            } else {
                info!(
                    event_name = "generation.request.rejected",
                    correlation_id = %correlation_id,
                    process_id = %process_id.0,
                    code = %code,
                    message = %error.message,
                    "generation request rejected"
                );
            }
            let audit_outcome = match code {
                ErrorCode::InputValidationFailed
                | ErrorCode::InvalidVersionHeader
                | ErrorCode::VersionEnvironmentMismatch
                | ErrorCode::VersionNotFound
                | ErrorCode::NoActiveVersion
                | ErrorCode::ProcessNotFound => AuditOutcome::Rejected,
                _ => AuditOutcome::Failed,
            };
            let response = error_response(error, rejection.version_headers.as_ref());
            (response, audit_outcome, Some(code), rejection.version)
        }
    };

    let category = code.map_or(AuditCategory::Generation, AuditCategory::for_failure);
    let mut event = AuditEvent::new(
        &correlation_id,
        "generation.request.completed",
        category,
        audit_outcome,
    )
    .for_process(tenant_id, process_id)
    .with_metadata("environment", environment.as_str())
    .with_metadata("status", response.status().as_u16().to_string());
    if let Some(version) = version {
        event = event.with_metadata("version", version.to_string());
    }
    if let Some(code) = code {
        event = event.with_metadata("code", code.as_str());
    }
    state.audit.emit(event);

    response
}

async fn serve(
    state: &GenerateState,
    environment: Environment,
    tenant_id: &TenantId,
    process_id: &ProcessId,
    headers: &HeaderMap,
    body: &Bytes,
    correlation_id: &str,
) -> Result<(Value, VersionHeaders, u32), Rejection> {
    let pin = match headers.get(HEADER_VERSION) {
        None => None,
        Some(value) => match value.to_str() {
            Ok(raw) => parse_pin_header(Some(raw)).map_err(InterfaceError::from)?,
            Err(_) => {
                return Err(InterfaceError::from(ResolutionError::InvalidVersionHeader {
                    raw: String::from_utf8_lossy(value.as_bytes()).into_owned(),
                })
                .into())
            }
        },
    };
    let deadline = request_deadline(headers)?;

    let process = state
        .repository
        .find_process(tenant_id, process_id)
        .await
        .map_err(|error| persistence_failure(&error, correlation_id))?;
    if process.is_none() {
        return Err(InterfaceError::from(ResolutionError::ProcessNotFound {
            process_id: process_id.0.clone(),
        })
        .into());
    }

    let versions = state
        .repository
        .list_versions(tenant_id, process_id)
        .await
        .map_err(|error| persistence_failure(&error, correlation_id))?;
    let request = VersionRequest { environment, pinned_version: pin };
    let resolved = VersionResolver::new()
        .resolve_required(&versions, &request)
        .map_err(InterfaceError::from)?;

    let version_headers = VersionHeaders::for_resolution(&resolved, Utc::now());
    log_resolution(&resolved, correlation_id);

    let with_headers = |error: InterfaceError| Rejection {
        error,
        version_headers: Some(version_headers.clone()),
        version: Some(resolved.version.version),
    };

    let input = parse_input(body).map_err(with_headers)?;
    let configuration = &resolved.version.configuration;

    let cache_key = configuration.cache.enabled.then(|| {
        CacheKey::for_generation(tenant_id, process_id, &resolved.version.id, &input)
    });
    if let Some(key) = &cache_key {
        if let Some(mut cached) = state.cache.get(key).await {
            cached["metadata"]["cached"] = Value::Bool(true);
            info!(
                event_name = "generation.cache.hit",
                correlation_id,
                version = resolved.version.version,
                "served generation from cache"
            );
            return Ok((cached, version_headers, resolved.version.version));
        }
    }

    let output = state
        .pipeline
        .generate(GenerationRequest {
            correlation_id,
            configuration,
            input: &input,
            deadline,
        })
        .await
        .map_err(|error| {
            let retry_after = error.retry_after_secs();
            let mut rejection = with_headers(InterfaceError::from(error));
            if let Some(seconds) = retry_after {
                rejection.error.details["retryAfterSeconds"] = json!(seconds);
            }
            rejection
        })?;

    let payload = success_payload(&output);
    if let (Some(key), true) = (cache_key, configuration.cache.ttl_secs > 0) {
        state.cache.set(key, payload.clone(), Duration::from_secs(configuration.cache.ttl_secs)).await;
    }

    Ok((payload, version_headers, resolved.version.version))
}

fn success_payload(output: &GenerationOutput) -> Value {
    json!({
        "data": output.data,
        "metadata": output.metadata,
    })
}

fn parse_input(body: &Bytes) -> Result<Value, InterfaceError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice::<Value>(body).map_err(|error| {
        let issues = vec![ValidationIssue::root(format!("request body is not valid JSON: {error}"))];
        InterfaceError::new(ErrorCode::InputValidationFailed, "request body is not valid JSON")
            .with_details(json!({ "issues": issues }))
    })
}

fn request_deadline(headers: &HeaderMap) -> Result<Option<tokio::time::Instant>, InterfaceError> {
    let Some(value) = headers.get(TIMEOUT_HEADER) else {
        return Ok(None);
    };
    let millis = value
        .to_str()
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|millis| *millis > 0)
        .ok_or_else(|| {
            InterfaceError::new(
                ErrorCode::InputValidationFailed,
                format!("`{TIMEOUT_HEADER}` must be a positive number of milliseconds"),
            )
            .with_details(json!({ "header": TIMEOUT_HEADER }))
        })?;
    Ok(Some(tokio::time::Instant::now() + Duration::from_millis(millis)))
}

fn persistence_failure(error: &synapse_db::RepositoryError, correlation_id: &str) -> InterfaceError {
    warn!(
        event_name = "generation.repository.failed",
        correlation_id,
        error = %error,
        "process version lookup failed"
    );
    ApplicationError::Persistence(error.to_string()).into_interface(correlation_id)
}

fn log_resolution(resolved: &ResolvedVersion, correlation_id: &str) {
    info!(
        event_name = "generation.version.resolved",
        correlation_id,
        version = resolved.version.version,
        environment = resolved.version.environment.as_str(),
        pinned = resolved.is_pinned,
        deprecated = resolved.is_deprecated,
        latest_version = resolved.latest_version,
        "process version resolved"
    );
}

fn success_response(payload: Value, version_headers: &VersionHeaders) -> Response {
    let mut response = (StatusCode::OK, Json(payload)).into_response();
    apply_version_headers(response.headers_mut(), version_headers);
    response
}

fn error_response(error: InterfaceError, version_headers: Option<&VersionHeaders>) -> Response {
    let status =
        StatusCode::from_u16(error.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let retry_after = error.details.get("retryAfterSeconds").and_then(Value::as_u64);

    let mut response = (status, Json(error.body())).into_response();
    if let Some(version_headers) = version_headers {
        apply_version_headers(response.headers_mut(), version_headers);
    }
    if let Some(seconds) = retry_after {
        if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

fn apply_version_headers(target: &mut HeaderMap, version_headers: &VersionHeaders) {
    for (name, value) in version_headers.iter() {
        if let Ok(value) = HeaderValue::from_str(value) {
            target.insert(HeaderName::from_static(name), value);
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
