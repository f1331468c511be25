use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, Sqlite, SqliteConnection, Transaction};

use synapse_core::domain::process::{
    Environment, Process, ProcessConfiguration, ProcessId, ProcessVersion, ProcessVersionId,
    TenantId, VersionStatus,
};

use super::{apply_status, process_not_found, ProcessVersionRepository, RepositoryError};
use crate::DbPool;

const VERSION_COLUMNS: &str = "v.id,
                v.process_id,
                v.version,
                v.environment,
                v.status,
                v.deprecated_at,
                v.configuration_json,
                v.rolled_back_from,
                v.created_at";

pub struct SqlProcessVersionRepository {
    pool: DbPool,
}

impl SqlProcessVersionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn owned_versions(
        tx: &mut Transaction<'_, Sqlite>,
        tenant_id: &TenantId,
        process_id: &ProcessId,
    ) -> Result<Vec<ProcessVersion>, RepositoryError> {
        let owner = sqlx::query("SELECT tenant_id FROM process WHERE id = ?")
            .bind(&process_id.0)
            .fetch_optional(&mut **tx)
            .await?;
        match owner {
            Some(row) if row.try_get::<String, _>("tenant_id")? == tenant_id.0 => {}
            _ => return Err(process_not_found(tenant_id, process_id)),
        }
        load_versions(&mut **tx, tenant_id, process_id).await
    }

    async fn insert_in(
        tx: &mut Transaction<'_, Sqlite>,
        version: &ProcessVersion,
    ) -> Result<(), RepositoryError> {
        let configuration_json = serde_json::to_string(&version.configuration)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        let inserted = sqlx::query(
            "INSERT INTO process_version (
                id,
                process_id,
                version,
                environment,
                status,
                deprecated_at,
                configuration_json,
                rolled_back_from,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&version.id.0)
        .bind(&version.process_id.0)
        .bind(i64::from(version.version))
        .bind(version.environment.as_code())
        .bind(version.status.as_code())
        .bind(version.deprecated_at.map(|value| value.to_rfc3339()))
        .bind(configuration_json)
        .bind(version.rolled_back_from.map(i64::from))
        .bind(version.created_at.to_rfc3339())
        .execute(&mut **tx)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                Err(RepositoryError::Conflict(format!(
                    "version {} of process `{}` was created concurrently",
                    version.version, version.process_id.0
                )))
            }
            Err(error) => Err(error.into()),
        }
    }
}

#[async_trait::async_trait]
impl ProcessVersionRepository for SqlProcessVersionRepository {
    async fn save_process(&self, process: Process) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO process (id, tenant_id, name, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name",
        )
        .bind(&process.id.0)
        .bind(&process.tenant_id.0)
        .bind(&process.name)
        .bind(process.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_process(
        &self,
        tenant_id: &TenantId,
        process_id: &ProcessId,
    ) -> Result<Option<Process>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, name, created_at
             FROM process
             WHERE id = ? AND tenant_id = ?",
        )
        .bind(&process_id.0)
        .bind(&tenant_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(process_from_row).transpose()
    }

    async fn list_versions(
        &self,
        tenant_id: &TenantId,
        process_id: &ProcessId,
    ) -> Result<Vec<ProcessVersion>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        load_versions(&mut conn, tenant_id, process_id).await
    }

    async fn create_version(
        &self,
        tenant_id: &TenantId,
        process_id: &ProcessId,
        environment: Environment,
        configuration: ProcessConfiguration,
        now: DateTime<Utc>,
    ) -> Result<ProcessVersion, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let existing = Self::owned_versions(&mut tx, tenant_id, process_id).await?;

        let version =
            ProcessVersion::draft(process_id.clone(), environment, configuration, &existing, now);
        Self::insert_in(&mut tx, &version).await?;
        tx.commit().await?;

        Ok(version)
    }

    async fn rollback_to(
        &self,
        tenant_id: &TenantId,
        process_id: &ProcessId,
        source_version: u32,
        now: DateTime<Utc>,
    ) -> Result<ProcessVersion, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let existing = Self::owned_versions(&mut tx, tenant_id, process_id).await?;

        let source =
            existing.iter().find(|version| version.version == source_version).ok_or_else(|| {
                RepositoryError::NotFound(format!(
                    "version {source_version} of process `{}` does not exist",
                    process_id.0
                ))
            })?;
        let version = ProcessVersion::rollback_from(source, &existing, now)?;
        Self::insert_in(&mut tx, &version).await?;
        tx.commit().await?;

        Ok(version)
    }

    async fn set_status(
        &self,
        tenant_id: &TenantId,
        version_id: &ProcessVersionId,
        status: VersionStatus,
        now: DateTime<Utc>,
    ) -> Result<ProcessVersion, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS}
                 FROM process_version v
                 JOIN process p ON p.id = v.process_id
                 WHERE v.id = ? AND p.tenant_id = ?"
        ))
        .bind(&version_id.0)
        .bind(&tenant_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let mut version = row.map(version_from_row).transpose()?.ok_or_else(|| {
            RepositoryError::NotFound(format!("process version `{}` does not exist", version_id.0))
        })?;

        apply_status(&mut version, status, now);
        sqlx::query("UPDATE process_version SET status = ?, deprecated_at = ? WHERE id = ?")
            .bind(version.status.as_code())
            .bind(version.deprecated_at.map(|value| value.to_rfc3339()))
            .bind(&version.id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(version)
    }
}

async fn load_versions(
    conn: &mut SqliteConnection,
    tenant_id: &TenantId,
    process_id: &ProcessId,
) -> Result<Vec<ProcessVersion>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {VERSION_COLUMNS}
             FROM process_version v
             JOIN process p ON p.id = v.process_id
             WHERE v.process_id = ? AND p.tenant_id = ?
             ORDER BY v.version ASC"
    ))
    .bind(&process_id.0)
    .bind(&tenant_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(version_from_row).collect()
}

fn process_from_row(row: SqliteRow) -> Result<Process, RepositoryError> {
    Ok(Process {
        id: ProcessId(row.try_get("id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        name: row.try_get("name")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn version_from_row(row: SqliteRow) -> Result<ProcessVersion, RepositoryError> {
    let environment_raw = row.try_get::<String, _>("environment")?;
    let environment = environment_raw.parse::<Environment>().map_err(|_| {
        RepositoryError::Decode(format!("unknown environment `{environment_raw}`"))
    })?;
    let status_raw = row.try_get::<String, _>("status")?;
    let status = status_raw
        .parse::<VersionStatus>()
        .map_err(|_| RepositoryError::Decode(format!("unknown version status `{status_raw}`")))?;

    let configuration_raw = row.try_get::<String, _>("configuration_json")?;
    let configuration =
        serde_json::from_str::<ProcessConfiguration>(&configuration_raw).map_err(|error| {
            RepositoryError::Decode(format!("invalid configuration_json: {error}"))
        })?;

    Ok(ProcessVersion {
        id: ProcessVersionId(row.try_get("id")?),
        process_id: ProcessId(row.try_get("process_id")?),
        version: parse_u32("version", row.try_get("version")?)?,
        environment,
        status,
        deprecated_at: parse_optional_timestamp("deprecated_at", row.try_get("deprecated_at")?)?,
        configuration,
        rolled_back_from: row
            .try_get::<Option<i64>, _>("rolled_back_from")?
            .map(|value| parse_u32("rolled_back_from", value))
            .transpose()?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}
