use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use synapse_core::domain::process::{
    Environment, Process, ProcessConfiguration, ProcessId, ProcessVersion, ProcessVersionId,
    TenantId, VersionStatus,
};

use super::{apply_status, process_not_found, ProcessVersionRepository, RepositoryError};

#[derive(Default)]
struct Store {
    processes: HashMap<String, Process>,
    versions: HashMap<String, Vec<ProcessVersion>>,
}

impl Store {
    fn owned_versions_mut(
        &mut self,
        tenant_id: &TenantId,
        process_id: &ProcessId,
    ) -> Result<&mut Vec<ProcessVersion>, RepositoryError> {
        let owned = self
            .processes
            .get(&process_id.0)
            .is_some_and(|process| process.tenant_id == *tenant_id);
        if !owned {
            return Err(process_not_found(tenant_id, process_id));
        }
        Ok(self.versions.entry(process_id.0.clone()).or_default())
    }
}

/// Single lock over processes and versions so number allocation is atomic.
#[derive(Default)]
pub struct InMemoryProcessVersionRepository {
    store: RwLock<Store>,
}

#[async_trait::async_trait]
impl ProcessVersionRepository for InMemoryProcessVersionRepository {
    async fn save_process(&self, process: Process) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        store.processes.insert(process.id.0.clone(), process);
        Ok(())
    }

    async fn find_process(
        &self,
        tenant_id: &TenantId,
        process_id: &ProcessId,
    ) -> Result<Option<Process>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store
            .processes
            .get(&process_id.0)
            .filter(|process| process.tenant_id == *tenant_id)
            .cloned())
    }

    async fn list_versions(
        &self,
        tenant_id: &TenantId,
        process_id: &ProcessId,
    ) -> Result<Vec<ProcessVersion>, RepositoryError> {
        let store = self.store.read().await;
        let owned = store
            .processes
            .get(&process_id.0)
            .is_some_and(|process| process.tenant_id == *tenant_id);
        if !owned {
            return Ok(Vec::new());
        }
        let mut versions = store.versions.get(&process_id.0).cloned().unwrap_or_default();
        versions.sort_by_key(|version| version.version);
        Ok(versions)
    }

    async fn create_version(
        &self,
        tenant_id: &TenantId,
        process_id: &ProcessId,
        environment: Environment,
        configuration: ProcessConfiguration,
        now: DateTime<Utc>,
    ) -> Result<ProcessVersion, RepositoryError> {
        let mut store = self.store.write().await;
        let versions = store.owned_versions_mut(tenant_id, process_id)?;
        let version =
            ProcessVersion::draft(process_id.clone(), environment, configuration, versions, now);
        versions.push(version.clone());
        Ok(version)
    }

    async fn rollback_to(
        &self,
        tenant_id: &TenantId,
        process_id: &ProcessId,
        source_version: u32,
        now: DateTime<Utc>,
    ) -> Result<ProcessVersion, RepositoryError> {
        let mut store = self.store.write().await;
        let versions = store.owned_versions_mut(tenant_id, process_id)?;
        let source =
            versions.iter().find(|version| version.version == source_version).ok_or_else(|| {
                RepositoryError::NotFound(format!(
                    "version {source_version} of process `{}` does not exist",
                    process_id.0
                ))
            })?;
        let version = ProcessVersion::rollback_from(source, versions, now)?;
        versions.push(version.clone());
        Ok(version)
    }

    async fn set_status(
        &self,
        tenant_id: &TenantId,
        version_id: &ProcessVersionId,
        status: VersionStatus,
        now: DateTime<Utc>,
    ) -> Result<ProcessVersion, RepositoryError> {
        let mut store = self.store.write().await;
        let Store { processes, versions } = &mut *store;
        let version = versions
            .iter_mut()
            .filter(|(process_id, _)| {
                processes.get(*process_id).is_some_and(|process| process.tenant_id == *tenant_id)
            })
            .flat_map(|(_, versions)| versions.iter_mut())
            .find(|version| version.id == *version_id)
            .ok_or_else(|| {
                RepositoryError::NotFound(format!(
                    "process version `{}` does not exist",
                    version_id.0
                ))
            })?;
        apply_status(version, status, now);
        Ok(version.clone())
    }
}
