//! Catalog collaborator: datasets, environments and principals by URI.

use crate::error::StorageResult;
use shareflow_types::{
    ConsumptionRole, Dataset, Environment, EnvironmentGroup, RedshiftConnection, SharedResource,
    ShareableType,
};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Read access to catalog records owned by the surrounding platform.
pub trait CatalogRepository: Send + Sync {
    fn get_dataset(&self, dataset_uri: &str) -> StorageResult<Option<Dataset>>;

    fn get_environment(&self, environment_uri: &str) -> StorageResult<Option<Environment>>;

    fn get_environment_group(
        &self,
        group_uri: &str,
        environment_uri: &str,
    ) -> StorageResult<Option<EnvironmentGroup>>;

    fn get_consumption_role(&self, consumption_role_uri: &str) -> StorageResult<Option<ConsumptionRole>>;

    fn get_redshift_connection(&self, connection_uri: &str) -> StorageResult<Option<RedshiftConnection>>;

    fn get_shared_resource(
        &self,
        item_type: ShareableType,
        item_uri: &str,
    ) -> StorageResult<Option<SharedResource>>;
}

#[derive(Default)]
struct CatalogState {
    datasets: HashMap<String, Dataset>,
    environments: HashMap<String, Environment>,
    environment_groups: HashMap<(String, String), EnvironmentGroup>,
    consumption_roles: HashMap<String, ConsumptionRole>,
    redshift_connections: HashMap<String, RedshiftConnection>,
    resources: HashMap<(ShareableType, String), SharedResource>,
}

/// In-memory catalog for tests and local runs.
#[derive(Default)]
pub struct MemoryCatalog {
    state: RwLock<CatalogState>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, CatalogState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CatalogState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_dataset(&self, dataset: Dataset) {
        self.write().datasets.insert(dataset.dataset_uri.clone(), dataset);
    }

    pub fn add_environment(&self, environment: Environment) {
        self.write()
            .environments
            .insert(environment.environment_uri.clone(), environment);
    }

    pub fn add_environment_group(&self, group: EnvironmentGroup) {
        self.write().environment_groups.insert(
            (group.group_uri.clone(), group.environment_uri.clone()),
            group,
        );
    }

    pub fn add_consumption_role(&self, role: ConsumptionRole) {
        self.write()
            .consumption_roles
            .insert(role.consumption_role_uri.clone(), role);
    }

    pub fn add_redshift_connection(&self, connection: RedshiftConnection) {
        self.write()
            .redshift_connections
            .insert(connection.connection_uri.clone(), connection);
    }

    pub fn add_resource(&self, resource: SharedResource) {
        self.write()
            .resources
            .insert((resource.item_type(), resource.uri().to_string()), resource);
    }

    /// Drops a resource, as when a table is deleted from the source catalog.
    pub fn remove_resource(&self, item_type: ShareableType, item_uri: &str) -> bool {
        self.write()
            .resources
            .remove(&(item_type, item_uri.to_string()))
            .is_some()
    }
}

impl CatalogRepository for MemoryCatalog {
    fn get_dataset(&self, dataset_uri: &str) -> StorageResult<Option<Dataset>> {
        Ok(self.read().datasets.get(dataset_uri).cloned())
    }

    fn get_environment(&self, environment_uri: &str) -> StorageResult<Option<Environment>> {
        Ok(self.read().environments.get(environment_uri).cloned())
    }

    fn get_environment_group(
        &self,
        group_uri: &str,
        environment_uri: &str,
    ) -> StorageResult<Option<EnvironmentGroup>> {
        Ok(self
            .read()
            .environment_groups
            .get(&(group_uri.to_string(), environment_uri.to_string()))
            .cloned())
    }

    fn get_consumption_role(&self, consumption_role_uri: &str) -> StorageResult<Option<ConsumptionRole>> {
        Ok(self.read().consumption_roles.get(consumption_role_uri).cloned())
    }

    fn get_redshift_connection(&self, connection_uri: &str) -> StorageResult<Option<RedshiftConnection>> {
        Ok(self.read().redshift_connections.get(connection_uri).cloned())
    }

    fn get_shared_resource(
        &self,
        item_type: ShareableType,
        item_uri: &str,
    ) -> StorageResult<Option<SharedResource>> {
        Ok(self
            .read()
            .resources
            .get(&(item_type, item_uri.to_string()))
            .cloned())
    }
}
