//! In-memory cloud implementing every capability trait.
//!
//! Behaves like the remote services where the engine depends on it: creates
//! are strict, cross-account catalog grants open invitations that the target
//! must accept before a resource link can be created, access points take a
//! configurable number of polls to become ready, and consumer warehouse
//! databases require a datashare usage grant. Faults can be injected by
//! matching on operation keys such as `"catalog.grant 111111111111"`.

use crate::capabilities::*;
use crate::error::{CloudError, CloudResult};
use crate::policy::PolicyDocument;
use crate::types::*;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvitationStatus {
    Pending,
    Accepted,
}

#[derive(Clone, Debug)]
struct Invitation {
    source_account: String,
    target_account: String,
    status: InvitationStatus,
    rounds_remaining: u32,
}

#[derive(Clone, Debug)]
struct AccessPointRecord {
    point: AccessPoint,
    polls_remaining: u32,
    policy: Option<PolicyDocument>,
}

type AccountKey = (String, String);

#[derive(Default)]
struct CloudState {
    roles: HashMap<AccountKey, BTreeMap<String, PolicyDocument>>,
    bucket_policies: HashMap<AccountKey, PolicyDocument>,
    access_points: HashMap<AccountKey, AccessPointRecord>,
    key_aliases: HashMap<AccountKey, String>,
    key_policies: HashMap<AccountKey, PolicyDocument>,
    catalog: HashSet<(String, CatalogResource)>,
    catalog_grants: Vec<(String, CatalogGrant)>,
    invitations: Vec<Invitation>,
    warehouse_objects: BTreeSet<(String, WarehouseObject)>,
    warehouse_grants: BTreeSet<(String, WarehouseGrant)>,
    invitation_latency: u32,
    access_point_latency: u32,
    faults: Vec<String>,
    calls: Vec<String>,
}

impl CloudState {
    fn grant_index(&self, account: &str, principal: &str, resource: &CatalogResource) -> Option<usize> {
        self.catalog_grants
            .iter()
            .position(|(a, g)| a == account && g.principal == principal && &g.resource == resource)
    }

    fn invitation_accepted(&self, source: &str, target: &str) -> bool {
        self.invitations.iter().any(|i| {
            i.source_account == source && i.target_account == target && i.status == InvitationStatus::Accepted
        })
    }

    fn table_shared_with(&self, table: &TableRef, account: &str) -> bool {
        let resource = CatalogResource::Table(table.clone());
        self.grant_index(&table.catalog_id, account, &resource).is_some()
            && self.invitation_accepted(&table.catalog_id, account)
    }
}

/// Catalog objects are owned by their catalog id; links by the account holding them.
fn owner(scope: &AccountScope, resource: &CatalogResource) -> String {
    match resource {
        CatalogResource::Database { catalog_id, .. } => catalog_id.clone(),
        CatalogResource::Table(t) => t.catalog_id.clone(),
        CatalogResource::ResourceLink { .. } => scope.account_id.clone(),
    }
}

fn is_account_id(principal: &str) -> bool {
    principal.len() == 12 && principal.chars().all(|c| c.is_ascii_digit())
}

fn key(account: &str, name: &str) -> AccountKey {
    (account.to_string(), name.to_string())
}

#[derive(Default)]
pub struct MemoryCloud {
    state: Mutex<CloudState>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CloudState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the call and fails it if a fault pattern matches.
    fn enter(&self, op: String) -> CloudResult<MutexGuard<'_, CloudState>> {
        let mut state = self.state();
        let faulted = state.faults.iter().any(|f| op.contains(f.as_str()));
        state.calls.push(op.clone());
        if faulted {
            debug!("injected fault: {op}");
            return Err(CloudError::Simulated(op));
        }
        Ok(state)
    }

    // ── Setup ───────────────────────────────────────────────────

    pub fn add_role(&self, account_id: &str, role_name: &str) {
        self.state().roles.entry(key(account_id, role_name)).or_default();
    }

    pub fn remove_role(&self, account_id: &str, role_name: &str) {
        self.state().roles.remove(&key(account_id, role_name));
    }

    /// Registers a source table and its database.
    pub fn add_table(&self, account_id: &str, database: &str, table: &str) {
        let mut state = self.state();
        state
            .catalog
            .insert((account_id.to_string(), CatalogResource::database(account_id, database)));
        state
            .catalog
            .insert((account_id.to_string(), CatalogResource::table(account_id, database, table)));
    }

    pub fn remove_table(&self, account_id: &str, database: &str, table: &str) {
        self.state()
            .catalog
            .remove(&(account_id.to_string(), CatalogResource::table(account_id, database, table)));
    }

    pub fn add_key(&self, account_id: &str, alias: &str, key_id: &str) {
        let mut state = self.state();
        state.key_aliases.insert(key(account_id, alias), key_id.to_string());
        state.key_policies.entry(key(account_id, key_id)).or_default();
    }

    /// Number of failed acceptance rounds before invitations are accepted.
    pub fn set_invitation_latency(&self, rounds: u32) {
        self.state().invitation_latency = rounds;
    }

    /// Number of polls a new access point reports `Creating`.
    pub fn set_access_point_latency(&self, polls: u32) {
        self.state().access_point_latency = polls;
    }

    pub fn fail_when(&self, pattern: &str) {
        self.state().faults.push(pattern.to_string());
    }

    pub fn clear_faults(&self) {
        self.state().faults.clear();
    }

    // ── Inspection ──────────────────────────────────────────────

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn calls_matching(&self, pattern: &str) -> usize {
        self.state().calls.iter().filter(|c| c.contains(pattern)).count()
    }

    pub fn database_exists(&self, account_id: &str, database: &str) -> bool {
        self.state()
            .catalog
            .contains(&(account_id.to_string(), CatalogResource::database(account_id, database)))
    }

    pub fn resource_link_exists(&self, account_id: &str, database: &str, name: &str) -> bool {
        self.state().catalog.iter().any(|(a, r)| {
            a == account_id
                && matches!(r, CatalogResource::ResourceLink { database: d, name: n, .. } if d == database && n == name)
        })
    }

    /// Grants made in `account_id`.
    pub fn catalog_grants(&self, account_id: &str) -> Vec<CatalogGrant> {
        self.state()
            .catalog_grants
            .iter()
            .filter(|(a, _)| a == account_id)
            .map(|(_, g)| g.clone())
            .collect()
    }

    pub fn has_catalog_grant(
        &self,
        account_id: &str,
        principal: &str,
        resource: &CatalogResource,
        permission: CatalogPermission,
    ) -> bool {
        let state = self.state();
        state
            .grant_index(account_id, principal, resource)
            .is_some_and(|i| state.catalog_grants[i].1.permissions.contains(&permission))
    }

    /// Drops every grant held by `principal` in `account_id`.
    pub fn drop_catalog_grants(&self, account_id: &str, principal: &str) {
        self.state()
            .catalog_grants
            .retain(|(a, g)| !(a == account_id && g.principal == principal));
    }

    pub fn invitation_status(&self, source_account: &str, target_account: &str) -> Option<InvitationStatus> {
        self.state()
            .invitations
            .iter()
            .find(|i| i.source_account == source_account && i.target_account == target_account)
            .map(|i| i.status)
    }

    pub fn bucket_policy(&self, account_id: &str, bucket: &str) -> Option<PolicyDocument> {
        self.state().bucket_policies.get(&key(account_id, bucket)).cloned()
    }

    pub fn set_bucket_policy(&self, account_id: &str, bucket: &str, policy: PolicyDocument) {
        self.state().bucket_policies.insert(key(account_id, bucket), policy);
    }

    /// Access point as stored, without advancing its creation.
    pub fn access_point(&self, account_id: &str, name: &str) -> Option<AccessPoint> {
        self.state().access_points.get(&key(account_id, name)).map(|r| r.point.clone())
    }

    pub fn access_point_policy(&self, account_id: &str, name: &str) -> Option<PolicyDocument> {
        self.state()
            .access_points
            .get(&key(account_id, name))
            .and_then(|r| r.policy.clone())
    }

    pub fn role_policy(&self, account_id: &str, role_name: &str, policy_name: &str) -> Option<PolicyDocument> {
        self.state()
            .roles
            .get(&key(account_id, role_name))
            .and_then(|p| p.get(policy_name).cloned())
    }

    pub fn key_policy(&self, account_id: &str, key_id: &str) -> Option<PolicyDocument> {
        self.state().key_policies.get(&key(account_id, key_id)).cloned()
    }

    pub fn warehouse_objects(&self, namespace_id: &str) -> Vec<WarehouseObject> {
        self.state()
            .warehouse_objects
            .iter()
            .filter(|(ns, _)| ns == namespace_id)
            .map(|(_, o)| o.clone())
            .collect()
    }

    pub fn warehouse_grants(&self, namespace_id: &str) -> Vec<WarehouseGrant> {
        self.state()
            .warehouse_grants
            .iter()
            .filter(|(ns, _)| ns == namespace_id)
            .map(|(_, g)| g.clone())
            .collect()
    }

    pub fn drop_warehouse_grant(&self, namespace_id: &str, grant: &WarehouseGrant) {
        self.state()
            .warehouse_grants
            .remove(&(namespace_id.to_string(), grant.clone()));
    }
}

#[async_trait]
impl IdentityClient for MemoryCloud {
    async fn get_role_arn(&self, scope: &AccountScope, role_name: &str) -> CloudResult<Option<String>> {
        let state = self.enter(format!("iam.get_role {} {role_name}", scope.account_id))?;
        Ok(state
            .roles
            .contains_key(&key(&scope.account_id, role_name))
            .then(|| scope.role_arn(role_name)))
    }

    async fn get_role_policy(
        &self,
        scope: &AccountScope,
        role_name: &str,
        policy_name: &str,
    ) -> CloudResult<Option<PolicyDocument>> {
        let state = self.enter(format!("iam.get_role_policy {} {role_name}/{policy_name}", scope.account_id))?;
        Ok(state
            .roles
            .get(&key(&scope.account_id, role_name))
            .and_then(|p| p.get(policy_name).cloned()))
    }

    async fn put_role_policy(
        &self,
        scope: &AccountScope,
        role_name: &str,
        policy_name: &str,
        policy: &PolicyDocument,
    ) -> CloudResult<()> {
        let mut state = self.enter(format!("iam.put_role_policy {} {role_name}/{policy_name}", scope.account_id))?;
        let policies = state
            .roles
            .get_mut(&key(&scope.account_id, role_name))
            .ok_or_else(|| CloudError::NotFound(format!("role {role_name} in {}", scope.account_id)))?;
        policies.insert(policy_name.to_string(), policy.clone());
        Ok(())
    }

    async fn delete_role_policy(&self, scope: &AccountScope, role_name: &str, policy_name: &str) -> CloudResult<()> {
        let mut state = self.enter(format!(
            "iam.delete_role_policy {} {role_name}/{policy_name}",
            scope.account_id
        ))?;
        if let Some(policies) = state.roles.get_mut(&key(&scope.account_id, role_name)) {
            policies.remove(policy_name);
        }
        Ok(())
    }
}

#[async_trait]
impl BucketPolicyClient for MemoryCloud {
    async fn get_bucket_policy(&self, scope: &AccountScope, bucket: &str) -> CloudResult<Option<PolicyDocument>> {
        let state = self.enter(format!("s3.get_bucket_policy {} {bucket}", scope.account_id))?;
        Ok(state.bucket_policies.get(&key(&scope.account_id, bucket)).cloned())
    }

    async fn put_bucket_policy(&self, scope: &AccountScope, bucket: &str, policy: &PolicyDocument) -> CloudResult<()> {
        let mut state = self.enter(format!("s3.put_bucket_policy {} {bucket}", scope.account_id))?;
        state.bucket_policies.insert(key(&scope.account_id, bucket), policy.clone());
        Ok(())
    }
}

#[async_trait]
impl AccessPointClient for MemoryCloud {
    async fn get_access_point(&self, scope: &AccountScope, name: &str) -> CloudResult<Option<AccessPoint>> {
        let mut state = self.enter(format!("s3.get_access_point {} {name}", scope.account_id))?;
        let Some(record) = state.access_points.get_mut(&key(&scope.account_id, name)) else {
            return Ok(None);
        };
        if record.polls_remaining > 0 {
            record.polls_remaining -= 1;
        } else {
            record.point.status = AccessPointStatus::Ready;
        }
        Ok(Some(record.point.clone()))
    }

    async fn create_access_point(&self, scope: &AccountScope, bucket: &str, name: &str) -> CloudResult<AccessPoint> {
        let mut state = self.enter(format!("s3.create_access_point {} {name}", scope.account_id))?;
        let k = key(&scope.account_id, name);
        if state.access_points.contains_key(&k) {
            return Err(CloudError::AlreadyExists(format!("access point {name}")));
        }
        let polls_remaining = state.access_point_latency;
        let point = AccessPoint {
            name: name.to_string(),
            bucket: bucket.to_string(),
            arn: scope.access_point_arn(name),
            status: if polls_remaining > 0 {
                AccessPointStatus::Creating
            } else {
                AccessPointStatus::Ready
            },
        };
        state.access_points.insert(
            k,
            AccessPointRecord {
                point: point.clone(),
                polls_remaining,
                policy: None,
            },
        );
        Ok(point)
    }

    async fn delete_access_point(&self, scope: &AccountScope, name: &str) -> CloudResult<()> {
        let mut state = self.enter(format!("s3.delete_access_point {} {name}", scope.account_id))?;
        state.access_points.remove(&key(&scope.account_id, name));
        Ok(())
    }

    async fn get_access_point_policy(&self, scope: &AccountScope, name: &str) -> CloudResult<Option<PolicyDocument>> {
        let state = self.enter(format!("s3.get_access_point_policy {} {name}", scope.account_id))?;
        Ok(state
            .access_points
            .get(&key(&scope.account_id, name))
            .and_then(|r| r.policy.clone()))
    }

    async fn put_access_point_policy(&self, scope: &AccountScope, name: &str, policy: &PolicyDocument) -> CloudResult<()> {
        let mut state = self.enter(format!("s3.put_access_point_policy {} {name}", scope.account_id))?;
        let record = state
            .access_points
            .get_mut(&key(&scope.account_id, name))
            .ok_or_else(|| CloudError::NotFound(format!("access point {name}")))?;
        record.policy = Some(policy.clone());
        Ok(())
    }
}

#[async_trait]
impl KeyPolicyClient for MemoryCloud {
    async fn get_key_id(&self, scope: &AccountScope, alias: &str) -> CloudResult<Option<String>> {
        let state = self.enter(format!("kms.get_key_id {} {alias}", scope.account_id))?;
        Ok(state.key_aliases.get(&key(&scope.account_id, alias)).cloned())
    }

    async fn get_key_policy(&self, scope: &AccountScope, key_id: &str) -> CloudResult<PolicyDocument> {
        let state = self.enter(format!("kms.get_key_policy {} {key_id}", scope.account_id))?;
        state
            .key_policies
            .get(&key(&scope.account_id, key_id))
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("key {key_id}")))
    }

    async fn put_key_policy(&self, scope: &AccountScope, key_id: &str, policy: &PolicyDocument) -> CloudResult<()> {
        let mut state = self.enter(format!("kms.put_key_policy {} {key_id}", scope.account_id))?;
        let stored = state
            .key_policies
            .get_mut(&key(&scope.account_id, key_id))
            .ok_or_else(|| CloudError::NotFound(format!("key {key_id}")))?;
        *stored = policy.clone();
        Ok(())
    }
}

#[async_trait]
impl DataCatalogClient for MemoryCloud {
    async fn resource_exists(&self, scope: &AccountScope, resource: &CatalogResource) -> CloudResult<bool> {
        let state = self.enter(format!("catalog.exists {} {resource}", scope.account_id))?;
        Ok(state.catalog.contains(&(owner(scope, resource), resource.clone())))
    }

    async fn create_resource(&self, scope: &AccountScope, resource: &CatalogResource) -> CloudResult<()> {
        let mut state = self.enter(format!("catalog.create {} {resource}", scope.account_id))?;
        let entry = (owner(scope, resource), resource.clone());
        if state.catalog.contains(&entry) {
            return Err(CloudError::AlreadyExists(resource.to_string()));
        }
        if let CatalogResource::ResourceLink { target, .. } = resource {
            if target.catalog_id != scope.account_id && !state.table_shared_with(target, &scope.account_id) {
                return Err(CloudError::Catalog(format!(
                    "table {}.{} of {} is not shared with {}",
                    target.database, target.table, target.catalog_id, scope.account_id
                )));
            }
        }
        state.catalog.insert(entry);
        Ok(())
    }

    async fn delete_resource(&self, scope: &AccountScope, resource: &CatalogResource) -> CloudResult<()> {
        let mut state = self.enter(format!("catalog.delete {} {resource}", scope.account_id))?;
        state.catalog.remove(&(owner(scope, resource), resource.clone()));
        state
            .catalog_grants
            .retain(|(a, g)| !(a == &scope.account_id && &g.resource == resource));
        Ok(())
    }

    async fn grant(&self, scope: &AccountScope, grant: &CatalogGrant) -> CloudResult<()> {
        let mut state = self.enter(format!(
            "catalog.grant {} {} to {}",
            scope.account_id, grant.resource, grant.principal
        ))?;
        if !state.catalog.contains(&(owner(scope, &grant.resource), grant.resource.clone())) {
            return Err(CloudError::NotFound(grant.resource.to_string()));
        }
        match state.grant_index(&scope.account_id, &grant.principal, &grant.resource) {
            Some(i) => state.catalog_grants[i].1.permissions.extend(grant.permissions.iter().copied()),
            None => state.catalog_grants.push((scope.account_id.clone(), grant.clone())),
        }

        if is_account_id(&grant.principal) && grant.principal != scope.account_id {
            let exists = state
                .invitations
                .iter()
                .any(|i| i.source_account == scope.account_id && i.target_account == grant.principal);
            if !exists {
                let rounds_remaining = state.invitation_latency;
                state.invitations.push(Invitation {
                    source_account: scope.account_id.clone(),
                    target_account: grant.principal.clone(),
                    status: InvitationStatus::Pending,
                    rounds_remaining,
                });
            }
        }
        Ok(())
    }

    async fn revoke(&self, scope: &AccountScope, grant: &CatalogGrant) -> CloudResult<()> {
        let mut state = self.enter(format!(
            "catalog.revoke {} {} from {}",
            scope.account_id, grant.resource, grant.principal
        ))?;
        if let Some(i) = state.grant_index(&scope.account_id, &grant.principal, &grant.resource) {
            let held = &mut state.catalog_grants[i].1.permissions;
            held.retain(|p| !grant.permissions.contains(p));
            if held.is_empty() {
                state.catalog_grants.remove(i);
            }
        }
        Ok(())
    }

    async fn list_grants(&self, scope: &AccountScope, resource: &CatalogResource) -> CloudResult<Vec<CatalogGrant>> {
        let state = self.enter(format!("catalog.list_grants {} {resource}", scope.account_id))?;
        Ok(state
            .catalog_grants
            .iter()
            .filter(|(a, g)| a == &scope.account_id && &g.resource == resource)
            .map(|(_, g)| g.clone())
            .collect())
    }
}

#[async_trait]
impl ResourceShareClient for MemoryCloud {
    async fn accept_invitations(&self, target: &AccountScope, source_account: &str) -> CloudResult<InvitationOutcome> {
        let mut state = self.enter(format!("ram.accept {} from {source_account}", target.account_id))?;
        let mut outcome = InvitationOutcome::default();
        for invitation in state.invitations.iter_mut().filter(|i| {
            i.source_account == source_account
                && i.target_account == target.account_id
                && i.status == InvitationStatus::Pending
        }) {
            if invitation.rounds_remaining == 0 {
                invitation.status = InvitationStatus::Accepted;
                outcome.accepted += 1;
            } else {
                invitation.rounds_remaining -= 1;
                outcome.pending += 1;
            }
        }
        Ok(outcome)
    }
}

#[async_trait]
impl WarehouseClient for MemoryCloud {
    async fn object_exists(&self, conn: &WarehouseConnection, object: &WarehouseObject) -> CloudResult<bool> {
        let state = self.enter(format!("warehouse.exists {} {object}", conn.namespace_id))?;
        Ok(state
            .warehouse_objects
            .contains(&(conn.namespace_id.clone(), object.clone())))
    }

    async fn create_object(&self, conn: &WarehouseConnection, object: &WarehouseObject) -> CloudResult<()> {
        let mut state = self.enter(format!("warehouse.create {} {object}", conn.namespace_id))?;
        let ns = conn.namespace_id.clone();
        if state.warehouse_objects.contains(&(ns.clone(), object.clone())) {
            return Err(CloudError::AlreadyExists(object.to_string()));
        }
        let has = |o: WarehouseObject| state.warehouse_objects.contains(&(ns.clone(), o));
        let ready = match object {
            WarehouseObject::Datashare { .. } => true,
            WarehouseObject::DatashareSchema { datashare, .. } | WarehouseObject::DatashareTable { datashare, .. } => {
                has(WarehouseObject::Datashare { name: datashare.clone() })
            }
            WarehouseObject::DatashareDatabase {
                datashare,
                producer_namespace,
                ..
            } => state.warehouse_grants.contains(&(
                producer_namespace.clone(),
                WarehouseGrant::DatashareUsage {
                    datashare: datashare.clone(),
                    consumer_namespace: ns.clone(),
                },
            )),
            WarehouseObject::ExternalSchema { database, .. } => state
                .warehouse_objects
                .iter()
                .any(|(n, o)| n == &ns && matches!(o, WarehouseObject::DatashareDatabase { database: d, .. } if d == database)),
        };
        if !ready {
            return Err(CloudError::Warehouse(format!("prerequisite missing for {object}")));
        }
        state.warehouse_objects.insert((ns, object.clone()));
        Ok(())
    }

    async fn drop_object(&self, conn: &WarehouseConnection, object: &WarehouseObject) -> CloudResult<()> {
        let mut state = self.enter(format!("warehouse.drop {} {object}", conn.namespace_id))?;
        let ns = conn.namespace_id.clone();
        state.warehouse_objects.remove(&(ns.clone(), object.clone()));
        if let WarehouseObject::Datashare { name } = object {
            state.warehouse_objects.retain(|(n, o)| {
                !(n == &ns
                    && matches!(o, WarehouseObject::DatashareSchema { datashare, .. }
                        | WarehouseObject::DatashareTable { datashare, .. } if datashare == name))
            });
            state.warehouse_grants.retain(|(n, g)| {
                !(n == &ns && matches!(g, WarehouseGrant::DatashareUsage { datashare, .. } if datashare == name))
            });
        }
        Ok(())
    }

    async fn grant(&self, conn: &WarehouseConnection, grant: &WarehouseGrant) -> CloudResult<()> {
        let mut state = self.enter(format!("warehouse.grant {} {grant}", conn.namespace_id))?;
        state.warehouse_grants.insert((conn.namespace_id.clone(), grant.clone()));
        Ok(())
    }

    async fn revoke(&self, conn: &WarehouseConnection, grant: &WarehouseGrant) -> CloudResult<()> {
        let mut state = self.enter(format!("warehouse.revoke {} {grant}", conn.namespace_id))?;
        state.warehouse_grants.remove(&(conn.namespace_id.clone(), grant.clone()));
        Ok(())
    }

    async fn list_grants(&self, conn: &WarehouseConnection) -> CloudResult<Vec<WarehouseGrant>> {
        let state = self.enter(format!("warehouse.list_grants {}", conn.namespace_id))?;
        Ok(state
            .warehouse_grants
            .iter()
            .filter(|(ns, _)| ns == &conn.namespace_id)
            .map(|(_, g)| g.clone())
            .collect())
    }
}
