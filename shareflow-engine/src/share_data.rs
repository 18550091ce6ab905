//! Per-run snapshot of a share and the catalog records around it.

use crate::error::{EngineError, EngineResult};
use shareflow_cloud::AccountScope;
use shareflow_storage::{CatalogRepository, ShareStore};
use shareflow_types::{
    Dataset, Environment, EnvironmentGroup, LockKey, LockResourceType, PrincipalType, ShareObject,
};

/// Everything processors need about a share, loaded once per run.
#[derive(Clone, Debug)]
pub struct ShareData {
    pub share: ShareObject,
    pub dataset: Dataset,
    pub source_environment: Environment,
    pub target_environment: Environment,
    /// The dataset admin team in the source environment.
    pub source_env_group: Option<EnvironmentGroup>,
    /// The requesting team in the target environment.
    pub env_group: Option<EnvironmentGroup>,
}

impl ShareData {
    pub fn load(store: &ShareStore, catalog: &dyn CatalogRepository, share_uri: &str) -> EngineResult<Self> {
        let share = store
            .get_share(share_uri)?
            .ok_or_else(|| EngineError::not_found(format!("share {share_uri}")))?;
        let dataset = catalog
            .get_dataset(&share.dataset_uri)?
            .ok_or_else(|| EngineError::not_found(format!("dataset {}", share.dataset_uri)))?;
        let source_environment = catalog
            .get_environment(&dataset.environment_uri)?
            .ok_or_else(|| EngineError::not_found(format!("environment {}", dataset.environment_uri)))?;
        let target_environment = catalog
            .get_environment(&share.environment_uri)?
            .ok_or_else(|| EngineError::not_found(format!("environment {}", share.environment_uri)))?;
        let source_env_group = catalog.get_environment_group(&dataset.admin_group, &dataset.environment_uri)?;
        let env_group = catalog.get_environment_group(&share.group_uri, &share.environment_uri)?;
        Ok(Self {
            share,
            dataset,
            source_environment,
            target_environment,
            source_env_group,
            env_group,
        })
    }

    pub fn share_uri(&self) -> &str {
        &self.share.share_uri
    }

    /// Account and region holding the dataset.
    pub fn source_scope(&self) -> AccountScope {
        AccountScope::new(&self.dataset.aws_account_id, &self.dataset.region)
    }

    /// Account and region the principal consumes from.
    pub fn target_scope(&self) -> AccountScope {
        AccountScope::new(&self.target_environment.aws_account_id, &self.target_environment.region)
    }

    pub fn is_cross_account(&self) -> bool {
        self.dataset.aws_account_id != self.target_environment.aws_account_id
    }

    pub fn principal_role_name(&self) -> &str {
        self.share.role_name()
    }

    pub fn principal_role_arn(&self) -> String {
        self.target_scope().role_arn(self.principal_role_name())
    }

    /// The resources a mutating run serializes on: the dataset and the principal scope.
    pub fn lock_keys(&self) -> Vec<LockKey> {
        let share = &self.share;
        let principal = match share.principal_type {
            PrincipalType::ConsumptionRole => LockKey::new(&share.principal_id, LockResourceType::ConsumptionRole),
            PrincipalType::Group => LockKey::new(
                format!("{}-{}", share.principal_id, share.environment_uri),
                LockResourceType::EnvironmentGroup,
            ),
            PrincipalType::RedshiftRole => LockKey::new(
                format!("{}-{}", share.principal_id, share.role_name()),
                LockResourceType::RedshiftRole,
            ),
        };
        vec![LockKey::new(&self.dataset.dataset_uri, LockResourceType::Dataset), principal]
    }
}
