//! Share object and share item persistence.

use crate::error::{StorageError, StorageResult, map_constraint};
use crate::rows::{ITEM_COLUMNS, SHARE_COLUMNS, item_from_row, share_from_row, ts, ts_opt};
use crate::schema::initialize_share_schema;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use shareflow_types::{
    ShareItemHealthStatus, ShareItemStatus, ShareObject, ShareObjectItem, ShareObjectStatus,
    ShareStatistics, ShareableType,
};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Selects share items within one share.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ItemFilter {
    pub item_type: Option<ShareableType>,
    pub statuses: Vec<ShareItemStatus>,
    pub health: Option<ShareItemHealthStatus>,
    pub item_uris: Vec<String>,
}

impl ItemFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn of_type(mut self, item_type: ShareableType) -> Self {
        self.item_type = Some(item_type);
        self
    }

    pub fn with_status(mut self, status: ShareItemStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn with_statuses(mut self, statuses: &[ShareItemStatus]) -> Self {
        self.statuses.extend_from_slice(statuses);
        self
    }

    pub fn with_health(mut self, health: ShareItemHealthStatus) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_item_uris(mut self, uris: &[String]) -> Self {
        self.item_uris.extend_from_slice(uris);
        self
    }

    /// Appends `AND ...` clauses for this filter to `sql`, pushing bind values.
    fn push_clauses(&self, sql: &mut String, values: &mut Vec<String>) {
        if let Some(item_type) = self.item_type {
            sql.push_str(" AND item_type = ?");
            values.push(item_type.as_str().to_string());
        }
        if !self.statuses.is_empty() {
            push_in_clause(sql, "status", self.statuses.len());
            values.extend(self.statuses.iter().map(|s| s.as_str().to_string()));
        }
        if let Some(health) = self.health {
            sql.push_str(" AND health_status = ?");
            values.push(health.as_str().to_string());
        }
        if !self.item_uris.is_empty() {
            push_in_clause(sql, "item_uri", self.item_uris.len());
            values.extend(self.item_uris.iter().cloned());
        }
    }
}

fn push_in_clause(sql: &mut String, column: &str, n: usize) {
    let placeholders = vec!["?"; n].join(", ");
    sql.push_str(&format!(" AND {column} IN ({placeholders})"));
}

fn status_values(statuses: &[ShareItemStatus]) -> impl Iterator<Item = String> + '_ {
    statuses.iter().map(|s| s.as_str().to_string())
}

/// Share store backed by SQLite.
///
/// Holds share objects, their items and the resource lock table.
#[derive(Clone)]
pub struct ShareStore {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl ShareStore {
    /// Opens or creates a share store at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = crate::open_sqlite(path)?;
        initialize_share_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory share store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_share_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    // ── Share objects ───────────────────────────────────────────

    pub fn insert_share(&self, share: &ShareObject) -> StorageResult<()> {
        let conn = self.conn()?;
        let permissions = serde_json::to_string(&share.permissions)?;
        conn.execute(
            &format!(
                "INSERT INTO share_object ({SHARE_COLUMNS}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)"
            ),
            params![
                share.share_uri,
                share.dataset_uri,
                share.environment_uri,
                share.group_uri,
                share.principal_id,
                share.principal_type.as_str(),
                share.principal_role_name,
                share.owner,
                share.status.as_str(),
                permissions,
                share.request_purpose,
                share.reject_purpose,
                share.extension_reason,
                ts(share.created),
                ts(share.updated),
                ts_opt(share.expiry_date),
                ts_opt(share.requested_expiry_date),
                share.share_expiration_period,
                share.non_expirable,
                share.submitted_for_extension,
                ts_opt(share.last_extension_date),
            ],
        )
        .map_err(|e| {
            map_constraint(e, || {
                format!(
                    "share for dataset {} and principal {} already exists",
                    share.dataset_uri, share.principal_id
                )
            })
        })?;
        debug!("inserted share {} ({})", share.share_uri, share.status);
        Ok(())
    }

    pub fn get_share(&self, share_uri: &str) -> StorageResult<Option<ShareObject>> {
        let conn = self.conn()?;
        let share = conn
            .query_row(
                &format!("SELECT {SHARE_COLUMNS} FROM share_object WHERE share_uri = ?1"),
                params![share_uri],
                share_from_row,
            )
            .optional()?;
        Ok(share)
    }

    /// Loads a share that must exist.
    pub fn require_share(&self, share_uri: &str) -> StorageResult<ShareObject> {
        self.get_share(share_uri)?
            .ok_or_else(|| StorageError::NotFound(format!("share {share_uri}")))
    }

    /// Writes every mutable column of a share and bumps `updated`.
    pub fn update_share(&self, share: &ShareObject) -> StorageResult<()> {
        let conn = self.conn()?;
        let permissions = serde_json::to_string(&share.permissions)?;
        let changed = conn.execute(
            "UPDATE share_object SET status = ?2, permissions = ?3, principal_role_name = ?4, \
             request_purpose = ?5, reject_purpose = ?6, extension_reason = ?7, updated = ?8, \
             expiry_date = ?9, requested_expiry_date = ?10, share_expiration_period = ?11, \
             non_expirable = ?12, submitted_for_extension = ?13, last_extension_date = ?14 \
             WHERE share_uri = ?1",
            params![
                share.share_uri,
                share.status.as_str(),
                permissions,
                share.principal_role_name,
                share.request_purpose,
                share.reject_purpose,
                share.extension_reason,
                ts(Utc::now()),
                ts_opt(share.expiry_date),
                ts_opt(share.requested_expiry_date),
                share.share_expiration_period,
                share.non_expirable,
                share.submitted_for_extension,
                ts_opt(share.last_extension_date),
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("share {}", share.share_uri)));
        }
        Ok(())
    }

    pub fn update_share_status(&self, share_uri: &str, status: ShareObjectStatus) -> StorageResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE share_object SET status = ?2, updated = ?3 WHERE share_uri = ?1",
            params![share_uri, status.as_str(), ts(Utc::now())],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("share {share_uri}")));
        }
        debug!("share {share_uri} -> {status}");
        Ok(())
    }

    /// Physically removes a share and any remaining items.
    pub fn delete_share(&self, share_uri: &str) -> StorageResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM share_object_item WHERE share_uri = ?1", params![share_uri])?;
        let removed = tx.execute("DELETE FROM share_object WHERE share_uri = ?1", params![share_uri])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    /// Finds the live share of a dataset for a principal in a target environment.
    pub fn find_share(
        &self,
        dataset_uri: &str,
        environment_uri: &str,
        principal_id: &str,
        group_uri: &str,
    ) -> StorageResult<Option<ShareObject>> {
        let conn = self.conn()?;
        let share = conn
            .query_row(
                &format!(
                    "SELECT {SHARE_COLUMNS} FROM share_object WHERE dataset_uri = ?1 \
                     AND environment_uri = ?2 AND principal_id = ?3 AND group_uri = ?4 \
                     AND status <> 'Deleted'"
                ),
                params![dataset_uri, environment_uri, principal_id, group_uri],
                share_from_row,
            )
            .optional()?;
        Ok(share)
    }

    fn query_shares(&self, sql: &str, values: Vec<String>) -> StorageResult<Vec<ShareObject>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let shares = stmt
            .query_map(params_from_iter(values.iter()), share_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(shares)
    }

    pub fn list_shares_for_dataset(&self, dataset_uri: &str) -> StorageResult<Vec<ShareObject>> {
        self.query_shares(
            &format!("SELECT {SHARE_COLUMNS} FROM share_object WHERE dataset_uri = ? ORDER BY created"),
            vec![dataset_uri.to_string()],
        )
    }

    /// Shares holding at least one item in a shared state.
    pub fn list_active_shares(&self) -> StorageResult<Vec<ShareObject>> {
        self.list_active(None)
    }

    pub fn list_active_shares_for_dataset(&self, dataset_uri: &str) -> StorageResult<Vec<ShareObject>> {
        self.list_active(Some(dataset_uri))
    }

    fn list_active(&self, dataset_uri: Option<&str>) -> StorageResult<Vec<ShareObject>> {
        let mut sql = format!(
            "SELECT {SHARE_COLUMNS} FROM share_object s WHERE s.status <> 'Deleted' \
             AND EXISTS (SELECT 1 FROM share_object_item i WHERE i.share_uri = s.share_uri"
        );
        let mut values: Vec<String> = Vec::new();
        push_in_clause(&mut sql, "i.status", ShareItemStatus::SHARED.len());
        values.extend(status_values(ShareItemStatus::SHARED));
        sql.push(')');
        if let Some(uri) = dataset_uri {
            sql.push_str(" AND s.dataset_uri = ?");
            values.push(uri.to_string());
        }
        sql.push_str(" ORDER BY s.created");
        self.query_shares(&sql, values)
    }

    /// Processed, expirable shares whose expiry date is before `now`.
    pub fn list_expired_shares(&self, now: DateTime<Utc>) -> StorageResult<Vec<ShareObject>> {
        self.query_shares(
            &format!(
                "SELECT {SHARE_COLUMNS} FROM share_object WHERE status = 'Processed' \
                 AND non_expirable = 0 AND expiry_date IS NOT NULL AND expiry_date < ? \
                 ORDER BY expiry_date"
            ),
            vec![ts(now)],
        )
    }

    // ── Share items ─────────────────────────────────────────────

    pub fn insert_item(&self, item: &ShareObjectItem) -> StorageResult<()> {
        let conn = self.conn()?;
        insert_item_row(&conn, item)?;
        debug!("added {} item {} to share {}", item.item_type, item.item_uri, item.share_uri);
        Ok(())
    }

    /// Inserts `item` and moves its share to `share_status` in one transaction.
    pub fn insert_item_with_share_status(
        &self,
        item: &ShareObjectItem,
        share_status: Option<ShareObjectStatus>,
    ) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if let Some(status) = share_status {
            set_share_status(&tx, &item.share_uri, status, &ts(Utc::now()))?;
        }
        insert_item_row(&tx, item)?;
        tx.commit()?;
        debug!(
            "added {} item {} to share {} (share status {:?})",
            item.item_type, item.item_uri, item.share_uri, share_status
        );
        Ok(())
    }

    pub fn get_item(&self, share_item_uri: &str) -> StorageResult<Option<ShareObjectItem>> {
        let conn = self.conn()?;
        let item = conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM share_object_item WHERE share_item_uri = ?1"),
                params![share_item_uri],
                item_from_row,
            )
            .optional()?;
        Ok(item)
    }

    pub fn find_item(&self, share_uri: &str, item_uri: &str) -> StorageResult<Option<ShareObjectItem>> {
        let conn = self.conn()?;
        let item = conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM share_object_item WHERE share_uri = ?1 AND item_uri = ?2"),
                params![share_uri, item_uri],
                item_from_row,
            )
            .optional()?;
        Ok(item)
    }

    pub fn delete_item(&self, share_item_uri: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM share_object_item WHERE share_item_uri = ?1",
            params![share_item_uri],
        )?;
        Ok(removed > 0)
    }

    pub fn list_items(&self, share_uri: &str, filter: &ItemFilter) -> StorageResult<Vec<ShareObjectItem>> {
        let mut sql = format!("SELECT {ITEM_COLUMNS} FROM share_object_item WHERE share_uri = ?");
        let mut values = vec![share_uri.to_string()];
        filter.push_clauses(&mut sql, &mut values);
        sql.push_str(" ORDER BY created, share_item_uri");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params_from_iter(values.iter()), item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn count_items(&self, share_uri: &str, filter: &ItemFilter) -> StorageResult<usize> {
        let mut sql = "SELECT COUNT(*) FROM share_object_item WHERE share_uri = ?".to_string();
        let mut values = vec![share_uri.to_string()];
        filter.push_clauses(&mut sql, &mut values);

        let conn = self.conn()?;
        let count: i64 = conn.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn has_items(&self, share_uri: &str, filter: &ItemFilter) -> StorageResult<bool> {
        Ok(self.count_items(share_uri, filter)? > 0)
    }

    /// Distinct item statuses present in a share.
    pub fn item_states(&self, share_uri: &str) -> StorageResult<Vec<ShareItemStatus>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT status FROM share_object_item WHERE share_uri = ?1")?;
        let raw = stmt
            .query_map(params![share_uri], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut states = Vec::with_capacity(raw.len());
        for value in raw {
            let status = value.parse::<ShareItemStatus>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
            })?;
            states.push(status);
        }
        states.sort();
        Ok(states)
    }

    pub fn statistics(&self, share_uri: &str) -> StorageResult<ShareStatistics> {
        Ok(ShareStatistics {
            shared_items: self.count_items(share_uri, &ItemFilter::any().with_statuses(ShareItemStatus::SHARED))?,
            revoked_items: self.count_items(
                share_uri,
                &ItemFilter::any().with_status(ShareItemStatus::RevokeSucceeded),
            )?,
            failed_items: self.count_items(
                share_uri,
                &ItemFilter::any()
                    .with_statuses(&[ShareItemStatus::ShareFailed, ShareItemStatus::RevokeFailed]),
            )?,
            pending_items: self.count_items(
                share_uri,
                &ItemFilter::any().with_status(ShareItemStatus::PendingApproval),
            )?,
        })
    }

    // ── Status updates ──────────────────────────────────────────

    /// Sets one item's status. A Deleted target removes the row.
    pub fn update_item_status(&self, share_item_uri: &str, status: ShareItemStatus) -> StorageResult<()> {
        let conn = self.conn()?;
        let changed = if status == ShareItemStatus::Deleted {
            conn.execute(
                "DELETE FROM share_object_item WHERE share_item_uri = ?1",
                params![share_item_uri],
            )?
        } else {
            conn.execute(
                "UPDATE share_object_item SET status = ?2, updated = ?3 WHERE share_item_uri = ?1",
                params![share_item_uri, status.as_str(), ts(Utc::now())],
            )?
        };
        if changed == 0 {
            return Err(StorageError::NotFound(format!("share item {share_item_uri}")));
        }
        debug!("share item {share_item_uri} -> {status}");
        Ok(())
    }

    /// Moves every item of a share in `old` (optionally of one type) to `new`.
    pub fn update_item_status_batch(
        &self,
        share_uri: &str,
        old: ShareItemStatus,
        new: ShareItemStatus,
        item_type: Option<ShareableType>,
    ) -> StorageResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let changed = batch_status(&tx, share_uri, old, new, item_type)?;
        tx.commit()?;
        if changed > 0 {
            debug!("share {share_uri}: {changed} items {old} -> {new}");
        }
        Ok(changed)
    }

    /// Persists an object status together with item status moves in one transaction.
    ///
    /// Item moves are resolved against the rows present before any move is applied,
    /// so `(a -> b)` and `(b -> c)` in the same call never chain.
    pub fn apply_status_changes(
        &self,
        share_uri: &str,
        object_status: Option<ShareObjectStatus>,
        item_changes: &[(ShareItemStatus, ShareItemStatus)],
    ) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut planned: Vec<(Vec<String>, ShareItemStatus)> = Vec::new();
        for (old, new) in item_changes.iter().filter(|(old, new)| old != new) {
            let mut stmt = tx.prepare(
                "SELECT share_item_uri FROM share_object_item WHERE share_uri = ?1 AND status = ?2",
            )?;
            let uris = stmt
                .query_map(params![share_uri, old.as_str()], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            planned.push((uris, *new));
        }

        let now = ts(Utc::now());
        for (uris, new) in &planned {
            for uri in uris {
                set_item_status(&tx, uri, *new, &now)?;
            }
        }

        if let Some(status) = object_status {
            set_share_status(&tx, share_uri, status, &now)?;
        }

        tx.commit()?;
        debug!(
            "share {share_uri}: applied object={:?} items={:?}",
            object_status, item_changes
        );
        Ok(())
    }

    /// Persists an object status together with per-item moves in one transaction.
    ///
    /// Fails without persisting anything when an item is not part of the share.
    pub fn apply_item_status_changes(
        &self,
        share_uri: &str,
        object_status: Option<ShareObjectStatus>,
        item_moves: &[(String, ShareItemStatus)],
    ) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = ts(Utc::now());

        for (share_item_uri, status) in item_moves {
            let in_share = tx
                .query_row(
                    "SELECT 1 FROM share_object_item WHERE share_item_uri = ?1 AND share_uri = ?2",
                    params![share_item_uri, share_uri],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !in_share {
                return Err(StorageError::NotFound(format!("share item {share_item_uri} in share {share_uri}")));
            }
            set_item_status(&tx, share_item_uri, *status, &now)?;
        }

        if let Some(status) = object_status {
            set_share_status(&tx, share_uri, status, &now)?;
        }

        tx.commit()?;
        debug!(
            "share {share_uri}: applied object={:?} to {} items",
            object_status,
            item_moves.len()
        );
        Ok(())
    }

    // ── Health updates ──────────────────────────────────────────

    /// Sets one item's health. `verified_at` is kept when `None`.
    pub fn update_item_health(
        &self,
        share_item_uri: &str,
        health: Option<ShareItemHealthStatus>,
        message: Option<&str>,
        verified_at: Option<DateTime<Utc>>,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE share_object_item SET health_status = ?2, health_message = ?3, \
             last_verification_time = COALESCE(?4, last_verification_time), updated = ?5 \
             WHERE share_item_uri = ?1",
            params![
                share_item_uri,
                health.map(|h| h.as_str()),
                message,
                ts_opt(verified_at),
                ts(Utc::now()),
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("share item {share_item_uri}")));
        }
        Ok(())
    }

    /// Sets health on every item of a share matching `filter`.
    pub fn update_item_health_where(
        &self,
        share_uri: &str,
        filter: &ItemFilter,
        health: ShareItemHealthStatus,
        message: Option<&str>,
        verified_at: Option<DateTime<Utc>>,
    ) -> StorageResult<usize> {
        let mut sql = "UPDATE share_object_item SET health_status = ?, health_message = ?, \
                       last_verification_time = COALESCE(?, last_verification_time), updated = ? \
                       WHERE share_uri = ?"
            .to_string();
        let mut values: Vec<Option<String>> = vec![
            Some(health.as_str().to_string()),
            message.map(str::to_string),
            ts_opt(verified_at),
            Some(ts(Utc::now())),
            Some(share_uri.to_string()),
        ];
        let mut filter_values = Vec::new();
        filter.push_clauses(&mut sql, &mut filter_values);
        values.extend(filter_values.into_iter().map(Some));

        let conn = self.conn()?;
        let changed = conn.execute(&sql, params_from_iter(values.iter()))?;
        if changed > 0 {
            debug!("share {share_uri}: {changed} items health -> {health}");
        }
        Ok(changed)
    }

    // ── Cross-share references ──────────────────────────────────

    /// Items of other shares in `environment_uri` that reference `item_uri` in one of `states`.
    pub fn count_item_references_in_environment(
        &self,
        environment_uri: &str,
        item_uri: &str,
        exclude_share_item_uri: &str,
        states: &[ShareItemStatus],
    ) -> StorageResult<usize> {
        let mut sql = "SELECT COUNT(*) FROM share_object_item i \
                       JOIN share_object s ON s.share_uri = i.share_uri \
                       WHERE s.environment_uri = ? AND i.item_uri = ? AND i.share_item_uri <> ?"
            .to_string();
        let mut values = vec![
            environment_uri.to_string(),
            item_uri.to_string(),
            exclude_share_item_uri.to_string(),
        ];
        push_in_clause(&mut sql, "i.status", states.len());
        values.extend(status_values(states));
        self.count(&sql, values)
    }

    /// Items of `item_type` from `dataset_uri` shared into `environment_uri` by any share.
    pub fn count_dataset_items_in_environment(
        &self,
        dataset_uri: &str,
        environment_uri: &str,
        item_type: ShareableType,
        states: &[ShareItemStatus],
    ) -> StorageResult<usize> {
        let mut sql = "SELECT COUNT(*) FROM share_object_item i \
                       JOIN share_object s ON s.share_uri = i.share_uri \
                       WHERE s.dataset_uri = ? AND s.environment_uri = ? AND i.item_type = ?"
            .to_string();
        let mut values = vec![
            dataset_uri.to_string(),
            environment_uri.to_string(),
            item_type.as_str().to_string(),
        ];
        push_in_clause(&mut sql, "i.status", states.len());
        values.extend(status_values(states));
        self.count(&sql, values)
    }

    /// Shares of `dataset_uri` holding items of `item_type` in one of `states`.
    ///
    /// With `item_uri` set, only shares holding that resource are returned.
    pub fn list_shares_holding(
        &self,
        dataset_uri: &str,
        item_type: ShareableType,
        item_uri: Option<&str>,
        states: &[ShareItemStatus],
    ) -> StorageResult<Vec<ShareObject>> {
        let mut sql = format!(
            "SELECT {SHARE_COLUMNS} FROM share_object s WHERE s.dataset_uri = ? \
             AND EXISTS (SELECT 1 FROM share_object_item i WHERE i.share_uri = s.share_uri \
             AND i.item_type = ?"
        );
        let mut values = vec![dataset_uri.to_string(), item_type.as_str().to_string()];
        if let Some(uri) = item_uri {
            sql.push_str(" AND i.item_uri = ?");
            values.push(uri.to_string());
        }
        push_in_clause(&mut sql, "i.status", states.len());
        values.extend(status_values(states));
        sql.push_str(") ORDER BY s.created");
        self.query_shares(&sql, values)
    }

    fn count(&self, sql: &str, values: Vec<String>) -> StorageResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(sql, params_from_iter(values.iter()), |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

fn insert_item_row(conn: &Connection, item: &ShareObjectItem) -> StorageResult<()> {
    conn.execute(
        &format!("INSERT INTO share_object_item ({ITEM_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"),
        params![
            item.share_item_uri,
            item.share_uri,
            item.item_type.as_str(),
            item.item_uri,
            item.item_name,
            item.owner,
            item.status.as_str(),
            item.health_status.map(|h| h.as_str()),
            item.health_message,
            ts_opt(item.last_verification_time),
            ts(item.created),
            ts(item.updated),
        ],
    )
    .map_err(|e| map_constraint(e, || format!("item {} already in share {}", item.item_uri, item.share_uri)))?;
    Ok(())
}

/// A Deleted target removes the row.
fn set_item_status(conn: &Connection, share_item_uri: &str, status: ShareItemStatus, now: &str) -> StorageResult<()> {
    if status == ShareItemStatus::Deleted {
        conn.execute(
            "DELETE FROM share_object_item WHERE share_item_uri = ?1",
            params![share_item_uri],
        )?;
    } else {
        conn.execute(
            "UPDATE share_object_item SET status = ?2, updated = ?3 WHERE share_item_uri = ?1",
            params![share_item_uri, status.as_str(), now],
        )?;
    }
    Ok(())
}

fn set_share_status(conn: &Connection, share_uri: &str, status: ShareObjectStatus, now: &str) -> StorageResult<()> {
    let changed = conn.execute(
        "UPDATE share_object SET status = ?2, updated = ?3 WHERE share_uri = ?1",
        params![share_uri, status.as_str(), now],
    )?;
    if changed == 0 {
        return Err(StorageError::NotFound(format!("share {share_uri}")));
    }
    Ok(())
}

fn batch_status(
    conn: &Connection,
    share_uri: &str,
    old: ShareItemStatus,
    new: ShareItemStatus,
    item_type: Option<ShareableType>,
) -> StorageResult<usize> {
    if old == new {
        return Ok(0);
    }
    let mut values = vec![share_uri.to_string(), old.as_str().to_string()];
    let mut sql = if new == ShareItemStatus::Deleted {
        "DELETE FROM share_object_item WHERE share_uri = ? AND status = ?".to_string()
    } else {
        values.insert(0, ts(Utc::now()));
        values.insert(0, new.as_str().to_string());
        "UPDATE share_object_item SET status = ?, updated = ? WHERE share_uri = ? AND status = ?"
            .to_string()
    };
    if let Some(item_type) = item_type {
        sql.push_str(" AND item_type = ?");
        values.push(item_type.as_str().to_string());
    }
    Ok(conn.execute(&sql, params_from_iter(values.iter()))?)
}
