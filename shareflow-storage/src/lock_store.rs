//! Leased resource lock rows.
//!
//! A lock row is keyed by (resource uri, resource type). Acquisition of a set of
//! keys is all-or-nothing within one immediate transaction: expired rows for the
//! requested keys are cleared first, then any live row aborts the whole set.
//! Ownership is per run (`LockOwner::run_id`), never per share.

use crate::error::StorageResult;
use crate::rows::{LOCK_COLUMNS, lock_from_row, ts};
use crate::share_store::ShareStore;
use chrono::{Duration, Utc};
use rusqlite::{OptionalExtension, TransactionBehavior, params};
use shareflow_types::{LockKey, LockOwner, ResourceLock};
use tracing::{debug, warn};

impl ShareStore {
    /// Acquires every key in `keys` for `owner`, or none of them.
    ///
    /// Any live row refuses the set, including one held by another run of the same share.
    pub fn acquire_locks(&self, keys: &[LockKey], owner: &LockOwner, lease: Duration) -> StorageResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();
        let now_ts = ts(now);
        let expires_ts = ts(now + lease);

        for (i, key) in keys.iter().enumerate() {
            if keys[..i].contains(key) {
                continue;
            }
            let expired = tx.execute(
                "DELETE FROM resource_lock WHERE resource_uri = ?1 AND resource_type = ?2 AND expires_at <= ?3",
                params![key.resource_uri, key.resource_type.as_str(), now_ts],
            )?;
            if expired > 0 {
                warn!("taking over expired lock on {key}");
            }

            let holder = tx
                .query_row(
                    &format!("SELECT {LOCK_COLUMNS} FROM resource_lock WHERE resource_uri = ?1 AND resource_type = ?2"),
                    params![key.resource_uri, key.resource_type.as_str()],
                    lock_from_row,
                )
                .optional()?;
            if let Some(lock) = holder {
                debug!(
                    "lock on {key} held by {}/{} (run {}) until {}",
                    lock.owner.acquired_by_type, lock.owner.acquired_by_uri, lock.owner.run_id, lock.expires_at
                );
                return Ok(false);
            }

            tx.execute(
                &format!("INSERT INTO resource_lock ({LOCK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
                params![
                    key.resource_uri,
                    key.resource_type.as_str(),
                    owner.acquired_by_uri,
                    owner.acquired_by_type.as_str(),
                    owner.run_id,
                    now_ts,
                    expires_ts,
                ],
            )?;
        }

        tx.commit()?;
        debug!(
            "{}/{} (run {}) acquired {} locks",
            owner.acquired_by_type,
            owner.acquired_by_uri,
            owner.run_id,
            keys.len()
        );
        Ok(true)
    }

    /// Extends the lease on every key still held by `owner`.
    ///
    /// Returns false when any key was lost to another owner or is gone; held
    /// keys are still extended.
    pub fn renew_locks(&self, keys: &[LockKey], owner: &LockOwner, lease: Duration) -> StorageResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let expires_ts = ts(Utc::now() + lease);
        let mut all_held = true;
        for key in keys {
            let renewed = tx.execute(
                "UPDATE resource_lock SET expires_at = ?4 \
                 WHERE resource_uri = ?1 AND resource_type = ?2 AND run_id = ?3",
                params![key.resource_uri, key.resource_type.as_str(), owner.run_id, expires_ts],
            )?;
            if renewed == 0 {
                warn!("run {} no longer holds lock on {key}", owner.run_id);
                all_held = false;
            }
        }
        tx.commit()?;
        Ok(all_held)
    }

    /// Releases `key` if it is held by `owner`'s run.
    pub fn release_lock(&self, key: &LockKey, owner: &LockOwner) -> StorageResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM resource_lock WHERE resource_uri = ?1 AND resource_type = ?2 AND run_id = ?3",
            params![key.resource_uri, key.resource_type.as_str(), owner.run_id],
        )?;
        if removed > 0 {
            debug!("{} (run {}) released lock on {key}", owner.acquired_by_uri, owner.run_id);
        }
        Ok(removed > 0)
    }

    /// Returns the lock row for `key`, live or expired.
    pub fn get_lock(&self, key: &LockKey) -> StorageResult<Option<ResourceLock>> {
        let conn = self.conn()?;
        let lock = conn
            .query_row(
                &format!("SELECT {LOCK_COLUMNS} FROM resource_lock WHERE resource_uri = ?1 AND resource_type = ?2"),
                params![key.resource_uri, key.resource_type.as_str()],
                lock_from_row,
            )
            .optional()?;
        Ok(lock)
    }

    /// Whether a live (unexpired) lock exists for `key`.
    pub fn is_locked(&self, key: &LockKey) -> StorageResult<bool> {
        Ok(self
            .get_lock(key)?
            .is_some_and(|lock| !lock.is_expired_at(Utc::now())))
    }

    /// Removes the lock row for `key` regardless of holder.
    pub fn break_lock(&self, key: &LockKey) -> StorageResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM resource_lock WHERE resource_uri = ?1 AND resource_type = ?2",
            params![key.resource_uri, key.resource_type.as_str()],
        )?;
        if removed > 0 {
            warn!("force-broke lock on {key}");
        }
        Ok(removed > 0)
    }
}
