//! Row <-> record mapping.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use shareflow_types::{
    LockKey, LockOwner, ResourceLock, ShareObject, ShareObjectItem, SharePermission,
};
use std::str::FromStr;

pub(crate) const SHARE_COLUMNS: &str = "share_uri, dataset_uri, environment_uri, group_uri, \
     principal_id, principal_type, principal_role_name, owner, status, permissions, \
     request_purpose, reject_purpose, extension_reason, created, updated, expiry_date, \
     requested_expiry_date, share_expiration_period, non_expirable, submitted_for_extension, \
     last_extension_date";

pub(crate) const ITEM_COLUMNS: &str = "share_item_uri, share_uri, item_type, item_uri, item_name, \
     owner, status, health_status, health_message, last_verification_time, created, updated";

pub(crate) const LOCK_COLUMNS: &str =
    "resource_uri, resource_type, acquired_by_uri, acquired_by_type, run_id, acquired_at, expires_at";

/// Fixed-width UTC timestamp so stored values order lexicographically.
pub(crate) fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn ts_opt(at: Option<DateTime<Utc>>) -> Option<String> {
    at.map(ts)
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn parsed_opt<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| r.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn share_from_row(row: &Row<'_>) -> rusqlite::Result<ShareObject> {
    let permissions_json: String = row.get(9)?;
    let permissions: Vec<SharePermission> =
        serde_json::from_str(&permissions_json).map_err(|e| conversion_error(9, e))?;
    let period: Option<i64> = row.get(17)?;

    Ok(ShareObject {
        share_uri: row.get(0)?,
        dataset_uri: row.get(1)?,
        environment_uri: row.get(2)?,
        group_uri: row.get(3)?,
        principal_id: row.get(4)?,
        principal_type: parsed(row, 5)?,
        principal_role_name: row.get(6)?,
        owner: row.get(7)?,
        status: parsed(row, 8)?,
        permissions,
        request_purpose: row.get(10)?,
        reject_purpose: row.get(11)?,
        extension_reason: row.get(12)?,
        created: parsed(row, 13)?,
        updated: parsed(row, 14)?,
        expiry_date: parsed_opt(row, 15)?,
        requested_expiry_date: parsed_opt(row, 16)?,
        share_expiration_period: period.and_then(|p| u32::try_from(p).ok()),
        non_expirable: row.get(18)?,
        submitted_for_extension: row.get(19)?,
        last_extension_date: parsed_opt(row, 20)?,
    })
}

pub(crate) fn item_from_row(row: &Row<'_>) -> rusqlite::Result<ShareObjectItem> {
    Ok(ShareObjectItem {
        share_item_uri: row.get(0)?,
        share_uri: row.get(1)?,
        item_type: parsed(row, 2)?,
        item_uri: row.get(3)?,
        item_name: row.get(4)?,
        owner: row.get(5)?,
        status: parsed(row, 6)?,
        health_status: parsed_opt(row, 7)?,
        health_message: row.get(8)?,
        last_verification_time: parsed_opt(row, 9)?,
        created: parsed(row, 10)?,
        updated: parsed(row, 11)?,
    })
}

pub(crate) fn lock_from_row(row: &Row<'_>) -> rusqlite::Result<ResourceLock> {
    Ok(ResourceLock {
        key: LockKey {
            resource_uri: row.get(0)?,
            resource_type: parsed(row, 1)?,
        },
        owner: LockOwner {
            acquired_by_uri: row.get(2)?,
            acquired_by_type: parsed(row, 3)?,
            run_id: row.get(4)?,
        },
        acquired_at: parsed(row, 5)?,
        expires_at: parsed(row, 6)?,
    })
}
