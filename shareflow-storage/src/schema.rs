use crate::error::StorageResult;
use rusqlite::Connection;

pub(crate) fn initialize_share_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS share_object (
            share_uri TEXT PRIMARY KEY,
            dataset_uri TEXT NOT NULL,
            environment_uri TEXT NOT NULL,
            group_uri TEXT NOT NULL,
            principal_id TEXT NOT NULL,
            principal_type TEXT NOT NULL,
            principal_role_name TEXT,
            owner TEXT NOT NULL,
            status TEXT NOT NULL,
            permissions TEXT NOT NULL,
            request_purpose TEXT,
            reject_purpose TEXT,
            extension_reason TEXT,
            created TEXT NOT NULL,
            updated TEXT NOT NULL,
            expiry_date TEXT,
            requested_expiry_date TEXT,
            share_expiration_period INTEGER,
            non_expirable INTEGER NOT NULL DEFAULT 0,
            submitted_for_extension INTEGER NOT NULL DEFAULT 0,
            last_extension_date TEXT
        );

        -- one live share per dataset and principal
        CREATE UNIQUE INDEX IF NOT EXISTS idx_share_object_principal
            ON share_object (dataset_uri, environment_uri, principal_id, group_uri)
            WHERE status <> 'Deleted';

        CREATE INDEX IF NOT EXISTS idx_share_object_dataset
            ON share_object (dataset_uri, environment_uri);

        CREATE TABLE IF NOT EXISTS share_object_item (
            share_item_uri TEXT PRIMARY KEY,
            share_uri TEXT NOT NULL,
            item_type TEXT NOT NULL,
            item_uri TEXT NOT NULL,
            item_name TEXT NOT NULL,
            owner TEXT NOT NULL,
            status TEXT NOT NULL,
            health_status TEXT,
            health_message TEXT,
            last_verification_time TEXT,
            created TEXT NOT NULL,
            updated TEXT NOT NULL,
            UNIQUE (share_uri, item_uri)
        );

        CREATE INDEX IF NOT EXISTS idx_share_item_status
            ON share_object_item (share_uri, status);

        CREATE INDEX IF NOT EXISTS idx_share_item_uri
            ON share_object_item (item_uri);

        CREATE TABLE IF NOT EXISTS resource_lock (
            resource_uri TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            acquired_by_uri TEXT NOT NULL,
            acquired_by_type TEXT NOT NULL,
            run_id TEXT NOT NULL,
            acquired_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            PRIMARY KEY (resource_uri, resource_type)
        );
        "#,
    )?;
    Ok(())
}
