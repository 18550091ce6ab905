//! SQLite storage layer for shareflow.
//!
//! Provides persistent storage for share orchestration state.
//!
//! # Architecture
//!
//! - Share objects and share items are stored as typed rows, statuses as their stored spellings
//! - Resource lock rows are leased and keyed by (resource uri, resource type)
//! - Multi-row status changes run inside a single transaction
//! - Catalog records are read through the [`CatalogRepository`] collaborator trait

mod catalog;
mod error;
mod lock_store;
mod rows;
mod schema;
mod share_store;

pub use catalog::{CatalogRepository, MemoryCatalog};
pub use error::{StorageError, StorageResult};
pub use share_store::{ItemFilter, ShareStore};

/// Open a SQLite connection configured for concurrent workers.
///
/// WAL journaling lets verifier reads proceed while a run holds the write lock,
/// and the busy timeout absorbs short write contention between processes.
pub fn open_sqlite(path: &std::path::Path) -> StorageResult<rusqlite::Connection> {
    let conn = rusqlite::Connection::open(path)?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    tracing::debug!("opened share store at {} (journal_mode={mode})", path.display());
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(conn)
}
