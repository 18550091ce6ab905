//! Domain types for the shareflow share orchestration engine.
//!
//! Provides:
//! - Status, action and health enums for share objects and share items
//! - Persisted records (share objects, share items, resource locks)
//! - Catalog records resolved by URI (datasets, environments, principals, shareable resources)

#[macro_use]
mod macros;

pub mod catalog;
pub mod enums;
pub mod error;
pub mod ids;
pub mod models;

pub use catalog::*;
pub use enums::*;
pub use error::TypeError;
pub use ids::new_uri;
pub use models::*;
