//! Identifier generation.

use uuid::Uuid;

const URI_LEN: usize = 12;

/// Generates a short random URI for a new record.
pub fn new_uri() -> String {
    let mut uri = Uuid::new_v4().simple().to_string();
    uri.truncate(URI_LEN);
    uri
}
