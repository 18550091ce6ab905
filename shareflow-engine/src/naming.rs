//! Names of remote artifacts created by processors.
//!
//! Names are deterministic so a re-run finds what an earlier run created.
//! Names over a service's length limit keep a readable head and end in a
//! short hash of the full name.

use sha2::{Digest, Sha256};

const ACCESS_POINT_MAX_LEN: usize = 50;
const CATALOG_NAME_MAX_LEN: usize = 255;
const WAREHOUSE_NAME_MAX_LEN: usize = 127;
const IAM_POLICY_MAX_LEN: usize = 128;
const HASH_LEN: usize = 8;

fn short_hash(raw: &str) -> String {
    let mut digest = hex::encode(Sha256::digest(raw.as_bytes()));
    digest.truncate(HASH_LEN);
    digest
}

/// Keeps `name` within `max_len`, replacing the tail with a hash of the whole name.
fn bounded(name: String, max_len: usize, separator: char) -> String {
    if name.len() <= max_len {
        return name;
    }
    let head_len = max_len - HASH_LEN - 1;
    let head: String = name.chars().take(head_len).collect();
    format!("{}{separator}{}", head.trim_end_matches(separator), short_hash(&name))
}

/// Lowercases and replaces characters outside `[a-z0-9]` and `keep` with `separator`.
fn slugify(raw: &str, separator: char) -> String {
    let mut slug = String::with_capacity(raw.len());
    for c in raw.chars().map(|c| c.to_ascii_lowercase()) {
        let c = if c.is_ascii_alphanumeric() { c } else { separator };
        if c == separator && slug.ends_with(separator) {
            continue;
        }
        slug.push(c);
    }
    slug.trim_matches(separator).to_string()
}

/// Access point for one principal on one storage location.
pub fn access_point_name(principal_id: &str, location_uri: &str) -> String {
    bounded(slugify(&format!("{location_uri}-{principal_id}"), '-'), ACCESS_POINT_MAX_LEN, '-')
}

/// Database in the target account holding resource links to a dataset's tables.
pub fn shared_database_name(glue_database: &str) -> String {
    bounded(format!("{glue_database}_shared"), CATALOG_NAME_MAX_LEN, '_')
}

/// One datashare per dataset and consumer namespace.
pub fn datashare_name(prefix: &str, dataset_uri: &str, namespace_id: &str) -> String {
    bounded(
        slugify(&format!("{prefix}_{dataset_uri}_{namespace_id}"), '_'),
        WAREHOUSE_NAME_MAX_LEN,
        '_',
    )
}

/// Consumer database created from a datashare.
pub fn consumer_database_name(target_connection: &str, source_database: &str) -> String {
    bounded(
        slugify(&format!("{target_connection}_{source_database}"), '_'),
        WAREHOUSE_NAME_MAX_LEN,
        '_',
    )
}

/// Local schema exposing the shared schema in the consumer database.
pub fn external_schema_name(source_database: &str, schema: &str) -> String {
    bounded(slugify(&format!("{source_database}_{schema}"), '_'), WAREHOUSE_NAME_MAX_LEN, '_')
}

/// Inline policy on the principal role listing shared storage resources.
pub fn share_policy_name(prefix: &str, environment_uri: &str) -> String {
    bounded(
        slugify(&format!("{prefix}-share-{environment_uri}"), '-'),
        IAM_POLICY_MAX_LEN,
        '-',
    )
}

/// Policy statement ids are alphanumeric.
pub fn statement_id(parts: &[&str]) -> String {
    parts
        .iter()
        .flat_map(|p| p.chars())
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_names_are_bounded_and_stable() {
        let principal = "x".repeat(80);
        let first = access_point_name(&principal, "loc1");
        assert_eq!(first.len(), ACCESS_POINT_MAX_LEN);
        assert_eq!(first, access_point_name(&principal, "loc1"));
        assert_ne!(first, access_point_name(&principal, "loc2"));
    }

    #[test]
    fn slugs_collapse_separators() {
        assert_eq!(access_point_name("Team A", "loc_1"), "loc-1-team-a");
        assert_eq!(statement_id(&["Read", "ab-12"]), "Readab12");
    }
}
