/// Table holding the declared views, one row per view
pub const REGISTRY_TABLE: &str = "pgviews_registry";

/// PostgreSQL truncates identifiers longer than this (NAMEDATALEN - 1)
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Maximum depth for view-on-view traversal when computing a drop order
pub const MAX_DEPENDENCY_DEPTH: usize = 10;

/// SQLSTATEs meaning "the view is there but the database refused to drop it"
/// (or it vanished between the catalog check and the DROP).
///
/// - `2BP01` dependent_objects_still_exist
/// - `42P01` undefined_table
/// - `42704` undefined_object
/// - `42809` wrong_object_type
pub const DROP_REFUSAL_SQLSTATES: &[&str] = &["2BP01", "42P01", "42704", "42809"];

/// SQLSTATE raised by `CREATE OR REPLACE VIEW` when the column list changes
pub const REPLACE_CONFLICT_SQLSTATE: &str = "42P16";
