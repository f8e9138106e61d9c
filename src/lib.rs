use pgrx::prelude::*;

mod subxact;
pub mod catalog;
pub mod config;
pub mod ddl;
pub mod dependency;
pub mod error;
pub mod registry;
pub mod validation;
pub mod view;

pub use catalog::{SpiCatalog, ViewCatalog};
pub use ddl::{drop_views, sync_views, DropResult, DropStatus, SyncResult, SyncStatus};
pub use error::{DatabaseError, ViewError, ViewResult};
pub use registry::ViewRegistry;
pub use view::ViewDefinition;

pg_module_magic!();

/// Get the version of the pgviews extension
#[pg_extern]
fn pgviews_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(any(test, feature = "pg_test"))]
#[pg_schema]
mod tests {
    use pgrx::prelude::*;
    use crate::ViewError;

    #[pg_test]
    fn test_version_callable_from_sql() {
        let version = Spi::get_one::<String>("SELECT pgviews_version()");
        assert_eq!(version, Ok(Some(env!("CARGO_PKG_VERSION").to_string())));
    }

    #[pg_test]
    #[should_panic(expected = "is already registered by module 'viewtest'")]
    fn test_duplicate_registration_raises() {
        Spi::run("SELECT pgviews_register('viewtest', 'A', 'libtest_a', 'SELECT 1 AS one')").unwrap();
        Spi::run("SELECT pgviews_register('other', 'B', 'libtest_a', 'SELECT 2 AS two')").unwrap();
    }

    #[pg_test]
    #[should_panic(expected = "already declares a view named 'Dup'")]
    fn test_duplicate_name_in_manifest_raises() {
        Spi::run(r#"SELECT pgviews_register_module('libtest', '[
            {"name": "Dup", "table_name": "libtest_dup_one", "definition": "SELECT 1 AS one"},
            {"name": "Dup", "table_name": "libtest_dup_two", "definition": "SELECT 2 AS two"}
        ]')"#).unwrap();
    }

    #[pg_test]
    fn test_list_in_declaration_order() {
        Spi::run("SELECT pgviews_register('libtest', 'Second', 'libtest_second', 'SELECT 1 AS one')").unwrap();
        Spi::run("SELECT pgviews_register('libtest', 'First', 'libtest_first', 'SELECT 1 AS one', materialized => true)").unwrap();

        let first = Spi::get_one::<String>(
            "SELECT display_name FROM pgviews_list('libtest') LIMIT 1"
        );
        assert_eq!(first, Ok(Some("libtest.Second".to_string())));

        let materialized = Spi::get_one::<bool>(
            "SELECT materialized FROM pgviews_list('libtest') WHERE table_name = 'libtest_first'"
        );
        assert_eq!(materialized, Ok(Some(true)));
    }

    #[pg_test]
    fn test_registry_round_trip_through_table() {
        Spi::run("SELECT pgviews_register('libtest', 'Only', 'libtest_only', 'SELECT 1 AS one')").unwrap();

        let registry = crate::ViewRegistry::load().unwrap();
        let views = registry.list_views("libtest");
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].display_name(), "libtest.Only");
    }

    #[pg_test]
    fn test_unexpected_error_is_not_classified() {
        let err = crate::subxact::run_statement("SELECT 1 / 0").unwrap_err();
        let classified = crate::ddl::is_drop_refusal(&err);
        assert!(!classified);
        assert_eq!(ViewError::Database(err).sqlstate(), "22012");
    }
}

/// This module is required by `cargo pgrx test` invocations.
/// It must be visible at the root of your extension crate.
#[cfg(test)]
pub mod pg_test {
    pub fn setup(_options: Vec<&str>) {
        // perform one-off initialization when the pg_test framework starts
    }

    #[must_use]
    pub fn postgresql_conf_options() -> Vec<&'static str> {
        // return any postgresql.conf settings that are required for your tests
        vec![]
    }
}
