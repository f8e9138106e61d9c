//! DDL Operations: dropping and syncing declared views
//!
//! - **Drop**: [`drop_views`] tears down a module's views, one lazy step per
//!   view, reporting `DROPPED` / `NOT_EXISTS` or failing fast
//! - **Sync**: [`sync_views`] creates or replaces them
//! - **SQL surface**: the `pgviews_*` functions below play the role of the
//!   management command: they build the registry, drive the passes and log
//!   every outcome
//!
//! ## Error handling at the SQL boundary
//!
//! `pgviews_drop` is all-or-nothing: it raises on any failure, keeping the
//! database's SQLSTATE, and the ERROR rolls back the drops before it. Views
//! are only reported once the whole module has gone.
//! `pgviews_drop_all` logs a refused drop as a WARNING naming the view,
//! reports it as a `FAILED` row and moves on to the next module. Every other
//! error is raised unchanged.

pub mod create;
pub mod drop;
pub mod statement;

pub use create::{sync_views, SyncResult, SyncStatus, SyncViews};
pub use drop::{drop_module, drop_views, is_drop_refusal, DropResult, DropStatus, DropViews};
pub use statement::Statement;

use pgrx::pg_sys::panic::ErrorReport;
use pgrx::prelude::*;
use pgrx::PgLogLevel;

use crate::catalog::SpiCatalog;
use crate::error::ViewError;
use crate::registry::ViewRegistry;

/// Raise `err` as a PostgreSQL ERROR with its SQLSTATE and detail
pub(crate) fn raise(err: &ViewError) -> ! {
    let mut report = ErrorReport::new(err.error_code(), err.to_string(), "pgviews");
    if let Some(detail) = err.detail() {
        report = report.set_detail(detail);
    }
    report.report(PgLogLevel::ERROR);
    unreachable!("ERROR-level reports do not return")
}

fn load_registry() -> ViewRegistry {
    ViewRegistry::load().unwrap_or_else(|e| raise(&e))
}

/// SQL function: drop every view one module declares
///
/// Usage: SELECT * FROM pgviews_drop('viewtest');
///        SELECT * FROM pgviews_drop('viewtest', force => true);  -- CASCADE
#[pg_extern]
fn pgviews_drop(
    module: &str,
    force: default!(bool, false),
) -> TableIterator<
    'static,
    (
        name!(status, String),
        name!(display_name, String),
        name!(table_name, String),
    ),
> {
    let registry = load_registry();
    let dropped = drop_module(&registry, module, &SpiCatalog, force).unwrap_or_else(|e| raise(&e));

    let rows: Vec<_> = dropped
        .into_iter()
        .map(|dropped| {
            info!("{} ({}): {}", dropped.display_name, dropped.view.table_name,
                  dropped.status.describe());
            (
                dropped.status.to_string(),
                dropped.display_name,
                dropped.view.table_name.clone(),
            )
        })
        .collect();

    TableIterator::new(rows)
}

/// SQL function: drop the views of every registered module
///
/// Usage: SELECT * FROM pgviews_drop_all();
///        SELECT * FROM pgviews_drop_all(force => true);
#[pg_extern]
fn pgviews_drop_all(
    force: default!(bool, false),
) -> TableIterator<
    'static,
    (
        name!(module, String),
        name!(status, String),
        name!(display_name, String),
        name!(table_name, String),
    ),
> {
    let registry = load_registry();
    let mut rows = Vec::new();

    for module in registry.modules() {
        info!("Dropping views for {}", module);

        for result in drop_views(&registry, module, &SpiCatalog, force) {
            match result {
                Ok(dropped) => {
                    info!("{} ({}): {}", dropped.display_name, dropped.view.table_name,
                          dropped.status.describe());
                    rows.push((
                        module.to_string(),
                        dropped.status.to_string(),
                        dropped.display_name,
                        dropped.view.table_name.clone(),
                    ));
                }
                Err(e) => {
                    // Only failures that name a view are handled here
                    let (Some(view), Some(display_name)) = (e.view(), e.display_name()) else {
                        raise(&e);
                    };
                    warning!("Error dropping view {} ({:?}): {}", display_name, view.table_name,
                             e.detail().map_or_else(|| e.to_string(), |d| format!("{e}\nDETAIL: {d}")));
                    rows.push((
                        module.to_string(),
                        "FAILED".to_string(),
                        display_name.to_string(),
                        view.table_name.clone(),
                    ));
                }
            }
        }
    }

    TableIterator::new(rows)
}

/// SQL function: create or update the views of every registered module
///
/// Usage: SELECT * FROM pgviews_sync();
///        SELECT * FROM pgviews_sync(force => true);   -- allow column changes
///        SELECT * FROM pgviews_sync(update => false); -- only create missing views
#[pg_extern]
fn pgviews_sync(
    force: default!(bool, false),
    update: default!(bool, true),
) -> TableIterator<
    'static,
    (
        name!(module, String),
        name!(status, String),
        name!(display_name, String),
        name!(table_name, String),
    ),
> {
    let registry = load_registry();
    let mut rows = Vec::new();

    for module in registry.modules() {
        info!("Creating views for {}", module);

        for result in sync_views(&registry, module, &SpiCatalog, update, force) {
            let synced = result.unwrap_or_else(|e| raise(&e));
            if synced.status == SyncStatus::ForceRequired {
                warning!("{} ({}): {}", synced.display_name, synced.view.table_name,
                         synced.status.describe());
            } else {
                info!("{} ({}): {}", synced.display_name, synced.view.table_name,
                      synced.status.describe());
            }
            rows.push((
                module.to_string(),
                synced.status.to_string(),
                synced.display_name,
                synced.view.table_name.clone(),
            ));
        }
    }

    TableIterator::new(rows)
}

/// SQL function: the order in which a module's views can be dropped
/// without CASCADE
///
/// Usage: SELECT * FROM pgviews_drop_order('viewtest');
#[pg_extern]
fn pgviews_drop_order(
    module: &str,
) -> TableIterator<
    'static,
    (
        name!(position, i32),
        name!(display_name, String),
        name!(table_name, String),
    ),
> {
    let registry = load_registry();
    let order = crate::dependency::drop_order(registry.list_views(module), &SpiCatalog)
        .unwrap_or_else(|e| raise(&e));

    let rows: Vec<_> = order
        .into_iter()
        .zip(1..)
        .map(|(view, position)| (position, view.display_name(), view.table_name.clone()))
        .collect();

    TableIterator::new(rows)
}

#[cfg(any(test, feature = "pg_test"))]
#[pg_schema]
mod tests {
    use pgrx::prelude::*;

    fn count_views(pattern: &str) -> i64 {
        Spi::get_one::<i64>(&format!(
            "SELECT COUNT(*) FROM pg_views WHERE viewname LIKE '{pattern}'"
        ))
        .unwrap()
        .unwrap_or(0)
    }

    fn count_matviews(pattern: &str) -> i64 {
        Spi::get_one::<i64>(&format!(
            "SELECT COUNT(*) FROM pg_matviews WHERE matviewname LIKE '{pattern}'"
        ))
        .unwrap()
        .unwrap_or(0)
    }

    /// Three plain views (one reading from another) and one materialized view
    fn declare_viewtest() {
        Spi::run("CREATE TABLE viewtest_user (id INT PRIMARY KEY, username TEXT, password TEXT, is_superuser BOOL)").unwrap();
        Spi::run(r#"SELECT pgviews_register_module('viewtest', '[
            {"name": "Superusers", "table_name": "viewtest_superusers",
             "definition": "SELECT * FROM viewtest_user WHERE is_superuser"},
            {"name": "SimpleUser", "table_name": "viewtest_simpleuser",
             "definition": "SELECT username, password FROM viewtest_user"},
            {"name": "RelatedUser", "table_name": "viewtest_relateduser",
             "definition": "SELECT username FROM viewtest_simpleuser"},
            {"name": "SimpleUserMaterial", "table_name": "viewtest_simpleusermaterial",
             "definition": "SELECT username, password FROM viewtest_user", "materialized": true}
        ]')"#).unwrap();
        Spi::run("SELECT * FROM pgviews_sync()").unwrap();
    }

    #[pg_test]
    fn test_sync_creates_views() {
        declare_viewtest();
        assert_eq!(count_views("viewtest_%"), 3);
        assert_eq!(count_matviews("viewtest_%"), 1);
    }

    #[pg_test]
    fn test_drop_all_with_force() {
        declare_viewtest();

        Spi::run("SELECT * FROM pgviews_drop_all(force => true)").unwrap();

        assert_eq!(count_views("viewtest_%"), 0);
        assert_eq!(count_matviews("viewtest_%"), 0);
    }

    #[pg_test]
    fn test_drop_all_reports_failure_and_continues() {
        declare_viewtest();
        Spi::run(r#"SELECT pgviews_register('other', 'Report', 'other_report', 'SELECT 1 AS one')"#).unwrap();
        Spi::run("CREATE VIEW other_report AS SELECT 1 AS one").unwrap();

        // SimpleUser has a dependent declared after it
        let failed = Spi::get_one::<String>(
            "SELECT display_name FROM pgviews_drop_all() WHERE status = 'FAILED'"
        );
        assert_eq!(failed, Ok(Some("viewtest.SimpleUser".to_string())));

        // The next module still ran
        assert_eq!(count_views("other_%"), 0);
        // Superusers went before the failure, the rest stayed
        assert_eq!(count_views("viewtest_superusers"), 0);
        assert_eq!(count_views("viewtest_relateduser"), 1);
        assert_eq!(count_matviews("viewtest_%"), 1);
    }

    #[pg_test]
    fn test_drop_twice() {
        declare_viewtest();

        let first = Spi::get_one::<String>(
            "SELECT status FROM pgviews_drop('viewtest', force => true) \
             WHERE table_name = 'viewtest_superusers'"
        );
        assert_eq!(first, Ok(Some("DROPPED".to_string())));

        let second = Spi::get_one::<i64>(
            "SELECT COUNT(*) FROM pgviews_drop('viewtest', force => true) WHERE status = 'NOT_EXISTS'"
        );
        assert_eq!(second, Ok(Some(4)));
    }

    #[pg_test]
    #[should_panic(expected = "Error dropping view viewtest.SimpleUser")]
    fn test_drop_module_raises_on_dependents() {
        declare_viewtest();
        Spi::run("SELECT * FROM pgviews_drop('viewtest')").unwrap();
    }

    #[pg_test]
    fn test_drop_order_puts_dependents_first() {
        declare_viewtest();

        let order = Spi::connect(|client| {
            let mut names = Vec::new();
            for row in client.select("SELECT table_name FROM pgviews_drop_order('viewtest') ORDER BY position", None, None)? {
                names.push(row.get::<String>(1)?.unwrap_or_default());
            }
            Ok::<_, pgrx::spi::Error>(names)
        })
        .unwrap();

        let simple = order.iter().position(|n| n == "viewtest_simpleuser").unwrap();
        let related = order.iter().position(|n| n == "viewtest_relateduser").unwrap();
        assert!(related < simple);
    }

    #[pg_test]
    fn test_sync_force_required_on_column_change() {
        declare_viewtest();
        Spi::run("SELECT pgviews_unregister_module('viewtest')").unwrap();
        Spi::run(r#"SELECT pgviews_register('viewtest', 'Superusers', 'viewtest_superusers',
                                            'SELECT id FROM viewtest_user WHERE is_superuser')"#).unwrap();

        let status = Spi::get_one::<String>("SELECT status FROM pgviews_sync()");
        assert_eq!(status, Ok(Some("FORCE_REQUIRED".to_string())));

        let status = Spi::get_one::<String>("SELECT status FROM pgviews_sync(force => true)");
        assert_eq!(status, Ok(Some("FORCED".to_string())));
    }
}
