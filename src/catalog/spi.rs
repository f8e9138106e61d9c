use pgrx::prelude::*;
use pgrx::IntoDatum;

use super::ViewCatalog;
use crate::ddl::Statement;
use crate::error::{DatabaseError, ViewError, ViewResult};
use crate::view::{ViewDefinition, ViewKind};

/// Catalog backed by SPI in the current backend
///
/// Each statement runs in its own subtransaction, see [`crate::subxact`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SpiCatalog;

impl ViewCatalog for SpiCatalog {
    fn view_exists(&self, view: &ViewDefinition) -> ViewResult<bool> {
        let (catalog, column) = match view.kind() {
            ViewKind::Plain => ("pg_catalog.pg_views", "viewname"),
            ViewKind::Materialized => ("pg_catalog.pg_matviews", "matviewname"),
        };

        // Unqualified names are looked up along the search path, like the DROP itself
        let query = format!(
            "SELECT EXISTS ( \
                SELECT 1 FROM {catalog} \
                WHERE {column} = $1 \
                  AND (($2::text IS NULL AND schemaname = ANY (current_schemas(false))) \
                       OR schemaname = $2) \
             )"
        );

        let name = view.qualified_name();
        Spi::get_one_with_args::<bool>(
            &query,
            vec![
                (PgOid::BuiltIn(PgBuiltInOids::TEXTOID), name.relname.into_datum()),
                (PgOid::BuiltIn(PgBuiltInOids::TEXTOID), name.schema.into_datum()),
            ],
        )
        .map(|exists| exists.unwrap_or(false))
        .map_err(|e| ViewError::CatalogError {
            operation: format!("Check view exists: {}", view.table_name),
            pg_error: e.to_string(),
        })
    }

    fn execute(&self, statement: &Statement<'_>) -> Result<(), DatabaseError> {
        let sql = statement.to_string();
        debug1!("pgviews: {}", sql);
        crate::subxact::run_statement(&sql)
    }

    fn referenced_views(&self, view: &ViewDefinition) -> ViewResult<Vec<String>> {
        let query = "SELECT DISTINCT ref.relname::text AS relname \
                     FROM pg_catalog.pg_rewrite r \
                     JOIN pg_catalog.pg_depend d \
                       ON d.objid = r.oid AND d.classid = 'pg_catalog.pg_rewrite'::regclass \
                     JOIN pg_catalog.pg_class ref \
                       ON ref.oid = d.refobjid AND d.refclassid = 'pg_catalog.pg_class'::regclass \
                     WHERE r.ev_class = to_regclass($1) \
                       AND ref.oid <> r.ev_class \
                       AND ref.relkind IN ('v', 'm') \
                     ORDER BY 1";

        Spi::connect(|client| {
            let rows = client.select(
                query,
                None,
                Some(vec![(
                    PgOid::BuiltIn(PgBuiltInOids::TEXTOID),
                    view.table_name.as_str().into_datum(),
                )]),
            )?;

            let mut names = Vec::new();
            for row in rows {
                if let Some(relname) = row["relname"].value::<String>()? {
                    names.push(relname);
                }
            }
            Ok::<_, pgrx::spi::Error>(names)
        })
        .map_err(|e| ViewError::CatalogError {
            operation: format!("Find views referenced by {}", view.table_name),
            pg_error: e.to_string(),
        })
    }
}

#[cfg(any(test, feature = "pg_test"))]
#[pg_schema]
mod tests {
    use pgrx::prelude::*;
    use super::*;

    fn plain(table: &str) -> ViewDefinition {
        ViewDefinition::new("spitest", "View", table, "SELECT 1 AS one", false)
    }

    #[pg_test]
    fn test_view_exists_checks_kind() {
        Spi::run("CREATE VIEW spitest_plain AS SELECT 1 AS one").unwrap();
        Spi::run("CREATE MATERIALIZED VIEW spitest_mat AS SELECT 1 AS one").unwrap();

        let catalog = SpiCatalog;
        assert_eq!(catalog.view_exists(&plain("spitest_plain")), Ok(true));
        assert_eq!(catalog.view_exists(&plain("spitest_missing")), Ok(false));

        // A materialized view is not a plain view and vice versa
        assert_eq!(catalog.view_exists(&plain("spitest_mat")), Ok(false));
        let mut mat = plain("spitest_mat");
        mat.materialized = true;
        assert_eq!(catalog.view_exists(&mat), Ok(true));
    }

    #[pg_test]
    fn test_view_exists_with_schema() {
        Spi::run("CREATE SCHEMA spitest_reporting").unwrap();
        Spi::run("CREATE VIEW spitest_reporting.totals AS SELECT 1 AS one").unwrap();

        let catalog = SpiCatalog;
        assert_eq!(catalog.view_exists(&plain("spitest_reporting.totals")), Ok(true));
        assert_eq!(catalog.view_exists(&plain("totals")), Ok(false));
    }

    #[pg_test]
    fn test_rejected_statement_leaves_transaction_usable() {
        Spi::run("CREATE VIEW spitest_base AS SELECT 1 AS one").unwrap();
        Spi::run("CREATE VIEW spitest_dependent AS SELECT * FROM spitest_base").unwrap();

        let base = plain("spitest_base");
        let err = SpiCatalog.execute(&Statement::drop(&base, false)).unwrap_err();
        assert_eq!(err.sqlstate, "2BP01");
        assert!(err.detail.unwrap_or_default().contains("spitest_dependent"));

        // Still inside a healthy transaction
        assert_eq!(SpiCatalog.view_exists(&base), Ok(true));
        assert_eq!(SpiCatalog.execute(&Statement::drop(&base, true)), Ok(()));
        assert_eq!(SpiCatalog.view_exists(&plain("spitest_dependent")), Ok(false));
    }

    #[pg_test]
    fn test_referenced_views() {
        Spi::run("CREATE TABLE spitest_users (id INT, name TEXT)").unwrap();
        Spi::run("CREATE VIEW spitest_a AS SELECT * FROM spitest_users").unwrap();
        Spi::run("CREATE MATERIALIZED VIEW spitest_m AS SELECT id FROM spitest_users").unwrap();
        Spi::run("CREATE VIEW spitest_b AS SELECT a.name FROM spitest_a a JOIN spitest_m m USING (id)").unwrap();

        let refs = SpiCatalog.referenced_views(&plain("spitest_b")).unwrap();
        assert_eq!(refs, vec!["spitest_a".to_string(), "spitest_m".to_string()]);

        // Base tables are not views
        assert!(SpiCatalog.referenced_views(&plain("spitest_a")).unwrap().is_empty());
        assert!(SpiCatalog.referenced_views(&plain("spitest_nothing")).unwrap().is_empty());
    }
}
