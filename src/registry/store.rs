use pgrx::prelude::*;
use pgrx::IntoDatum;

use crate::config::REGISTRY_TABLE;
use crate::error::{ViewError, ViewResult};
use crate::view::ViewDefinition;

// Declaration table, created at extension installation
extension_sql!(
    r"
    CREATE TABLE IF NOT EXISTS pgviews_registry (
        id BIGSERIAL PRIMARY KEY,
        module TEXT NOT NULL,
        name TEXT NOT NULL,
        table_name TEXT NOT NULL UNIQUE,
        definition TEXT NOT NULL,
        materialized BOOLEAN NOT NULL DEFAULT FALSE,
        registered_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (module, name)
    );

    COMMENT ON TABLE pgviews_registry IS 'Declared views, one row per view, in declaration order';
    ",
    name = "create_registry_table",
);

/// Read every declared view, oldest declaration first
pub fn load_all() -> ViewResult<Vec<ViewDefinition>> {
    let query = format!(
        "SELECT module, name, table_name, definition, materialized \
         FROM {REGISTRY_TABLE} \
         ORDER BY id"
    );

    Spi::connect(|client| {
        let rows = client.select(&query, None, None)?;
        let mut views = Vec::new();

        for row in rows {
            let module: Option<String> = row["module"].value()?;
            let name: Option<String> = row["name"].value()?;
            let table_name: Option<String> = row["table_name"].value()?;
            let definition: Option<String> = row["definition"].value()?;
            let materialized: Option<bool> = row["materialized"].value()?;

            views.push(ViewDefinition {
                module: module.unwrap_or_default(),
                name: name.unwrap_or_default(),
                table_name: table_name.unwrap_or_default(),
                definition: definition.unwrap_or_default(),
                materialized: materialized.unwrap_or(false),
            });
        }

        Ok::<_, pgrx::spi::Error>(views)
    })
    .map_err(|e| ViewError::SpiError {
        query,
        error: e.to_string(),
    })
}

/// Persist one declaration
pub fn insert(view: &ViewDefinition) -> ViewResult<()> {
    let sql = format!(
        "INSERT INTO {REGISTRY_TABLE} (module, name, table_name, definition, materialized) \
         VALUES ($1, $2, $3, $4, $5)"
    );

    Spi::run_with_args(
        &sql,
        Some(vec![
            (PgOid::BuiltIn(PgBuiltInOids::TEXTOID), view.module.as_str().into_datum()),
            (PgOid::BuiltIn(PgBuiltInOids::TEXTOID), view.name.as_str().into_datum()),
            (PgOid::BuiltIn(PgBuiltInOids::TEXTOID), view.table_name.as_str().into_datum()),
            (PgOid::BuiltIn(PgBuiltInOids::TEXTOID), view.definition.as_str().into_datum()),
            (PgOid::BuiltIn(PgBuiltInOids::BOOLOID), view.materialized.into_datum()),
        ]),
    )
    .map_err(|e| ViewError::SpiError {
        query: sql,
        error: e.to_string(),
    })
}

/// Remove every declaration of a module, returning how many were removed
pub fn delete_module(module: &str) -> ViewResult<i64> {
    let sql = format!(
        "WITH removed AS (DELETE FROM {REGISTRY_TABLE} WHERE module = $1 RETURNING 1) \
         SELECT COUNT(*) FROM removed"
    );

    Spi::get_one_with_args::<i64>(
        &sql,
        vec![(PgOid::BuiltIn(PgBuiltInOids::TEXTOID), module.into_datum())],
    )
    .map(|count| count.unwrap_or(0))
    .map_err(|e| ViewError::SpiError {
        query: sql,
        error: e.to_string(),
    })
}

#[cfg(any(test, feature = "pg_test"))]
#[pg_schema]
mod tests {
    use pgrx::prelude::*;
    use super::*;

    fn sample(module: &str, name: &str, table: &str) -> ViewDefinition {
        ViewDefinition::new(module, name, table, "SELECT 1 AS one", false)
    }

    #[pg_test]
    fn test_registry_table_created_on_install() {
        let exists = Spi::get_one::<bool>(
            "SELECT COUNT(*) = 1 FROM information_schema.tables WHERE table_name = 'pgviews_registry'"
        );
        assert_eq!(exists, Ok(Some(true)), "pgviews_registry table should exist");
    }

    #[pg_test]
    fn test_load_all_preserves_insertion_order() {
        insert(&sample("store_b", "Second", "store_second")).unwrap();
        insert(&sample("store_a", "First", "store_first")).unwrap();

        let loaded: Vec<String> = load_all()
            .unwrap()
            .into_iter()
            .filter(|v| v.module.starts_with("store_"))
            .map(|v| v.table_name)
            .collect();

        assert_eq!(loaded, vec!["store_second".to_string(), "store_first".to_string()]);
    }

    #[pg_test]
    fn test_delete_module() {
        insert(&sample("store_gone", "One", "store_gone_one")).unwrap();
        insert(&sample("store_gone", "Two", "store_gone_two")).unwrap();

        assert_eq!(delete_module("store_gone"), Ok(2));
        assert_eq!(delete_module("store_gone"), Ok(0));
    }
}
