//! View Registry
//!
//! The set of declared views, grouped by owning module. Modules keep the
//! order in which they were first registered (installation order) and views
//! keep declaration order within their module; drop passes rely on both.
//!
//! A registry is built once per call, either programmatically or from the
//! `pgviews_registry` table via [`ViewRegistry::load`], and then passed by
//! reference to the executors.

pub mod store;

use pgrx::prelude::*;
use pgrx::JsonB;
use serde::Deserialize;

use crate::error::{ViewError, ViewResult};
use crate::validation::validate_view;
use crate::view::ViewDefinition;

#[derive(Debug, Clone)]
struct ModuleViews {
    module: String,
    views: Vec<ViewDefinition>,
}

/// In-memory collection of view definitions per module
#[derive(Debug, Clone, Default)]
pub struct ViewRegistry {
    modules: Vec<ModuleViews>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from the persistent declaration table
    pub fn load() -> ViewResult<Self> {
        let mut registry = Self::new();
        for view in store::load_all()? {
            registry.register(view)?;
        }
        Ok(registry)
    }

    /// Append a definition to its module
    ///
    /// # Errors
    /// Invalid names or definitions, a table name already declared by any
    /// module, or a name the module already uses.
    pub fn register(&mut self, view: ViewDefinition) -> ViewResult<()> {
        validate_view(&view)?;

        // Display names must identify a single definition
        if self.list_views(&view.module).iter().any(|v| v.name == view.name) {
            return Err(ViewError::DuplicateViewName {
                module: view.module,
                name: view.name,
            });
        }

        if let Some(existing) = self.find_by_table(&view.table_name) {
            return Err(ViewError::ViewAlreadyRegistered {
                table_name: view.table_name.clone(),
                module: existing.module.clone(),
            });
        }

        match self.modules.iter_mut().find(|m| m.module == view.module) {
            Some(entry) => entry.views.push(view),
            None => self.modules.push(ModuleViews {
                module: view.module.clone(),
                views: vec![view],
            }),
        }

        Ok(())
    }

    /// All views declared in `module`, in declaration order
    ///
    /// Unknown modules declare nothing.
    pub fn list_views(&self, module: &str) -> &[ViewDefinition] {
        self.modules
            .iter()
            .find(|m| m.module == module)
            .map(|m| m.views.as_slice())
            .unwrap_or(&[])
    }

    /// Module names in installation order
    pub fn modules(&self) -> impl Iterator<Item = &str> + '_ {
        self.modules.iter().map(|m| m.module.as_str())
    }

    pub fn find_by_table(&self, table_name: &str) -> Option<&ViewDefinition> {
        self.modules
            .iter()
            .flat_map(|m| m.views.iter())
            .find(|v| v.table_name == table_name)
    }

    pub fn len(&self) -> usize {
        self.modules.iter().map(|m| m.views.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One element of a module manifest (`pgviews_register_module`)
#[derive(Debug, Deserialize)]
struct ManifestEntry {
    name: String,
    table_name: String,
    definition: String,
    #[serde(default)]
    materialized: bool,
}

/// Parse a JSON manifest into definitions owned by `module`
pub fn parse_manifest(module: &str, manifest: serde_json::Value) -> ViewResult<Vec<ViewDefinition>> {
    let entries: Vec<ManifestEntry> = serde_json::from_value(manifest)?;

    Ok(entries
        .into_iter()
        .map(|e| ViewDefinition::new(module, e.name, e.table_name, e.definition, e.materialized))
        .collect())
}

fn raise(e: ViewError) -> ! {
    crate::ddl::raise(&e)
}

/// SQL function: declare one view
///
/// Usage: SELECT pgviews_register('viewtest', 'Superusers', 'viewtest_superusers',
///                                'SELECT * FROM auth_user WHERE is_superuser');
#[pg_extern]
fn pgviews_register(
    module: &str,
    name: &str,
    table_name: &str,
    definition: &str,
    materialized: default!(bool, false),
) {
    let view = ViewDefinition::new(module, name, table_name, definition, materialized);

    // Validate against everything already declared before persisting
    let mut registry = ViewRegistry::load().unwrap_or_else(|e| raise(e));
    registry.register(view.clone()).unwrap_or_else(|e| raise(e));
    store::insert(&view).unwrap_or_else(|e| raise(e));
}

/// SQL function: declare every view of a module from a JSON array
///
/// Usage: SELECT pgviews_register_module('viewtest', '[{"name": "SimpleUser", ...}]');
#[pg_extern]
fn pgviews_register_module(module: &str, views: JsonB) -> i32 {
    let definitions = parse_manifest(module, views.0).unwrap_or_else(|e| raise(e));

    let mut registry = ViewRegistry::load().unwrap_or_else(|e| raise(e));
    for view in &definitions {
        registry.register(view.clone()).unwrap_or_else(|e| raise(e));
        store::insert(view).unwrap_or_else(|e| raise(e));
    }

    i32::try_from(definitions.len()).unwrap_or(i32::MAX)
}

/// SQL function: forget every declaration of a module
#[pg_extern]
fn pgviews_unregister_module(module: &str) -> i64 {
    store::delete_module(module).unwrap_or_else(|e| raise(e))
}

/// SQL function: list declared views, optionally for one module
#[pg_extern]
fn pgviews_list(
    module: default!(Option<&str>, "NULL"),
) -> TableIterator<
    'static,
    (
        name!(module, String),
        name!(display_name, String),
        name!(table_name, String),
        name!(materialized, bool),
        name!(definition, String),
    ),
> {
    let registry = ViewRegistry::load().unwrap_or_else(|e| raise(e));

    let modules: Vec<String> = match module {
        Some(m) => vec![m.to_string()],
        None => registry.modules().map(str::to_string).collect(),
    };

    let rows: Vec<_> = modules
        .iter()
        .flat_map(|m| registry.list_views(m).iter())
        .map(|v| {
            (
                v.module.clone(),
                v.display_name(),
                v.table_name.clone(),
                v.materialized,
                v.definition.clone(),
            )
        })
        .collect();

    TableIterator::new(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::testing::{assert_error_contains, assert_error_sqlstate};

    fn view(module: &str, name: &str, table: &str) -> ViewDefinition {
        ViewDefinition::new(module, name, table, "SELECT * FROM auth_user", false)
    }

    #[test]
    fn test_list_views_keeps_declaration_order() {
        let mut registry = ViewRegistry::new();
        registry.register(view("viewtest", "Superusers", "viewtest_superusers")).unwrap();
        registry.register(view("other", "Report", "other_report")).unwrap();
        registry.register(view("viewtest", "SimpleUser", "viewtest_simpleuser")).unwrap();

        let names: Vec<&str> = registry.list_views("viewtest").iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["Superusers", "SimpleUser"]);
        assert_eq!(registry.modules().collect::<Vec<_>>(), vec!["viewtest", "other"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_unknown_module_declares_nothing() {
        let registry = ViewRegistry::new();
        assert!(registry.list_views("missing").is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_table_rejected_across_modules() {
        let mut registry = ViewRegistry::new();
        registry.register(view("viewtest", "Superusers", "shared_view")).unwrap();

        let result = registry.register(view("other", "Clash", "shared_view"));
        assert_error_sqlstate(result.clone(), "42710");
        assert_error_contains(result, "viewtest");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_name_rejected_within_module() {
        let mut registry = ViewRegistry::new();
        registry.register(view("viewtest", "A", "viewtest_a1")).unwrap();

        let result = registry.register(view("viewtest", "A", "viewtest_a2"));
        assert_error_sqlstate(result.clone(), "42710");
        assert_error_contains(result, "'viewtest' already declares a view named 'A'");
        assert_eq!(registry.list_views("viewtest").len(), 1);

        // Same name in another module is a different display name
        registry.register(view("other", "A", "other_a")).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_invalid_view_not_registered() {
        let mut registry = ViewRegistry::new();
        let result = registry.register(view("viewtest", "Bad", "Bad Table"));
        assert_error_sqlstate(result, "42602");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_parse_manifest() {
        let views = parse_manifest(
            "viewtest",
            serde_json::json!([
                {"name": "SimpleUser", "table_name": "viewtest_simpleuser",
                 "definition": "SELECT username, password FROM auth_user"},
                {"name": "SimpleUserMaterial", "table_name": "viewtest_simpleusermaterial",
                 "definition": "SELECT username, password FROM auth_user", "materialized": true}
            ]),
        )
        .unwrap();

        assert_eq!(views.len(), 2);
        assert_eq!(views[0].module, "viewtest");
        assert!(!views[0].materialized);
        assert!(views[1].materialized);
    }

    #[test]
    fn test_parse_manifest_rejects_non_array() {
        let result = parse_manifest("viewtest", serde_json::json!({"name": "x"}));
        assert_error_contains(result, "JSON serialization error");
    }
}
