use std::fmt;
use std::iter::FusedIterator;

use crate::catalog::ViewCatalog;
use crate::config::DROP_REFUSAL_SQLSTATES;
use crate::ddl::Statement;
use crate::error::{DatabaseError, ViewError, ViewResult};
use crate::registry::ViewRegistry;
use crate::view::ViewDefinition;

/// Outcome of dropping one view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropStatus {
    Dropped,
    NotExists,
}

impl DropStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DropStatus::Dropped => "DROPPED",
            DropStatus::NotExists => "NOT_EXISTS",
        }
    }

    /// Wording used in progress logs
    pub fn describe(self) -> &'static str {
        match self {
            DropStatus::Dropped => "dropped",
            DropStatus::NotExists => "doesn't exist, skipping",
        }
    }
}

impl fmt::Display for DropStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One processed view of a drop pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropResult<'a> {
    pub status: DropStatus,
    pub view: &'a ViewDefinition,
    pub display_name: String,
}

/// Drop every view `module` declares, in registry order
///
/// Nothing happens until the returned iterator is consumed; each `next()`
/// checks the catalog for one view and issues at most one DROP. `force`
/// appends `CASCADE`, taking dependent objects along.
///
/// The first failure ends the pass: a refusal comes back as
/// [`ViewError::DropFailed`] carrying the view, anything else as
/// [`ViewError::Database`] exactly as the database reported it.
pub fn drop_views<'a, C: ViewCatalog + ?Sized>(
    registry: &'a ViewRegistry,
    module: &str,
    catalog: &'a C,
    force: bool,
) -> DropViews<'a, C> {
    DropViews::new(registry.list_views(module), catalog, force)
}

/// Run a whole drop pass, returning its results only if every view succeeded
///
/// Callers inside one transaction use this when a failure rolls the earlier
/// drops back: there is nothing to report until the pass is complete.
pub fn drop_module<'a, C: ViewCatalog + ?Sized>(
    registry: &'a ViewRegistry,
    module: &str,
    catalog: &'a C,
    force: bool,
) -> ViewResult<Vec<DropResult<'a>>> {
    drop_views(registry, module, catalog, force).collect()
}

/// Lazy, single-pass drop over a list of views
///
/// Abandoning the iterator stops the pass; views not yet reached are never
/// touched.
pub struct DropViews<'a, C: ViewCatalog + ?Sized> {
    views: std::slice::Iter<'a, ViewDefinition>,
    catalog: &'a C,
    force: bool,
    failed: bool,
}

impl<'a, C: ViewCatalog + ?Sized> DropViews<'a, C> {
    pub fn new(views: &'a [ViewDefinition], catalog: &'a C, force: bool) -> Self {
        Self {
            views: views.iter(),
            catalog,
            force,
            failed: false,
        }
    }

    fn drop_one(&self, view: &'a ViewDefinition) -> ViewResult<DropResult<'a>> {
        let display_name = view.display_name();

        if !self.catalog.view_exists(view)? {
            return Ok(DropResult {
                status: DropStatus::NotExists,
                view,
                display_name,
            });
        }

        match self.catalog.execute(&Statement::drop(view, self.force)) {
            Ok(()) => Ok(DropResult {
                status: DropStatus::Dropped,
                view,
                display_name,
            }),
            Err(source) => Err(classify_drop_failure(view, display_name, source)),
        }
    }
}

impl<'a, C: ViewCatalog + ?Sized> Iterator for DropViews<'a, C> {
    type Item = ViewResult<DropResult<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let view = self.views.next()?;
        let result = self.drop_one(view);
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            (0, Some(0))
        } else {
            (0, Some(self.views.len()))
        }
    }
}

impl<C: ViewCatalog + ?Sized> FusedIterator for DropViews<'_, C> {}

/// Whether the database refused this particular drop, as opposed to failing
/// for an unrelated reason
pub fn is_drop_refusal(error: &DatabaseError) -> bool {
    DROP_REFUSAL_SQLSTATES.contains(&error.sqlstate.as_str())
}

fn classify_drop_failure(
    view: &ViewDefinition,
    display_name: String,
    source: DatabaseError,
) -> ViewError {
    if is_drop_refusal(&source) {
        ViewError::DropFailed {
            view: Box::new(view.clone()),
            display_name,
            source,
        }
    } else {
        ViewError::Database(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::MemoryCatalog;
    use crate::error::testing::assert_failed_view;

    /// A (plain), B (plain, depends on A), C (materialized)
    fn scenario_registry() -> ViewRegistry {
        let mut registry = ViewRegistry::new();
        registry.register(ViewDefinition::new("viewtest", "A", "viewtest_a", "SELECT 1 AS one", false)).unwrap();
        registry.register(ViewDefinition::new("viewtest", "B", "viewtest_b", "SELECT * FROM viewtest_a", false)).unwrap();
        registry.register(ViewDefinition::new("viewtest", "C", "viewtest_c", "SELECT 1 AS one", true)).unwrap();
        registry
    }

    fn scenario_catalog() -> MemoryCatalog {
        MemoryCatalog::new()
            .with_view("viewtest_a", &[])
            .with_view("viewtest_b", &["viewtest_a"])
            .with_materialized_view("viewtest_c", &[])
    }

    fn statuses<'a>(results: impl Iterator<Item = ViewResult<DropResult<'a>>>) -> Vec<(String, DropStatus)> {
        results
            .map(|r| r.unwrap())
            .map(|r| (r.view.name.clone(), r.status))
            .collect()
    }

    #[test]
    fn test_absent_views_yield_not_exists_without_statements() {
        let registry = scenario_registry();
        let catalog = MemoryCatalog::new();

        let results = statuses(drop_views(&registry, "viewtest", &catalog, false));
        assert_eq!(results, vec![
            ("A".to_string(), DropStatus::NotExists),
            ("B".to_string(), DropStatus::NotExists),
            ("C".to_string(), DropStatus::NotExists),
        ]);
        assert!(catalog.executed().is_empty());
    }

    #[test]
    fn test_independent_views_drop_regardless_of_force() {
        for force in [false, true] {
            let mut registry = ViewRegistry::new();
            registry.register(ViewDefinition::new("viewtest", "C", "viewtest_c", "SELECT 1", true)).unwrap();
            let catalog = MemoryCatalog::new().with_materialized_view("viewtest_c", &[]);

            let results = statuses(drop_views(&registry, "viewtest", &catalog, force));
            assert_eq!(results, vec![("C".to_string(), DropStatus::Dropped)]);
            assert!(!catalog.contains("viewtest_c"));
        }
    }

    #[test]
    fn test_dependent_blocks_drop_without_force() {
        let registry = scenario_registry();
        let catalog = scenario_catalog();

        let mut pass = drop_views(&registry, "viewtest", &catalog, false);
        let err = assert_failed_view(pass.next().unwrap(), "viewtest.A");

        assert_eq!(err.view().map(|v| v.table_name.as_str()), Some("viewtest_a"));
        assert_eq!(err.sqlstate(), "2BP01");

        // Fail-fast: B and C are never touched
        assert!(pass.next().is_none());
        assert_eq!(catalog.executed(), vec!["DROP VIEW viewtest_a".to_string()]);
        assert!(catalog.contains("viewtest_b"));
        assert!(catalog.contains("viewtest_c"));
    }

    #[test]
    fn test_force_cascades_through_dependents() {
        let registry = scenario_registry();
        let catalog = scenario_catalog();

        let results = statuses(drop_views(&registry, "viewtest", &catalog, true));
        assert_eq!(results, vec![
            ("A".to_string(), DropStatus::Dropped),
            // B went away with A's CASCADE
            ("B".to_string(), DropStatus::NotExists),
            ("C".to_string(), DropStatus::Dropped),
        ]);
        assert_eq!(catalog.executed(), vec![
            "DROP VIEW viewtest_a CASCADE".to_string(),
            "DROP MATERIALIZED VIEW viewtest_c CASCADE".to_string(),
        ]);
    }

    #[test]
    fn test_dependents_declared_first_drop_without_force() {
        let mut registry = ViewRegistry::new();
        registry.register(ViewDefinition::new("viewtest", "B", "viewtest_b", "SELECT * FROM viewtest_a", false)).unwrap();
        registry.register(ViewDefinition::new("viewtest", "A", "viewtest_a", "SELECT 1 AS one", false)).unwrap();
        let catalog = scenario_catalog();

        let results = statuses(drop_views(&registry, "viewtest", &catalog, false));
        assert_eq!(results, vec![
            ("B".to_string(), DropStatus::Dropped),
            ("A".to_string(), DropStatus::Dropped),
        ]);
    }

    #[test]
    fn test_second_pass_reports_not_exists() {
        let registry = scenario_registry();
        let catalog = scenario_catalog();

        let first = statuses(drop_views(&registry, "viewtest", &catalog, true));
        assert_eq!(first[0], ("A".to_string(), DropStatus::Dropped));

        let second = statuses(drop_views(&registry, "viewtest", &catalog, true));
        assert!(second.iter().all(|(_, status)| *status == DropStatus::NotExists));
    }

    #[test]
    fn test_abandoned_pass_issues_no_further_drops() {
        let registry = scenario_registry();
        let catalog = scenario_catalog();

        let first = drop_views(&registry, "viewtest", &catalog, true).next();
        assert_eq!(first.unwrap().unwrap().status, DropStatus::Dropped);

        assert_eq!(catalog.executed().len(), 1);
        assert!(catalog.contains("viewtest_c"));
    }

    #[test]
    fn test_unexpected_error_passes_through_unchanged() {
        let registry = scenario_registry();
        let denied = DatabaseError::new("42501", "must be owner of view viewtest_c");
        let catalog = MemoryCatalog::new()
            .with_materialized_view("viewtest_c", &[])
            .failing_on("viewtest_c", denied.clone());

        let results: Vec<_> = drop_views(&registry, "viewtest", &catalog, false).collect();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().status, DropStatus::NotExists);
        assert_eq!(results[1].as_ref().unwrap().status, DropStatus::NotExists);

        let err = results[2].clone().unwrap_err();
        assert_eq!(err, ViewError::Database(denied));
        assert!(err.view().is_none());
    }

    #[test]
    fn test_unknown_module_yields_nothing() {
        let registry = scenario_registry();
        let catalog = scenario_catalog();

        assert_eq!(drop_views(&registry, "missing", &catalog, true).count(), 0);
        assert!(catalog.executed().is_empty());
    }

    #[test]
    fn test_results_borrow_registry_definitions() {
        let registry = scenario_registry();
        let catalog = scenario_catalog();

        let result = drop_views(&registry, "viewtest", &catalog, true).next().unwrap().unwrap();
        assert!(std::ptr::eq(result.view, &registry.list_views("viewtest")[0]));
        assert_eq!(result.display_name, "viewtest.A");
    }

    #[test]
    fn test_whole_pass_yields_nothing_when_a_view_is_refused() {
        let registry = scenario_registry();
        let catalog = scenario_catalog();

        assert_failed_view(drop_module(&registry, "viewtest", &catalog, false), "viewtest.A");
        assert!(catalog.contains("viewtest_c"));

        let dropped = drop_module(&registry, "viewtest", &catalog, true).unwrap();
        let statuses: Vec<DropStatus> = dropped.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![DropStatus::Dropped, DropStatus::NotExists, DropStatus::Dropped]);
    }

    #[test]
    fn test_refusal_classification() {
        assert!(is_drop_refusal(&DatabaseError::new("2BP01", "")));
        assert!(is_drop_refusal(&DatabaseError::new("42P01", "")));
        assert!(!is_drop_refusal(&DatabaseError::new("42501", "")));
        assert!(!is_drop_refusal(&DatabaseError::new("08006", "")));
    }
}
