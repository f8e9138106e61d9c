use std::fmt;
use std::iter::FusedIterator;

use crate::catalog::ViewCatalog;
use crate::config::REPLACE_CONFLICT_SQLSTATE;
use crate::ddl::Statement;
use crate::error::{DatabaseError, ViewError, ViewResult};
use crate::registry::ViewRegistry;
use crate::view::{ViewDefinition, ViewKind};

/// Outcome of syncing one view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Created,
    Updated,
    /// Present and left alone because updates were not requested
    Exists,
    /// Dropped (with dependents) and recreated
    Forced,
    /// Replacing would change the column list; rerun with force
    ForceRequired,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Created => "CREATED",
            SyncStatus::Updated => "UPDATED",
            SyncStatus::Exists => "EXISTS",
            SyncStatus::Forced => "FORCED",
            SyncStatus::ForceRequired => "FORCE_REQUIRED",
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            SyncStatus::Created => "created",
            SyncStatus::Updated => "updated",
            SyncStatus::Exists => "already exists, skipping",
            SyncStatus::Forced => "forced overwrite of existing schema",
            SyncStatus::ForceRequired => "exists with incompatible schema, --force required to update",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult<'a> {
    pub status: SyncStatus,
    pub view: &'a ViewDefinition,
    pub display_name: String,
}

/// Create or update every view `module` declares, in registry order
///
/// Same contract as [`crate::ddl::drop_views`]: lazy, single pass, and the
/// first failure ([`ViewError::SyncFailed`]) ends it.
pub fn sync_views<'a, C: ViewCatalog + ?Sized>(
    registry: &'a ViewRegistry,
    module: &str,
    catalog: &'a C,
    update: bool,
    force: bool,
) -> SyncViews<'a, C> {
    SyncViews {
        views: registry.list_views(module).iter(),
        catalog,
        update,
        force,
        failed: false,
    }
}

pub struct SyncViews<'a, C: ViewCatalog + ?Sized> {
    views: std::slice::Iter<'a, ViewDefinition>,
    catalog: &'a C,
    update: bool,
    force: bool,
    failed: bool,
}

impl<'a, C: ViewCatalog + ?Sized> SyncViews<'a, C> {
    fn sync_one(&self, view: &'a ViewDefinition) -> ViewResult<SyncStatus> {
        let fail = |source: DatabaseError| ViewError::SyncFailed {
            view: Box::new(view.clone()),
            display_name: view.display_name(),
            source,
        };

        let exists = self.catalog.view_exists(view)?;

        if !exists {
            self.catalog.execute(&Statement::create(view)).map_err(fail)?;
            return Ok(SyncStatus::Created);
        }

        if !self.update {
            return Ok(SyncStatus::Exists);
        }

        if view.kind() == ViewKind::Materialized {
            // Materialized views have no OR REPLACE
            self.catalog.execute(&Statement::drop(view, false)).map_err(fail)?;
            self.catalog.execute(&Statement::create(view)).map_err(fail)?;
            return Ok(SyncStatus::Updated);
        }

        match self.catalog.execute(&Statement::replace(view)) {
            Ok(()) => Ok(SyncStatus::Updated),
            Err(e) if e.sqlstate == REPLACE_CONFLICT_SQLSTATE => {
                if !self.force {
                    return Ok(SyncStatus::ForceRequired);
                }
                self.catalog.execute(&Statement::drop(view, true)).map_err(fail)?;
                self.catalog.execute(&Statement::create(view)).map_err(fail)?;
                Ok(SyncStatus::Forced)
            }
            Err(e) => Err(fail(e)),
        }
    }
}

impl<'a, C: ViewCatalog + ?Sized> Iterator for SyncViews<'a, C> {
    type Item = ViewResult<SyncResult<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let view = self.views.next()?;
        let result = self.sync_one(view).map(|status| SyncResult {
            status,
            view,
            display_name: view.display_name(),
        });
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}

impl<C: ViewCatalog + ?Sized> FusedIterator for SyncViews<'_, C> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::MemoryCatalog;
    use crate::error::testing::assert_failed_view;

    fn registry() -> ViewRegistry {
        let mut registry = ViewRegistry::new();
        registry.register(ViewDefinition::new("viewtest", "Superusers", "viewtest_superusers",
                                              "SELECT * FROM auth_user WHERE is_superuser", false)).unwrap();
        registry.register(ViewDefinition::new("viewtest", "SimpleUserMaterial", "viewtest_simpleusermaterial",
                                              "SELECT username FROM auth_user", true)).unwrap();
        registry
    }

    fn statuses(catalog: &MemoryCatalog, update: bool, force: bool) -> Vec<SyncStatus> {
        let registry = registry();
        sync_views(&registry, "viewtest", catalog, update, force)
            .map(|r| r.unwrap().status)
            .collect()
    }

    #[test]
    fn test_creates_missing_views() {
        let catalog = MemoryCatalog::new();
        assert_eq!(statuses(&catalog, true, false), vec![SyncStatus::Created, SyncStatus::Created]);
        assert_eq!(catalog.kind_of("viewtest_simpleusermaterial"), Some(ViewKind::Materialized));
        assert_eq!(catalog.executed()[0],
                   "CREATE VIEW viewtest_superusers AS SELECT * FROM auth_user WHERE is_superuser");
    }

    #[test]
    fn test_existing_views_updated() {
        let catalog = MemoryCatalog::new()
            .with_view("viewtest_superusers", &[])
            .with_materialized_view("viewtest_simpleusermaterial", &[]);

        assert_eq!(statuses(&catalog, true, false), vec![SyncStatus::Updated, SyncStatus::Updated]);
        assert_eq!(catalog.executed(), vec![
            "CREATE OR REPLACE VIEW viewtest_superusers AS SELECT * FROM auth_user WHERE is_superuser".to_string(),
            "DROP MATERIALIZED VIEW viewtest_simpleusermaterial".to_string(),
            "CREATE MATERIALIZED VIEW viewtest_simpleusermaterial AS SELECT username FROM auth_user".to_string(),
        ]);
    }

    #[test]
    fn test_no_update_leaves_existing_alone() {
        let catalog = MemoryCatalog::new().with_view("viewtest_superusers", &[]);

        assert_eq!(statuses(&catalog, false, false), vec![SyncStatus::Exists, SyncStatus::Created]);
        assert_eq!(catalog.executed().len(), 1);
    }

    #[test]
    fn test_column_change_needs_force() {
        let catalog = MemoryCatalog::new()
            .with_view("viewtest_superusers", &[])
            .with_replace_conflict("viewtest_superusers");
        assert_eq!(statuses(&catalog, true, false)[0], SyncStatus::ForceRequired);
        assert!(catalog.contains("viewtest_superusers"));

        let forced = MemoryCatalog::new()
            .with_view("viewtest_superusers", &[])
            .with_replace_conflict("viewtest_superusers");
        assert_eq!(statuses(&forced, true, true)[0], SyncStatus::Forced);
        assert!(forced.executed().contains(&"DROP VIEW viewtest_superusers CASCADE".to_string()));
    }

    #[test]
    fn test_failure_carries_view_and_stops_pass() {
        let registry = registry();
        let catalog = MemoryCatalog::new()
            .failing_on("viewtest_superusers", DatabaseError::new("42P01", "relation \"auth_user\" does not exist"));

        let results: Vec<_> = sync_views(&registry, "viewtest", &catalog, true, false).collect();
        assert_eq!(results.len(), 1);

        let err = assert_failed_view(results[0].clone(), "viewtest.Superusers");
        assert!(err.to_string().starts_with("Error syncing view viewtest.Superusers (viewtest_superusers)"));
    }
}
