use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::ViewCatalog;
use crate::ddl::Statement;
use crate::error::{DatabaseError, ViewResult};
use crate::view::{QualifiedName, ViewDefinition, ViewKind};

#[derive(Debug, Clone)]
struct Relation {
    kind: ViewKind,
    depends_on: Vec<String>,
}

/// In-memory stand-in for a database holding views
///
/// Mimics what PostgreSQL does for the statements the executors issue:
/// RESTRICT drops are refused while dependents exist, CASCADE drops take the
/// dependents along, and every statement is recorded.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    relations: RefCell<BTreeMap<String, Relation>>,
    executed: RefCell<Vec<String>>,
    failures: RefCell<HashMap<String, DatabaseError>>,
    replace_conflicts: RefCell<HashSet<String>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_view(self, name: &str, depends_on: &[&str]) -> Self {
        self.insert(name, ViewKind::Plain, depends_on);
        self
    }

    pub fn with_materialized_view(self, name: &str, depends_on: &[&str]) -> Self {
        self.insert(name, ViewKind::Materialized, depends_on);
        self
    }

    /// Every statement touching `name` fails with `error`
    pub fn failing_on(self, name: &str, error: DatabaseError) -> Self {
        self.failures.borrow_mut().insert(name.to_string(), error);
        self
    }

    /// `CREATE OR REPLACE VIEW name` fails as if the column list changed
    pub fn with_replace_conflict(self, name: &str) -> Self {
        self.replace_conflicts.borrow_mut().insert(name.to_string());
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.relations.borrow().contains_key(name)
    }

    pub fn kind_of(&self, name: &str) -> Option<ViewKind> {
        self.relations.borrow().get(name).map(|r| r.kind)
    }

    /// SQL of every statement issued so far, in order
    pub fn executed(&self) -> Vec<String> {
        self.executed.borrow().clone()
    }

    fn insert(&self, name: &str, kind: ViewKind, depends_on: &[&str]) {
        self.relations.borrow_mut().insert(
            name.to_string(),
            Relation {
                kind,
                depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            },
        );
    }

    fn dependents_of(&self, name: &str) -> Vec<String> {
        self.relations
            .borrow()
            .iter()
            .filter(|(_, rel)| rel.depends_on.iter().any(|d| d == name))
            .map(|(dependent, _)| dependent.clone())
            .collect()
    }

    fn drop_relation(&self, kind: ViewKind, name: &str, cascade: bool) -> Result<(), DatabaseError> {
        let existing = self.kind_of(name);
        match existing {
            None => {
                return Err(DatabaseError::new(
                    "42P01",
                    format!("{} \"{}\" does not exist", kind_noun(kind), name),
                ));
            }
            Some(found) if found != kind => {
                return Err(DatabaseError::new(
                    "42809",
                    format!("\"{}\" is not a {}", name, kind_noun(kind)),
                ));
            }
            Some(_) => {}
        }

        let dependents = self.dependents_of(name);
        if !dependents.is_empty() && !cascade {
            let detail = dependents
                .iter()
                .map(|d| format!("view {} depends on {} {}", d, kind_noun(kind), name))
                .collect::<Vec<_>>()
                .join("\n");
            return Err(DatabaseError::new(
                "2BP01",
                format!("cannot drop {} {} because other objects depend on it", kind_noun(kind), name),
            )
            .with_detail(detail));
        }

        self.relations.borrow_mut().remove(name);
        for dependent in dependents {
            if let Some(dep_kind) = self.kind_of(&dependent) {
                self.drop_relation(dep_kind, &dependent, true)?;
            }
        }
        Ok(())
    }

    fn create_relation(
        &self,
        kind: ViewKind,
        name: &str,
        or_replace: bool,
    ) -> Result<(), DatabaseError> {
        if self.contains(name) {
            if !or_replace {
                return Err(DatabaseError::new(
                    "42P07",
                    format!("relation \"{}\" already exists", name),
                ));
            }
            if self.replace_conflicts.borrow().contains(name) {
                return Err(DatabaseError::new("42P16", "cannot drop columns from view"));
            }
            // Replacing keeps the existing dependencies
            return Ok(());
        }

        self.insert(name, kind, &[]);
        Ok(())
    }
}

fn kind_noun(kind: ViewKind) -> &'static str {
    match kind {
        ViewKind::Plain => "view",
        ViewKind::Materialized => "materialized view",
    }
}

impl ViewCatalog for MemoryCatalog {
    fn view_exists(&self, view: &ViewDefinition) -> ViewResult<bool> {
        Ok(self.kind_of(&view.table_name) == Some(view.kind()))
    }

    fn execute(&self, statement: &Statement<'_>) -> Result<(), DatabaseError> {
        self.executed.borrow_mut().push(statement.to_string());

        if let Some(error) = self.failures.borrow().get(statement.target()) {
            return Err(error.clone());
        }

        match *statement {
            Statement::Drop { kind, name, cascade } => self.drop_relation(kind, name, cascade),
            Statement::Create { kind, name, or_replace, .. } => {
                self.create_relation(kind, name, or_replace)
            }
        }
    }

    fn referenced_views(&self, view: &ViewDefinition) -> ViewResult<Vec<String>> {
        let relations = self.relations.borrow();
        Ok(relations
            .get(&view.table_name)
            .map(|rel| {
                rel.depends_on
                    .iter()
                    .filter(|d| relations.contains_key(d.as_str()))
                    .map(|d| QualifiedName::parse(d).relname.to_string())
                    .collect()
            })
            .unwrap_or_default())
    }
}
