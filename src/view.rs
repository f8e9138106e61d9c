//! Declared views
//!
//! A [`ViewDefinition`] is one plain or materialized view declared by an
//! application module. Definitions are read-only once registered: drop and
//! sync passes only observe them.

use std::fmt;

/// One declared database view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewDefinition {
    /// Owning module (application) name
    pub module: String,
    /// Declared name inside the module, e.g. `SimpleUser`
    pub name: String,
    /// Target relation, optionally schema-qualified, e.g. `viewtest_simpleuser`
    pub table_name: String,
    /// The SELECT the view is defined by
    pub definition: String,
    pub materialized: bool,
}

impl ViewDefinition {
    pub fn new(
        module: impl Into<String>,
        name: impl Into<String>,
        table_name: impl Into<String>,
        definition: impl Into<String>,
        materialized: bool,
    ) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            table_name: table_name.into(),
            definition: definition.into(),
            materialized,
        }
    }

    /// Human-readable identity: `<module>.<name>`
    pub fn display_name(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }

    pub fn kind(&self) -> ViewKind {
        if self.materialized {
            ViewKind::Materialized
        } else {
            ViewKind::Plain
        }
    }

    /// Split `table_name` into schema and relation name
    pub fn qualified_name(&self) -> QualifiedName<'_> {
        QualifiedName::parse(&self.table_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    Plain,
    Materialized,
}

impl ViewKind {
    /// Keyword used in DDL (`VIEW` / `MATERIALIZED VIEW`)
    pub fn keyword(self) -> &'static str {
        match self {
            ViewKind::Plain => "VIEW",
            ViewKind::Materialized => "MATERIALIZED VIEW",
        }
    }
}

/// A relation name with an optional schema prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualifiedName<'a> {
    pub schema: Option<&'a str>,
    pub relname: &'a str,
}

impl<'a> QualifiedName<'a> {
    pub fn parse(table_name: &'a str) -> Self {
        match table_name.split_once('.') {
            Some((schema, relname)) => Self { schema: Some(schema), relname },
            None => Self { schema: None, relname: table_name },
        }
    }
}

impl fmt::Display for QualifiedName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.relname),
            None => f.write_str(self.relname),
        }
    }
}
