use std::fmt;

use crate::view::{ViewDefinition, ViewKind};

/// A DDL statement issued for one declared view
///
/// `Display` renders the SQL. Names are validated at registration and are
/// written unquoted, so they resolve through `search_path` the same way the
/// catalog check does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statement<'a> {
    /// `DROP [MATERIALIZED] VIEW name [CASCADE]`
    Drop {
        kind: ViewKind,
        name: &'a str,
        cascade: bool,
    },
    /// `CREATE [OR REPLACE] [MATERIALIZED] VIEW name AS definition`
    Create {
        kind: ViewKind,
        name: &'a str,
        definition: &'a str,
        or_replace: bool,
    },
}

impl<'a> Statement<'a> {
    /// Drop the view; without `cascade` PostgreSQL applies RESTRICT
    pub fn drop(view: &'a ViewDefinition, cascade: bool) -> Self {
        Statement::Drop {
            kind: view.kind(),
            name: &view.table_name,
            cascade,
        }
    }

    pub fn create(view: &'a ViewDefinition) -> Self {
        Statement::Create {
            kind: view.kind(),
            name: &view.table_name,
            definition: &view.definition,
            or_replace: false,
        }
    }

    /// `CREATE OR REPLACE VIEW`, plain views only
    pub fn replace(view: &'a ViewDefinition) -> Self {
        Statement::Create {
            kind: ViewKind::Plain,
            name: &view.table_name,
            definition: &view.definition,
            or_replace: true,
        }
    }

    pub fn target(&self) -> &'a str {
        match self {
            Statement::Drop { name, .. } | Statement::Create { name, .. } => name,
        }
    }
}

impl fmt::Display for Statement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Drop { kind, name, cascade } => {
                write!(f, "DROP {} {}", kind.keyword(), name)?;
                if *cascade {
                    f.write_str(" CASCADE")?;
                }
                Ok(())
            }
            Statement::Create { kind, name, definition, or_replace } => {
                let definition = definition.trim().trim_end_matches(';').trim_end();
                let replace = if *or_replace { "OR REPLACE " } else { "" };
                write!(f, "CREATE {}{} {} AS {}", replace, kind.keyword(), name, definition)
            }
        }
    }
}
