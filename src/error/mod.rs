use pgrx::pg_sys::errcodes::PgSqlErrorCode;
use std::fmt;

use crate::view::ViewDefinition;

pub mod testing;

/// A statement the database rejected, as reported by PostgreSQL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseError {
    /// Five-character SQLSTATE, e.g. `2BP01`
    pub sqlstate: String,
    pub message: String,
    pub detail: Option<String>,
}

impl DatabaseError {
    pub fn new(sqlstate: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sqlstate: sqlstate.into(),
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Build from a caught PostgreSQL error report
    pub fn from_code(code: PgSqlErrorCode, message: &str, detail: Option<&str>) -> Self {
        Self {
            sqlstate: unpack_sqlstate(code as i32),
            message: message.to_string(),
            detail: detail.map(str::to_string),
        }
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (SQLSTATE {})", self.message, self.sqlstate)?;
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {detail}")?;
        }
        Ok(())
    }
}

impl std::error::Error for DatabaseError {}

/// Main error type for pgviews
#[derive(Debug, Clone, PartialEq)]
pub enum ViewError {
    // ============ Classified statement failures ============
    /// The view exists but the database refused to drop it
    DropFailed {
        view: Box<ViewDefinition>,
        display_name: String,
        source: DatabaseError,
    },

    /// Creating or replacing the view failed
    SyncFailed {
        view: Box<ViewDefinition>,
        display_name: String,
        source: DatabaseError,
    },

    /// Any other database error, passed through untouched
    Database(DatabaseError),

    // ============ Registry Errors (42xxx) ============
    /// Module, view or table name is not a plain lowercase identifier
    InvalidIdentifier {
        parameter: String,
        value: String,
        reason: String,
    },

    /// Definition SQL is unusable
    InvalidDefinition {
        table_name: String,
        reason: String,
    },

    /// The target table is already declared (possibly by another module)
    ViewAlreadyRegistered {
        table_name: String,
        module: String,
    },

    /// The module already declares a view with this name
    DuplicateViewName {
        module: String,
        name: String,
    },

    // ============ Dependency Errors (5xxxx) ============
    /// Views of a module depend on each other in a cycle
    CircularDependency {
        cycle: Vec<String>,
    },

    /// View-on-view chain deeper than the configured limit
    DependencyDepthExceeded {
        depth: usize,
        max_depth: usize,
    },

    // ============ I/O and System Errors (XX000) ============
    /// Catalog lookup failed
    CatalogError {
        operation: String,
        pg_error: String,
    },

    /// SPI operation failed
    SpiError {
        query: String,
        error: String,
    },

    /// Serialization/deserialization failed
    SerializationError {
        message: String,
    },
}

impl ViewError {
    /// PostgreSQL SQLSTATE code for this error
    ///
    /// Errors that came from the database keep the database's code.
    pub fn sqlstate(&self) -> &str {
        use ViewError::*;
        match self {
            DropFailed { source, .. } | SyncFailed { source, .. } | Database(source) => {
                source.sqlstate.as_str()
            }

            InvalidIdentifier { .. } => "42602", // Invalid name
            InvalidDefinition { .. } => "22023", // Invalid parameter value
            ViewAlreadyRegistered { .. } | DuplicateViewName { .. } => "42710", // Duplicate object

            CircularDependency { .. } => "55P03",
            DependencyDepthExceeded { .. } => "54001", // Statement too complex

            CatalogError { .. } => "XX000",
            SpiError { .. } => "XX000",
            SerializationError { .. } => "XX000",
        }
    }

    pub fn error_code(&self) -> PgSqlErrorCode {
        PgSqlErrorCode::from(pack_sqlstate(self.sqlstate()))
    }

    /// The view this error is about, for the classified statement failures
    pub fn view(&self) -> Option<&ViewDefinition> {
        match self {
            ViewError::DropFailed { view, .. } | ViewError::SyncFailed { view, .. } => Some(&**view),
            _ => None,
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        match self {
            ViewError::DropFailed { display_name, .. }
            | ViewError::SyncFailed { display_name, .. } => Some(display_name.as_str()),
            _ => None,
        }
    }

    /// Database detail line, if the database supplied one
    pub fn detail(&self) -> Option<&str> {
        match self {
            ViewError::DropFailed { source, .. }
            | ViewError::SyncFailed { source, .. }
            | ViewError::Database(source) => source.detail.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for ViewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ViewError::*;
        match self {
            DropFailed { view, display_name, source } => {
                write!(f, "Error dropping view {} ({}): {}",
                       display_name, view.table_name, source.message)
            }
            SyncFailed { view, display_name, source } => {
                write!(f, "Error syncing view {} ({}): {}",
                       display_name, view.table_name, source.message)
            }
            Database(source) => write!(f, "{}", source.message),
            InvalidIdentifier { parameter, value, reason } => {
                write!(f, "Invalid {} '{}': {}", parameter, value, reason)
            }
            InvalidDefinition { table_name, reason } => {
                write!(f, "Invalid definition for view '{}': {}", table_name, reason)
            }
            ViewAlreadyRegistered { table_name, module } => {
                write!(f, "View '{}' is already registered by module '{}'", table_name, module)
            }
            DuplicateViewName { module, name } => {
                write!(f, "Module '{}' already declares a view named '{}'", module, name)
            }
            CircularDependency { cycle } => {
                write!(f, "Circular dependency detected: {}", cycle.join(" → "))
            }
            DependencyDepthExceeded { depth, max_depth } => {
                write!(f, "Dependency depth {} exceeds maximum {}", depth, max_depth)
            }
            CatalogError { operation, pg_error } => {
                write!(f, "Catalog operation '{}' failed: {}", operation, pg_error)
            }
            SpiError { query, error } => {
                write!(f, "SPI query failed: {}\nQuery: {}", error,
                       if query.len() > 100 { &query[..100] } else { query })
            }
            SerializationError { message } => {
                write!(f, "Serialization error: {}", message)
            }
        }
    }
}

impl std::error::Error for ViewError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ViewError::DropFailed { source, .. }
            | ViewError::SyncFailed { source, .. }
            | ViewError::Database(source) => Some(source),
            _ => None,
        }
    }
}

/// Result type for pgviews operations
pub type ViewResult<T> = Result<T, ViewError>;

/// Convert SpiError to ViewError
impl From<pgrx::spi::Error> for ViewError {
    fn from(e: pgrx::spi::Error) -> Self {
        ViewError::SpiError {
            query: "Unknown".to_string(),
            error: e.to_string(),
        }
    }
}

/// Convert serde_json::Error to ViewError
impl From<serde_json::Error> for ViewError {
    fn from(e: serde_json::Error) -> Self {
        ViewError::SerializationError {
            message: format!("JSON serialization error: {}", e),
        }
    }
}

/// Pack a five-character SQLSTATE the way PostgreSQL's `MAKE_SQLSTATE` does
pub(crate) fn pack_sqlstate(sqlstate: &str) -> i32 {
    sqlstate
        .bytes()
        .take(5)
        .enumerate()
        .fold(0, |code, (i, ch)| {
            code | ((i32::from(ch.wrapping_sub(b'0')) & 0x3F) << (6 * i))
        })
}

/// Inverse of [`pack_sqlstate`]
pub(crate) fn unpack_sqlstate(code: i32) -> String {
    (0..5)
        .map(|i| char::from(((code >> (6 * i)) & 0x3F) as u8 + b'0'))
        .collect()
}
