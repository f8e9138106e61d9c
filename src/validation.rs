//! Input Validation Module
//!
//! Table names are spliced into DDL unquoted, so every name that reaches the
//! registry is checked here first.
//!
//! ## Rules
//!
//! - Table names: lowercase identifier, optional `schema.` prefix, each part
//!   at most 63 bytes. Unquoted identifiers fold to lowercase in PostgreSQL,
//!   so uppercase would never match the catalog.
//! - Declared view names: identifier characters, any case.
//! - Module names: identifier parts separated by dots.
//! - Definitions: non-empty, a single statement. Semicolons inside string
//!   literals, quoted identifiers, dollar-quoted bodies and comments do not
//!   separate statements.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::MAX_IDENTIFIER_LENGTH;
use crate::error::{ViewError, ViewResult};
use crate::view::{QualifiedName, ViewDefinition};

static TABLE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_$]*(\.[a-z_][a-z0-9_$]*)?$").unwrap());

static DECLARED_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

static MODULE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").unwrap());

static DOLLAR_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\$([A-Za-z_][A-Za-z0-9_]*)?\$").unwrap());

/// Validate a view's target table name
///
/// # Examples
///
/// ```rust,ignore
/// validate_table_name("viewtest_superusers")?;        // ✓
/// validate_table_name("reporting.user_totals")?;      // ✓
/// validate_table_name("Viewtest_Superusers")?;        // ✗ uppercase
/// validate_table_name("users; DROP TABLE x")?;        // ✗ injection
/// ```
pub fn validate_table_name(table_name: &str) -> ViewResult<()> {
    if table_name.is_empty() {
        return Err(invalid("table_name", table_name, "Identifier cannot be empty"));
    }

    if !TABLE_NAME.is_match(table_name) {
        return Err(invalid(
            "table_name",
            table_name,
            "Must be a lowercase identifier, optionally schema-qualified",
        ));
    }

    let name = QualifiedName::parse(table_name);
    for part in name.schema.into_iter().chain(std::iter::once(name.relname)) {
        if part.len() > MAX_IDENTIFIER_LENGTH {
            return Err(ViewError::InvalidIdentifier {
                parameter: "table_name".to_string(),
                value: format!("{}... ({} chars)", &part[..20], part.len()),
                reason: format!("Identifier too long (max {MAX_IDENTIFIER_LENGTH} characters)"),
            });
        }
    }

    Ok(())
}

pub fn validate_declared_name(name: &str) -> ViewResult<()> {
    if !DECLARED_NAME.is_match(name) {
        return Err(invalid("name", name, "Must contain only alphanumeric characters and underscores"));
    }
    Ok(())
}

pub fn validate_module_name(module: &str) -> ViewResult<()> {
    if !MODULE_NAME.is_match(module) {
        return Err(invalid("module", module, "Must be dot-separated identifiers"));
    }
    Ok(())
}

/// Reject empty definitions and trailing extra statements
pub fn validate_definition(table_name: &str, definition: &str) -> ViewResult<()> {
    let trimmed = definition.trim().trim_end_matches(';').trim_end();

    if trimmed.is_empty() {
        return Err(ViewError::InvalidDefinition {
            table_name: table_name.to_string(),
            reason: "Definition cannot be empty".to_string(),
        });
    }

    if has_statement_separator(trimmed) {
        return Err(ViewError::InvalidDefinition {
            table_name: table_name.to_string(),
            reason: "Definition must be a single statement".to_string(),
        });
    }

    Ok(())
}

/// Whether `sql` has a `;` outside literals, quoted identifiers and comments
fn has_statement_separator(sql: &str) -> bool {
    let bytes = sql.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b';' => return true,
            quote @ (b'\'' | b'"') => {
                // E'...' strings take backslash escapes
                let escapes = quote == b'\'' && i > 0 && matches!(bytes[i - 1], b'E' | b'e');
                i += 1;
                while i < bytes.len() {
                    if escapes && bytes[i] == b'\\' {
                        i += 2;
                        continue;
                    }
                    if bytes[i] == quote {
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                // Block comments nest in PostgreSQL
                let mut depth = 1;
                i += 2;
                while i < bytes.len() && depth > 0 {
                    if bytes[i..].starts_with(b"/*") {
                        depth += 1;
                        i += 2;
                    } else if bytes[i..].starts_with(b"*/") {
                        depth -= 1;
                        i += 2;
                    } else {
                        i += 1;
                    }
                }
                continue;
            }
            b'$' if i == 0 || !is_identifier_byte(bytes[i - 1]) => {
                if let Some(tag) = DOLLAR_TAG.find(&sql[i..]) {
                    let body = i + tag.len();
                    match sql[body..].find(tag.as_str()) {
                        Some(end) => i = body + end + tag.len(),
                        None => return false,
                    }
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }

    false
}

fn is_identifier_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Run every check a definition must pass before registration
pub fn validate_view(view: &ViewDefinition) -> ViewResult<()> {
    validate_module_name(&view.module)?;
    validate_declared_name(&view.name)?;
    validate_table_name(&view.table_name)?;
    validate_definition(&view.table_name, &view.definition)
}

fn invalid(parameter: &str, value: &str, reason: &str) -> ViewError {
    ViewError::InvalidIdentifier {
        parameter: parameter.to_string(),
        value: sanitize_for_logging(value),
        reason: reason.to_string(),
    }
}

/// Sanitize string for logging (truncate, remove control chars)
fn sanitize_for_logging(s: &str) -> String {
    let max_len = 50;
    let truncated = if s.len() > max_len {
        let cut = (0..=max_len).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0);
        format!("{}...", &s[..cut])
    } else {
        s.to_string()
    };

    truncated
        .replace('\0', "\\0")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}
