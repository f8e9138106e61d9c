//! Statement execution inside an internal subtransaction
//!
//! A DDL statement that PostgreSQL rejects aborts the surrounding
//! transaction. Running each statement in its own subtransaction lets the
//! executors report the rejection and lets callers carry on with the next
//! module. Errors other than PostgreSQL error reports (Rust panics) are
//! rethrown as-is.

use pgrx::pg_sys;
use pgrx::pg_sys::panic::CaughtError;
use pgrx::prelude::*;
use pgrx::PgTryBuilder;

use crate::error::DatabaseError;

/// Run `sql`, rolling back only this statement if PostgreSQL raises an error
pub fn run_statement(sql: &str) -> Result<(), DatabaseError> {
    // SAFETY: we are inside a backend transaction (SPI-callable context), and
    // the memory context and resource owner are restored below on every path
    // that returns.
    let (old_context, old_owner) = unsafe {
        let saved = (pg_sys::CurrentMemoryContext, pg_sys::CurrentResourceOwner);
        pg_sys::BeginInternalSubTransaction(std::ptr::null());
        pg_sys::CurrentMemoryContext = saved.0;
        saved
    };

    let outcome = PgTryBuilder::new(|| {
        Spi::run(sql).map_err(|e| DatabaseError::new("XX000", e.to_string()))
    })
    .catch_others(|caught| {
        if let CaughtError::PostgresError(report) | CaughtError::ErrorReport(report) = &caught {
            return Err(DatabaseError::from_code(
                report.sql_error_code(),
                report.message(),
                report.detail(),
            ));
        }
        caught.rethrow()
    })
    .execute();

    // SAFETY: the subtransaction started above is still the current one
    unsafe {
        if outcome.is_ok() {
            pg_sys::ReleaseCurrentSubTransaction();
        } else {
            pg_sys::RollbackAndReleaseCurrentSubTransaction();
        }
        pg_sys::CurrentMemoryContext = old_context;
        pg_sys::CurrentResourceOwner = old_owner;
    }

    outcome
}

#[cfg(any(test, feature = "pg_test"))]
#[pg_schema]
mod tests {
    use pgrx::prelude::*;
    use super::*;

    #[pg_test]
    fn test_success_is_kept() {
        run_statement("CREATE TABLE subxact_kept (id INT)").unwrap();
        let exists = Spi::get_one::<bool>("SELECT to_regclass('subxact_kept') IS NOT NULL");
        assert_eq!(exists, Ok(Some(true)));
    }

    #[pg_test]
    fn test_error_is_captured_with_sqlstate() {
        let err = run_statement("DROP VIEW subxact_does_not_exist").unwrap_err();
        assert_eq!(err.sqlstate, "42P01");
        assert!(err.message.contains("subxact_does_not_exist"));

        // The outer transaction keeps working
        assert_eq!(Spi::get_one::<i32>("SELECT 1"), Ok(Some(1)));
    }

    #[pg_test]
    fn test_failed_statement_is_rolled_back() {
        let err = run_statement(
            "CREATE TABLE subxact_partial (id INT); SELECT 1 / 0"
        ).unwrap_err();
        assert_eq!(err.sqlstate, "22012");

        let exists = Spi::get_one::<bool>("SELECT to_regclass('subxact_partial') IS NOT NULL");
        assert_eq!(exists, Ok(Some(false)));
    }
}
