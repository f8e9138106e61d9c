//! Assertions over `ViewResult`s shared by the unit and pg tests

#![cfg(any(test, feature = "pg_test"))]

use std::fmt::Debug;

use crate::error::{ViewError, ViewResult};

/// The error of a result that must have failed
///
/// # Panics
/// If `result` is `Ok`.
pub fn expect_view_error<T: Debug>(result: ViewResult<T>, expected: &str) -> ViewError {
    result.map_or_else(
        |e| e,
        |value| panic!("Expected {expected}, but the call succeeded with {value:?}"),
    )
}

/// # Panics
/// If `result` is `Ok` or fails with another SQLSTATE.
pub fn assert_error_sqlstate<T: Debug>(result: ViewResult<T>, expected_sqlstate: &str) {
    let e = expect_view_error(result, &format!("SQLSTATE {expected_sqlstate}"));
    assert_eq!(
        e.sqlstate(),
        expected_sqlstate,
        "Expected SQLSTATE {expected_sqlstate}, got {}: {e}",
        e.sqlstate()
    );
}

/// # Panics
/// If `result` is `Ok` or its message lacks `expected_substring`.
pub fn assert_error_contains<T: Debug>(result: ViewResult<T>, expected_substring: &str) {
    let message = expect_view_error(result, &format!("an error mentioning '{expected_substring}'")).to_string();
    assert!(
        message.contains(expected_substring),
        "Error message '{message}' does not contain '{expected_substring}'"
    );
}

/// Check that a statement failure was pinned on the view `display_name`
/// and hand the error back for further checks
///
/// # Panics
/// If `result` is `Ok`, or the error does not name that view.
pub fn assert_failed_view<T: Debug>(result: ViewResult<T>, display_name: &str) -> ViewError {
    let e = expect_view_error(result, &format!("a failure of {display_name}"));
    assert_eq!(
        e.display_name(),
        Some(display_name),
        "Expected a failure naming {display_name}, got {e:?}"
    );
    assert!(e.view().is_some(), "Failure naming {display_name} carries no view");
    e
}
