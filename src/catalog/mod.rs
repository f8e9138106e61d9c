//! Database seam for the executors
//!
//! [`ViewCatalog`] stands for the single connection a drop or sync pass runs
//! on. [`SpiCatalog`] is the backend implementation; the in-memory catalog
//! backs the unit tests.

mod spi;
#[cfg(any(test, feature = "pg_test"))]
pub mod memory;

pub use spi::SpiCatalog;

use crate::ddl::Statement;
use crate::error::{DatabaseError, ViewResult};
use crate::view::ViewDefinition;

pub trait ViewCatalog {
    /// Whether a view of the definition's kind (plain or materialized) with
    /// its target name exists, judged from the system catalog
    fn view_exists(&self, view: &ViewDefinition) -> ViewResult<bool>;

    /// Run one statement. A rejected statement leaves the database as it was.
    fn execute(&self, statement: &Statement<'_>) -> Result<(), DatabaseError>;

    /// Names of the views and materialized views the given view reads from
    fn referenced_views(&self, view: &ViewDefinition) -> ViewResult<Vec<String>>;
}
