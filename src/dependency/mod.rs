pub mod graph;

pub use graph::{drop_order, DependencyGraph};
