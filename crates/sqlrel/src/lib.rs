//! Relational planning for SQL statements.
//!
//! Statements are parsed with `sqlparser`, bound against a [`Catalog`] into a
//! [`LogicalPlan`], and rewritten with the rules in [`rules`].

pub mod capture;
pub mod catalog;
pub mod completion;
pub mod errors;
pub mod expr;
pub mod functions;
pub mod json;
pub mod parse;
pub mod plan;
pub mod planner;
pub mod rules;
pub mod types;

pub use catalog::{Catalog, MemoryCatalog};
pub use plan::LogicalPlan;
pub use planner::Planner;
