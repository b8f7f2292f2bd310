//! SQL plan compilation service.
//!
//! Compiles SQL text into relational plans using a bounded pool of stateful
//! compiler instances, and rewrites previously serialized plans. See
//! [`service::PlanService`] for the entry point.

pub mod access;
pub mod compiler;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod errors;
pub mod factory;
pub mod pipeline;
pub mod pool;
pub mod registry;
pub mod service;
pub mod signatures;
pub mod types;

pub use config::ServiceConfig;
pub use errors::{InvalidParseRequest, PlanServerError};
pub use service::PlanService;
