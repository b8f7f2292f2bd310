//! The two compilation paths.
//!
//! [`standard`] compiles SQL text. [`rewrite`] takes a previously serialized
//! plan and rewrites it until it stops changing.

pub mod rewrite;
pub mod standard;

use crate::access::AccessedObjects;

/// Output of either pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOutput {
    pub plan_text: String,
    pub primary: AccessedObjects,
    pub resolved: AccessedObjects,
}
