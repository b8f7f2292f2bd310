//! Types exchanged with clients of the service.

use serde::{Deserialize, Serialize};
use sqlrel::rules::FilterPushDownHint;

use crate::access::AccessedObjects;

/// Identity a compiler instance is bound to for the duration of one call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationUser {
    pub user: String,
    pub session: String,
    pub database: String,
}

impl CompilationUser {
    pub fn new(
        user: impl Into<String>,
        session: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        CompilationUser {
            user: user.into(),
            session: session.into(),
            database: database.into(),
        }
    }
}

/// Describes one join input filters may be pushed into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPushDownInfo {
    pub input_prev: i32,
    pub input_start: i32,
    pub input_next: i32,
}

impl From<FilterPushDownInfo> for FilterPushDownHint {
    fn from(info: FilterPushDownInfo) -> Self {
        FilterPushDownHint {
            input_prev: info.input_prev.into(),
            input_start: info.input_start.into(),
            input_next: info.input_next.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    pub pushdown_hints: Vec<FilterPushDownHint>,
    /// Parse with the permissive grammar.
    pub legacy_syntax: bool,
    /// Return the textual explain form instead of JSON.
    pub is_explain: bool,
    /// Run the view simplification rules after planning.
    pub is_view_optimize: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub user: String,
    pub session: String,
    pub catalog: String,
    pub sql_text: String,
    #[serde(default)]
    pub filter_push_down_info: Vec<FilterPushDownInfo>,
    #[serde(default)]
    pub legacy_syntax: bool,
    #[serde(default)]
    pub is_explain: bool,
    #[serde(default)]
    pub is_view_optimize: bool,
}

impl ProcessRequest {
    /// Request with only the statement and database set.
    pub fn new(catalog: impl Into<String>, sql_text: impl Into<String>) -> Self {
        ProcessRequest {
            catalog: catalog.into(),
            sql_text: sql_text.into(),
            ..Default::default()
        }
    }

    pub fn compilation_user(&self) -> CompilationUser {
        CompilationUser::new(&self.user, &self.session, &self.catalog)
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            pushdown_hints: self
                .filter_push_down_info
                .iter()
                .copied()
                .map(FilterPushDownHint::from)
                .collect(),
            legacy_syntax: self.legacy_syntax,
            is_explain: self.is_explain,
            is_view_optimize: self.is_view_optimize,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanResult {
    /// Objects exactly as named by the statement.
    pub primary_accessed_objects: AccessedObjects,
    /// Same as primary, with views in the select set replaced by the base
    /// tables they read.
    pub resolved_accessed_objects: AccessedObjects,
    pub plan_result: String,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMetadataRequest {
    pub catalog: String,
    pub table: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionHintsRequest {
    pub user: String,
    pub session: String,
    pub catalog: String,
    #[serde(default)]
    pub visible_tables: Vec<String>,
    pub sql: String,
    pub cursor: usize,
}

impl CompletionHintsRequest {
    pub fn compilation_user(&self) -> CompilationUser {
        CompilationUser::new(&self.user, &self.session, &self.catalog)
    }
}

/// Argument and return types of extension functions as sent by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtArgumentType {
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    Void,
    PInt8,
    PInt16,
    PInt32,
    PInt64,
    PFloat,
    PDouble,
    PBool,
    Bool,
    ArrayInt8,
    ArrayInt16,
    ArrayInt32,
    ArrayInt64,
    ArrayFloat,
    ArrayDouble,
    ArrayBool,
    ColumnInt8,
    ColumnInt16,
    ColumnInt32,
    ColumnInt64,
    ColumnFloat,
    ColumnDouble,
    ColumnBool,
    GeoPoint,
    GeoLineString,
    Cursor,
    GeoPolygon,
    GeoMultiPolygon,
}

/// A scalar function registered at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDefinedFunction {
    pub name: String,
    pub arg_types: Vec<ExtArgumentType>,
    pub ret_type: ExtArgumentType,
}

/// A table function registered at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDefinedTableFunction {
    pub name: String,
    pub sql_arg_types: Vec<ExtArgumentType>,
    pub output_arg_types: Vec<ExtArgumentType>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeFunctionsRequest {
    #[serde(default)]
    pub udfs: Vec<UserDefinedFunction>,
    #[serde(default)]
    pub udtfs: Vec<UserDefinedTableFunction>,
}
