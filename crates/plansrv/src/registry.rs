//! Extension function signatures known to the service.
//!
//! Functions come from three layers: functions compiled into the engine,
//! user defined functions loaded at startup, and functions registered at
//! runtime. All layers are visible to compilation. Each layer has its own
//! whitelist.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use parking_lot::RwLock;
use serde::Serialize;
use sqlrel::functions::{FunctionDef, OperatorTable, ReturnType};
use sqlrel::types::DataType;
use tracing::{info, warn};

use crate::signatures;
use crate::types::{ExtArgumentType, UserDefinedFunction, UserDefinedTableFunction};

/// Type tag of an extension function argument or result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgType {
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

impl From<ExtArgumentType> for ArgType {
    fn from(ty: ExtArgumentType) -> Self {
        match ty {
            ExtArgumentType::Int8 => ArgType::Int8,
            ExtArgumentType::Int16 => ArgType::Int16,
            ExtArgumentType::Int32 => ArgType::Int32,
            ExtArgumentType::Int64 => ArgType::Int64,
            ExtArgumentType::Float => ArgType::Float,
            ExtArgumentType::Double => ArgType::Double,
            ExtArgumentType::Void => ArgType::Void,
            ExtArgumentType::PInt8 => ArgType::PInt8,
            ExtArgumentType::PInt16 => ArgType::PInt16,
            ExtArgumentType::PInt32 => ArgType::PInt32,
            ExtArgumentType::PInt64 => ArgType::PInt64,
            ExtArgumentType::PFloat => ArgType::PFloat,
            ExtArgumentType::PDouble => ArgType::PDouble,
            ExtArgumentType::PBool => ArgType::PBool,
            ExtArgumentType::Bool => ArgType::Bool,
            ExtArgumentType::ArrayInt8 => ArgType::ArrayInt8,
            ExtArgumentType::ArrayInt16 => ArgType::ArrayInt16,
            ExtArgumentType::ArrayInt32 => ArgType::ArrayInt32,
            ExtArgumentType::ArrayInt64 => ArgType::ArrayInt64,
            ExtArgumentType::ArrayFloat => ArgType::ArrayFloat,
            ExtArgumentType::ArrayDouble => ArgType::ArrayDouble,
            ExtArgumentType::ArrayBool => ArgType::ArrayBool,
            ExtArgumentType::ColumnInt8 => ArgType::ColumnInt8,
            ExtArgumentType::ColumnInt16 => ArgType::ColumnInt16,
            ExtArgumentType::ColumnInt32 => ArgType::ColumnInt32,
            ExtArgumentType::ColumnInt64 => ArgType::ColumnInt64,
            ExtArgumentType::ColumnFloat => ArgType::ColumnFloat,
            ExtArgumentType::ColumnDouble => ArgType::ColumnDouble,
            ExtArgumentType::ColumnBool => ArgType::ColumnBool,
            ExtArgumentType::GeoPoint => ArgType::GeoPoint,
            ExtArgumentType::GeoLineString => ArgType::GeoLineString,
            ExtArgumentType::Cursor => ArgType::Cursor,
            ExtArgumentType::GeoPolygon => ArgType::GeoPolygon,
            ExtArgumentType::GeoMultiPolygon => ArgType::GeoMultiPolygon,
        }
    }
}

impl ArgType {
    /// Parse a C type spelling as found in signature files.
    ///
    /// Whitespace and `const` qualifiers must already be stripped.
    pub fn from_c_type(spelling: &str) -> Option<ArgType> {
        let ty = match spelling {
            "int8_t" | "char" | "signed char" => ArgType::Int8,
            "int16_t" | "short" => ArgType::Int16,
            "int32_t" | "int" => ArgType::Int32,
            "int64_t" | "long" | "long long" => ArgType::Int64,
            "float" => ArgType::Float,
            "double" => ArgType::Double,
            "void" => ArgType::Void,
            "bool" | "_Bool" => ArgType::Bool,
            "int8_t*" | "char*" => ArgType::PInt8,
            "int16_t*" => ArgType::PInt16,
            "int32_t*" | "int*" => ArgType::PInt32,
            "int64_t*" => ArgType::PInt64,
            "float*" => ArgType::PFloat,
            "double*" => ArgType::PDouble,
            "bool*" => ArgType::PBool,
            "Array<int8_t>" => ArgType::ArrayInt8,
            "Array<int16_t>" => ArgType::ArrayInt16,
            "Array<int32_t>" => ArgType::ArrayInt32,
            "Array<int64_t>" => ArgType::ArrayInt64,
            "Array<float>" => ArgType::ArrayFloat,
            "Array<double>" => ArgType::ArrayDouble,
            "Array<bool>" => ArgType::ArrayBool,
            "Column<int8_t>" => ArgType::ColumnInt8,
            "Column<int16_t>" => ArgType::ColumnInt16,
            "Column<int32_t>" => ArgType::ColumnInt32,
            "Column<int64_t>" => ArgType::ColumnInt64,
            "Column<float>" => ArgType::ColumnFloat,
            "Column<double>" => ArgType::ColumnDouble,
            "Column<bool>" => ArgType::ColumnBool,
            "GeoPoint" => ArgType::GeoPoint,
            "GeoLineString" => ArgType::GeoLineString,
            "Cursor" => ArgType::Cursor,
            "GeoPolygon" => ArgType::GeoPolygon,
            "GeoMultiPolygon" => ArgType::GeoMultiPolygon,
            _ => return None,
        };
        Some(ty)
    }

    /// Name used for this type in whitelists.
    pub fn whitelist_name(&self) -> &'static str {
        match self {
            ArgType::Int8 => "i8",
            ArgType::Int16 => "i16",
            ArgType::Int32 => "i32",
            ArgType::Int64 => "i64",
            ArgType::Float => "float",
            ArgType::Double => "double",
            ArgType::Void => "void",
            ArgType::PInt8 => "i8*",
            ArgType::PInt16 => "i16*",
            ArgType::PInt32 => "i32*",
            ArgType::PInt64 => "i64*",
            ArgType::PFloat => "float*",
            ArgType::PDouble => "double*",
            ArgType::PBool => "bool*",
            ArgType::Bool => "bool",
            ArgType::ArrayInt8 => "Array<i8>",
            ArgType::ArrayInt16 => "Array<i16>",
            ArgType::ArrayInt32 => "Array<i32>",
            ArgType::ArrayInt64 => "Array<i64>",
            ArgType::ArrayFloat => "Array<float>",
            ArgType::ArrayDouble => "Array<double>",
            ArgType::ArrayBool => "Array<bool>",
            ArgType::ColumnInt8 => "Column<i8>",
            ArgType::ColumnInt16 => "Column<i16>",
            ArgType::ColumnInt32 => "Column<i32>",
            ArgType::ColumnInt64 => "Column<i64>",
            ArgType::ColumnFloat => "Column<float>",
            ArgType::ColumnDouble => "Column<double>",
            ArgType::ColumnBool => "Column<bool>",
            ArgType::GeoPoint => "GeoPoint",
            ArgType::GeoLineString => "GeoLineString",
            ArgType::Cursor => "Cursor",
            ArgType::GeoPolygon => "GeoPolygon",
            ArgType::GeoMultiPolygon => "GeoMultiPolygon",
        }
    }

    /// SQL type used when validating calls.
    ///
    /// Pointer, array, column and geo types have no SQL counterpart and accept
    /// anything.
    pub fn sql_type(&self) -> DataType {
        match self {
            ArgType::Int8 => DataType::TinyInt,
            ArgType::Int16 => DataType::SmallInt,
            ArgType::Int32 => DataType::Integer,
            ArgType::Int64 => DataType::BigInt,
            ArgType::Float => DataType::Float,
            ArgType::Double => DataType::Double,
            ArgType::Bool => DataType::Boolean,
            ArgType::Void => DataType::Null,
            _ => DataType::Any,
        }
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.whitelist_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionFunction {
    Scalar { args: Vec<ArgType>, ret: ArgType },
    Table { args: Vec<ArgType>, outs: Vec<ArgType> },
}

impl ExtensionFunction {
    fn to_function_def(&self, name: &str) -> FunctionDef {
        match self {
            ExtensionFunction::Scalar { args, ret } => FunctionDef::scalar(
                name,
                args.iter().map(ArgType::sql_type).collect(),
                ReturnType::Fixed(ret.sql_type()),
            ),
            ExtensionFunction::Table { args, .. } => {
                FunctionDef::table(name, args.iter().map(ArgType::sql_type).collect())
            }
        }
    }
}

impl From<&UserDefinedFunction> for ExtensionFunction {
    fn from(udf: &UserDefinedFunction) -> Self {
        ExtensionFunction::Scalar {
            args: udf
                .arg_types
                .iter()
                .map(|ty| ArgType::from(*ty))
                .filter(|ty| *ty != ArgType::Void)
                .collect(),
            ret: udf.ret_type.into(),
        }
    }
}

impl From<&UserDefinedTableFunction> for ExtensionFunction {
    fn from(udtf: &UserDefinedTableFunction) -> Self {
        ExtensionFunction::Table {
            args: udtf.sql_arg_types.iter().map(|ty| (*ty).into()).collect(),
            outs: udtf.output_arg_types.iter().map(|ty| (*ty).into()).collect(),
        }
    }
}

/// Functions keyed by name.
pub type FunctionLayer = BTreeMap<String, ExtensionFunction>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryLayer {
    /// Functions compiled into the engine.
    Compiled,
    /// User defined functions loaded at startup.
    LoadTime,
    /// Functions registered while running.
    Runtime,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WhitelistEntry<'a> {
    Scalar {
        name: &'a str,
        ret: &'static str,
        args: Vec<&'static str>,
    },
    Table {
        name: &'a str,
        outs: Vec<&'static str>,
        args: Vec<&'static str>,
    },
}

fn names(types: &[ArgType]) -> Vec<&'static str> {
    types.iter().map(ArgType::whitelist_name).collect()
}

/// Serialize a layer as a JSON whitelist, sorted by name.
pub fn whitelist_json(layer: &FunctionLayer) -> String {
    let entries: Vec<_> = layer
        .iter()
        .map(|(name, func)| match func {
            ExtensionFunction::Scalar { args, ret } => WhitelistEntry::Scalar {
                name,
                ret: ret.whitelist_name(),
                args: names(args),
            },
            ExtensionFunction::Table { args, outs } => WhitelistEntry::Table {
                name,
                outs: names(outs),
                args: names(args),
            },
        })
        .collect();
    // Serializing borrowed strings and vecs can't fail.
    serde_json::to_string(&entries).unwrap_or_else(|_| "[]".to_string())
}

#[derive(Debug)]
struct RegistryState {
    compiled: FunctionLayer,
    load_time: FunctionLayer,
    runtime: FunctionLayer,
    compiled_whitelist: String,
    load_time_whitelist: String,
    runtime_whitelist: String,
    /// Bumped on every runtime registration.
    generation: u64,
}

/// Outcome of replacing the runtime layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeRegistration {
    pub registered: Vec<String>,
    /// Names rejected because they collide with a compiled or load time
    /// function.
    pub rejected: Vec<String>,
    pub generation: u64,
}

#[derive(Debug)]
pub struct FunctionRegistry {
    state: RwLock<RegistryState>,
}

impl FunctionRegistry {
    pub fn new(compiled: FunctionLayer, load_time: FunctionLayer) -> Self {
        let compiled_whitelist = whitelist_json(&compiled);
        let load_time_whitelist = whitelist_json(&load_time);
        FunctionRegistry {
            state: RwLock::new(RegistryState {
                compiled,
                load_time,
                runtime: FunctionLayer::new(),
                compiled_whitelist,
                load_time_whitelist,
                runtime_whitelist: whitelist_json(&FunctionLayer::new()),
                generation: 0,
            }),
        }
    }

    pub fn empty() -> Self {
        Self::new(FunctionLayer::new(), FunctionLayer::new())
    }

    /// Load the compiled and load time layers from signature files.
    ///
    /// Files that can't be read produce an empty layer.
    pub fn load(extension_file: Option<&Path>, udf_file: Option<&Path>) -> Self {
        let compiled = extension_file
            .map(signatures::load_extension_signatures)
            .unwrap_or_default();
        let load_time = udf_file
            .map(signatures::load_udf_signatures)
            .unwrap_or_default();
        info!(
            compiled = compiled.len(),
            load_time = load_time.len(),
            "loaded extension function signatures"
        );
        Self::new(compiled, load_time)
    }

    pub fn whitelist(&self, layer: RegistryLayer) -> String {
        let state = self.state.read();
        match layer {
            RegistryLayer::Compiled => state.compiled_whitelist.clone(),
            RegistryLayer::LoadTime => state.load_time_whitelist.clone(),
            RegistryLayer::Runtime => state.runtime_whitelist.clone(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Look up a function across all layers.
    pub fn lookup(&self, name: &str) -> Option<(RegistryLayer, ExtensionFunction)> {
        let state = self.state.read();
        let layers = [
            (RegistryLayer::Compiled, &state.compiled),
            (RegistryLayer::LoadTime, &state.load_time),
            (RegistryLayer::Runtime, &state.runtime),
        ];
        layers
            .into_iter()
            .find_map(|(layer, funcs)| funcs.get(name).map(|f| (layer, f.clone())))
    }

    /// Replace the runtime layer.
    ///
    /// Functions named like a compiled or load time function are dropped.
    /// The write lock is held for the whole replacement so concurrent
    /// registrations are serialized.
    pub fn register_runtime(
        &self,
        udfs: &[UserDefinedFunction],
        udtfs: &[UserDefinedTableFunction],
    ) -> RuntimeRegistration {
        let mut state = self.state.write();

        let mut runtime = FunctionLayer::new();
        for udf in udfs {
            runtime.insert(udf.name.clone(), ExtensionFunction::from(udf));
        }
        for udtf in udtfs {
            runtime.insert(udtf.name.clone(), ExtensionFunction::from(udtf));
        }

        let mut rejected = Vec::new();
        runtime.retain(|name, _| {
            let collides = contains_name(&state.compiled, name) || contains_name(&state.load_time, name);
            if collides {
                warn!(
                    %name,
                    "extension function already exists, skipping runtime function with the same name"
                );
                rejected.push(name.clone());
            }
            !collides
        });

        state.runtime_whitelist = whitelist_json(&runtime);
        state.runtime = runtime;
        state.generation += 1;

        let registration = RuntimeRegistration {
            registered: state.runtime.keys().cloned().collect(),
            rejected,
            generation: state.generation,
        };
        info!(
            registered = registration.registered.len(),
            rejected = registration.rejected.len(),
            generation = registration.generation,
            "replaced runtime extension functions"
        );
        registration
    }

    /// Snapshot of every callable function, along with the generation it was
    /// taken at.
    pub fn operator_table(&self) -> (OperatorTable, u64) {
        let state = self.state.read();
        let mut table = OperatorTable::builtin();
        for layer in [&state.compiled, &state.load_time, &state.runtime] {
            table.extend(layer.iter().map(|(name, f)| f.to_function_def(name)));
        }
        (table, state.generation)
    }
}

/// Function names resolve case insensitively during validation, so collisions
/// are checked the same way.
fn contains_name(layer: &FunctionLayer, name: &str) -> bool {
    layer.keys().any(|k| k.eq_ignore_ascii_case(name))
}
