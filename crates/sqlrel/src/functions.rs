use std::collections::BTreeMap;

use crate::errors::{Result, validation};
use crate::types::DataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    Scalar,
    Aggregate,
    Table,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnType {
    Fixed(DataType),
    /// Same type as the first argument.
    FirstArg,
}

/// Signature of a function known to the validator.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub kind: FunctionKind,
    pub args: Vec<DataType>,
    /// Accepts any number of trailing arguments past `args`.
    pub variadic: bool,
    pub return_type: ReturnType,
}

impl FunctionDef {
    pub fn scalar(name: &str, args: Vec<DataType>, return_type: ReturnType) -> Self {
        FunctionDef {
            name: name.to_ascii_lowercase(),
            kind: FunctionKind::Scalar,
            args,
            variadic: false,
            return_type,
        }
    }

    pub fn table(name: &str, args: Vec<DataType>) -> Self {
        FunctionDef {
            name: name.to_ascii_lowercase(),
            kind: FunctionKind::Table,
            args,
            variadic: false,
            return_type: ReturnType::Fixed(DataType::Any),
        }
    }

    fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    fn accepts(&self, arg_count: usize) -> bool {
        if self.variadic {
            arg_count >= self.args.len()
        } else {
            arg_count == self.args.len()
        }
    }

    fn resolve_return(&self, args: &[DataType]) -> DataType {
        match self.return_type {
            ReturnType::Fixed(t) => t,
            ReturnType::FirstArg => args.first().copied().unwrap_or(DataType::Any),
        }
    }
}

/// Functions the validator resolves calls against.
///
/// Names are case insensitive. A name may carry several overloads which are
/// matched by argument count.
#[derive(Debug, Clone, Default)]
pub struct OperatorTable {
    functions: BTreeMap<String, Vec<FunctionDef>>,
}

impl OperatorTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Table containing the built in scalar and aggregate functions.
    pub fn builtin() -> Self {
        use DataType::*;
        let mut table = Self::empty();
        for def in [
            FunctionDef::scalar("abs", vec![Any], ReturnType::FirstArg),
            FunctionDef::scalar("ceil", vec![Any], ReturnType::FirstArg),
            FunctionDef::scalar("floor", vec![Any], ReturnType::FirstArg),
            FunctionDef::scalar("round", vec![Any], ReturnType::FirstArg),
            FunctionDef::scalar("round", vec![Any, Integer], ReturnType::FirstArg),
            FunctionDef::scalar("lower", vec![Text], ReturnType::Fixed(Text)),
            FunctionDef::scalar("upper", vec![Text], ReturnType::Fixed(Text)),
            FunctionDef::scalar("length", vec![Text], ReturnType::Fixed(Integer)),
            FunctionDef::scalar("char_length", vec![Text], ReturnType::Fixed(Integer)),
            FunctionDef::scalar("coalesce", vec![Any], ReturnType::FirstArg).variadic(),
            FunctionDef::scalar("now", vec![], ReturnType::Fixed(Timestamp)),
        ] {
            table.add(def);
        }
        for name in ["count", "sum", "min", "max", "avg"] {
            table.add(FunctionDef {
                name: name.to_string(),
                kind: FunctionKind::Aggregate,
                args: vec![Any],
                variadic: false,
                return_type: ReturnType::FirstArg,
            });
        }
        table
    }

    pub fn add(&mut self, def: FunctionDef) {
        self.functions.entry(def.name.clone()).or_default().push(def);
    }

    pub fn extend(&mut self, defs: impl IntoIterator<Item = FunctionDef>) {
        for def in defs {
            self.add(def);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&[FunctionDef]> {
        self.functions
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Names of all functions, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(|s| s.as_str())
    }

    /// Resolve a scalar function call and return its result type.
    pub fn resolve_scalar(&self, name: &str, args: &[DataType]) -> Result<DataType> {
        let defs = self
            .lookup(name)
            .ok_or_else(|| validation!("No match found for function signature {name}()"))?;

        let def = defs
            .iter()
            .find(|def| def.kind == FunctionKind::Scalar && def.accepts(args.len()))
            .ok_or_else(|| {
                let types: Vec<_> = args.iter().map(|t| format!("<{t}>")).collect();
                validation!(
                    "No match found for function signature {name}({})",
                    types.join(", ")
                )
            })?;

        Ok(def.resolve_return(args))
    }
}
