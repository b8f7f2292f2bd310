//! Parsers for extension function signature files.
//!
//! Compiled extension functions are listed one declaration per line:
//!
//! ```text
//! EXTENSION_NOINLINE double Acos(const double x)
//! ```
//!
//! User defined functions come from a clang AST dump, where the relevant
//! lines look like:
//!
//! ```text
//! |-FunctionDecl 0x55d0 <udf.cpp:3:1, line:5:1> line:3:9 udf_add 'int32_t (int32_t, int32_t)'
//! ```

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, error, warn};

use crate::registry::{ArgType, ExtensionFunction, FunctionLayer};

static EXTENSION_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:EXTENSION_INLINE|EXTENSION_NOINLINE|ALWAYS_INLINE|DEVICE)\s+([^(]+)\(([^)]*)\)")
        .expect("extension declaration regex to be valid")
});

static UDF_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"FunctionDecl\b.*\s([A-Za-z_]\w*)\s+'([^'(]+)\(([^)]*)\)")
        .expect("udf declaration regex to be valid")
});

/// Read compiled extension function signatures.
///
/// A missing or unreadable file yields an empty layer.
pub fn load_extension_signatures(path: &Path) -> FunctionLayer {
    match std::fs::read_to_string(path) {
        Ok(text) => parse_extension_signatures(&text),
        Err(e) => {
            error!(path = %path.display(), %e, "could not load extension function signatures");
            FunctionLayer::new()
        }
    }
}

/// Read user defined function signatures from a clang AST dump.
///
/// A missing or unreadable file yields an empty layer.
pub fn load_udf_signatures(path: &Path) -> FunctionLayer {
    match std::fs::read_to_string(path) {
        Ok(text) => parse_udf_signatures(&text),
        Err(e) => {
            error!(path = %path.display(), %e, "could not load udf function signatures");
            FunctionLayer::new()
        }
    }
}

pub fn parse_extension_signatures(text: &str) -> FunctionLayer {
    let mut layer = FunctionLayer::new();
    for line in text.lines() {
        let Some(caps) = EXTENSION_DECL.captures(line) else {
            continue;
        };
        let Some((ret, name)) = split_return_and_name(&caps[1]) else {
            warn!(%line, "skipping malformed extension function declaration");
            continue;
        };
        let args: Option<Vec<_>> = split_args(&caps[2])
            .map(|arg| parse_type(&strip_arg_name(arg)))
            .collect();
        match (parse_type(&ret), args) {
            (Some(ret), Some(args)) => {
                debug!(%name, "parsed extension function");
                layer.insert(name, ExtensionFunction::Scalar { args, ret });
            }
            _ => warn!(%line, "skipping extension function with unsupported types"),
        }
    }
    layer
}

pub fn parse_udf_signatures(text: &str) -> FunctionLayer {
    let mut layer = FunctionLayer::new();
    for line in text.lines() {
        let Some(caps) = UDF_DECL.captures(line) else {
            continue;
        };
        let name = caps[1].to_string();
        let args: Option<Vec<_>> = split_args(&caps[3]).map(parse_type).collect();
        match (parse_type(&caps[2]), args) {
            (Some(ret), Some(args)) => {
                debug!(%name, "parsed udf");
                layer.insert(name, ExtensionFunction::Scalar { args, ret });
            }
            _ => warn!(%line, "skipping udf with unsupported types"),
        }
    }
    layer
}

/// Split "const int32_t *foo" into ("int32_t*", "foo").
fn split_return_and_name(head: &str) -> Option<(String, String)> {
    let head = head.trim();
    let idx = head.rfind(|c: char| c.is_whitespace() || c == '*')?;
    let (ty, name) = head.split_at(idx + 1);
    let valid_name = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid_name.then(|| (normalize_type(ty), name.to_string()))
}

/// Arguments of a declaration, with "()" and "(void)" meaning none.
fn split_args(args: &str) -> impl Iterator<Item = &str> {
    let args = args.trim();
    let empty = args.is_empty() || args == "void";
    args.split(',')
        .map(str::trim)
        .filter(move |arg| !empty && !arg.is_empty())
}

/// Drop the parameter name from a named argument.
fn strip_arg_name(arg: &str) -> String {
    let tokens: Vec<_> = arg
        .split_whitespace()
        .filter(|t| *t != "const")
        .collect();
    match tokens.as_slice() {
        [] => String::new(),
        [ty] => ty.to_string(),
        [ty @ .., name] => {
            let stars = name.chars().take_while(|c| *c == '*').count();
            format!("{}{}", ty.join(" "), "*".repeat(stars))
        }
    }
}

fn normalize_type(ty: &str) -> String {
    ty.split_whitespace()
        .filter(|t| *t != "const")
        .collect::<Vec<_>>()
        .join(" ")
        .replace(" *", "*")
        .replace("< ", "<")
        .replace(" >", ">")
}

fn parse_type(ty: &str) -> Option<ArgType> {
    ArgType::from_c_type(&normalize_type(ty))
}
