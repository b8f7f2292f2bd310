use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Null,
    Boolean,
    #[serde(rename = "TINYINT")]
    TinyInt,
    #[serde(rename = "SMALLINT")]
    SmallInt,
    Integer,
    #[serde(rename = "BIGINT")]
    BigInt,
    Float,
    Double,
    Text,
    Date,
    Timestamp,
    /// Opaque type used for arguments and results the planner doesn't reason
    /// about, e.g. extension array and geometry types.
    Any,
}

impl DataType {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::TinyInt | DataType::SmallInt | DataType::Integer | DataType::BigInt
        )
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || matches!(self, DataType::Float | DataType::Double)
    }

    /// Whether values of this type may be used where a boolean is expected.
    pub fn is_boolean_like(&self) -> bool {
        matches!(self, DataType::Boolean | DataType::Null | DataType::Any)
    }

    /// Result type of an arithmetic operation on two types.
    ///
    /// Returns `None` if the types can't be combined.
    pub fn arithmetic_result(left: DataType, right: DataType) -> Option<DataType> {
        use DataType::*;
        match (left, right) {
            (Null, other) | (other, Null) => Some(other),
            (Any, _) | (_, Any) => Some(Any),
            (l, r) if l.is_numeric() && r.is_numeric() => {
                if matches!(l, Double) || matches!(r, Double) {
                    Some(Double)
                } else if matches!(l, Float) || matches!(r, Float) {
                    Some(Float)
                } else {
                    Some(l.max_integer(r))
                }
            }
            _ => None,
        }
    }

    /// Whether two types may be compared with each other.
    pub fn comparable(left: DataType, right: DataType) -> bool {
        use DataType::*;
        match (left, right) {
            (Null, _) | (_, Null) | (Any, _) | (_, Any) => true,
            (l, r) if l.is_numeric() && r.is_numeric() => true,
            // Temporal values are commonly compared against string literals.
            (Date | Timestamp, Text) | (Text, Date | Timestamp) => true,
            (l, r) => l == r,
        }
    }

    fn integer_rank(&self) -> u8 {
        match self {
            DataType::TinyInt => 0,
            DataType::SmallInt => 1,
            DataType::Integer => 2,
            _ => 3,
        }
    }

    fn max_integer(self, other: DataType) -> DataType {
        if self.integer_rank() >= other.integer_rank() {
            self
        } else {
            other
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Null => "NULL",
            DataType::Boolean => "BOOLEAN",
            DataType::TinyInt => "TINYINT",
            DataType::SmallInt => "SMALLINT",
            DataType::Integer => "INTEGER",
            DataType::BigInt => "BIGINT",
            DataType::Float => "FLOAT",
            DataType::Double => "DOUBLE",
            DataType::Text => "TEXT",
            DataType::Date => "DATE",
            DataType::Timestamp => "TIMESTAMP",
            DataType::Any => "ANY",
        };
        write!(f, "{s}")
    }
}

/// A named, typed column in the output of a relational operator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub datatype: DataType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, datatype: DataType, nullable: bool) -> Self {
        Field {
            name: name.into(),
            datatype,
            nullable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl ScalarValue {
    pub fn datatype(&self) -> DataType {
        match self {
            ScalarValue::Null => DataType::Null,
            ScalarValue::Boolean(_) => DataType::Boolean,
            ScalarValue::Int64(_) => DataType::BigInt,
            ScalarValue::Float64(_) => DataType::Double,
            ScalarValue::Utf8(_) => DataType::Text,
        }
    }

    /// Parse a numeric literal, preferring integers.
    pub fn parse_number(s: &str) -> Option<ScalarValue> {
        if let Ok(n) = s.parse::<i64>() {
            return Some(ScalarValue::Int64(n));
        }
        s.parse::<f64>().ok().map(ScalarValue::Float64)
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "null"),
            ScalarValue::Boolean(b) => write!(f, "{b}"),
            ScalarValue::Int64(n) => write!(f, "{n}"),
            ScalarValue::Float64(n) => write!(f, "{n:?}"),
            ScalarValue::Utf8(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}
