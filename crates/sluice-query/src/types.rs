use crate::envelope::Envelope;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Capabilities advertised by a connected driver
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum Capability {
    /// SQL-based queries (SQLite, Postgres, etc.)
    Sql,
    /// Document-based (MongoDB, etc.)
    Document,
    /// Listing and switching the active database
    DatabaseSwitching,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Sql => write!(f, "sql"),
            Capability::Document => write!(f, "document"),
            Capability::DatabaseSwitching => write!(f, "database-switching"),
        }
    }
}

/// One cell of a result row
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// Source-defined value, e.g. a document-store reply
    Dynamic(Envelope),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_envelope(&self) -> Option<&Envelope> {
        match self {
            Value::Dynamic(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
            Value::Bytes(b) => write!(f, "\\x{}", hex::encode(b)),
            Value::Dynamic(e) => write!(f, "{}", e),
        }
    }
}

impl From<Envelope> for Value {
    fn from(envelope: Envelope) -> Self {
        Value::Dynamic(envelope)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A row of cells, in header order
pub type Row = Vec<Value>;

/// Column names of a result stream
pub type Header = Vec<String>;

/// Schema character of a result stream
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaType {
    /// Columns have fixed types
    #[default]
    Typed,
    /// Columns are descriptive labels only (document-store replies)
    SchemaLess,
}

/// Metadata describing a result stream
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub schema_type: SchemaType,
}

impl Meta {
    pub fn typed() -> Self {
        Self {
            schema_type: SchemaType::Typed,
        }
    }

    pub fn schema_less() -> Self {
        Self {
            schema_type: SchemaType::SchemaLess,
        }
    }
}

/// Kind of a catalog entry
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureType {
    Table,
    View,
}

impl fmt::Display for StructureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructureType::Table => write!(f, "table"),
            StructureType::View => write!(f, "view"),
        }
    }
}

/// Catalog entry reported by [`Driver::structure`](crate::Driver::structure)
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    pub name: String,
    /// Owning schema, empty for sources without one
    pub schema: String,
    #[serde(rename = "type")]
    pub structure_type: StructureType,
}

impl Structure {
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: String::new(),
            structure_type: StructureType::Table,
        }
    }
}
