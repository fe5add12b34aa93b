//! SQL statements with typed parameters, and the database dialect selector.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// SQL dialect of a database. Affects the quoting of the create statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// Let the emulator pick; behaves like GoogleSQL.
    #[default]
    Unspecified,
    GoogleStandardSql,
    #[serde(rename = "postgresql")]
    PostgreSql,
}

impl Dialect {
    /// Wire name used by the admin API.
    pub fn api_name(self) -> &'static str {
        match self {
            Dialect::Unspecified => "DATABASE_DIALECT_UNSPECIFIED",
            Dialect::GoogleStandardSql => "GOOGLE_STANDARD_SQL",
            Dialect::PostgreSql => "POSTGRESQL",
        }
    }

    pub fn from_api_name(name: &str) -> Option<Self> {
        match name {
            "DATABASE_DIALECT_UNSPECIFIED" | "" => Some(Dialect::Unspecified),
            "GOOGLE_STANDARD_SQL" => Some(Dialect::GoogleStandardSql),
            "POSTGRESQL" => Some(Dialect::PostgreSql),
            _ => None,
        }
    }

    /// `CREATE DATABASE` statement for `database_id` in this dialect.
    pub fn create_database_statement(self, database_id: &str) -> String {
        match self {
            Dialect::PostgreSql => format!("CREATE DATABASE \"{database_id}\""),
            Dialect::Unspecified | Dialect::GoogleStandardSql => {
                format!("CREATE DATABASE `{database_id}`")
            }
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

/// Scalar type code, needed for typed NULL parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TypeCode {
    Bool,
    Int64,
    Float64,
    String,
}

impl TypeCode {
    pub fn api_name(self) -> &'static str {
        match self {
            TypeCode::Bool => "BOOL",
            TypeCode::Int64 => "INT64",
            TypeCode::Float64 => "FLOAT64",
            TypeCode::String => "STRING",
        }
    }
}

/// A statement parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Null(TypeCode),
}

impl Value {
    pub fn type_code(&self) -> TypeCode {
        match self {
            Value::Bool(_) => TypeCode::Bool,
            Value::Int64(_) => TypeCode::Int64,
            Value::Float64(_) => TypeCode::Float64,
            Value::String(_) => TypeCode::String,
            Value::Null(code) => *code,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int64(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

/// A SQL statement with named parameters (`@name` in the SQL text).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    pub sql: String,
    pub params: BTreeMap<String, Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Statement::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Statement::new(sql)
    }
}
