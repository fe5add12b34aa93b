//! Admin resources, requests, operations and query results.
//!
//! Response types deserialize directly from the emulator's REST JSON
//! (camelCase field names).

use serde::{Deserialize, Serialize};
use spanemu_config::{Dialect, Value};

/// Network location of a running emulator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub grpc_port: u16,
    pub rest_port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, grpc_port: u16, rest_port: u16) -> Self {
        Self {
            host: host.into(),
            grpc_port,
            rest_port,
        }
    }

    /// Base URL of the REST gateway. Plain HTTP; the emulator has no TLS.
    pub fn rest_url(&self) -> String {
        format!("http://{}:{}", self.host, self.rest_port)
    }

    /// `host:port` of the gRPC listener, as expected by `SPANNER_EMULATOR_HOST`.
    pub fn grpc_address(&self) -> String {
        format!("{}:{}", self.host, self.grpc_port)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub config: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub node_count: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub database_dialect: String,
}

impl Database {
    pub fn dialect(&self) -> Option<Dialect> {
        Dialect::from_api_name(&self.database_dialect)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateInstanceRequest {
    /// `projects/{project}`
    pub parent: String,
    pub instance_id: String,
    pub instance: Instance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateDatabaseRequest {
    /// `projects/{project}/instances/{instance}`
    pub parent: String,
    pub create_statement: String,
    pub extra_statements: Vec<String>,
    pub dialect: Dialect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateDatabaseDdlRequest {
    /// Full database path.
    pub database: String,
    pub statements: Vec<String>,
}

/// Error status carried by a failed operation or batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcStatus {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

/// Long-running admin operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcStatus>,
}

impl Operation {
    pub fn failed(&self) -> Option<&RpcStatus> {
        self.error.as_ref().filter(|s| s.code != crate::code::OK)
    }
}

/// Rows returned by a query, with their column names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_urls() {
        let e = Endpoint::new("127.0.0.1", 32768, 32769);
        assert_eq!(e.rest_url(), "http://127.0.0.1:32769");
        assert_eq!(e.grpc_address(), "127.0.0.1:32768");
    }

    #[test]
    fn operation_from_rest_json() {
        let op: Operation = serde_json::from_str(
            r#"{"name":"projects/p/instances/i/operations/1","done":true,
                "error":{"code":6,"message":"exists"},"metadata":{}}"#,
        )
        .unwrap();
        assert!(op.done);
        assert_eq!(op.failed().map(|s| s.code), Some(6));

        let pending: Operation = serde_json::from_str(r#"{"name":"op"}"#).unwrap();
        assert!(!pending.done);
        assert!(pending.failed().is_none());
    }

    #[test]
    fn database_dialect_from_rest_json() {
        let db: Database = serde_json::from_str(
            r#"{"name":"projects/p/instances/i/databases/d","state":"READY","databaseDialect":"POSTGRESQL"}"#,
        )
        .unwrap();
        assert_eq!(db.dialect(), Some(Dialect::PostgreSql));
    }

    #[test]
    fn result_set_lookup_by_column() {
        let rs = ResultSet {
            columns: vec!["pk".to_owned(), "col".to_owned()],
            rows: vec![vec![Value::from("bar"), Value::from(2)]],
        };
        assert_eq!(rs.get(0, "COL"), Some(&Value::Int64(2)));
        assert_eq!(rs.get(1, "pk"), None);
        assert_eq!(rs.get(0, "missing"), None);
    }
}
