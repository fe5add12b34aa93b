//! Clients for the Cloud Spanner emulator.
//!
//! This crate defines the collaborator traits the engine drives (instance
//! admin, database admin, data-plane client, and the `Connector` that opens
//! them), a REST implementation speaking JSON to the emulator's HTTP gateway,
//! an in-memory mock emulator for tests, and long-running operation waiting.

pub mod codec;
pub mod data;
pub mod http;
pub mod mock;
pub mod operation;
pub mod pool;
pub mod sql;
pub mod traits;
pub mod types;

pub use data::HttpDataClient;
pub use http::{HttpConnector, HttpDatabaseAdmin, HttpInstanceAdmin};
pub use mock::{ClientKind, FailPoint, MockConnector, OpenedClient};
pub use operation::wait_operation;
pub use pool::SessionPool;
pub use traits::{
    Close, Connector, DataClient, DatabaseAdmin, InstanceAdmin, LongRunning, Transaction,
};
pub use types::{
    CreateDatabaseRequest, CreateInstanceRequest, Database, Endpoint, Instance, Operation,
    ResultSet, RpcStatus, UpdateDatabaseDdlRequest,
};

use thiserror::Error;

/// gRPC status codes the clients distinguish.
pub mod code {
    pub const OK: i32 = 0;
    pub const UNKNOWN: i32 = 2;
    pub const INVALID_ARGUMENT: i32 = 3;
    pub const NOT_FOUND: i32 = 5;
    pub const ALREADY_EXISTS: i32 = 6;
    pub const FAILED_PRECONDITION: i32 = 9;
    pub const ABORTED: i32 = 10;
    pub const UNIMPLEMENTED: i32 = 12;
    pub const INTERNAL: i32 = 13;
    pub const UNAVAILABLE: i32 = 14;
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rpc error (code {code}): {message}")]
    Rpc { code: i32, message: String },
    #[error("operation {name} failed (code {code}): {message}")]
    Operation {
        name: String,
        code: i32,
        message: String,
    },
    #[error("client is closed")]
    Closed,
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("transaction aborted: {0}")]
    Aborted(String),
    #[error("internal client error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Map a gRPC status to the matching variant.
    pub fn from_status(status_code: i32, message: impl Into<String>) -> Self {
        let message = message.into();
        match status_code {
            code::INVALID_ARGUMENT => ClientError::InvalidArgument(message),
            code::NOT_FOUND => ClientError::NotFound(message),
            code::ALREADY_EXISTS => ClientError::AlreadyExists(message),
            code::ABORTED => ClientError::Aborted(message),
            other => ClientError::Rpc {
                code: other,
                message,
            },
        }
    }

    /// gRPC status code this error corresponds to.
    pub fn status_code(&self) -> i32 {
        match self {
            ClientError::InvalidArgument(_) => code::INVALID_ARGUMENT,
            ClientError::NotFound(_) => code::NOT_FOUND,
            ClientError::AlreadyExists(_) => code::ALREADY_EXISTS,
            ClientError::Aborted(_) => code::ABORTED,
            ClientError::Rpc { code, .. } | ClientError::Operation { code, .. } => *code,
            ClientError::Closed => code::FAILED_PRECONDITION,
            ClientError::Transport(_) => code::UNAVAILABLE,
            ClientError::Decode(_) | ClientError::Internal(_) => code::INTERNAL,
        }
    }
}
