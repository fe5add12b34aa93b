//! Lifecycle engine for ephemeral Cloud Spanner emulators.
//!
//! This crate ties together configuration resolution, container runtimes,
//! and emulator clients into the `Engine`: it provisions an emulator
//! container, bootstraps its instance, database, schema and data, assembles
//! client handles, and returns a `Teardown` that releases everything in
//! reverse order of acquisition.

pub mod bootstrap;
pub mod clients;
pub mod engine;
pub mod provision;
pub mod teardown;

pub use bootstrap::bootstrap;
pub use clients::{assemble, Clients};
pub use engine::{new_clients, new_emulator, new_emulator_with_clients, Engine};
pub use provision::{provision, Emulator};
pub use teardown::Teardown;

pub use spanemu_config::options;

use spanemu_client::ClientError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(#[from] spanemu_config::ConfigError),
    #[error("runtime error: {0}")]
    Runtime(#[from] spanemu_runtime::RuntimeError),
    #[error("client error: {0}")]
    Client(#[from] ClientError),
    #[error("emulator container exposes no host port for container port {0}")]
    MissingPort(u16),
    #[error("failed to create instance {instance}: {source}")]
    CreateInstance {
        instance: String,
        #[source]
        source: ClientError,
    },
    #[error("failed to create database {database}: {source}")]
    CreateDatabase {
        database: String,
        #[source]
        source: ClientError,
    },
    #[error("failed to apply DDL to {database}: {source}")]
    Ddl {
        database: String,
        #[source]
        source: ClientError,
    },
    #[error("failed to apply DML to {database}: {source}")]
    Dml {
        database: String,
        #[source]
        source: ClientError,
    },
    #[error("failed to open {client} client: {source}")]
    Connect {
        client: &'static str,
        #[source]
        source: ClientError,
    },
}
