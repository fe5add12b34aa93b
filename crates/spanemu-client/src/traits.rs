use crate::types::{
    CreateDatabaseRequest, CreateInstanceRequest, Database, Endpoint, Instance, Operation,
    ResultSet, UpdateDatabaseDdlRequest,
};
use crate::ClientError;
use spanemu_config::{ClientConfig, ClientOption, Statement};
use std::sync::Arc;

/// Releases a client's connections. Every call after `close`, including a
/// second `close`, fails with [`ClientError::Closed`].
pub trait Close: Send + Sync {
    fn close(&self) -> Result<(), ClientError>;
}

pub trait LongRunning {
    fn get_operation(&self, name: &str) -> Result<Operation, ClientError>;
}

pub trait InstanceAdmin: Close + LongRunning {
    fn create_instance(&self, request: &CreateInstanceRequest) -> Result<Operation, ClientError>;

    fn get_instance(&self, name: &str) -> Result<Instance, ClientError>;
}

pub trait DatabaseAdmin: Close + LongRunning {
    fn create_database(&self, request: &CreateDatabaseRequest) -> Result<Operation, ClientError>;

    fn update_database_ddl(
        &self,
        request: &UpdateDatabaseDdlRequest,
    ) -> Result<Operation, ClientError>;

    fn get_database(&self, name: &str) -> Result<Database, ClientError>;

    fn get_database_ddl(&self, database: &str) -> Result<Vec<String>, ClientError>;
}

/// DML executed inside a read-write transaction.
pub trait Transaction {
    fn update(&mut self, statement: &Statement) -> Result<i64, ClientError>;

    /// Run `statements` in order, stopping at the first failure. Returns the
    /// row count of each statement.
    fn batch_update(&mut self, statements: &[Statement]) -> Result<Vec<i64>, ClientError>;
}

pub trait DataClient: Close {
    /// Full path of the database this client is bound to.
    fn database(&self) -> &str;

    /// Run `f` in a read-write transaction. Commits when `f` returns `Ok`,
    /// rolls back when it returns `Err`. Aborted transactions are not retried.
    fn read_write_transaction(
        &self,
        f: &mut dyn FnMut(&mut dyn Transaction) -> Result<(), ClientError>,
    ) -> Result<(), ClientError>;

    /// Strong single-use read-only query.
    fn query(&self, statement: &Statement) -> Result<ResultSet, ClientError>;
}

/// Opens clients bound to an emulator endpoint, unauthenticated.
pub trait Connector: Send + Sync {
    fn instance_admin(
        &self,
        endpoint: &Endpoint,
        options: &[ClientOption],
    ) -> Result<Arc<dyn InstanceAdmin>, ClientError>;

    fn database_admin(
        &self,
        endpoint: &Endpoint,
        options: &[ClientOption],
    ) -> Result<Arc<dyn DatabaseAdmin>, ClientError>;

    fn data_client(
        &self,
        endpoint: &Endpoint,
        database: &str,
        config: &ClientConfig,
        options: &[ClientOption],
    ) -> Result<Arc<dyn DataClient>, ClientError>;
}
