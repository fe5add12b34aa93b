//! In-memory emulator behind the client traits.
//!
//! `MockConnector` keeps one emulator per endpoint, so each container
//! started by a mock runtime gets a fresh one. Clones share state; tests
//! keep a clone to inspect what was opened, closed and created.

use crate::http::CloseFlag;
use crate::sql::MockDatabase;
use crate::traits::{
    Close, Connector, DataClient, DatabaseAdmin, InstanceAdmin, LongRunning, Transaction,
};
use crate::types::{
    CreateDatabaseRequest, CreateInstanceRequest, Database, Endpoint, Instance, Operation,
    ResultSet, RpcStatus, UpdateDatabaseDdlRequest,
};
use crate::{code, ClientError};
use spanemu_config::paths::EMULATOR_INSTANCE_CONFIG;
use spanemu_config::{
    instance_config_path, is_valid_identifier, ClientConfig, ClientOption, Dialect, Statement,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    InstanceAdmin,
    DatabaseAdmin,
    Data,
}

/// One-shot failures armed with [`MockConnector::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateInstance,
    CreateDatabase,
    UpdateDatabaseDdl,
    /// The next commit fails with `Aborted` and discards the transaction.
    Commit,
}

/// Record of a client handed out by the connector.
#[derive(Debug, Clone)]
pub struct OpenedClient {
    pub id: u64,
    pub kind: ClientKind,
    pub endpoint: Endpoint,
    pub options: Vec<ClientOption>,
    pub config: Option<ClientConfig>,
    pub database: Option<String>,
}

#[derive(Default)]
struct Emulator {
    instances: BTreeMap<String, Instance>,
    databases: BTreeMap<String, MockDatabase>,
    operations: BTreeMap<String, Operation>,
    next_op: u64,
}

impl Emulator {
    /// Store `result` as a finished operation under `parent` and hand back
    /// the pending view, so callers always go through a poll.
    fn finish_op(&mut self, parent: &str, result: Result<(), ClientError>) -> Operation {
        self.next_op += 1;
        let name = format!("{parent}/operations/op-{}", self.next_op);
        let error = result.err().map(|e| RpcStatus {
            code: e.status_code(),
            message: e.to_string(),
        });
        self.operations.insert(
            name.clone(),
            Operation {
                name: name.clone(),
                done: true,
                error,
            },
        );
        Operation {
            name,
            done: false,
            error: None,
        }
    }

    fn database(&self, name: &str) -> Result<&MockDatabase, ClientError> {
        self.databases
            .get(name)
            .ok_or_else(|| ClientError::NotFound(format!("database not found: {name}")))
    }
}

#[derive(Default)]
struct MockState {
    emulators: HashMap<Endpoint, Emulator>,
    opened: Vec<OpenedClient>,
    open_ids: BTreeSet<u64>,
    close_order: Vec<ClientKind>,
    fail_open: HashSet<ClientKind>,
    fail_close: HashSet<ClientKind>,
    fail_next: HashSet<FailPoint>,
    next_id: u64,
}

impl MockState {
    fn emulator(&mut self, endpoint: &Endpoint) -> &mut Emulator {
        self.emulators.entry(endpoint.clone()).or_default()
    }

    fn take_failure(&mut self, point: FailPoint) -> bool {
        self.fail_next.remove(&point)
    }
}

type Shared = Arc<Mutex<MockState>>;

fn with_state<R>(
    state: &Shared,
    f: impl FnOnce(&mut MockState) -> Result<R, ClientError>,
) -> Result<R, ClientError> {
    let mut guard = state
        .lock()
        .map_err(|e| ClientError::Internal(format!("mock state mutex poisoned: {e}")))?;
    f(&mut guard)
}

fn injected(what: &str) -> ClientError {
    ClientError::Rpc {
        code: code::INTERNAL,
        message: format!("injected failure: {what}"),
    }
}

#[derive(Clone, Default)]
pub struct MockConnector {
    state: Shared,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn inspect<R: Default>(&self, f: impl FnOnce(&MockState) -> R) -> R {
        self.state.lock().map(|s| f(&s)).unwrap_or_default()
    }

    /// Every client opened so far, in order.
    pub fn opened(&self) -> Vec<OpenedClient> {
        self.inspect(|s| s.opened.clone())
    }

    /// Clients opened and not yet closed.
    pub fn open_clients(&self) -> usize {
        self.inspect(|s| s.open_ids.len())
    }

    /// Kinds of the clients closed so far, in close order.
    pub fn close_order(&self) -> Vec<ClientKind> {
        self.inspect(|s| s.close_order.clone())
    }

    /// Make every later attempt to open a client of `kind` fail.
    pub fn fail_open(&self, kind: ClientKind) {
        if let Ok(mut s) = self.state.lock() {
            s.fail_open.insert(kind);
        }
    }

    /// Make closing clients of `kind` report an error (the client is still
    /// closed).
    pub fn fail_close(&self, kind: ClientKind) {
        if let Ok(mut s) = self.state.lock() {
            s.fail_close.insert(kind);
        }
    }

    pub fn fail_next(&self, point: FailPoint) {
        if let Ok(mut s) = self.state.lock() {
            s.fail_next.insert(point);
        }
    }

    /// Instance paths that exist on the emulator at `endpoint`.
    pub fn instances(&self, endpoint: &Endpoint) -> Vec<String> {
        self.inspect(|s| {
            s.emulators
                .get(endpoint)
                .map(|e| e.instances.keys().cloned().collect())
                .unwrap_or_default()
        })
    }

    /// Database paths that exist on the emulator at `endpoint`.
    pub fn databases(&self, endpoint: &Endpoint) -> Vec<String> {
        self.inspect(|s| {
            s.emulators
                .get(endpoint)
                .map(|e| e.databases.keys().cloned().collect())
                .unwrap_or_default()
        })
    }

    pub fn database_ddl(&self, endpoint: &Endpoint, database: &str) -> Option<Vec<String>> {
        self.inspect(|s| {
            s.emulators
                .get(endpoint)
                .and_then(|e| e.databases.get(database))
                .map(|db| db.ddl().to_vec())
        })
    }

    pub fn database_dialect(&self, endpoint: &Endpoint, database: &str) -> Option<Dialect> {
        self.inspect(|s| {
            s.emulators
                .get(endpoint)
                .and_then(|e| e.databases.get(database))
                .map(MockDatabase::dialect)
        })
    }

    /// Query a database directly, bypassing any client.
    pub fn query(
        &self,
        endpoint: &Endpoint,
        database: &str,
        statement: &Statement,
    ) -> Result<ResultSet, ClientError> {
        with_state(&self.state, |s| {
            s.emulators
                .get(endpoint)
                .ok_or_else(|| ClientError::NotFound(format!("no emulator at {endpoint:?}")))?
                .database(database)?
                .execute_query(statement)
        })
    }

    fn register(
        &self,
        kind: ClientKind,
        endpoint: &Endpoint,
        options: &[ClientOption],
        config: Option<&ClientConfig>,
        database: Option<&str>,
    ) -> Result<Handle, ClientError> {
        with_state(&self.state, |s| {
            if s.fail_open.contains(&kind) {
                return Err(ClientError::Transport(format!(
                    "injected failure opening {kind:?} client"
                )));
            }
            s.next_id += 1;
            let id = s.next_id;
            s.opened.push(OpenedClient {
                id,
                kind,
                endpoint: endpoint.clone(),
                options: options.to_vec(),
                config: config.cloned(),
                database: database.map(str::to_owned),
            });
            s.open_ids.insert(id);
            s.emulator(endpoint);
            debug!("mock: opened {kind:?} client #{id}");
            Ok(Handle {
                id,
                kind,
                endpoint: endpoint.clone(),
                state: Arc::clone(&self.state),
                closed: CloseFlag::default(),
            })
        })
    }
}

impl Connector for MockConnector {
    fn instance_admin(
        &self,
        endpoint: &Endpoint,
        options: &[ClientOption],
    ) -> Result<Arc<dyn InstanceAdmin>, ClientError> {
        let handle = self.register(ClientKind::InstanceAdmin, endpoint, options, None, None)?;
        Ok(Arc::new(MockInstanceAdmin { handle }))
    }

    fn database_admin(
        &self,
        endpoint: &Endpoint,
        options: &[ClientOption],
    ) -> Result<Arc<dyn DatabaseAdmin>, ClientError> {
        let handle = self.register(ClientKind::DatabaseAdmin, endpoint, options, None, None)?;
        Ok(Arc::new(MockDatabaseAdmin { handle }))
    }

    fn data_client(
        &self,
        endpoint: &Endpoint,
        database: &str,
        config: &ClientConfig,
        options: &[ClientOption],
    ) -> Result<Arc<dyn DataClient>, ClientError> {
        config
            .session_pool
            .validate()
            .map_err(|e| ClientError::InvalidArgument(e.to_string()))?;
        let handle = self.register(
            ClientKind::Data,
            endpoint,
            options,
            Some(config),
            Some(database),
        )?;
        Ok(Arc::new(MockDataClient {
            handle,
            database: database.to_owned(),
        }))
    }
}

/// State shared by every mock client.
struct Handle {
    id: u64,
    kind: ClientKind,
    endpoint: Endpoint,
    state: Shared,
    closed: CloseFlag,
}

impl Handle {
    fn with_emulator<R>(
        &self,
        f: impl FnOnce(&mut Emulator, &mut MockState) -> Result<R, ClientError>,
    ) -> Result<R, ClientError> {
        self.closed.ensure_open()?;
        with_state(&self.state, |s| {
            let mut emulator = s.emulators.remove(&self.endpoint).unwrap_or_default();
            let result = f(&mut emulator, s);
            s.emulators.insert(self.endpoint.clone(), emulator);
            result
        })
    }

    fn close(&self) -> Result<(), ClientError> {
        self.closed.close()?;
        with_state(&self.state, |s| {
            s.open_ids.remove(&self.id);
            s.close_order.push(self.kind);
            debug!("mock: closed {:?} client #{}", self.kind, self.id);
            if s.fail_close.contains(&self.kind) {
                Err(ClientError::Transport(format!(
                    "injected failure closing {:?} client",
                    self.kind
                )))
            } else {
                Ok(())
            }
        })
    }

    fn get_operation(&self, name: &str) -> Result<Operation, ClientError> {
        self.with_emulator(|emu, _| {
            emu.operations
                .get(name)
                .cloned()
                .ok_or_else(|| ClientError::NotFound(format!("operation not found: {name}")))
        })
    }
}

struct MockInstanceAdmin {
    handle: Handle,
}

impl Close for MockInstanceAdmin {
    fn close(&self) -> Result<(), ClientError> {
        self.handle.close()
    }
}

impl LongRunning for MockInstanceAdmin {
    fn get_operation(&self, name: &str) -> Result<Operation, ClientError> {
        self.handle.get_operation(name)
    }
}

impl InstanceAdmin for MockInstanceAdmin {
    fn create_instance(&self, request: &CreateInstanceRequest) -> Result<Operation, ClientError> {
        self.handle.with_emulator(|emu, state| {
            let project = request
                .parent
                .strip_prefix("projects/")
                .filter(|p| !p.is_empty() && !p.contains('/'))
                .ok_or_else(|| {
                    ClientError::InvalidArgument(format!("bad parent: {}", request.parent))
                })?;
            if !is_valid_identifier(&request.instance_id) {
                return Err(ClientError::InvalidArgument(format!(
                    "invalid instance id: {}",
                    request.instance_id
                )));
            }
            let expected = instance_config_path(project, EMULATOR_INSTANCE_CONFIG);
            if request.instance.config != expected {
                return Err(ClientError::InvalidArgument(format!(
                    "unknown instance config {}, expected {expected}",
                    request.instance.config
                )));
            }
            let name = format!("{}/instances/{}", request.parent, request.instance_id);
            if emu.instances.contains_key(&name) {
                return Err(ClientError::AlreadyExists(format!(
                    "instance already exists: {name}"
                )));
            }
            if state.take_failure(FailPoint::CreateInstance) {
                return Ok(emu.finish_op(&name, Err(injected("create instance"))));
            }
            emu.instances.insert(
                name.clone(),
                Instance {
                    name: name.clone(),
                    state: "READY".to_owned(),
                    ..request.instance.clone()
                },
            );
            Ok(emu.finish_op(&name, Ok(())))
        })
    }

    fn get_instance(&self, name: &str) -> Result<Instance, ClientError> {
        self.handle.with_emulator(|emu, _| {
            emu.instances
                .get(name)
                .cloned()
                .ok_or_else(|| ClientError::NotFound(format!("instance not found: {name}")))
        })
    }
}

struct MockDatabaseAdmin {
    handle: Handle,
}

/// Database id named by a `CREATE DATABASE` statement, with the quoting
/// `dialect` requires.
fn parse_create_statement(statement: &str, dialect: Dialect) -> Result<String, ClientError> {
    const PREFIX: &str = "CREATE DATABASE ";
    let bad = || ClientError::InvalidArgument(format!("invalid create statement: {statement}"));
    let trimmed = statement.trim();
    let rest = match (trimmed.get(..PREFIX.len()), trimmed.get(PREFIX.len()..)) {
        (Some(head), Some(rest)) if head.eq_ignore_ascii_case(PREFIX) => rest.trim(),
        _ => return Err(bad()),
    };
    let quote = match dialect {
        Dialect::PostgreSql => '"',
        Dialect::Unspecified | Dialect::GoogleStandardSql => '`',
    };
    // Unquoted ids are limited to plain word characters.
    let id = match rest.strip_prefix(quote).and_then(|r| r.strip_suffix(quote)) {
        Some(quoted) => quoted,
        None if rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') => rest,
        None => return Err(bad()),
    };
    if is_valid_identifier(id) {
        Ok(id.to_owned())
    } else {
        Err(bad())
    }
}

impl Close for MockDatabaseAdmin {
    fn close(&self) -> Result<(), ClientError> {
        self.handle.close()
    }
}

impl LongRunning for MockDatabaseAdmin {
    fn get_operation(&self, name: &str) -> Result<Operation, ClientError> {
        self.handle.get_operation(name)
    }
}

impl DatabaseAdmin for MockDatabaseAdmin {
    fn create_database(&self, request: &CreateDatabaseRequest) -> Result<Operation, ClientError> {
        self.handle.with_emulator(|emu, state| {
            if !emu.instances.contains_key(&request.parent) {
                return Err(ClientError::NotFound(format!(
                    "instance not found: {}",
                    request.parent
                )));
            }
            let id = parse_create_statement(&request.create_statement, request.dialect)?;
            let name = format!("{}/databases/{id}", request.parent);
            if emu.databases.contains_key(&name) {
                return Err(ClientError::AlreadyExists(format!(
                    "database already exists: {name}"
                )));
            }
            if state.take_failure(FailPoint::CreateDatabase) {
                return Ok(emu.finish_op(&name, Err(injected("create database"))));
            }
            let dialect = match request.dialect {
                Dialect::Unspecified => Dialect::GoogleStandardSql,
                other => other,
            };
            let mut db = MockDatabase::new(dialect);
            for statement in &request.extra_statements {
                if let Err(e) = db.apply_ddl(statement) {
                    return Ok(emu.finish_op(&name, Err(e)));
                }
            }
            emu.databases.insert(name.clone(), db);
            Ok(emu.finish_op(&name, Ok(())))
        })
    }

    fn update_database_ddl(
        &self,
        request: &UpdateDatabaseDdlRequest,
    ) -> Result<Operation, ClientError> {
        self.handle.with_emulator(|emu, state| {
            emu.database(&request.database)?;
            if state.take_failure(FailPoint::UpdateDatabaseDdl) {
                return Ok(emu.finish_op(&request.database, Err(injected("update ddl"))));
            }
            let mut result = Ok(());
            if let Some(db) = emu.databases.get_mut(&request.database) {
                for statement in &request.statements {
                    if let Err(e) = db.apply_ddl(statement) {
                        result = Err(e);
                        break;
                    }
                }
            }
            Ok(emu.finish_op(&request.database, result))
        })
    }

    fn get_database(&self, name: &str) -> Result<Database, ClientError> {
        self.handle.with_emulator(|emu, _| {
            let db = emu.database(name)?;
            Ok(Database {
                name: name.to_owned(),
                state: "READY".to_owned(),
                database_dialect: db.dialect().api_name().to_owned(),
            })
        })
    }

    fn get_database_ddl(&self, database: &str) -> Result<Vec<String>, ClientError> {
        self.handle
            .with_emulator(|emu, _| Ok(emu.database(database)?.ddl().to_vec()))
    }
}

struct MockDataClient {
    handle: Handle,
    database: String,
}

/// Buffered writes against a snapshot; applied on commit.
struct MockTransaction {
    snapshot: MockDatabase,
}

impl Transaction for MockTransaction {
    fn update(&mut self, statement: &Statement) -> Result<i64, ClientError> {
        self.snapshot.execute_update(statement)
    }

    fn batch_update(&mut self, statements: &[Statement]) -> Result<Vec<i64>, ClientError> {
        let mut counts = Vec::with_capacity(statements.len());
        for (i, statement) in statements.iter().enumerate() {
            let n = self.snapshot.execute_update(statement).map_err(|e| {
                ClientError::from_status(
                    e.status_code(),
                    format!("statement {i} of batch failed: {e}"),
                )
            })?;
            counts.push(n);
        }
        Ok(counts)
    }
}

impl Close for MockDataClient {
    fn close(&self) -> Result<(), ClientError> {
        self.handle.close()
    }
}

impl DataClient for MockDataClient {
    fn database(&self) -> &str {
        &self.database
    }

    fn read_write_transaction(
        &self,
        f: &mut dyn FnMut(&mut dyn Transaction) -> Result<(), ClientError>,
    ) -> Result<(), ClientError> {
        let snapshot = self
            .handle
            .with_emulator(|emu, _| Ok(emu.database(&self.database)?.clone()))?;
        let mut txn = MockTransaction { snapshot };
        f(&mut txn)?;
        self.handle.with_emulator(|emu, state| {
            if state.take_failure(FailPoint::Commit) {
                return Err(ClientError::Aborted(
                    "injected failure: commit aborted".to_owned(),
                ));
            }
            let slot = emu.databases.get_mut(&self.database).ok_or_else(|| {
                ClientError::NotFound(format!("database not found: {}", self.database))
            })?;
            *slot = txn.snapshot;
            Ok(())
        })
    }

    fn query(&self, statement: &Statement) -> Result<ResultSet, ClientError> {
        self.handle
            .with_emulator(|emu, _| emu.database(&self.database)?.execute_query(statement))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait_operation;
    use spanemu_config::Value;

    const PROJECT: &str = "projects/p";
    const INSTANCE: &str = "projects/p/instances/i";
    const DB: &str = "projects/p/instances/i/databases/d";

    fn endpoint() -> Endpoint {
        Endpoint::new("127.0.0.1", 30000, 30001)
    }

    fn instance_request() -> CreateInstanceRequest {
        CreateInstanceRequest {
            parent: PROJECT.to_owned(),
            instance_id: "i".to_owned(),
            instance: Instance {
                config: instance_config_path("p", EMULATOR_INSTANCE_CONFIG),
                display_name: "i".to_owned(),
                node_count: 1,
                ..Instance::default()
            },
        }
    }

    fn database_request(dialect: Dialect, extra: &[&str]) -> CreateDatabaseRequest {
        CreateDatabaseRequest {
            parent: INSTANCE.to_owned(),
            create_statement: dialect.create_database_statement("d"),
            extra_statements: extra.iter().map(|s| (*s).to_owned()).collect(),
            dialect,
        }
    }

    fn with_database(mock: &MockConnector, extra: &[&str]) {
        let ia = mock.instance_admin(&endpoint(), &[]).unwrap();
        wait_operation(ia.as_ref(), ia.create_instance(&instance_request()).unwrap()).unwrap();
        let da = mock.database_admin(&endpoint(), &[]).unwrap();
        let op = da
            .create_database(&database_request(Dialect::GoogleStandardSql, extra))
            .unwrap();
        wait_operation(da.as_ref(), op).unwrap();
    }

    const TABLE: &str = "CREATE TABLE tbl (pk STRING(MAX), col INT64) PRIMARY KEY (pk)";

    #[test]
    fn create_instance_then_database() {
        let mock = MockConnector::new();
        with_database(&mock, &[TABLE]);
        assert_eq!(mock.instances(&endpoint()), vec![INSTANCE.to_owned()]);
        assert_eq!(mock.databases(&endpoint()), vec![DB.to_owned()]);
        assert_eq!(
            mock.database_ddl(&endpoint(), DB),
            Some(vec![TABLE.to_owned()])
        );
        assert_eq!(
            mock.database_dialect(&endpoint(), DB),
            Some(Dialect::GoogleStandardSql)
        );
    }

    #[test]
    fn operations_start_pending() {
        let mock = MockConnector::new();
        let ia = mock.instance_admin(&endpoint(), &[]).unwrap();
        let op = ia.create_instance(&instance_request()).unwrap();
        assert!(!op.done);
        assert!(op.name.starts_with(INSTANCE));
        assert!(ia.get_operation(&op.name).unwrap().done);
    }

    #[test]
    fn wrong_instance_config_is_rejected() {
        let mock = MockConnector::new();
        let ia = mock.instance_admin(&endpoint(), &[]).unwrap();
        let mut req = instance_request();
        req.instance.config = "projects/p/instanceConfigs/regional-us".to_owned();
        assert!(matches!(
            ia.create_instance(&req),
            Err(ClientError::InvalidArgument(_))
        ));
    }

    #[test]
    fn duplicate_instance_already_exists() {
        let mock = MockConnector::new();
        let ia = mock.instance_admin(&endpoint(), &[]).unwrap();
        ia.create_instance(&instance_request()).unwrap();
        assert!(matches!(
            ia.create_instance(&instance_request()),
            Err(ClientError::AlreadyExists(_))
        ));
    }

    #[test]
    fn create_statement_quoting_follows_dialect() {
        assert_eq!(
            parse_create_statement("CREATE DATABASE `d`", Dialect::GoogleStandardSql).unwrap(),
            "d"
        );
        assert_eq!(
            parse_create_statement("CREATE DATABASE \"d\"", Dialect::PostgreSql).unwrap(),
            "d"
        );
        assert!(parse_create_statement("CREATE DATABASE `d`", Dialect::PostgreSql).is_err());
        assert!(parse_create_statement("CREATE TABLE d", Dialect::Unspecified).is_err());
    }

    #[test]
    fn create_statement_rejects_foreign_or_unbalanced_quotes() {
        assert!(parse_create_statement("CREATE DATABASE \"d\"", Dialect::GoogleStandardSql).is_err());
        assert!(parse_create_statement("CREATE DATABASE `d\"", Dialect::PostgreSql).is_err());
        assert!(parse_create_statement("CREATE DATABASE my-db", Dialect::GoogleStandardSql).is_err());
        assert_eq!(
            parse_create_statement("CREATE DATABASE my_db", Dialect::PostgreSql).unwrap(),
            "my_db"
        );
        assert_eq!(
            parse_create_statement("CREATE DATABASE \"my-db\"", Dialect::PostgreSql).unwrap(),
            "my-db"
        );
    }

    #[test]
    fn backtick_quoting_is_refused_for_postgres_database() {
        let mock = MockConnector::new();
        let ia = mock.instance_admin(&endpoint(), &[]).unwrap();
        wait_operation(ia.as_ref(), ia.create_instance(&instance_request()).unwrap()).unwrap();
        let da = mock.database_admin(&endpoint(), &[]).unwrap();
        let err = da
            .create_database(&CreateDatabaseRequest {
                create_statement: "CREATE DATABASE `d`".to_owned(),
                ..database_request(Dialect::PostgreSql, &[])
            })
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument(_)));
        assert!(mock.databases(&endpoint()).is_empty());
    }

    #[test]
    fn failing_extra_statement_fails_operation_without_creating() {
        let mock = MockConnector::new();
        let ia = mock.instance_admin(&endpoint(), &[]).unwrap();
        wait_operation(ia.as_ref(), ia.create_instance(&instance_request()).unwrap()).unwrap();
        let da = mock.database_admin(&endpoint(), &[]).unwrap();
        let op = da
            .create_database(&database_request(Dialect::Unspecified, &["CREATE NONSENSE"]))
            .unwrap();
        assert!(matches!(
            wait_operation(da.as_ref(), op),
            Err(ClientError::Operation { .. })
        ));
        assert!(mock.databases(&endpoint()).is_empty());
    }

    #[test]
    fn database_requires_instance() {
        let mock = MockConnector::new();
        let da = mock.database_admin(&endpoint(), &[]).unwrap();
        assert!(matches!(
            da.create_database(&database_request(Dialect::Unspecified, &[])),
            Err(ClientError::NotFound(_))
        ));
    }

    #[test]
    fn update_ddl_stops_at_first_failure() {
        let mock = MockConnector::new();
        with_database(&mock, &[]);
        let da = mock.database_admin(&endpoint(), &[]).unwrap();
        let op = da
            .update_database_ddl(&UpdateDatabaseDdlRequest {
                database: DB.to_owned(),
                statements: vec![TABLE.to_owned(), "BOGUS".to_owned(), TABLE.to_owned()],
            })
            .unwrap();
        assert!(wait_operation(da.as_ref(), op).is_err());
        assert_eq!(da.get_database_ddl(DB).unwrap(), vec![TABLE.to_owned()]);
    }

    #[test]
    fn transaction_commits_atomically() {
        let mock = MockConnector::new();
        with_database(&mock, &[TABLE]);
        let data = mock
            .data_client(&endpoint(), DB, &ClientConfig::default(), &[])
            .unwrap();

        let err = data
            .read_write_transaction(&mut |txn| {
                txn.batch_update(&[
                    Statement::new("INSERT INTO tbl (pk, col) VALUES ('a', 1)"),
                    Statement::new("INSERT INTO tbl (pk, col) VALUES ('a', 2)"),
                ])?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, ClientError::AlreadyExists(m) if m.contains("statement 1")));
        assert!(data
            .query(&Statement::new("SELECT pk FROM tbl"))
            .unwrap()
            .rows
            .is_empty());

        data.read_write_transaction(&mut |txn| {
            txn.update(&Statement::new("INSERT INTO tbl (pk, col) VALUES ('a', 1)"))?;
            Ok(())
        })
        .unwrap();
        let rs = mock
            .query(&endpoint(), DB, &Statement::new("SELECT col FROM tbl"))
            .unwrap();
        assert_eq!(rs.rows, vec![vec![Value::Int64(1)]]);
    }

    #[test]
    fn commit_fail_point_aborts() {
        let mock = MockConnector::new();
        with_database(&mock, &[TABLE]);
        let data = mock
            .data_client(&endpoint(), DB, &ClientConfig::single_session(), &[])
            .unwrap();
        mock.fail_next(FailPoint::Commit);
        let err = data
            .read_write_transaction(&mut |txn| {
                txn.update(&Statement::new("INSERT INTO tbl (pk, col) VALUES ('a', 1)"))?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, ClientError::Aborted(_)));
        assert_eq!(
            data.query(&Statement::new("SELECT * FROM tbl"))
                .unwrap()
                .rows
                .len(),
            0
        );
    }

    #[test]
    fn data_client_on_missing_database_fails_on_use() {
        let mock = MockConnector::new();
        let data = mock
            .data_client(&endpoint(), DB, &ClientConfig::default(), &[])
            .unwrap();
        assert!(matches!(
            data.query(&Statement::new("SELECT 1")),
            Err(ClientError::NotFound(_))
        ));
    }

    #[test]
    fn tracks_open_and_close_order() {
        let mock = MockConnector::new();
        let ia = mock.instance_admin(&endpoint(), &[]).unwrap();
        let da = mock
            .database_admin(&endpoint(), &[ClientOption::UserAgent("t".to_owned())])
            .unwrap();
        assert_eq!(mock.open_clients(), 2);
        da.close().unwrap();
        ia.close().unwrap();
        assert!(matches!(ia.close(), Err(ClientError::Closed)));
        assert!(matches!(
            ia.get_operation("x"),
            Err(ClientError::Closed)
        ));
        assert_eq!(mock.open_clients(), 0);
        assert_eq!(
            mock.close_order(),
            vec![ClientKind::DatabaseAdmin, ClientKind::InstanceAdmin]
        );
        let opened = mock.opened();
        assert_eq!(opened[1].options.len(), 1);
    }

    #[test]
    fn injected_open_and_close_failures() {
        let mock = MockConnector::new();
        mock.fail_open(ClientKind::Data);
        assert!(mock
            .data_client(&endpoint(), DB, &ClientConfig::default(), &[])
            .is_err());
        mock.fail_close(ClientKind::InstanceAdmin);
        let ia = mock.instance_admin(&endpoint(), &[]).unwrap();
        assert!(ia.close().is_err());
        assert_eq!(mock.open_clients(), 0);
    }

    #[test]
    fn endpoints_are_isolated() {
        let mock = MockConnector::new();
        with_database(&mock, &[]);
        let other = Endpoint::new("127.0.0.1", 30002, 30003);
        assert!(mock.instances(&other).is_empty());
        assert_eq!(mock.instances(&endpoint()).len(), 1);
    }
}
