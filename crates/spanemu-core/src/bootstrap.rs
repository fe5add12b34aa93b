//! Bringing a fresh emulator to the requested topology: instance, database,
//! schema, then data.

use crate::provision::Emulator;
use crate::teardown::Teardown;
use crate::CoreError;
use spanemu_client::{
    wait_operation, Close, Connector, CreateDatabaseRequest, CreateInstanceRequest, Instance,
    UpdateDatabaseDdlRequest,
};
use spanemu_config::paths::EMULATOR_INSTANCE_CONFIG;
use spanemu_config::{instance_config_path, ClientConfig, EmulatorConfig};
use std::sync::Arc;
use tracing::{debug, info};

/// Close `client` when the returned guard goes out of scope.
fn close_on_exit<C>(label: &str, client: &Arc<C>) -> Teardown
where
    C: Close + ?Sized + 'static,
{
    let mut scope = Teardown::new();
    scope.push_close(label, client);
    scope
}

/// Run the bootstrap sequence selected by `config` against `emulator`.
///
/// Each step opens the client it needs and closes it before the next step,
/// on success and on failure alike. Long-running operations are awaited.
pub fn bootstrap(
    connector: &dyn Connector,
    emulator: &Emulator,
    config: &EmulatorConfig,
) -> Result<(), CoreError> {
    if config.create_instance() {
        create_instance(connector, emulator, config)?;
    }
    if config.create_database() {
        create_database(connector, emulator, config)?;
    } else if !config.setup_ddls().is_empty() {
        update_schema(connector, emulator, config)?;
    }
    if !config.setup_dmls().is_empty() {
        apply_dml(connector, emulator, config)?;
    }
    Ok(())
}

fn create_instance(
    connector: &dyn Connector,
    emulator: &Emulator,
    config: &EmulatorConfig,
) -> Result<(), CoreError> {
    let instance = config.instance_path();
    info!("creating instance {instance}");
    let fail = |source| CoreError::CreateInstance {
        instance: instance.clone(),
        source,
    };

    let admin = connector
        .instance_admin(emulator.endpoint(), config.client_options())
        .map_err(fail)?;
    let _scope = close_on_exit("instance admin", &admin);

    let request = CreateInstanceRequest {
        parent: config.project_path(),
        instance_id: config.instance_id().to_owned(),
        instance: Instance {
            name: instance.clone(),
            config: instance_config_path(config.project_id(), EMULATOR_INSTANCE_CONFIG),
            display_name: config.instance_id().to_owned(),
            node_count: 1,
            state: String::new(),
        },
    };
    let op = admin.create_instance(&request).map_err(fail)?;
    wait_operation(admin.as_ref(), op).map_err(fail)?;
    Ok(())
}

fn create_database(
    connector: &dyn Connector,
    emulator: &Emulator,
    config: &EmulatorConfig,
) -> Result<(), CoreError> {
    let database = config.database_path();
    info!(
        "creating database {database} ({}, {} DDL statements)",
        config.dialect(),
        config.setup_ddls().len()
    );
    let fail = |source| CoreError::CreateDatabase {
        database: database.clone(),
        source,
    };

    let admin = connector
        .database_admin(emulator.endpoint(), config.client_options())
        .map_err(fail)?;
    let _scope = close_on_exit("database admin", &admin);

    let request = CreateDatabaseRequest {
        parent: config.instance_path(),
        create_statement: config
            .dialect()
            .create_database_statement(config.database_id()),
        extra_statements: config.setup_ddls().to_vec(),
        dialect: config.dialect(),
    };
    let op = admin.create_database(&request).map_err(fail)?;
    wait_operation(admin.as_ref(), op).map_err(fail)?;
    Ok(())
}

fn update_schema(
    connector: &dyn Connector,
    emulator: &Emulator,
    config: &EmulatorConfig,
) -> Result<(), CoreError> {
    let database = config.database_path();
    info!(
        "applying {} DDL statements to {database}",
        config.setup_ddls().len()
    );
    let fail = |source| CoreError::Ddl {
        database: database.clone(),
        source,
    };

    let admin = connector
        .database_admin(emulator.endpoint(), config.client_options())
        .map_err(fail)?;
    let _scope = close_on_exit("database admin", &admin);

    let request = UpdateDatabaseDdlRequest {
        database: database.clone(),
        statements: config.setup_ddls().to_vec(),
    };
    let op = admin.update_database_ddl(&request).map_err(fail)?;
    wait_operation(admin.as_ref(), op).map_err(fail)?;
    Ok(())
}

fn apply_dml(
    connector: &dyn Connector,
    emulator: &Emulator,
    config: &EmulatorConfig,
) -> Result<(), CoreError> {
    let database = config.database_path();
    let statements = config.setup_dmls();
    info!("applying {} DML statements to {database}", statements.len());
    let fail = |source| CoreError::Dml {
        database: database.clone(),
        source,
    };

    let client = connector
        .data_client(
            emulator.endpoint(),
            &database,
            &ClientConfig::single_session(),
            &config.data_client_options(),
        )
        .map_err(fail)?;
    let _scope = close_on_exit("data", &client);

    client
        .read_write_transaction(&mut |txn| {
            let counts = txn.batch_update(statements)?;
            debug!("batch update row counts: {counts:?}");
            Ok(())
        })
        .map_err(fail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::provision;
    use spanemu_client::{ClientKind, FailPoint, MockConnector};
    use spanemu_config::options::{
        disable_auto_config, enable_instance_auto_config_only, with_setup_ddls,
        with_setup_raw_dmls,
    };
    use spanemu_config::{resolve, Defaults, EmuOption};
    use spanemu_runtime::{ContainerRuntime, MockRuntime, NoopSink};

    const TABLE: &str = "CREATE TABLE t (id INT64) PRIMARY KEY (id)";

    fn emulator(config: &EmulatorConfig) -> (Emulator, Teardown) {
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(MockRuntime::new());
        provision(&runtime, &NoopSink, config).unwrap()
    }

    fn config(options: &[EmuOption]) -> EmulatorConfig {
        resolve(&Defaults::builtin(), options).unwrap()
    }

    #[test]
    fn disabled_auto_config_opens_nothing() {
        let mock = MockConnector::new();
        let cfg = config(&[disable_auto_config()]);
        let (emu, _teardown) = emulator(&cfg);
        bootstrap(&mock, &emu, &cfg).unwrap();
        assert!(mock.opened().is_empty());
    }

    #[test]
    fn full_bootstrap_closes_every_client() {
        let mock = MockConnector::new();
        let cfg = config(&[
            with_setup_ddls([TABLE]),
            with_setup_raw_dmls(["INSERT INTO t (id) VALUES (1)"]),
        ]);
        let (emu, _teardown) = emulator(&cfg);
        bootstrap(&mock, &emu, &cfg).unwrap();

        assert_eq!(mock.open_clients(), 0);
        assert_eq!(
            mock.close_order(),
            vec![
                ClientKind::InstanceAdmin,
                ClientKind::DatabaseAdmin,
                ClientKind::Data
            ]
        );
        let opened = mock.opened();
        let data = &opened[2];
        assert_eq!(data.config, Some(ClientConfig::single_session()));
        assert_eq!(data.database.as_deref(), Some(cfg.database_path().as_str()));
    }

    #[test]
    fn instance_only_skips_database() {
        let mock = MockConnector::new();
        let cfg = config(&[enable_instance_auto_config_only()]);
        let (emu, _teardown) = emulator(&cfg);
        bootstrap(&mock, &emu, &cfg).unwrap();
        assert_eq!(mock.instances(emu.endpoint()), vec![cfg.instance_path()]);
        assert!(mock.databases(emu.endpoint()).is_empty());
    }

    #[test]
    fn failed_instance_creation_still_closes_admin() {
        let mock = MockConnector::new();
        mock.fail_next(FailPoint::CreateInstance);
        let cfg = config(&[]);
        let (emu, _teardown) = emulator(&cfg);
        let err = bootstrap(&mock, &emu, &cfg).unwrap_err();
        assert!(matches!(err, CoreError::CreateInstance { .. }));
        assert_eq!(mock.open_clients(), 0);
        assert_eq!(mock.close_order(), vec![ClientKind::InstanceAdmin]);
    }

    #[test]
    fn failed_dml_rolls_back_and_closes() {
        let mock = MockConnector::new();
        let cfg = config(&[
            with_setup_ddls([TABLE]),
            with_setup_raw_dmls([
                "INSERT INTO t (id) VALUES (1)",
                "INSERT INTO missing (id) VALUES (2)",
            ]),
        ]);
        let (emu, _teardown) = emulator(&cfg);
        let err = bootstrap(&mock, &emu, &cfg).unwrap_err();
        assert!(matches!(err, CoreError::Dml { .. }));
        assert_eq!(mock.open_clients(), 0);
        let rs = mock
            .query(
                emu.endpoint(),
                &cfg.database_path(),
                &spanemu_config::Statement::new("SELECT id FROM t"),
            )
            .unwrap();
        assert!(rs.rows.is_empty());
    }

    #[test]
    fn connect_failure_maps_to_phase_error() {
        let mock = MockConnector::new();
        mock.fail_open(ClientKind::DatabaseAdmin);
        let cfg = config(&[]);
        let (emu, _teardown) = emulator(&cfg);
        assert!(matches!(
            bootstrap(&mock, &emu, &cfg),
            Err(CoreError::CreateDatabase { .. })
        ));
        assert_eq!(mock.open_clients(), 0);
    }
}
