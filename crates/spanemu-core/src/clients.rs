//! Client handles bound to a running emulator.

use crate::provision::Emulator;
use crate::teardown::Teardown;
use crate::CoreError;
use spanemu_client::{Connector, DataClient, DatabaseAdmin, InstanceAdmin};
use spanemu_config::{EmulatorConfig, Identifiers};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Instance admin, database admin and data client for one emulator, plus
/// the identifiers they were built for.
///
/// The handles are shared with the teardown that closes them; using a
/// handle after its teardown ran fails with `ClientError::Closed`.
#[derive(Clone)]
pub struct Clients {
    pub instance_admin: Arc<dyn InstanceAdmin>,
    pub database_admin: Arc<dyn DatabaseAdmin>,
    pub data: Arc<dyn DataClient>,
    ids: Identifiers,
}

impl Clients {
    pub fn ids(&self) -> &Identifiers {
        &self.ids
    }

    pub fn project_path(&self) -> String {
        self.ids.project_path()
    }

    pub fn instance_path(&self) -> String {
        self.ids.instance_path()
    }

    pub fn database_path(&self) -> String {
        self.ids.database_path()
    }
}

impl fmt::Debug for Clients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clients")
            .field("ids", &self.ids)
            .field("database", &self.data.database())
            .finish_non_exhaustive()
    }
}

/// Open the instance admin, database admin and data clients, in that order.
///
/// Each client's close is pushed on the teardown right after it opens. If
/// an open fails, the clients already opened are closed, newest first,
/// before the error is returned.
pub fn assemble(
    connector: &dyn Connector,
    emulator: &Emulator,
    config: &EmulatorConfig,
) -> Result<(Clients, Teardown), CoreError> {
    let endpoint = emulator.endpoint();
    let connect = |client: &'static str| move |source| CoreError::Connect { client, source };
    let mut teardown = Teardown::new();

    let instance_admin = connector
        .instance_admin(endpoint, config.client_options())
        .map_err(connect("instance admin"))?;
    teardown.push_close("instance admin", &instance_admin);

    let database_admin = connector
        .database_admin(endpoint, config.client_options())
        .map_err(connect("database admin"))?;
    teardown.push_close("database admin", &database_admin);

    let data = connector
        .data_client(
            endpoint,
            &config.database_path(),
            config.client_config(),
            &config.data_client_options(),
        )
        .map_err(connect("data"))?;
    teardown.push_close("data", &data);

    debug!("clients ready for {}", config.database_path());
    Ok((
        Clients {
            instance_admin,
            database_admin,
            data,
            ids: config.ids().clone(),
        },
        teardown,
    ))
}
