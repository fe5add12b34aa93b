//! Named, composable option mutations.
//!
//! Options are applied in the order given. Scalar fields take the last value
//! written; DDL, DML, client options, and container customizers accumulate.
//! Empty identifiers and images are ignored rather than clearing a value.

use crate::client::{ClientConfig, ClientOption};
use crate::container::{ContainerCustomizer, ContainerRequest};
use crate::ident::is_valid_identifier;
use crate::resolve::ConfigBuilder;
use crate::statement::{Dialect, Statement};
use crate::types::Level;
use crate::ConfigError;

#[derive(Debug, Clone)]
pub enum EmuOption {
    EmulatorImage(String),
    Id { level: Level, id: String },
    RandomId(Level),
    DatabaseDialect(Dialect),
    SetupDdls(Vec<String>),
    SetupDmls(Vec<Statement>),
    ClientConfig(ClientConfig),
    ClientOptions(Vec<ClientOption>),
    DataClientOptions(Vec<ClientOption>),
    /// `None` leaves the corresponding flag untouched.
    AutoConfig {
        instance: Option<bool>,
        database: Option<bool>,
    },
    ContainerCustomizer(ContainerCustomizer),
    FaultInjection(bool),
}

impl EmuOption {
    /// Option constructor name, used in conflict messages.
    pub fn name(&self) -> &'static str {
        match self {
            EmuOption::EmulatorImage(_) => "with_emulator_image",
            EmuOption::Id { level, .. } => explicit_option_name(*level),
            EmuOption::RandomId(level) => random_option_name(*level),
            EmuOption::DatabaseDialect(_) => "with_database_dialect",
            EmuOption::SetupDdls(_) => "with_setup_ddls",
            EmuOption::SetupDmls(_) => "with_setup_dmls",
            EmuOption::ClientConfig(_) => "with_client_config",
            EmuOption::ClientOptions(_) => "with_client_options",
            EmuOption::DataClientOptions(_) => "with_data_client_options",
            EmuOption::AutoConfig { .. } => "auto_config",
            EmuOption::ContainerCustomizer(_) => "with_container_customizer",
            EmuOption::FaultInjection(_) => "with_fault_injection",
        }
    }

    pub(crate) fn apply(&self, b: &mut ConfigBuilder) -> Result<(), ConfigError> {
        match self {
            EmuOption::EmulatorImage(image) => {
                if !image.is_empty() {
                    b.image.clone_from(image);
                }
            }
            EmuOption::Id { level, id } => {
                if id.is_empty() {
                    return Ok(());
                }
                if !is_valid_identifier(id) {
                    return Err(ConfigError::InvalidIdentifier {
                        level: *level,
                        id: id.clone(),
                    });
                }
                *b.explicit_id_mut(*level) = id.clone();
            }
            EmuOption::RandomId(level) => *b.random_flag_mut(*level) = true,
            EmuOption::DatabaseDialect(dialect) => b.dialect = *dialect,
            EmuOption::SetupDdls(ddls) => {
                if ddls.iter().any(|s| s.trim().is_empty()) {
                    return Err(ConfigError::EmptyStatement("DDL"));
                }
                b.setup_ddls.extend(ddls.iter().cloned());
            }
            EmuOption::SetupDmls(dmls) => {
                if dmls.iter().any(|s| s.sql.trim().is_empty()) {
                    return Err(ConfigError::EmptyStatement("DML"));
                }
                b.setup_dmls.extend(dmls.iter().cloned());
            }
            EmuOption::ClientConfig(config) => {
                config.session_pool.validate()?;
                b.client_config = config.clone();
            }
            EmuOption::ClientOptions(opts) => b.client_options.extend(opts.iter().cloned()),
            EmuOption::DataClientOptions(opts) => {
                b.data_client_options.extend(opts.iter().cloned());
            }
            EmuOption::AutoConfig { instance, database } => {
                if let Some(v) = instance {
                    b.create_instance = *v;
                }
                if let Some(v) = database {
                    b.create_database = *v;
                }
            }
            EmuOption::ContainerCustomizer(c) => b.customizers.push(c.clone()),
            EmuOption::FaultInjection(enabled) => b.fault_injection = *enabled,
        }
        Ok(())
    }
}

pub(crate) fn explicit_option_name(level: Level) -> &'static str {
    match level {
        Level::Project => "with_project_id",
        Level::Instance => "with_instance_id",
        Level::Database => "with_database_id",
    }
}

pub(crate) fn random_option_name(level: Level) -> &'static str {
    match level {
        Level::Project => "with_random_project_id",
        Level::Instance => "with_random_instance_id",
        Level::Database => "with_random_database_id",
    }
}

/// Emulator container image. Empty string is ignored.
pub fn with_emulator_image(image: impl Into<String>) -> EmuOption {
    EmuOption::EmulatorImage(image.into())
}

/// Project ID. Empty string is ignored.
pub fn with_project_id(id: impl Into<String>) -> EmuOption {
    EmuOption::Id {
        level: Level::Project,
        id: id.into(),
    }
}

/// Instance ID. Empty string is ignored.
pub fn with_instance_id(id: impl Into<String>) -> EmuOption {
    EmuOption::Id {
        level: Level::Instance,
        id: id.into(),
    }
}

/// Database ID. Empty string is ignored.
pub fn with_database_id(id: impl Into<String>) -> EmuOption {
    EmuOption::Id {
        level: Level::Database,
        id: id.into(),
    }
}

/// Generate a random project ID. Conflicts with [`with_project_id`].
pub fn with_random_project_id() -> EmuOption {
    EmuOption::RandomId(Level::Project)
}

/// Generate a random instance ID. Conflicts with [`with_instance_id`].
pub fn with_random_instance_id() -> EmuOption {
    EmuOption::RandomId(Level::Instance)
}

/// Generate a random database ID. Conflicts with [`with_database_id`].
pub fn with_random_database_id() -> EmuOption {
    EmuOption::RandomId(Level::Database)
}

pub fn with_database_dialect(dialect: Dialect) -> EmuOption {
    EmuOption::DatabaseDialect(dialect)
}

/// DDL statements to apply. Comments are not permitted by the emulator.
pub fn with_setup_ddls<I, S>(ddls: I) -> EmuOption
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    EmuOption::SetupDdls(ddls.into_iter().map(Into::into).collect())
}

/// DML statements given as plain SQL text.
pub fn with_setup_raw_dmls<I, S>(dmls: I) -> EmuOption
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    EmuOption::SetupDmls(dmls.into_iter().map(Statement::new).collect())
}

/// DML statements with parameters.
pub fn with_setup_dmls(dmls: impl IntoIterator<Item = Statement>) -> EmuOption {
    EmuOption::SetupDmls(dmls.into_iter().collect())
}

/// Data-plane client configuration for the long-lived client.
pub fn with_client_config(config: ClientConfig) -> EmuOption {
    EmuOption::ClientConfig(config)
}

/// Connection options applied to every client.
pub fn with_client_options(opts: impl IntoIterator<Item = ClientOption>) -> EmuOption {
    EmuOption::ClientOptions(opts.into_iter().collect())
}

/// Extra connection options for the data-plane client only.
pub fn with_data_client_options(opts: impl IntoIterator<Item = ClientOption>) -> EmuOption {
    EmuOption::DataClientOptions(opts.into_iter().collect())
}

/// Create both the instance and the database (the default).
pub fn enable_auto_config() -> EmuOption {
    EmuOption::AutoConfig {
        instance: Some(true),
        database: Some(true),
    }
}

/// Create neither the instance nor the database.
pub fn disable_auto_config() -> EmuOption {
    EmuOption::AutoConfig {
        instance: Some(false),
        database: Some(false),
    }
}

pub fn enable_instance_auto_config_only() -> EmuOption {
    EmuOption::AutoConfig {
        instance: Some(true),
        database: Some(false),
    }
}

pub fn enable_database_auto_config_only() -> EmuOption {
    EmuOption::AutoConfig {
        instance: Some(false),
        database: Some(true),
    }
}

pub fn with_instance_auto_config(enabled: bool) -> EmuOption {
    EmuOption::AutoConfig {
        instance: Some(enabled),
        database: None,
    }
}

pub fn with_database_auto_config(enabled: bool) -> EmuOption {
    EmuOption::AutoConfig {
        instance: None,
        database: Some(enabled),
    }
}

pub fn with_container_customizer(
    f: impl Fn(&mut ContainerRequest) + Send + Sync + 'static,
) -> EmuOption {
    EmuOption::ContainerCustomizer(ContainerCustomizer::new(f))
}

/// Start the emulator with random transaction aborts enabled.
pub fn with_fault_injection() -> EmuOption {
    EmuOption::FaultInjection(true)
}
