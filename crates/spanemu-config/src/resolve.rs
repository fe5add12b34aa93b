//! Resolution of an option list into a validated, fully defaulted configuration.

use crate::client::{ClientConfig, ClientOption};
use crate::container::{ContainerCustomizer, ContainerRequest, FAULT_INJECTION_FLAG};
use crate::ident::random_id;
use crate::options::{explicit_option_name, random_option_name, EmuOption};
use crate::statement::{Dialect, Statement};
use crate::types::{Identifiers, Level};
use crate::ConfigError;

pub const DEFAULT_EMULATOR_IMAGE: &str = "gcr.io/cloud-spanner-emulator/emulator:1.5.25";
pub const DEFAULT_PROJECT_ID: &str = "emulator-project";
pub const DEFAULT_INSTANCE_ID: &str = "emulator-instance";
pub const DEFAULT_DATABASE_ID: &str = "emulator-database";

/// Environment variable overriding [`DEFAULT_EMULATOR_IMAGE`].
pub const IMAGE_ENV_VAR: &str = "SPANEMU_EMULATOR_IMAGE";

/// Values used for fields that no option set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defaults {
    pub image: String,
    pub project_id: String,
    pub instance_id: String,
    pub database_id: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Defaults {
    pub fn builtin() -> Self {
        Self {
            image: DEFAULT_EMULATOR_IMAGE.to_owned(),
            project_id: DEFAULT_PROJECT_ID.to_owned(),
            instance_id: DEFAULT_INSTANCE_ID.to_owned(),
            database_id: DEFAULT_DATABASE_ID.to_owned(),
        }
    }

    /// Built-in defaults, with the image taken from `SPANEMU_EMULATOR_IMAGE`
    /// when set and non-empty.
    pub fn from_env() -> Self {
        let mut defaults = Self::builtin();
        if let Ok(image) = std::env::var(IMAGE_ENV_VAR) {
            if !image.trim().is_empty() {
                defaults.image = image.trim().to_owned();
            }
        }
        defaults
    }

    #[must_use]
    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = project_id.into();
        self
    }
}

/// Configuration under construction. Only options mutate it.
#[derive(Debug)]
pub(crate) struct ConfigBuilder {
    pub(crate) image: String,
    pub(crate) project_id: String,
    pub(crate) instance_id: String,
    pub(crate) database_id: String,
    pub(crate) random_project_id: bool,
    pub(crate) random_instance_id: bool,
    pub(crate) random_database_id: bool,
    pub(crate) dialect: Dialect,
    pub(crate) setup_ddls: Vec<String>,
    pub(crate) setup_dmls: Vec<Statement>,
    pub(crate) client_config: ClientConfig,
    pub(crate) client_options: Vec<ClientOption>,
    pub(crate) data_client_options: Vec<ClientOption>,
    pub(crate) create_instance: bool,
    pub(crate) create_database: bool,
    pub(crate) customizers: Vec<ContainerCustomizer>,
    pub(crate) fault_injection: bool,
}

impl ConfigBuilder {
    fn new() -> Self {
        Self {
            image: String::new(),
            project_id: String::new(),
            instance_id: String::new(),
            database_id: String::new(),
            random_project_id: false,
            random_instance_id: false,
            random_database_id: false,
            dialect: Dialect::Unspecified,
            setup_ddls: Vec::new(),
            setup_dmls: Vec::new(),
            client_config: ClientConfig::default(),
            client_options: Vec::new(),
            data_client_options: Vec::new(),
            create_instance: true,
            create_database: true,
            customizers: Vec::new(),
            fault_injection: false,
        }
    }

    pub(crate) fn explicit_id_mut(&mut self, level: Level) -> &mut String {
        match level {
            Level::Project => &mut self.project_id,
            Level::Instance => &mut self.instance_id,
            Level::Database => &mut self.database_id,
        }
    }

    pub(crate) fn random_flag_mut(&mut self, level: Level) -> &mut bool {
        match level {
            Level::Project => &mut self.random_project_id,
            Level::Instance => &mut self.random_instance_id,
            Level::Database => &mut self.random_database_id,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (level, explicit, random) in [
            (Level::Project, &self.project_id, self.random_project_id),
            (Level::Instance, &self.instance_id, self.random_instance_id),
            (Level::Database, &self.database_id, self.random_database_id),
        ] {
            if random && !explicit.is_empty() {
                return Err(ConfigError::ConflictingOptions {
                    level,
                    explicit: explicit_option_name(level),
                    random: random_option_name(level),
                });
            }
        }
        Ok(())
    }
}

/// Validated, fully defaulted configuration.
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    image: String,
    ids: Identifiers,
    dialect: Dialect,
    setup_ddls: Vec<String>,
    setup_dmls: Vec<Statement>,
    client_config: ClientConfig,
    client_options: Vec<ClientOption>,
    data_client_options: Vec<ClientOption>,
    create_instance: bool,
    create_database: bool,
    customizers: Vec<ContainerCustomizer>,
    fault_injection: bool,
}

/// Apply `options` in order, validate, generate requested random ids, and
/// fill remaining blanks from `defaults`.
pub fn resolve(defaults: &Defaults, options: &[EmuOption]) -> Result<EmulatorConfig, ConfigError> {
    let mut b = ConfigBuilder::new();
    for opt in options {
        opt.apply(&mut b)?;
    }
    b.validate()?;

    for level in [Level::Project, Level::Instance, Level::Database] {
        if *b.random_flag_mut(level) {
            *b.explicit_id_mut(level) = random_id();
        }
    }

    fill(&mut b.image, &defaults.image);
    fill(&mut b.project_id, &defaults.project_id);
    fill(&mut b.instance_id, &defaults.instance_id);
    fill(&mut b.database_id, &defaults.database_id);

    // Defaults may themselves be blank if a caller built them by hand.
    for (level, id) in [
        (Level::Project, &b.project_id),
        (Level::Instance, &b.instance_id),
        (Level::Database, &b.database_id),
    ] {
        if id.is_empty() {
            return Err(ConfigError::MissingIdentifier(level));
        }
    }
    if b.image.is_empty() {
        return Err(ConfigError::MissingImage);
    }

    Ok(EmulatorConfig {
        image: b.image,
        ids: Identifiers::new(b.project_id, b.instance_id, b.database_id),
        dialect: b.dialect,
        setup_ddls: b.setup_ddls,
        setup_dmls: b.setup_dmls,
        client_config: b.client_config,
        client_options: b.client_options,
        data_client_options: b.data_client_options,
        create_instance: b.create_instance,
        create_database: b.create_database,
        customizers: b.customizers,
        fault_injection: b.fault_injection,
    })
}

fn fill(field: &mut String, default: &str) {
    if field.is_empty() {
        default.clone_into(field);
    }
}

impl EmulatorConfig {
    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn ids(&self) -> &Identifiers {
        &self.ids
    }

    pub fn project_id(&self) -> &str {
        &self.ids.project_id
    }

    pub fn instance_id(&self) -> &str {
        &self.ids.instance_id
    }

    pub fn database_id(&self) -> &str {
        &self.ids.database_id
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn setup_ddls(&self) -> &[String] {
        &self.setup_ddls
    }

    pub fn setup_dmls(&self) -> &[Statement] {
        &self.setup_dmls
    }

    pub fn client_config(&self) -> &ClientConfig {
        &self.client_config
    }

    pub fn client_options(&self) -> &[ClientOption] {
        &self.client_options
    }

    /// Options for the data-plane client: shared options, then data-only ones.
    pub fn data_client_options(&self) -> Vec<ClientOption> {
        self.client_options
            .iter()
            .chain(&self.data_client_options)
            .cloned()
            .collect()
    }

    pub fn create_instance(&self) -> bool {
        self.create_instance
    }

    pub fn create_database(&self) -> bool {
        self.create_database
    }

    pub fn fault_injection(&self) -> bool {
        self.fault_injection
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

    /// Container request for this configuration: the default emulator
    /// command, the fault-injection flag if requested, then customizers in
    /// the order they were given.
    pub fn container_request(&self) -> ContainerRequest {
        let mut request = ContainerRequest::for_image(&self.image);
        request
            .labels
            .insert("dev.spanemu.project".to_owned(), self.ids.project_id.to_string());
        if self.fault_injection {
            request.command.push(FAULT_INJECTION_FLAG.to_owned());
        }
        for customizer in &self.customizers {
            customizer.apply(&mut request);
        }
        request
    }
}
