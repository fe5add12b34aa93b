//! TOML fixture profiles that expand into option lists.
//!
//! ```toml
//! [emulator]
//! image = "gcr.io/cloud-spanner-emulator/emulator:1.5.25"
//! fault_injection = false
//!
//! [ids]
//! project = "test-project"
//! random_database = true
//!
//! [database]
//! dialect = "google_standard_sql"
//!
//! [setup]
//! ddl = ["CREATE TABLE tbl (pk INT64) PRIMARY KEY (pk)"]
//! dml = ["INSERT INTO tbl (pk) VALUES (1)"]
//!
//! [auto_config]
//! instance = true
//! database = true
//! ```

use crate::options::{
    with_database_auto_config, with_database_dialect, with_database_id, with_emulator_image,
    with_fault_injection, with_instance_auto_config, with_instance_id, with_project_id,
    with_random_database_id, with_random_instance_id, with_random_project_id, with_setup_ddls,
    with_setup_raw_dmls, EmuOption,
};
use crate::statement::Dialect;
use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    #[serde(default)]
    pub emulator: EmulatorSection,
    #[serde(default)]
    pub ids: IdsSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub setup: SetupSection,
    #[serde(default)]
    pub auto_config: AutoConfigSection,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EmulatorSection {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub fault_injection: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IdsSection {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub random_project: bool,
    #[serde(default)]
    pub random_instance: bool,
    #[serde(default)]
    pub random_database: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSection {
    #[serde(default)]
    pub dialect: Option<Dialect>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SetupSection {
    #[serde(default)]
    pub ddl: Vec<String>,
    #[serde(default)]
    pub dml: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AutoConfigSection {
    #[serde(default)]
    pub instance: Option<bool>,
    #[serde(default)]
    pub database: Option<bool>,
}

impl Profile {
    /// Expand into options. Conflicts (e.g. `project` with `random_project`)
    /// are left for [`crate::resolve`] to report.
    pub fn into_options(self) -> Vec<EmuOption> {
        let mut opts = Vec::new();
        if let Some(image) = self.emulator.image {
            opts.push(with_emulator_image(image));
        }
        if self.emulator.fault_injection {
            opts.push(with_fault_injection());
        }
        if let Some(id) = self.ids.project {
            opts.push(with_project_id(id));
        }
        if let Some(id) = self.ids.instance {
            opts.push(with_instance_id(id));
        }
        if let Some(id) = self.ids.database {
            opts.push(with_database_id(id));
        }
        if self.ids.random_project {
            opts.push(with_random_project_id());
        }
        if self.ids.random_instance {
            opts.push(with_random_instance_id());
        }
        if self.ids.random_database {
            opts.push(with_random_database_id());
        }
        if let Some(dialect) = self.database.dialect {
            opts.push(with_database_dialect(dialect));
        }
        if !self.setup.ddl.is_empty() {
            opts.push(with_setup_ddls(self.setup.ddl));
        }
        if !self.setup.dml.is_empty() {
            opts.push(with_setup_raw_dmls(self.setup.dml));
        }
        if let Some(enabled) = self.auto_config.instance {
            opts.push(with_instance_auto_config(enabled));
        }
        if let Some(enabled) = self.auto_config.database {
            opts.push(with_database_auto_config(enabled));
        }
        opts
    }
}

pub fn parse_profile_str(input: &str) -> Result<Profile, ConfigError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_profile_file(path: impl AsRef<Path>) -> Result<Profile, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_profile_str(&content)
}
