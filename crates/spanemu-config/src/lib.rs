//! Option model and configuration resolution for spanemu.
//!
//! This crate defines the configuration layer: named option mutations
//! (`EmuOption`), resolution of an option list into a validated
//! `EmulatorConfig`, random identifier generation, resource path formatting,
//! statements and client options, the container request handed to runtimes,
//! and TOML fixture profiles.

pub mod client;
pub mod container;
pub mod ident;
pub mod options;
pub mod paths;
pub mod profile;
pub mod resolve;
pub mod statement;
pub mod types;

pub use client::{ClientConfig, ClientOption, SessionPoolConfig};
pub use container::{ContainerCustomizer, ContainerRequest};
pub use ident::{is_valid_identifier, random_id, RANDOM_ID_LEN};
pub use options::EmuOption;
pub use paths::{database_path, instance_config_path, instance_path, parse_database_path, project_path};
pub use profile::{parse_profile_file, parse_profile_str, Profile};
pub use resolve::{
    resolve, Defaults, EmulatorConfig, DEFAULT_DATABASE_ID, DEFAULT_EMULATOR_IMAGE,
    DEFAULT_INSTANCE_ID, DEFAULT_PROJECT_ID,
};
pub use statement::{Dialect, Statement, TypeCode, Value};
pub use types::{DatabaseId, Identifiers, InstanceId, Level, ProjectId};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{explicit} and {random} are mutually exclusive ({level} id)")]
    ConflictingOptions {
        level: Level,
        explicit: &'static str,
        random: &'static str,
    },
    #[error("invalid {level} id '{id}': must not contain '/' or whitespace")]
    InvalidIdentifier { level: Level, id: String },
    #[error("{0} id resolved to an empty string")]
    MissingIdentifier(Level),
    #[error("emulator image resolved to an empty string")]
    MissingImage,
    #[error("invalid session pool: min_opened={min_opened}, max_opened={max_opened}")]
    InvalidSessionPool { min_opened: u32, max_opened: u32 },
    #[error("empty {0} statement")]
    EmptyStatement(&'static str),
    #[error("failed to read profile: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse profile: {0}")]
    ParseToml(#[from] toml::de::Error),
}
