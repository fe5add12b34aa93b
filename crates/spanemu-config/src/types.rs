//! Newtype wrappers for the three topology identifiers.
//!
//! All newtypes serialize/deserialize as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Top-level scope under which instances are created.
    ProjectId
);

string_newtype!(
    /// Instance identifier, unique within a project.
    InstanceId
);

string_newtype!(
    /// Database identifier, unique within an instance.
    DatabaseId
);

/// The level of the topology an identifier belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Project,
    Instance,
    Database,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Project => write!(f, "project"),
            Level::Instance => write!(f, "instance"),
            Level::Database => write!(f, "database"),
        }
    }
}

/// A fully resolved project/instance/database triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifiers {
    pub project_id: ProjectId,
    pub instance_id: InstanceId,
    pub database_id: DatabaseId,
}

impl Identifiers {
    pub fn new(
        project_id: impl Into<ProjectId>,
        instance_id: impl Into<InstanceId>,
        database_id: impl Into<DatabaseId>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            instance_id: instance_id.into(),
            database_id: database_id.into(),
        }
    }

    pub fn project_path(&self) -> String {
        crate::paths::project_path(&self.project_id)
    }

    pub fn instance_path(&self) -> String {
        crate::paths::instance_path(&self.project_id, &self.instance_id)
    }

    pub fn database_path(&self) -> String {
        crate::paths::database_path(&self.project_id, &self.instance_id, &self.database_id)
    }
}
