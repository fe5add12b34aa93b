//! Connection options and data-plane client configuration.

use crate::ConfigError;
use std::time::Duration;

/// Per-connection option applied when a client is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientOption {
    /// Extra header sent with every request.
    Header { name: String, value: String },
    /// Overrides the `User-Agent` header.
    UserAgent(String),
    /// Timeout applied to each individual request.
    RequestTimeout(Duration),
}

impl ClientOption {
    pub fn header(name: impl Into<String>, value: impl Into<String>) -> Self {
        ClientOption::Header {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Session pool sizing for the data-plane client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPoolConfig {
    /// Sessions created eagerly when the client opens.
    pub min_opened: u32,
    /// Upper bound on concurrently existing sessions.
    pub max_opened: u32,
}

impl Default for SessionPoolConfig {
    fn default() -> Self {
        Self {
            min_opened: 1,
            max_opened: 10,
        }
    }
}

impl SessionPoolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_opened == 0 || self.min_opened > self.max_opened {
            return Err(ConfigError::InvalidSessionPool {
                min_opened: self.min_opened,
                max_opened: self.max_opened,
            });
        }
        Ok(())
    }
}

/// Data-plane client configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientConfig {
    pub session_pool: SessionPoolConfig,
    /// Fine-grained access control role attached to created sessions.
    pub database_role: Option<String>,
}

impl ClientConfig {
    /// Pool of exactly one session, for one-shot clients.
    pub fn single_session() -> Self {
        Self {
            session_pool: SessionPoolConfig {
                min_opened: 1,
                max_opened: 1,
            },
            database_role: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pool_is_valid() {
        assert!(SessionPoolConfig::default().validate().is_ok());
        assert!(ClientConfig::single_session()
            .session_pool
            .validate()
            .is_ok());
    }

    #[test]
    fn inverted_pool_is_rejected() {
        let pool = SessionPoolConfig {
            min_opened: 5,
            max_opened: 2,
        };
        assert!(matches!(
            pool.validate(),
            Err(ConfigError::InvalidSessionPool { .. })
        ));
    }

    #[test]
    fn empty_pool_is_rejected() {
        let pool = SessionPoolConfig {
            min_opened: 0,
            max_opened: 0,
        };
        assert!(pool.validate().is_err());
    }
}
