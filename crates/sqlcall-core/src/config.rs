//! Connection configuration.
//!
//! Holds the parameters that make up a driver connection string and builds
//! the string itself, escaping attribute values that would otherwise break
//! the `key=value;` grammar.

use crate::error::{ConfigError, Error, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Driver used when none is configured.
pub const DEFAULT_DRIVER: &str = "SQL Server";

/// Parameters for establishing a connection.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Installed driver name (`DRIVER={...}`)
    pub driver: String,
    /// Server host name (`SERVER=`)
    pub host: String,
    /// Database to connect to (`DATABASE=`)
    pub database: String,
    /// Login name (`UID=`)
    pub user: String,
    /// Login password (`PWD=`)
    pub password: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            driver: DEFAULT_DRIVER.to_string(),
            host: String::new(),
            database: String::new(),
            user: String::new(),
            password: String::new(),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

impl ConnectionConfig {
    /// Create a new configuration with the given connection components.
    pub fn new(
        host: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            database: database.into(),
            user: user.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    /// Parse a configuration from a JSON object. Missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::Config(ConfigError {
                field: None,
                message: format!("Invalid connection configuration: {}", e),
                source: Some(Box::new(e)),
            })
        })
    }

    /// Set the driver name.
    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    /// Set the server host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the login name.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Build `DRIVER={..};SERVER=..;DATABASE=..;UID=..;PWD=..`.
    ///
    /// Values containing `;`, `{` or `}` are wrapped in braces with `}`
    /// doubled. NUL bytes cannot be passed to the driver and are rejected.
    pub fn connection_string(&self) -> Result<String> {
        self.validate()?;
        Ok(self.render(&self.password))
    }

    /// The connection string with the password masked, for logging.
    pub fn redacted_connection_string(&self) -> String {
        self.render("***")
    }

    fn render(&self, password: &str) -> String {
        format!(
            "DRIVER={{{}}};SERVER={};DATABASE={};UID={};PWD={}",
            self.driver.replace('}', "}}"),
            escape_attribute_value(&self.host),
            escape_attribute_value(&self.database),
            escape_attribute_value(&self.user),
            escape_attribute_value(password)
        )
    }

    fn validate(&self) -> Result<()> {
        let fields = [
            ("driver", &self.driver),
            ("host", &self.host),
            ("database", &self.database),
            ("user", &self.user),
            ("password", &self.password),
        ];
        for (name, value) in fields {
            if value.contains('\0') {
                return Err(ConfigError::field(name, "contains a NUL byte").into());
            }
        }
        Ok(())
    }
}

/// Escape a connection-string attribute value.
///
/// Values with a delimiter (`;`) or brace are surrounded by braces and every
/// closing brace is doubled; anything else is returned unchanged.
pub fn escape_attribute_value(value: &str) -> Cow<'_, str> {
    if value.contains([';', '{', '}']) {
        Cow::Owned(format!("{{{}}}", value.replace('}', "}}")))
    } else {
        Cow::Borrowed(value)
    }
}
