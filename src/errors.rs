use thiserror::Error;

use crate::cmd::ssh::SshError;

/// InstallError: the operation-level error taxonomy. Every step of the install
/// workflow funnels into one of these kinds; the kind decides the HTTP code,
/// whether the caller may retry, and what lands in the audit rows.
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("operation lock is held by another operation. addrs: {addrs}")]
    LockHeld { addrs: String },

    #[error("remote execution error on {host}: {source}")]
    Remote {
        host: String,
        #[source]
        source: SshError,
    },

    #[error("mysql protocol error on {addr}: {source}")]
    MySQLProtocol {
        addr: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("repository error: {source}")]
    Repository {
        #[source]
        source: sqlx::Error,
    },

    #[error("template rendering error: {0}")]
    Template(#[from] TemplateError),

    #[error("{0}")]
    NotImplemented(String),
}

impl InstallError {
    pub fn remote(host: impl Into<String>, source: SshError) -> Self {
        InstallError::Remote {
            host: host.into(),
            source,
        }
    }

    pub fn protocol(addr: impl Into<String>, source: sqlx::Error) -> Self {
        InstallError::MySQLProtocol {
            addr: addr.into(),
            source,
        }
    }

    /// Maps repository errors, folding the unique-key violation of the lock
    /// table into LockHeld so callers never see the raw constraint error.
    pub fn repository(source: sqlx::Error, addrs: &str) -> Self {
        if let sqlx::Error::Database(db_err) = &source {
            if db_err.is_unique_violation() {
                return InstallError::LockHeld {
                    addrs: addrs.to_string(),
                };
            }
        }

        InstallError::Repository { source }
    }

    /// Numeric code carried in the HTTP error envelope.
    pub fn code(&self) -> u32 {
        match self {
            InstallError::Validation(_) => 400_001,
            InstallError::LockHeld { .. } => 402_301,
            InstallError::Remote { .. } => 402_101,
            InstallError::MySQLProtocol { .. } => 402_201,
            InstallError::Repository { .. } => 402_302,
            InstallError::Template(_) => 402_401,
            InstallError::NotImplemented(_) => 501_001,
        }
    }
}

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("version must be at least 8.0, {0} is not supported")]
    UnsupportedVersion(String),

    #[error("rendering failed: {0}")]
    Render(#[from] tera::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse configuration file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("configuration is not valid:\n{}", violations.join("\n"))]
    Invalid { violations: Vec<String> },
}
