mod validate;

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::ConfigError;

/// Typed configuration snapshot, loaded once at startup and passed by
/// reference afterwards. Key names mirror the on-disk TOML layout.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Settings {
    pub daemon: bool,
    pub log: LogSettings,
    pub server: ServerSettings,
    pub db: DbSettings,
    pub mysql: MySqlSettings,
    pub pmm: PmmSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct LogSettings {
    pub file_name: String,
    pub level: String,
    pub format: String,
    pub max_size: u64,
    pub max_days: u64,
    pub max_backups: u64,
    pub rotate_on_startup: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ServerSettings {
    pub addr: String,
    pub pid_file: String,
    /// seconds, 0..=60
    pub read_timeout: u64,
    /// seconds, 1..=60
    pub write_timeout: u64,
    pub router: RouterSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct RouterSettings {
    pub alternative_base_path: String,
    pub alternative_body_path: String,
    /// HTTP status used for error responses, 200 or 500
    pub http_error_code: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct DbSettings {
    pub addr: String,
    pub name: String,
    pub user: String,
    pub pass: String,
    pub pool: PoolSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub init_connections: u32,
    pub max_idle_connections: u32,
    /// seconds
    pub max_idle_time: u64,
    /// seconds
    pub max_wait_time: u64,
    pub max_retry_count: u32,
    /// seconds
    pub keep_alive_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct MySqlSettings {
    pub version: String,
    pub installation_package_dir: String,
    pub installation_temporary_dir: String,
    /// seconds, 60..=604800; lock rows older than this are purged
    pub operation_timeout: u64,
    pub parameter: MySqlParameterSettings,
    pub user: MySqlUserSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct MySqlParameterSettings {
    pub max_connections: u32,
    pub innodb_buffer_pool_size: String,
    #[serde(rename = "innodbIOCapacity")]
    pub innodb_io_capacity: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct MySqlUserSettings {
    pub os_user: String,
    pub os_pass: String,
    pub root_pass: String,
    pub admin_user: String,
    pub admin_pass: String,
    pub mysqld_multi_user: String,
    pub mysqld_multi_pass: String,
    pub replication_user: String,
    pub replication_pass: String,
    pub monitor_user: String,
    pub monitor_pass: String,
    pub das_user: String,
    pub das_pass: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PmmSettings {
    pub server: PmmServerSettings,
    pub client: PmmClientSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PmmServerSettings {
    pub addr: String,
    pub user: String,
    pub pass: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PmmClientSettings {
    pub version: String,
    pub installation_package_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            daemon: false,
            log: LogSettings::default(),
            server: ServerSettings::default(),
            db: DbSettings::default(),
            mysql: MySqlSettings::default(),
            pmm: PmmSettings::default(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings {
            file_name: String::new(),
            level: "info".to_string(),
            format: "text".to_string(),
            max_size: 100,
            max_days: 7,
            max_backups: 5,
            rotate_on_startup: false,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            addr: "0.0.0.0:8510".to_string(),
            pid_file: "dbforge.pid".to_string(),
            read_timeout: 5,
            write_timeout: 10,
            router: RouterSettings::default(),
        }
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        RouterSettings {
            alternative_base_path: String::new(),
            alternative_body_path: String::new(),
            http_error_code: 500,
        }
    }
}

impl Default for DbSettings {
    fn default() -> Self {
        DbSettings {
            addr: "127.0.0.1:3306".to_string(),
            name: "dbforge".to_string(),
            user: "root".to_string(),
            pass: "root".to_string(),
            pool: PoolSettings::default(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings {
            max_connections: 20,
            init_connections: 5,
            max_idle_connections: 10,
            max_idle_time: 1800,
            max_wait_time: 10,
            max_retry_count: 3,
            keep_alive_interval: 300,
        }
    }
}

impl Default for MySqlSettings {
    fn default() -> Self {
        MySqlSettings {
            version: "8.0.32".to_string(),
            installation_package_dir: "/data/software/mysql".to_string(),
            installation_temporary_dir: "/data/software/mysql/tmp".to_string(),
            operation_timeout: 86_400,
            parameter: MySqlParameterSettings::default(),
            user: MySqlUserSettings::default(),
        }
    }
}

impl Default for MySqlParameterSettings {
    fn default() -> Self {
        MySqlParameterSettings {
            max_connections: 2000,
            innodb_buffer_pool_size: "1G".to_string(),
            innodb_io_capacity: 1000,
        }
    }
}

impl Default for MySqlUserSettings {
    fn default() -> Self {
        MySqlUserSettings {
            os_user: "root".to_string(),
            os_pass: "root".to_string(),
            root_pass: "root".to_string(),
            admin_user: "admin".to_string(),
            admin_pass: "admin".to_string(),
            mysqld_multi_user: "mysqld_multi".to_string(),
            mysqld_multi_pass: "mysqld_multi".to_string(),
            replication_user: "replication".to_string(),
            replication_pass: "replication".to_string(),
            monitor_user: "pmm".to_string(),
            monitor_pass: "pmm".to_string(),
            das_user: "das".to_string(),
            das_pass: "das".to_string(),
        }
    }
}

impl Default for PmmSettings {
    fn default() -> Self {
        PmmSettings {
            server: PmmServerSettings::default(),
            client: PmmClientSettings::default(),
        }
    }
}

impl Default for PmmServerSettings {
    fn default() -> Self {
        PmmServerSettings {
            addr: "127.0.0.1:443".to_string(),
            user: "admin".to_string(),
            pass: "admin".to_string(),
        }
    }
}

impl Default for PmmClientSettings {
    fn default() -> Self {
        PmmClientSettings {
            version: "2.34.0".to_string(),
            installation_package_dir: "/data/software/mysql".to_string(),
        }
    }
}

impl Settings {
    /// Loads and validates settings from a TOML file. A missing file yields
    /// the defaults so a bare `dbforge server` still starts.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Settings, ConfigError> {
        let settings = match path {
            Some(path) => {
                let path_str = path.as_ref().display().to_string();
                let raw = std::fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Read {
                    path: path_str.clone(),
                    source,
                })?;
                toml::from_str(&raw).map_err(|source| ConfigError::Parse { path: path_str, source })?
            }
            None => Settings::default(),
        };

        settings.validate()?;

        Ok(settings)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.mysql.operation_timeout)
    }

    /// Connection URL of the audit store.
    pub fn db_url(&self) -> String {
        format!(
            "mysql://{}:{}@{}/{}",
            self.db.user, self.db.pass, self.db.addr, self.db.name
        )
    }
}
