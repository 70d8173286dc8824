use semver::Version;

use super::Settings;
use crate::errors::ConfigError;

const MIN_MYSQL_VERSION: Version = Version::new(5, 7, 35);
const MIN_PMM_CLIENT_VERSION: Version = Version::new(2, 0, 0);

const MIN_OPERATION_TIMEOUT: u64 = 60;
const MAX_OPERATION_TIMEOUT: u64 = 86_400 * 7;

const VALID_LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];
const VALID_LOG_FORMATS: [&str; 2] = ["text", "json"];

impl Settings {
    /// Checks every section and reports all violations at once instead of
    /// stopping at the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut violations = Vec::new();

        self.validate_log(&mut violations);
        self.validate_server(&mut violations);
        self.validate_db(&mut violations);
        self.validate_mysql(&mut violations);
        self.validate_pmm(&mut violations);

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { violations })
        }
    }

    fn validate_log(&self, violations: &mut Vec<String>) {
        if !VALID_LOG_LEVELS.contains(&self.log.level.as_str()) {
            violations.push(format!(
                "log.level must be one of {VALID_LOG_LEVELS:?}, {} is not valid",
                self.log.level
            ));
        }
        if !VALID_LOG_FORMATS.contains(&self.log.format.as_str()) {
            violations.push(format!(
                "log.format must be one of {VALID_LOG_FORMATS:?}, {} is not valid",
                self.log.format
            ));
        }
        if self.log.max_size == 0 || self.log.max_days == 0 || self.log.max_backups == 0 {
            violations.push("log.maxSize, log.maxDays and log.maxBackups must be at least 1".to_string());
        }
    }

    fn validate_server(&self, violations: &mut Vec<String>) {
        if self.server.addr.trim().is_empty() {
            violations.push("server.addr must not be empty".to_string());
        }
        if self.server.read_timeout > 60 {
            violations.push(format!(
                "server.readTimeout must be in [0, 60], {} is not valid",
                self.server.read_timeout
            ));
        }
        if !(1..=60).contains(&self.server.write_timeout) {
            violations.push(format!(
                "server.writeTimeout must be in [1, 60], {} is not valid",
                self.server.write_timeout
            ));
        }
        if self.server.router.http_error_code != 200 && self.server.router.http_error_code != 500 {
            violations.push(format!(
                "server.router.httpErrorCode must be either 200 or 500, {} is not valid",
                self.server.router.http_error_code
            ));
        }
    }

    fn validate_db(&self, violations: &mut Vec<String>) {
        let pool = &self.db.pool;
        if pool.max_connections == 0 {
            violations.push("db.pool.maxConnections must be at least 1".to_string());
        }
        if pool.init_connections > pool.max_connections {
            violations.push(format!(
                "db.pool.initConnections ({}) must not exceed db.pool.maxConnections ({})",
                pool.init_connections, pool.max_connections
            ));
        }
        if pool.max_idle_connections > pool.max_connections {
            violations.push(format!(
                "db.pool.maxIdleConnections ({}) must not exceed db.pool.maxConnections ({})",
                pool.max_idle_connections, pool.max_connections
            ));
        }
        if pool.max_idle_time == 0 || pool.keep_alive_interval == 0 {
            violations.push("db.pool.maxIdleTime and db.pool.keepAliveInterval must be at least 1".to_string());
        }
    }

    fn validate_mysql(&self, violations: &mut Vec<String>) {
        match Version::parse(&self.mysql.version) {
            Ok(version) => {
                if version < MIN_MYSQL_VERSION {
                    violations.push(format!(
                        "mysql.version must be at least {MIN_MYSQL_VERSION}, {} is not valid",
                        self.mysql.version
                    ));
                }
            }
            Err(_) => violations.push(format!(
                "mysql.version must be formatted as X.Y.Z, {} is not valid",
                self.mysql.version
            )),
        }

        if self.mysql.installation_package_dir.trim().is_empty() {
            violations.push("mysql.installationPackageDir must not be empty".to_string());
        }
        if !(MIN_OPERATION_TIMEOUT..=MAX_OPERATION_TIMEOUT).contains(&self.mysql.operation_timeout) {
            violations.push(format!(
                "mysql.operationTimeout must be in [{MIN_OPERATION_TIMEOUT}, {MAX_OPERATION_TIMEOUT}], {} is not valid",
                self.mysql.operation_timeout
            ));
        }
        if !(1..=10_000).contains(&self.mysql.parameter.max_connections) {
            violations.push(format!(
                "mysql.parameter.maxConnections must be in [1, 10000], {} is not valid",
                self.mysql.parameter.max_connections
            ));
        }
        if self.mysql.parameter.innodb_io_capacity == 0 {
            violations.push("mysql.parameter.innodbIOCapacity must be at least 1".to_string());
        }
    }

    fn validate_pmm(&self, violations: &mut Vec<String>) {
        match Version::parse(&self.pmm.client.version) {
            Ok(version) => {
                if version < MIN_PMM_CLIENT_VERSION {
                    violations.push(format!(
                        "pmm.client.version must be at least {MIN_PMM_CLIENT_VERSION}, {} is not valid",
                        self.pmm.client.version
                    ));
                }
            }
            Err(_) => violations.push(format!(
                "pmm.client.version must be formatted as X.Y.Z, {} is not valid",
                self.pmm.client.version
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Settings;
    use crate::errors::ConfigError;

    fn violations_of(settings: &Settings) -> Vec<String> {
        match settings.validate() {
            Ok(()) => vec![],
            Err(ConfigError::Invalid { violations }) => violations,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_default_settings_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_operation_timeout_bounds() {
        let mut settings = Settings::default();

        settings.mysql.operation_timeout = 59;
        assert!(!violations_of(&settings).is_empty());

        settings.mysql.operation_timeout = 60;
        assert!(violations_of(&settings).is_empty());

        settings.mysql.operation_timeout = 604_800;
        assert!(violations_of(&settings).is_empty());

        settings.mysql.operation_timeout = 604_801;
        assert!(!violations_of(&settings).is_empty());
    }

    #[test]
    fn test_mysql_version_minimum() {
        let mut settings = Settings::default();

        settings.mysql.version = "5.7.35".to_string();
        assert!(violations_of(&settings).is_empty());

        settings.mysql.version = "5.7.34".to_string();
        assert!(!violations_of(&settings).is_empty());

        settings.mysql.version = "8.0".to_string();
        assert!(!violations_of(&settings).is_empty());
    }

    #[test]
    fn test_write_timeout_bounds() {
        let mut settings = Settings::default();

        settings.server.write_timeout = 0;
        assert!(!violations_of(&settings).is_empty());

        settings.server.write_timeout = 61;
        assert!(!violations_of(&settings).is_empty());

        settings.server.write_timeout = 60;
        assert!(violations_of(&settings).is_empty());
    }

    #[test]
    fn test_http_error_code_is_200_or_500() {
        let mut settings = Settings::default();

        settings.server.router.http_error_code = 404;
        assert!(!violations_of(&settings).is_empty());

        settings.server.router.http_error_code = 200;
        assert!(violations_of(&settings).is_empty());
    }

    #[test]
    fn test_pmm_client_version_minimum() {
        let mut settings = Settings::default();

        settings.pmm.client.version = "1.17.0".to_string();
        assert!(!violations_of(&settings).is_empty());

        settings.pmm.client.version = "2.0.0".to_string();
        assert!(violations_of(&settings).is_empty());
    }

    #[test]
    fn test_violations_are_aggregated() {
        let mut settings = Settings::default();
        settings.server.write_timeout = 0;
        settings.mysql.operation_timeout = 1;
        settings.log.level = "trace".to_string();

        assert!(violations_of(&settings).len() >= 3);
    }

    #[test]
    fn test_parse_camel_case_keys() {
        let raw = r#"
            [server]
            addr = "0.0.0.0:8510"
            readTimeout = 5
            writeTimeout = 10

            [server.router]
            httpErrorCode = 200
            alternativeBodyPath = "wrapper"

            [mysql]
            version = "8.0.32"
            operationTimeout = 86400
        "#;
        let settings: Settings = toml::from_str(raw).unwrap();
        assert_eq!(settings.server.router.http_error_code, 200);
        assert_eq!(settings.server.router.alternative_body_path, "wrapper");
        assert_eq!(settings.mysql.operation_timeout, 86_400);
        assert!(settings.validate().is_ok());
    }
}
