use semver::Version;
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};

use crate::config::Settings;
use crate::errors::{InstallError, TemplateError};
use crate::mysql::mode::Mode;
use crate::mysql::parameter::tmpl;

const DIR_BASE_TEMPLATE_SUFFIX: &str = "mysql";

const DEFAULT_DATA_DIR_BASE_NAME: &str = "/data/mysql/data";
const DEFAULT_LOG_DIR_BASE_NAME: &str = "/data/mysql/data";
const DEFAULT_BACKUP_DIR: &str = "/data/backup";
const DEFAULT_SEMI_SYNC_SOURCE_TIMEOUT: u32 = 10_000;
const DEFAULT_GROUP_REPLICATION_CONSISTENCY: &str = "eventual";
const DEFAULT_GROUP_REPLICATION_FLOW_CONTROL_MODE: &str = "disabled";
const DEFAULT_GROUP_REPLICATION_MEMBER_WEIGHT: u32 = 50;
const DEFAULT_BINLOG_EXPIRE_LOGS_SECONDS: u64 = 604_800;
const DEFAULT_BINLOG_EXPIRE_LOGS_DAYS: u32 = 7;

/// Per-request MySQL server parameters. The record deserialized from the
/// request body is a template: per-host values (dirs, server id, semi-sync
/// roles) are derived through [`MySQLServer::with_host`], which returns a
/// fresh value instead of mutating shared state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MySQLServer {
    pub version: String,
    pub host_ip: String,
    pub port_num: u16,
    pub root_pass: String,
    pub admin_user: String,
    pub admin_pass: String,
    pub client_user: String,
    pub client_pass: String,
    pub mysqld_multi_user: String,
    pub mysqld_multi_pass: String,
    pub replication_user: String,
    pub replication_pass: String,
    pub monitor_user: String,
    pub monitor_pass: String,
    pub das_user: String,
    pub das_pass: String,
    pub os_user: String,
    pub os_pass: String,
    pub title: String,
    pub binary_dir_base: String,
    pub data_dir_base_name: String,
    pub data_dir_base: String,
    pub log_dir_base_name: String,
    pub log_dir_base: String,
    pub semi_sync_source_enabled: u8,
    pub semi_sync_replica_enabled: u8,
    pub semi_sync_source_timeout: u32,
    pub group_replication_consistency: String,
    pub group_replication_flow_control_mode: String,
    pub group_replication_member_weight: u32,
    pub server_id: u64,
    pub binlog_expire_logs_seconds: u64,
    pub binlog_expire_logs_days: u32,
    pub backup_dir: String,
    pub max_connections: u32,
    pub innodb_buffer_pool_size: String,
    pub innodb_io_capacity: u32,
    pub innodb_io_capacity_max: u32,
}

impl Default for MySQLServer {
    fn default() -> Self {
        MySQLServer {
            version: String::new(),
            host_ip: String::new(),
            port_num: 3306,
            root_pass: String::new(),
            admin_user: String::new(),
            admin_pass: String::new(),
            client_user: String::new(),
            client_pass: String::new(),
            mysqld_multi_user: String::new(),
            mysqld_multi_pass: String::new(),
            replication_user: String::new(),
            replication_pass: String::new(),
            monitor_user: String::new(),
            monitor_pass: String::new(),
            das_user: String::new(),
            das_pass: String::new(),
            os_user: String::new(),
            os_pass: String::new(),
            title: String::new(),
            binary_dir_base: String::new(),
            data_dir_base_name: String::new(),
            data_dir_base: String::new(),
            log_dir_base_name: String::new(),
            log_dir_base: String::new(),
            semi_sync_source_enabled: 0,
            semi_sync_replica_enabled: 1,
            semi_sync_source_timeout: 0,
            group_replication_consistency: String::new(),
            group_replication_flow_control_mode: String::new(),
            group_replication_member_weight: 0,
            server_id: 0,
            binlog_expire_logs_seconds: 0,
            binlog_expire_logs_days: 0,
            backup_dir: String::new(),
            max_connections: 0,
            innodb_buffer_pool_size: String::new(),
            innodb_io_capacity: 0,
            innodb_io_capacity_max: 0,
        }
    }
}

fn default_if_empty(value: String, default: &str) -> String {
    if value.trim().is_empty() {
        default.to_string()
    } else {
        value
    }
}

impl MySQLServer {
    /// Fills every field the request left empty from the configuration
    /// snapshot. Request values always win.
    pub fn with_defaults(mut self, settings: &Settings) -> MySQLServer {
        let user = &settings.mysql.user;

        self.version = default_if_empty(self.version, &settings.mysql.version);
        self.root_pass = default_if_empty(self.root_pass, &user.root_pass);
        self.admin_user = default_if_empty(self.admin_user, &user.admin_user);
        self.admin_pass = default_if_empty(self.admin_pass, &user.admin_pass);
        self.client_user = default_if_empty(self.client_user, "root");
        self.client_pass = default_if_empty(self.client_pass, &user.root_pass);
        self.mysqld_multi_user = default_if_empty(self.mysqld_multi_user, &user.mysqld_multi_user);
        self.mysqld_multi_pass = default_if_empty(self.mysqld_multi_pass, &user.mysqld_multi_pass);
        self.replication_user = default_if_empty(self.replication_user, &user.replication_user);
        self.replication_pass = default_if_empty(self.replication_pass, &user.replication_pass);
        self.monitor_user = default_if_empty(self.monitor_user, &user.monitor_user);
        self.monitor_pass = default_if_empty(self.monitor_pass, &user.monitor_pass);
        self.das_user = default_if_empty(self.das_user, &user.das_user);
        self.das_pass = default_if_empty(self.das_pass, &user.das_pass);
        self.os_user = default_if_empty(self.os_user, &user.os_user);
        self.os_pass = default_if_empty(self.os_pass, &user.os_pass);

        self.binary_dir_base = default_if_empty(self.binary_dir_base, &format!("/data/mysql/mysql{}", self.version));
        self.data_dir_base_name = default_if_empty(self.data_dir_base_name, DEFAULT_DATA_DIR_BASE_NAME);
        self.log_dir_base_name = default_if_empty(self.log_dir_base_name, DEFAULT_LOG_DIR_BASE_NAME);
        self.backup_dir = default_if_empty(self.backup_dir, DEFAULT_BACKUP_DIR);

        if self.semi_sync_source_timeout == 0 {
            self.semi_sync_source_timeout = DEFAULT_SEMI_SYNC_SOURCE_TIMEOUT;
        }
        self.group_replication_consistency =
            default_if_empty(self.group_replication_consistency, DEFAULT_GROUP_REPLICATION_CONSISTENCY);
        self.group_replication_flow_control_mode = default_if_empty(
            self.group_replication_flow_control_mode,
            DEFAULT_GROUP_REPLICATION_FLOW_CONTROL_MODE,
        );
        if self.group_replication_member_weight == 0 {
            self.group_replication_member_weight = DEFAULT_GROUP_REPLICATION_MEMBER_WEIGHT;
        }
        if self.binlog_expire_logs_seconds == 0 {
            self.binlog_expire_logs_seconds = DEFAULT_BINLOG_EXPIRE_LOGS_SECONDS;
        }
        if self.binlog_expire_logs_days == 0 {
            self.binlog_expire_logs_days = DEFAULT_BINLOG_EXPIRE_LOGS_DAYS;
        }
        if self.max_connections == 0 {
            self.max_connections = settings.mysql.parameter.max_connections;
        }
        self.innodb_buffer_pool_size =
            default_if_empty(self.innodb_buffer_pool_size, &settings.mysql.parameter.innodb_buffer_pool_size);
        if self.innodb_io_capacity == 0 {
            self.innodb_io_capacity = settings.mysql.parameter.innodb_io_capacity;
        }
        if self.innodb_io_capacity_max == 0 {
            self.innodb_io_capacity_max = self.innodb_io_capacity * 2;
        }

        self
    }

    /// Derives the per-host parameter record: directory bases, section title,
    /// server id and the semi-sync role flags. Pure; `self` is the template.
    pub fn with_host(&self, host_ip: &str, port_num: u16, is_source: bool) -> Result<MySQLServer, InstallError> {
        let mut derived = self.clone();

        derived.host_ip = host_ip.to_string();
        derived.port_num = port_num;
        derived.data_dir_base = dir_base(&self.data_dir_base_name, port_num);
        derived.log_dir_base = dir_base(&self.log_dir_base_name, port_num);
        derived.title = format!("mysqld{port_num}");
        derived.server_id = derive_server_id(host_ip, port_num)?;

        if is_source {
            derived.semi_sync_source_enabled = 1;
            derived.semi_sync_replica_enabled = 0;
        } else {
            derived.semi_sync_source_enabled = 0;
            derived.semi_sync_replica_enabled = 1;
        }

        Ok(derived)
    }

    /// Renders the full option file: common sections plus this instance's
    /// mysqld section. Pure function of the record, version and mode.
    pub fn render_option_file(&self, version: &Version, mode: Mode) -> Result<String, TemplateError> {
        let common = self.render(tmpl::COMMON)?;
        let mysqld = self.render_mysqld_section(&self.title, version, mode)?;

        Ok(common + &mysqld)
    }

    /// Renders only the `[mysqld<port>]` section, used when appending an
    /// instance to an existing `/etc/my.cnf`.
    pub fn render_mysqld_section(&self, title: &str, version: &Version, mode: Mode) -> Result<String, TemplateError> {
        // only the 8.0 template exists; anything older is refused
        if version.major < 8 {
            return Err(TemplateError::UnsupportedVersion(version.to_string()));
        }

        let semi_sync = match mode {
            Mode::SemiSyncReplication => tmpl::MYSQLD80_SEMI_SYNC.to_string(),
            _ => tmpl::comment_out(tmpl::MYSQLD80_SEMI_SYNC),
        };
        let group_replication = match mode {
            Mode::GroupReplication => tmpl::MYSQLD80_GROUP_REPLICATION.to_string(),
            _ => tmpl::comment_out(tmpl::MYSQLD80_GROUP_REPLICATION),
        };

        let template = format!("{}\n{semi_sync}\n{group_replication}{}", tmpl::MYSQLD80_BASE, tmpl::MYSQLD80_TAIL);

        let mut context = self.context()?;
        context.insert("title", title);

        render_one_off("mysqld80", &template, &context).map_err(TemplateError::from)
    }

    /// Renders the root bootstrap SQL executed once against the freshly
    /// initialised instance.
    pub fn render_bootstrap_sql(&self) -> Result<String, TemplateError> {
        let context = self.context()?;

        render_one_off("init_user", tmpl::INIT_USER_SQL, &context).map_err(TemplateError::from)
    }

    fn render(&self, template: &str) -> Result<String, TemplateError> {
        let context = self.context()?;

        render_one_off("parameter", template, &context).map_err(TemplateError::from)
    }

    fn context(&self) -> Result<Context, TemplateError> {
        Context::from_serialize(self).map_err(TemplateError::from)
    }
}

fn dir_base(base_name: &str, port_num: u16) -> String {
    format!("{base_name}/{DIR_BASE_TEMPLATE_SUFFIX}{port_num}")
}

fn render_one_off(name: &str, template: &str, context: &Context) -> Result<String, tera::Error> {
    let mut tera = Tera::default();
    tera.add_raw_template(name, template)?;

    tera.render(name, context)
}

/// server id is the decimal concatenation of the port and the two low octets
/// of the host ip, each zero-padded to three digits.
pub fn derive_server_id(host_ip: &str, port_num: u16) -> Result<u64, InstallError> {
    let octets = host_ip
        .split('.')
        .map(|octet| octet.parse::<u8>())
        .collect::<Result<Vec<u8>, _>>()
        .ok()
        .filter(|octets| octets.len() == 4)
        .ok_or_else(|| InstallError::Validation(format!("host ip must be a dotted quad, {host_ip} is not valid")))?;

    format!("{port_num}{:03}{:03}", octets[2], octets[3])
        .parse::<u64>()
        .map_err(|err| InstallError::Validation(format!("cannot derive server id from {host_ip}:{port_num}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn test_server() -> MySQLServer {
        let template = MySQLServer {
            version: "8.0.32".to_string(),
            data_dir_base_name: "/data/mysql/data".to_string(),
            log_dir_base_name: "/data/mysql/data".to_string(),
            ..MySQLServer::default()
        }
        .with_defaults(&Settings::default());

        template.with_host("192.168.137.21", 3306, true).unwrap()
    }

    #[test]
    fn test_derive_server_id() {
        assert_eq!(derive_server_id("192.168.137.21", 3306).unwrap(), 3_306_137_021);
        assert_eq!(derive_server_id("10.0.1.2", 3307).unwrap(), 3_307_001_002);
        assert!(derive_server_id("192.168.137", 3306).is_err());
        assert!(derive_server_id("192.168.137.256", 3306).is_err());
        assert!(derive_server_id("not-an-ip", 3306).is_err());
    }

    #[test]
    fn test_with_host_derives_dirs_and_flags() {
        let template = test_server();

        let source = template.with_host("192.168.137.21", 3306, true).unwrap();
        assert_eq!(source.data_dir_base, "/data/mysql/data/mysql3306");
        assert_eq!(source.log_dir_base, "/data/mysql/data/mysql3306");
        assert_eq!(source.title, "mysqld3306");
        assert_eq!(source.semi_sync_source_enabled, 1);
        assert_eq!(source.semi_sync_replica_enabled, 0);

        let replica = template.with_host("192.168.137.21", 3307, false).unwrap();
        assert_eq!(replica.data_dir_base, "/data/mysql/data/mysql3307");
        assert_eq!(replica.server_id, 3_307_137_021);
        assert_eq!(replica.semi_sync_source_enabled, 0);
        assert_eq!(replica.semi_sync_replica_enabled, 1);

        // the template itself is untouched
        assert_eq!(template.port_num, 3306);
    }

    #[test]
    fn test_option_file_rendering_is_deterministic() {
        let server = test_server();
        let version = Version::parse("8.0.32").unwrap();

        let first = server.render_option_file(&version, Mode::SemiSyncReplication).unwrap();
        let second = server.render_option_file(&version, Mode::SemiSyncReplication).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_option_file_common_sections() {
        let server = test_server();
        let version = Version::parse("8.0.32").unwrap();
        let rendered = server.render_option_file(&version, Mode::Standalone).unwrap();

        assert!(rendered.starts_with("[client]\n"));
        assert!(rendered.contains("[mysql]\n"));
        assert!(rendered.contains("[mysqld_multi]\n"));
        assert!(rendered.contains("log=/data/mysql/data/mysqld_multi/mysqld_multi.log"));
        assert!(rendered.contains("[mysqld3306]\n"));
        assert!(rendered.contains("port=3306\n"));
        assert!(rendered.contains("mysqlx_port=33060\n"));
        assert!(rendered.contains("admin_port=33062\n"));
        assert!(rendered.contains("server-id=3306137021\n"));
    }

    #[test]
    fn test_mode_standalone_keeps_replication_blocks_commented() {
        let server = test_server();
        let version = Version::parse("8.0.32").unwrap();
        let rendered = server.render_option_file(&version, Mode::Standalone).unwrap();

        assert!(rendered.contains("#plugin_load="));
        assert!(rendered.contains("#rpl_semi_sync_source_enabled=1"));
        assert!(rendered.contains("#group_replication_single_primary_mode=on"));
        assert!(!rendered.contains("\nplugin_load="));
        assert!(!rendered.contains("\nrpl_semi_sync"));
        assert!(!rendered.contains("\ngroup_replication"));
    }

    #[test]
    fn test_mode_async_matches_standalone() {
        let server = test_server();
        let version = Version::parse("8.0.32").unwrap();

        let standalone = server.render_option_file(&version, Mode::Standalone).unwrap();
        let async_replication = server.render_option_file(&version, Mode::AsyncReplication).unwrap();
        assert_eq!(standalone, async_replication);
    }

    #[test]
    fn test_mode_semi_sync_uncomments_plugin_and_rpl_lines() {
        let server = test_server();
        let version = Version::parse("8.0.32").unwrap();
        let rendered = server.render_option_file(&version, Mode::SemiSyncReplication).unwrap();

        assert!(rendered.contains("\nplugin_load=\"rpl_semi_sync_source=semisync_source.so;rpl_semi_sync_replica=semisync_replica.so\""));
        assert!(rendered.contains("\nrpl_semi_sync_source_enabled=1"));
        assert!(rendered.contains("\nrpl_semi_sync_replica_enabled=0"));
        assert!(rendered.contains("\nrpl_semi_sync_source_timeout=10000"));
        // group replication stays commented
        assert!(rendered.contains("#group_replication_consistency=eventual"));
        assert!(!rendered.contains("\ngroup_replication"));
    }

    #[test]
    fn test_mode_group_replication_uncomments_group_lines_only() {
        let server = test_server();
        let version = Version::parse("8.0.32").unwrap();
        let rendered = server.render_option_file(&version, Mode::GroupReplication).unwrap();

        assert!(rendered.contains("\ngroup_replication_single_primary_mode=on"));
        assert!(rendered.contains("\ngroup_replication_member_weight=50"));
        assert!(rendered.contains("#plugin_load="));
        assert!(!rendered.contains("\nplugin_load="));
        assert!(!rendered.contains("\nrpl_semi_sync"));
    }

    #[test]
    fn test_versions_below_80_are_rejected() {
        let server = test_server();
        let version = Version::parse("5.7.35").unwrap();

        let err = server.render_option_file(&version, Mode::Standalone).unwrap_err();
        assert!(matches!(err, TemplateError::UnsupportedVersion(_)));
    }

    #[test]
    fn test_bootstrap_sql_creates_documented_users() {
        let server = test_server();
        let sql = server.render_bootstrap_sql().unwrap();

        assert!(sql.contains("alter user root@'localhost' identified by 'root'"));
        assert!(sql.contains("create user root@'%'"));
        assert!(sql.contains("create user admin@'%'"));
        assert!(sql.contains("grant shutdown on *.* to mysqld_multi@'localhost'"));
        assert!(sql.contains("grant replication client, replication slave on *.* to replication@'%'"));
        assert!(sql.contains("create user pmm@'localhost'"));
        assert!(sql.contains("create user pmm@'127.0.0.1'"));
        assert!(sql.contains("create user das@'%'"));
    }

    #[test]
    fn test_with_defaults_fills_from_settings() {
        let settings = Settings::default();
        let server = MySQLServer::default().with_defaults(&settings);

        assert_eq!(server.version, "8.0.32");
        assert_eq!(server.binary_dir_base, "/data/mysql/mysql8.0.32");
        assert_eq!(server.max_connections, 2000);
        assert_eq!(server.innodb_io_capacity, 1000);
        assert_eq!(server.innodb_io_capacity_max, 2000);
        assert_eq!(server.semi_sync_source_timeout, 10_000);
        assert_eq!(server.os_user, "root");
    }
}
