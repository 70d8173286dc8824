use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use semver::Version;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Executor, Row};

use crate::cmd::ssh::{RemoteShell, SshConn, SshError};
use crate::config::Settings;
use crate::errors::InstallError;
use crate::mysql::mode::Mode;
use crate::mysql::os::{OsExecutor, PID_PROBE_ATTEMPTS, PID_PROBE_DELAY};
use crate::mysql::parameter::{MySQLServer, PmmClient};
use crate::mysql::pmm::PmmExecutor;
use crate::mysql::repository::{OperationStore, Status};
use crate::utilities::{retry_with_fixed_delay, split_addr};

const DEFAULT_CONFIG_FILE: &str = "/etc/my.cnf";
const MYSQL_USER: &str = "mysql";

const MYSQLD_SINGLE_INSTANCE_SECTION: &str = "[mysqld]";
const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

const DETAIL_SUCCESS_MESSAGE: &str = "install mysql server completed.";

const SHUTDOWN_SQL: &str = "shutdown";
const START_REPLICA_SQL: &str = "start replica";
const SHOW_SLAVE_STATUS_SQL: &str = "show slave status";

const REPLICA_PROBE_ATTEMPTS: usize = 5;
const REPLICA_PROBE_DELAY: Duration = Duration::from_secs(2);

/// Opens remote shells; split out so the engine can be exercised against
/// scripted shells.
#[async_trait]
pub trait ShellProvider: Send + Sync {
    async fn connect(&self, host: &str, user: &str, pass: &str) -> Result<Arc<dyn RemoteShell>, SshError>;
}

pub struct SshShellProvider;

#[async_trait]
impl ShellProvider for SshShellProvider {
    async fn connect(&self, host: &str, user: &str, pass: &str) -> Result<Arc<dyn RemoteShell>, SshError> {
        Ok(Arc::new(SshConn::connect(host, user, pass).await?))
    }
}

/// Drives the per-host install workflow. Hosts are processed strictly in
/// order; the first (sorted) address is the replication source. Each host is
/// bracketed by an operation-detail row; the first failing step marks the
/// detail failed and aborts the operation.
pub struct Engine<'a> {
    repository: &'a dyn OperationStore,
    shells: Arc<dyn ShellProvider>,
    settings: &'a Settings,
    mysql_version: Version,
    mode: Mode,
    addrs: Vec<String>,
    server_template: MySQLServer,
    pmm_client: PmmClient,
}

impl<'a> Engine<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: &'a dyn OperationStore,
        shells: Arc<dyn ShellProvider>,
        settings: &'a Settings,
        mysql_version: Version,
        mode: Mode,
        addrs: Vec<String>,
        server_template: MySQLServer,
        pmm_client: PmmClient,
    ) -> Engine<'a> {
        Engine {
            repository,
            shells,
            settings,
            mysql_version,
            mode,
            addrs,
            server_template,
            pmm_client,
        }
    }

    /// Installs every address of the operation. `addrs` must already be
    /// sorted; the caller owns operation begin/finish and the host lock.
    pub async fn install(&self, operation_id: u64) -> Result<(), InstallError> {
        let mut source: Option<(String, u16)> = None;

        for (index, addr) in self.addrs.iter().enumerate() {
            let (host_ip, port_num) = split_addr(addr)?;
            let is_source = index == 0;
            if is_source {
                source = Some((host_ip.clone(), port_num));
            }
            let (source_host, source_port) = source.clone().expect("source is captured on the first iteration");

            let server = self.server_template.with_host(&host_ip, port_num, is_source)?;

            let detail_id = self
                .repository
                .begin_detail(operation_id, &host_ip, port_num)
                .await
                .map_err(|err| InstallError::repository(err, addr))?;

            info!("installing mysql server. operation_id: {operation_id}, addr: {addr}, source: {is_source}");
            let result = self
                .install_host(addr, &server, is_source, &source_host, source_port)
                .await;

            match result {
                Ok(()) => {
                    self.repository
                        .finish_detail(detail_id, Status::Success, DETAIL_SUCCESS_MESSAGE)
                        .await
                        .map_err(|err| InstallError::repository(err, addr))?;
                }
                Err(err) => {
                    if let Err(update_err) = self
                        .repository
                        .finish_detail(detail_id, Status::Failed, &err.to_string())
                        .await
                    {
                        error!("update operation detail failed. detail_id: {detail_id}, error: {update_err}");
                    }
                    return Err(err);
                }
            }
        }

        if self.mode == Mode::GroupReplication {
            self.configure_group_replication().await?;
        }

        Ok(())
    }

    async fn install_host(
        &self,
        addr: &str,
        server: &MySQLServer,
        is_source: bool,
        source_host: &str,
        source_port: u16,
    ) -> Result<(), InstallError> {
        let shell = self
            .shells
            .connect(&server.host_ip, &server.os_user, &server.os_pass)
            .await
            .map_err(|err| InstallError::remote(&server.host_ip, err))?;

        let mut os_executor = OsExecutor::new(
            shell.clone(),
            self.mysql_version.clone(),
            server.clone(),
            self.settings.mysql.installation_package_dir.clone(),
        );
        os_executor.init().await?;

        self.init_mysql_instance(&shell, &os_executor, server).await?;

        if !is_source && self.mode.is_source_replica() {
            self.configure_replication(addr, server, source_host, source_port).await?;
        }

        let pmm_executor = PmmExecutor::new(shell, &server.host_ip, server.port_num, &self.pmm_client, self.settings);
        pmm_executor.init().await
    }

    /// Bootstraps one instance: option file, initialize, root bootstrap SQL,
    /// then the hand-over from the foreground mysqld to mysqld_multi.
    async fn init_mysql_instance(
        &self,
        shell: &Arc<dyn RemoteShell>,
        os_executor: &OsExecutor,
        server: &MySQLServer,
    ) -> Result<(), InstallError> {
        let port_num = server.port_num;
        let instance_config = format!("/tmp/my.cnf.{port_num}");

        // per-instance option file used by --defaults-file
        let option_file = server.render_option_file(&self.mysql_version, self.mode)?;
        self.upload_content(shell, &option_file, &instance_config).await?;
        shell
            .chown_recursive(&instance_config, MYSQL_USER, MYSQL_USER)
            .await
            .map_err(|err| InstallError::remote(&server.host_ip, err))?;

        self.prepare_shared_config_file(shell, server, &option_file).await?;

        // initialize and fish the generated root password out of the error log
        let init_command = format!(
            "{bin}/bin/mysqld --defaults-file={instance_config} --initialize --basedir={bin} --datadir={data}/data --user={MYSQL_USER}",
            bin = server.binary_dir_base,
            data = server.data_dir_base,
        );
        shell
            .exec_quiet(&init_command)
            .await
            .map_err(|err| InstallError::remote(&server.host_ip, err))?;

        let temporary_root_pass = self.get_generated_root_pass(shell, server).await?;

        // the bootstrap mysqld blocks in the foreground; run it on its own
        // task and watch the pid set from here
        let start_command = format!(
            "{bin}/bin/mysqld --defaults-file={instance_config} --basedir={bin} --datadir={data}/data --user={MYSQL_USER}",
            bin = server.binary_dir_base,
            data = server.data_dir_base,
        );
        let start_shell = shell.clone();
        let start_host = server.host_ip.clone();
        tokio::spawn(async move {
            if let Err(err) = start_shell.exec(&start_command).await {
                debug!("bootstrap mysqld on {start_host} exited: {err}");
            }
        });

        os_executor.wait_for_mysql_running().await?;
        tokio::time::sleep(Duration::from_secs(2)).await;

        // reset root and create the managed users over the local socket
        let bootstrap_sql = server.render_bootstrap_sql()?;
        let bootstrap_command = format!(
            "{bin}/bin/mysql --connect-expired-password -uroot -p'{temporary_root_pass}' -S {data}/run/mysql.sock -e \"{bootstrap_sql}\"",
            bin = server.binary_dir_base,
            data = server.data_dir_base,
        );
        shell
            .exec_quiet(&bootstrap_command)
            .await
            .map_err(|err| InstallError::remote(&server.host_ip, err))?;

        self.shutdown_instance(server).await?;
        os_executor.wait_for_mysql_stopped().await?;

        // restart under the multi-instance supervisor
        shell
            .exec_quiet(&format!("{}/bin/mysqld_multi start {port_num}", server.binary_dir_base))
            .await
            .map_err(|err| InstallError::remote(&server.host_ip, err))?;
        self.wait_for_multi_instance_running(shell, server).await?;

        Ok(())
    }

    /// Creates `/etc/my.cnf`, or extends an existing one with this
    /// instance's section. A `[mysqld]` single-instance section is a hard
    /// stop: converting such a host is not supported.
    async fn prepare_shared_config_file(
        &self,
        shell: &Arc<dyn RemoteShell>,
        server: &MySQLServer,
        option_file: &str,
    ) -> Result<(), InstallError> {
        let remote = |err| InstallError::remote(&server.host_ip, err);

        let exists = shell.path_exists(DEFAULT_CONFIG_FILE).await.map_err(remote)?;
        if !exists {
            self.upload_content(shell, option_file, DEFAULT_CONFIG_FILE).await?;
            shell
                .chown_recursive(DEFAULT_CONFIG_FILE, MYSQL_USER, MYSQL_USER)
                .await
                .map_err(remote)?;
            return Ok(());
        }

        let backup = format!("{DEFAULT_CONFIG_FILE}.{}", Local::now().format(BACKUP_TIMESTAMP_FORMAT));
        shell.copy_remote(DEFAULT_CONFIG_FILE, &backup).await.map_err(remote)?;

        let existing = shell.cat(DEFAULT_CONFIG_FILE).await.map_err(remote)?;
        if existing.contains(MYSQLD_SINGLE_INSTANCE_SECTION) {
            return Err(InstallError::Validation(
                "mysqld section exists, converting a single instance to multi instance is not supported".to_string(),
            ));
        }

        let section_title = format!("[mysqld{}]", server.port_num);
        if !existing.contains(&section_title) {
            let section = server.render_mysqld_section(&server.title, &self.mysql_version, self.mode)?;
            let content = format!("{existing}\n{section}");
            self.upload_content(shell, &content, DEFAULT_CONFIG_FILE).await?;
            shell
                .chown_recursive(DEFAULT_CONFIG_FILE, MYSQL_USER, MYSQL_USER)
                .await
                .map_err(remote)?;
        }

        Ok(())
    }

    async fn get_generated_root_pass(
        &self,
        shell: &Arc<dyn RemoteShell>,
        server: &MySQLServer,
    ) -> Result<String, InstallError> {
        let command = format!(
            "grep 'A temporary password is generated for root@localhost' {}/log/mysql.err | awk -F' ' '{{print $NF}}'",
            server.data_dir_base
        );
        let output = shell
            .exec(&command)
            .await
            .map_err(|err| InstallError::remote(&server.host_ip, err))?;

        let pass = output.trim().to_string();
        if pass.is_empty() {
            return Err(InstallError::Validation(format!(
                "cannot find the generated root password in {}/log/mysql.err",
                server.data_dir_base
            )));
        }

        Ok(pass)
    }

    /// Issues SHUTDOWN over the MySQL protocol. The server drops the
    /// connection while the statement is in flight, so the statement result
    /// is advisory; the PID poll that follows is authoritative.
    async fn shutdown_instance(&self, server: &MySQLServer) -> Result<(), InstallError> {
        let addr = format!("{}:{}", server.host_ip, server.port_num);
        let mut conn = self.connect_instance(&server.host_ip, server.port_num, &server.root_pass).await?;

        if let Err(err) = conn.execute(SHUTDOWN_SQL).await {
            debug!("shutdown statement on {addr} returned: {err}");
        }

        Ok(())
    }

    async fn wait_for_multi_instance_running(
        &self,
        shell: &Arc<dyn RemoteShell>,
        server: &MySQLServer,
    ) -> Result<(), InstallError> {
        let report_command = format!("{}/bin/mysqld_multi report {}", server.binary_dir_base, server.port_num);
        let expected = format!("MySQL server from group: mysqld{} is running", server.port_num);
        let report_command = report_command.as_str();
        let expected = expected.as_str();

        retry_with_fixed_delay(PID_PROBE_ATTEMPTS, PID_PROBE_DELAY, || async move {
            let output = shell
                .exec(report_command)
                .await
                .map_err(|err| InstallError::remote(&server.host_ip, err))?;
            if output.contains(expected) {
                Ok(())
            } else {
                Err(InstallError::Validation(format!(
                    "mysql multi instance is not running after {PID_PROBE_ATTEMPTS} attempts. host: {}, port: {}",
                    server.host_ip, server.port_num
                )))
            }
        })
        .await
    }

    /// Points this replica at the source and waits for both replication
    /// threads to come up.
    async fn configure_replication(
        &self,
        addr: &str,
        server: &MySQLServer,
        source_host: &str,
        source_port: u16,
    ) -> Result<(), InstallError> {
        if addr == format!("{source_host}:{source_port}") {
            return Ok(());
        }

        info!("configuring replication. replica: {addr}, source: {source_host}:{source_port}");
        let mut conn = self.connect_instance(&server.host_ip, server.port_num, &server.root_pass).await?;

        let change_master_sql =
            change_master_sql(source_host, source_port, &server.replication_user, &server.replication_pass);
        conn.execute(change_master_sql.as_str())
            .await
            .map_err(|err| InstallError::protocol(addr, err))?;
        conn.execute(START_REPLICA_SQL)
            .await
            .map_err(|err| InstallError::protocol(addr, err))?;

        retry_with_fixed_delay(REPLICA_PROBE_ATTEMPTS, REPLICA_PROBE_DELAY, || async move {
            let mut conn = self.connect_instance(&server.host_ip, server.port_num, &server.root_pass).await?;
            let row = sqlx::query(SHOW_SLAVE_STATUS_SQL)
                .fetch_optional(&mut conn)
                .await
                .map_err(|err| InstallError::protocol(addr, err))?;

            let running = row
                .map(|row| {
                    let io_running: String = row.try_get("Slave_IO_Running").unwrap_or_default();
                    let sql_running: String = row.try_get("Slave_SQL_Running").unwrap_or_default();
                    io_running == "Yes" && sql_running == "Yes"
                })
                .unwrap_or(false);

            if running {
                Ok(())
            } else {
                Err(InstallError::Validation(format!(
                    "replication threads are not running after {REPLICA_PROBE_ATTEMPTS} attempts. replica: {addr}"
                )))
            }
        })
        .await
    }

    async fn configure_group_replication(&self) -> Result<(), InstallError> {
        Err(InstallError::NotImplemented(
            "group replication has not been implemented".to_string(),
        ))
    }

    async fn connect_instance(&self, host: &str, port: u16, root_pass: &str) -> Result<MySqlConnection, InstallError> {
        MySqlConnectOptions::new()
            .host(host)
            .port(port)
            .username("root")
            .password(root_pass)
            .connect()
            .await
            .map_err(|err| InstallError::protocol(format!("{host}:{port}"), err))
    }

    /// Writes content to a local temp file and pushes it to the target host.
    async fn upload_content(
        &self,
        shell: &Arc<dyn RemoteShell>,
        content: &str,
        remote_path: &str,
    ) -> Result<(), InstallError> {
        let remote = |err| InstallError::remote(shell.host(), err);

        let mut file = tempfile::NamedTempFile::new().map_err(|err| {
            InstallError::Validation(format!("cannot create local temporary file: {err}"))
        })?;
        file.write_all(content.as_bytes())
            .map_err(|err| InstallError::Validation(format!("cannot write local temporary file: {err}")))?;
        file.flush()
            .map_err(|err| InstallError::Validation(format!("cannot flush local temporary file: {err}")))?;

        shell.copy_file_to_remote(file.path(), remote_path).await.map_err(remote)
    }
}

/// Replica wiring statement. Legacy `CHANGE MASTER TO` nouns paired with the
/// replica verbs, both valid on 8.0; auto position rides the GTID stream.
fn change_master_sql(source_host: &str, source_port: u16, user: &str, pass: &str) -> String {
    format!(
        "change master to master_host='{source_host}', master_port={source_port}, master_user='{user}', master_password='{pass}', master_auto_position=1"
    )
}
