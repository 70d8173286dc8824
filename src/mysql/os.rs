use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use semver::Version;

use crate::cmd::ssh::RemoteShell;
use crate::errors::InstallError;
use crate::mysql::parameter::MySQLServer;
use crate::utilities::retry_with_fixed_delay;

const DATA_DIR_NAME: &str = "data";
const LOG_DIR_NAME: &str = "log";
const TMP_DIR_NAME: &str = "tmp";
const RUN_DIR_NAME: &str = "run";
const BINLOG_DIR_NAME: &str = "binlog";
const RELAYLOG_DIR_NAME: &str = "relaylog";

const MYSQL_USER: &str = "mysql";
const MYSQL_GROUP: &str = "mysql";

const REMOTE_TMP_DIR: &str = "/tmp";

const YUM_INSTALL_NCURSES_COMMAND: &str = "/usr/bin/yum install -y ncurses-c++-libs ncurses-libs";
const LIB_NCURSES_PATH: &str = "/usr/lib64/libncurses.so.5";
const LIB_TINFO_PATH: &str = "/usr/lib64/libtinfo.so.5";
const LN_LIB_NCURSES_COMMAND: &str = "/usr/bin/ln -s /usr/lib64/libncurses.so.6.2 /usr/lib64/libncurses.so.5";
const LN_LIB_TINFO_COMMAND: &str = "/usr/bin/ln -s /usr/lib64/libtinfo.so.6.2 /usr/lib64/libtinfo.so.5";
const CHECK_MYSQL_GROUP_COMMAND: &str = "/usr/bin/id -g mysql";
const CHECK_MYSQL_USER_COMMAND: &str = "/usr/bin/id -u mysql";
const CREATE_MYSQL_GROUP_COMMAND: &str = "/usr/sbin/groupadd -g 1001 mysql";
const CREATE_MYSQL_USER_COMMAND: &str = "/usr/sbin/useradd -u 1001 -g mysql mysql";

const BASH_PROFILE: &str = "/root/.bash_profile";

pub const PID_PROBE_ATTEMPTS: usize = 5;
pub const PID_PROBE_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    Aarch64,
}

impl Arch {
    pub fn parse(raw: &str) -> Result<Arch, InstallError> {
        match raw {
            "x86_64" => Ok(Arch::X86_64),
            "aarch64" => Ok(Arch::Aarch64),
            other => Err(InstallError::Validation(format!(
                "cpu arch must be one of [x86_64, aarch64], {other} is not valid"
            ))),
        }
    }

    pub fn min_mysql_version(&self) -> Version {
        match self {
            Arch::X86_64 => Version::new(8, 0, 26),
            Arch::Aarch64 => Version::new(8, 0, 32),
        }
    }

    fn package_name(&self, version: &Version) -> String {
        match self {
            Arch::X86_64 => format!("mysql-{version}-linux-glibc2.12-x86_64.tar.xz"),
            Arch::Aarch64 => format!("mysql-{version}-linux-glibc2.17-aarch64.tar.gz"),
        }
    }

    fn decompress_command(&self, archive: &str, dest: &str) -> String {
        match self {
            Arch::X86_64 => format!("tar xf {archive} -C {dest}"),
            Arch::Aarch64 => format!("tar zxf {archive} -C {dest}"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
        }
    }
}

/// Prepares one target host for a MySQL instance: packages, user/group,
/// directory skeleton, server binaries and PATH. Every step probes before it
/// acts, so running the whole sequence twice is harmless.
pub struct OsExecutor {
    shell: Arc<dyn RemoteShell>,
    mysql_version: Version,
    server: MySQLServer,
    package_dir: String,
    arch: Option<Arch>,
    os_version: Option<Version>,
}

impl OsExecutor {
    pub fn new(shell: Arc<dyn RemoteShell>, mysql_version: Version, server: MySQLServer, package_dir: String) -> OsExecutor {
        OsExecutor {
            shell,
            mysql_version,
            server,
            package_dir,
            arch: None,
            os_version: None,
        }
    }

    pub async fn init(&mut self) -> Result<(), InstallError> {
        self.init_executor().await?;
        self.precheck().await?;
        self.install_rpm().await?;
        self.init_user_and_group().await?;
        self.init_dir().await?;
        self.install_mysql_binary().await?;
        self.append_path().await?;

        Ok(())
    }

    /// Detects OS version and CPU architecture of the target host.
    pub async fn init_executor(&mut self) -> Result<(), InstallError> {
        let os_version = self.shell.os_version().await.map_err(|err| self.remote(err))?;
        let arch_raw = self.shell.arch().await.map_err(|err| self.remote(err))?;

        self.os_version = Some(os_version);
        self.arch = Some(Arch::parse(&arch_raw)?);

        Ok(())
    }

    pub async fn precheck(&self) -> Result<(), InstallError> {
        let arch = self.arch()?;

        // arch-specific minimum version
        let min_version = arch.min_mysql_version();
        if self.mysql_version < min_version {
            return Err(InstallError::Validation(format!(
                "the minimum mysql version on {} is {min_version}, {} is not valid",
                arch.as_str(),
                self.mysql_version
            )));
        }

        // no instance may already run on this port
        let pid_list = self.get_mysql_pid_list().await?;
        if !pid_list.is_empty() {
            return Err(InstallError::Validation(format!(
                "mysqld is already running on {}:{}, pid list: {pid_list:?}",
                self.shell.host(),
                self.server.port_num
            )));
        }

        // the installation package must be staged on the operator host
        let package_path = Path::new(&self.package_dir).join(arch.package_name(&self.mysql_version));
        if !package_path.exists() {
            return Err(InstallError::Validation(format!(
                "mysql installation package does not exist. installation package path: {}",
                package_path.display()
            )));
        }

        // data, binlog and relaylog directories must be absent or empty
        for dir in [
            format!("{}/{DATA_DIR_NAME}", self.server.data_dir_base),
            format!("{}/{BINLOG_DIR_NAME}", self.server.log_dir_base),
            format!("{}/{RELAYLOG_DIR_NAME}", self.server.log_dir_base),
        ] {
            let entries = self.shell.list_path(&dir).await.map_err(|err| self.remote(err))?;
            if !entries.is_empty() {
                return Err(InstallError::Validation(format!(
                    "directory exists and is not empty, installation aborted. directory: {dir}"
                )));
            }
        }

        Ok(())
    }

    pub async fn install_rpm(&self) -> Result<(), InstallError> {
        self.shell
            .exec_quiet(YUM_INSTALL_NCURSES_COMMAND)
            .await
            .map_err(|err| self.remote(err))?;

        // mysql client links against the .5 sonames which OS 9 dropped
        if self.os_version()? >= Version::new(9, 0, 0) {
            for (lib_path, ln_command) in [
                (LIB_NCURSES_PATH, LN_LIB_NCURSES_COMMAND),
                (LIB_TINFO_PATH, LN_LIB_TINFO_COMMAND),
            ] {
                let exists = self.shell.path_exists(lib_path).await.map_err(|err| self.remote(err))?;
                if !exists {
                    self.shell.exec_quiet(ln_command).await.map_err(|err| self.remote(err))?;
                }
            }
        }

        Ok(())
    }

    pub async fn init_user_and_group(&self) -> Result<(), InstallError> {
        if self.shell.exec(CHECK_MYSQL_GROUP_COMMAND).await.is_err() {
            self.shell
                .exec_quiet(CREATE_MYSQL_GROUP_COMMAND)
                .await
                .map_err(|err| self.remote(err))?;
        }
        if self.shell.exec(CHECK_MYSQL_USER_COMMAND).await.is_err() {
            self.shell
                .exec_quiet(CREATE_MYSQL_USER_COMMAND)
                .await
                .map_err(|err| self.remote(err))?;
        }

        Ok(())
    }

    pub async fn init_dir(&self) -> Result<(), InstallError> {
        let binary_dir_parent = Path::new(&self.server.binary_dir_base)
            .parent()
            .map(|parent| parent.display().to_string())
            .unwrap_or_else(|| self.server.binary_dir_base.clone());

        for dir in [
            binary_dir_parent,
            self.server.backup_dir.clone(),
            format!("{}/{DATA_DIR_NAME}", self.server.data_dir_base),
            format!("{}/{LOG_DIR_NAME}", self.server.data_dir_base),
            format!("{}/{TMP_DIR_NAME}", self.server.data_dir_base),
            format!("{}/{RUN_DIR_NAME}", self.server.data_dir_base),
            format!("{}/{BINLOG_DIR_NAME}", self.server.log_dir_base),
            format!("{}/{RELAYLOG_DIR_NAME}", self.server.log_dir_base),
        ] {
            self.shell.mkdir_all(&dir).await.map_err(|err| self.remote(err))?;
        }

        for dir in [&self.server.backup_dir, &self.server.data_dir_base, &self.server.log_dir_base] {
            self.shell
                .chown_recursive(dir, MYSQL_USER, MYSQL_GROUP)
                .await
                .map_err(|err| self.remote(err))?;
        }

        Ok(())
    }

    pub async fn install_mysql_binary(&self) -> Result<(), InstallError> {
        let installed = self
            .shell
            .path_exists(&self.server.binary_dir_base)
            .await
            .map_err(|err| self.remote(err))?;
        if installed {
            return Ok(());
        }

        let arch = self.arch()?;
        let package_name = arch.package_name(&self.mysql_version);
        let package_source = Path::new(&self.package_dir).join(&package_name);
        let package_dest = format!("{REMOTE_TMP_DIR}/{package_name}");

        self.shell
            .copy_file_to_remote(&package_source, &package_dest)
            .await
            .map_err(|err| self.remote(err))?;
        self.shell
            .exec_quiet(&arch.decompress_command(&package_dest, REMOTE_TMP_DIR))
            .await
            .map_err(|err| self.remote(err))?;

        let decompressed = package_name.trim_end_matches(".tar.xz").trim_end_matches(".tar.gz");
        self.shell
            .move_remote(&format!("{REMOTE_TMP_DIR}/{decompressed}"), &self.server.binary_dir_base)
            .await
            .map_err(|err| self.remote(err))?;

        Ok(())
    }

    /// Appends the server bin directory to root's PATH, once.
    pub async fn append_path(&self) -> Result<(), InstallError> {
        let bin_dir = format!("{}/bin", self.server.binary_dir_base);
        let command = format!(
            "/usr/bin/grep -q '{bin_dir}' {BASH_PROFILE} 2>/dev/null || echo 'export PATH=$PATH:{bin_dir}' >> {BASH_PROFILE}"
        );

        self.shell.exec_quiet(&command).await.map_err(|err| self.remote(err))
    }

    /// Numeric PIDs of mysqld processes matching this port and data dir.
    pub async fn get_mysql_pid_list(&self) -> Result<Vec<u32>, InstallError> {
        let command = format!(
            "ps -ef | grep mysqld | grep {} | grep {} | grep -v grep | awk '{{print $2}}'",
            self.server.port_num, self.server.data_dir_base
        );
        let output = self.shell.exec(&command).await.map_err(|err| self.remote(err))?;

        Ok(output.lines().filter_map(|line| line.trim().parse::<u32>().ok()).collect())
    }

    /// Polls until at least one mysqld PID shows up.
    pub async fn wait_for_mysql_running(&self) -> Result<(), InstallError> {
        retry_with_fixed_delay(PID_PROBE_ATTEMPTS, PID_PROBE_DELAY, || async move {
            match self.get_mysql_pid_list().await {
                Ok(pids) if !pids.is_empty() => Ok(()),
                Ok(_) => Err(InstallError::Validation(format!(
                    "mysqld is not running after {PID_PROBE_ATTEMPTS} attempts. host: {}, port: {}",
                    self.shell.host(),
                    self.server.port_num
                ))),
                Err(err) => Err(err),
            }
        })
        .await
    }

    /// Polls until no mysqld PID remains.
    pub async fn wait_for_mysql_stopped(&self) -> Result<(), InstallError> {
        retry_with_fixed_delay(PID_PROBE_ATTEMPTS, PID_PROBE_DELAY, || async move {
            match self.get_mysql_pid_list().await {
                Ok(pids) if pids.is_empty() => Ok(()),
                Ok(_) => Err(InstallError::Validation(format!(
                    "mysqld is still running after {PID_PROBE_ATTEMPTS} attempts. host: {}, port: {}",
                    self.shell.host(),
                    self.server.port_num
                ))),
                Err(err) => Err(err),
            }
        })
        .await
    }

    pub fn arch(&self) -> Result<Arch, InstallError> {
        self.arch
            .ok_or_else(|| InstallError::Validation("os executor is not initialised, arch is unknown".to_string()))
    }

    fn os_version(&self) -> Result<Version, InstallError> {
        self.os_version
            .clone()
            .ok_or_else(|| InstallError::Validation("os executor is not initialised, os version is unknown".to_string()))
    }

    fn remote(&self, err: crate::cmd::ssh::SshError) -> InstallError {
        InstallError::remote(self.shell.host(), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::ssh::test_support::FakeShell;
    use crate::config::Settings;

    fn test_server(port: u16) -> MySQLServer {
        MySQLServer {
            version: "8.0.32".to_string(),
            ..MySQLServer::default()
        }
        .with_defaults(&Settings::default())
        .with_host("192.168.137.21", port, true)
        .unwrap()
    }

    fn executor_with(shell: FakeShell, version: &str, package_dir: &str) -> (OsExecutor, Arc<FakeShell>) {
        let shell = Arc::new(shell);
        let executor = OsExecutor::new(
            shell.clone(),
            Version::parse(version).unwrap(),
            test_server(3306),
            package_dir.to_string(),
        );

        (executor, shell)
    }

    fn package_dir_with(name: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(name), b"not a real tarball").unwrap();
        dir
    }

    fn rocky9_shell() -> FakeShell {
        FakeShell::new("192.168.137.21")
            .with_output("/etc/redhat-release", "Rocky Linux release 9.2 (Blue Onyx)")
            .with_output("uname -m", "x86_64")
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let package_dir = package_dir_with("mysql-8.0.32-linux-glibc2.12-x86_64.tar.xz");

        // second run: everything already in place
        let shell = rocky9_shell()
            .with_output("id -g mysql", "1001")
            .with_output("id -u mysql", "1001")
            .with_output("test -e /usr/lib64/libncurses.so.5", "")
            .with_output("test -e /usr/lib64/libtinfo.so.5", "")
            .with_output("test -e /data/mysql/mysql8.0.32", "");

        let (mut executor, fake) = executor_with(shell, "8.0.32", package_dir.path().to_str().unwrap());
        executor.init().await.unwrap();

        assert_eq!(fake.executed_matching("groupadd"), 0);
        assert_eq!(fake.executed_matching("useradd"), 0);
        assert_eq!(fake.executed_matching("ln -s"), 0);
        assert_eq!(fake.executed_matching("tar "), 0);
        assert_eq!(fake.executed_matching("mv "), 0);
        // guarded steps still ran their probes
        assert!(fake.executed_matching("mkdir -p") > 0);
    }

    #[tokio::test]
    async fn test_init_creates_user_and_binary_when_absent() {
        let package_dir = package_dir_with("mysql-8.0.32-linux-glibc2.12-x86_64.tar.xz");

        let shell = rocky9_shell()
            .with_failure("id -g mysql")
            .with_failure("id -u mysql")
            .with_failure("test -e /usr/lib64/libncurses.so.5")
            .with_failure("test -e /usr/lib64/libtinfo.so.5")
            .with_failure("test -e /data/mysql/mysql8.0.32");

        let (mut executor, fake) = executor_with(shell, "8.0.32", package_dir.path().to_str().unwrap());
        executor.init().await.unwrap();

        assert_eq!(fake.executed_matching("groupadd -g 1001 mysql"), 1);
        assert_eq!(fake.executed_matching("useradd -u 1001 -g mysql mysql"), 1);
        assert_eq!(fake.executed_matching("ln -s"), 2);
        assert_eq!(fake.executed_matching("tar xf /tmp/mysql-8.0.32-linux-glibc2.12-x86_64.tar.xz -C /tmp"), 1);
        assert_eq!(
            fake.executed_matching("mv /tmp/mysql-8.0.32-linux-glibc2.12-x86_64 /data/mysql/mysql8.0.32"),
            1
        );
        let uploads = fake.uploads.lock().unwrap();
        assert!(uploads.contains_key("/tmp/mysql-8.0.32-linux-glibc2.12-x86_64.tar.xz"));
    }

    #[tokio::test]
    async fn test_precheck_rejects_version_below_arch_minimum() {
        let package_dir = package_dir_with("mysql-8.0.31-linux-glibc2.17-aarch64.tar.gz");

        let shell = FakeShell::new("192.168.137.21")
            .with_output("/etc/redhat-release", "AlmaLinux release 9.2 (Turquoise Kodkod)")
            .with_output("uname -m", "aarch64");
        let (mut executor, _fake) = executor_with(shell, "8.0.31", package_dir.path().to_str().unwrap());
        executor.init_executor().await.unwrap();

        let err = executor.precheck().await.unwrap_err();
        assert!(err.to_string().contains("the minimum mysql version on aarch64 is 8.0.32"));
    }

    #[tokio::test]
    async fn test_precheck_accepts_arch_minimum() {
        let package_dir = package_dir_with("mysql-8.0.32-linux-glibc2.17-aarch64.tar.gz");

        let shell = FakeShell::new("192.168.137.21")
            .with_output("/etc/redhat-release", "CentOS Linux release 8.5.2111 (Core)")
            .with_output("uname -m", "aarch64");
        let (mut executor, _fake) = executor_with(shell, "8.0.32", package_dir.path().to_str().unwrap());
        executor.init_executor().await.unwrap();

        executor.precheck().await.unwrap();
    }

    #[tokio::test]
    async fn test_precheck_x64_boundary() {
        let package_dir = package_dir_with("mysql-8.0.26-linux-glibc2.12-x86_64.tar.xz");

        let shell = rocky9_shell();
        let (mut executor, _fake) = executor_with(shell, "8.0.25", package_dir.path().to_str().unwrap());
        executor.init_executor().await.unwrap();
        assert!(executor.precheck().await.is_err());

        let shell = rocky9_shell();
        let (mut executor, _fake) = executor_with(shell, "8.0.26", package_dir.path().to_str().unwrap());
        executor.init_executor().await.unwrap();
        executor.precheck().await.unwrap();
    }

    #[tokio::test]
    async fn test_precheck_rejects_missing_package() {
        let package_dir = tempfile::tempdir().unwrap();

        let shell = rocky9_shell();
        let (mut executor, _fake) = executor_with(shell, "8.0.32", package_dir.path().to_str().unwrap());
        executor.init_executor().await.unwrap();

        let err = executor.precheck().await.unwrap_err();
        assert!(err.to_string().contains("installation package does not exist"));
    }

    #[tokio::test]
    async fn test_precheck_rejects_running_instance_and_dirty_dirs() {
        let package_dir = package_dir_with("mysql-8.0.32-linux-glibc2.12-x86_64.tar.xz");

        let shell = rocky9_shell().with_output("ps -ef", "4242");
        let (mut executor, _fake) = executor_with(shell, "8.0.32", package_dir.path().to_str().unwrap());
        executor.init_executor().await.unwrap();
        let err = executor.precheck().await.unwrap_err();
        assert!(err.to_string().contains("already running"));

        let shell = rocky9_shell().with_output("ls -A /data/mysql/data/mysql3306/data", "ibdata1");
        let (mut executor, _fake) = executor_with(shell, "8.0.32", package_dir.path().to_str().unwrap());
        executor.init_executor().await.unwrap();
        let err = executor.precheck().await.unwrap_err();
        assert!(err.to_string().contains("is not empty"));
    }

    #[tokio::test]
    async fn test_get_mysql_pid_list_parses_pids() {
        let shell = rocky9_shell().with_output("ps -ef", "101\n102\n");
        let (executor, _fake) = executor_with(shell, "8.0.32", "/nonexistent");

        assert_eq!(executor.get_mysql_pid_list().await.unwrap(), vec![101, 102]);
    }

    #[test]
    fn test_arch_parse() {
        assert_eq!(Arch::parse("x86_64").unwrap(), Arch::X86_64);
        assert_eq!(Arch::parse("aarch64").unwrap(), Arch::Aarch64);
        assert!(Arch::parse("riscv64").is_err());
    }

    #[test]
    fn test_package_names() {
        let version = Version::parse("8.0.32").unwrap();
        assert_eq!(
            Arch::X86_64.package_name(&version),
            "mysql-8.0.32-linux-glibc2.12-x86_64.tar.xz"
        );
        assert_eq!(
            Arch::Aarch64.package_name(&version),
            "mysql-8.0.32-linux-glibc2.17-aarch64.tar.gz"
        );
    }
}
