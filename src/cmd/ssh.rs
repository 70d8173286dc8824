use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::ChannelMsg;
use russh_keys::key::PublicKey;
use semver::Version;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::utilities::parse_lenient_version;

const DEFAULT_SSH_PORT: u16 = 22;

const GET_OS_VERSION_COMMAND: &str = "/usr/bin/cat /etc/redhat-release";
const GET_ARCH_COMMAND: &str = "/usr/bin/uname -m";
const GET_HOSTNAME_COMMAND: &str = "/usr/bin/hostname -s";

const CENTOS: &str = "CentOS Linux";
const ALMA_LINUX: &str = "AlmaLinux";
const ROCKY_LINUX: &str = "Rocky Linux";

#[derive(Error, Debug)]
pub enum SshError {
    #[error("cannot connect to {addr}: {message}")]
    Connect { addr: String, message: String },

    #[error("authentication failed for {user}@{host}")]
    Auth { user: String, host: String },

    #[error("channel error on {host}: {message}")]
    Channel { host: String, message: String },

    #[error("command terminated with exit status {exit_status} on {host}: {command}\n{output}")]
    Command {
        host: String,
        command: String,
        exit_status: u32,
        output: String,
    },

    #[error("file transfer to {host} failed: {message}")]
    Transfer { host: String, message: String },

    #[error("unexpected output from {host}: {message}")]
    Parse { host: String, message: String },
}

/// Remote shell surface the executors are written against. Only `exec` and
/// the file transfer are transport-specific; everything else is a shell
/// one-liner with a default implementation, which keeps test doubles small.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    fn host(&self) -> &str;

    /// Runs a command, returning trimmed stdout. Non-zero exit status is an
    /// `SshError::Command` carrying the combined output.
    async fn exec(&self, command: &str) -> Result<String, SshError>;

    async fn copy_file_to_remote(&self, local: &Path, remote: &str) -> Result<(), SshError>;

    async fn exec_quiet(&self, command: &str) -> Result<(), SshError> {
        self.exec(command).await.map(|_| ())
    }

    async fn path_exists(&self, path: &str) -> Result<bool, SshError> {
        match self.exec(&format!("/usr/bin/test -e {path}")).await {
            Ok(_) => Ok(true),
            Err(SshError::Command { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Lists entries of a directory; a missing path lists as empty.
    async fn list_path(&self, path: &str) -> Result<Vec<String>, SshError> {
        match self.exec(&format!("/usr/bin/ls -A {path} 2>/dev/null")).await {
            Ok(output) => Ok(output.lines().map(|line| line.to_string()).collect()),
            Err(SshError::Command { .. }) => Ok(vec![]),
            Err(err) => Err(err),
        }
    }

    async fn mkdir_all(&self, path: &str) -> Result<(), SshError> {
        self.exec_quiet(&format!("/usr/bin/mkdir -p {path}")).await
    }

    async fn chown_recursive(&self, path: &str, user: &str, group: &str) -> Result<(), SshError> {
        self.exec_quiet(&format!("/usr/bin/chown -R {user}:{group} {path}")).await
    }

    async fn cat(&self, path: &str) -> Result<String, SshError> {
        self.exec(&format!("/usr/bin/cat {path}")).await
    }

    async fn copy_remote(&self, source: &str, dest: &str) -> Result<(), SshError> {
        self.exec_quiet(&format!("/usr/bin/cp -p {source} {dest}")).await
    }

    async fn move_remote(&self, source: &str, dest: &str) -> Result<(), SshError> {
        self.exec_quiet(&format!("/usr/bin/mv {source} {dest}")).await
    }

    /// Parses `/etc/redhat-release`; only RHEL-family hosts are supported.
    async fn os_version(&self) -> Result<Version, SshError> {
        let output = self.exec(GET_OS_VERSION_COMMAND).await?;
        let tokens: Vec<&str> = output.split_whitespace().collect();

        let version_str = if output.contains(CENTOS) || output.contains(ROCKY_LINUX) {
            tokens.get(3)
        } else if output.contains(ALMA_LINUX) {
            tokens.get(2)
        } else {
            None
        };

        version_str
            .and_then(|raw| parse_lenient_version(raw))
            .ok_or_else(|| SshError::Parse {
                host: self.host().to_string(),
                message: format!("os version must be one of [CentOS, AlmaLinux, Rocky], {output} is not valid"),
            })
    }

    async fn arch(&self) -> Result<String, SshError> {
        let output = self.exec(GET_ARCH_COMMAND).await?;
        if output.is_empty() {
            return Err(SshError::Parse {
                host: self.host().to_string(),
                message: "get arch returned no output".to_string(),
            });
        }

        Ok(output)
    }

    async fn hostname(&self) -> Result<String, SshError> {
        let output = self.exec(GET_HOSTNAME_COMMAND).await?;
        if output.is_empty() {
            return Err(SshError::Parse {
                host: self.host().to_string(),
                message: "get hostname returned no output".to_string(),
            });
        }

        Ok(output)
    }
}

struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        // target hosts are provisioned by the operator, not enrolled in a
        // known-hosts store
        Ok(true)
    }
}

/// One pooled SSH session per target host; each command runs on its own
/// channel, file transfers go through the sftp subsystem.
pub struct SshConn {
    host: String,
    session: Handle<ClientHandler>,
}

impl SshConn {
    pub async fn connect(host: &str, user: &str, pass: &str) -> Result<SshConn, SshError> {
        let addr = format!("{host}:{DEFAULT_SSH_PORT}");
        let config = Arc::new(client::Config::default());

        let mut session = client::connect(config, (host, DEFAULT_SSH_PORT), ClientHandler)
            .await
            .map_err(|err| SshError::Connect {
                addr: addr.clone(),
                message: err.to_string(),
            })?;

        let authenticated = session
            .authenticate_password(user, pass)
            .await
            .map_err(|err| SshError::Connect {
                addr: addr.clone(),
                message: err.to_string(),
            })?;
        if !authenticated {
            return Err(SshError::Auth {
                user: user.to_string(),
                host: host.to_string(),
            });
        }

        Ok(SshConn {
            host: host.to_string(),
            session,
        })
    }

    fn channel_error(&self, err: impl ToString) -> SshError {
        SshError::Channel {
            host: self.host.clone(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl RemoteShell for SshConn {
    fn host(&self) -> &str {
        &self.host
    }

    async fn exec(&self, command: &str) -> Result<String, SshError> {
        debug!("remote command on {}: {}", self.host, command);

        let mut channel = self
            .session
            .channel_open_session()
            .await
            .map_err(|err| self.channel_error(err))?;
        channel
            .exec(true, command)
            .await
            .map_err(|err| self.channel_error(err))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => stderr.extend_from_slice(&data),
                Some(ChannelMsg::ExitStatus { exit_status: status }) => exit_status = Some(status),
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            }
        }
        let _ = channel.close().await;

        let stdout = String::from_utf8_lossy(&stdout).trim().to_string();
        match exit_status {
            Some(0) | None => Ok(stdout),
            Some(status) => {
                let mut output = stdout;
                let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
                if !stderr.is_empty() {
                    if !output.is_empty() {
                        output.push('\n');
                    }
                    output.push_str(&stderr);
                }

                Err(SshError::Command {
                    host: self.host.clone(),
                    command: command.to_string(),
                    exit_status: status,
                    output,
                })
            }
        }
    }

    async fn copy_file_to_remote(&self, local: &Path, remote: &str) -> Result<(), SshError> {
        let transfer_error = |message: String| SshError::Transfer {
            host: self.host.clone(),
            message,
        };

        let data = tokio::fs::read(local)
            .await
            .map_err(|err| transfer_error(format!("cannot read {}: {err}", local.display())))?;

        let channel = self
            .session
            .channel_open_session()
            .await
            .map_err(|err| self.channel_error(err))?;
        channel
            .request_subsystem(false, "sftp")
            .await
            .map_err(|err| transfer_error(format!("cannot request sftp subsystem: {err}")))?;

        let sftp = russh_sftp::client::SftpSession::new(channel.into_stream())
            .await
            .map_err(|err| transfer_error(format!("cannot initialize sftp session: {err}")))?;

        let mut file = sftp
            .create(remote)
            .await
            .map_err(|err| transfer_error(format!("cannot create {remote}: {err}")))?;
        file.write_all(&data)
            .await
            .map_err(|err| transfer_error(format!("cannot write {remote}: {err}")))?;
        file.shutdown()
            .await
            .map_err(|err| transfer_error(format!("cannot flush {remote}: {err}")))?;

        sftp.close().await.ok();

        Ok(())
    }
}
