use std::sync::Arc;

use semver::Version;

use crate::config::Settings;
use crate::errors::InstallError;
use crate::mysql::engine::{Engine, ShellProvider};
use crate::mysql::mode::Mode;
use crate::mysql::parameter::{MySQLServer, PmmClient};
use crate::mysql::repository::{OperationStore, OperationType, Status};
use crate::utilities::{join_addrs, sort_addrs};

const MIN_MYSQL_VERSION: Version = Version::new(5, 7, 35);

const OPERATION_SUCCESS_MESSAGE: &str = "install mysql server completed";

/// What a finished install reports back to the HTTP layer.
#[derive(Debug, Clone)]
pub struct InstallReport {
    pub operation_id: u64,
    pub version: String,
    pub mode: Mode,
    pub addrs: Vec<String>,
}

/// Single entry point for install operations: opens the audit row, takes the
/// host lock, runs the engine, and always releases the lock before the
/// operation row is finished.
pub struct InstallService<'a> {
    repository: &'a dyn OperationStore,
    shells: Arc<dyn ShellProvider>,
    settings: &'a Settings,
}

impl<'a> InstallService<'a> {
    pub fn new(repository: &'a dyn OperationStore, shells: Arc<dyn ShellProvider>, settings: &'a Settings) -> InstallService<'a> {
        InstallService {
            repository,
            shells,
            settings,
        }
    }

    pub async fn install(
        &self,
        mode: Mode,
        addrs: &[String],
        mysql_server: MySQLServer,
        pmm_client: PmmClient,
    ) -> Result<InstallReport, InstallError> {
        let mysql_server = mysql_server.with_defaults(self.settings);
        let pmm_client = pmm_client.with_defaults(self.settings);

        let mysql_version = Version::parse(&mysql_server.version)
            .map_err(|_| InstallError::Validation(format!("mysql version must be formatted as X.Y.Z, {} is not valid", mysql_server.version)))?;
        if mysql_version < MIN_MYSQL_VERSION {
            return Err(InstallError::Validation(format!(
                "mysql version must be at least {MIN_MYSQL_VERSION}, {mysql_version} is not valid"
            )));
        }

        let addrs = sort_addrs(addrs)?;
        let joined_addrs = join_addrs(&addrs);

        let operation_id = self
            .repository
            .begin_operation(OperationType::Install, &joined_addrs)
            .await
            .map_err(|err| InstallError::repository(err, &joined_addrs))?;

        if let Err(err) = self.repository.acquire_lock(operation_id, &addrs).await {
            let err = InstallError::repository(err, &joined_addrs);
            self.finish_operation(operation_id, Status::Failed, &err.to_string()).await;
            return Err(err);
        }

        // from here on the lock is held: run the engine, then release on
        // every path before the operation row is finished
        let engine = Engine::new(
            self.repository,
            self.shells.clone(),
            self.settings,
            mysql_version,
            mode,
            addrs.clone(),
            mysql_server.clone(),
            pmm_client,
        );
        let result = engine.install(operation_id).await;

        if let Err(err) = self.repository.release_lock(operation_id).await {
            error!("release lock failed. operation_id: {operation_id}, error: {err}");
        }

        match result {
            Ok(()) => {
                self.finish_operation(operation_id, Status::Success, OPERATION_SUCCESS_MESSAGE).await;
                Ok(InstallReport {
                    operation_id,
                    version: mysql_server.version,
                    mode,
                    addrs,
                })
            }
            Err(err) => {
                self.finish_operation(operation_id, Status::Failed, &err.to_string()).await;
                Err(err)
            }
        }
    }

    async fn finish_operation(&self, operation_id: u64, status: Status, message: &str) {
        if let Err(err) = self.repository.finish_operation(operation_id, status, message).await {
            error!("update operation history failed. operation_id: {operation_id}, status: {status:?}, error: {err}");
        }
    }
}
