use serde::{Deserialize, Serialize};

use crate::config::Settings;

/// Monitoring-server enrolment parameters. `service_name` is derived at
/// enrolment time from the remote hostname and port, never taken from the
/// request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PmmClient {
    pub server_addr: String,
    pub service_name: String,
    pub client_version: String,
    pub replication_set_name: String,
}

impl PmmClient {
    pub fn with_defaults(mut self, settings: &Settings) -> PmmClient {
        if self.server_addr.trim().is_empty() {
            self.server_addr = settings.pmm.server.addr.clone();
        }
        if self.client_version.trim().is_empty() {
            self.client_version = settings.pmm.client.version.clone();
        }

        self
    }
}
