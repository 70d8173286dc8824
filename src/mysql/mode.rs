use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Topology requested for the install operation. Wire value is the numeric
/// discriminant (1..4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Mode {
    #[strum(serialize = "standalone")]
    Standalone = 1,
    #[strum(serialize = "async-replication")]
    AsyncReplication = 2,
    #[strum(serialize = "semi-sync-replication")]
    SemiSyncReplication = 3,
    #[strum(serialize = "group-replication")]
    GroupReplication = 4,
}

impl Mode {
    /// True for the modes wired through `CHANGE MASTER TO` on the replicas.
    pub fn is_source_replica(&self) -> bool {
        matches!(self, Mode::AsyncReplication | Mode::SemiSyncReplication)
    }
}

impl TryFrom<u8> for Mode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Mode::Standalone),
            2 => Ok(Mode::AsyncReplication),
            3 => Ok(Mode::SemiSyncReplication),
            4 => Ok(Mode::GroupReplication),
            other => Err(format!("mode must be in 1..4, {other} is not valid")),
        }
    }
}

impl From<Mode> for u8 {
    fn from(mode: Mode) -> u8 {
        mode as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_wire_values() {
        assert_eq!(serde_json::from_str::<Mode>("1").unwrap(), Mode::Standalone);
        assert_eq!(serde_json::from_str::<Mode>("3").unwrap(), Mode::SemiSyncReplication);
        assert!(serde_json::from_str::<Mode>("5").is_err());
        assert_eq!(serde_json::to_string(&Mode::GroupReplication).unwrap(), "4");
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(Mode::AsyncReplication.to_string(), "async-replication");
        assert_eq!(Mode::GroupReplication.to_string(), "group-replication");
    }

    #[test]
    fn test_replication_modes() {
        assert!(Mode::AsyncReplication.is_source_replica());
        assert!(Mode::SemiSyncReplication.is_source_replica());
        assert!(!Mode::Standalone.is_source_replica());
        assert!(!Mode::GroupReplication.is_source_replica());
    }
}
