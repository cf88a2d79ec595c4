//! Synchronization modes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// Conflict and pruning policy of a sync pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Both drives originate changes; independent edits become conflict copies
    #[default]
    TwoWay,
    /// The primary drive is authoritative and the secondary mirrors it
    Echo,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::TwoWay => f.write_str("two_way"),
            SyncMode::Echo => f.write_str("echo"),
        }
    }
}

impl FromStr for SyncMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "two_way" | "twoway" => Ok(SyncMode::TwoWay),
            "echo" | "mirror" => Ok(SyncMode::Echo),
            other => Err(DomainError::ValidationFailed(format!(
                "unknown sync mode '{other}'; valid options: two_way, echo"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modes() {
        assert_eq!("two-way".parse::<SyncMode>(), Ok(SyncMode::TwoWay));
        assert_eq!("TWO_WAY".parse::<SyncMode>(), Ok(SyncMode::TwoWay));
        assert_eq!("mirror".parse::<SyncMode>(), Ok(SyncMode::Echo));
        assert!("both".parse::<SyncMode>().is_err());
    }

    #[test]
    fn test_display_matches_yaml_names() {
        assert_eq!(SyncMode::TwoWay.to_string(), "two_way");
        assert_eq!(serde_yaml::to_string(&SyncMode::Echo).unwrap().trim(), "echo");
    }
}
