//! Generation set status and its wire normalization.
//!
//! The backend reports statuses in whatever case it pleases (`"completed"`,
//! `"COMPLETED"`, `"Completed"`). Everything is folded into
//! [`GenerationStatus`] on ingest and serialized back out as uppercase.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

/// Lifecycle state of a generation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerationStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl GenerationStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [GenerationStatus; 5] = [
        Self::Pending,
        Self::Queued,
        Self::Processing,
        Self::Completed,
        Self::Failed,
    ];

    /// Uppercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Queued => "QUEUED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// `Completed` and `Failed` admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Lenient ingest used at the wire boundary.
    ///
    /// Unknown strings map to `Processing` so that an unexpected value
    /// keeps the set under observation instead of halting it.
    pub fn normalize(raw: &str) -> Self {
        raw.parse().unwrap_or(Self::Processing)
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| CoreError::UnknownStatus(trimmed.to_string()))
    }
}

impl Serialize for GenerationStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for GenerationStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("completed".parse::<GenerationStatus>().unwrap(), GenerationStatus::Completed);
        assert_eq!("Queued".parse::<GenerationStatus>().unwrap(), GenerationStatus::Queued);
        assert_eq!(" FAILED ".parse::<GenerationStatus>().unwrap(), GenerationStatus::Failed);
    }

    #[test]
    fn unknown_status_is_an_error() {
        let err = "exploded".parse::<GenerationStatus>().unwrap_err();
        assert!(matches!(err, CoreError::UnknownStatus(ref s) if s == "exploded"));
    }

    #[test]
    fn normalize_falls_back_to_processing() {
        assert_eq!(GenerationStatus::normalize("active"), GenerationStatus::Processing);
        assert_eq!(GenerationStatus::normalize("pending"), GenerationStatus::Pending);
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        let terminal: Vec<_> = GenerationStatus::ALL
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(terminal, vec![GenerationStatus::Completed, GenerationStatus::Failed]);
    }

    #[test]
    fn serde_uses_uppercase_on_output() {
        let json = serde_json::to_string(&GenerationStatus::Processing).unwrap();
        assert_eq!(json, r#""PROCESSING""#);

        let parsed: GenerationStatus = serde_json::from_str(r#""processing""#).unwrap();
        assert_eq!(parsed, GenerationStatus::Processing);
    }
}
