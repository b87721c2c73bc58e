// Stream Mode Module
// The fault scenario selector shared by the dispatcher and the consumer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fault-injection scenario for a single stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Every fragment once, in order
    #[default]
    Normal,
    /// Same frames as normal; the consumer displays them on a slower cadence
    Delay,
    /// Fragments 2 and 4 are never sent
    Missing,
    /// Fragment 1 is sent twice, the second copy flagged as a duplicate
    Duplicate,
    /// Half the fragments, then an error frame
    Error,
}

impl StreamMode {
    pub const ALL: [StreamMode; 5] = [
        StreamMode::Normal,
        StreamMode::Delay,
        StreamMode::Missing,
        StreamMode::Duplicate,
        StreamMode::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamMode::Normal => "normal",
            StreamMode::Delay => "delay",
            StreamMode::Missing => "missing",
            StreamMode::Duplicate => "duplicate",
            StreamMode::Error => "error",
        }
    }
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a mode string is not one of the five known scenarios
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported stream mode: {0}")]
pub struct UnknownMode(pub String);

impl FromStr for StreamMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(StreamMode::Normal),
            "delay" => Ok(StreamMode::Delay),
            "missing" => Ok(StreamMode::Missing),
            "duplicate" => Ok(StreamMode::Duplicate),
            "error" => Ok(StreamMode::Error),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

/// Resolve an optional mode parameter; absent or empty means `normal`
pub fn parse_mode(raw: Option<&str>) -> Result<StreamMode, UnknownMode> {
    match raw {
        None | Some("") => Ok(StreamMode::Normal),
        Some(value) => value.parse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_modes() {
        for mode in StreamMode::ALL {
            assert_eq!(mode.as_str().parse::<StreamMode>(), Ok(mode));
        }
    }

    #[test]
    fn test_unknown_mode() {
        let err = "chaos".parse::<StreamMode>().unwrap_err();
        assert_eq!(err, UnknownMode("chaos".to_string()));
        assert!(err.to_string().contains("chaos"));
    }

    #[test]
    fn test_mode_is_case_sensitive() {
        assert!("Normal".parse::<StreamMode>().is_err());
    }

    #[test]
    fn test_parse_mode_defaults() {
        assert_eq!(parse_mode(None), Ok(StreamMode::Normal));
        assert_eq!(parse_mode(Some("")), Ok(StreamMode::Normal));
        assert_eq!(parse_mode(Some("delay")), Ok(StreamMode::Delay));
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&StreamMode::Duplicate).unwrap();
        assert_eq!(json, "\"duplicate\"");
        let mode: StreamMode = serde_json::from_str("\"missing\"").unwrap();
        assert_eq!(mode, StreamMode::Missing);
    }
}
