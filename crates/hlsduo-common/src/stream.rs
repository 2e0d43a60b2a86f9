//! Stream identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// One of the two fixed streaming pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Play,
    Push,
}

impl StreamName {
    /// Every pipeline, in teardown order.
    pub const ALL: [StreamName; 2] = [StreamName::Play, StreamName::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamName::Play => "play",
            StreamName::Push => "push",
        }
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "play" => Ok(StreamName::Play),
            "push" => Ok(StreamName::Push),
            other => Err(Error::UnknownStream(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_names() {
        assert_eq!("play".parse::<StreamName>().unwrap(), StreamName::Play);
        assert_eq!("push".parse::<StreamName>().unwrap(), StreamName::Push);
    }

    #[test]
    fn rejects_unknown_and_differently_cased_names() {
        for bad in ["", "PLAY", "Push", "record", "play "] {
            let err = bad.parse::<StreamName>().unwrap_err();
            assert!(matches!(err, Error::UnknownStream(ref s) if s == bad));
        }
    }

    #[test]
    fn display_matches_wire_form() {
        assert_eq!(StreamName::Play.to_string(), "play");
        assert_eq!(
            serde_json::to_string(&StreamName::Push).unwrap(),
            "\"push\""
        );
    }
}
