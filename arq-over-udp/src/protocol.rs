//! ARQ variant selection.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// The closed set of reliability strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    StopAndWait,
    GoBackN,
    SelectiveRepeat,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [
        Protocol::StopAndWait,
        Protocol::GoBackN,
        Protocol::SelectiveRepeat,
    ];

    /// Short name used on the command line and in logs.
    pub fn short_name(self) -> &'static str {
        match self {
            Protocol::StopAndWait => "saw",
            Protocol::GoBackN => "gbn",
            Protocol::SelectiveRepeat => "sr",
        }
    }

    /// Whether the receiver keeps out-of-order segments.
    pub fn buffers_out_of_order(self) -> bool {
        matches!(self, Protocol::SelectiveRepeat)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::StopAndWait => "stop-and-wait",
            Protocol::GoBackN => "go-back-n",
            Protocol::SelectiveRepeat => "selective-repeat",
        };
        f.write_str(name)
    }
}

/// Unknown protocol name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown reliability protocol `{0}` (expected saw, gbn or sr)")]
pub struct ParseProtocolError(pub String);

impl FromStr for Protocol {
    type Err = ParseProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "saw" | "stop-and-wait" => Ok(Protocol::StopAndWait),
            "gbn" | "go-back-n" => Ok(Protocol::GoBackN),
            "sr" | "selective-repeat" => Ok(Protocol::SelectiveRepeat),
            _ => Err(ParseProtocolError(s.to_owned())),
        }
    }
}
