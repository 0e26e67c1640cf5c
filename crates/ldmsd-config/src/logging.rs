use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Output encodings for daemon log records.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One flattened JSON object per event, for log shippers.
    #[default]
    Json,
    /// Single-line text for operators watching a terminal.
    Compact,
}

/// Error returned when a log format label is not recognised.
pub type LogFormatParseError = strum::ParseError;
