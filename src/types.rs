//! Shared primitive IDs, session status, and timestamp formatting.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque session identifier.
pub type SessionId = Uuid;
/// Opaque participant identifier.
pub type ParticipantId = Uuid;
/// Opaque log entry identifier.
pub type LogEntryId = Uuid;
/// 1-based check-in ordinal.
pub type CheckInNumber = u32;
/// 1-based communications-log line number.
pub type EntryNumber = u32;
/// Monotonic persistence op sequence number.
pub type OpSeq = u64;
/// Wall-clock timestamp used throughout the log.
pub type Timestamp = DateTime<Utc>;

/// Destination used when a log entry names no recipient.
pub const NET_CONTROL_ALIAS: &str = "NC";
/// Tactical call given to the synthetic net-control participant.
pub const NET_CONTROL_TACTICAL: &str = "NET";

/// Session lifecycle stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created but not yet opened for traffic.
    Pending,
    /// Accepting check-ins and log entries.
    Active,
    /// Terminal, read-only.
    Closed,
}

impl SessionStatus {
    /// Stable lowercase name, also used as the stored column value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    /// Parses a stored column value.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Formats `ts` as UTC ISO-8601 with millisecond precision, e.g.
/// `2024-05-05T18:00:00.000Z`.
pub fn iso8601(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
