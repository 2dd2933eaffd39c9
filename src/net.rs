//! Session, participant, and log entry records plus their input payloads.

use serde::{Deserialize, Serialize};

use crate::types::{
    CheckInNumber, EntryNumber, LogEntryId, ParticipantId, SessionId, SessionStatus, Timestamp,
};

/// One net session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Stable session identifier.
    pub id: SessionId,
    /// Net name, e.g. "Sunday Net".
    pub name: String,
    /// Operating frequency as entered.
    pub frequency: String,
    /// Net-control station callsign.
    pub net_control_op: String,
    /// Net-control operator's name.
    pub net_control_name: String,
    /// Creation time.
    pub started_at: Timestamp,
    /// Time the session was opened for traffic.
    #[serde(default)]
    pub opened_at: Option<Timestamp>,
    /// Time the session was first closed.
    #[serde(default)]
    pub ended_at: Option<Timestamp>,
    /// Lifecycle stage.
    pub status: SessionStatus,
    /// Log entry up to which traffic has been reviewed.
    #[serde(default)]
    pub last_acknowledged_entry_id: Option<LogEntryId>,
}

/// A station checked into the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Stable participant identifier.
    pub id: ParticipantId,
    /// Canonical, uppercased callsign.
    pub callsign: String,
    /// Session-scoped display alias.
    #[serde(default)]
    pub tactical_call: Option<String>,
    /// Operator name.
    pub name: String,
    /// Operator location.
    pub location: String,
    /// Check-in time.
    pub check_in_time: Timestamp,
    /// 1-based check-in ordinal, never reused.
    pub check_in_number: CheckInNumber,
}

impl Participant {
    /// Tactical call, or `""` when none is set.
    pub fn tactical(&self) -> &str {
        self.tactical_call.as_deref().unwrap_or("")
    }
}

/// One line of the communications log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Stable entry identifier.
    pub id: LogEntryId,
    /// 1-based line number, never renumbered.
    pub entry_number: EntryNumber,
    /// Time the entry was logged.
    pub time: Timestamp,
    /// Sending station as free text.
    pub from_callsign: String,
    /// Receiving station as free text.
    pub to_callsign: String,
    /// Message body, possibly empty.
    pub message: String,
}

/// Consistent copy of one session's whole aggregate.
///
/// Produced for export and report rendering, and returned when a session is
/// read back from persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetSnapshot {
    /// Session header.
    pub session: Session,
    /// Participants in check-in order.
    pub participants: Vec<Participant>,
    /// Log entries in entry-number order.
    pub log_entries: Vec<LogEntry>,
}

/// Input for creating a session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionDraft {
    /// Net name.
    pub name: String,
    /// Operating frequency.
    pub frequency: String,
    /// Net-control callsign.
    pub net_control_op: String,
    /// Net-control operator name.
    pub net_control_name: String,
}

/// Input for checking a station in.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParticipantDraft {
    /// Station callsign; required.
    pub callsign: String,
    /// Optional tactical call.
    pub tactical_call: Option<String>,
    /// Operator name.
    pub name: String,
    /// Operator location.
    pub location: String,
}

impl ParticipantDraft {
    /// Draft with only a callsign set.
    pub fn call(callsign: impl Into<String>) -> Self {
        Self {
            callsign: callsign.into(),
            ..Self::default()
        }
    }
}

/// Replacement identity fields for an existing participant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParticipantUpdate {
    /// New callsign; required.
    pub callsign: String,
    /// New tactical call; blank clears it.
    pub tactical_call: Option<String>,
    /// New operator name.
    pub name: String,
    /// New operator location.
    pub location: String,
}

impl From<&Participant> for ParticipantUpdate {
    fn from(p: &Participant) -> Self {
        Self {
            callsign: p.callsign.clone(),
            tactical_call: p.tactical_call.clone(),
            name: p.name.clone(),
            location: p.location.clone(),
        }
    }
}

/// Input for appending a log entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogEntryDraft {
    /// Sending station; required.
    pub from_callsign: String,
    /// Receiving station; blank means net control.
    pub to_callsign: String,
    /// Message body.
    pub message: String,
}

impl LogEntryDraft {
    /// Convenience constructor.
    pub fn new(from: impl Into<String>, to: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            from_callsign: from.into(),
            to_callsign: to.into(),
            message: message.into(),
        }
    }
}

/// Trims and uppercases a callsign.
pub fn normalize_callsign(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Trims an optional field, mapping blank to `None`.
pub fn normalize_optional(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
