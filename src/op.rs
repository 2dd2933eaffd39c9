//! Persistence requests queued by the store, and their journal wrappers.

use serde::{Deserialize, Serialize};

use crate::{
    net::{LogEntry, Participant, Session},
    types::{OpSeq, SessionId},
};

/// Version number for serialized [`StoredOpEnvelope`] payloads.
pub const OP_FORMAT_VERSION: u16 = 1;

/// One entity write requested by a store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersistOp {
    /// Upsert the session row.
    SaveSession {
        /// Full session state after the mutation.
        session: Session,
    },
    /// Upsert one participant row.
    SaveParticipant {
        /// Owning session.
        session_id: SessionId,
        /// Full participant state after the mutation.
        participant: Participant,
    },
    /// Upsert one log entry row.
    SaveLogEntry {
        /// Owning session.
        session_id: SessionId,
        /// Full entry state after the mutation.
        entry: LogEntry,
    },
}

impl PersistOp {
    /// Short noun used in failure messages.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::SaveSession { .. } => "session",
            Self::SaveParticipant { .. } => "participant",
            Self::SaveLogEntry { .. } => "log entry",
        }
    }

    /// Session the write belongs to.
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::SaveSession { session } => session.id,
            Self::SaveParticipant { session_id, .. } | Self::SaveLogEntry { session_id, .. } => {
                *session_id
            }
        }
    }
}

/// Queued op plus sequence metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOp {
    /// Monotonic operation sequence.
    pub seq: OpSeq,
    /// Operation timestamp in milliseconds.
    pub ts_ms: u64,
    /// Operation body.
    pub op: PersistOp,
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOpEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped operation.
    pub stored: StoredOp,
}

impl StoredOpEnvelope {
    /// Constructs an envelope using [`OP_FORMAT_VERSION`].
    pub fn new(stored: StoredOp) -> Self {
        Self {
            format_version: OP_FORMAT_VERSION,
            stored,
        }
    }
}

/// A persistence write that did not land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistFailure {
    /// Sequence of the failed op, when the failure concerns a single op.
    pub seq: Option<OpSeq>,
    /// Operator-facing message, e.g. `Failed to save participant: ...`.
    pub message: String,
}

impl PersistFailure {
    /// Failure for one queued op.
    pub fn for_op(stored: &StoredOp, err: impl std::fmt::Display) -> Self {
        Self {
            seq: Some(stored.seq),
            message: format!("Failed to save {}: {err}", stored.op.subject()),
        }
    }

    /// Failure not tied to a single op.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            seq: None,
            message: message.into(),
        }
    }
}
