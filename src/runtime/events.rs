//! Runtime event stream payloads.

use crate::{
    op::PersistFailure,
    types::{LogEntryId, OpSeq, ParticipantId, SessionId},
};

/// Events emitted from the single-writer runtime loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetEvent {
    /// A new session was created in the pending state.
    SessionCreated {
        /// New session id.
        id: SessionId,
    },
    /// The session opened for traffic.
    SessionOpened,
    /// The session was closed (or re-closed).
    SessionClosed,
    /// A station checked in.
    ParticipantAdded {
        /// New participant id.
        id: ParticipantId,
    },
    /// A station was dropped from the in-memory list.
    ParticipantRemoved {
        /// Removed participant id.
        id: ParticipantId,
    },
    /// A station's identity changed.
    ParticipantUpdated {
        /// Updated participant id.
        id: ParticipantId,
        /// Log entries rewritten by the rename.
        rewritten: usize,
    },
    /// A communications-log line was appended.
    LogEntryAdded {
        /// New entry id.
        id: LogEntryId,
    },
    /// The review marker moved.
    Acknowledged {
        /// Entry now marked as reviewed.
        entry_id: LogEntryId,
    },
    /// A stored session replaced the in-memory state.
    SessionLoaded {
        /// Loaded session id.
        id: SessionId,
    },
    /// All in-memory state was cleared.
    Reset,
    /// Persistence has reached at least this op sequence.
    DurableUpTo {
        /// Highest sequence known durable.
        op_seq: OpSeq,
    },
    /// A persistence write or read failed; in-memory state was kept.
    PersistFailed {
        /// What failed.
        failure: PersistFailure,
    },
}
