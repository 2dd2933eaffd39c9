/// SQLite-backed sink.
pub mod sqlite;

use crate::{
    net::{LogEntry, NetSnapshot, Participant, Session},
    op::{PersistOp, StoredOp},
    types::SessionId,
};

/// Persistence failure.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// SQLite error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Payload encode or decode error.
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    /// No stored session has this id.
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    /// Other failure.
    #[error("{0}")]
    Message(String),
}

/// Result alias for persistence calls.
pub type PersistResult<T> = Result<T, PersistError>;

/// Storage boundary for sessions, participants, and log entries.
///
/// Called from the blocking pool; implementations may block.
pub trait NetSink: Send {
    /// Upserts the session row.
    fn save_session(&mut self, session: &Session) -> PersistResult<()>;
    /// Upserts one participant row.
    fn save_participant(&mut self, session_id: SessionId, participant: &Participant) -> PersistResult<()>;
    /// Upserts one log entry row.
    fn save_log_entry(&mut self, session_id: SessionId, entry: &LogEntry) -> PersistResult<()>;
    /// Reads a whole session back.
    fn load_session(&mut self, id: SessionId) -> PersistResult<NetSnapshot>;

    /// Writes one queued op.
    fn apply(&mut self, stored: &StoredOp) -> PersistResult<()> {
        match &stored.op {
            PersistOp::SaveSession { session } => self.save_session(session),
            PersistOp::SaveParticipant {
                session_id,
                participant,
            } => self.save_participant(*session_id, participant),
            PersistOp::SaveLogEntry { session_id, entry } => self.save_log_entry(*session_id, entry),
        }
    }

    /// Makes prior writes durable.
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
}
