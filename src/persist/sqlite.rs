//! SQLite-backed sink: upserted entity tables plus an append-only op journal.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row, params, types::Type};
use uuid::Uuid;

use crate::{
    net::{LogEntry, NetSnapshot, Participant, Session},
    op::{PersistOp, StoredOp, StoredOpEnvelope},
    types::{OpSeq, SessionId, SessionStatus},
};

use super::{NetSink, PersistError, PersistResult};

const SESSION_COLUMNS: &str = "id, name, frequency, net_control_op, net_control_name, \
     started_at, opened_at, ended_at, status, last_acknowledged_entry_id";

/// SQLite implementation of [`crate::persist::NetSink`].
pub struct SqliteNetSink {
    conn: Connection,
}

impl SqliteNetSink {
    /// Opens or creates a SQLite-backed sink at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory SQLite sink.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// All stored sessions, newest first.
    pub fn list_sessions(&self) -> PersistResult<Vec<Session>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY started_at DESC"
        ))?;
        let rows = stmt.query_map([], session_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Journaled ops for `session_id` in write order.
    pub fn journal(&self, session_id: SessionId) -> PersistResult<Vec<StoredOp>> {
        let mut stmt = self
            .conn
            .prepare("SELECT seq, ts_ms, payload FROM ops WHERE session_id = ?1 ORDER BY id ASC")?;

        let rows = stmt.query_map(params![session_id.to_string()], |row| {
            let seq: i64 = row.get(0)?;
            let ts_ms: i64 = row.get(1)?;
            let payload: Vec<u8> = row.get(2)?;
            let mut op = decode_stored_op_payload(&payload).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(
                    payload.len(),
                    Type::Blob,
                    Box::new(std::io::Error::other(err)),
                )
            })?;
            op.seq = seq as OpSeq;
            op.ts_ms = ts_ms as u64;
            Ok(op)
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl NetSink for SqliteNetSink {
    fn save_session(&mut self, session: &Session) -> PersistResult<()> {
        upsert_session(&self.conn, session)
    }

    fn save_participant(&mut self, session_id: SessionId, participant: &Participant) -> PersistResult<()> {
        upsert_participant(&self.conn, session_id, participant)
    }

    fn save_log_entry(&mut self, session_id: SessionId, entry: &LogEntry) -> PersistResult<()> {
        upsert_log_entry(&self.conn, session_id, entry)
    }

    fn load_session(&mut self, id: SessionId) -> PersistResult<NetSnapshot> {
        let session = self
            .conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id.to_string()],
                session_from_row,
            )
            .optional()?
            .ok_or(PersistError::SessionNotFound(id))?;

        let mut stmt = self.conn.prepare(
            "SELECT id, callsign, tactical_call, name, location, check_in_time, check_in_number \
             FROM participants WHERE session_id = ?1 ORDER BY check_in_number ASC",
        )?;
        let participants = stmt
            .query_map(params![id.to_string()], |row| {
                Ok(Participant {
                    id: uuid_at(row, 0)?,
                    callsign: row.get(1)?,
                    tactical_call: row.get(2)?,
                    name: row.get(3)?,
                    location: row.get(4)?,
                    check_in_time: row.get(5)?,
                    check_in_number: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT id, entry_number, time, from_callsign, to_callsign, message \
             FROM log_entries WHERE session_id = ?1 ORDER BY entry_number ASC",
        )?;
        let log_entries = stmt
            .query_map(params![id.to_string()], |row| {
                Ok(LogEntry {
                    id: uuid_at(row, 0)?,
                    entry_number: row.get(1)?,
                    time: row.get(2)?,
                    from_callsign: row.get(3)?,
                    to_callsign: row.get(4)?,
                    message: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(NetSnapshot {
            session,
            participants,
            log_entries,
        })
    }

    /// Journals the op and upserts its entity in one transaction.
    fn apply(&mut self, stored: &StoredOp) -> PersistResult<()> {
        let tx = self.conn.transaction()?;
        let payload = serde_json::to_vec(&StoredOpEnvelope::new(stored.clone()))?;
        tx.execute(
            "INSERT INTO ops(seq, ts_ms, kind, session_id, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                stored.seq as i64,
                stored.ts_ms as i64,
                op_kind(&stored.op),
                stored.op.session_id().to_string(),
                payload,
            ],
        )?;
        match &stored.op {
            PersistOp::SaveSession { session } => upsert_session(&tx, session)?,
            PersistOp::SaveParticipant {
                session_id,
                participant,
            } => upsert_participant(&tx, *session_id, participant)?,
            PersistOp::SaveLogEntry { session_id, entry } => upsert_log_entry(&tx, *session_id, entry)?,
        }
        tx.commit()?;
        Ok(())
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }
}

fn upsert_session(conn: &Connection, s: &Session) -> PersistResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO sessions({SESSION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, frequency = excluded.frequency, \
             net_control_op = excluded.net_control_op, net_control_name = excluded.net_control_name, \
             started_at = excluded.started_at, opened_at = excluded.opened_at, \
             ended_at = excluded.ended_at, status = excluded.status, \
             last_acknowledged_entry_id = excluded.last_acknowledged_entry_id"
        ),
        params![
            s.id.to_string(),
            s.name,
            s.frequency,
            s.net_control_op,
            s.net_control_name,
            s.started_at,
            s.opened_at,
            s.ended_at,
            s.status.as_str(),
            s.last_acknowledged_entry_id.map(|id| id.to_string()),
        ],
    )?;
    Ok(())
}

fn upsert_participant(conn: &Connection, session_id: SessionId, p: &Participant) -> PersistResult<()> {
    conn.execute(
        "INSERT INTO participants(id, session_id, callsign, tactical_call, name, location, check_in_time, check_in_number) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
         ON CONFLICT(id) DO UPDATE SET callsign = excluded.callsign, tactical_call = excluded.tactical_call, \
         name = excluded.name, location = excluded.location",
        params![
            p.id.to_string(),
            session_id.to_string(),
            p.callsign,
            p.tactical_call,
            p.name,
            p.location,
            p.check_in_time,
            p.check_in_number,
        ],
    )?;
    Ok(())
}

fn upsert_log_entry(conn: &Connection, session_id: SessionId, e: &LogEntry) -> PersistResult<()> {
    conn.execute(
        "INSERT INTO log_entries(id, session_id, entry_number, time, from_callsign, to_callsign, message) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
         ON CONFLICT(id) DO UPDATE SET from_callsign = excluded.from_callsign, \
         to_callsign = excluded.to_callsign, message = excluded.message",
        params![
            e.id.to_string(),
            session_id.to_string(),
            e.entry_number,
            e.time,
            e.from_callsign,
            e.to_callsign,
            e.message,
        ],
    )?;
    Ok(())
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let status: String = row.get(8)?;
    let status = SessionStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            8,
            Type::Text,
            Box::new(std::io::Error::other(format!("unknown session status {status:?}"))),
        )
    })?;
    let last_ack: Option<String> = row.get(9)?;
    let last_acknowledged_entry_id = last_ack
        .map(|raw| Uuid::parse_str(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e))))
        .transpose()?;

    Ok(Session {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        frequency: row.get(2)?,
        net_control_op: row.get(3)?,
        net_control_name: row.get(4)?,
        started_at: row.get(5)?,
        opened_at: row.get(6)?,
        ended_at: row.get(7)?,
        status,
        last_acknowledged_entry_id,
    })
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn op_kind(op: &PersistOp) -> i64 {
    match op {
        PersistOp::SaveSession { .. } => 1,
        PersistOp::SaveParticipant { .. } => 2,
        PersistOp::SaveLogEntry { .. } => 3,
    }
}

fn decode_stored_op_payload(payload: &[u8]) -> Result<StoredOp, String> {
    let envelope = serde_json::from_slice::<StoredOpEnvelope>(payload)
        .map_err(|e| format!("op payload decode failed: {e}"))?;
    if envelope.format_version != crate::op::OP_FORMAT_VERSION {
        return Err(format!(
            "unsupported op format version: {}",
            envelope.format_version
        ));
    }
    Ok(envelope.stored)
}
