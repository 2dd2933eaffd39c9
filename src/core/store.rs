use std::{collections::VecDeque, sync::Arc, time::Duration};

use hashbrown::HashMap;
use uuid::Uuid;

use crate::{
    export,
    net::{
        LogEntry, LogEntryDraft, NetSnapshot, Participant, ParticipantDraft, ParticipantUpdate,
        Session, SessionDraft, normalize_callsign, normalize_optional,
    },
    op::{PersistFailure, PersistOp, StoredOp},
    types::{
        CheckInNumber, EntryNumber, LogEntryId, NET_CONTROL_ALIAS, NET_CONTROL_TACTICAL, OpSeq,
        ParticipantId, SessionId, SessionStatus, Timestamp,
    },
};

use super::{
    clock::{Clock, SystemClock},
    rename::{self, IdentityChange},
};

/// Most failures kept before the oldest are dropped.
pub const DEFAULT_FAILURE_CAPACITY: usize = 256;

const CHECK_IN_MESSAGE: &str = "check in";

/// Rejected store operation; state is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A required field was blank.
    #[error("{0} must not be blank")]
    Blank(&'static str),
    /// No session exists.
    #[error("no session")]
    NoSession,
    /// The session is closed to changes.
    #[error("session is closed")]
    SessionClosed,
    /// Only a pending session can be opened.
    #[error("session is {} rather than pending", .0.as_str())]
    NotPending(SessionStatus),
    /// No participant has this id.
    #[error("unknown participant {0}")]
    MissingParticipant(ParticipantId),
}

/// Authoritative in-memory state for one net.
pub struct NetLogStore {
    session: Option<Session>,
    participants: Vec<Participant>,
    entries: Vec<LogEntry>,
    by_call: HashMap<String, Vec<ParticipantId>>,
    anchor: Option<Timestamp>,
    frozen_elapsed: Option<Duration>,
    next_check_in: CheckInNumber,
    next_entry: EntryNumber,
    pending_ops: Vec<StoredOp>,
    next_op_seq: OpSeq,
    failures: VecDeque<PersistFailure>,
    failure_capacity: usize,
    clock: Arc<dyn Clock>,
}

impl Default for NetLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NetLogStore {
    /// Empty store on the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Empty store reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            session: None,
            participants: Vec::new(),
            entries: Vec::new(),
            by_call: HashMap::new(),
            anchor: None,
            frozen_elapsed: None,
            next_check_in: 1,
            next_entry: 1,
            pending_ops: Vec::new(),
            next_op_seq: 1,
            failures: VecDeque::new(),
            failure_capacity: DEFAULT_FAILURE_CAPACITY,
            clock,
        }
    }

    /// Caps the failure queue, dropping the oldest overflow.
    pub fn set_failure_capacity(&mut self, capacity: usize) {
        self.failure_capacity = capacity.max(1);
        while self.failures.len() > self.failure_capacity {
            self.failures.pop_front();
        }
    }

    /// Starts a pending session with net control checked in as #1,
    /// replacing any current one.
    pub fn create_session(&mut self, draft: SessionDraft) -> Result<SessionId, StoreError> {
        let name = required("name", &draft.name)?;
        let frequency = required("frequency", &draft.frequency)?;
        let net_control_op = normalize_callsign(&draft.net_control_op);
        if net_control_op.is_empty() {
            return Err(StoreError::Blank("net control callsign"));
        }
        let net_control_name = required("net control name", &draft.net_control_name)?;

        self.clear_state();
        let now = self.clock.now();
        let session = Session {
            id: Uuid::new_v4(),
            name,
            frequency,
            net_control_op: net_control_op.clone(),
            net_control_name: net_control_name.clone(),
            started_at: now,
            opened_at: None,
            ended_at: None,
            status: SessionStatus::Pending,
            last_acknowledged_entry_id: None,
        };
        let id = session.id;
        self.session = Some(session.clone());
        self.queue(PersistOp::SaveSession { session });

        let net_control = Participant {
            id: Uuid::new_v4(),
            callsign: net_control_op,
            tactical_call: Some(NET_CONTROL_TACTICAL.to_string()),
            name: net_control_name,
            location: String::new(),
            check_in_time: now,
            check_in_number: self.take_check_in_number(),
        };
        self.push_participant(net_control.clone());
        self.queue(PersistOp::SaveParticipant {
            session_id: id,
            participant: net_control,
        });

        Ok(id)
    }

    /// Moves a pending session to active and starts the clock.
    pub fn open_session(&mut self) -> Result<(), StoreError> {
        let now = self.clock.now();
        let session = self.session.as_mut().ok_or(StoreError::NoSession)?;
        if session.status != SessionStatus::Pending {
            return Err(StoreError::NotPending(session.status));
        }
        session.status = SessionStatus::Active;
        session.opened_at = Some(now);
        let saved = session.clone();
        self.anchor = Some(now);
        self.frozen_elapsed = None;
        self.queue(PersistOp::SaveSession { session: saved });
        Ok(())
    }

    /// Closes the session. `ended_at` keeps the first close time; closing again
    /// only re-persists.
    pub fn close_session(&mut self) -> Result<(), StoreError> {
        let now = self.clock.now();
        let session = self.session.as_mut().ok_or(StoreError::NoSession)?;
        session.status = SessionStatus::Closed;
        session.ended_at.get_or_insert(now);
        let saved = session.clone();
        if let Some(anchor) = self.anchor.take() {
            self.frozen_elapsed = Some(span(anchor, now));
        }
        self.queue(PersistOp::SaveSession { session: saved });
        Ok(())
    }

    /// Checks a station in. On an active net this also logs a
    /// `check in` entry addressed to net control.
    pub fn add_participant(&mut self, draft: ParticipantDraft) -> Result<ParticipantId, StoreError> {
        let session_id = self.writable_session()?;
        let callsign = normalize_callsign(&draft.callsign);
        if callsign.is_empty() {
            return Err(StoreError::Blank("callsign"));
        }

        let participant = Participant {
            id: Uuid::new_v4(),
            callsign: callsign.clone(),
            tactical_call: normalize_optional(draft.tactical_call.as_deref()),
            name: draft.name.trim().to_string(),
            location: draft.location.trim().to_string(),
            check_in_time: self.clock.now(),
            check_in_number: self.take_check_in_number(),
        };
        let id = participant.id;
        self.push_participant(participant.clone());
        self.queue(PersistOp::SaveParticipant {
            session_id,
            participant,
        });

        if self.status() == Some(SessionStatus::Active) {
            self.append_entry(session_id, callsign, NET_CONTROL_ALIAS.to_string(), CHECK_IN_MESSAGE.to_string());
        }

        Ok(id)
    }

    /// Drops a participant from memory only. Numbering, log history, and
    /// persisted rows are left as they are.
    pub fn remove_participant(&mut self, id: ParticipantId) -> Result<Participant, StoreError> {
        self.writable_session()?;
        let idx = self.participant_index(id)?;
        let removed = self.participants.remove(idx);
        self.unindex_call(&removed.callsign, id);
        Ok(removed)
    }

    /// Replaces a participant's identity fields and rewrites log entries that
    /// still name the old identity. Returns how many entries were rewritten.
    pub fn update_participant(
        &mut self,
        id: ParticipantId,
        update: ParticipantUpdate,
    ) -> Result<usize, StoreError> {
        let session_id = self.writable_session()?;
        let callsign = normalize_callsign(&update.callsign);
        if callsign.is_empty() {
            return Err(StoreError::Blank("callsign"));
        }
        let idx = self.participant_index(id)?;

        let old = self.participants[idx].clone();
        let updated = Participant {
            callsign,
            tactical_call: normalize_optional(update.tactical_call.as_deref()),
            name: update.name.trim().to_string(),
            location: update.location.trim().to_string(),
            ..old.clone()
        };

        let change = IdentityChange::between(&old, &updated);
        let changed = rename::propagate(&mut self.entries, &change);

        if updated.callsign != old.callsign {
            self.unindex_call(&old.callsign, id);
            self.by_call
                .entry(updated.callsign.clone())
                .or_default()
                .push(id);
        }
        self.participants[idx] = updated.clone();

        self.queue(PersistOp::SaveParticipant {
            session_id,
            participant: updated,
        });
        for &entry_idx in &changed {
            let entry = self.entries[entry_idx].clone();
            self.queue(PersistOp::SaveLogEntry { session_id, entry });
        }

        Ok(changed.len())
    }

    /// Appends a log line. A blank `to` means net control.
    pub fn add_log_entry(&mut self, draft: LogEntryDraft) -> Result<LogEntryId, StoreError> {
        let session_id = self.writable_session()?;
        let from = draft.from_callsign.trim();
        if from.is_empty() {
            return Err(StoreError::Blank("from callsign"));
        }
        let to = match draft.to_callsign.trim() {
            "" => NET_CONTROL_ALIAS,
            to => to,
        };
        Ok(self.append_entry(session_id, from.to_string(), to.to_string(), draft.message))
    }

    /// Moves the review marker. The id is not checked against the log.
    pub fn set_last_acknowledged_entry(&mut self, entry_id: LogEntryId) -> Result<(), StoreError> {
        let session = self.session.as_mut().ok_or(StoreError::NoSession)?;
        session.last_acknowledged_entry_id = Some(entry_id);
        let saved = session.clone();
        self.queue(PersistOp::SaveSession { session: saved });
        Ok(())
    }

    /// Replaces all in-memory state with a session read back from persistence.
    pub fn load(&mut self, snapshot: NetSnapshot) {
        self.clear_state();
        let NetSnapshot {
            session,
            mut participants,
            mut log_entries,
        } = snapshot;

        participants.sort_by_key(|p| p.check_in_number);
        log_entries.sort_by_key(|e| e.entry_number);

        self.next_check_in = participants
            .iter()
            .map(|p| p.check_in_number)
            .max()
            .unwrap_or(0)
            + 1;
        self.next_entry = log_entries
            .iter()
            .map(|e| e.entry_number)
            .max()
            .unwrap_or(0)
            + 1;

        let anchor = session.opened_at.unwrap_or(session.started_at);
        match session.status {
            SessionStatus::Active => self.anchor = Some(anchor),
            SessionStatus::Closed => {
                self.frozen_elapsed = session.ended_at.map(|ended| span(anchor, ended));
            }
            SessionStatus::Pending => {}
        }

        for p in participants {
            self.push_participant(p);
        }
        self.entries = log_entries;
        self.session = Some(session);
    }

    /// Clears everything in memory. Persisted data is not touched.
    pub fn reset(&mut self) {
        self.clear_state();
        self.pending_ops.clear();
        self.failures.clear();
    }

    /// Current session.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Lifecycle stage of the current session.
    pub fn status(&self) -> Option<SessionStatus> {
        self.session.as_ref().map(|s| s.status)
    }

    /// Participants in check-in order.
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Participant by id.
    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    /// Participants currently holding `callsign`.
    pub fn participants_by_call(&self, callsign: &str) -> Vec<&Participant> {
        self.by_call
            .get(&normalize_callsign(callsign))
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.participant(*id))
            .collect()
    }

    /// Log entries in entry-number order.
    pub fn log_entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Label shown for a logged callsign: `TAC (CALL)` when the station has a
    /// tactical call, else the callsign itself.
    pub fn display_callsign(&self, callsign: &str) -> String {
        let holder = self
            .by_call
            .get(&normalize_callsign(callsign))
            .and_then(|ids| ids.first())
            .and_then(|id| self.participant(*id));
        match holder {
            Some(p) => match p.tactical_call.as_deref() {
                Some(tac) => format!("{tac} ({})", p.callsign),
                None => callsign.to_string(),
            },
            None => callsign.to_string(),
        }
    }

    /// Time on the air: running while active, frozen once closed, zero
    /// otherwise.
    pub fn elapsed(&self) -> Duration {
        match self.anchor {
            Some(anchor) => span(anchor, self.clock.now()),
            None => self.frozen_elapsed.unwrap_or_default(),
        }
    }

    /// Copy of the whole aggregate.
    pub fn snapshot(&self) -> Option<NetSnapshot> {
        self.session.as_ref().map(|session| NetSnapshot {
            session: session.clone(),
            participants: self.participants.clone(),
            log_entries: self.entries.clone(),
        })
    }

    /// ICS-309 CSV for the current state, or `""` without a session.
    pub fn export_csv(&self) -> String {
        match &self.session {
            Some(session) => export::render_csv(session, &self.participants, &self.entries),
            None => String::new(),
        }
    }

    /// Takes the writes queued since the last drain.
    pub fn drain_pending_ops(&mut self) -> Vec<StoredOp> {
        std::mem::take(&mut self.pending_ops)
    }

    /// Highest sequence handed out so far.
    pub fn latest_op_seq(&self) -> OpSeq {
        self.next_op_seq.saturating_sub(1)
    }

    /// Records a persistence failure.
    pub fn record_failure(&mut self, failure: PersistFailure) {
        if self.failures.len() >= self.failure_capacity {
            self.failures.pop_front();
        }
        self.failures.push_back(failure);
    }

    /// Recorded failures, oldest first.
    pub fn failures(&self) -> impl Iterator<Item = &PersistFailure> {
        self.failures.iter()
    }

    /// Drains recorded failures, oldest first.
    pub fn take_failures(&mut self) -> Vec<PersistFailure> {
        self.failures.drain(..).collect()
    }

    /// Most recent failure message.
    pub fn last_error(&self) -> Option<&str> {
        self.failures.back().map(|f| f.message.as_str())
    }

    fn append_entry(&mut self, session_id: SessionId, from: String, to: String, message: String) -> LogEntryId {
        let entry = LogEntry {
            id: Uuid::new_v4(),
            entry_number: self.take_entry_number(),
            time: self.clock.now(),
            from_callsign: from,
            to_callsign: to,
            message,
        };
        let id = entry.id;
        self.entries.push(entry.clone());
        self.queue(PersistOp::SaveLogEntry { session_id, entry });
        id
    }

    fn writable_session(&self) -> Result<SessionId, StoreError> {
        let session = self.session.as_ref().ok_or(StoreError::NoSession)?;
        if session.status == SessionStatus::Closed {
            return Err(StoreError::SessionClosed);
        }
        Ok(session.id)
    }

    fn participant_index(&self, id: ParticipantId) -> Result<usize, StoreError> {
        self.participants
            .iter()
            .position(|p| p.id == id)
            .ok_or(StoreError::MissingParticipant(id))
    }

    fn push_participant(&mut self, participant: Participant) {
        self.by_call
            .entry(participant.callsign.clone())
            .or_default()
            .push(participant.id);
        self.participants.push(participant);
    }

    fn clear_state(&mut self) {
        self.session = None;
        self.participants.clear();
        self.entries.clear();
        self.by_call.clear();
        self.anchor = None;
        self.frozen_elapsed = None;
        self.next_check_in = 1;
        self.next_entry = 1;
    }

    fn queue(&mut self, op: PersistOp) {
        let seq = self.next_op_seq;
        self.next_op_seq += 1;
        let ts_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        self.pending_ops.push(StoredOp { seq, ts_ms, op });
    }

    fn take_check_in_number(&mut self) -> CheckInNumber {
        let n = self.next_check_in;
        self.next_check_in += 1;
        n
    }

    fn take_entry_number(&mut self) -> EntryNumber {
        let n = self.next_entry;
        self.next_entry += 1;
        n
    }

    fn unindex_call(&mut self, callsign: &str, id: ParticipantId) {
        let Some(ids) = self.by_call.get_mut(callsign) else {
            return;
        };
        if let Some(pos) = ids.iter().position(|x| *x == id) {
            ids.remove(pos);
        }
        if ids.is_empty() {
            self.by_call.remove(callsign);
        }
    }
}

fn required(field: &'static str, raw: &str) -> Result<String, StoreError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(StoreError::Blank(field));
    }
    Ok(trimmed.to_string())
}

fn span(from: Timestamp, to: Timestamp) -> Duration {
    (to - from).to_std().unwrap_or_default()
}
