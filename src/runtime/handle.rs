use std::{sync::Arc, time::Duration as StdDuration};

use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot},
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    core::store::{NetLogStore, StoreError},
    lookup::{CallsignDirectory, CallsignRecord},
    net::{
        LogEntryDraft, NetSnapshot, ParticipantDraft, ParticipantUpdate, SessionDraft,
        normalize_callsign,
    },
    op::{PersistFailure, StoredOp},
    persist::{NetSink, PersistError},
    types::{LogEntryId, OpSeq, ParticipantId, SessionId},
};

use super::events::NetEvent;

/// Errors surfaced by [`NetLogHandle`] calls.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The runtime task is gone.
    #[error("runtime channel closed")]
    ChannelClosed,
    /// An explicit flush or shutdown hit the sink.
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Persistence batching and queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Write every op as soon as it reaches the worker.
    pub flush_on_write: bool,
    /// Batch size that forces a write.
    pub batch_max_ops: usize,
    /// Longest an op may sit in the batch buffer.
    pub batch_max_latency_ms: u64,
    /// Capacity of the runtime-to-worker queue. A full queue holds the
    /// runtime loop until the worker catches up.
    pub persist_queue_bound: usize,
    /// Failures kept before the oldest is dropped.
    pub failure_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_on_write: true,
            batch_max_ops: 32,
            batch_max_latency_ms: 75,
            persist_queue_bound: 64,
            failure_capacity: crate::core::store::DEFAULT_FAILURE_CAPACITY,
        }
    }
}

impl RuntimeConfig {
    /// Parses a JSON config document; missing fields take their defaults.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Cloneable async front door to the single-writer runtime.
pub struct NetLogHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<NetEvent>,
    directory: Option<Arc<dyn CallsignDirectory>>,
}

impl Clone for NetLogHandle {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            events_tx: self.events_tx.clone(),
            directory: self.directory.clone(),
        }
    }
}

enum Command {
    CreateSession {
        draft: SessionDraft,
        resp: oneshot::Sender<Option<SessionId>>,
    },
    OpenSession {
        resp: oneshot::Sender<bool>,
    },
    CloseSession {
        resp: oneshot::Sender<bool>,
    },
    AddParticipant {
        draft: ParticipantDraft,
        resp: oneshot::Sender<Option<ParticipantId>>,
    },
    RemoveParticipant {
        id: ParticipantId,
        resp: oneshot::Sender<bool>,
    },
    UpdateParticipant {
        id: ParticipantId,
        update: ParticipantUpdate,
        resp: oneshot::Sender<Option<usize>>,
    },
    AddLogEntry {
        draft: LogEntryDraft,
        resp: oneshot::Sender<Option<LogEntryId>>,
    },
    Acknowledge {
        entry_id: LogEntryId,
        resp: oneshot::Sender<bool>,
    },
    LoadSession {
        id: SessionId,
        resp: oneshot::Sender<bool>,
    },
    Reset {
        resp: oneshot::Sender<()>,
    },
    Snapshot {
        resp: oneshot::Sender<Option<NetSnapshot>>,
    },
    Elapsed {
        resp: oneshot::Sender<StdDuration>,
    },
    ExportCsv {
        resp: oneshot::Sender<String>,
    },
    DisplayCallsign {
        callsign: String,
        resp: oneshot::Sender<String>,
    },
    TakeFailures {
        resp: oneshot::Sender<Vec<PersistFailure>>,
    },
    Flush {
        resp: oneshot::Sender<Result<OpSeq, RuntimeError>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
}

enum PersistMsg {
    Ops(Vec<StoredOp>),
    Load {
        id: SessionId,
        resp: oneshot::Sender<Result<NetSnapshot, PersistError>>,
    },
    Flush {
        resp: oneshot::Sender<Result<OpSeq, PersistError>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<(), PersistError>>,
    },
}

enum WorkerReport {
    Durable(OpSeq),
    Failed(PersistFailure),
}

enum Flow {
    Continue,
    Stop {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
        out: Result<(), RuntimeError>,
    },
}

/// Starts the runtime loop, plus a persistence worker when a sink is given.
pub fn spawn_netlog(
    store: NetLogStore,
    sink: Option<Box<dyn NetSink>>,
    directory: Option<Arc<dyn CallsignDirectory>>,
    config: RuntimeConfig,
) -> NetLogHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(256);
    let (events_tx, _) = broadcast::channel::<NetEvent>(1024);

    let (persist_tx_opt, mut report_rx) = if let Some(sink) = sink {
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound.max(1));
        let (report_tx, report_rx) = mpsc::unbounded_channel::<WorkerReport>();
        spawn_persistence_worker(sink, persist_rx, report_tx, config.clone());
        (Some(persist_tx), Some(report_rx))
    } else {
        (None, None)
    };

    let events_tx_loop = events_tx.clone();

    tokio::spawn(async move {
        let mut store = store;
        store.set_failure_capacity(config.failure_capacity);
        let mut stop = None;

        loop {
            let mut worker_gone = false;
            if let Some(rx) = report_rx.as_mut() {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        let Some(cmd) = cmd else { break; };
                        // Reports already delivered land before the command sees the store.
                        while let Ok(report) = rx.try_recv() {
                            apply_report(&mut store, &events_tx_loop, report);
                        }
                        let flow = handle_command(
                            cmd,
                            &mut store,
                            &events_tx_loop,
                            persist_tx_opt.as_ref(),
                        ).await;
                        if let Flow::Stop { resp, out } = flow {
                            stop = Some((resp, out));
                            break;
                        }
                    }
                    report = rx.recv() => {
                        match report {
                            Some(report) => apply_report(&mut store, &events_tx_loop, report),
                            None => worker_gone = true,
                        }
                    }
                }
            } else {
                let Some(cmd) = cmd_rx.recv().await else { break; };
                let flow = handle_command(cmd, &mut store, &events_tx_loop, persist_tx_opt.as_ref()).await;
                if let Flow::Stop { resp, out } = flow {
                    stop = Some((resp, out));
                    break;
                }
            }
            if worker_gone {
                warn!("persistence worker stopped; writes will be recorded as failures");
                report_rx = None;
            }
        }

        // The worker reports its final batch before acknowledging shutdown.
        if let Some(rx) = report_rx.as_mut() {
            while let Ok(report) = rx.try_recv() {
                apply_report(&mut store, &events_tx_loop, report);
            }
        }
        if let Some((resp, out)) = stop {
            let _ = resp.send(out);
        }
    });

    NetLogHandle {
        cmd_tx,
        events_tx,
        directory,
    }
}

impl NetLogHandle {
    /// Subscribes to runtime events.
    pub fn subscribe(&self) -> broadcast::Receiver<NetEvent> {
        self.events_tx.subscribe()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Starts a new pending session, replacing any current one.
    pub async fn create_session(&self, draft: SessionDraft) -> Result<Option<SessionId>, RuntimeError> {
        self.request(|resp| Command::CreateSession { draft, resp }).await
    }

    /// Moves a pending session to active.
    pub async fn open_session(&self) -> Result<bool, RuntimeError> {
        self.request(|resp| Command::OpenSession { resp }).await
    }

    /// Closes the session. Closing again keeps the first end time.
    pub async fn close_session(&self) -> Result<bool, RuntimeError> {
        self.request(|resp| Command::CloseSession { resp }).await
    }

    /// Checks a station in.
    pub async fn add_participant(&self, draft: ParticipantDraft) -> Result<Option<ParticipantId>, RuntimeError> {
        self.request(|resp| Command::AddParticipant { draft, resp }).await
    }

    /// Drops a station from memory only.
    pub async fn remove_participant(&self, id: ParticipantId) -> Result<bool, RuntimeError> {
        self.request(|resp| Command::RemoveParticipant { id, resp }).await
    }

    /// Returns the number of log entries rewritten, or `None` if the update
    /// was rejected.
    pub async fn update_participant(
        &self,
        id: ParticipantId,
        update: ParticipantUpdate,
    ) -> Result<Option<usize>, RuntimeError> {
        self.request(|resp| Command::UpdateParticipant { id, update, resp }).await
    }

    /// Appends a communications-log line.
    pub async fn add_log_entry(&self, draft: LogEntryDraft) -> Result<Option<LogEntryId>, RuntimeError> {
        self.request(|resp| Command::AddLogEntry { draft, resp }).await
    }

    /// Moves the review marker.
    pub async fn set_last_acknowledged_entry(&self, entry_id: LogEntryId) -> Result<bool, RuntimeError> {
        self.request(|resp| Command::Acknowledge { entry_id, resp }).await
    }

    /// Replaces in-memory state with a stored session. A failed read is
    /// recorded as a persistence failure and yields `false`.
    pub async fn load_session(&self, id: SessionId) -> Result<bool, RuntimeError> {
        self.request(|resp| Command::LoadSession { id, resp }).await
    }

    /// Clears all in-memory state.
    pub async fn reset(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Reset { resp }).await
    }

    /// Report data for the current session.
    pub async fn snapshot(&self) -> Result<Option<NetSnapshot>, RuntimeError> {
        self.request(|resp| Command::Snapshot { resp }).await
    }

    /// Net duration so far.
    pub async fn elapsed(&self) -> Result<StdDuration, RuntimeError> {
        self.request(|resp| Command::Elapsed { resp }).await
    }

    /// Renders the CSV export.
    pub async fn export_csv(&self) -> Result<String, RuntimeError> {
        self.request(|resp| Command::ExportCsv { resp }).await
    }

    /// `TACTICAL (CALL)` for a checked-in station, else the callsign.
    pub async fn display_callsign(&self, callsign: impl Into<String>) -> Result<String, RuntimeError> {
        let callsign = callsign.into();
        self.request(|resp| Command::DisplayCallsign { callsign, resp }).await
    }

    /// Drains the recorded persistence failures, oldest first.
    pub async fn take_failures(&self) -> Result<Vec<PersistFailure>, RuntimeError> {
        self.request(|resp| Command::TakeFailures { resp }).await
    }

    /// Looks a callsign up in the directory. Any failure degrades to `None`.
    pub async fn lookup_callsign(&self, callsign: &str) -> Option<CallsignRecord> {
        let directory = self.directory.clone()?;
        let call = normalize_callsign(callsign);
        if call.is_empty() {
            return None;
        }

        let query = call.clone();
        match tokio::task::spawn_blocking(move || directory.lookup(&query)).await {
            Ok(Ok(found)) => found,
            Ok(Err(err)) => {
                warn!(callsign = %call, error = %err, "callsign lookup failed");
                None
            }
            Err(err) => {
                warn!(callsign = %call, error = %err, "callsign lookup task failed");
                None
            }
        }
    }

    /// Waits until queued ops have been written.
    pub async fn flush(&self) -> Result<OpSeq, RuntimeError> {
        self.request(|resp| Command::Flush { resp }).await?
    }

    /// Flushes and stops the runtime.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Shutdown { resp }).await?
    }
}

async fn handle_command(
    cmd: Command,
    store: &mut NetLogStore,
    events_tx: &broadcast::Sender<NetEvent>,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
) -> Flow {
    match cmd {
        Command::CreateSession { draft, resp } => {
            let out = accepted("create session", store.create_session(draft));
            if let Some(id) = out {
                info!(session = %id, "session created");
                dispatch_pending(store, events_tx, persist_tx).await;
                let _ = events_tx.send(NetEvent::SessionCreated { id });
            }
            let _ = resp.send(out);
        }
        Command::OpenSession { resp } => {
            let ok = accepted("open session", store.open_session()).is_some();
            if ok {
                info!("session opened");
                dispatch_pending(store, events_tx, persist_tx).await;
                let _ = events_tx.send(NetEvent::SessionOpened);
            }
            let _ = resp.send(ok);
        }
        Command::CloseSession { resp } => {
            let ok = accepted("close session", store.close_session()).is_some();
            if ok {
                info!(elapsed_ms = store.elapsed().as_millis() as u64, "session closed");
                dispatch_pending(store, events_tx, persist_tx).await;
                let _ = events_tx.send(NetEvent::SessionClosed);
            }
            let _ = resp.send(ok);
        }
        Command::AddParticipant { draft, resp } => {
            let entries_before = store.log_entries().len();
            let out = accepted("add participant", store.add_participant(draft));
            if let Some(id) = out {
                dispatch_pending(store, events_tx, persist_tx).await;
                let _ = events_tx.send(NetEvent::ParticipantAdded { id });
                for entry in &store.log_entries()[entries_before..] {
                    let _ = events_tx.send(NetEvent::LogEntryAdded { id: entry.id });
                }
            }
            let _ = resp.send(out);
        }
        Command::RemoveParticipant { id, resp } => {
            let ok = accepted("remove participant", store.remove_participant(id)).is_some();
            if ok {
                let _ = events_tx.send(NetEvent::ParticipantRemoved { id });
            }
            let _ = resp.send(ok);
        }
        Command::UpdateParticipant { id, update, resp } => {
            let out = accepted("update participant", store.update_participant(id, update));
            if let Some(rewritten) = out {
                debug!(participant = %id, rewritten, "participant identity updated");
                dispatch_pending(store, events_tx, persist_tx).await;
                let _ = events_tx.send(NetEvent::ParticipantUpdated { id, rewritten });
            }
            let _ = resp.send(out);
        }
        Command::AddLogEntry { draft, resp } => {
            let out = accepted("add log entry", store.add_log_entry(draft));
            if let Some(id) = out {
                dispatch_pending(store, events_tx, persist_tx).await;
                let _ = events_tx.send(NetEvent::LogEntryAdded { id });
            }
            let _ = resp.send(out);
        }
        Command::Acknowledge { entry_id, resp } => {
            let ok = accepted("acknowledge entry", store.set_last_acknowledged_entry(entry_id)).is_some();
            if ok {
                dispatch_pending(store, events_tx, persist_tx).await;
                let _ = events_tx.send(NetEvent::Acknowledged { entry_id });
            }
            let _ = resp.send(ok);
        }
        Command::LoadSession { id, resp } => {
            let loaded = match persist_tx {
                Some(tx) => {
                    let (load_tx, load_rx) = oneshot::channel();
                    if tx.send(PersistMsg::Load { id, resp: load_tx }).await.is_err() {
                        Err(PersistError::Message("persistence worker stopped".to_string()))
                    } else {
                        load_rx
                            .await
                            .unwrap_or_else(|_| Err(PersistError::Message("persistence worker stopped".to_string())))
                    }
                }
                None => Err(PersistError::Message("no persistence configured".to_string())),
            };
            let ok = match loaded {
                Ok(snapshot) => {
                    store.load(snapshot);
                    info!(session = %id, "session loaded");
                    let _ = events_tx.send(NetEvent::SessionLoaded { id });
                    true
                }
                Err(err) => {
                    record_failure(
                        store,
                        events_tx,
                        PersistFailure::message(format!("Failed to load session: {err}")),
                    );
                    false
                }
            };
            let _ = resp.send(ok);
        }
        Command::Reset { resp } => {
            store.reset();
            let _ = events_tx.send(NetEvent::Reset);
            let _ = resp.send(());
        }
        Command::Snapshot { resp } => {
            let _ = resp.send(store.snapshot());
        }
        Command::Elapsed { resp } => {
            let _ = resp.send(store.elapsed());
        }
        Command::ExportCsv { resp } => {
            let _ = resp.send(store.export_csv());
        }
        Command::DisplayCallsign { callsign, resp } => {
            let _ = resp.send(store.display_callsign(&callsign));
        }
        Command::TakeFailures { resp } => {
            let _ = resp.send(store.take_failures());
        }
        Command::Flush { resp } => {
            let out = if let Some(tx) = persist_tx {
                let (flush_tx, flush_rx) = oneshot::channel();
                if tx.send(PersistMsg::Flush { resp: flush_tx }).await.is_err() {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    flush_rx
                        .await
                        .map_err(|_| RuntimeError::ChannelClosed)
                        .and_then(|r| r.map_err(RuntimeError::from))
                }
            } else {
                Ok(store.latest_op_seq())
            };
            let _ = resp.send(out);
        }
        Command::Shutdown { resp } => {
            let out = if let Some(tx) = persist_tx {
                let (done_tx, done_rx) = oneshot::channel();
                if tx.send(PersistMsg::Shutdown { resp: done_tx }).await.is_err() {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    done_rx
                        .await
                        .map_err(|_| RuntimeError::ChannelClosed)
                        .and_then(|r| r.map_err(RuntimeError::from))
                }
            } else {
                Ok(())
            };
            return Flow::Stop { resp, out };
        }
    }

    Flow::Continue
}

fn accepted<T>(what: &str, res: Result<T, StoreError>) -> Option<T> {
    match res {
        Ok(v) => Some(v),
        Err(err) => {
            debug!(error = %err, "{what} ignored");
            None
        }
    }
}

fn apply_report(store: &mut NetLogStore, events_tx: &broadcast::Sender<NetEvent>, report: WorkerReport) {
    match report {
        WorkerReport::Durable(op_seq) => {
            let _ = events_tx.send(NetEvent::DurableUpTo { op_seq });
        }
        WorkerReport::Failed(failure) => record_failure(store, events_tx, failure),
    }
}

fn record_failure(store: &mut NetLogStore, events_tx: &broadcast::Sender<NetEvent>, failure: PersistFailure) {
    warn!(seq = ?failure.seq, "{}", failure.message);
    store.record_failure(failure.clone());
    let _ = events_tx.send(NetEvent::PersistFailed { failure });
}

// One message per command. A full queue waits; a stopped worker is recorded,
// never returned to the caller.
async fn dispatch_pending(
    store: &mut NetLogStore,
    events_tx: &broadcast::Sender<NetEvent>,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
) {
    let ops = store.drain_pending_ops();
    let Some(tx) = persist_tx else {
        let _ = events_tx.send(NetEvent::DurableUpTo {
            op_seq: store.latest_op_seq(),
        });
        return;
    };
    if ops.is_empty() {
        return;
    }

    if let Err(err) = tx.send(PersistMsg::Ops(ops)).await {
        if let PersistMsg::Ops(ops) = err.0 {
            for stored in &ops {
                record_failure(store, events_tx, PersistFailure::for_op(stored, "persistence worker stopped"));
            }
        }
    }
}

fn spawn_persistence_worker(
    sink: Box<dyn NetSink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    report_tx: mpsc::UnboundedSender<WorkerReport>,
    config: RuntimeConfig,
) {
    let sink = Arc::new(Mutex::new(sink));
    tokio::spawn(async move {
        let mut buf = Vec::<StoredOp>::new();
        let mut deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
        let mut last_durable: OpSeq = 0;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        let _ = flush_buf(&sink, &mut buf, &mut last_durable, &report_tx, true).await;
                        break;
                    };

                    match msg {
                        PersistMsg::Ops(ops) => {
                            buf.extend(ops);
                            if buf.len() >= config.batch_max_ops || config.flush_on_write {
                                let _ = flush_buf(&sink, &mut buf, &mut last_durable, &report_tx, true).await;
                                deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                            }
                        }
                        PersistMsg::Load { id, resp } => {
                            let _ = flush_buf(&sink, &mut buf, &mut last_durable, &report_tx, false).await;
                            let sink_ref = Arc::clone(&sink);
                            let result = match tokio::task::spawn_blocking(move || {
                                let mut sink = sink_ref.blocking_lock();
                                sink.load_session(id)
                            }).await {
                                Ok(inner) => inner,
                                Err(e) => Err(PersistError::Message(format!("join error: {e}"))),
                            };
                            let _ = resp.send(result);
                        }
                        PersistMsg::Flush { resp } => {
                            let result = flush_buf(&sink, &mut buf, &mut last_durable, &report_tx, true).await;
                            let _ = resp.send(result.map(|_| last_durable));
                            deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                        }
                        PersistMsg::Shutdown { resp } => {
                            let result = flush_buf(&sink, &mut buf, &mut last_durable, &report_tx, true).await;
                            let _ = resp.send(result);
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !buf.is_empty() => {
                    let _ = flush_buf(&sink, &mut buf, &mut last_durable, &report_tx, false).await;
                    deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                }
            }
        }
    });
}

// Ops are written one by one so each failure is reported against its own op.
// Any failed op also fails the batch result.
async fn flush_buf(
    sink: &Arc<Mutex<Box<dyn NetSink>>>,
    buf: &mut Vec<StoredOp>,
    last_durable: &mut OpSeq,
    report_tx: &mpsc::UnboundedSender<WorkerReport>,
    call_flush: bool,
) -> Result<(), PersistError> {
    let ops = std::mem::take(buf);
    let sink_ref = Arc::clone(sink);
    let (written, failures, flushed) = tokio::task::spawn_blocking(move || {
        let mut sink = sink_ref.blocking_lock();
        let mut written: Option<OpSeq> = None;
        let mut failures = Vec::new();
        for stored in &ops {
            match sink.apply(stored) {
                Ok(()) => written = Some(written.map_or(stored.seq, |w| w.max(stored.seq))),
                Err(err) => failures.push(PersistFailure::for_op(stored, err)),
            }
        }
        let flushed = if call_flush { sink.flush() } else { Ok(()) };
        (written, failures, flushed)
    })
    .await
    .map_err(|e| PersistError::Message(format!("join error: {e}")))?;

    let failed = failures.len();
    for failure in failures {
        let _ = report_tx.send(WorkerReport::Failed(failure));
    }
    if let Some(seq) = written {
        *last_durable = (*last_durable).max(seq);
        let _ = report_tx.send(WorkerReport::Durable(*last_durable));
    }
    if let Err(err) = &flushed {
        let _ = report_tx.send(WorkerReport::Failed(PersistFailure::message(format!(
            "Failed to flush persistence: {err}"
        ))));
    }
    flushed?;
    if failed > 0 {
        return Err(PersistError::Message(format!("{failed} queued writes failed")));
    }
    Ok(())
}
