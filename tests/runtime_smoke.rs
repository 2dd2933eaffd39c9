use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use netlog::{
    core::store::NetLogStore,
    lookup::{CallsignDirectory, CallsignRecord, LookupError, MemoryDirectory},
    net::{
        LogEntry, LogEntryDraft, NetSnapshot, Participant, ParticipantDraft, ParticipantUpdate,
        Session, SessionDraft,
    },
    persist::{NetSink, PersistError, PersistResult, sqlite::SqliteNetSink},
    runtime::{
        events::NetEvent,
        handle::{NetLogHandle, RuntimeConfig, RuntimeError, spawn_netlog},
    },
    types::{SessionId, SessionStatus},
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn draft() -> SessionDraft {
    SessionDraft {
        name: "Sunday Net".to_string(),
        frequency: "146.520".to_string(),
        net_control_op: "N0NC".to_string(),
        net_control_name: "Pat".to_string(),
    }
}

/// Records writes; participant saves fail.
#[derive(Default)]
struct FlakySink {
    saved: Arc<Mutex<Vec<String>>>,
}

impl NetSink for FlakySink {
    fn save_session(&mut self, session: &Session) -> PersistResult<()> {
        self.saved.lock().expect("lock").push(format!("session:{}", session.status.as_str()));
        Ok(())
    }

    fn save_participant(&mut self, _session_id: SessionId, participant: &Participant) -> PersistResult<()> {
        Err(PersistError::Message(format!("disk full writing {}", participant.callsign)))
    }

    fn save_log_entry(&mut self, _session_id: SessionId, entry: &LogEntry) -> PersistResult<()> {
        self.saved.lock().expect("lock").push(format!("entry:{}", entry.entry_number));
        Ok(())
    }

    fn load_session(&mut self, id: SessionId) -> PersistResult<NetSnapshot> {
        Err(PersistError::SessionNotFound(id))
    }
}

/// Accepts every write after a short stall; counts writes.
#[derive(Default)]
struct SlowSink {
    writes: Arc<AtomicUsize>,
}

impl SlowSink {
    fn write(&self) -> PersistResult<()> {
        std::thread::sleep(Duration::from_millis(2));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl NetSink for SlowSink {
    fn save_session(&mut self, _session: &Session) -> PersistResult<()> {
        self.write()
    }

    fn save_participant(&mut self, _session_id: SessionId, _participant: &Participant) -> PersistResult<()> {
        self.write()
    }

    fn save_log_entry(&mut self, _session_id: SessionId, _entry: &LogEntry) -> PersistResult<()> {
        self.write()
    }

    fn load_session(&mut self, id: SessionId) -> PersistResult<NetSnapshot> {
        Err(PersistError::SessionNotFound(id))
    }
}

/// Rejects every write.
struct BrokenSink;

impl NetSink for BrokenSink {
    fn save_session(&mut self, _session: &Session) -> PersistResult<()> {
        Err(PersistError::Message("read-only volume".to_string()))
    }

    fn save_participant(&mut self, _session_id: SessionId, _participant: &Participant) -> PersistResult<()> {
        Err(PersistError::Message("read-only volume".to_string()))
    }

    fn save_log_entry(&mut self, _session_id: SessionId, _entry: &LogEntry) -> PersistResult<()> {
        Err(PersistError::Message("read-only volume".to_string()))
    }

    fn load_session(&mut self, id: SessionId) -> PersistResult<NetSnapshot> {
        Err(PersistError::SessionNotFound(id))
    }
}

struct DownDirectory;

impl CallsignDirectory for DownDirectory {
    fn lookup(&self, _callsign: &str) -> Result<Option<CallsignRecord>, LookupError> {
        Err(LookupError::Unavailable("offline".to_string()))
    }
}

async fn next_matching(
    sub: &mut tokio::sync::broadcast::Receiver<NetEvent>,
    pred: impl Fn(&NetEvent) -> bool,
) -> NetEvent {
    loop {
        let evt = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("event")
            .expect("recv");
        if pred(&evt) {
            return evt;
        }
    }
}

#[tokio::test]
async fn runtime_lifecycle_and_events_ordered() {
    init_tracing();
    let handle = spawn_netlog(NetLogStore::new(), None, None, RuntimeConfig::default());
    let mut sub = handle.subscribe();

    let sid = handle.create_session(draft()).await.expect("create").expect("accepted");
    assert!(handle.open_session().await.expect("open"));
    assert!(!handle.open_session().await.expect("reopen"));
    let pid = handle
        .add_participant(ParticipantDraft::call("w1abc"))
        .await
        .expect("add")
        .expect("accepted");
    assert!(handle.add_log_entry(LogEntryDraft::new("", "NC", "x")).await.expect("blank").is_none());

    let mut seen = Vec::new();
    while seen.len() < 4 {
        let evt = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("event")
            .expect("recv");
        if !matches!(evt, NetEvent::DurableUpTo { .. }) {
            seen.push(evt);
        }
    }
    assert_eq!(seen[0], NetEvent::SessionCreated { id: sid });
    assert_eq!(seen[1], NetEvent::SessionOpened);
    assert_eq!(seen[2], NetEvent::ParticipantAdded { id: pid });
    assert!(matches!(seen[3], NetEvent::LogEntryAdded { .. }));

    assert_eq!(handle.display_callsign("N0NC").await.expect("display"), "NET (N0NC)");
    let snap = handle.snapshot().await.expect("snapshot").expect("session");
    assert_eq!(snap.participants.len(), 2);
    assert_eq!(snap.log_entries.len(), 1);

    assert!(handle.close_session().await.expect("close"));
    let frozen = handle.elapsed().await.expect("elapsed");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(handle.elapsed().await.expect("elapsed"), frozen);
    assert!(handle.export_csv().await.expect("csv").contains("1,"));

    handle.reset().await.expect("reset");
    assert_eq!(handle.export_csv().await.expect("csv"), "");
    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn persistence_failures_are_queued_without_rolling_back() {
    init_tracing();
    let saved = Arc::new(Mutex::new(Vec::new()));
    let sink = FlakySink {
        saved: Arc::clone(&saved),
    };
    let handle = spawn_netlog(
        NetLogStore::new(),
        Some(Box::new(sink)),
        None,
        RuntimeConfig::default(),
    );
    let mut sub = handle.subscribe();

    handle.create_session(draft()).await.expect("create");
    handle.open_session().await.expect("open");
    handle.add_participant(ParticipantDraft::call("W1ABC")).await.expect("add");
    handle.flush().await.expect("flush");

    let failed = next_matching(&mut sub, |e| matches!(e, NetEvent::PersistFailed { .. })).await;
    let NetEvent::PersistFailed { failure } = failed else {
        unreachable!()
    };
    assert!(failure.message.starts_with("Failed to save participant: "));

    // Both participant writes (net control and W1ABC) failed independently.
    let failures = handle.take_failures().await.expect("failures");
    assert_eq!(failures.len(), 2);
    assert!(failures[1].message.contains("W1ABC"));
    assert!(handle.take_failures().await.expect("failures").is_empty());

    let snap = handle.snapshot().await.expect("snapshot").expect("session");
    assert_eq!(snap.participants.len(), 2);
    assert_eq!(
        *saved.lock().expect("lock"),
        vec!["session:pending", "session:active", "entry:1"]
    );

    assert!(!handle.load_session(snap.session.id).await.expect("load"));
    let failures = handle.take_failures().await.expect("failures");
    assert!(failures[0].message.starts_with("Failed to load session: "));
    assert_eq!(
        handle.snapshot().await.expect("snapshot").map(|s| s.session.status),
        Some(SessionStatus::Active)
    );

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn load_session_restores_state_from_sqlite() {
    init_tracing();
    let tmp = tempfile::TempDir::new().expect("tmp");
    let db_path = tmp.path().join("net.db");

    let first = spawn_netlog(
        NetLogStore::new(),
        Some(Box::new(SqliteNetSink::open(&db_path).expect("open"))),
        None,
        RuntimeConfig::default(),
    );
    let sid = first.create_session(draft()).await.expect("create").expect("accepted");
    first.open_session().await.expect("open");
    first.add_participant(ParticipantDraft::call("W1ABC")).await.expect("add");
    first.flush().await.expect("flush");
    let expected = first.export_csv().await.expect("csv");
    first.shutdown().await.expect("shutdown");

    let second = spawn_netlog(
        NetLogStore::new(),
        Some(Box::new(SqliteNetSink::open(&db_path).expect("reopen"))),
        None,
        RuntimeConfig::default(),
    );
    assert!(second.load_session(sid).await.expect("load"));
    assert_eq!(second.export_csv().await.expect("csv"), expected);
    assert!(second.elapsed().await.expect("elapsed") > Duration::ZERO);
    second.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn lookup_normalizes_and_degrades_to_none() {
    init_tracing();
    let dir: MemoryDirectory = [CallsignRecord {
        callsign: "W1ABC".to_string(),
        name: "Alex".to_string(),
        location: "Boston, MA".to_string(),
    }]
    .into_iter()
    .collect();
    let handle: NetLogHandle = spawn_netlog(
        NetLogStore::new(),
        None,
        Some(Arc::new(dir)),
        RuntimeConfig::default(),
    );
    let found = handle.lookup_callsign(" w1abc ").await.expect("found");
    assert_eq!(found.name, "Alex");
    assert!(handle.lookup_callsign("K2DEF").await.is_none());
    handle.shutdown().await.expect("shutdown");

    let down = spawn_netlog(NetLogStore::new(), None, Some(Arc::new(DownDirectory)), RuntimeConfig::default());
    assert!(down.lookup_callsign("W1ABC").await.is_none());
    down.shutdown().await.expect("shutdown");
}

#[test]
fn runtime_config_from_json_fills_defaults() {
    let cfg = RuntimeConfig::from_json(r#"{ "batch_max_ops": 4, "flush_on_write": false }"#).expect("parse");
    assert_eq!(cfg.batch_max_ops, 4);
    assert!(!cfg.flush_on_write);
    assert_eq!(cfg.persist_queue_bound, RuntimeConfig::default().persist_queue_bound);
}

#[tokio::test]
async fn rename_over_long_log_reaches_sqlite() {
    init_tracing();
    let tmp = tempfile::TempDir::new().expect("tmp");
    let db_path = tmp.path().join("net.db");

    let handle = spawn_netlog(
        NetLogStore::new(),
        Some(Box::new(SqliteNetSink::open(&db_path).expect("open"))),
        None,
        RuntimeConfig::default(),
    );
    let sid = handle.create_session(draft()).await.expect("create").expect("accepted");
    handle.open_session().await.expect("open");
    let pid = handle
        .add_participant(ParticipantDraft::call("W1ABC"))
        .await
        .expect("add")
        .expect("accepted");
    for i in 0..150 {
        handle
            .add_log_entry(LogEntryDraft::new("W1ABC", "NC", format!("msg {i}")))
            .await
            .expect("log")
            .expect("accepted");
    }
    handle.flush().await.expect("flush");

    let snap = handle.snapshot().await.expect("snapshot").expect("session");
    let mut update = ParticipantUpdate::from(
        snap.participants.iter().find(|p| p.id == pid).expect("participant"),
    );
    update.callsign = "W1XYZ".to_string();
    let rewritten = handle.update_participant(pid, update).await.expect("update").expect("accepted");
    assert_eq!(rewritten, 151);
    handle.flush().await.expect("flush");
    assert!(handle.take_failures().await.expect("failures").is_empty());
    handle.shutdown().await.expect("shutdown");

    let mut sink = SqliteNetSink::open(&db_path).expect("reopen");
    let loaded = sink.load_session(sid).expect("load");
    assert_eq!(loaded.log_entries.len(), 151);
    assert!(loaded.log_entries.iter().all(|e| e.from_callsign == "W1XYZ"));
    assert!(loaded.participants.iter().any(|p| p.id == pid && p.callsign == "W1XYZ"));
}

#[tokio::test]
async fn full_persist_queue_holds_writes_instead_of_dropping_them() {
    init_tracing();
    let writes = Arc::new(AtomicUsize::new(0));
    let sink = SlowSink {
        writes: Arc::clone(&writes),
    };
    let config = RuntimeConfig {
        persist_queue_bound: 1,
        ..RuntimeConfig::default()
    };
    let handle = spawn_netlog(NetLogStore::new(), Some(Box::new(sink)), None, config);

    handle.create_session(draft()).await.expect("create");
    handle.open_session().await.expect("open");
    for i in 0..50 {
        handle
            .add_log_entry(LogEntryDraft::new("W1ABC", "NC", format!("msg {i}")))
            .await
            .expect("log");
    }

    // Session, net control, open, then fifty entries.
    assert_eq!(handle.flush().await.expect("flush"), 53);
    assert_eq!(writes.load(Ordering::SeqCst), 53);
    assert!(handle.take_failures().await.expect("failures").is_empty());
    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn shutdown_reports_failures_from_the_final_batch() {
    init_tracing();
    let config = RuntimeConfig {
        flush_on_write: false,
        batch_max_ops: 1_000,
        batch_max_latency_ms: 60_000,
        ..RuntimeConfig::default()
    };
    let handle = spawn_netlog(NetLogStore::new(), Some(Box::new(BrokenSink)), None, config);
    let mut sub = handle.subscribe();

    handle.create_session(draft()).await.expect("create");
    handle.open_session().await.expect("open");

    let err = handle.shutdown().await.expect_err("final batch failed");
    assert!(matches!(err, RuntimeError::Persist(_)));

    let mut failed = Vec::new();
    while let Ok(evt) = sub.try_recv() {
        if let NetEvent::PersistFailed { failure } = evt {
            failed.push(failure.message);
        }
    }
    assert_eq!(failed.len(), 3);
    assert!(failed[0].starts_with("Failed to save session: "));
    assert!(failed[1].starts_with("Failed to save participant: "));
}
