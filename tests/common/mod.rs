#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use netlog::{
    core::{clock::ManualClock, store::NetLogStore},
    net::SessionDraft,
    types::Timestamp,
};

pub fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 5, 5, 18, 0, 0).unwrap()
}

pub fn draft(name: &str) -> SessionDraft {
    SessionDraft {
        name: name.to_string(),
        frequency: "146.520".to_string(),
        net_control_op: "n0nc".to_string(),
        net_control_name: "Pat".to_string(),
    }
}

pub fn store_at_t0() -> (NetLogStore, ManualClock) {
    let clock = ManualClock::new(t0());
    let store = NetLogStore::with_clock(Arc::new(clock.clone()));
    (store, clock)
}

/// Store with a freshly created, opened session.
pub fn active_store() -> (NetLogStore, ManualClock) {
    let (mut store, clock) = store_at_t0();
    store.create_session(draft("Sunday Net")).expect("create");
    store.open_session().expect("open");
    store.drain_pending_ops();
    (store, clock)
}
