//! Net-control operator's log: session, check-ins, and the ICS-309
//! communications log, with fire-and-forget SQLite persistence.
//!
//! # Examples
//!
//! In-memory usage with [`core::store::NetLogStore`]:
//! ```
//! use netlog::{
//!     core::store::NetLogStore,
//!     net::{LogEntryDraft, ParticipantDraft, SessionDraft},
//! };
//!
//! let mut store = NetLogStore::new();
//! store.create_session(SessionDraft {
//!     name: "Sunday Net".to_string(),
//!     frequency: "146.520".to_string(),
//!     net_control_op: "n0nc".to_string(),
//!     net_control_name: "Pat".to_string(),
//! }).expect("create");
//! store.open_session().expect("open");
//!
//! store.add_participant(ParticipantDraft::call("w1abc")).expect("check in");
//! store.add_log_entry(LogEntryDraft::new("W1ABC", "", "traffic for NC")).expect("log");
//!
//! assert_eq!(store.participants()[1].check_in_number, 2);
//! assert_eq!(store.log_entries().len(), 2);
//! assert!(store.export_csv().starts_with("ICS 309 Communications Log\n"));
//! ```
//!
//! Runtime usage with SQLite sink:
//! ```no_run
//! use netlog::{
//!     core::store::NetLogStore,
//!     net::{ParticipantDraft, SessionDraft},
//!     persist::sqlite::SqliteNetSink,
//!     runtime::handle::{spawn_netlog, RuntimeConfig},
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sink = SqliteNetSink::open("netlog.db").expect("open sqlite");
//! let handle = spawn_netlog(NetLogStore::new(), Some(Box::new(sink)), None, RuntimeConfig::default());
//! handle.create_session(SessionDraft {
//!     name: "Sunday Net".to_string(),
//!     frequency: "146.520".to_string(),
//!     net_control_op: "N0NC".to_string(),
//!     net_control_name: "Pat".to_string(),
//! }).await.expect("create");
//! handle.open_session().await.expect("open");
//! handle.add_participant(ParticipantDraft::call("W1ABC")).await.expect("check in");
//! for failure in handle.take_failures().await.expect("failures") {
//!     eprintln!("{}", failure.message);
//! }
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// Core in-memory store and pure helpers.
pub mod core;
/// ICS-309 CSV rendering and export helpers.
pub mod export;
/// Callsign directory boundary.
pub mod lookup;
/// Session, participant, and log entry records.
pub mod net;
/// Persistence requests and journal wrapper types.
pub mod op;
/// Persistence abstraction and SQLite implementation.
pub mod persist;
/// Single-writer runtime handle and events.
pub mod runtime;
/// Shared primitive types and enums.
pub mod types;
