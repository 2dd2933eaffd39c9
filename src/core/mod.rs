//! In-memory authoritative store and its pure helpers.

/// Time source used for timestamps and elapsed time.
pub mod clock;
/// Identity-rename propagation over the log.
pub mod rename;
/// Authoritative net log store.
pub mod store;
