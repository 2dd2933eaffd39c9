//! Identity-rename propagation over the communications log.
//!
//! Log entries name stations by free text, so renaming a participant rewrites
//! every `from`/`to` field that still carries the old callsign or tactical call.

use crate::net::{LogEntry, Participant};

/// Old and new identity of one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityChange {
    /// Callsign before the update.
    pub old_callsign: String,
    /// Tactical call before the update.
    pub old_tactical: Option<String>,
    /// Callsign after the update.
    pub new_callsign: String,
    /// Tactical call after the update.
    pub new_tactical: Option<String>,
}

impl IdentityChange {
    /// Change from `old` to `new`.
    pub fn between(old: &Participant, new: &Participant) -> Self {
        Self {
            old_callsign: old.callsign.clone(),
            old_tactical: old.tactical_call.clone(),
            new_callsign: new.callsign.clone(),
            new_tactical: new.tactical_call.clone(),
        }
    }

    /// Replacement for fields that matched the old tactical call.
    pub fn fallback(&self) -> &str {
        match self.new_tactical.as_deref() {
            Some(tac) if !tac.is_empty() => tac,
            _ => &self.new_callsign,
        }
    }

    /// New value for `field`, or `None` when it names neither old identity.
    pub fn remap(&self, field: &str) -> Option<&str> {
        if field == self.old_callsign {
            return Some(&self.new_callsign);
        }
        match self.old_tactical.as_deref() {
            Some(tac) if !tac.is_empty() && field == tac => Some(self.fallback()),
            _ => None,
        }
    }
}

/// Computes the rewritten copy of every entry whose `from` or `to` changes.
///
/// Returns `(index, rewritten)` pairs in log order; untouched entries are not
/// listed.
pub fn plan(entries: &[LogEntry], change: &IdentityChange) -> Vec<(usize, LogEntry)> {
    entries
        .iter()
        .enumerate()
        .filter_map(|(idx, entry)| {
            let from = change.remap(&entry.from_callsign).unwrap_or(&entry.from_callsign);
            let to = change.remap(&entry.to_callsign).unwrap_or(&entry.to_callsign);
            if from == entry.from_callsign && to == entry.to_callsign {
                return None;
            }
            let mut rewritten = entry.clone();
            rewritten.from_callsign = from.to_string();
            rewritten.to_callsign = to.to_string();
            Some((idx, rewritten))
        })
        .collect()
}

/// Applies [`plan`] in place and returns the indices that changed.
pub fn propagate(entries: &mut [LogEntry], change: &IdentityChange) -> Vec<usize> {
    let rewrites = plan(entries, change);
    let mut changed = Vec::with_capacity(rewrites.len());
    for (idx, rewritten) in rewrites {
        entries[idx] = rewritten;
        changed.push(idx);
    }
    changed
}
