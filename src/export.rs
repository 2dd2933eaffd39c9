//! ICS-309 CSV rendering and export helpers.
//!
//! The CSV layout mirrors the paper ICS-309 form and must stay byte-for-byte
//! stable: header block, participant table, communications log, joined with
//! `\n` and no trailing newline. Only the message column is quoted.

use std::time::Duration;

use chrono::NaiveDate;

use crate::{
    net::{LogEntry, Participant, Session},
    types::iso8601,
};

/// Renders the ICS-309 communications log as CSV.
pub fn render_csv(session: &Session, participants: &[Participant], entries: &[LogEntry]) -> String {
    let mut lines = Vec::with_capacity(10 + participants.len() + entries.len());
    lines.push("ICS 309 Communications Log".to_string());
    lines.push(format!("Net Name,{}", session.name));
    lines.push(format!("Frequency,{}", session.frequency));
    lines.push(format!(
        "Net Control,{} - {}",
        session.net_control_op, session.net_control_name
    ));
    lines.push(format!("Date/Time,{}", iso8601(&session.started_at)));
    lines.push(String::new());
    lines.push("Participants".to_string());
    lines.push("Check-In #,Callsign,Tactical,Name,Location,Time".to_string());
    for p in participants {
        lines.push(format!(
            "{},{},{},{},{},{}",
            p.check_in_number,
            p.callsign,
            p.tactical(),
            p.name,
            p.location,
            iso8601(&p.check_in_time)
        ));
    }
    lines.push(String::new());
    lines.push("Communications Log".to_string());
    lines.push("Entry #,Time,From,To,Message".to_string());
    for e in entries {
        lines.push(format!(
            "{},{},{},{},{}",
            e.entry_number,
            iso8601(&e.time),
            e.from_callsign,
            e.to_callsign,
            quote(&e.message)
        ));
    }
    lines.join("\n")
}

/// Wraps `field` in double quotes, doubling any embedded quotes.
pub fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Suggested CSV file name: `<Net_Name>_<YYYY-MM-DD>.csv`.
pub fn csv_file_name(session: &Session, date: NaiveDate) -> String {
    format!("{}_{}.csv", file_stem(&session.name), date.format("%Y-%m-%d"))
}

/// Suggested PDF file name: `ICS309_<Net_Name>_<YYYY-MM-DD>.pdf`.
pub fn pdf_file_name(session: &Session, date: NaiveDate) -> String {
    format!("ICS309_{}_{}.pdf", file_stem(&session.name), date.format("%Y-%m-%d"))
}

/// Formats an elapsed duration as `HH:MM:SS`; hours are not wrapped.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

// Whitespace runs collapse to a single underscore.
fn file_stem(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join("_")
}
