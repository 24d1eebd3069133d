//! `tracing` span helpers (enabled with the `tracing` feature).
//!
//! Log lines go through the `log` facade; spans give subscribers the phase
//! and statement structure of a bootstrap run.

use tracing::{span, Level, Span};

/// Longest SQL prefix recorded on a statement span
const SQL_PREVIEW_LEN: usize = 120;

pub fn connect_span() -> Span {
    span!(Level::INFO, "insurforce.connect")
}

pub fn bootstrap_span(catalog_checksum: &str) -> Span {
    span!(Level::INFO, "insurforce.bootstrap", catalog = %catalog_checksum)
}

pub fn phase_span(phase: &'static str) -> Span {
    span!(Level::INFO, "insurforce.phase", phase)
}

pub fn transaction_span(action: &'static str) -> Span {
    span!(Level::DEBUG, "insurforce.transaction", action)
}

pub fn statement_span(sql: &str) -> Span {
    span!(Level::DEBUG, "insurforce.statement", sql = %sql_preview(sql))
}

fn sql_preview(sql: &str) -> &str {
    match sql.char_indices().nth(SQL_PREVIEW_LEN) {
        Some((idx, _)) => &sql[..idx],
        None => sql,
    }
}
