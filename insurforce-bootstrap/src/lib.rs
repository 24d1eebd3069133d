//! Insurforce bootstrap CLI library
//!
//! The binary (main.rs) parses arguments and talks to the database; the
//! rendering of its summaries lives here so it can be tested.

pub mod report;
