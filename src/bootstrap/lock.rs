//! Advisory-lock based bootstrap locking
//!
//! Application instances started together would otherwise race to create
//! the same tables and constraints. The lock is a session-level PostgreSQL
//! advisory lock, so it disappears with the session even if the process dies.

use std::time::{Duration, Instant};

use crate::executor::SqlExecutor;

use super::error::BootstrapError;

/// Advisory lock key reserved for the bootstrap
pub const BOOTSTRAP_LOCK_KEY: i64 = 0x1A5E_F0CE;

/// Delay between lock attempts
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Guard that holds the bootstrap lock until dropped
pub struct BootstrapLock<'a> {
    executor: &'a dyn SqlExecutor,
}

impl<'a> BootstrapLock<'a> {
    /// Poll `pg_try_advisory_lock` until it succeeds or `timeout` elapses
    ///
    /// # Errors
    ///
    /// Returns `BootstrapError::LockTimeout` when another session keeps the
    /// lock for longer than `timeout`, or `BootstrapError::Database` when the
    /// lock query itself fails.
    pub fn acquire(
        executor: &'a dyn SqlExecutor,
        timeout: Duration,
    ) -> Result<Self, BootstrapError> {
        let start = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if try_lock(executor)? {
                log::info!("Bootstrap lock acquired after {attempts} attempt(s)");
                return Ok(Self { executor });
            }

            if start.elapsed() >= timeout {
                return Err(BootstrapError::LockTimeout(format!(
                    "lock {BOOTSTRAP_LOCK_KEY} still held by another session after {}s; \
                     another instance may be bootstrapping the schema",
                    timeout.as_secs()
                )));
            }
            if attempts == 1 {
                log::info!("Waiting for another instance to finish bootstrapping");
            }
            may::coroutine::sleep(POLL_INTERVAL);
        }
    }

    pub fn executor(&self) -> &'a dyn SqlExecutor {
        self.executor
    }
}

impl Drop for BootstrapLock<'_> {
    fn drop(&mut self) {
        match self.executor.query_strings(
            "SELECT pg_advisory_unlock($1)::text",
            &[&BOOTSTRAP_LOCK_KEY],
        ) {
            Ok(_) => log::debug!("Bootstrap lock released"),
            Err(e) => log::warn!("Failed to release bootstrap lock: {e}"),
        }
    }
}

fn try_lock(executor: &dyn SqlExecutor) -> Result<bool, BootstrapError> {
    let rows = executor.query_strings(
        "SELECT pg_try_advisory_lock($1)::text",
        &[&BOOTSTRAP_LOCK_KEY],
    )?;
    Ok(rows.first().is_some_and(|v| v == "true"))
}
