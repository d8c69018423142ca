use chrono::{DateTime, Utc};

use quiz_core::Clock;
use storage::repository::{StorageError, TimerKey, TimerStore};

/// Wall-clock countdown for one attempt.
///
/// Only the stored start instant matters: remaining time is recomputed from
/// the clock on every poll, so reloads and suspended sessions resume
/// correctly, and leaving the attempt does not pause it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptTimer {
    key: TimerKey,
    duration_secs: u64,
    started_at: DateTime<Utc>,
    expired: bool,
}

impl AttemptTimer {
    /// Resume the countdown stored under `key`, or start one now.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the timer store cannot be read or written.
    pub async fn resume_or_start(
        store: &dyn TimerStore,
        key: TimerKey,
        duration_secs: u64,
        clock: &Clock,
    ) -> Result<Self, StorageError> {
        let started_at = match store.get_timer_start(&key).await? {
            Some(started_at) => {
                tracing::debug!(%key, %started_at, "resuming countdown");
                started_at
            }
            None => {
                let now = clock.now();
                store.set_timer_start(&key, now).await?;
                tracing::debug!(%key, duration_secs, "started countdown");
                now
            }
        };
        Ok(Self {
            key,
            duration_secs,
            started_at,
            expired: false,
        })
    }

    #[must_use]
    pub fn key(&self) -> &TimerKey {
        &self.key
    }

    #[must_use]
    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Seconds left, never below zero.
    #[must_use]
    pub fn remaining(&self, clock: &Clock) -> u64 {
        self.duration_secs
            .saturating_sub(clock.seconds_since(self.started_at))
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// Mark the countdown expired if time is up. Returns true only on the
    /// call that performs the transition.
    pub fn expire(&mut self, clock: &Clock) -> bool {
        if self.expired || self.remaining(clock) > 0 {
            return false;
        }
        self.expired = true;
        true
    }

    /// Delete the stored start instant.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the timer store cannot be written.
    pub async fn clear(&self, store: &dyn TimerStore) -> Result<(), StorageError> {
        store.clear_timer(&self.key).await
    }
}
