use std::env;

use quiz_core::ParticipantMatching;
use quiz_core::gate::DEFAULT_LOCKOUT_FAILED_ATTEMPTS;

/// Failed Post Test attempts before the lockout engages.
pub const LOCKOUT_FAILURES_ENV: &str = "QUIZ_LOCKOUT_FAILURES";
/// `exact` or `legacy-fuzzy`.
pub const PARTICIPANT_MATCHING_ENV: &str = "QUIZ_PARTICIPANT_MATCHING";

/// Tunables of the attempt engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub lockout_failed_attempts: usize,
    pub participant_matching: ParticipantMatching,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lockout_failed_attempts: DEFAULT_LOCKOUT_FAILED_ATTEMPTS,
            participant_matching: ParticipantMatching::Exact,
        }
    }
}

impl EngineConfig {
    /// Read overrides from the environment. Malformed values keep the default
    /// and log a warning.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(LOCKOUT_FAILURES_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.lockout_failed_attempts = n,
                _ => tracing::warn!(
                    value = %raw,
                    default = config.lockout_failed_attempts,
                    "ignoring invalid {LOCKOUT_FAILURES_ENV}"
                ),
            }
        }

        if let Some(raw) = lookup(PARTICIPANT_MATCHING_ENV) {
            match raw.parse::<ParticipantMatching>() {
                Ok(mode) => config.participant_matching = mode,
                Err(err) => tracing::warn!(%err, "ignoring invalid {PARTICIPANT_MATCHING_ENV}"),
            }
        }

        config
    }

    #[must_use]
    pub fn with_lockout_failed_attempts(mut self, attempts: usize) -> Self {
        self.lockout_failed_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_participant_matching(mut self, matching: ParticipantMatching) -> Self {
        self.participant_matching = matching;
        self
    }
}
