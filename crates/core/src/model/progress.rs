use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derived per-module progress of one participant.
///
/// Recomputed from attempt history on demand; never the source of truth.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleProgress {
    pub pre_test_passed: bool,
    pub pre_test_score: Option<u8>,
    pub pre_test_completed_at: Option<DateTime<Utc>>,
    pub post_test_passed: bool,
    pub post_test_score: Option<u8>,
    pub post_test_completed_at: Option<DateTime<Utc>>,
    pub post_test_expiry_at: Option<DateTime<Utc>>,
    pub post_test_expired: bool,
}

impl ModuleProgress {
    /// Both quizzes currently count as passed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.pre_test_passed && self.post_test_passed
    }

    /// A certificate can be issued for this module right now.
    #[must_use]
    pub fn has_valid_certificate(&self) -> bool {
        self.post_test_passed && !self.post_test_expired
    }
}
