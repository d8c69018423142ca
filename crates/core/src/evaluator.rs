//! Folds one participant's attempt history for a module into `ModuleProgress`.

use chrono::{DateTime, Utc};

use crate::history::AttemptHistory;
use crate::model::{ModuleProgress, QuizKind};

/// Pure progress fold. Holds no state; the same history and `now` always
/// produce the same progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressEvaluator;

impl ProgressEvaluator {
    /// Evaluate progress for one module.
    ///
    /// `history` must contain only this participant's attempts for this
    /// module. `has_pre_test` is false when the module defines no playable
    /// Pre Test, in which case the Pre Test requirement counts as met.
    #[must_use]
    pub fn evaluate(
        history: &AttemptHistory,
        has_pre_test: bool,
        now: DateTime<Utc>,
    ) -> ModuleProgress {
        let mut progress = ModuleProgress::default();

        let latest_post = history.latest(QuizKind::PostTest);
        if let Some(post) = latest_post {
            let valid = post.is_valid_at(now);
            progress.post_test_passed = post.passed() && valid;
            progress.post_test_expired = post.passed() && !valid;
            progress.post_test_score = Some(post.percentage());
            progress.post_test_completed_at = Some(post.completed_at());
            progress.post_test_expiry_at = post.expiry_at();
        }

        if let Some(pre) = history.latest(QuizKind::PreTest) {
            // After expiry only a Pre Test retaken later counts again.
            let honored = match latest_post {
                Some(post) if progress.post_test_expired => pre.completed_at() > post.completed_at(),
                _ => true,
            };
            if honored {
                progress.pre_test_passed = pre.passed();
                progress.pre_test_score = Some(pre.percentage());
                progress.pre_test_completed_at = Some(pre.completed_at());
            }
        }

        if !has_pre_test {
            progress.pre_test_passed = true;
        }

        progress
    }
}
