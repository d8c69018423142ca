//! Decides whether a participant may start an attempt.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::history::AttemptHistory;
use crate::model::{ModuleProgress, ModuleQuizzes, QuizDefinition, QuizKind};

/// Failed Post Test attempts that trigger a lockout.
pub const DEFAULT_LOCKOUT_FAILED_ATTEMPTS: usize = 2;

//
// ─── DECISIONS ─────────────────────────────────────────────────────────────────
//

/// Why an attempt may not start. These are expected, user-facing outcomes.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum BlockReason {
    #[error(
        "the Pre Test must be passed first (minimum {minimum_score}%{})",
        latest_suffix(.latest_pre_test_score)
    )]
    NeedsPreTest {
        minimum_score: u8,
        latest_pre_test_score: Option<u8>,
    },

    #[error("the Post Test is locked after {failed_attempts} failed attempts; pass the Pre Test again to unlock")]
    PostTestLocked { failed_attempts: usize },
}

fn latest_suffix(score: &Option<u8>) -> String {
    score.map(|s| format!(", latest {s}%")).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateDecision {
    Allowed,
    Blocked(BlockReason),
}

impl GateDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allowed)
    }

    #[must_use]
    pub fn block_reason(&self) -> Option<&BlockReason> {
        match self {
            GateDecision::Allowed => None,
            GateDecision::Blocked(reason) => Some(reason),
        }
    }
}

//
// ─── GATE ──────────────────────────────────────────────────────────────────────
//

/// Attempt gate. Deciding has no side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptGate {
    lockout_failed_attempts: usize,
}

impl Default for AttemptGate {
    fn default() -> Self {
        Self::new(DEFAULT_LOCKOUT_FAILED_ATTEMPTS)
    }
}

impl AttemptGate {
    /// A threshold of zero is treated as one.
    #[must_use]
    pub fn new(lockout_failed_attempts: usize) -> Self {
        Self {
            lockout_failed_attempts: lockout_failed_attempts.max(1),
        }
    }

    #[must_use]
    pub fn lockout_failed_attempts(&self) -> usize {
        self.lockout_failed_attempts
    }

    /// Decide whether `quiz` may be started.
    ///
    /// `module` holds the quizzes defined for the quiz's module, `progress` is
    /// the evaluated progress for that module and `history` the participant's
    /// attempts within it.
    #[must_use]
    pub fn decide(
        &self,
        quiz: &QuizDefinition,
        module: &ModuleQuizzes,
        progress: &ModuleProgress,
        history: &AttemptHistory,
    ) -> GateDecision {
        if quiz.kind() == QuizKind::PreTest {
            return GateDecision::Allowed;
        }
        let Some(pre_test) = module.pre_test.as_ref().filter(|_| module.has_pre_test()) else {
            return GateDecision::Allowed;
        };

        if !progress.pre_test_passed {
            return GateDecision::Blocked(BlockReason::NeedsPreTest {
                minimum_score: pre_test.minimum_pass_score(),
                latest_pre_test_score: history
                    .latest(QuizKind::PreTest)
                    .map(|attempt| attempt.percentage()),
            });
        }

        let attempts: Vec<_> = history.for_quiz(quiz.id()).collect();
        let failed = attempts.iter().filter(|attempt| !attempt.passed()).count();
        if attempts.len() < self.lockout_failed_attempts || failed < self.lockout_failed_attempts {
            return GateDecision::Allowed;
        }

        let released = attempts.last().is_some_and(|last| {
            history.passed_after(QuizKind::PreTest, last.completed_at())
        });
        if released {
            GateDecision::Allowed
        } else {
            GateDecision::Blocked(BlockReason::PostTestLocked {
                failed_attempts: failed,
            })
        }
    }
}
