use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::model::ids::{ParticipantId, QuizId};
use crate::model::quiz::{ModuleKey, QuizDefinition, QuizKind};
use crate::scoring::{Scorecard, percentage};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AttemptError {
    #[error("an attempt must cover at least one question")]
    NoQuestions,

    #[error("score {score} exceeds total questions {total}")]
    ScoreExceedsTotal { score: u32, total: u32 },

    #[error("percentage {percentage} does not match score {score}/{total}")]
    PercentageMismatch { score: u32, total: u32, percentage: u8 },

    #[error("too many questions for a single attempt: {len}")]
    TooManyQuestions { len: usize },

    #[error("only passed Post Test attempts can carry an expiry")]
    UnexpectedExpiry,

    #[error("expiry is before completion")]
    InvalidExpiry,
}

//
// ─── ANSWERS ───────────────────────────────────────────────────────────────────
//

/// Chosen option per displayed question position.
///
/// Positions refer to the order questions were displayed in one attempt, and
/// option indices refer to that attempt's shuffled option order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Answers(BTreeMap<usize, usize>);

impl Answers {
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Record (or change) the answer for a displayed position.
    pub fn choose(&mut self, position: usize, option: usize) {
        self.0.insert(position, option);
    }

    #[must_use]
    pub fn get(&self, position: usize) -> Option<usize> {
        self.0.get(&position).copied()
    }

    /// Positions in `0..total` without an answer.
    #[must_use]
    pub fn unanswered(&self, total: usize) -> Vec<usize> {
        (0..total).filter(|p| !self.0.contains_key(p)).collect()
    }

    #[must_use]
    pub fn is_complete(&self, total: usize) -> bool {
        (0..total).all(|p| self.0.contains_key(&p))
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.0.iter().map(|(p, o)| (*p, *o))
    }
}

impl FromIterator<(usize, usize)> for Answers {
    fn from_iter<T: IntoIterator<Item = (usize, usize)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

//
// ─── QUIZ REFERENCE ────────────────────────────────────────────────────────────
//

/// What an attempt was taken against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuizRef {
    pub quiz_id: QuizId,
    pub module: ModuleKey,
    pub kind: QuizKind,
}

impl QuizRef {
    #[must_use]
    pub fn of(quiz: &QuizDefinition) -> Self {
        Self {
            quiz_id: quiz.id(),
            module: quiz.module().clone(),
            kind: quiz.kind(),
        }
    }
}

//
// ─── ATTEMPT RECORD ────────────────────────────────────────────────────────────
//

/// One finished attempt. Records are appended, never updated or merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    participant: ParticipantId,
    quiz: QuizRef,
    answers: Answers,
    score: u32,
    total_questions: u32,
    percentage: u8,
    passed: bool,
    completed_at: DateTime<Utc>,
    expiry_at: Option<DateTime<Utc>>,
}

impl AttemptRecord {
    /// Build a record from a freshly computed scorecard.
    #[must_use]
    pub fn from_scorecard(
        participant: ParticipantId,
        quiz: QuizRef,
        answers: Answers,
        scorecard: &Scorecard,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            participant,
            quiz,
            answers,
            score: scorecard.score,
            total_questions: scorecard.total_questions,
            percentage: scorecard.percentage,
            passed: scorecard.passed,
            completed_at,
            expiry_at: scorecard.expiry_at,
        }
    }

    /// Rehydrate a record from storage, checking the scoring invariants.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError` if the counts, percentage or expiry are inconsistent.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        participant: ParticipantId,
        quiz: QuizRef,
        answers: Answers,
        score: u32,
        total_questions: u32,
        percentage_value: u8,
        passed: bool,
        completed_at: DateTime<Utc>,
        expiry_at: Option<DateTime<Utc>>,
    ) -> Result<Self, AttemptError> {
        if total_questions == 0 {
            return Err(AttemptError::NoQuestions);
        }
        if score > total_questions {
            return Err(AttemptError::ScoreExceedsTotal {
                score,
                total: total_questions,
            });
        }
        if percentage(score, total_questions) != percentage_value {
            return Err(AttemptError::PercentageMismatch {
                score,
                total: total_questions,
                percentage: percentage_value,
            });
        }
        if let Some(expiry) = expiry_at {
            if !passed || quiz.kind != QuizKind::PostTest {
                return Err(AttemptError::UnexpectedExpiry);
            }
            if expiry < completed_at {
                return Err(AttemptError::InvalidExpiry);
            }
        }

        Ok(Self {
            participant,
            quiz,
            answers,
            score,
            total_questions,
            percentage: percentage_value,
            passed,
            completed_at,
            expiry_at,
        })
    }

    #[must_use]
    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    #[must_use]
    pub fn quiz(&self) -> &QuizRef {
        &self.quiz
    }

    #[must_use]
    pub fn quiz_id(&self) -> QuizId {
        self.quiz.quiz_id
    }

    #[must_use]
    pub fn kind(&self) -> QuizKind {
        self.quiz.kind
    }

    #[must_use]
    pub fn module(&self) -> &ModuleKey {
        &self.quiz.module
    }

    #[must_use]
    pub fn answers(&self) -> &Answers {
        &self.answers
    }

    #[must_use]
    pub fn score(&self) -> u32 {
        self.score
    }

    #[must_use]
    pub fn total_questions(&self) -> u32 {
        self.total_questions
    }

    #[must_use]
    pub fn percentage(&self) -> u8 {
        self.percentage
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.passed
    }

    #[must_use]
    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    #[must_use]
    pub fn expiry_at(&self) -> Option<DateTime<Utc>> {
        self.expiry_at
    }

    /// True while the attempt's certificate window is still open (or has no end).
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry_at.is_none_or(|expiry| expiry > now)
    }

    /// A passed attempt whose certificate window has closed.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.passed && !self.is_valid_at(now)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
