use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use quiz_core::model::{
    Answers, AttemptId, AttemptRecord, ParticipantId, Question, QuizDefinition, QuizRef,
};
use quiz_core::scoring::Scorecard;
use storage::repository::{AttemptRepository, TimerKey, TimerStore};

use crate::error::EngineError;

/// What finished the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitTrigger {
    Participant,
    TimeLimit,
}

/// A persisted attempt together with its storage id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedAttempt {
    pub id: AttemptId,
    pub record: AttemptRecord,
    pub trigger: SubmitTrigger,
}

/// Scores finished attempts and appends them to the attempt store.
///
/// Every call appends a new record; repeated submissions are never merged.
#[derive(Clone)]
pub struct ResultRecorder {
    attempts: Arc<dyn AttemptRepository>,
    timers: Arc<dyn TimerStore>,
}

impl ResultRecorder {
    #[must_use]
    pub fn new(attempts: Arc<dyn AttemptRepository>, timers: Arc<dyn TimerStore>) -> Self {
        Self { attempts, timers }
    }

    /// Score `answers` against `displayed`, persist the record and clear the
    /// attempt's countdown key.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Attempt` if nothing was displayed, and
    /// `EngineError::Infrastructure` if the record cannot be appended.
    #[allow(clippy::too_many_arguments)]
    pub async fn finalize(
        &self,
        participant: &ParticipantId,
        quiz: &QuizDefinition,
        displayed: &[Question],
        answers: Answers,
        timer: Option<&TimerKey>,
        trigger: SubmitTrigger,
        completed_at: DateTime<Utc>,
    ) -> Result<SubmittedAttempt, EngineError> {
        let scorecard = Scorecard::compute(quiz, displayed, &answers, completed_at)?;
        let record = AttemptRecord::from_scorecard(
            participant.clone(),
            QuizRef::of(quiz),
            answers,
            &scorecard,
            completed_at,
        );

        let id = self.attempts.append_attempt(&record).await?;
        tracing::info!(
            attempt = %id,
            quiz = %quiz.id(),
            participant = %participant,
            kind = %quiz.kind(),
            percentage = record.percentage(),
            passed = record.passed(),
            ?trigger,
            "recorded attempt"
        );

        if let Some(key) = timer {
            // The record is already stored; a stale key only affects the next start.
            if let Err(err) = self.timers.clear_timer(key).await {
                tracing::warn!(%key, %err, "failed to clear countdown after submission");
            }
        }

        Ok(SubmittedAttempt {
            id,
            record,
            trigger,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_core::model::{ModuleKey, QuizDraft, QuizId, QuizKind};
    use quiz_core::time::fixed_now;
    use storage::repository::{AttemptScope, InMemoryRepository};

    fn post_test() -> QuizDefinition {
        let questions = (0..4)
            .map(|i| {
                Question::new(format!("Q{i}"), vec!["right".into(), "wrong".into()], 0).unwrap()
            })
            .collect();
        let mut draft =
            QuizDraft::new(ModuleKey::new("BAIM", "BAIM 1").unwrap(), QuizKind::PostTest, questions);
        draft.certificate_validity_days = Some(7);
        draft.time_limit_minutes = Some(5);
        draft.validate(QuizId::new(2)).unwrap()
    }

    fn recorder(repo: &InMemoryRepository) -> ResultRecorder {
        ResultRecorder::new(Arc::new(repo.clone()), Arc::new(repo.clone()))
    }

    #[tokio::test]
    async fn finalize_scores_persists_and_clears_timer() {
        let repo = InMemoryRepository::new();
        let quiz = post_test();
        let participant = ParticipantId::new("Ana");
        let key = TimerKey::new(quiz.id(), participant.clone());
        repo.set_timer_start(&key, fixed_now()).await.unwrap();

        let answers: Answers = [(0, 0), (1, 0), (2, 0), (3, 1)].into_iter().collect();
        let submitted = recorder(&repo)
            .finalize(
                &participant,
                &quiz,
                quiz.questions(),
                answers,
                Some(&key),
                SubmitTrigger::Participant,
                fixed_now(),
            )
            .await
            .unwrap();

        assert_eq!(submitted.record.score(), 3);
        assert_eq!(submitted.record.percentage(), 75);
        assert!(submitted.record.passed());
        assert_eq!(
            submitted.record.expiry_at(),
            Some(fixed_now() + chrono::Duration::days(7))
        );
        assert_eq!(repo.get_timer_start(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn repeated_finalize_appends_distinct_records() {
        let repo = InMemoryRepository::new();
        let quiz = post_test();
        let participant = ParticipantId::new("Ana");
        let recorder = recorder(&repo);

        let mut ids = Vec::new();
        for trigger in [SubmitTrigger::Participant, SubmitTrigger::TimeLimit] {
            let submitted = recorder
                .finalize(
                    &participant,
                    &quiz,
                    quiz.questions(),
                    Answers::new(),
                    None,
                    trigger,
                    fixed_now(),
                )
                .await
                .unwrap();
            assert!(!submitted.record.passed());
            ids.push(submitted.id);
        }

        assert_ne!(ids[0], ids[1]);
        let stored = repo
            .list_attempts(Some(&participant), &AttemptScope::All)
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
    }
}
