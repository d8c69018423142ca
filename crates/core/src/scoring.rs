//! Scoring of a finished attempt against the questions it displayed.

use chrono::{DateTime, Duration, Utc};

use crate::model::{AttemptError, Answers, Question, QuizDefinition};

/// `round(100 * score / total)` with halves rounded up. Zero totals score 0.
#[must_use]
pub fn percentage(score: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let score = u64::from(score.min(total));
    let total = u64::from(total);
    let rounded = (200 * score + total) / (2 * total);
    u8::try_from(rounded).unwrap_or(100)
}

/// Certificate expiry for a passed attempt, when the quiz issues expiring certificates.
#[must_use]
pub fn certificate_expiry(
    validity: Option<Duration>,
    passed: bool,
    completed_at: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if !passed {
        return None;
    }
    validity.and_then(|window| completed_at.checked_add_signed(window))
}

/// Outcome of scoring one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scorecard {
    pub score: u32,
    pub total_questions: u32,
    pub percentage: u8,
    pub passed: bool,
    pub expiry_at: Option<DateTime<Utc>>,
}

impl Scorecard {
    /// Score `answers` against the questions exactly as they were displayed.
    ///
    /// Unanswered positions and out-of-range option indices count as wrong.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::NoQuestions` for an empty question list and
    /// `AttemptError::TooManyQuestions` if the count does not fit in `u32`.
    pub fn compute(
        quiz: &QuizDefinition,
        displayed: &[Question],
        answers: &Answers,
        completed_at: DateTime<Utc>,
    ) -> Result<Self, AttemptError> {
        if displayed.is_empty() {
            return Err(AttemptError::NoQuestions);
        }
        let total_questions = u32::try_from(displayed.len())
            .map_err(|_| AttemptError::TooManyQuestions { len: displayed.len() })?;

        let mut score = 0_u32;
        for (position, question) in displayed.iter().enumerate() {
            if answers.get(position) == Some(question.correct_option()) {
                score = score.saturating_add(1);
            }
        }

        let percentage = percentage(score, total_questions);
        let passed = percentage >= quiz.minimum_pass_score();
        let expiry_at = certificate_expiry(quiz.certificate_validity(), passed, completed_at);

        Ok(Self {
            score,
            total_questions,
            percentage,
            passed,
            expiry_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModuleKey, QuizDraft, QuizId, QuizKind};
    use crate::time::fixed_now;

    fn bank(n: usize) -> Vec<Question> {
        (0..n)
            .map(|i| {
                Question::new(
                    format!("Q{i}"),
                    vec!["a".into(), "b".into(), "c".into(), "d".into()],
                    i % 4,
                )
                .unwrap()
            })
            .collect()
    }

    fn quiz(kind: QuizKind, n: usize, validity: Option<u32>) -> QuizDefinition {
        let mut draft = QuizDraft::new(ModuleKey::new("BAIM", "BAIM 1").unwrap(), kind, bank(n));
        draft.certificate_validity_days = validity;
        draft.validate(QuizId::new(1)).unwrap()
    }

    fn answer_first(questions: &[Question], correct: usize) -> Answers {
        questions
            .iter()
            .enumerate()
            .map(|(i, q)| {
                let chosen = if i < correct {
                    q.correct_option()
                } else {
                    (q.correct_option() + 1) % q.options().len()
                };
                (i, chosen)
            })
            .collect()
    }

    #[test]
    fn percentage_rounds_half_up() {
        assert_eq!(percentage(0, 3), 0);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 8), 13);
        assert_eq!(percentage(3, 3), 100);
        assert_eq!(percentage(0, 0), 0);
    }

    #[test]
    fn percentage_stays_within_bounds() {
        for total in 1..=40 {
            for score in 0..=total {
                let p = percentage(score, total);
                assert!(p <= 100);
                let expected = (100.0 * f64::from(score) / f64::from(total)).round();
                assert!((f64::from(p) - expected).abs() < f64::EPSILON);
            }
        }
    }

    #[test]
    fn exact_threshold_passes_and_one_below_fails() {
        let q = quiz(QuizKind::PreTest, 100, None);
        let displayed = q.questions();

        let at = Scorecard::compute(&q, displayed, &answer_first(displayed, 70), fixed_now()).unwrap();
        assert_eq!(at.percentage, 70);
        assert!(at.passed);

        let below =
            Scorecard::compute(&q, displayed, &answer_first(displayed, 69), fixed_now()).unwrap();
        assert_eq!(below.percentage, 69);
        assert!(!below.passed);
    }

    #[test]
    fn unanswered_questions_score_as_wrong() {
        let q = quiz(QuizKind::PreTest, 4, None);
        let mut answers = Answers::new();
        answers.choose(0, q.questions()[0].correct_option());
        let card = Scorecard::compute(&q, q.questions(), &answers, fixed_now()).unwrap();
        assert_eq!(card.score, 1);
        assert_eq!(card.percentage, 25);
    }

    #[test]
    fn passed_post_test_gets_expiry() {
        let q = quiz(QuizKind::PostTest, 2, Some(7));
        let all = answer_first(q.questions(), 2);
        let card = Scorecard::compute(&q, q.questions(), &all, fixed_now()).unwrap();
        assert_eq!(card.expiry_at, Some(fixed_now() + Duration::days(7)));

        let none = answer_first(q.questions(), 0);
        let failed = Scorecard::compute(&q, q.questions(), &none, fixed_now()).unwrap();
        assert_eq!(failed.expiry_at, None);
    }

    #[test]
    fn pre_test_never_expires() {
        let q = quiz(QuizKind::PreTest, 2, Some(7));
        let all = answer_first(q.questions(), 2);
        let card = Scorecard::compute(&q, q.questions(), &all, fixed_now()).unwrap();
        assert!(card.passed);
        assert_eq!(card.expiry_at, None);
    }

    #[test]
    fn empty_display_is_rejected() {
        let q = quiz(QuizKind::PreTest, 2, None);
        let err = Scorecard::compute(&q, &[], &Answers::new(), fixed_now()).unwrap_err();
        assert_eq!(err, AttemptError::NoQuestions);
    }
}
