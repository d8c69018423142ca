use rand::Rng;
use rand::rngs::ThreadRng;
use rand::seq::SliceRandom;

use quiz_core::model::{Question, QuizError};

/// Picks and shuffles the questions shown in one attempt.
///
/// Question order is always shuffled. When `questions_to_display` is smaller
/// than the bank, the shuffled bank is truncated, which yields a uniform
/// random subset. Options of every selected question are shuffled
/// independently and the correct index is relocated by option text, so the
/// result can be scored without the original bank.
pub struct QuestionSampler<R> {
    rng: R,
}

impl QuestionSampler<ThreadRng> {
    #[must_use]
    pub fn thread_local() -> Self {
        Self::with_rng(rand::rng())
    }
}

impl<R: Rng> QuestionSampler<R> {
    #[must_use]
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    /// Sample the displayed questions for one attempt.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::EmptyBank` for an empty bank and
    /// `QuizError::CorrectOptionOutOfRange` if a question's correct option
    /// cannot be located after shuffling.
    pub fn sample(
        &mut self,
        bank: &[Question],
        questions_to_display: Option<u32>,
    ) -> Result<Vec<Question>, QuizError> {
        if bank.is_empty() {
            return Err(QuizError::EmptyBank);
        }

        let mut selected = bank.to_vec();
        selected.shuffle(&mut self.rng);
        if let Some(limit) = questions_to_display.filter(|n| *n > 0) {
            selected.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }

        selected
            .iter()
            .enumerate()
            .map(|(position, question)| self.shuffle_options(position, question))
            .collect()
    }

    fn shuffle_options(&mut self, position: usize, question: &Question) -> Result<Question, QuizError> {
        let mut options = question.options().to_vec();
        options.shuffle(&mut self.rng);
        question
            .with_options(options)
            .ok_or(QuizError::CorrectOptionOutOfRange {
                position,
                index: question.correct_option(),
                count: question.options().len(),
            })
    }
}
