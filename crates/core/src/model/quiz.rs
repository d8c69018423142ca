use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::QuizId;

/// Pass threshold applied when a quiz does not configure one.
pub const DEFAULT_MINIMUM_PASS_SCORE: u8 = 70;

/// A question needs at least this many options to be answerable.
pub const MIN_OPTIONS_PER_QUESTION: usize = 2;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuizError {
    #[error("training title cannot be empty")]
    EmptyTrainingTitle,

    #[error("module title cannot be empty")]
    EmptyModuleTitle,

    #[error("quiz has no questions")]
    EmptyBank,

    #[error("question {position} has an empty prompt")]
    EmptyPrompt { position: usize },

    #[error("question {position} needs at least 2 options, found {count}")]
    TooFewOptions { position: usize, count: usize },

    #[error("question {position} has an empty option")]
    EmptyOption { position: usize },

    #[error("question {position} repeats the option text {text:?}")]
    DuplicateOption { position: usize, text: String },

    #[error("question {position} marks option {index} correct but has {count} options")]
    CorrectOptionOutOfRange {
        position: usize,
        index: usize,
        count: usize,
    },

    #[error("minimum pass score must be between 0 and 100, got {0}")]
    InvalidPassScore(u8),

    #[error("questions to display must be > 0")]
    InvalidQuestionsToDisplay,

    #[error("time limit must be > 0 minutes")]
    InvalidTimeLimit,

    #[error("certificate validity must be > 0 days")]
    InvalidValidityDays,

    #[error("unknown quiz kind: {0}")]
    UnknownKind(String),
}

//
// ─── QUIZ KIND ─────────────────────────────────────────────────────────────────
//

/// The two quizzes a module can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuizKind {
    PreTest,
    PostTest,
}

impl QuizKind {
    /// Stable storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            QuizKind::PreTest => "pre_test",
            QuizKind::PostTest => "post_test",
        }
    }

    /// Human label used in confirmations and reports.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            QuizKind::PreTest => "Pre Test",
            QuizKind::PostTest => "Post Test",
        }
    }
}

impl fmt::Display for QuizKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for QuizKind {
    type Err = QuizError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pre_test" | "pre test" | "pre" => Ok(QuizKind::PreTest),
            "post_test" | "post test" | "post" => Ok(QuizKind::PostTest),
            other => Err(QuizError::UnknownKind(other.to_owned())),
        }
    }
}

//
// ─── MODULE KEY ────────────────────────────────────────────────────────────────
//

/// Identifies one training module: a training title plus a module title.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleKey {
    training_title: String,
    module_title: String,
}

impl ModuleKey {
    /// # Errors
    ///
    /// Returns `QuizError` if either title is blank.
    pub fn new(
        training_title: impl Into<String>,
        module_title: impl Into<String>,
    ) -> Result<Self, QuizError> {
        let training_title = training_title.into().trim().to_owned();
        let module_title = module_title.into().trim().to_owned();
        if training_title.is_empty() {
            return Err(QuizError::EmptyTrainingTitle);
        }
        if module_title.is_empty() {
            return Err(QuizError::EmptyModuleTitle);
        }
        Ok(Self {
            training_title,
            module_title,
        })
    }

    #[must_use]
    pub fn training_title(&self) -> &str {
        &self.training_title
    }

    #[must_use]
    pub fn module_title(&self) -> &str {
        &self.module_title
    }

    /// First run of digits in the module title ("BAIM 12" -> 12).
    #[must_use]
    pub fn module_number(&self) -> Option<u64> {
        let digits: String = self
            .module_title
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(char::is_ascii_digit)
            .collect();
        digits.parse().ok()
    }

    /// Ordering used when listing the modules of a training.
    ///
    /// Numbered modules come first in numeric order, the rest follow by title.
    #[must_use]
    pub fn display_order(&self) -> (u64, &str) {
        (self.module_number().unwrap_or(u64::MAX), &self.module_title)
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.training_title, self.module_title)
    }
}

//
// ─── QUESTION ──────────────────────────────────────────────────────────────────
//

/// One multiple-choice question.
///
/// `correct_option` indexes into this question's own `options`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    prompt: String,
    options: Vec<String>,
    correct_option: usize,
}

impl Question {
    /// Build and validate a question. `position` is only used for error context.
    ///
    /// # Errors
    ///
    /// Returns `QuizError` when the prompt is blank, there are fewer than two
    /// options, an option is blank or repeated, or the correct index is out of range.
    pub fn new(
        prompt: impl Into<String>,
        options: Vec<String>,
        correct_option: usize,
    ) -> Result<Self, QuizError> {
        let question = Self::from_persisted(prompt.into(), options, correct_option);
        question.check(0)?;
        Ok(question)
    }

    /// Rehydrate without validation; use `check` before serving it.
    #[must_use]
    pub fn from_persisted(prompt: String, options: Vec<String>, correct_option: usize) -> Self {
        Self {
            prompt,
            options,
            correct_option,
        }
    }

    /// Validate this question as the `position`-th entry of a bank.
    ///
    /// # Errors
    ///
    /// See [`Question::new`].
    pub fn check(&self, position: usize) -> Result<(), QuizError> {
        if self.prompt.trim().is_empty() {
            return Err(QuizError::EmptyPrompt { position });
        }
        let count = self.options.len();
        if count < MIN_OPTIONS_PER_QUESTION {
            return Err(QuizError::TooFewOptions { position, count });
        }
        for (i, option) in self.options.iter().enumerate() {
            if option.trim().is_empty() {
                return Err(QuizError::EmptyOption { position });
            }
            // Scoring after a shuffle locates the correct option by its text.
            if self.options[..i].contains(option) {
                return Err(QuizError::DuplicateOption {
                    position,
                    text: option.clone(),
                });
            }
        }
        if self.correct_option >= count {
            return Err(QuizError::CorrectOptionOutOfRange {
                position,
                index: self.correct_option,
                count,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub fn options(&self) -> &[String] {
        &self.options
    }

    #[must_use]
    pub fn correct_option(&self) -> usize {
        self.correct_option
    }

    /// Text of the correct option, if the index is in range.
    #[must_use]
    pub fn correct_text(&self) -> Option<&str> {
        self.options.get(self.correct_option).map(String::as_str)
    }

    /// Replace the option order, relocating the correct index by text.
    ///
    /// Returns `None` if the correct option text is not present in `options`.
    #[must_use]
    pub fn with_options(&self, options: Vec<String>) -> Option<Self> {
        let correct = self.correct_text()?;
        let correct_option = options.iter().position(|o| o == correct)?;
        Some(Self {
            prompt: self.prompt.clone(),
            options,
            correct_option,
        })
    }
}

//
// ─── QUIZ DRAFT ────────────────────────────────────────────────────────────────
//

/// Authoring input for a quiz. Becomes a `QuizDefinition` through `validate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizDraft {
    pub module: ModuleKey,
    pub kind: QuizKind,
    pub questions: Vec<Question>,
    pub questions_to_display: Option<u32>,
    pub minimum_pass_score: Option<u8>,
    pub time_limit_minutes: Option<u32>,
    pub certificate_validity_days: Option<u32>,
}

impl QuizDraft {
    #[must_use]
    pub fn new(module: ModuleKey, kind: QuizKind, questions: Vec<Question>) -> Self {
        Self {
            module,
            kind,
            questions,
            questions_to_display: None,
            minimum_pass_score: None,
            time_limit_minutes: None,
            certificate_validity_days: None,
        }
    }

    /// # Errors
    ///
    /// Returns the first `QuizError` found in the settings or the bank.
    pub fn validate(self, id: QuizId) -> Result<QuizDefinition, QuizError> {
        let quiz = QuizDefinition::from_persisted(
            id,
            self.module,
            self.kind,
            self.questions,
            self.questions_to_display,
            self.minimum_pass_score,
            self.time_limit_minutes,
            self.certificate_validity_days,
        );
        quiz.check_settings()?;
        quiz.ensure_playable()?;
        Ok(quiz)
    }
}

//
// ─── QUIZ DEFINITION ───────────────────────────────────────────────────────────
//

/// A quiz as served to participants. Immutable for the duration of an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizDefinition {
    id: QuizId,
    module: ModuleKey,
    kind: QuizKind,
    questions: Vec<Question>,
    questions_to_display: Option<u32>,
    minimum_pass_score: u8,
    time_limit_minutes: Option<u32>,
    certificate_validity_days: Option<u32>,
}

impl QuizDefinition {
    /// Rehydrate a quiz from storage without checking the question bank.
    ///
    /// A missing pass score resolves to [`DEFAULT_MINIMUM_PASS_SCORE`]; zero
    /// counts for display, time limit and validity are treated as unset.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn from_persisted(
        id: QuizId,
        module: ModuleKey,
        kind: QuizKind,
        questions: Vec<Question>,
        questions_to_display: Option<u32>,
        minimum_pass_score: Option<u8>,
        time_limit_minutes: Option<u32>,
        certificate_validity_days: Option<u32>,
    ) -> Self {
        Self {
            id,
            module,
            kind,
            questions,
            questions_to_display,
            minimum_pass_score: minimum_pass_score.unwrap_or(DEFAULT_MINIMUM_PASS_SCORE),
            time_limit_minutes,
            certificate_validity_days,
        }
    }

    fn check_settings(&self) -> Result<(), QuizError> {
        if self.minimum_pass_score > 100 {
            return Err(QuizError::InvalidPassScore(self.minimum_pass_score));
        }
        if self.questions_to_display == Some(0) {
            return Err(QuizError::InvalidQuestionsToDisplay);
        }
        if self.time_limit_minutes == Some(0) {
            return Err(QuizError::InvalidTimeLimit);
        }
        if self.certificate_validity_days == Some(0) {
            return Err(QuizError::InvalidValidityDays);
        }
        Ok(())
    }

    /// Checks that every question can be presented and scored.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::EmptyBank` or the first invalid question.
    pub fn ensure_playable(&self) -> Result<(), QuizError> {
        if self.questions.is_empty() {
            return Err(QuizError::EmptyBank);
        }
        if self.minimum_pass_score > 100 {
            return Err(QuizError::InvalidPassScore(self.minimum_pass_score));
        }
        for (position, question) in self.questions.iter().enumerate() {
            question.check(position)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn id(&self) -> QuizId {
        self.id
    }

    #[must_use]
    pub fn module(&self) -> &ModuleKey {
        &self.module
    }

    #[must_use]
    pub fn kind(&self) -> QuizKind {
        self.kind
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn questions_to_display(&self) -> Option<u32> {
        self.questions_to_display.filter(|n| *n > 0)
    }

    #[must_use]
    pub fn minimum_pass_score(&self) -> u8 {
        self.minimum_pass_score
    }

    #[must_use]
    pub fn time_limit_minutes(&self) -> Option<u32> {
        self.time_limit_minutes.filter(|m| *m > 0)
    }

    /// Countdown length in seconds, when the quiz is timed.
    #[must_use]
    pub fn time_limit_secs(&self) -> Option<u64> {
        self.time_limit_minutes().map(|m| u64::from(m) * 60)
    }

    #[must_use]
    pub fn certificate_validity_days(&self) -> Option<u32> {
        self.certificate_validity_days.filter(|d| *d > 0)
    }

    /// Certificate validity window. Only Post Tests issue certificates.
    #[must_use]
    pub fn certificate_validity(&self) -> Option<Duration> {
        match self.kind {
            QuizKind::PostTest => self
                .certificate_validity_days()
                .map(|d| Duration::days(i64::from(d))),
            QuizKind::PreTest => None,
        }
    }

    /// Number of questions one attempt presents.
    #[must_use]
    pub fn displayed_question_count(&self) -> usize {
        let total = self.questions.len();
        match self.questions_to_display() {
            Some(n) => usize::try_from(n).unwrap_or(usize::MAX).min(total),
            None => total,
        }
    }
}

//
// ─── MODULE QUIZZES ────────────────────────────────────────────────────────────
//

/// The Pre Test and Post Test defined for one module, either possibly absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleQuizzes {
    pub pre_test: Option<QuizDefinition>,
    pub post_test: Option<QuizDefinition>,
}

impl ModuleQuizzes {
    /// Group quizzes by kind. When a kind repeats, the lowest id wins.
    #[must_use]
    pub fn from_quizzes(quizzes: impl IntoIterator<Item = QuizDefinition>) -> Self {
        let mut out = Self::default();
        for quiz in quizzes {
            let slot = match quiz.kind() {
                QuizKind::PreTest => &mut out.pre_test,
                QuizKind::PostTest => &mut out.post_test,
            };
            if slot.as_ref().is_none_or(|existing| quiz.id() < existing.id()) {
                *slot = Some(quiz);
            }
        }
        out
    }

    /// A Pre Test only gates the Post Test when it actually has questions.
    #[must_use]
    pub fn has_pre_test(&self) -> bool {
        self.pre_test
            .as_ref()
            .is_some_and(|q| !q.questions().is_empty())
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
