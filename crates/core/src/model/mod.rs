mod attempt;
mod ids;
mod progress;
mod quiz;

pub use ids::{AttemptId, ParseIdError, ParticipantId, QuizId};

pub use attempt::{AttemptError, AttemptRecord, Answers, QuizRef};
pub use progress::ModuleProgress;
pub use quiz::{
    DEFAULT_MINIMUM_PASS_SCORE, MIN_OPTIONS_PER_QUESTION, ModuleKey, ModuleQuizzes, Question,
    QuizDefinition, QuizDraft, QuizError, QuizKind,
};
