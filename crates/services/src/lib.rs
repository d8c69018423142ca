#![forbid(unsafe_code)]

pub mod attempts;
pub mod config;
pub mod confirm;
pub mod engine;
pub mod error;
pub mod reports;

pub use quiz_core::Clock;

pub use attempts::{AttemptTimer, QuestionSampler, ResultRecorder, SubmitTrigger, SubmittedAttempt};
pub use config::EngineConfig;
pub use confirm::{AttemptCommand, Confirmation};
pub use engine::{
    AttemptAccess, AttemptContext, CommandOutcome, QuizEngine, QuizOverview, TickOutcome,
};
pub use error::EngineError;
pub use reports::{CertificateStatus, ParticipantStats, TrainingHistoryItem};
