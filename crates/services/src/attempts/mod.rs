mod recorder;
mod sampler;
mod timer;

pub use recorder::{ResultRecorder, SubmitTrigger, SubmittedAttempt};
pub use sampler::QuestionSampler;
pub use timer::AttemptTimer;
