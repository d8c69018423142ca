//! Domain model and pure rules of the quiz attempt engine.
//!
//! Nothing here performs I/O or draws random numbers; storage lives in the
//! `storage` crate and sampling, timing and orchestration in `services`.

pub mod evaluator;
pub mod gate;
pub mod history;
pub mod model;
pub mod participant;
pub mod scoring;
pub mod time;

pub use evaluator::ProgressEvaluator;
pub use gate::{AttemptGate, BlockReason, GateDecision};
pub use history::AttemptHistory;
pub use participant::ParticipantMatching;
pub use time::Clock;
