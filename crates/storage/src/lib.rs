pub mod repository;
pub mod sqlite;

pub use repository::{
    AttemptRepository, AttemptScope, InMemoryRepository, QuizRepository, Storage, StorageError,
    TimerKey, TimerStore,
};
