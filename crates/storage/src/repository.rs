use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quiz_core::model::{
    AttemptId, AttemptRecord, ModuleKey, ParticipantId, QuizDefinition, QuizId,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

//
// ─── QUERIES ───────────────────────────────────────────────────────────────────
//

/// Which attempts a listing covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptScope {
    Quiz(QuizId),
    Module(ModuleKey),
    All,
}

impl AttemptScope {
    #[must_use]
    pub fn contains(&self, record: &AttemptRecord) -> bool {
        match self {
            AttemptScope::Quiz(id) => record.quiz_id() == *id,
            AttemptScope::Module(module) => record.module() == module,
            AttemptScope::All => true,
        }
    }
}

/// Key of a running countdown: one per quiz and participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub quiz_id: QuizId,
    pub participant: ParticipantId,
}

impl TimerKey {
    #[must_use]
    pub fn new(quiz_id: QuizId, participant: ParticipantId) -> Self {
        Self {
            quiz_id,
            participant,
        }
    }

    /// Flat key shared by every backend: `quiz_timer_{quiz}_{participant}`.
    ///
    /// The participant is kept verbatim, so two ids that differ only in case
    /// never share a countdown.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!(
            "quiz_timer_{}_{}",
            self.quiz_id.value(),
            self.participant.as_str()
        )
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

/// Repository contract for quiz definitions.
#[async_trait]
pub trait QuizRepository: Send + Sync {
    /// Persist or replace a quiz.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the quiz cannot be stored.
    async fn upsert_quiz(&self, quiz: &QuizDefinition) -> Result<(), StorageError>;

    /// Fetch a quiz by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_quiz(&self, id: QuizId) -> Result<QuizDefinition, StorageError>;

    /// All quizzes defined for a module, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_module_quizzes(
        &self,
        module: &ModuleKey,
    ) -> Result<Vec<QuizDefinition>, StorageError>;

    /// Modules of a training that have at least one quiz, numbered modules
    /// first in numeric order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_training_modules(
        &self,
        training_title: &str,
    ) -> Result<Vec<ModuleKey>, StorageError>;
}

/// Append-only store of finished attempts.
#[async_trait]
pub trait AttemptRepository: Send + Sync {
    /// Append a new record. Never updates an existing one.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be stored.
    async fn append_attempt(&self, record: &AttemptRecord) -> Result<AttemptId, StorageError>;

    /// Attempts within `scope`, oldest first. `participant` filters by exact
    /// identity; `None` lists every participant.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_attempts(
        &self,
        participant: Option<&ParticipantId>,
        scope: &AttemptScope,
    ) -> Result<Vec<AttemptRecord>, StorageError>;
}

/// Key-value store holding the start instant of running countdowns.
#[async_trait]
pub trait TimerStore: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_timer_start(&self, key: &TimerKey) -> Result<Option<DateTime<Utc>>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn set_timer_start(
        &self,
        key: &TimerKey,
        started_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Remove the key. Clearing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn clear_timer(&self, key: &TimerKey) -> Result<(), StorageError>;
}

//
// ─── IN-MEMORY BACKEND ─────────────────────────────────────────────────────────
//

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    quizzes: Arc<Mutex<HashMap<QuizId, QuizDefinition>>>,
    attempts: Arc<Mutex<Vec<(AttemptId, AttemptRecord)>>>,
    timers: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<E: fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[async_trait]
impl QuizRepository for InMemoryRepository {
    async fn upsert_quiz(&self, quiz: &QuizDefinition) -> Result<(), StorageError> {
        let mut guard = self.quizzes.lock().map_err(poisoned)?;
        guard.insert(quiz.id(), quiz.clone());
        Ok(())
    }

    async fn get_quiz(&self, id: QuizId) -> Result<QuizDefinition, StorageError> {
        let guard = self.quizzes.lock().map_err(poisoned)?;
        guard.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn list_module_quizzes(
        &self,
        module: &ModuleKey,
    ) -> Result<Vec<QuizDefinition>, StorageError> {
        let guard = self.quizzes.lock().map_err(poisoned)?;
        let mut found: Vec<QuizDefinition> = guard
            .values()
            .filter(|quiz| quiz.module() == module)
            .cloned()
            .collect();
        found.sort_by_key(QuizDefinition::id);
        Ok(found)
    }

    async fn list_training_modules(
        &self,
        training_title: &str,
    ) -> Result<Vec<ModuleKey>, StorageError> {
        let guard = self.quizzes.lock().map_err(poisoned)?;
        let modules = guard
            .values()
            .filter(|quiz| quiz.module().training_title() == training_title.trim())
            .map(|quiz| quiz.module().clone());
        Ok(sort_modules(modules))
    }
}

#[async_trait]
impl AttemptRepository for InMemoryRepository {
    async fn append_attempt(&self, record: &AttemptRecord) -> Result<AttemptId, StorageError> {
        let mut guard = self.attempts.lock().map_err(poisoned)?;
        let next = u64::try_from(guard.len())
            .map_err(|_| StorageError::Conflict)?
            .saturating_add(1);
        let id = AttemptId::new(next);
        guard.push((id, record.clone()));
        Ok(id)
    }

    async fn list_attempts(
        &self,
        participant: Option<&ParticipantId>,
        scope: &AttemptScope,
    ) -> Result<Vec<AttemptRecord>, StorageError> {
        let guard = self.attempts.lock().map_err(poisoned)?;
        let mut found: Vec<AttemptRecord> = guard
            .iter()
            .map(|(_, record)| record)
            .filter(|record| participant.is_none_or(|p| record.participant() == p))
            .filter(|record| scope.contains(record))
            .cloned()
            .collect();
        found.sort_by_key(AttemptRecord::completed_at);
        Ok(found)
    }
}

#[async_trait]
impl TimerStore for InMemoryRepository {
    async fn get_timer_start(&self, key: &TimerKey) -> Result<Option<DateTime<Utc>>, StorageError> {
        let guard = self.timers.lock().map_err(poisoned)?;
        Ok(guard.get(&key.storage_key()).copied())
    }

    async fn set_timer_start(
        &self,
        key: &TimerKey,
        started_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut guard = self.timers.lock().map_err(poisoned)?;
        guard.insert(key.storage_key(), started_at);
        Ok(())
    }

    async fn clear_timer(&self, key: &TimerKey) -> Result<(), StorageError> {
        let mut guard = self.timers.lock().map_err(poisoned)?;
        guard.remove(&key.storage_key());
        Ok(())
    }
}

/// Deduplicate and order modules for listing.
pub(crate) fn sort_modules(modules: impl IntoIterator<Item = ModuleKey>) -> Vec<ModuleKey> {
    let mut out: Vec<ModuleKey> = modules.into_iter().collect();
    out.sort_by(|a, b| a.display_order().cmp(&b.display_order()));
    out.dedup();
    out
}

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub quizzes: Arc<dyn QuizRepository>,
    pub attempts: Arc<dyn AttemptRepository>,
    pub timers: Arc<dyn TimerStore>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let quizzes: Arc<dyn QuizRepository> = Arc::new(repo.clone());
        let attempts: Arc<dyn AttemptRepository> = Arc::new(repo.clone());
        let timers: Arc<dyn TimerStore> = Arc::new(repo);
        Self {
            quizzes,
            attempts,
            timers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_core::model::{Answers, Question, QuizKind, QuizRef};
    use quiz_core::time::fixed_now;

    fn module(title: &str) -> ModuleKey {
        ModuleKey::new("BAIM", title).unwrap()
    }

    fn quiz(id: u64, module_title: &str, kind: QuizKind) -> QuizDefinition {
        QuizDefinition::from_persisted(
            QuizId::new(id),
            module(module_title),
            kind,
            vec![Question::new("Q", vec!["a".into(), "b".into()], 1).unwrap()],
            None,
            None,
            None,
            None,
        )
    }

    fn attempt(participant: &str, quiz: &QuizDefinition, minutes: i64) -> AttemptRecord {
        AttemptRecord::from_persisted(
            ParticipantId::new(participant),
            QuizRef::of(quiz),
            Answers::new(),
            1,
            1,
            100,
            true,
            fixed_now() + chrono::Duration::minutes(minutes),
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn lists_training_modules_in_numeric_order() {
        let repo = InMemoryRepository::new();
        for (id, title) in [(1, "BAIM 10"), (2, "BAIM 2"), (3, "BAIM 2"), (4, "Intro")] {
            repo.upsert_quiz(&quiz(id, title, QuizKind::PreTest)).await.unwrap();
        }
        let titles: Vec<String> = repo
            .list_training_modules("BAIM")
            .await
            .unwrap()
            .iter()
            .map(|m| m.module_title().to_owned())
            .collect();
        assert_eq!(titles, vec!["BAIM 2", "BAIM 10", "Intro"]);
    }

    #[tokio::test]
    async fn attempts_are_appended_and_filtered() {
        let repo = InMemoryRepository::new();
        let pre = quiz(1, "BAIM 1", QuizKind::PreTest);
        let post = quiz(2, "BAIM 1", QuizKind::PostTest);

        let first = repo.append_attempt(&attempt("Ana", &post, 20)).await.unwrap();
        let second = repo.append_attempt(&attempt("Ana", &post, 20)).await.unwrap();
        assert_ne!(first, second);
        repo.append_attempt(&attempt("Ana", &pre, 10)).await.unwrap();
        repo.append_attempt(&attempt("Budi", &pre, 5)).await.unwrap();

        let ana = ParticipantId::new("Ana");
        let post_only = repo
            .list_attempts(Some(&ana), &AttemptScope::Quiz(post.id()))
            .await
            .unwrap();
        assert_eq!(post_only.len(), 2);

        let module_wide = repo
            .list_attempts(None, &AttemptScope::Module(module("BAIM 1")))
            .await
            .unwrap();
        assert_eq!(module_wide.len(), 4);
        assert_eq!(module_wide[0].participant().as_str(), "Budi");
    }

    #[tokio::test]
    async fn timer_keys_round_trip_and_clear() {
        let repo = InMemoryRepository::new();
        let key = TimerKey::new(QuizId::new(7), ParticipantId::new("Ana"));
        assert_eq!(key.storage_key(), "quiz_timer_7_Ana");

        assert_eq!(repo.get_timer_start(&key).await.unwrap(), None);
        repo.set_timer_start(&key, fixed_now()).await.unwrap();
        assert_eq!(repo.get_timer_start(&key).await.unwrap(), Some(fixed_now()));
        repo.clear_timer(&key).await.unwrap();
        repo.clear_timer(&key).await.unwrap();
        assert_eq!(repo.get_timer_start(&key).await.unwrap(), None);
    }
}
