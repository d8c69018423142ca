use chrono::{DateTime, Utc};

use crate::model::{AttemptRecord, QuizId, QuizKind};

/// Attempt records of one participant, sorted once by completion time.
///
/// Every "most recent" question asked by the evaluator and the gate is
/// answered from this single ordering. Records completed at the same instant
/// keep the order they were supplied in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptHistory {
    records: Vec<AttemptRecord>,
}

impl AttemptHistory {
    #[must_use]
    pub fn new(records: impl IntoIterator<Item = AttemptRecord>) -> Self {
        let mut records: Vec<AttemptRecord> = records.into_iter().collect();
        records.sort_by_key(AttemptRecord::completed_at);
        Self { records }
    }

    /// All records, oldest first.
    #[must_use]
    pub fn records(&self) -> &[AttemptRecord] {
        &self.records
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Records of one quiz kind, oldest first.
    pub fn of_kind(&self, kind: QuizKind) -> impl DoubleEndedIterator<Item = &AttemptRecord> {
        self.records.iter().filter(move |r| r.kind() == kind)
    }

    /// Records for a single quiz, oldest first.
    pub fn for_quiz(&self, quiz_id: QuizId) -> impl DoubleEndedIterator<Item = &AttemptRecord> {
        self.records.iter().filter(move |r| r.quiz_id() == quiz_id)
    }

    #[must_use]
    pub fn latest(&self, kind: QuizKind) -> Option<&AttemptRecord> {
        self.of_kind(kind).next_back()
    }

    /// True if a passed attempt of `kind` completed strictly after `after`.
    #[must_use]
    pub fn passed_after(&self, kind: QuizKind, after: DateTime<Utc>) -> bool {
        self.of_kind(kind)
            .rev()
            .take_while(|r| r.completed_at() > after)
            .any(AttemptRecord::passed)
    }
}

impl FromIterator<AttemptRecord> for AttemptHistory {
    fn from_iter<T: IntoIterator<Item = AttemptRecord>>(iter: T) -> Self {
        Self::new(iter)
    }
}
