//! Read-only summaries over attempt records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use quiz_core::AttemptHistory;
use quiz_core::model::{AttemptRecord, ModuleKey, ModuleProgress, QuizKind};
use quiz_core::scoring::percentage;

/// Aggregate results of one participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantStats {
    pub attempts: usize,
    pub average_percentage: u8,
    pub best_percentage: u8,
    pub passed_count: usize,
}

impl ParticipantStats {
    #[must_use]
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a AttemptRecord>) -> Self {
        let mut stats = Self::default();
        let mut sum = 0_u64;
        for record in records {
            stats.attempts += 1;
            sum += u64::from(record.percentage());
            stats.best_percentage = stats.best_percentage.max(record.percentage());
            if record.passed() {
                stats.passed_count += 1;
            }
        }
        if stats.attempts > 0 {
            let count = u64::try_from(stats.attempts).unwrap_or(u64::MAX);
            let mean = (2 * sum + count) / (2 * count);
            stats.average_percentage = u8::try_from(mean).unwrap_or(100);
        }
        stats
    }
}

/// Attempts of one participant within one training.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingHistoryItem {
    pub training_title: String,
    pub attempts: usize,
    pub passed_count: usize,
    pub latest_completed_at: DateTime<Utc>,
}

/// Group records by training, most recently active training first.
#[must_use]
pub fn training_history<'a>(
    records: impl IntoIterator<Item = &'a AttemptRecord>,
) -> Vec<TrainingHistoryItem> {
    let mut grouped: BTreeMap<&str, TrainingHistoryItem> = BTreeMap::new();
    for record in records {
        let title = record.module().training_title();
        let item = grouped.entry(title).or_insert_with(|| TrainingHistoryItem {
            training_title: title.to_owned(),
            attempts: 0,
            passed_count: 0,
            latest_completed_at: record.completed_at(),
        });
        item.attempts += 1;
        if record.passed() {
            item.passed_count += 1;
        }
        item.latest_completed_at = item.latest_completed_at.max(record.completed_at());
    }

    let mut items: Vec<TrainingHistoryItem> = grouped.into_values().collect();
    items.sort_by(|a, b| b.latest_completed_at.cmp(&a.latest_completed_at));
    items
}

/// Certificate state of one attempt at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertificateStatus {
    Valid { expires_at: DateTime<Utc> },
    Expired { expired_at: DateTime<Utc> },
    NoExpiry,
}

impl CertificateStatus {
    #[must_use]
    pub fn of(record: &AttemptRecord, now: DateTime<Utc>) -> Self {
        match record.expiry_at() {
            None => CertificateStatus::NoExpiry,
            Some(expiry) if expiry > now => CertificateStatus::Valid { expires_at: expiry },
            Some(expiry) => CertificateStatus::Expired { expired_at: expiry },
        }
    }
}

/// The newest passed Post Test whose certificate is still valid at `now`.
#[must_use]
pub fn current_certificate(history: &AttemptHistory, now: DateTime<Utc>) -> Option<&AttemptRecord> {
    history
        .of_kind(QuizKind::PostTest)
        .rev()
        .find(|record| record.passed() && record.is_valid_at(now))
}

/// Share of modules with both quizzes passed, rounded. Zero without modules.
#[must_use]
pub fn training_completion_percentage(modules: &[(ModuleKey, ModuleProgress)]) -> u8 {
    let complete = modules.iter().filter(|(_, p)| p.is_complete()).count();
    percentage(
        u32::try_from(complete).unwrap_or(u32::MAX),
        u32::try_from(modules.len()).unwrap_or(u32::MAX),
    )
}
