use chrono::{DateTime, Utc};
use quiz_core::model::{
    Answers, AttemptRecord, ModuleKey, ParticipantId, Question, QuizDefinition, QuizId, QuizKind,
    QuizRef,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

fn u8_from_i64(field: &'static str, v: i64) -> Result<u8, StorageError> {
    u8::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn quiz_id_from_i64(v: i64) -> Result<QuizId, StorageError> {
    Ok(QuizId::new(i64_to_u64("quiz_id", v)?))
}

fn opt_u32(row: &SqliteRow, field: &'static str) -> Result<Option<u32>, StorageError> {
    row.try_get::<Option<i64>, _>(field)
        .map_err(ser)?
        .map(|v| u32_from_i64(field, v))
        .transpose()
}

fn module_from_row(row: &SqliteRow) -> Result<ModuleKey, StorageError> {
    ModuleKey::new(
        row.try_get::<String, _>("training_title").map_err(ser)?,
        row.try_get::<String, _>("module_title").map_err(ser)?,
    )
    .map_err(ser)
}

fn kind_from_row(row: &SqliteRow) -> Result<QuizKind, StorageError> {
    row.try_get::<String, _>("kind")
        .map_err(ser)?
        .parse::<QuizKind>()
        .map_err(ser)
}

pub(crate) fn questions_to_json(questions: &[Question]) -> Result<String, StorageError> {
    serde_json::to_string(questions).map_err(ser)
}

pub(crate) fn answers_to_json(answers: &Answers) -> Result<String, StorageError> {
    serde_json::to_string(answers).map_err(ser)
}

pub(crate) fn map_quiz_row(row: &SqliteRow) -> Result<QuizDefinition, StorageError> {
    let questions: Vec<Question> =
        serde_json::from_str(&row.try_get::<String, _>("questions").map_err(ser)?).map_err(ser)?;
    let minimum_pass_score = u8_from_i64(
        "minimum_pass_score",
        row.try_get::<i64, _>("minimum_pass_score").map_err(ser)?,
    )?;

    Ok(QuizDefinition::from_persisted(
        quiz_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?)?,
        module_from_row(row)?,
        kind_from_row(row)?,
        questions,
        opt_u32(row, "questions_to_display")?,
        Some(minimum_pass_score),
        opt_u32(row, "time_limit_minutes")?,
        opt_u32(row, "certificate_validity_days")?,
    ))
}

pub(crate) fn map_attempt_row(row: &SqliteRow) -> Result<AttemptRecord, StorageError> {
    let quiz = QuizRef {
        quiz_id: quiz_id_from_i64(row.try_get::<i64, _>("quiz_id").map_err(ser)?)?,
        module: module_from_row(row)?,
        kind: kind_from_row(row)?,
    };
    let answers: Answers =
        serde_json::from_str(&row.try_get::<String, _>("answers").map_err(ser)?).map_err(ser)?;
    let completed_at: DateTime<Utc> = row.try_get("completed_at").map_err(ser)?;
    let expiry_at: Option<DateTime<Utc>> = row.try_get("expiry_at").map_err(ser)?;

    AttemptRecord::from_persisted(
        ParticipantId::new(row.try_get::<String, _>("participant").map_err(ser)?),
        quiz,
        answers,
        u32_from_i64("score", row.try_get::<i64, _>("score").map_err(ser)?)?,
        u32_from_i64(
            "total_questions",
            row.try_get::<i64, _>("total_questions").map_err(ser)?,
        )?,
        u8_from_i64("percentage", row.try_get::<i64, _>("percentage").map_err(ser)?)?,
        row.try_get::<bool, _>("passed").map_err(ser)?,
        completed_at,
        expiry_at,
    )
    .map_err(ser)
}
