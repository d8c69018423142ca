use quiz_core::model::{AttemptId, AttemptRecord, ParticipantId};
use sqlx::{QueryBuilder, Sqlite};

use super::{
    SqliteRepository,
    mapping::{answers_to_json, conn, id_i64, map_attempt_row},
};
use crate::repository::{AttemptRepository, AttemptScope, StorageError};

const ATTEMPT_COLUMNS: &str = r"
    SELECT
        id, participant, quiz_id, training_title, module_title, kind, answers,
        score, total_questions, percentage, passed, completed_at, expiry_at
    FROM attempts
    WHERE 1 = 1
";

#[async_trait::async_trait]
impl AttemptRepository for SqliteRepository {
    async fn append_attempt(&self, record: &AttemptRecord) -> Result<AttemptId, StorageError> {
        let quiz_id = id_i64("quiz_id", record.quiz_id().value())?;

        let res = sqlx::query(
            r"
                INSERT INTO attempts (
                    participant, quiz_id, training_title, module_title, kind, answers,
                    score, total_questions, percentage, passed, completed_at, expiry_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ",
        )
        .bind(record.participant().as_str())
        .bind(quiz_id)
        .bind(record.module().training_title())
        .bind(record.module().module_title())
        .bind(record.kind().as_str())
        .bind(answers_to_json(record.answers())?)
        .bind(i64::from(record.score()))
        .bind(i64::from(record.total_questions()))
        .bind(i64::from(record.percentage()))
        .bind(record.passed())
        .bind(record.completed_at())
        .bind(record.expiry_at())
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        let id = u64::try_from(res.last_insert_rowid())
            .map_err(|_| StorageError::Serialization("attempt id sign overflow".into()))?;
        Ok(AttemptId::new(id))
    }

    async fn list_attempts(
        &self,
        participant: Option<&ParticipantId>,
        scope: &AttemptScope,
    ) -> Result<Vec<AttemptRecord>, StorageError> {
        let mut query = QueryBuilder::<Sqlite>::new(ATTEMPT_COLUMNS);
        if let Some(participant) = participant {
            query.push(" AND participant = ").push_bind(participant.as_str().to_owned());
        }
        match scope {
            AttemptScope::Quiz(id) => {
                query.push(" AND quiz_id = ").push_bind(id_i64("quiz_id", id.value())?);
            }
            AttemptScope::Module(module) => {
                query
                    .push(" AND training_title = ")
                    .push_bind(module.training_title().to_owned())
                    .push(" AND module_title = ")
                    .push_bind(module.module_title().to_owned());
            }
            AttemptScope::All => {}
        }
        query.push(" ORDER BY completed_at ASC, id ASC");

        let rows = query.build().fetch_all(&self.pool).await.map_err(conn)?;
        rows.iter().map(map_attempt_row).collect()
    }
}
