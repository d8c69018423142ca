use quiz_core::model::{ModuleKey, QuizDefinition, QuizId};
use sqlx::Row;

use super::{
    SqliteRepository,
    mapping::{conn, id_i64, map_quiz_row, questions_to_json, ser},
};
use crate::repository::{QuizRepository, StorageError, sort_modules};

#[async_trait::async_trait]
impl QuizRepository for SqliteRepository {
    async fn upsert_quiz(&self, quiz: &QuizDefinition) -> Result<(), StorageError> {
        let id = id_i64("quiz_id", quiz.id().value())?;

        sqlx::query(
            r"
                INSERT INTO quizzes (
                    id, training_title, module_title, kind, questions,
                    questions_to_display, minimum_pass_score,
                    time_limit_minutes, certificate_validity_days
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(id) DO UPDATE SET
                    training_title = excluded.training_title,
                    module_title = excluded.module_title,
                    kind = excluded.kind,
                    questions = excluded.questions,
                    questions_to_display = excluded.questions_to_display,
                    minimum_pass_score = excluded.minimum_pass_score,
                    time_limit_minutes = excluded.time_limit_minutes,
                    certificate_validity_days = excluded.certificate_validity_days
            ",
        )
        .bind(id)
        .bind(quiz.module().training_title())
        .bind(quiz.module().module_title())
        .bind(quiz.kind().as_str())
        .bind(questions_to_json(quiz.questions())?)
        .bind(quiz.questions_to_display().map(i64::from))
        .bind(i64::from(quiz.minimum_pass_score()))
        .bind(quiz.time_limit_minutes().map(i64::from))
        .bind(quiz.certificate_validity_days().map(i64::from))
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn get_quiz(&self, id: QuizId) -> Result<QuizDefinition, StorageError> {
        let row = sqlx::query(
            r"
                SELECT
                    id, training_title, module_title, kind, questions,
                    questions_to_display, minimum_pass_score,
                    time_limit_minutes, certificate_validity_days
                FROM quizzes
                WHERE id = ?1
            ",
        )
        .bind(id_i64("quiz_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        match row {
            Some(row) => map_quiz_row(&row),
            None => Err(StorageError::NotFound),
        }
    }

    async fn list_module_quizzes(
        &self,
        module: &ModuleKey,
    ) -> Result<Vec<QuizDefinition>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT
                    id, training_title, module_title, kind, questions,
                    questions_to_display, minimum_pass_score,
                    time_limit_minutes, certificate_validity_days
                FROM quizzes
                WHERE training_title = ?1 AND module_title = ?2
                ORDER BY id ASC
            ",
        )
        .bind(module.training_title())
        .bind(module.module_title())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_quiz_row).collect()
    }

    async fn list_training_modules(
        &self,
        training_title: &str,
    ) -> Result<Vec<ModuleKey>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT DISTINCT training_title, module_title
                FROM quizzes
                WHERE training_title = ?1
            ",
        )
        .bind(training_title.trim())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut modules = Vec::with_capacity(rows.len());
        for row in rows {
            modules.push(
                ModuleKey::new(
                    row.try_get::<String, _>("training_title").map_err(ser)?,
                    row.try_get::<String, _>("module_title").map_err(ser)?,
                )
                .map_err(ser)?,
            );
        }
        Ok(sort_modules(modules))
    }
}
