use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Applies schema versions that are not yet recorded in `schema_migrations`.
///
/// Version 1 creates quizzes, attempts and running timers.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    if is_applied(pool, 1).await? {
        return Ok(());
    }

    let mut tx = pool.begin().await?;

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS quizzes (
                id INTEGER PRIMARY KEY,
                training_title TEXT NOT NULL,
                module_title TEXT NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('pre_test', 'post_test')),
                questions TEXT NOT NULL,
                questions_to_display INTEGER CHECK (questions_to_display > 0),
                minimum_pass_score INTEGER NOT NULL
                    CHECK (minimum_pass_score BETWEEN 0 AND 100),
                time_limit_minutes INTEGER CHECK (time_limit_minutes > 0),
                certificate_validity_days INTEGER CHECK (certificate_validity_days > 0)
            );
        ",
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                participant TEXT NOT NULL,
                quiz_id INTEGER NOT NULL,
                training_title TEXT NOT NULL,
                module_title TEXT NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('pre_test', 'post_test')),
                answers TEXT NOT NULL,
                score INTEGER NOT NULL CHECK (score >= 0),
                total_questions INTEGER NOT NULL CHECK (total_questions > 0),
                percentage INTEGER NOT NULL CHECK (percentage BETWEEN 0 AND 100),
                passed INTEGER NOT NULL CHECK (passed IN (0, 1)),
                completed_at TEXT NOT NULL,
                expiry_at TEXT,
                FOREIGN KEY (quiz_id) REFERENCES quizzes(id) ON DELETE CASCADE
            );
        ",
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS quiz_timers (
                storage_key TEXT PRIMARY KEY,
                quiz_id INTEGER NOT NULL,
                participant TEXT NOT NULL,
                started_at TEXT NOT NULL
            );
        ",
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r"
            CREATE INDEX IF NOT EXISTS idx_quizzes_module
                ON quizzes (training_title, module_title, id);
        ",
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r"
            CREATE INDEX IF NOT EXISTS idx_attempts_participant_module_completed
                ON attempts (participant, training_title, module_title, completed_at);
        ",
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r"
            CREATE INDEX IF NOT EXISTS idx_attempts_quiz_completed
                ON attempts (quiz_id, completed_at);
        ",
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r"
            INSERT INTO schema_migrations (version, applied_at)
            VALUES (?1, ?2)
            ON CONFLICT(version) DO NOTHING
        ",
    )
    .bind(1_i64)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!(version = 1, "applied sqlite schema migration");

    Ok(())
}
