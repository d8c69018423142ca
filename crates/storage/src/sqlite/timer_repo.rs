use chrono::{DateTime, Utc};

use super::{
    SqliteRepository,
    mapping::{conn, id_i64},
};
use crate::repository::{StorageError, TimerKey, TimerStore};

#[async_trait::async_trait]
impl TimerStore for SqliteRepository {
    async fn get_timer_start(&self, key: &TimerKey) -> Result<Option<DateTime<Utc>>, StorageError> {
        sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT started_at FROM quiz_timers WHERE storage_key = ?1",
        )
        .bind(key.storage_key())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)
    }

    async fn set_timer_start(
        &self,
        key: &TimerKey,
        started_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r"
                INSERT INTO quiz_timers (storage_key, quiz_id, participant, started_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(storage_key) DO UPDATE SET started_at = excluded.started_at
            ",
        )
        .bind(key.storage_key())
        .bind(id_i64("quiz_id", key.quiz_id.value())?)
        .bind(key.participant.as_str())
        .bind(started_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    async fn clear_timer(&self, key: &TimerKey) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM quiz_timers WHERE storage_key = ?1")
            .bind(key.storage_key())
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        Ok(())
    }
}
