//! Postgres implementation of the presence store

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveTime;
use sqlx::PgPool;
use tns_shared::{
    AvailabilityChange, ClassId, ScheduleBoundary, ScheduleEntry, SchoolClass, StoreResult, Teacher, TeacherId, Weekday,
};

use super::PresenceStore;

const TEACHER_COLUMNS: &str = r#"
    id, full_name, availability, firebase_token AS push_token, availability_changed_at
"#;

#[derive(Clone)]
pub struct PgPresenceStore {
    pool: PgPool,
}

impl PgPresenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PresenceStore for PgPresenceStore {
    async fn find_teacher(&self, id: TeacherId) -> StoreResult<Option<Teacher>> {
        let teacher = sqlx::query_as::<_, Teacher>(&format!(
            "SELECT {} FROM teacher WHERE id = $1",
            TEACHER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(teacher)
    }

    async fn find_teacher_by_token(&self, token: &str) -> StoreResult<Option<Teacher>> {
        if token.is_empty() {
            return Ok(None);
        }

        let teacher = sqlx::query_as::<_, Teacher>(&format!(
            "SELECT {} FROM teacher WHERE token = $1",
            TEACHER_COLUMNS
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(teacher)
    }

    async fn teachers_by_ids(&self, ids: &[TeacherId]) -> StoreResult<Vec<Teacher>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let raw_ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        let teachers = sqlx::query_as::<_, Teacher>(&format!(
            "SELECT {} FROM teacher WHERE id = ANY($1)",
            TEACHER_COLUMNS
        ))
        .bind(&raw_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(teachers)
    }

    async fn schedules_at(
        &self,
        weekday: Weekday,
        boundary: ScheduleBoundary,
        minute: NaiveTime,
    ) -> StoreResult<Vec<ScheduleEntry>> {
        let column = match boundary {
            ScheduleBoundary::Start => "time_in",
            ScheduleBoundary::End => "time_out",
        };

        // Minute precision: stored seconds are ignored.
        let entries = sqlx::query_as::<_, ScheduleEntry>(&format!(
            r#"
            SELECT id, teacher_id, class_id, subject, weekday, time_in, time_out, is_break
            FROM teacher_schedule
            WHERE weekday = $1
              AND to_char({column}, 'HH24:MI') = $2
            ORDER BY id
            "#
        ))
        .bind(weekday)
        .bind(minute.format("%H:%M").to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn class_names(&self, ids: &[ClassId]) -> StoreResult<HashMap<ClassId, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let raw_ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        let classes = sqlx::query_as::<_, SchoolClass>(
            "SELECT id, name, grade FROM school_class WHERE id = ANY($1)",
        )
        .bind(&raw_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(classes.into_iter().map(|c| (c.id, c.name)).collect())
    }

    async fn commit_availability(&self, changes: &[AvailabilityChange]) -> StoreResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for change in changes {
            sqlx::query(
                r#"
                UPDATE teacher
                SET availability = $2,
                    availability_changed_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(change.teacher_id)
            .bind(change.to)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::debug!(changes = changes.len(), "Committed availability changes");
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
