//! Persistence collaborator
//!
//! The presence core reads teacher, timetable and class rows and writes
//! availability. It never touches credential columns: the only write is
//! [`PresenceStore::commit_availability`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveTime;
use tns_shared::{
    AvailabilityChange, ClassId, ScheduleBoundary, ScheduleEntry, StoreResult, Teacher, TeacherId, Weekday,
};

#[cfg(test)]
pub mod memory;
mod postgres;

pub use postgres::PgPresenceStore;

#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn find_teacher(&self, id: TeacherId) -> StoreResult<Option<Teacher>>;

    /// Resolve a teacher from the bearer token their app presents
    async fn find_teacher_by_token(&self, token: &str) -> StoreResult<Option<Teacher>>;

    async fn teachers_by_ids(&self, ids: &[TeacherId]) -> StoreResult<Vec<Teacher>>;

    /// Timetable entries on `weekday` whose `boundary` time falls in `minute`
    async fn schedules_at(
        &self,
        weekday: Weekday,
        boundary: ScheduleBoundary,
        minute: NaiveTime,
    ) -> StoreResult<Vec<ScheduleEntry>>;

    async fn class_names(&self, ids: &[ClassId]) -> StoreResult<HashMap<ClassId, String>>;

    /// Apply a batch of availability changes in one transaction
    async fn commit_availability(&self, changes: &[AvailabilityChange]) -> StoreResult<()>;

    /// Cheap connectivity check for health reporting
    async fn ping(&self) -> StoreResult<()>;
}
