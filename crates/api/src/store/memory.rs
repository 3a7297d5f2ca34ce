//! In-memory presence store for tests

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveTime;
use parking_lot::Mutex;
use tns_shared::{
    same_minute, Availability, AvailabilityChange, ClassId, ScheduleBoundary, ScheduleEntry, StoreError,
    StoreResult, Teacher, TeacherId, Weekday,
};

use super::PresenceStore;

#[derive(Default)]
pub struct MemoryStore {
    teachers: Mutex<HashMap<TeacherId, Teacher>>,
    tokens: Mutex<HashMap<String, TeacherId>>,
    schedules: Mutex<Vec<ScheduleEntry>>,
    classes: Mutex<HashMap<ClassId, String>>,
    commits: Mutex<Vec<Vec<AvailabilityChange>>>,
    fail_commits: Mutex<bool>,
    fail_class_names: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_teacher(&self, id: i64, availability: Availability, push_token: Option<&str>) -> Teacher {
        let teacher = Teacher {
            id: TeacherId(id),
            full_name: format!("Teacher {}", id),
            availability,
            push_token: push_token.map(str::to_string),
            availability_changed_at: None,
        };
        self.teachers.lock().insert(teacher.id, teacher.clone());
        teacher
    }

    pub fn set_auth_token(&self, token: &str, id: i64) {
        self.tokens.lock().insert(token.to_string(), TeacherId(id));
    }

    pub fn add_class(&self, id: i64, name: &str) {
        self.classes.lock().insert(ClassId(id), name.to_string());
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_schedule(
        &self,
        teacher_id: i64,
        class_id: Option<i64>,
        subject: &str,
        weekday: Weekday,
        time_in: (u32, u32),
        time_out: (u32, u32),
        is_break: bool,
    ) {
        let mut schedules = self.schedules.lock();
        let id = schedules.len() as i64 + 1;
        schedules.push(ScheduleEntry {
            id,
            teacher_id: TeacherId(teacher_id),
            class_id: class_id.map(ClassId),
            subject: subject.to_string(),
            weekday,
            time_in: hm(time_in),
            time_out: hm(time_out),
            is_break,
        });
    }

    pub fn availability(&self, id: i64) -> Option<Availability> {
        self.teachers.lock().get(&TeacherId(id)).map(|t| t.availability)
    }

    pub fn commits(&self) -> Vec<Vec<AvailabilityChange>> {
        self.commits.lock().clone()
    }

    pub fn fail_commits(&self, fail: bool) {
        *self.fail_commits.lock() = fail;
    }

    pub fn fail_class_names(&self, fail: bool) {
        *self.fail_class_names.lock() = fail;
    }
}

fn hm((hour, minute): (u32, u32)) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default()
}

#[async_trait]
impl PresenceStore for MemoryStore {
    async fn find_teacher(&self, id: TeacherId) -> StoreResult<Option<Teacher>> {
        Ok(self.teachers.lock().get(&id).cloned())
    }

    async fn find_teacher_by_token(&self, token: &str) -> StoreResult<Option<Teacher>> {
        let id = self.tokens.lock().get(token).copied();
        Ok(id.and_then(|id| self.teachers.lock().get(&id).cloned()))
    }

    async fn teachers_by_ids(&self, ids: &[TeacherId]) -> StoreResult<Vec<Teacher>> {
        let teachers = self.teachers.lock();
        Ok(ids.iter().filter_map(|id| teachers.get(id).cloned()).collect())
    }

    async fn schedules_at(
        &self,
        weekday: Weekday,
        boundary: ScheduleBoundary,
        minute: NaiveTime,
    ) -> StoreResult<Vec<ScheduleEntry>> {
        Ok(self
            .schedules
            .lock()
            .iter()
            .filter(|e| e.weekday == weekday && same_minute(e.boundary_time(boundary), minute))
            .cloned()
            .collect())
    }

    async fn class_names(&self, ids: &[ClassId]) -> StoreResult<HashMap<ClassId, String>> {
        if *self.fail_class_names.lock() {
            return Err(StoreError::Database("class lookup refused".to_string()));
        }
        let classes = self.classes.lock();
        Ok(ids
            .iter()
            .filter_map(|id| classes.get(id).map(|name| (*id, name.clone())))
            .collect())
    }

    async fn commit_availability(&self, changes: &[AvailabilityChange]) -> StoreResult<()> {
        if *self.fail_commits.lock() {
            return Err(StoreError::Database("commit refused".to_string()));
        }
        let mut teachers = self.teachers.lock();
        for change in changes {
            if let Some(teacher) = teachers.get_mut(&change.teacher_id) {
                teacher.availability = change.to;
            }
        }
        self.commits.lock().push(changes.to_vec());
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
