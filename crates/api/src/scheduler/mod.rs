//! Availability scheduler
//!
//! Once a minute the scheduler reads the timetable for the current local
//! weekday and minute, moves teachers between `Available`, `InClass` and
//! `DoNotDisturb`, and pushes a reminder ahead of each upcoming class. It is
//! the only writer of teacher availability.
//!
//! Within a tick, class endings are applied before class starts so that a
//! teacher with back-to-back entries lands in the starting class's state.
//! The whole tick's changes are committed in one batch; availability events
//! go out only after that commit succeeds. Reminders do not depend on the
//! commit and are sent either way.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{Datelike, NaiveDateTime, Utc};
use chrono_tz::Tz;
use tns_shared::{
    truncate_to_minute, Availability, AvailabilityChange, ClassId, ScheduleBoundary, ScheduleEntry, StoreError,
    Teacher, TeacherId, Weekday,
};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::presence::{Dispatcher, Notification};
use crate::push::{PushMessage, PushPriority};
use crate::store::PresenceStore;

/// Second zero of every minute
const TICK_SCHEDULE: &str = "0 * * * * *";

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Availability commit failed: {0}")]
    Commit(#[source] StoreError),
    #[error("Cron scheduler error: {0}")]
    Cron(String),
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub ended: usize,
    pub started: usize,
    pub reminders_sent: usize,
    pub reminders_failed: usize,
    pub skipped_weekend: bool,
}

impl TickSummary {
    pub fn is_empty(&self) -> bool {
        self.ended == 0 && self.started == 0 && self.reminders_sent == 0 && self.reminders_failed == 0
    }
}

pub struct AvailabilityScheduler {
    store: Arc<dyn PresenceStore>,
    dispatcher: Dispatcher,
    timezone: Tz,
    pre_alert: chrono::Duration,
    tick_lock: Mutex<()>,
}

impl AvailabilityScheduler {
    pub fn new(
        store: Arc<dyn PresenceStore>,
        dispatcher: Dispatcher,
        timezone: Tz,
        pre_alert_minutes: i64,
    ) -> Self {
        Self {
            store,
            dispatcher,
            timezone,
            pre_alert: chrono::Duration::minutes(pre_alert_minutes),
            tick_lock: Mutex::new(()),
        }
    }

    /// Register the per-minute job and start the cron runtime
    pub async fn start(self: Arc<Self>) -> Result<JobScheduler, SchedulerError> {
        let cron = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::Cron(format!("{:?}", e)))?;

        cron.add(self.tick_job()?)
            .await
            .map_err(|e| SchedulerError::Cron(format!("{:?}", e)))?;
        cron.start()
            .await
            .map_err(|e| SchedulerError::Cron(format!("{:?}", e)))?;

        tracing::info!(
            schedule = TICK_SCHEDULE,
            timezone = %self.timezone,
            pre_alert_minutes = self.pre_alert.num_minutes(),
            "Availability scheduler started"
        );
        Ok(cron)
    }

    /// The cron job that fires `run_scheduled_tick` at second zero
    fn tick_job(self: &Arc<Self>) -> Result<Job, SchedulerError> {
        let scheduler = self.clone();
        Job::new_async(TICK_SCHEDULE, move |_id, _cron| {
            let scheduler = scheduler.clone();
            Box::pin(async move {
                scheduler.run_scheduled_tick().await;
            })
        })
        .map_err(|e| SchedulerError::Cron(format!("{:?}", e)))
    }

    /// Run one tick at the current local time, unless the previous one is
    /// still running. Returns false when skipped.
    pub async fn run_scheduled_tick(&self) -> bool {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            tracing::warn!("Previous scheduler tick still running, skipping");
            return false;
        };

        let now = Utc::now().with_timezone(&self.timezone).naive_local();
        match self.tick(now).await {
            Ok(summary) if !summary.is_empty() => {
                tracing::info!(
                    ended = summary.ended,
                    started = summary.started,
                    reminders_sent = summary.reminders_sent,
                    reminders_failed = summary.reminders_failed,
                    "Scheduler tick complete"
                );
            }
            Ok(_) => {}
            Err(SchedulerError::Commit(e)) => {
                tracing::error!(error = %e, "Availability commit failed, changes not applied");
            }
            Err(e) => {
                tracing::error!(error = %e, "Scheduler tick failed");
            }
        }
        true
    }

    /// Evaluate the timetable at local time `now`
    pub async fn tick(&self, now: NaiveDateTime) -> Result<TickSummary, SchedulerError> {
        let Some(weekday) = Weekday::from_chrono(now.weekday()) else {
            return Ok(TickSummary {
                skipped_weekend: true,
                ..Default::default()
            });
        };
        let minute = truncate_to_minute(now.time());

        let ending = self.store.schedules_at(weekday, ScheduleBoundary::End, minute).await?;
        let starting = self.store.schedules_at(weekday, ScheduleBoundary::Start, minute).await?;

        // The reminder window can roll into the next day
        let alert_at = now + self.pre_alert;
        let upcoming = match Weekday::from_chrono(alert_at.weekday()) {
            Some(day) => {
                self.store
                    .schedules_at(day, ScheduleBoundary::Start, truncate_to_minute(alert_at.time()))
                    .await?
            }
            None => Vec::new(),
        };

        let mut ids: Vec<TeacherId> = ending
            .iter()
            .chain(&starting)
            .chain(&upcoming)
            .map(|e| e.teacher_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Ok(TickSummary::default());
        }

        let mut teachers: HashMap<TeacherId, Teacher> = self
            .store
            .teachers_by_ids(&ids)
            .await?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();

        let mut summary = TickSummary::default();
        let changes = plan_transitions(&teachers, &ending, &starting, &mut summary);

        let committed = if changes.is_empty() {
            Ok(())
        } else {
            self.store.commit_availability(&changes).await
        };

        if committed.is_ok() {
            for change in &changes {
                let Some(teacher) = teachers.get_mut(&change.teacher_id) else {
                    continue;
                };
                teacher.availability = change.to;
                self.announce(teacher);
            }
        }

        // A missed reminder window never comes back, so these go out even
        // when the commit failed
        self.send_reminders(&teachers, &upcoming, &mut summary).await;

        committed.map_err(SchedulerError::Commit)?;
        Ok(summary)
    }

    /// Tell the teacher's live session and every kiosk about a new state
    fn announce(&self, teacher: &Teacher) {
        let switch = Notification::SwitchAvailability {
            teacher_id: teacher.id,
            availability: teacher.availability,
        };
        if self.dispatcher.send_to_teacher(teacher, switch).is_err() {
            tracing::debug!(teacher_id = %teacher.id, "No live session for availability change");
        }

        let kiosks = self.dispatcher.broadcast_to_tablets(&Notification::Reload {
            teacher_id: Some(teacher.id),
        });
        tracing::debug!(
            teacher_id = %teacher.id,
            availability = %teacher.availability,
            kiosks,
            "Availability change announced"
        );
    }

    /// Validate each upcoming teacher's push token, then send a reminder
    async fn send_reminders(
        &self,
        teachers: &HashMap<TeacherId, Teacher>,
        upcoming: &[ScheduleEntry],
        summary: &mut TickSummary,
    ) {
        if upcoming.is_empty() {
            return;
        }

        let class_ids: Vec<ClassId> = upcoming.iter().filter_map(|e| e.class_id).collect();
        let class_names = match self.store.class_names(&class_ids).await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(error = %e, "Class lookup failed, reminders sent without class names");
                HashMap::new()
            }
        };
        let push = self.dispatcher.push_gateway();

        for entry in upcoming {
            let Some(teacher) = teachers.get(&entry.teacher_id) else {
                continue;
            };
            if teacher.availability == Availability::Absent {
                continue;
            }
            let Some(token) = teacher.push_target() else {
                continue;
            };

            if let Err(e) = push.validate_token(token).await {
                tracing::warn!(teacher_id = %teacher.id, error = %e, "Push token failed validation, reminder skipped");
                summary.reminders_failed += 1;
                continue;
            }

            let location = entry.class_id.and_then(|id| class_names.get(&id));
            let message = reminder_message(token, entry, location.map(String::as_str), self.pre_alert);

            match push.send(&message).await {
                Ok(message_id) => {
                    tracing::info!(
                        teacher_id = %teacher.id,
                        schedule_id = entry.id,
                        message_id = %message_id,
                        "Class reminder sent"
                    );
                    summary.reminders_sent += 1;
                }
                Err(e) => {
                    tracing::warn!(teacher_id = %teacher.id, schedule_id = entry.id, error = %e, "Class reminder failed");
                    summary.reminders_failed += 1;
                }
            }
        }
    }
}

/// Apply endings then starts to a working copy of the teachers' states and
/// return the net change per teacher
fn plan_transitions(
    teachers: &HashMap<TeacherId, Teacher>,
    ending: &[ScheduleEntry],
    starting: &[ScheduleEntry],
    summary: &mut TickSummary,
) -> Vec<AvailabilityChange> {
    let mut working: BTreeMap<TeacherId, Availability> = BTreeMap::new();
    let current = |working: &BTreeMap<TeacherId, Availability>, id: TeacherId| {
        working
            .get(&id)
            .copied()
            .or_else(|| teachers.get(&id).map(|t| t.availability))
    };

    for entry in ending {
        if current(&working, entry.teacher_id) == Some(Availability::InClass) {
            working.insert(entry.teacher_id, Availability::Available);
            summary.ended += 1;
        }
    }

    for entry in starting {
        let Some(state) = current(&working, entry.teacher_id) else {
            continue;
        };
        if state == Availability::Absent {
            continue;
        }
        let target = if entry.is_break {
            Availability::DoNotDisturb
        } else {
            Availability::InClass
        };
        if state != target {
            working.insert(entry.teacher_id, target);
            summary.started += 1;
        }
    }

    working
        .into_iter()
        .filter_map(|(teacher_id, to)| {
            let from = teachers.get(&teacher_id)?.availability;
            (from != to).then_some(AvailabilityChange { teacher_id, from, to })
        })
        .collect()
}

fn reminder_message(
    token: &str,
    entry: &ScheduleEntry,
    class_name: Option<&str>,
    lead: chrono::Duration,
) -> PushMessage {
    let body = match class_name {
        Some(class) => format!(
            "{} in {} starts in {} minutes",
            entry.subject,
            class,
            lead.num_minutes()
        ),
        None => format!("{} starts in {} minutes", entry.subject, lead.num_minutes()),
    };

    let mut data = BTreeMap::new();
    data.insert("event".to_string(), "reminder".to_string());
    data.insert("schedule_id".to_string(), entry.id.to_string());
    data.insert("subject".to_string(), entry.subject.clone());
    if let Some(class) = class_name {
        data.insert("class".to_string(), class.to_string());
    }

    PushMessage {
        token: token.to_string(),
        title: "Upcoming class".to_string(),
        body,
        data,
        priority: PushPriority::High,
    }
}
