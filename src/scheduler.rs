//! Trigger scheduler — turns committed tasks into live timers and owns the
//! job-identity invariant: at most one active timer per job key.
//!
//! Fire instants are computed with wall-clock arithmetic in the owner's
//! zone, so a DST transition shifts the absolute instant but keeps the
//! local time. Weekly timers rearm themselves by recomputing the next
//! occurrence after every fire; one-off timers fire once and remove
//! themselves from the registry.

use chrono::{DateTime, Datelike, Days, LocalResult, NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ReminderError;
use crate::store::{Schedule, Task, TaskId, TaskStore};
use crate::tz;

// ---------------------------------------------------------------------------
// Job identity
// ---------------------------------------------------------------------------

/// One timer's sub-trigger: a single weekday+time recurrence or a single
/// calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TriggerKey {
    Weekly { day: Weekday, hour: u32, minute: u32 },
    OneOff { date: NaiveDate, hour: u32, minute: u32 },
}

/// Composite identity of one timer. Registering under an occupied key
/// cancels the previous timer first, so re-scheduling the same logical
/// recurrence never yields two live timers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub owner: String,
    pub text: String,
    pub trigger: TriggerKey,
}

/// Derive the full set of job keys from a task record alone. Cancellation
/// relies on this yielding exactly the keys registration used.
pub fn job_keys(task: &Task) -> Vec<JobKey> {
    let mut keys = Vec::new();
    match &task.schedule {
        Schedule::Weekly(days) => {
            for day in days {
                keys.push(JobKey {
                    owner: task.owner.clone(),
                    text: task.text.clone(),
                    trigger: TriggerKey::Weekly {
                        day: *day,
                        hour: task.hour,
                        minute: task.minute,
                    },
                });
            }
        }
        Schedule::OneOff(dates) => {
            for date in dates {
                keys.push(JobKey {
                    owner: task.owner.clone(),
                    text: task.text.clone(),
                    trigger: TriggerKey::OneOff {
                        date: *date,
                        hour: task.hour,
                        minute: task.minute,
                    },
                });
            }
        }
    }
    keys
}

/// Emitted to the delivery dispatcher when a timer fires.
#[derive(Debug, Clone)]
pub struct FireEvent {
    pub task_id: TaskId,
    pub owner: String,
    pub text: String,
    /// Set for one-off fires; tells the dispatcher which date to prune.
    pub fired_date: Option<NaiveDate>,
}

// ---------------------------------------------------------------------------
// Instant computation
// ---------------------------------------------------------------------------

/// First occurrence of `day` at `hour:minute` local time in `tz` strictly
/// after `after`. Returns `None` only if every candidate in the two-week
/// window lands in a DST gap, which cannot happen for a real zone.
pub fn next_weekly_occurrence(
    after: DateTime<Utc>,
    tz: Tz,
    day: Weekday,
    hour: u32,
    minute: u32,
) -> Option<DateTime<Utc>> {
    let local_after = after.with_timezone(&tz);
    let base = local_after.date_naive();
    for offset in 0..=14u64 {
        let date = base.checked_add_days(Days::new(offset))?;
        if date.weekday() != day {
            continue;
        }
        let naive = date.and_hms_opt(hour, minute, 0)?;
        let localized = match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => Some(dt),
            // Fall-back overlap: take the first of the two wall-clock hits.
            LocalResult::Ambiguous(earliest, _) => Some(earliest),
            // Spring-forward gap: that wall-clock time does not exist this
            // week; the next matching weekday is picked up by the loop.
            LocalResult::None => None,
        };
        if let Some(dt) = localized {
            let instant = dt.with_timezone(&Utc);
            if instant > after {
                return Some(instant);
            }
        }
    }
    None
}

/// Absolute instant of `(date, hour, minute)` in `tz`. A wall-clock time
/// erased by a spring-forward transition fires one hour later instead.
pub fn one_off_instant(tz: Tz, date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let naive = date.and_hms_opt(hour, minute, 0)?;
    let localized = match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => tz
            .from_local_datetime(&(naive + chrono::Duration::hours(1)))
            .earliest(),
    };
    localized.map(|dt| dt.with_timezone(&Utc))
}

// tokio timers cap out around two years; chunk long waits and re-check
// the clock against the target instant before returning
async fn sleep_until(at: DateTime<Utc>) {
    const MAX_CHUNK: std::time::Duration = std::time::Duration::from_secs(30 * 24 * 60 * 60);
    loop {
        let remaining = match (at - Utc::now()).to_std() {
            Ok(d) if !d.is_zero() => d,
            _ => return,
        };
        tokio::time::sleep(remaining.min(MAX_CHUNK)).await;
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

type JobMap = HashMap<JobKey, JoinHandle<()>>;

pub struct TriggerScheduler {
    jobs: Arc<Mutex<JobMap>>,
    fire_tx: mpsc::Sender<FireEvent>,
}

impl TriggerScheduler {
    pub fn new(fire_tx: mpsc::Sender<FireEvent>) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            fire_tx,
        }
    }

    /// Register every timer a task implies, in the given zone. For each
    /// job key any existing timer is cancelled before the replacement is
    /// armed; the registry lock is held across the whole task so
    /// cancel-then-register is atomic per key.
    pub async fn register_task(&self, task: &Task, zone: Tz) {
        let mut jobs = self.jobs.lock().await;
        match &task.schedule {
            Schedule::Weekly(days) => {
                for day in days {
                    let key = JobKey {
                        owner: task.owner.clone(),
                        text: task.text.clone(),
                        trigger: TriggerKey::Weekly {
                            day: *day,
                            hour: task.hour,
                            minute: task.minute,
                        },
                    };
                    let event = FireEvent {
                        task_id: task.id,
                        owner: task.owner.clone(),
                        text: task.text.clone(),
                        fired_date: None,
                    };
                    let handle = tokio::spawn(run_weekly(
                        zone,
                        *day,
                        task.hour,
                        task.minute,
                        event,
                        self.fire_tx.clone(),
                    ));
                    if let Some(old) = jobs.insert(key, handle) {
                        old.abort();
                    }
                }
            }
            Schedule::OneOff(dates) => {
                let now = Utc::now();
                for date in dates {
                    let key = JobKey {
                        owner: task.owner.clone(),
                        text: task.text.clone(),
                        trigger: TriggerKey::OneOff {
                            date: *date,
                            hour: task.hour,
                            minute: task.minute,
                        },
                    };
                    let instant = match one_off_instant(zone, *date, task.hour, task.minute) {
                        Some(i) => i,
                        None => {
                            warn!(task = task.id, %date, "could not localize one-off instant");
                            continue;
                        }
                    };
                    // A one-off whose instant has already passed is a
                    // no-op, not an error.
                    if instant <= now {
                        debug!(task = task.id, %date, "one-off instant in the past, skipping");
                        if let Some(old) = jobs.remove(&key) {
                            old.abort();
                        }
                        continue;
                    }
                    let event = FireEvent {
                        task_id: task.id,
                        owner: task.owner.clone(),
                        text: task.text.clone(),
                        fired_date: Some(*date),
                    };
                    let handle = tokio::spawn(run_one_off(
                        Arc::clone(&self.jobs),
                        key.clone(),
                        instant,
                        event,
                        self.fire_tx.clone(),
                    ));
                    if let Some(old) = jobs.insert(key, handle) {
                        old.abort();
                    }
                }
            }
        }
    }

    /// Cancel every timer derived from this task's record. Runs to
    /// completion before the caller deletes the record, so a deleted task
    /// can never fire afterwards.
    pub async fn cancel_task(&self, task: &Task) {
        let mut jobs = self.jobs.lock().await;
        for key in job_keys(task) {
            if let Some(handle) = jobs.remove(&key) {
                handle.abort();
            }
        }
    }

    pub async fn active_jobs(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_registered(&self, key: &JobKey) -> bool {
        self.jobs.lock().await.contains_key(key)
    }

    /// Boot restore: re-register every persisted task exactly as the add
    /// flow does after a commit. A task whose zone no longer resolves is
    /// skipped with a warning; the rest are restored. Safe to run more
    /// than once thanks to the per-key dedup.
    pub async fn restore_all(&self, store: &TaskStore) -> Result<usize, ReminderError> {
        let tasks = store.all().await?;
        let mut restored = 0;
        for task in tasks {
            let stored = store.timezone(&task.owner).await?;
            match tz::zone_of(stored.as_deref()) {
                Ok(zone) => {
                    self.register_task(&task, zone).await;
                    restored += 1;
                }
                Err(e) => {
                    warn!(task = task.id, owner = %task.owner, error = %e,
                          "skipping task during restore");
                }
            }
        }
        info!(restored, "boot restore complete");
        Ok(restored)
    }
}

async fn run_weekly(
    zone: Tz,
    day: Weekday,
    hour: u32,
    minute: u32,
    event: FireEvent,
    fire_tx: mpsc::Sender<FireEvent>,
) {
    let mut after = Utc::now();
    loop {
        let next = match next_weekly_occurrence(after, zone, day, hour, minute) {
            Some(n) => n,
            None => {
                warn!(task = event.task_id, ?day, "no schedulable occurrence found");
                return;
            }
        };
        sleep_until(next).await;
        debug!(task = event.task_id, ?day, "weekly timer fired");
        if fire_tx.send(event.clone()).await.is_err() {
            return;
        }
        // Strictly-after anchor: the next occurrence is computed from the
        // instant that just fired, never from the wake-up clock.
        after = next;
    }
}

async fn run_one_off(
    jobs: Arc<Mutex<JobMap>>,
    key: JobKey,
    at: DateTime<Utc>,
    event: FireEvent,
    fire_tx: mpsc::Sender<FireEvent>,
) {
    sleep_until(at).await;
    debug!(task = event.task_id, "one-off timer fired");
    let _ = fire_tx.send(event).await;
    jobs.lock().await.remove(&key);
}
