//! Task store — SQLite persistence for reminders and timezone preferences.
//!
//! Two tables, matching the persisted layout:
//! - `tasks(id, owner, text, mode, payload, hour, minute)` where `payload`
//!   is a comma-joined list of weekday abbreviations or ISO dates,
//!   disambiguated by `mode`
//! - `timezones(owner PRIMARY KEY, zone)`

use chrono::{NaiveDate, Weekday};
use rusqlite::Connection;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::ReminderError;

pub type TaskId = i64;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// What a task's payload means: a recurring weekday pattern or a set of
/// concrete calendar dates. Never empty once committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Weekly(Vec<Weekday>),
    OneOff(Vec<NaiveDate>),
}

pub const WEEKDAY_ABBRS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

pub fn weekday_abbr(day: Weekday) -> &'static str {
    WEEKDAY_ABBRS[day.num_days_from_monday() as usize]
}

pub fn parse_weekday(s: &str) -> Option<Weekday> {
    match s {
        "Mon" => Some(Weekday::Mon),
        "Tue" => Some(Weekday::Tue),
        "Wed" => Some(Weekday::Wed),
        "Thu" => Some(Weekday::Thu),
        "Fri" => Some(Weekday::Fri),
        "Sat" => Some(Weekday::Sat),
        "Sun" => Some(Weekday::Sun),
        _ => None,
    }
}

impl Schedule {
    pub fn mode(&self) -> &'static str {
        match self {
            Schedule::Weekly(_) => "weekly",
            Schedule::OneOff(_) => "oneoff",
        }
    }

    /// Serialize the payload column.
    pub fn payload(&self) -> String {
        match self {
            Schedule::Weekly(days) => days
                .iter()
                .map(|d| weekday_abbr(*d))
                .collect::<Vec<_>>()
                .join(","),
            Schedule::OneOff(dates) => dates
                .iter()
                .map(|d| d.format("%Y-%-m-%-d").to_string())
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Parse mode + payload columns back into a schedule. An empty or
    /// unrecognized payload is a corrupt row, never a valid schedule.
    pub fn parse(mode: &str, payload: &str) -> Result<Self, String> {
        match mode {
            "weekly" => {
                let days = payload
                    .split(',')
                    .map(|s| parse_weekday(s.trim()).ok_or_else(|| format!("bad weekday {s:?}")))
                    .collect::<Result<Vec<_>, _>>()?;
                if days.is_empty() {
                    return Err("empty weekday payload".into());
                }
                Ok(Schedule::Weekly(days))
            }
            "oneoff" => {
                let dates = payload
                    .split(',')
                    .map(|s| {
                        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                            .map_err(|e| format!("bad date {s:?}: {e}"))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if dates.is_empty() {
                    return Err("empty date payload".into());
                }
                Ok(Schedule::OneOff(dates))
            }
            other => Err(format!("unknown mode {other:?}")),
        }
    }
}

/// A committed reminder. Immutable once stored — edits are delete + re-add.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub owner: String,
    pub text: String,
    pub schedule: Schedule,
    pub hour: u32,
    pub minute: u32,
}

/// A task as assembled by the add flow, before the store assigns an id.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub owner: String,
    pub text: String,
    pub schedule: Schedule,
    pub hour: u32,
    pub minute: u32,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct TaskStore {
    conn: Mutex<Connection>,
}

impl TaskStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self, ReminderError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner TEXT NOT NULL,
                text TEXT NOT NULL,
                mode TEXT NOT NULL,
                payload TEXT NOT NULL,
                hour INTEGER NOT NULL,
                minute INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS timezones (
                owner TEXT PRIMARY KEY,
                zone TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append a new task and return its fresh id. The write is durable
    /// before this returns, so scheduling always happens after persistence.
    pub async fn create(&self, task: &NewTask) -> Result<TaskId, ReminderError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tasks (owner, text, mode, payload, hour, minute) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                task.owner,
                task.text,
                task.schedule.mode(),
                task.schedule.payload(),
                task.hour,
                task.minute
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// All tasks for one owner, in insertion order. Corrupt rows are
    /// logged and skipped.
    pub async fn list(&self, owner: &str) -> Result<Vec<Task>, ReminderError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, owner, text, mode, payload, hour, minute FROM tasks WHERE owner = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([owner], row_to_raw)?;
        Ok(collect_tasks(rows))
    }

    /// Every persisted task, used by boot restore only.
    pub async fn all(&self) -> Result<Vec<Task>, ReminderError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT id, owner, text, mode, payload, hour, minute FROM tasks ORDER BY id")?;
        let rows = stmt.query_map([], row_to_raw)?;
        Ok(collect_tasks(rows))
    }

    /// Remove a task record. A second delete of the same id fails.
    pub async fn delete(&self, id: TaskId) -> Result<(), ReminderError> {
        let conn = self.conn.lock().await;
        let n = conn.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(ReminderError::TaskNotFound(id));
        }
        Ok(())
    }

    /// Remove one fired date from a one-off task's payload; deletes the
    /// whole record when it was the last pending date. Dates that have not
    /// fired yet are kept.
    pub async fn prune_date(&self, id: TaskId, date: NaiveDate) -> Result<(), ReminderError> {
        let conn = self.conn.lock().await;
        let (mode, payload): (String, String) = conn
            .query_row(
                "SELECT mode, payload FROM tasks WHERE id = ?1",
                [id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => ReminderError::TaskNotFound(id),
                other => ReminderError::Db(other),
            })?;

        let schedule = Schedule::parse(&mode, &payload)
            .map_err(|reason| ReminderError::CorruptRecord { id, reason })?;
        let Schedule::OneOff(mut dates) = schedule else {
            return Err(ReminderError::CorruptRecord {
                id,
                reason: "prune_date on a weekly task".into(),
            });
        };
        dates.retain(|d| *d != date);

        if dates.is_empty() {
            conn.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
        } else {
            conn.execute(
                "UPDATE tasks SET payload = ?1 WHERE id = ?2",
                rusqlite::params![Schedule::OneOff(dates).payload(), id],
            )?;
        }
        Ok(())
    }

    /// Persisted zone name for an owner, if any.
    pub async fn timezone(&self, owner: &str) -> Result<Option<String>, ReminderError> {
        let conn = self.conn.lock().await;
        match conn.query_row(
            "SELECT zone FROM timezones WHERE owner = ?1",
            [owner],
            |r| r.get::<_, String>(0),
        ) {
            Ok(zone) => Ok(Some(zone)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Upsert the single timezone row for an owner. Last write wins.
    pub async fn set_timezone(&self, owner: &str, zone: &str) -> Result<(), ReminderError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO timezones (owner, zone) VALUES (?1, ?2) \
             ON CONFLICT(owner) DO UPDATE SET zone = excluded.zone",
            [owner, zone],
        )?;
        Ok(())
    }
}

struct RawTask {
    id: TaskId,
    owner: String,
    text: String,
    mode: String,
    payload: String,
    hour: u32,
    minute: u32,
}

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawTask> {
    Ok(RawTask {
        id: row.get(0)?,
        owner: row.get(1)?,
        text: row.get(2)?,
        mode: row.get(3)?,
        payload: row.get(4)?,
        hour: row.get(5)?,
        minute: row.get(6)?,
    })
}

fn collect_tasks(rows: impl Iterator<Item = rusqlite::Result<RawTask>>) -> Vec<Task> {
    let mut out = Vec::new();
    for row in rows {
        let raw = match row {
            Ok(r) => r,
            Err(e) => {
                warn!("skipping unreadable task row: {e}");
                continue;
            }
        };
        match Schedule::parse(&raw.mode, &raw.payload) {
            Ok(schedule) => out.push(Task {
                id: raw.id,
                owner: raw.owner,
                text: raw.text,
                schedule,
                hour: raw.hour,
                minute: raw.minute,
            }),
            Err(reason) => warn!(id = raw.id, %reason, "skipping corrupt task row"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> TaskStore {
        TaskStore::open(&dir.path().join("tasks.db")).unwrap()
    }

    fn weekly(owner: &str, text: &str) -> NewTask {
        NewTask {
            owner: owner.into(),
            text: text.into(),
            schedule: Schedule::Weekly(vec![Weekday::Mon, Weekday::Wed]),
            hour: 9,
            minute: 0,
        }
    }

    #[test]
    fn schedule_payload_roundtrip() {
        let s = Schedule::Weekly(vec![Weekday::Mon, Weekday::Fri]);
        assert_eq!(s.payload(), "Mon,Fri");
        assert_eq!(Schedule::parse("weekly", "Mon,Fri").unwrap(), s);

        let d = Schedule::OneOff(vec![NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()]);
        assert_eq!(d.payload(), "2025-1-1");
        assert_eq!(Schedule::parse("oneoff", "2025-1-1").unwrap(), d);
    }

    #[test]
    fn schedule_parse_rejects_garbage() {
        assert!(Schedule::parse("weekly", "Mon,Funday").is_err());
        assert!(Schedule::parse("oneoff", "not-a-date").is_err());
        assert!(Schedule::parse("monthly", "Mon").is_err());
        assert!(Schedule::parse("weekly", "").is_err());
    }

    #[tokio::test]
    async fn create_list_preserves_insertion_order() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let a = store.create(&weekly("u1", "first")).await.unwrap();
        let b = store.create(&weekly("u1", "second")).await.unwrap();
        store.create(&weekly("u2", "other owner")).await.unwrap();

        let tasks = store.list("u1").await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!((tasks[0].id, tasks[0].text.as_str()), (a, "first"));
        assert_eq!((tasks[1].id, tasks[1].text.as_str()), (b, "second"));
    }

    #[tokio::test]
    async fn delete_is_not_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let id = store.create(&weekly("u1", "t")).await.unwrap();
        store.delete(id).await.unwrap();
        assert!(matches!(
            store.delete(id).await,
            Err(ReminderError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn prune_date_keeps_pending_dates() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let d1 = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        let id = store
            .create(&NewTask {
                owner: "u1".into(),
                text: "call mom".into(),
                schedule: Schedule::OneOff(vec![d1, d2]),
                hour: 8,
                minute: 0,
            })
            .await
            .unwrap();

        store.prune_date(id, d1).await.unwrap();
        let tasks = store.list("u1").await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].schedule, Schedule::OneOff(vec![d2]));

        // last date fired: whole record goes away
        store.prune_date(id, d2).await.unwrap();
        assert!(store.list("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn timezone_upsert_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert_eq!(store.timezone("u1").await.unwrap(), None);

        store.set_timezone("u1", "Europe/London").await.unwrap();
        store.set_timezone("u1", "America/New_York").await.unwrap();
        assert_eq!(
            store.timezone("u1").await.unwrap().as_deref(),
            Some("America/New_York")
        );
    }

    #[tokio::test]
    async fn all_skips_corrupt_rows() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.create(&weekly("u1", "good")).await.unwrap();
        {
            let conn = store.conn.lock().await;
            conn.execute(
                "INSERT INTO tasks (owner, text, mode, payload, hour, minute) \
                 VALUES ('u1', 'bad', 'weekly', 'Funday', 9, 0)",
                [],
            )
            .unwrap();
        }
        let tasks = store.all().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].text, "good");
    }
}
