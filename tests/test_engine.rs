//! End-to-end tests across the router, add flow, store and scheduler,
//! driven through the message bus the way a transport channel would.

mod common;

use common::Harness;
use remindbot::error::ReminderError;
use remindbot::scheduler::{job_keys, next_weekly_occurrence};
use remindbot::store::{Schedule, Task};

use chrono::{TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;

/// Walk owner through the full weekly add dialogue for "standup" on
/// Mon+Wed at 09:00.
async fn add_weekly_standup(h: &mut Harness, owner: &str) {
    let reply = h.say(owner, "/add").await;
    assert_eq!(reply.content, "Send the task text");

    let reply = h.say(owner, "standup").await;
    assert!(!reply.keyboard.is_empty(), "expected the kind keyboard");

    let reply = h.tap(owner, "kind:weekly").await;
    assert!(reply.content.contains("(none)"));

    let reply = h.tap(owner, "day:Mon").await;
    assert!(reply.content.contains("Mon"));
    let reply = h.tap(owner, "day:Wed").await;
    assert!(reply.content.contains("Mon, Wed"));

    let reply = h.tap(owner, "day:done").await;
    assert!(reply.content.contains("time"));

    let reply = h.say(owner, "9:00").await;
    assert!(reply.content.starts_with("✅ Saved for Mon,Wed at 09:00"));
}

#[tokio::test]
async fn weekly_add_registers_one_timer_per_weekday() {
    let mut h = Harness::spawn();
    add_weekly_standup(&mut h, "u1").await;

    // two job keys: (u1, standup, Mon 09:00) and (u1, standup, Wed 09:00)
    assert_eq!(h.scheduler.active_jobs().await, 2);

    let tasks = h.store.list("u1").await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(
        tasks[0].schedule,
        Schedule::Weekly(vec![Weekday::Mon, Weekday::Wed])
    );

    // the scenario's fire instant: next Monday 09:00 UTC
    let after = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let next = next_weekly_occurrence(after, Tz::UTC, Weekday::Mon, 9, 0).unwrap();
    assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap());

    // weekly tasks stay listed after registration (and after fires)
    let reply = h.say("u1", "/list").await;
    assert!(reply.content.contains("1. standup (Mon,Wed @ 09:00)"));
}

#[tokio::test]
async fn readding_the_same_reminder_does_not_duplicate_timers() {
    let mut h = Harness::spawn();
    add_weekly_standup(&mut h, "u1").await;
    add_weekly_standup(&mut h, "u1").await;

    // two records in the store (edits are delete + re-add), but the job
    // keys collide so only one timer per key survives
    assert_eq!(h.store.list("u1").await.unwrap().len(), 2);
    assert_eq!(h.scheduler.active_jobs().await, 2);
}

#[tokio::test]
async fn past_one_off_is_listed_but_never_armed() {
    let mut h = Harness::spawn();
    let r = h.say("u2", "/add").await;
    assert_eq!(r.content, "Send the task text");
    h.say("u2", "call mom").await;
    h.tap("u2", "kind:oneoff").await;
    let r = h.say("u2", "2025-1-1").await;
    assert!(r.content.contains("time"));
    let r = h.say("u2", "8:00").await;
    assert!(r.content.starts_with("✅ Saved"));

    // the instant is long past: zero timers, but the task stays listed
    // until explicitly deleted
    assert_eq!(h.scheduler.active_jobs().await, 0);
    let r = h.say("u2", "/list").await;
    assert!(r.content.contains("1. call mom (2025-1-1 @ 08:00)"));
}

#[tokio::test]
async fn delete_cancels_all_derived_timers() {
    let mut h = Harness::spawn();
    add_weekly_standup(&mut h, "u1").await;
    assert_eq!(h.scheduler.active_jobs().await, 2);

    let tasks = h.store.list("u1").await.unwrap();
    let keys = job_keys(&tasks[0]);

    let r = h.say("u1", "/delete 1").await;
    assert!(r.content.contains("Deleted"));
    assert_eq!(h.scheduler.active_jobs().await, 0);
    for key in keys {
        assert!(!h.scheduler.is_registered(&key).await);
    }
    assert!(h.store.list("u1").await.unwrap().is_empty());
}

#[tokio::test]
async fn out_of_range_delete_reports_bad_index_and_changes_nothing() {
    let mut h = Harness::spawn();
    add_weekly_standup(&mut h, "u1").await;
    add_weekly_standup(&mut h, "u1").await;

    for bad in ["3", "0", "nope", ""] {
        let r = h.say("u1", &format!("/delete {bad}")).await;
        assert!(r.content.starts_with("❌"), "got: {}", r.content);
    }
    assert_eq!(h.store.list("u1").await.unwrap().len(), 2);
    assert_eq!(h.scheduler.active_jobs().await, 2);
}

#[tokio::test]
async fn settz_validates_and_upserts() {
    let mut h = Harness::spawn();
    let r = h.say("u1", "/settz Europe/London").await;
    assert!(r.content.starts_with("✅ Timezone set to Europe/London"));

    let r = h.say("u1", "/settz est").await;
    assert!(r.content.contains("America/New_York"));
    assert_eq!(
        h.store.timezone("u1").await.unwrap().as_deref(),
        Some("America/New_York")
    );

    let r = h.say("u1", "/settz Nowhere/Special").await;
    assert!(r.content.starts_with("❌"));
    // rejected zone does not clobber the stored one
    assert_eq!(
        h.store.timezone("u1").await.unwrap().as_deref(),
        Some("America/New_York")
    );
}

#[tokio::test]
async fn armed_one_off_fires_and_removes_itself() {
    let mut h = Harness::spawn();
    // minute granularity: the nearest schedulable instant is the next
    // minute boundary, so the fire lands within about a minute
    let target = Utc::now() + chrono::Duration::seconds(61);
    let date = target.date_naive();
    let task = Task {
        id: 1,
        owner: "u2".into(),
        text: "call mom".into(),
        schedule: Schedule::OneOff(vec![date]),
        hour: target.hour(),
        minute: target.minute(),
    };
    h.scheduler.register_task(&task, Tz::UTC).await;
    assert_eq!(h.scheduler.active_jobs().await, 1);

    let event = tokio::time::timeout(std::time::Duration::from_secs(90), h.fire_rx.recv())
        .await
        .expect("one-off timer never fired")
        .expect("fire channel closed");
    assert_eq!(event.task_id, 1);
    assert_eq!(event.fired_date, Some(date));

    // the timer removes its own registry entry after firing
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(h.scheduler.active_jobs().await, 0);
}

#[tokio::test]
async fn stray_button_tap_gets_help_not_a_cancel() {
    let mut h = Harness::spawn();
    // taps on a stale keyboard, no flow in progress
    for data in ["day:Mon", "day:done", "kind:weekly"] {
        let r = h.tap("u1", data).await;
        assert!(r.content.contains("/add"), "got: {}", r.content);
        assert!(!r.content.contains("cancelled"), "got: {}", r.content);
    }
    assert!(h.store.list("u1").await.unwrap().is_empty());

    // a fresh /add afterwards runs normally
    let r = h.say("u1", "/add").await;
    assert_eq!(r.content, "Send the task text");
}

#[tokio::test]
async fn empty_weekday_selection_cancels_the_flow() {
    let mut h = Harness::spawn();
    h.say("u1", "/add").await;
    h.say("u1", "gym").await;
    h.tap("u1", "kind:weekly").await;
    let r = h.tap("u1", "day:done").await;
    assert!(r.content.contains("cancelled"));

    assert!(h.store.list("u1").await.unwrap().is_empty());
    // the session is gone: plain text now gets the help message
    let r = h.say("u1", "hello").await;
    assert!(r.content.contains("/add"));
}

#[tokio::test]
async fn invalid_inputs_reprompt_within_the_flow() {
    let mut h = Harness::spawn();
    h.say("u1", "/add").await;

    let r = h.say("u1", "   ").await;
    assert!(r.content.contains("❌"));
    // still collecting text: a valid one advances to the kind choice
    let r = h.say("u1", "water plants").await;
    assert!(!r.keyboard.is_empty());

    h.tap("u1", "kind:oneoff").await;
    let r = h.say("u1", "next tuesday").await;
    assert!(r.content.contains("❌"));
    let r = h.say("u1", "2099-6-1").await;
    assert!(r.content.contains("time"));

    let r = h.say("u1", "99:99").await;
    assert!(r.content.contains("❌"));
    let r = h.say("u1", "7pm").await;
    assert!(r.content.starts_with("✅ Saved"));
    assert_eq!(h.scheduler.active_jobs().await, 1);
}

#[tokio::test]
async fn fresh_add_replaces_stale_session() {
    let mut h = Harness::spawn();
    h.say("u1", "/add").await;
    h.say("u1", "first attempt").await;

    // re-entrant: a new /add starts from scratch
    let r = h.say("u1", "/add").await;
    assert_eq!(r.content, "Send the task text");
    let r = h.say("u1", "second attempt").await;
    assert!(!r.keyboard.is_empty());
}

#[tokio::test]
async fn restart_restores_without_double_registering() {
    let mut h = Harness::spawn();
    add_weekly_standup(&mut h, "u1").await;
    assert_eq!(h.scheduler.active_jobs().await, 2);

    // "restart": a fresh scheduler fed from the same store
    let (fire_tx, _fire_rx) = tokio::sync::mpsc::channel(8);
    let fresh = remindbot::scheduler::TriggerScheduler::new(fire_tx);
    assert_eq!(fresh.restore_all(&h.store).await.unwrap(), 1);
    assert_eq!(fresh.active_jobs().await, 2);

    // restoring again is a no-op thanks to per-key dedup
    fresh.restore_all(&h.store).await.unwrap();
    assert_eq!(fresh.active_jobs().await, 2);
}

#[test]
fn bad_index_error_reads_well() {
    let e = ReminderError::BadIndex("3".into());
    assert_eq!(e.to_string(), "no task number 3");
}
