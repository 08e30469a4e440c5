//! # remindbot — Telegram reminder bot
//!
//! Reminders fire once on specific calendar dates or recurrently on
//! chosen weekdays, at a wall-clock time in the owner's timezone, and
//! survive restarts: every trigger is rebuilt from the SQLite store at
//! boot without double-firing or dropping tasks.
//!
//! ## Modules
//!
//! - [`store`] — SQLite persistence for tasks and timezone preferences
//! - [`flow`] — the multi-step add dialogue (state machine + grammars)
//! - [`scheduler`] — job-keyed timer registry with timezone-aware
//!   occurrence computation and boot restore
//! - [`dispatcher`] — delivery and post-fire prune/rearm policy
//! - [`router`] — the `/add` `/list` `/delete` `/settz` command surface
//! - [`channels`] — messaging transports (Telegram long-polling)

pub mod bus;
pub mod channels;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod flow;
pub mod logging;
pub mod router;
pub mod scheduler;
pub mod store;
pub mod tz;
