//! Command router — consumes inbound messages, runs the command surface
//! (`/add`, `/list`, `/delete`, `/settz`) and drives the per-owner add
//! flow. Owns the session table; all user-facing text is rendered here.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::bus::{Button, InboundMessage, OutboundMessage};
use crate::error::ReminderError;
use crate::flow::{format_days, parse_day_callback, FlowStep, Session, TriggerKind};
use crate::scheduler::TriggerScheduler;
use crate::store::{weekday_abbr, NewTask, Schedule, TaskStore, WEEKDAY_ABBRS};
use crate::tz;

const HELP: &str = "👋 Reminder Bot\n\
    /add – new reminder\n\
    /list – show reminders\n\
    /delete <number> – remove one\n\
    /settz Region/City – set timezone";

pub struct CommandRouter {
    store: Arc<TaskStore>,
    scheduler: Arc<TriggerScheduler>,
    sessions: HashMap<String, Session>,
    inbound_rx: mpsc::Receiver<InboundMessage>,
    outbound_tx: broadcast::Sender<OutboundMessage>,
}

impl CommandRouter {
    pub fn new(
        store: Arc<TaskStore>,
        scheduler: Arc<TriggerScheduler>,
        inbound_rx: mpsc::Receiver<InboundMessage>,
        outbound_tx: broadcast::Sender<OutboundMessage>,
    ) -> Self {
        Self {
            store,
            scheduler,
            sessions: HashMap::new(),
            inbound_rx,
            outbound_tx,
        }
    }

    pub async fn run(mut self) {
        while let Some(msg) = self.inbound_rx.recv().await {
            if let Err(e) = self.handle(&msg).await {
                warn!(owner = %msg.chat_id, "command failed: {e}");
                self.reply(&msg, format!("❌ {e}"));
            }
        }
    }

    async fn handle(&mut self, msg: &InboundMessage) -> Result<(), ReminderError> {
        let owner = msg.chat_id.clone();

        if let Some(data) = &msg.callback {
            // a tap with no flow in progress (stale keyboard) gets the
            // help text, never a cancel notice
            let Some(session) = self.sessions.get_mut(&owner) else {
                debug!(owner = %owner, data, "button tap without a session");
                self.reply(msg, HELP.into());
                return Ok(());
            };
            let step = match data.as_str() {
                "kind:oneoff" => Ok(session.choose_kind(TriggerKind::OneOff)),
                "kind:weekly" => Ok(session.choose_kind(TriggerKind::Weekly)),
                "day:done" => session.finalize_days(),
                other => Ok(match other.strip_prefix("day:").and_then(parse_day_callback) {
                    Some(day) => session.toggle_day(day),
                    None => session.current_prompt(),
                }),
            };
            return match step {
                Ok(step) => self.apply_step(msg, &owner, step).await,
                Err(e) => {
                    // empty weekday selection at "done": flow over,
                    // nothing committed
                    self.sessions.remove(&owner);
                    self.reply(msg, format!("❌ {e} – cancelled."));
                    Ok(())
                }
            };
        }

        let text = msg.content.trim();
        let (command, args) = match text.split_once(char::is_whitespace) {
            Some((c, a)) => (c, a.trim()),
            None => (text, ""),
        };

        match command {
            "/start" | "/help" => {
                self.reply(msg, HELP.into());
                Ok(())
            }
            "/add" => {
                // a new /add always replaces any in-progress session
                self.sessions.insert(owner, Session::new());
                self.reply(msg, "Send the task text".into());
                Ok(())
            }
            "/list" => self.cmd_list(msg, &owner).await,
            "/delete" => self.cmd_delete(msg, &owner, args).await,
            "/settz" => self.cmd_settz(msg, &owner, args).await,
            _ => {
                // free text: feed the active session, otherwise show help
                match self.sessions.get_mut(&owner) {
                    Some(session) => {
                        let step = session.on_text(text);
                        match step {
                            Ok(step) => self.apply_step(msg, &owner, step).await,
                            Err(e) => {
                                self.reply(msg, reprompt_text(&e));
                                Ok(())
                            }
                        }
                    }
                    None => {
                        self.reply(msg, HELP.into());
                        Ok(())
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Add-flow plumbing
    // -----------------------------------------------------------------

    async fn apply_step(
        &mut self,
        msg: &InboundMessage,
        owner: &str,
        step: FlowStep,
    ) -> Result<(), ReminderError> {
        match step {
            FlowStep::PromptText => self.reply(msg, "Send the task text".into()),
            FlowStep::PromptKind => self.send(OutboundMessage::with_keyboard(
                &msg.channel,
                &msg.chat_id,
                "One-off dates or weekly pattern?".into(),
                vec![vec![
                    Button::new("📅 dates", "kind:oneoff"),
                    Button::new("🔁 weekly", "kind:weekly"),
                ]],
            )),
            FlowStep::PromptDates => {
                self.reply(msg, "Send date(s) as YYYY-M-D, comma-separated".into())
            }
            FlowStep::PromptWeekdays(days) => {
                let mut rows: Vec<Vec<Button>> = WEEKDAY_ABBRS
                    .iter()
                    .map(|d| vec![Button::new(*d, format!("day:{d}"))])
                    .collect();
                rows.push(vec![Button::new("✅ done", "day:done")]);
                self.send(OutboundMessage::with_keyboard(
                    &msg.channel,
                    &msg.chat_id,
                    format!("Pick weekday(s): {}", format_days(&days)),
                    rows,
                ));
            }
            FlowStep::PromptTime => {
                self.reply(msg, "Send the time (19:30, 7pm, 7:15 am)".into())
            }
            FlowStep::Committed(draft) => {
                self.sessions.remove(owner);
                let new_task = NewTask {
                    owner: owner.to_string(),
                    text: draft.text,
                    schedule: draft.schedule,
                    hour: draft.hour,
                    minute: draft.minute,
                };
                // persist first; a crash between persist and schedule is
                // recovered by boot restore
                let id = self.store.create(&new_task).await?;
                let zone = tz::resolve(&self.store, owner).await;
                let task = crate::store::Task {
                    id,
                    owner: new_task.owner,
                    text: new_task.text,
                    schedule: new_task.schedule,
                    hour: new_task.hour,
                    minute: new_task.minute,
                };
                self.scheduler.register_task(&task, zone).await;
                self.reply(
                    msg,
                    format!(
                        "✅ Saved for {} at {:02}:{:02} ({zone}).",
                        describe_schedule(&task.schedule),
                        task.hour,
                        task.minute
                    ),
                );
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------

    async fn cmd_list(&self, msg: &InboundMessage, owner: &str) -> Result<(), ReminderError> {
        let tasks = self.store.list(owner).await?;
        if tasks.is_empty() {
            self.reply(msg, "No reminders.".into());
            return Ok(());
        }
        let zone = tz::resolve(&self.store, owner).await;
        let mut lines: Vec<String> = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| {
                format!(
                    "{}. {} ({} @ {:02}:{:02})",
                    i + 1,
                    t.text,
                    describe_schedule(&t.schedule),
                    t.hour,
                    t.minute
                )
            })
            .collect();
        lines.push(format!("Times in {zone}"));
        self.reply(msg, lines.join("\n"));
        Ok(())
    }

    async fn cmd_delete(
        &self,
        msg: &InboundMessage,
        owner: &str,
        args: &str,
    ) -> Result<(), ReminderError> {
        let index: usize = args
            .parse()
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| ReminderError::BadIndex(args.to_string()))?;
        let tasks = self.store.list(owner).await?;
        let task = tasks
            .get(index - 1)
            .ok_or_else(|| ReminderError::BadIndex(args.to_string()))?;

        // cancel pending timers before the record goes away so a deleted
        // task can never fire
        self.scheduler.cancel_task(task).await;
        self.store.delete(task.id).await?;
        self.reply(msg, format!("🗑 Deleted \"{}\".", task.text));
        Ok(())
    }

    async fn cmd_settz(
        &self,
        msg: &InboundMessage,
        owner: &str,
        args: &str,
    ) -> Result<(), ReminderError> {
        if args.is_empty() {
            self.reply(msg, "Usage: /settz Europe/London".into());
            return Ok(());
        }
        let zone = tz::validate(args)?;
        self.store.set_timezone(owner, &zone.to_string()).await?;
        self.reply(
            msg,
            format!("✅ Timezone set to {zone}. Applies to reminders added from now on."),
        );
        Ok(())
    }

    // -----------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------

    fn reply(&self, msg: &InboundMessage, content: String) {
        self.send(OutboundMessage::chat(&msg.channel, &msg.chat_id, content));
    }

    fn send(&self, msg: OutboundMessage) {
        if let Err(e) = self.outbound_tx.send(msg) {
            warn!("no outbound subscriber: {e}");
        }
    }
}

fn describe_schedule(schedule: &Schedule) -> String {
    match schedule {
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

/// Flow validation errors re-prompt instead of aborting the session.
fn reprompt_text(err: &ReminderError) -> String {
    match err {
        ReminderError::EmptyText => "❌ Task text cannot be empty. Send the task text".into(),
        ReminderError::InvalidDateFormat(s) => {
            format!("❌ \"{s}\" is not a YYYY-M-D date. Try again")
        }
        ReminderError::InvalidTime(s) => format!("❌ \"{s}\" — try 19:30 or 7pm."),
        other => format!("❌ {other}"),
    }
}
