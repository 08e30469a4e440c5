//! Add-flow state machine — the multi-step dialogue that collects a task.
//!
//! `Start → AwaitText → ChooseKind → {AwaitDates | AwaitWeekdays} →
//! AwaitTime → Committed`. Transitions are pure: they mutate the session
//! value and return a `FlowStep` telling the router what to prompt next.
//! Validation failures leave the state unchanged so the router can
//! re-prompt; finalizing an empty weekday selection fails with
//! `EmptySelection` and the router ends the flow.

use chrono::{NaiveDate, Weekday};

use crate::error::ReminderError;
use crate::store::{parse_weekday, weekday_abbr, Schedule};

// ---------------------------------------------------------------------------
// Grammars
// ---------------------------------------------------------------------------

/// Parse `hour[:minute][am|pm]` into a 24-hour `(hour, minute)`.
///
/// With an am/pm suffix the hour must be 1–12 (`12am` → 0, `12pm` → 12);
/// without one it must be 0–23. The minute is optional, defaults to 0 and
/// must be exactly two digits when present.
pub fn parse_time(input: &str) -> Result<(u32, u32), ReminderError> {
    let raw: String = input
        .trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let invalid = || ReminderError::InvalidTime(input.trim().to_string());

    let (body, meridiem) = if let Some(b) = raw.strip_suffix("am") {
        (b, Some(false))
    } else if let Some(b) = raw.strip_suffix("pm") {
        (b, Some(true))
    } else {
        (raw.as_str(), None)
    };

    let (hour_s, minute_s) = match body.split_once(':') {
        Some((h, m)) => (h, Some(m)),
        None => (body, None),
    };

    if hour_s.is_empty() || hour_s.len() > 2 || !hour_s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let hour: u32 = hour_s.parse().map_err(|_| invalid())?;

    let minute: u32 = match minute_s {
        None => 0,
        Some(m) if m.len() == 2 && m.bytes().all(|b| b.is_ascii_digit()) => {
            m.parse().map_err(|_| invalid())?
        }
        Some(_) => return Err(invalid()),
    };

    let hour = match meridiem {
        Some(pm) => {
            if !(1..=12).contains(&hour) {
                return Err(invalid());
            }
            hour % 12 + if pm { 12 } else { 0 }
        }
        None => {
            if hour > 23 {
                return Err(invalid());
            }
            hour
        }
    };
    if minute > 59 {
        return Err(invalid());
    }
    Ok((hour, minute))
}

/// Parse a comma-separated list of `YYYY-M-D` dates (one or more).
pub fn parse_dates(input: &str) -> Result<Vec<NaiveDate>, ReminderError> {
    let mut dates = Vec::new();
    for part in input.split(',') {
        let part = part.trim();
        let date = NaiveDate::parse_from_str(part, "%Y-%m-%d")
            .map_err(|_| ReminderError::InvalidDateFormat(part.to_string()))?;
        if !dates.contains(&date) {
            dates.push(date);
        }
    }
    Ok(dates)
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    OneOff,
    Weekly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowState {
    AwaitText,
    ChooseKind,
    AwaitDates,
    AwaitWeekdays,
    AwaitTime,
}

/// Everything the flow has collected when it reaches the terminal state;
/// the router turns this into a `NewTask` and commits it.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDraft {
    pub text: String,
    pub schedule: Schedule,
    pub hour: u32,
    pub minute: u32,
}

/// What the router should do after feeding input into the session.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowStep {
    PromptText,
    PromptKind,
    PromptDates,
    /// Show the weekday keyboard; carries the current selection for echo.
    PromptWeekdays(Vec<Weekday>),
    PromptTime,
    /// Flow complete; commit this draft.
    Committed(TaskDraft),
}

/// One in-progress add flow for a single owner. Transient: a fresh `/add`
/// replaces any existing session for that owner.
#[derive(Debug, Clone)]
pub struct Session {
    state: FlowState,
    text: String,
    dates: Vec<NaiveDate>,
    days: Vec<Weekday>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: FlowState::AwaitText,
            text: String::new(),
            dates: Vec::new(),
            days: Vec::new(),
        }
    }

    /// The prompt matching the current state, for re-prompting when input
    /// arrives in an unexpected form (e.g. text while buttons are shown).
    pub fn current_prompt(&self) -> FlowStep {
        match self.state {
            FlowState::AwaitText => FlowStep::PromptText,
            FlowState::ChooseKind => FlowStep::PromptKind,
            FlowState::AwaitDates => FlowStep::PromptDates,
            FlowState::AwaitWeekdays => FlowStep::PromptWeekdays(self.sorted_days()),
            FlowState::AwaitTime => FlowStep::PromptTime,
        }
    }

    /// Feed typed text into the flow.
    pub fn on_text(&mut self, input: &str) -> Result<FlowStep, ReminderError> {
        match self.state {
            FlowState::AwaitText => {
                let trimmed = input.trim();
                if trimmed.is_empty() {
                    return Err(ReminderError::EmptyText);
                }
                self.text = trimmed.to_string();
                self.state = FlowState::ChooseKind;
                Ok(FlowStep::PromptKind)
            }
            FlowState::AwaitDates => {
                self.dates = parse_dates(input)?;
                self.state = FlowState::AwaitTime;
                Ok(FlowStep::PromptTime)
            }
            FlowState::AwaitTime => {
                let (hour, minute) = parse_time(input)?;
                let schedule = match self.dates.is_empty() {
                    true => Schedule::Weekly(self.sorted_days()),
                    false => Schedule::OneOff(self.dates.clone()),
                };
                Ok(FlowStep::Committed(TaskDraft {
                    text: self.text.clone(),
                    schedule,
                    hour,
                    minute,
                }))
            }
            // Buttons expected; repeat the prompt without advancing.
            FlowState::ChooseKind | FlowState::AwaitWeekdays => Ok(self.current_prompt()),
        }
    }

    /// Binary choice between one-off dates and a weekly pattern.
    pub fn choose_kind(&mut self, kind: TriggerKind) -> FlowStep {
        if self.state != FlowState::ChooseKind {
            return self.current_prompt();
        }
        match kind {
            TriggerKind::OneOff => {
                self.state = FlowState::AwaitDates;
                FlowStep::PromptDates
            }
            TriggerKind::Weekly => {
                self.days.clear();
                self.state = FlowState::AwaitWeekdays;
                FlowStep::PromptWeekdays(Vec::new())
            }
        }
    }

    /// Toggle one weekday in the selection (add if absent, remove if
    /// present) and stay in the same state, echoing the new set.
    pub fn toggle_day(&mut self, day: Weekday) -> FlowStep {
        if self.state != FlowState::AwaitWeekdays {
            return self.current_prompt();
        }
        if let Some(pos) = self.days.iter().position(|d| *d == day) {
            self.days.remove(pos);
        } else {
            self.days.push(day);
        }
        FlowStep::PromptWeekdays(self.sorted_days())
    }

    /// The "done" signal: advance if at least one weekday is selected.
    /// An empty selection is an error; the caller ends the flow.
    pub fn finalize_days(&mut self) -> Result<FlowStep, ReminderError> {
        if self.state != FlowState::AwaitWeekdays {
            return Ok(self.current_prompt());
        }
        if self.days.is_empty() {
            return Err(ReminderError::EmptySelection);
        }
        self.state = FlowState::AwaitTime;
        Ok(FlowStep::PromptTime)
    }

    fn sorted_days(&self) -> Vec<Weekday> {
        let mut days = self.days.clone();
        days.sort_by_key(|d| d.num_days_from_monday());
        days
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a weekday selection for echoing back to the user.
pub fn format_days(days: &[Weekday]) -> String {
    if days.is_empty() {
        return "(none)".into();
    }
    days.iter()
        .map(|d| weekday_abbr(*d))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a callback payload sent by a weekday button.
pub fn parse_day_callback(data: &str) -> Option<Weekday> {
    parse_weekday(data)
}
