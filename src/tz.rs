//! Timezone resolution — IANA zone names plus a small alias table.

use chrono_tz::Tz;
use std::str::FromStr;
use tracing::warn;

use crate::error::ReminderError;
use crate::store::TaskStore;

/// Common abbreviations mapped to a canonical zone. This is a convenience
/// lookup, not a fallback: anything else must be a real IANA name.
const ALIASES: &[(&str, Tz)] = &[
    ("UTC", Tz::UTC),
    ("GMT", Tz::UTC),
    ("EST", Tz::America__New_York),
    ("EDT", Tz::America__New_York),
    ("CST", Tz::America__Chicago),
    ("CDT", Tz::America__Chicago),
    ("MST", Tz::America__Denver),
    ("PST", Tz::America__Los_Angeles),
    ("PDT", Tz::America__Los_Angeles),
    ("CET", Tz::Europe__Paris),
    ("BST", Tz::Europe__London),
    ("IST", Tz::Asia__Kolkata),
    ("JST", Tz::Asia__Tokyo),
];

/// Accepts an alias or an IANA zone name, rejects everything else.
pub fn validate(name: &str) -> Result<Tz, ReminderError> {
    let trimmed = name.trim();
    if let Some((_, tz)) = ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(trimmed))
    {
        return Ok(*tz);
    }
    Tz::from_str(trimmed).map_err(|_| ReminderError::InvalidTimezone(trimmed.to_string()))
}

/// Strict resolution of a persisted zone name: absent means UTC, but a
/// present name that no longer resolves is an error. Boot restore uses
/// this to skip tasks with a since-deprecated zone.
pub fn zone_of(stored: Option<&str>) -> Result<Tz, ReminderError> {
    match stored {
        None => Ok(Tz::UTC),
        Some(name) => validate(name),
    }
}

/// Owner's zone for display purposes. Never fails: an unresolvable
/// persisted name falls back to UTC with a warning.
pub async fn resolve(store: &TaskStore, owner: &str) -> Tz {
    let stored = store.timezone(owner).await.ok().flatten();
    match zone_of(stored.as_deref()) {
        Ok(tz) => tz,
        Err(_) => {
            warn!(owner, zone = ?stored, "persisted timezone no longer resolves, using UTC");
            Tz::UTC
        }
    }
}
