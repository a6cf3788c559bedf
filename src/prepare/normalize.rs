//! Raw calendar entries to canonical meeting records.
//!
//! The calendar collaborator hands over everything on the day; deciding what
//! counts as a meeting happens here. Output order is not meaningful.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use super::constants::{DECLINED_STATUSES, PLACEHOLDER_TITLE};
use crate::types::{EventTime, MeetingRecord, RawEvent};

/// Normalize a day's raw entries, dropping those that don't qualify.
pub fn normalize_events(raw: &[RawEvent]) -> Vec<MeetingRecord> {
    raw.iter().filter_map(normalize_event).collect()
}

/// Normalize one entry. Returns `None` for cancelled, declined, all-day and
/// zero-length entries.
pub fn normalize_event(event: &RawEvent) -> Option<MeetingRecord> {
    if event
        .status
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case("cancelled"))
    {
        log::debug!("Skipping cancelled event {}", event.id);
        return None;
    }

    let self_declined = event.attendees.iter().any(|a| {
        a.is_self
            && a.response_status
                .as_deref()
                .is_some_and(|s| DECLINED_STATUSES.contains(&s))
    });
    if self_declined {
        log::debug!("Skipping declined event {}", event.id);
        return None;
    }

    let (start, end) = match (&event.start, &event.end) {
        (EventTime::At(start), EventTime::At(end)) => (*start, *end),
        _ => {
            log::debug!("Skipping all-day event {}", event.id);
            return None;
        }
    };
    if end <= start {
        log::warn!(
            "Skipping event {}: end {} is not after start {}",
            event.id,
            end,
            start
        );
        return None;
    }

    let title = event
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(PLACEHOLDER_TITLE)
        .to_string();

    let self_emails: HashSet<String> = event
        .attendees
        .iter()
        .filter(|a| a.is_self)
        .map(|a| normalize_address(&a.email))
        .collect();

    let organizer = event
        .organizer
        .as_deref()
        .map(normalize_address)
        .or_else(|| {
            event
                .attendees
                .iter()
                .find(|a| a.is_organizer)
                .map(|a| normalize_address(&a.email))
        })
        .filter(|o| !o.is_empty() && !self_emails.contains(o));

    let mut seen = HashSet::new();
    let attendees: Vec<String> = event
        .attendees
        .iter()
        .filter(|a| !a.is_resource && !a.is_self && !a.is_organizer)
        .map(|a| normalize_address(&a.email))
        .filter(|email| !email.is_empty() && email.contains('@'))
        .filter(|email| organizer.as_ref() != Some(email) && !self_emails.contains(email))
        .filter(|email| seen.insert(email.clone()))
        .collect();

    Some(MeetingRecord {
        id: meeting_id_for(&event.id),
        source_event_id: event.id.clone(),
        title,
        start,
        end,
        attendees,
        organizer,
        location: non_empty(event.location.as_deref()),
        conference: non_empty(event.conference.as_deref()),
    })
}

/// Stable meeting ID derived from the calendar event ID.
///
/// Example: "evt_123" → "mtg-" + first 16 hex chars of SHA-256("evt_123")
pub fn meeting_id_for(event_id: &str) -> String {
    let digest = Sha256::digest(event_id.as_bytes());
    format!("mtg-{}", &hex::encode(digest)[..16])
}

fn normalize_address(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
