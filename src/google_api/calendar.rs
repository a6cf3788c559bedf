//! Google Calendar API v3 event fetching.
//!
//! Returns every entry in the local day unfiltered. Cancelled, declined and
//! all-day entries are excluded later by the normalizer.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;

use super::GoogleClient;
use crate::error::CollaboratorError;
use crate::sources::CalendarSource;
use crate::types::{EventTime, RawAttendee, RawEvent};

const EVENTS_URL: &str = "https://www.googleapis.com/calendar/v3/calendars/primary/events";

// ============================================================================
// API response types (deserialized from Google Calendar JSON)
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarListResponse {
    #[serde(default)]
    items: Vec<GoogleEventRaw>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEventRaw {
    #[serde(default)]
    id: String,
    #[serde(default)]
    summary: Option<String>,
    start: Option<EventDateTime>,
    end: Option<EventDateTime>,
    #[serde(default)]
    attendees: Vec<Attendee>,
    organizer: Option<Organizer>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    hangout_link: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventDateTime {
    date_time: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Attendee {
    #[serde(default)]
    email: String,
    #[serde(default)]
    response_status: Option<String>,
    #[serde(default)]
    resource: Option<bool>,
    #[serde(default)]
    organizer: Option<bool>,
    #[serde(rename = "self", default)]
    is_self: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Organizer {
    #[serde(default)]
    email: String,
    #[serde(rename = "self", default)]
    is_self: Option<bool>,
}

// ============================================================================
// Calendar API
// ============================================================================

pub struct GoogleCalendar {
    client: GoogleClient,
}

impl GoogleCalendar {
    pub fn new(client: GoogleClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CalendarSource for GoogleCalendar {
    /// Handles pagination (maxResults=250, pageToken). Bounds are local
    /// midnight in `tz`, not UTC midnight.
    async fn list_events(&self, day: NaiveDate, tz: Tz) -> Result<Vec<RawEvent>, CollaboratorError> {
        let (time_min, time_max) = day_bounds(day, tz);
        let time_min = time_min.to_rfc3339();
        let time_max = time_max.to_rfc3339();

        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("timeMin", time_min.clone()),
                ("timeMax", time_max.clone()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
                ("maxResults", "250".to_string()),
            ];
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }

            let page: CalendarListResponse = self.client.get_json(EVENTS_URL, &query).await?;
            events.extend(page.items.into_iter().filter_map(to_raw_event));

            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        log::debug!("Fetched {} calendar entries for {}", events.len(), day);
        Ok(events)
    }
}

/// Start of the local day `day` to the start of the next one, in `tz`.
fn day_bounds(day: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let next = day.succ_opt().unwrap_or(day);
    (start_of_day(day, tz), start_of_day(next, tz))
}

/// First valid local instant of `day`. Where a DST change skips midnight,
/// the day starts when local clocks resume.
fn start_of_day(day: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let midnight = day.and_time(chrono::NaiveTime::MIN);
    (0..=4 * 60)
        .step_by(15)
        .find_map(|minutes| {
            tz.from_local_datetime(&(midnight + chrono::Duration::minutes(minutes)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| {
            log::warn!("No valid local time near midnight of {} in {}", day, tz);
            Utc.from_utc_datetime(&midnight)
        })
}

/// Map an API item to a raw entry. Items without usable start/end are
/// dropped here since they cannot be placed on the day at all.
fn to_raw_event(item: GoogleEventRaw) -> Option<RawEvent> {
    let start = item.start.as_ref().and_then(parse_event_time);
    let end = item.end.as_ref().and_then(parse_event_time);
    let (Some(start), Some(end)) = (start, end) else {
        log::debug!("Skipping calendar entry {} without parseable times", item.id);
        return None;
    };

    let organizer = item
        .organizer
        .filter(|o| o.is_self != Some(true) && !o.email.is_empty())
        .map(|o| o.email);

    Some(RawEvent {
        id: item.id,
        title: item.summary,
        start,
        end,
        attendees: item
            .attendees
            .into_iter()
            .map(|a| RawAttendee {
                email: a.email,
                response_status: a.response_status,
                is_self: a.is_self.unwrap_or(false),
                is_organizer: a.organizer.unwrap_or(false),
                is_resource: a.resource.unwrap_or(false),
            })
            .collect(),
        organizer,
        status: item.status,
        location: item.location.filter(|l| !l.trim().is_empty()),
        conference: item.hangout_link,
    })
}

fn parse_event_time(value: &EventDateTime) -> Option<EventTime> {
    if let Some(dt) = value.date_time.as_deref() {
        return DateTime::parse_from_rfc3339(dt)
            .ok()
            .map(|dt| EventTime::At(dt.with_timezone(&Utc)));
    }
    value
        .date
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .map(EventTime::AllDay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn parse(json: &str) -> Vec<RawEvent> {
        let resp: CalendarListResponse = serde_json::from_str(json).unwrap();
        resp.items.into_iter().filter_map(to_raw_event).collect()
    }

    #[test]
    fn test_day_bounds_use_local_midnight() {
        let day = NaiveDate::from_ymd_opt(2026, 2, 8).unwrap();
        let (min, max) = day_bounds(day, chrono_tz::America::New_York);
        assert_eq!(min.hour(), 5); // midnight EST = 05:00 UTC
        assert_eq!(max - min, chrono::Duration::hours(24));
    }

    #[test]
    fn test_day_bounds_across_dst_change() {
        // US clocks spring forward on 2026-03-08
        let day = NaiveDate::from_ymd_opt(2026, 3, 8).unwrap();
        let (min, max) = day_bounds(day, chrono_tz::America::New_York);
        assert_eq!(max - min, chrono::Duration::hours(23));
    }

    #[test]
    fn test_day_bounds_when_midnight_is_skipped() {
        // Chile springs forward at local midnight: 00:00 -04 becomes 01:00 -03
        let tz = chrono_tz::America::Santiago;
        let day = NaiveDate::from_ymd_opt(2026, 9, 6).unwrap();
        let (min, max) = day_bounds(day, tz);

        assert_eq!(min.with_timezone(&tz).date_naive(), day);
        assert_eq!(min, Utc.with_ymd_and_hms(2026, 9, 6, 4, 0, 0).unwrap());
        assert_eq!(max, Utc.with_ymd_and_hms(2026, 9, 7, 3, 0, 0).unwrap());
    }

    #[test]
    fn test_event_deserialization() {
        let events = parse(
            r#"{
            "items": [
                {
                    "id": "event123",
                    "summary": "Team Standup",
                    "start": {"dateTime": "2026-02-08T09:00:00-05:00"},
                    "end": {"dateTime": "2026-02-08T09:30:00-05:00"},
                    "attendees": [
                        {"email": "alice@company.com", "responseStatus": "accepted", "organizer": true},
                        {"email": "me@company.com", "self": true, "responseStatus": "accepted"},
                        {"email": "room@resource.calendar.google.com", "resource": true}
                    ],
                    "organizer": {"email": "alice@company.com"},
                    "hangoutLink": "https://meet.google.com/abc-defg-hij",
                    "status": "confirmed"
                }
            ]
        }"#,
        );

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.title.as_deref(), Some("Team Standup"));
        match event.start {
            EventTime::At(dt) => assert_eq!(dt.hour(), 14),
            ref other => panic!("expected timed entry, got {:?}", other),
        }
        assert_eq!(event.attendees.len(), 3);
        assert!(event.attendees[0].is_organizer);
        assert!(event.attendees[1].is_self);
        assert!(event.attendees[2].is_resource);
        assert_eq!(event.organizer.as_deref(), Some("alice@company.com"));
        assert_eq!(
            event.conference.as_deref(),
            Some("https://meet.google.com/abc-defg-hij")
        );
    }

    #[test]
    fn test_all_day_and_cancelled_entries_pass_through() {
        let events = parse(
            r#"{
            "items": [
                {
                    "id": "allday1",
                    "summary": "Holiday",
                    "start": {"date": "2026-02-08"},
                    "end": {"date": "2026-02-09"}
                },
                {
                    "id": "cancelled1",
                    "start": {"dateTime": "2026-02-08T10:00:00Z"},
                    "end": {"dateTime": "2026-02-08T11:00:00Z"},
                    "status": "cancelled"
                }
            ]
        }"#,
        );

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].start, EventTime::AllDay(_)));
        assert_eq!(events[1].status.as_deref(), Some("cancelled"));
        assert!(events[1].title.is_none());
    }

    #[test]
    fn test_self_organizer_is_not_reported() {
        let events = parse(
            r#"{
            "items": [{
                "id": "mine",
                "summary": "1:1",
                "start": {"dateTime": "2026-02-08T10:00:00Z"},
                "end": {"dateTime": "2026-02-08T10:30:00Z"},
                "organizer": {"email": "me@company.com", "self": true}
            }]
        }"#,
        );
        assert!(events[0].organizer.is_none());
    }

    #[test]
    fn test_entry_without_times_is_skipped() {
        let events = parse(r#"{"items": [{"id": "broken", "summary": "?"}]}"#);
        assert!(events.is_empty());
    }
}
