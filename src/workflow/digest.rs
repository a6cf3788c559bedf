//! Digest assembly and plain-text rendering.
//!
//! Assembly is pure: it orders per-meeting results by start time (title
//! breaks ties) and flags the empty day. Every qualifying meeting appears,
//! including the ones that failed, so the digest's meeting count always
//! equals the day's qualifying meeting count.

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::Serialize;

use crate::types::{DigestRendering, MeetingOutcome, PerMeetingResult, SummaryBullets};

const SECTION_SEPARATOR: &str = "\n---\n\n";

/// The day's digest. Built once per run, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestDocument {
    date: NaiveDate,
    #[serde(skip)]
    timezone: Tz,
    entries: Vec<PerMeetingResult>,
    empty_day: bool,
}

impl DigestDocument {
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn entries(&self) -> &[PerMeetingResult] {
        &self.entries
    }

    pub fn is_empty_day(&self) -> bool {
        self.empty_day
    }

    pub fn meeting_count(&self) -> usize {
        self.entries.len()
    }

    pub fn failed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, MeetingOutcome::SummarizationFailed(_)))
            .count()
    }

    /// Render subject and body for the mail transport. Times are shown in
    /// the digest's timezone.
    pub fn render(&self) -> DigestRendering {
        let day_label = self.date.format("%a, %b %-d").to_string();

        if self.empty_day {
            return DigestRendering {
                subject: format!("No Meetings Today ({})", day_label),
                body: "You're all clear today!\n\n\
                       No meetings were found on your calendar.\n\
                       Enjoy your day!\n"
                    .to_string(),
            };
        }

        let header = format!(
            "Your prereads for {} ({} meeting{})\n\n",
            self.date.format("%A, %B %-d"),
            self.entries.len(),
            if self.entries.len() == 1 { "" } else { "s" }
        );
        let sections: Vec<String> = self
            .entries
            .iter()
            .map(|entry| self.render_entry(entry))
            .collect();

        DigestRendering {
            subject: format!("Daily Meeting Prereads ({})", day_label),
            body: format!("{}{}", header, sections.join(SECTION_SEPARATOR)),
        }
    }

    fn render_entry(&self, entry: &PerMeetingResult) -> String {
        let meeting = &entry.meeting;
        let start = meeting.start.with_timezone(&self.timezone);
        let end = meeting.end.with_timezone(&self.timezone);

        let mut out = format!(
            "{} - {}  {}\n",
            start.format("%-I:%M %p"),
            end.format("%-I:%M %p"),
            meeting.title
        );
        if !meeting.attendees.is_empty() {
            out.push_str(&format!("Attendees: {}\n", meeting.attendees.join(", ")));
        }
        if let Some(location) = meeting.location.as_ref().or(meeting.conference.as_ref()) {
            out.push_str(&format!("Where: {}\n", location));
        }
        out.push('\n');

        match &entry.outcome {
            MeetingOutcome::Summarized(bullets) => out.push_str(&render_bullets(bullets)),
            MeetingOutcome::NoContextFound => {
                out.push_str("No related email threads found.\n");
            }
            MeetingOutcome::SummarizationFailed(reason) => {
                out.push_str(&format!("Couldn't summarize this meeting ({}).\n", reason));
            }
        }
        out
    }
}

fn render_bullets(bullets: &SummaryBullets) -> String {
    let mut out = String::new();
    for (heading, items) in [
        ("Objective", &bullets.agenda),
        ("Key Context", &bullets.context),
        ("Questions / Decisions", &bullets.open_questions),
        ("Logistics", &bullets.logistics),
    ] {
        if items.is_empty() {
            continue;
        }
        out.push_str(heading);
        out.push('\n');
        for item in items {
            out.push_str(&format!("- {}\n", item));
        }
        out.push('\n');
    }
    out
}

/// Assemble the day's digest from per-meeting results.
pub fn assemble_digest(date: NaiveDate, timezone: Tz, mut results: Vec<PerMeetingResult>) -> DigestDocument {
    results.sort_by(|a, b| {
        a.meeting
            .start
            .cmp(&b.meeting.start)
            .then_with(|| a.meeting.title.cmp(&b.meeting.title))
    });

    DigestDocument {
        date,
        timezone,
        empty_day: results.is_empty(),
        entries: results,
    }
}
