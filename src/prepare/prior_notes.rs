//! Notes from earlier occurrences of a meeting.
//!
//! Note-taking apps mail a recap to the attendees after each meeting. For a
//! recurring meeting the newest recap is useful background, found by exact
//! title plus a marker word ("Granola") among the attendees' mail.
//!
//! Notes are supplementary: a failed lookup is logged and the meeting is
//! prepared without them.

use std::time::Duration;

use super::constants::PLACEHOLDER_TITLE;
use super::thread_matcher::meeting_participants;
use crate::sources::{bounded_call, MailboxSource};
use crate::types::{MeetingRecord, NotesConfig, NotesQuery, RawNote};

#[derive(Debug, Clone)]
pub struct NotesLookup {
    marker: String,
}

impl NotesLookup {
    /// `None` when the lookup is switched off.
    pub fn from_config(config: &NotesConfig) -> Option<Self> {
        config.enabled.then(|| Self {
            marker: config.marker.trim().to_string(),
        })
    }

    /// Untitled meetings have nothing to search for.
    pub fn query_for(&self, meeting: &MeetingRecord) -> Option<NotesQuery> {
        let title = meeting.title.trim();
        if title.is_empty() || title == PLACEHOLDER_TITLE {
            return None;
        }
        Some(NotesQuery {
            title: title.to_string(),
            marker: self.marker.clone(),
            participants: meeting_participants(meeting),
            before: meeting.start,
        })
    }

    pub async fn find(
        &self,
        meeting: &MeetingRecord,
        mailbox: &dyn MailboxSource,
        call_timeout: Duration,
    ) -> Option<RawNote> {
        let query = self.query_for(meeting)?;
        match bounded_call("notes lookup", call_timeout, || mailbox.latest_note(&query)).await {
            Ok(Some(note)) if !note.body.trim().is_empty() => {
                log::debug!("Found prior notes {} for '{}'", note.id, meeting.title);
                Some(note)
            }
            Ok(_) => None,
            Err(e) => {
                log::warn!("Notes lookup failed for '{}': {}", meeting.title, e);
                None
            }
        }
    }
}
