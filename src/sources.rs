//! Collaborator seams.
//!
//! The core never talks to Google, an LLM or SMTP directly; it talks to these
//! traits. Adapters live in `google_api` and `intelligence`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use chrono_tz::Tz;

use crate::error::CollaboratorError;
use crate::types::{
    ContextPayload, DigestRendering, MailboxQuery, NotesQuery, RawEvent, RawNote, RawThread,
    SummaryBullets,
};

/// Source of the day's calendar entries. Must not filter anything out.
#[async_trait]
pub trait CalendarSource: Send + Sync {
    /// All entries overlapping the local day `day` in timezone `tz`.
    async fn list_events(&self, day: NaiveDate, tz: Tz) -> Result<Vec<RawEvent>, CollaboratorError>;
}

#[async_trait]
pub trait MailboxSource: Send + Sync {
    async fn search(&self, query: &MailboxQuery) -> Result<Vec<RawThread>, CollaboratorError>;

    /// The newest notes message matching `query`, with its plain-text body.
    async fn latest_note(&self, query: &NotesQuery) -> Result<Option<RawNote>, CollaboratorError>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        instructions: &str,
        payload: &ContextPayload,
    ) -> Result<SummaryBullets, CollaboratorError>;
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, digest: &DigestRendering) -> Result<(), CollaboratorError>;
}

/// The four collaborators a run needs, shareable across per-meeting tasks.
#[derive(Clone)]
pub struct Collaborators {
    pub calendar: Arc<dyn CalendarSource>,
    pub mailbox: Arc<dyn MailboxSource>,
    pub summarizer: Arc<dyn Summarizer>,
    pub transport: Arc<dyn MailTransport>,
}

/// Run one collaborator call under a call-level timeout.
///
/// A transient transport failure is retried once, immediately. Anything else,
/// including a timeout, is returned as-is.
pub async fn bounded_call<T, F, Fut>(
    label: &str,
    timeout: Duration,
    mut call: F,
) -> Result<T, CollaboratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let mut retried = false;
    loop {
        let result = match tokio::time::timeout(timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout(timeout)),
        };

        match result {
            Err(err) if err.is_transient() && !retried => {
                log::warn!("{} failed ({}), retrying once", label, err);
                retried = true;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    //! In-memory collaborators for pipeline tests.

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};
    use parking_lot::Mutex;

    use super::*;
    use crate::types::{EventTime, RawAttendee};

    pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    pub fn raw_event(id: &str, title: &str, start: DateTime<Utc>, attendees: &[&str]) -> RawEvent {
        RawEvent {
            id: id.to_string(),
            title: Some(title.to_string()),
            start: EventTime::At(start),
            end: EventTime::At(start + chrono::Duration::minutes(30)),
            attendees: attendees
                .iter()
                .map(|email| RawAttendee {
                    email: email.to_string(),
                    response_status: Some("accepted".to_string()),
                    ..Default::default()
                })
                .collect(),
            organizer: None,
            status: Some("confirmed".to_string()),
            location: None,
            conference: None,
        }
    }

    pub fn raw_thread(
        id: &str,
        subject: &str,
        sender: &str,
        received_at: DateTime<Utc>,
        excerpt: &str,
    ) -> RawThread {
        RawThread {
            id: id.to_string(),
            subject: subject.to_string(),
            sender: sender.to_string(),
            participants: vec![sender.to_string()],
            received_at,
            excerpt: excerpt.to_string(),
        }
    }

    #[derive(Default)]
    pub struct FakeCalendar {
        pub events: Vec<RawEvent>,
        pub unreachable: bool,
    }

    #[async_trait]
    impl CalendarSource for FakeCalendar {
        async fn list_events(
            &self,
            _day: NaiveDate,
            _tz: Tz,
        ) -> Result<Vec<RawEvent>, CollaboratorError> {
            if self.unreachable {
                return Err(CollaboratorError::Transport("connection refused".to_string()));
            }
            Ok(self.events.clone())
        }
    }

    /// Returns the threads registered under any key that appears among the
    /// query's terms or participants. Notes are keyed by exact meeting title.
    #[derive(Default)]
    pub struct FakeMailbox {
        pub responses: Vec<(String, Vec<RawThread>)>,
        pub failing: Vec<String>,
        pub queries: Mutex<Vec<MailboxQuery>>,
        pub notes: Vec<(String, RawNote)>,
        pub notes_unavailable: bool,
        pub note_queries: Mutex<Vec<NotesQuery>>,
    }

    impl FakeMailbox {
        pub fn with(key: &str, threads: Vec<RawThread>) -> Self {
            Self {
                responses: vec![(key.to_string(), threads)],
                ..Default::default()
            }
        }

        pub fn query_count(&self) -> usize {
            self.queries.lock().len()
        }

        pub fn with_note(mut self, title: &str, note: RawNote) -> Self {
            self.notes.push((title.to_string(), note));
            self
        }

        pub fn note_query_count(&self) -> usize {
            self.note_queries.lock().len()
        }
    }

    pub fn raw_note(id: &str, subject: &str, received_at: DateTime<Utc>, body: &str) -> RawNote {
        RawNote {
            id: id.to_string(),
            subject: subject.to_string(),
            received_at,
            body: body.to_string(),
        }
    }

    fn query_mentions(query: &MailboxQuery, key: &str) -> bool {
        query.terms.iter().any(|t| t == key) || query.participants.iter().any(|p| p == key)
    }

    #[async_trait]
    impl MailboxSource for FakeMailbox {
        async fn search(&self, query: &MailboxQuery) -> Result<Vec<RawThread>, CollaboratorError> {
            self.queries.lock().push(query.clone());
            if self.failing.iter().any(|key| query_mentions(query, key)) {
                return Err(CollaboratorError::Api {
                    status: 403,
                    message: "mailbox locked".to_string(),
                });
            }
            Ok(self
                .responses
                .iter()
                .filter(|(key, _)| query_mentions(query, key))
                .flat_map(|(_, threads)| threads.clone())
                .collect())
        }

        async fn latest_note(&self, query: &NotesQuery) -> Result<Option<RawNote>, CollaboratorError> {
            self.note_queries.lock().push(query.clone());
            if self.notes_unavailable {
                return Err(CollaboratorError::Transport("connection reset".to_string()));
            }
            Ok(self
                .notes
                .iter()
                .filter(|(title, note)| *title == query.title && note.received_at < query.before)
                .map(|(_, note)| note.clone())
                .max_by_key(|note| note.received_at))
        }
    }

    /// Summarizes by echoing the meeting title. Titles listed in `slow`
    /// sleep past any reasonable call timeout.
    #[derive(Default)]
    pub struct FakeSummarizer {
        pub slow: Vec<String>,
        pub malformed: Vec<String>,
        pub calls: AtomicUsize,
        pub payloads: Mutex<Vec<ContextPayload>>,
    }

    impl FakeSummarizer {
        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn last_payload(&self) -> Option<ContextPayload> {
            self.payloads.lock().last().cloned()
        }
    }

    #[async_trait]
    impl Summarizer for FakeSummarizer {
        async fn summarize(
            &self,
            _instructions: &str,
            payload: &ContextPayload,
        ) -> Result<SummaryBullets, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.payloads.lock().push(payload.clone());
            if self.slow.contains(&payload.title) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.malformed.contains(&payload.title) {
                return Err(CollaboratorError::Malformed("not json".to_string()));
            }
            Ok(SummaryBullets {
                agenda: vec![format!("Discuss {}", payload.title)],
                context: payload.excerpts.iter().map(|e| e.subject.clone()).collect(),
                ..Default::default()
            })
        }
    }

    #[derive(Default)]
    pub struct FakeTransport {
        pub sent: Mutex<Vec<DigestRendering>>,
        pub fail: AtomicBool,
    }

    impl FakeTransport {
        pub fn sent_count(&self) -> usize {
            self.sent.lock().len()
        }

        pub fn set_failing(&self, failing: bool) {
            self.fail.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl MailTransport for FakeTransport {
        async fn send(&self, digest: &DigestRendering) -> Result<(), CollaboratorError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CollaboratorError::Api {
                    status: 500,
                    message: "smtp down".to_string(),
                });
            }
            self.sent.lock().push(digest.clone());
            Ok(())
        }
    }
}
