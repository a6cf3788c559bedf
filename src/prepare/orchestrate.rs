//! Per-meeting preparation with failure isolation.
//!
//! Each meeting moves from pending to exactly one terminal outcome:
//! - `NoContextFound`: no thread survived matching (summarizer never called;
//!   prior notes alone are not context)
//! - `Summarized`: the summarizer returned usable bullets
//! - `SummarizationFailed`: mailbox search or summarization failed, or the
//!   run deadline passed first
//!
//! Meetings run concurrently and share nothing mutable. One meeting's failure
//! never affects another's.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;

use super::meeting_context::ContextRequestBuilder;
use super::prior_notes::NotesLookup;
use super::thread_matcher::ThreadMatcher;
use crate::intelligence::PREREAD_INSTRUCTIONS;
use crate::sources::{bounded_call, MailboxSource, Summarizer};
use crate::types::{Config, MeetingOutcome, MeetingRecord, PerMeetingResult};

pub const DEADLINE_EXCEEDED_REASON: &str = "run deadline exceeded";

pub struct SummaryOrchestrator {
    matcher: ThreadMatcher,
    builder: ContextRequestBuilder,
    notes: Option<NotesLookup>,
    mailbox: Arc<dyn MailboxSource>,
    summarizer: Arc<dyn Summarizer>,
    call_timeout: Duration,
}

impl SummaryOrchestrator {
    pub fn new(
        config: &Config,
        mailbox: Arc<dyn MailboxSource>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            matcher: ThreadMatcher::new(config.matching.clone()),
            builder: ContextRequestBuilder::new(config.context),
            notes: NotesLookup::from_config(&config.notes),
            mailbox,
            summarizer,
            call_timeout: Duration::from_secs(config.timeouts.call_secs),
        }
    }

    /// Prepare every meeting concurrently. Returns one result per input
    /// meeting, in input order, once all have finished or hit `deadline`.
    pub async fn prepare_all(
        self: &Arc<Self>,
        meetings: Vec<MeetingRecord>,
        deadline: Instant,
    ) -> Vec<PerMeetingResult> {
        let mut tasks = JoinSet::new();
        for (index, meeting) in meetings.iter().cloned().enumerate() {
            let orchestrator = Arc::clone(self);
            tasks.spawn(async move {
                let outcome =
                    match tokio::time::timeout_at(deadline, orchestrator.prepare_meeting(&meeting)).await {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            log::warn!("Meeting '{}' unfinished at run deadline", meeting.title);
                            MeetingOutcome::SummarizationFailed(DEADLINE_EXCEEDED_REASON.to_string())
                        }
                    };
                (index, outcome)
            });
        }

        let mut outcomes: Vec<Option<MeetingOutcome>> = vec![None; meetings.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => log::error!("Meeting preparation task failed: {}", e),
            }
        }

        meetings
            .into_iter()
            .zip(outcomes)
            .map(|(meeting, outcome)| PerMeetingResult {
                meeting,
                outcome: outcome.unwrap_or_else(|| {
                    MeetingOutcome::SummarizationFailed("internal error".to_string())
                }),
            })
            .collect()
    }

    /// Drive one meeting to its terminal outcome.
    pub async fn prepare_meeting(&self, meeting: &MeetingRecord) -> MeetingOutcome {
        let matched = match self
            .matcher
            .find_threads(meeting, self.mailbox.as_ref(), self.call_timeout)
            .await
        {
            Ok(matched) => matched,
            Err(e) => {
                log::warn!("Mailbox search failed for '{}': {}", meeting.title, e);
                return MeetingOutcome::SummarizationFailed(format!(
                    "mailbox search failed: {}",
                    e.short_reason()
                ));
            }
        };

        let notes = match &self.notes {
            Some(lookup) if !matched.is_empty() => {
                lookup.find(meeting, self.mailbox.as_ref(), self.call_timeout).await
            }
            _ => None,
        };

        let payload = self.builder.build(meeting, &matched, notes.as_ref());
        if !payload.has_context() {
            log::info!("No related threads for '{}'", meeting.title);
            return MeetingOutcome::NoContextFound;
        }

        let summarizer = self.summarizer.as_ref();
        match bounded_call("summarize", self.call_timeout, || {
            summarizer.summarize(PREREAD_INSTRUCTIONS, &payload)
        })
        .await
        {
            Ok(bullets) => {
                log::info!(
                    "Summarized '{}' from {} thread(s)",
                    meeting.title,
                    payload.excerpts.len()
                );
                MeetingOutcome::Summarized(bullets)
            }
            Err(e) => {
                log::warn!("Summarization failed for '{}': {}", meeting.title, e);
                MeetingOutcome::SummarizationFailed(e.short_reason())
            }
        }
    }
}
