//! Summarizer payload assembly.
//!
//! Turns a meeting, its matched threads and any prior notes into a
//! `ContextPayload` that fits the configured budget:
//! - each excerpt is cut to `excerpt_chars` characters, notes to `notes_chars`
//! - if the serialized payload is still over `payload_bytes`, the notes go
//!   first, then whole excerpts, lowest score first; each drop is recorded
//!   in `omitted`
//!
//! An empty match yields a payload with zero excerpts; the orchestrator
//! treats that as "no context" without calling the summarizer.

use crate::types::{
    ContextBudget, ContextPayload, MatchResult, MeetingRecord, OmittedExcerpt, PriorNotes, RawNote,
    ThreadExcerpt,
};

const ELLIPSIS: char = '…';

#[derive(Debug, Clone, Copy)]
pub struct ContextRequestBuilder {
    budget: ContextBudget,
}

impl ContextRequestBuilder {
    pub fn new(budget: ContextBudget) -> Self {
        Self { budget }
    }

    /// Notes are attached only alongside at least one matched thread.
    pub fn build(
        &self,
        meeting: &MeetingRecord,
        matched: &MatchResult,
        notes: Option<&RawNote>,
    ) -> ContextPayload {
        let excerpts = matched
            .candidates
            .iter()
            .map(|scored| {
                let (text, truncated) =
                    truncate_chars(&scored.candidate.excerpt, self.budget.excerpt_chars);
                ThreadExcerpt {
                    thread_id: scored.candidate.id.clone(),
                    subject: scored.candidate.subject.clone(),
                    sender: scored.candidate.sender.clone(),
                    received_at: scored.candidate.received_at,
                    text,
                    truncated,
                    score: scored.score,
                }
            })
            .collect();

        let notes = notes.filter(|_| !matched.is_empty()).map(|note| {
            let (text, truncated) = truncate_chars(note.body.trim(), self.budget.notes_chars);
            PriorNotes {
                message_id: note.id.clone(),
                subject: note.subject.clone(),
                received_at: note.received_at,
                text,
                truncated,
            }
        });

        let mut payload = ContextPayload {
            meeting_id: meeting.id.clone(),
            title: meeting.title.clone(),
            start: meeting.start,
            location: meeting.location.clone().or_else(|| meeting.conference.clone()),
            attendees: meeting.attendees.clone(),
            excerpts,
            notes,
            omitted: Vec::new(),
        };

        if payload_size(&payload) > self.budget.payload_bytes {
            if let Some(dropped) = payload.notes.take() {
                log::debug!(
                    "Dropping prior notes {} from '{}' payload to fit {} bytes",
                    dropped.message_id,
                    payload.title,
                    self.budget.payload_bytes
                );
                payload.omitted.push(OmittedExcerpt {
                    thread_id: dropped.message_id,
                    reason: "prior notes over payload size budget".to_string(),
                });
            }
        }

        while payload_size(&payload) > self.budget.payload_bytes && !payload.excerpts.is_empty() {
            let lowest = lowest_score_index(&payload.excerpts);
            let dropped = payload.excerpts.remove(lowest);
            log::debug!(
                "Dropping thread {} from '{}' payload (score {:.3}) to fit {} bytes",
                dropped.thread_id,
                payload.title,
                dropped.score,
                self.budget.payload_bytes
            );
            payload.omitted.push(OmittedExcerpt {
                thread_id: dropped.thread_id,
                reason: "payload size budget".to_string(),
            });
        }

        if payload.has_context() {
            debug_assert!(payload_size(&payload) <= self.budget.payload_bytes);
        } else if !matched.is_empty() {
            log::warn!(
                "Every matched thread for '{}' was dropped to fit the payload budget",
                payload.title
            );
        }

        payload
    }
}

/// Serialized size of the payload in bytes.
pub fn payload_size(payload: &ContextPayload) -> usize {
    serde_json::to_vec(payload)
        .map(|bytes| bytes.len())
        .unwrap_or(usize::MAX)
}

/// Last index among the lowest-scoring excerpts.
fn lowest_score_index(excerpts: &[ThreadExcerpt]) -> usize {
    excerpts
        .iter()
        .enumerate()
        .min_by(|(ia, a), (ib, b)| a.score.total_cmp(&b.score).then_with(|| ib.cmp(ia)))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Cut `text` to at most `max_chars` characters (ellipsis included).
/// Returns the text and whether anything was cut.
fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    if text.chars().count() <= max_chars {
        return (text.to_string(), false);
    }
    if max_chars == 0 {
        return (String::new(), true);
    }
    let mut cut: String = text.chars().take(max_chars - 1).collect();
    cut.truncate(cut.trim_end().len());
    cut.push(ELLIPSIS);
    (cut, true)
}
