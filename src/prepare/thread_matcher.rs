//! Meeting → email thread matching.
//!
//! Builds a mailbox query from the meeting title and attendees, then scores
//! every returned thread on three factors:
//! - title overlap: share of the meeting's title tokens found in the subject
//! - attendee overlap: share of meeting attendees among thread participants
//! - recency: exponential decay from the meeting start
//!
//! Weights are configuration. A factor that cannot apply to a meeting (no
//! attendees, no title tokens) drops out and the remaining weights are
//! renormalized, so scores always land in 0.0..=1.0.

use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;

use super::constants::{NOISE_TITLE_TOKENS, PERSONAL_EMAIL_DOMAINS, PLACEHOLDER_TITLE, STOPWORDS};
use crate::error::CollaboratorError;
use crate::sources::{bounded_call, MailboxSource};
use crate::types::{
    EmailThreadCandidate, MailboxQuery, MatchResult, MatchingConfig, MeetingRecord, RawThread,
    ScoreFactors, ScoredCandidate, TimeWindow,
};

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-z0-9]+(?:[:'\-][a-z0-9]+)*").unwrap())
}

fn angle_addr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<([^<>\s]+@[^<>\s]+)>").unwrap())
}

/// Scores mailbox threads against meetings. Cheap to clone; one instance is
/// shared read-only by all per-meeting tasks of a run.
#[derive(Debug, Clone)]
pub struct ThreadMatcher {
    config: MatchingConfig,
    noise: HashSet<String>,
}

impl ThreadMatcher {
    pub fn new(config: MatchingConfig) -> Self {
        let noise = NOISE_TITLE_TOKENS
            .iter()
            .map(|t| t.to_string())
            .chain(config.extra_noise_tokens.iter().map(|t| t.to_lowercase()))
            .collect();
        Self { config, noise }
    }

    /// Search the mailbox for a meeting and rank what comes back.
    ///
    /// A meeting with neither query terms nor attendees is not searched at
    /// all. Mailbox errors are returned to the caller, which records them
    /// against this meeting only.
    pub async fn find_threads(
        &self,
        meeting: &MeetingRecord,
        mailbox: &dyn MailboxSource,
        call_timeout: Duration,
    ) -> Result<MatchResult, CollaboratorError> {
        let Some(query) = self.build_query(meeting) else {
            log::debug!("No search terms for '{}', skipping mailbox", meeting.title);
            return Ok(MatchResult::empty(&meeting.id));
        };

        let raw = bounded_call("mailbox search", call_timeout, || mailbox.search(&query)).await?;
        let candidates = raw.iter().map(normalize_thread).collect();
        Ok(self.rank(meeting, candidates))
    }

    /// Derive the mailbox query for a meeting.
    ///
    /// Generic title words ("weekly", "sync", "1:1") are stripped; when
    /// nothing is left the query is attendee-only.
    pub fn build_query(&self, meeting: &MeetingRecord) -> Option<MailboxQuery> {
        let terms: Vec<String> = self
            .title_tokens(meeting)
            .into_iter()
            .filter(|t| !self.noise.contains(t))
            .collect();

        let participants = meeting_participants(meeting);

        if terms.is_empty() && participants.is_empty() {
            return None;
        }

        let mut domains: Vec<String> = Vec::new();
        for address in &participants {
            if let Some(domain) = address.rsplit_once('@').map(|(_, d)| d.to_string()) {
                if !PERSONAL_EMAIL_DOMAINS.contains(&domain.as_str()) && !domains.contains(&domain) {
                    domains.push(domain);
                }
            }
        }

        let lookback = chrono::Duration::days(i64::from(self.config.lookback_days));
        Some(MailboxQuery {
            terms,
            participants,
            domains,
            window: TimeWindow {
                start: meeting.start - lookback,
                end: meeting.start,
            },
        })
    }

    /// Score, threshold and rank candidates for one meeting. Keeps at most
    /// `top_k`, ordered by score desc, then received desc, then thread id.
    pub fn rank(&self, meeting: &MeetingRecord, candidates: Vec<EmailThreadCandidate>) -> MatchResult {
        let title_tokens: HashSet<String> = self.title_tokens(meeting).into_iter().collect();
        let attendees: HashSet<&str> = meeting.attendees.iter().map(String::as_str).collect();

        let mut seen = HashSet::new();
        let mut scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .filter(|c| seen.insert(c.id.clone()))
            .filter_map(|c| self.score(&title_tokens, &attendees, meeting.start, c))
            .filter(|s| {
                let keep = s.score >= self.config.min_score;
                if !keep {
                    log::debug!(
                        "Thread {} below threshold for '{}': {:.3}",
                        s.candidate.id,
                        meeting.title,
                        s.score
                    );
                }
                keep
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.candidate.received_at.cmp(&a.candidate.received_at))
                .then_with(|| a.candidate.id.cmp(&b.candidate.id))
        });
        scored.truncate(self.config.top_k);

        MatchResult {
            meeting_id: meeting.id.clone(),
            candidates: scored,
        }
    }

    fn score(
        &self,
        title_tokens: &HashSet<String>,
        attendees: &HashSet<&str>,
        meeting_start: DateTime<Utc>,
        candidate: EmailThreadCandidate,
    ) -> Option<ScoredCandidate> {
        let weights = self.config.weights;

        let title_overlap = if title_tokens.is_empty() {
            None
        } else {
            let subject: HashSet<String> = tokenize(&candidate.subject).into_iter().collect();
            let shared = title_tokens.intersection(&subject).count();
            Some(shared as f64 / title_tokens.len() as f64)
        };

        let attendee_overlap = if attendees.is_empty() {
            None
        } else {
            let present = candidate
                .participants
                .iter()
                .filter(|p| attendees.contains(p.as_str()))
                .collect::<HashSet<_>>()
                .len();
            Some(present as f64 / attendees.len() as f64)
        };

        // Recency alone never makes a match.
        if title_overlap.unwrap_or(0.0) <= 0.0 && attendee_overlap.unwrap_or(0.0) <= 0.0 {
            return None;
        }

        let recency = recency_score(meeting_start, candidate.received_at, self.config.recency_half_life_days);

        let mut weighted = weights.recency * recency;
        let mut total_weight = weights.recency;
        if let Some(t) = title_overlap {
            weighted += weights.title * t;
            total_weight += weights.title;
        }
        if let Some(a) = attendee_overlap {
            weighted += weights.attendees * a;
            total_weight += weights.attendees;
        }
        let score = if total_weight > 0.0 {
            weighted / total_weight
        } else {
            0.0
        };

        Some(ScoredCandidate {
            candidate,
            score,
            factors: ScoreFactors {
                title_overlap,
                attendee_overlap,
                recency,
            },
        })
    }

    fn title_tokens(&self, meeting: &MeetingRecord) -> Vec<String> {
        if meeting.title == PLACEHOLDER_TITLE {
            return Vec::new();
        }
        tokenize(&meeting.title)
    }
}

/// Attendees plus the organizer, who is kept out of the attendee list.
pub(crate) fn meeting_participants(meeting: &MeetingRecord) -> Vec<String> {
    let mut participants = meeting.attendees.clone();
    if let Some(organizer) = &meeting.organizer {
        if !participants.contains(organizer) {
            participants.push(organizer.clone());
        }
    }
    participants
}

/// 1.0 at the meeting start, halving every `half_life_days` before it.
/// Threads received after the start count as fresh.
pub fn recency_score(meeting_start: DateTime<Utc>, received_at: DateTime<Utc>, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return 1.0;
    }
    let elapsed_secs = (meeting_start - received_at).num_seconds().max(0) as f64;
    let elapsed_days = elapsed_secs / 86_400.0;
    0.5_f64.powf(elapsed_days / half_life_days)
}

/// Lowercase word tokens with stopwords removed, deduplicated in order.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut seen = HashSet::new();
    token_re()
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Bring a mailbox hit into canonical shape: bare lowercase addresses,
/// sender listed first among participants.
pub fn normalize_thread(raw: &RawThread) -> EmailThreadCandidate {
    let sender = extract_address(&raw.sender);
    let mut participants = Vec::new();
    for address in std::iter::once(&raw.sender).chain(raw.participants.iter()) {
        let address = extract_address(address);
        if !address.is_empty() && !participants.contains(&address) {
            participants.push(address);
        }
    }

    EmailThreadCandidate {
        id: raw.id.clone(),
        subject: raw.subject.trim().to_string(),
        sender,
        participants,
        received_at: raw.received_at,
        excerpt: raw.excerpt.trim().to_string(),
    }
}

/// "Sarah Chen <Sarah@Acme.com>" → "sarah@acme.com"
fn extract_address(raw: &str) -> String {
    angle_addr_re()
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw)
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prepare::normalize::normalize_event;
    use crate::sources::test_utils::{at, raw_event, raw_thread, FakeMailbox};
    use crate::types::MatchWeights;

    fn meeting(title: &str, attendees: &[&str]) -> MeetingRecord {
        normalize_event(&raw_event("evt-1", title, at(2026, 3, 2, 15, 0), attendees)).unwrap()
    }

    fn candidate(id: &str, subject: &str, participants: &[&str], received_at: DateTime<Utc>) -> EmailThreadCandidate {
        EmailThreadCandidate {
            id: id.to_string(),
            subject: subject.to_string(),
            sender: participants.first().map(|s| s.to_string()).unwrap_or_default(),
            participants: participants.iter().map(|s| s.to_string()).collect(),
            received_at,
            excerpt: "notes".to_string(),
        }
    }

    #[test]
    fn test_tokenize_keeps_compound_tokens() {
        assert_eq!(tokenize("Re: Weekly Sync notes"), vec!["weekly", "sync", "notes"]);
        assert_eq!(tokenize("Alex / Sam 1:1"), vec!["alex", "sam", "1:1"]);
        assert_eq!(tokenize("Q3 check-in and the plan"), vec!["q3", "check-in", "plan"]);
    }

    #[test]
    fn test_extract_address() {
        assert_eq!(extract_address("Sarah Chen <Sarah@Acme.com>"), "sarah@acme.com");
        assert_eq!(extract_address(" bob@x.com "), "bob@x.com");
    }

    #[test]
    fn test_weekly_sync_scenario() {
        let matcher = ThreadMatcher::new(MatchingConfig::default());
        let meeting = meeting("Weekly Sync", &["a@x.com", "b@x.com"]);
        let thread = candidate(
            "t1",
            "Re: Weekly Sync notes",
            &["b@x.com"],
            at(2026, 3, 1, 15, 0),
        );

        let result = matcher.rank(&meeting, vec![thread]);
        assert_eq!(result.candidates.len(), 1);
        let top = &result.candidates[0];
        assert_eq!(top.factors.attendee_overlap, Some(0.5));
        assert_eq!(top.factors.title_overlap, Some(1.0));
        assert!(top.score >= MatchingConfig::default().min_score);
    }

    #[test]
    fn test_noise_only_title_queries_attendees_only() {
        let matcher = ThreadMatcher::new(MatchingConfig::default());
        let query = matcher
            .build_query(&meeting("Weekly Sync", &["a@x.com", "b@partner.io"]))
            .unwrap();
        assert!(query.terms.is_empty());
        assert_eq!(query.participants, vec!["a@x.com", "b@partner.io"]);
        assert_eq!(query.domains, vec!["x.com", "partner.io"]);
    }

    #[test]
    fn test_query_strips_noise_and_bounds_window() {
        let matcher = ThreadMatcher::new(MatchingConfig::default());
        let m = meeting("Acme renewal weekly sync", &["a@gmail.com"]);
        let query = matcher.build_query(&m).unwrap();
        assert_eq!(query.terms, vec!["acme", "renewal"]);
        assert!(query.domains.is_empty());
        assert_eq!(query.window.end, m.start);
        assert_eq!(query.window.start, m.start - chrono::Duration::days(14));
    }

    #[test]
    fn test_extra_noise_tokens_from_config() {
        let config = MatchingConfig {
            extra_noise_tokens: vec!["Acme".to_string()],
            ..Default::default()
        };
        let matcher = ThreadMatcher::new(config);
        let query = matcher.build_query(&meeting("Acme renewal", &[])).unwrap();
        assert_eq!(query.terms, vec!["renewal"]);
    }

    #[test]
    fn test_focus_block_without_attendees_has_no_query() {
        let matcher = ThreadMatcher::new(MatchingConfig::default());
        assert!(matcher.build_query(&meeting("Focus block", &[])).is_none());
    }

    #[test]
    fn test_placeholder_title_contributes_no_tokens() {
        let matcher = ThreadMatcher::new(MatchingConfig::default());
        assert!(matcher.build_query(&meeting("", &[])).is_none());
    }

    #[test]
    fn test_no_attendees_redistributes_weight() {
        let config = MatchingConfig::default();
        let weights = config.weights;
        let matcher = ThreadMatcher::new(config);
        let m = meeting("Budget planning", &[]);
        let received = at(2026, 3, 2, 15, 0) - chrono::Duration::days(7);
        let result = matcher.rank(&m, vec![candidate("t1", "Budget planning draft", &["z@y.com"], received)]);

        let top = &result.candidates[0];
        assert_eq!(top.factors.attendee_overlap, None);
        let expected = (weights.title * 1.0 + weights.recency * 0.5) / (weights.title + weights.recency);
        assert!((top.score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_recency_alone_never_matches() {
        let matcher = ThreadMatcher::new(MatchingConfig {
            min_score: 0.0,
            ..Default::default()
        });
        let m = meeting("Budget planning", &["a@x.com"]);
        let result = matcher.rank(&m, vec![candidate("t1", "Lunch?", &["q@z.com"], m.start)]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_below_threshold_discarded() {
        let matcher = ThreadMatcher::new(MatchingConfig {
            min_score: 0.9,
            ..Default::default()
        });
        let m = meeting("Budget planning", &["a@x.com", "b@x.com"]);
        let old = m.start - chrono::Duration::days(13);
        let result = matcher.rank(&m, vec![candidate("t1", "Budget", &["a@x.com"], old)]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_top_k_and_deterministic_tie_break() {
        let matcher = ThreadMatcher::new(MatchingConfig::default());
        let m = meeting("Budget planning", &["a@x.com"]);
        let received = m.start - chrono::Duration::days(1);
        let candidates = ["t5", "t3", "t1", "t4", "t2"]
            .iter()
            .map(|id| candidate(id, "Budget planning", &["a@x.com"], received))
            .collect();

        let result = matcher.rank(&m, candidates);
        let ids: Vec<&str> = result.candidates.iter().map(|c| c.candidate.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn test_equal_score_prefers_more_recent() {
        let matcher = ThreadMatcher::new(MatchingConfig {
            weights: MatchWeights {
                title: 1.0,
                attendees: 1.0,
                recency: 0.0,
            },
            ..Default::default()
        });
        let m = meeting("Budget planning", &["a@x.com"]);
        let older = candidate("t1", "Budget planning", &["a@x.com"], m.start - chrono::Duration::days(5));
        let newer = candidate("t2", "Budget planning", &["a@x.com"], m.start - chrono::Duration::days(1));

        let result = matcher.rank(&m, vec![older, newer]);
        assert_eq!(result.candidates[0].candidate.id, "t2");
        assert_eq!(result.candidates[0].score, result.candidates[1].score);
    }

    #[test]
    fn test_ranked_descending() {
        let matcher = ThreadMatcher::new(MatchingConfig::default());
        let m = meeting("Budget planning", &["a@x.com", "b@x.com"]);
        let day = chrono::Duration::days(1);
        let result = matcher.rank(
            &m,
            vec![
                candidate("t1", "Budget", &["a@x.com"], m.start - day * 3),
                candidate("t2", "Budget planning", &["a@x.com", "b@x.com"], m.start - day),
                candidate("t3", "Planning", &["b@x.com"], m.start - day * 2),
            ],
        );
        assert!(result
            .candidates
            .windows(2)
            .all(|pair| pair[0].score >= pair[1].score));
        assert_eq!(result.candidates[0].candidate.id, "t2");
    }

    #[test]
    fn test_duplicate_threads_counted_once() {
        let matcher = ThreadMatcher::new(MatchingConfig::default());
        let m = meeting("Budget planning", &["a@x.com"]);
        let c = candidate("t1", "Budget planning", &["a@x.com"], m.start);
        let result = matcher.rank(&m, vec![c.clone(), c]);
        assert_eq!(result.candidates.len(), 1);
    }

    #[test]
    fn test_recency_decays_monotonically() {
        let start = at(2026, 3, 2, 15, 0);
        let mut previous = f64::MAX;
        for days in [0, 1, 3, 7, 14] {
            let r = recency_score(start, start - chrono::Duration::days(days), 7.0);
            assert!(r < previous);
            previous = r;
        }
        assert!((recency_score(start, start - chrono::Duration::days(7), 7.0) - 0.5).abs() < 1e-9);
        assert_eq!(recency_score(start, start + chrono::Duration::hours(1), 7.0), 1.0);
    }

    #[test]
    fn test_normalize_thread_puts_sender_first() {
        let mut raw = raw_thread("t1", " Hello ", "Bob <Bob@X.com>", at(2026, 3, 1, 9, 0), " body ");
        raw.participants = vec!["carol@x.com".to_string(), "bob@x.com".to_string()];
        let c = normalize_thread(&raw);
        assert_eq!(c.sender, "bob@x.com");
        assert_eq!(c.participants, vec!["bob@x.com", "carol@x.com"]);
        assert_eq!(c.subject, "Hello");
        assert_eq!(c.excerpt, "body");
    }

    #[tokio::test]
    async fn test_find_threads_skips_mailbox_without_terms() {
        let matcher = ThreadMatcher::new(MatchingConfig::default());
        let mailbox = FakeMailbox::default();
        let result = matcher
            .find_threads(&meeting("Focus block", &[]), &mailbox, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(mailbox.query_count(), 0);
    }

    #[tokio::test]
    async fn test_find_threads_empty_mailbox_is_not_error() {
        let matcher = ThreadMatcher::new(MatchingConfig::default());
        let mailbox = FakeMailbox::default();
        let result = matcher
            .find_threads(&meeting("Budget planning", &["a@x.com"]), &mailbox, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(mailbox.query_count(), 1);
    }

    #[tokio::test]
    async fn test_find_threads_propagates_mailbox_error() {
        let matcher = ThreadMatcher::new(MatchingConfig::default());
        let mailbox = FakeMailbox {
            failing: vec!["budget".to_string()],
            ..Default::default()
        };
        let err = matcher
            .find_threads(&meeting("Budget planning", &[]), &mailbox, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Api { status: 403, .. }));
    }
}
