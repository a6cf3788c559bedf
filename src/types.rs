use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration stored in ~/.preread/config.json
///
/// Every field has a default so a missing or partial file still yields a
/// usable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// IANA timezone of the person receiving the digest. Defines the local
    /// day boundary for both the calendar window and delivery rollover.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub schedule: ScheduleEntry,
    /// Digest recipient. Falls back to the mailbox owner when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub context: ContextBudget,
    #[serde(default)]
    pub notes: NotesConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub google: GoogleConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            schedule: ScheduleEntry::default(),
            recipient: None,
            matching: MatchingConfig::default(),
            context: ContextBudget::default(),
            notes: NotesConfig::default(),
            timeouts: TimeoutConfig::default(),
            summarizer: SummarizerConfig::default(),
            google: GoogleConfig::default(),
        }
    }
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

impl Config {
    /// Timezone the cron expression is evaluated in.
    pub fn schedule_timezone(&self) -> &str {
        self.schedule.timezone.as_deref().unwrap_or(&self.timezone)
    }
}

/// A single schedule entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub enabled: bool,
    /// 5-field cron expression (minute hour day month weekday)
    pub cron: String,
    /// Overrides `Config::timezone` for the schedule only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl Default for ScheduleEntry {
    /// 6 AM every day, local time.
    fn default() -> Self {
        Self {
            enabled: true,
            cron: "0 6 * * *".to_string(),
            timezone: None,
        }
    }
}

/// Relative weighting of the three thread-scoring factors.
///
/// Only the ratios matter: scores are normalized by the sum of the weights
/// of the factors that apply to a given meeting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchWeights {
    pub title: f64,
    pub attendees: f64,
    pub recency: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            title: 0.45,
            attendees: 0.35,
            recency: 0.20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchingConfig {
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default)]
    pub weights: MatchWeights,
    #[serde(default = "default_half_life")]
    pub recency_half_life_days: f64,
    /// Additional title tokens to ignore when building the mailbox query.
    #[serde(default)]
    pub extra_noise_tokens: Vec<String>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            top_k: default_top_k(),
            min_score: default_min_score(),
            weights: MatchWeights::default(),
            recency_half_life_days: default_half_life(),
            extra_noise_tokens: Vec::new(),
        }
    }
}

fn default_lookback_days() -> u32 {
    14
}

fn default_top_k() -> usize {
    3
}

fn default_min_score() -> f64 {
    0.35
}

fn default_half_life() -> f64 {
    7.0
}

/// Size limits for the payload handed to the summarizer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextBudget {
    /// Maximum characters kept from a single thread excerpt.
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
    /// Maximum serialized size of the whole payload, in bytes.
    #[serde(default = "default_payload_bytes")]
    pub payload_bytes: usize,
    /// Maximum characters kept from prior meeting notes.
    #[serde(default = "default_notes_chars")]
    pub notes_chars: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            excerpt_chars: default_excerpt_chars(),
            payload_bytes: default_payload_bytes(),
            notes_chars: default_notes_chars(),
        }
    }
}

fn default_excerpt_chars() -> usize {
    600
}

fn default_payload_bytes() -> usize {
    4096
}

fn default_notes_chars() -> usize {
    2000
}

/// Lookup of notes mailed after earlier occurrences of a meeting, such as
/// the recaps a note-taking app sends to attendees.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Word that identifies a notes message, searched alongside the title.
    #[serde(default = "default_notes_marker")]
    pub marker: String,
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            marker: default_notes_marker(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_notes_marker() -> String {
    "Granola".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutConfig {
    /// Per collaborator call (mailbox search, summarization, send).
    #[serde(default = "default_call_secs")]
    pub call_secs: u64,
    /// Whole trigger, from calendar fetch to digest assembly.
    #[serde(default = "default_run_secs")]
    pub run_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call_secs: default_call_secs(),
            run_secs: default_run_secs(),
        }
    }
}

fn default_call_secs() -> u64 {
    30
}

fn default_run_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizerConfig {
    #[serde(default = "default_summarizer_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_summarizer_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_summarizer_endpoint(),
            model: default_summarizer_model(),
            temperature: default_temperature(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_summarizer_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_summarizer_model() -> String {
    "gpt-4o".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleConfig {
    /// Environment variable holding an OAuth access token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Token file used when the environment variable is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_path: Option<String>,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
            token_path: None,
        }
    }
}

fn default_token_env() -> String {
    "PREREAD_GOOGLE_TOKEN".to_string()
}

// =============================================================================
// Execution
// =============================================================================

/// How a run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionTrigger {
    Scheduled,
    /// Explicit user action. Exempt from the once-per-day delivery guard.
    Manual,
    /// Catch-up after sleep/wake. Honors the delivery guard like Scheduled.
    Missed,
}

impl ExecutionTrigger {
    pub fn honors_delivery_guard(&self) -> bool {
        !matches!(self, ExecutionTrigger::Manual)
    }
}

/// Result of a dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "camelCase")]
pub enum DispatchOutcome {
    Sent,
    AlreadySent,
    Failed(String),
}

/// Record of a single run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    pub trigger: ExecutionTrigger,
    pub day: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<DispatchOutcome>,
    pub meeting_count: Option<usize>,
    pub error_message: Option<String>,
}

// =============================================================================
// Collaborator boundary shapes
// =============================================================================

/// Start or end of a raw calendar entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTime {
    At(DateTime<Utc>),
    /// Date-only value; marks an all-day entry.
    AllDay(NaiveDate),
}

#[derive(Debug, Clone, Default)]
pub struct RawAttendee {
    pub email: String,
    pub response_status: Option<String>,
    pub is_self: bool,
    pub is_organizer: bool,
    pub is_resource: bool,
}

/// A calendar entry as the calendar collaborator hands it over, unfiltered.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub id: String,
    pub title: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub attendees: Vec<RawAttendee>,
    pub organizer: Option<String>,
    pub status: Option<String>,
    pub location: Option<String>,
    pub conference: Option<String>,
}

/// A mailbox search hit as the mailbox collaborator hands it over.
#[derive(Debug, Clone)]
pub struct RawThread {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub participants: Vec<String>,
    pub received_at: DateTime<Utc>,
    pub excerpt: String,
}

/// Transport-agnostic mailbox search request.
#[derive(Debug, Clone, PartialEq)]
pub struct MailboxQuery {
    /// Free-text terms, any of which may match.
    pub terms: Vec<String>,
    /// Addresses whose threads are relevant (sender or recipient).
    pub participants: Vec<String>,
    /// Organization domains of external attendees.
    pub domains: Vec<String>,
    pub window: TimeWindow,
}

/// Search for the most recent notes message about a meeting.
#[derive(Debug, Clone, PartialEq)]
pub struct NotesQuery {
    /// Exact meeting title, matched as a phrase.
    pub title: String,
    pub marker: String,
    /// Notes must involve at least one of these addresses when non-empty.
    pub participants: Vec<String>,
    /// Only messages received before this instant.
    pub before: DateTime<Utc>,
}

/// A notes message as the mailbox collaborator hands it over.
#[derive(Debug, Clone)]
pub struct RawNote {
    pub id: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

// =============================================================================
// Core records
// =============================================================================

/// Canonical meeting record produced by the event normalizer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingRecord {
    pub id: String,
    pub source_event_id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Lowercase, deduplicated, in calendar order. Excludes the organizer,
    /// the mailbox owner and resource rooms.
    pub attendees: Vec<String>,
    pub organizer: Option<String>,
    pub location: Option<String>,
    pub conference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailThreadCandidate {
    pub id: String,
    pub subject: String,
    pub sender: String,
    /// Lowercase addresses, sender included.
    pub participants: Vec<String>,
    pub received_at: DateTime<Utc>,
    pub excerpt: String,
}

/// Contributing factors behind a candidate's score, each in 0.0..=1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreFactors {
    /// `None` when the meeting has no usable title tokens.
    pub title_overlap: Option<f64>,
    /// `None` when the meeting has no attendees.
    pub attendee_overlap: Option<f64>,
    pub recency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredCandidate {
    pub candidate: EmailThreadCandidate,
    pub score: f64,
    pub factors: ScoreFactors,
}

/// Threads matched to one meeting. Scores are only comparable within a
/// single result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub meeting_id: String,
    pub candidates: Vec<ScoredCandidate>,
}

impl MatchResult {
    pub fn empty(meeting_id: &str) -> Self {
        Self {
            meeting_id: meeting_id.to_string(),
            candidates: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadExcerpt {
    pub thread_id: String,
    pub subject: String,
    pub sender: String,
    pub received_at: DateTime<Utc>,
    pub text: String,
    pub truncated: bool,
    pub score: f64,
}

/// Notes from an earlier occurrence of the meeting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorNotes {
    pub message_id: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub text: String,
    pub truncated: bool,
}

/// An excerpt left out of the payload, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OmittedExcerpt {
    pub thread_id: String,
    pub reason: String,
}

/// Everything the summarizer sees about one meeting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPayload {
    pub meeting_id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub location: Option<String>,
    pub attendees: Vec<String>,
    pub excerpts: Vec<ThreadExcerpt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<PriorNotes>,
    pub omitted: Vec<OmittedExcerpt>,
}

impl ContextPayload {
    /// True when at least one related thread survived. Prior notes only
    /// enrich a payload that already has threads.
    pub fn has_context(&self) -> bool {
        !self.excerpts.is_empty()
    }
}

/// Structured preread bullets returned by the summarizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryBullets {
    #[serde(default)]
    pub agenda: Vec<String>,
    #[serde(default)]
    pub context: Vec<String>,
    #[serde(default)]
    pub open_questions: Vec<String>,
    #[serde(default)]
    pub logistics: Vec<String>,
}

impl SummaryBullets {
    pub fn is_empty(&self) -> bool {
        self.agenda.is_empty()
            && self.context.is_empty()
            && self.open_questions.is_empty()
            && self.logistics.is_empty()
    }
}

/// Terminal state of one meeting within a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum MeetingOutcome {
    Summarized(SummaryBullets),
    NoContextFound,
    SummarizationFailed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerMeetingResult {
    pub meeting: MeetingRecord,
    pub outcome: MeetingOutcome,
}

/// Plain-text rendering of a digest, ready for the mail transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestRendering {
    pub subject: String,
    pub body: String,
}
