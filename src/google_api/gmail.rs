//! Gmail API v1 thread search and message send.
//!
//! Search lists threads matching a query built from the meeting's terms,
//! participants and domains inside the lookback window, then fetches
//! metadata (From, To, Cc, Subject) for each thread. A failed thread fetch
//! is skipped unless every fetch failed or the account itself is refused
//! (expired token, rate limit); those fail the search.
//!
//! Prior-notes lookup searches for the newest message carrying the meeting's
//! exact title and the notes marker, then reads its plain-text body.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::GoogleClient;
use crate::error::CollaboratorError;
use crate::sources::{MailTransport, MailboxSource};
use crate::types::{DigestRendering, MailboxQuery, NotesQuery, RawNote, RawThread};

const GMAIL_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const MAX_THREADS: u32 = 25;
const MAX_NOTE_CANDIDATES: u32 = 5;

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadListResponse {
    #[serde(default)]
    threads: Vec<ThreadStub>,
}

#[derive(Debug, Deserialize)]
struct ThreadStub {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadDetail {
    #[serde(default)]
    id: String,
    #[serde(default)]
    messages: Vec<MessageDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDetail {
    #[serde(default)]
    snippet: String,
    /// Milliseconds since epoch, as a string
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    payload: Option<MessagePayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<ThreadStub>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePayload {
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    body: Option<PayloadBody>,
    #[serde(default)]
    parts: Vec<MessagePayload>,
}

#[derive(Debug, Deserialize)]
struct PayloadBody {
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Header {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

impl MessageDetail {
    fn header(&self, name: &str) -> Option<&str> {
        self.payload
            .as_ref()?
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    fn received_at(&self) -> Option<DateTime<Utc>> {
        let millis = self.internal_date.as_deref()?.parse::<i64>().ok()?;
        DateTime::from_timestamp_millis(millis)
    }

    fn plain_text(&self) -> Option<String> {
        extract_body_text(self.payload.as_ref()?, "text/plain")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    email_address: String,
}

#[derive(Serialize)]
struct SendRequest {
    raw: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    id: String,
}

// ============================================================================
// Mailbox search
// ============================================================================

pub struct Gmail {
    client: GoogleClient,
}

impl Gmail {
    pub fn new(client: GoogleClient) -> Self {
        Self { client }
    }

    async fn fetch_thread(&self, thread_id: &str) -> Result<Option<RawThread>, CollaboratorError> {
        let url = format!("{}/threads/{}", GMAIL_BASE, thread_id);
        let detail: ThreadDetail = self
            .client
            .get_json(
                &url,
                &[
                    ("format", "metadata".to_string()),
                    ("metadataHeaders", "From".to_string()),
                    ("metadataHeaders", "To".to_string()),
                    ("metadataHeaders", "Cc".to_string()),
                    ("metadataHeaders", "Subject".to_string()),
                ],
            )
            .await?;
        Ok(to_raw_thread(detail))
    }

    async fn fetch_note(&self, message_id: &str) -> Result<Option<RawNote>, CollaboratorError> {
        let url = format!("{}/messages/{}", GMAIL_BASE, message_id);
        let detail: MessageDetail = self
            .client
            .get_json(&url, &[("format", "full".to_string())])
            .await?;
        Ok(to_raw_note(message_id, &detail))
    }
}

#[async_trait]
impl MailboxSource for Gmail {
    async fn search(&self, query: &MailboxQuery) -> Result<Vec<RawThread>, CollaboratorError> {
        let q = render_query(query);
        log::debug!("Gmail search: {}", q);

        let list: ThreadListResponse = self
            .client
            .get_json(
                &format!("{}/threads", GMAIL_BASE),
                &[("q", q), ("maxResults", MAX_THREADS.to_string())],
            )
            .await?;

        let mut fetched = Vec::with_capacity(list.threads.len());
        for stub in list.threads {
            let result = self.fetch_thread(&stub.id).await;
            fetched.push((stub.id, result));
        }
        collect_threads(fetched)
    }

    async fn latest_note(&self, query: &NotesQuery) -> Result<Option<RawNote>, CollaboratorError> {
        let q = render_notes_query(query);
        log::debug!("Gmail notes search: {}", q);

        // Results come back newest first.
        let list: MessageListResponse = self
            .client
            .get_json(
                &format!("{}/messages", GMAIL_BASE),
                &[("q", q), ("maxResults", MAX_NOTE_CANDIDATES.to_string())],
            )
            .await?;

        match list.messages.first() {
            Some(stub) => self.fetch_note(&stub.id).await,
            None => Ok(None),
        }
    }
}

/// Keep the threads that were fetched. Fails with the first error when no
/// fetch succeeded, or when any fetch was refused for the whole account.
fn collect_threads(
    fetched: Vec<(String, Result<Option<RawThread>, CollaboratorError>)>,
) -> Result<Vec<RawThread>, CollaboratorError> {
    let total = fetched.len();
    let mut threads = Vec::with_capacity(total);
    let mut failures = Vec::new();
    for (id, result) in fetched {
        match result {
            Ok(Some(thread)) => threads.push(thread),
            Ok(None) => {}
            Err(e) => failures.push((id, e)),
        }
    }

    let account_refused = failures.iter().position(|(_, e)| {
        matches!(e, CollaboratorError::Unauthorized | CollaboratorError::RateLimited)
    });
    if let Some(index) = account_refused {
        return Err(failures.swap_remove(index).1);
    }
    if !failures.is_empty() && failures.len() == total {
        return Err(failures.swap_remove(0).1);
    }

    for (id, e) in &failures {
        log::warn!("Skipping thread {}: {}", id, e);
    }
    Ok(threads)
}

/// Gmail search syntax for a mailbox query. The window is expressed as
/// epoch seconds so it is independent of the account's timezone.
pub fn render_query(query: &MailboxQuery) -> String {
    let mut clauses: Vec<String> = query
        .terms
        .iter()
        .map(|t| {
            if t.contains(|c: char| !c.is_ascii_alphanumeric()) {
                format!("\"{}\"", t)
            } else {
                t.clone()
            }
        })
        .collect();
    for participant in &query.participants {
        clauses.push(format!("from:{}", participant));
        clauses.push(format!("to:{}", participant));
    }
    for domain in &query.domains {
        clauses.push(format!("from:{}", domain));
    }

    let window = format!(
        "after:{} before:{}",
        query.window.start.timestamp(),
        query.window.end.timestamp()
    );
    if clauses.is_empty() {
        window
    } else {
        format!("{} ({})", window, clauses.join(" OR "))
    }
}

/// Exact title plus the marker word, sent before the meeting, to or from
/// any of its participants.
pub fn render_notes_query(query: &NotesQuery) -> String {
    let title = query.title.replace('"', "");
    let mut q = format!(
        "\"{}\" {} before:{}",
        title,
        query.marker,
        query.before.timestamp()
    );
    if !query.participants.is_empty() {
        let clauses: Vec<String> = query
            .participants
            .iter()
            .flat_map(|p| [format!("from:{}", p), format!("to:{}", p)])
            .collect();
        q.push_str(&format!(" ({})", clauses.join(" OR ")));
    }
    q
}

/// Messages without a plain-text part carry no usable notes.
fn to_raw_note(message_id: &str, detail: &MessageDetail) -> Option<RawNote> {
    Some(RawNote {
        id: message_id.to_string(),
        subject: detail.header("Subject").unwrap_or_default().to_string(),
        received_at: detail.received_at()?,
        body: detail.plain_text()?,
    })
}

/// Depth-first search for the first part of `target_mime` with a body.
fn extract_body_text(payload: &MessagePayload, target_mime: &str) -> Option<String> {
    if payload.mime_type == target_mime {
        if let Some(data) = payload.body.as_ref().and_then(|b| b.data.as_deref()) {
            return decode_url_safe_base64(data);
        }
    }
    payload
        .parts
        .iter()
        .find_map(|part| extract_body_text(part, target_mime))
}

/// Gmail bodies are URL-safe base64, sometimes padded.
fn decode_url_safe_base64(data: &str) -> Option<String> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .ok()?;
    String::from_utf8(bytes).ok()
}

/// Subject comes from the first message; sender, time and excerpt from the
/// latest one.
fn to_raw_thread(detail: ThreadDetail) -> Option<RawThread> {
    let first = detail.messages.first()?;
    let last = detail.messages.last()?;

    let mut participants = Vec::new();
    for message in &detail.messages {
        for name in ["From", "To", "Cc"] {
            if let Some(value) = message.header(name) {
                participants.extend(split_addresses(value));
            }
        }
    }
    participants.dedup();

    Some(RawThread {
        id: detail.id,
        subject: first.header("Subject").unwrap_or_default().to_string(),
        sender: last.header("From").unwrap_or_default().to_string(),
        participants,
        received_at: last.received_at()?,
        excerpt: unescape_snippet(&last.snippet),
    })
}

/// Split an address-list header. Pieces without an '@' (halves of a quoted
/// "Last, First" display name) are dropped.
fn split_addresses(header: &str) -> Vec<String> {
    header
        .split(',')
        .map(str::trim)
        .filter(|a| a.contains('@'))
        .map(str::to_string)
        .collect()
}

/// Gmail snippets arrive HTML-escaped.
fn unescape_snippet(snippet: &str) -> String {
    snippet
        .replace("&#39;", "'")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

// ============================================================================
// Send
// ============================================================================

/// Sends the digest from the authenticated account. The recipient defaults
/// to the account's own address, looked up once.
pub struct GmailTransport {
    client: GoogleClient,
    recipient: Option<String>,
    profile_address: Mutex<Option<String>>,
}

impl GmailTransport {
    pub fn new(client: GoogleClient, recipient: Option<String>) -> Self {
        Self {
            client,
            recipient: recipient.filter(|r| !r.trim().is_empty()),
            profile_address: Mutex::new(None),
        }
    }

    async fn resolve_recipient(&self) -> Result<String, CollaboratorError> {
        if let Some(recipient) = &self.recipient {
            return Ok(recipient.clone());
        }
        let mut cached = self.profile_address.lock().await;
        if let Some(address) = cached.as_ref() {
            return Ok(address.clone());
        }
        let profile: Profile = self
            .client
            .get_json(&format!("{}/profile", GMAIL_BASE), &[])
            .await?;
        *cached = Some(profile.email_address.clone());
        Ok(profile.email_address)
    }
}

#[async_trait]
impl MailTransport for GmailTransport {
    async fn send(&self, digest: &DigestRendering) -> Result<(), CollaboratorError> {
        let to = self.resolve_recipient().await?;
        let raw = base64::engine::general_purpose::URL_SAFE
            .encode(build_rfc822(&to, &digest.subject, &digest.body));

        let resp: SendResponse = self
            .client
            .post_json(&format!("{}/messages/send", GMAIL_BASE), &SendRequest { raw })
            .await?;
        log::info!("Gmail accepted message id {}", resp.id);
        Ok(())
    }
}

fn build_rfc822(to: &str, subject: &str, body: &str) -> String {
    format!(
        "To: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\n\
         Content-Type: text/plain; charset=\"UTF-8\"\r\n\
         Content-Transfer-Encoding: 8bit\r\n\r\n{}",
        to,
        encode_header(subject),
        body.replace("\r\n", "\n").replace('\n', "\r\n")
    )
}

/// RFC 2047 encoded-word for non-ASCII header values.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!(
            "=?UTF-8?B?{}?=",
            base64::engine::general_purpose::STANDARD.encode(value)
        )
    }
}
