//! Shared constants for meeting preparation.

/// Title used for calendar entries with no usable title.
pub const PLACEHOLDER_TITLE: &str = "(No title)";

/// Personal email domains (not tied to any organization). Never used as
/// domain search terms.
pub const PERSONAL_EMAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "outlook.com",
    "hotmail.com",
    "yahoo.com",
    "icloud.com",
    "me.com",
    "live.com",
];

/// Generic meeting-title words that say nothing about the subject matter.
/// Dropped from the mailbox query, kept for subject overlap scoring.
pub const NOISE_TITLE_TOKENS: &[&str] = &[
    "sync",
    "1:1",
    "1on1",
    "weekly",
    "daily",
    "biweekly",
    "monthly",
    "standup",
    "stand-up",
    "meeting",
    "call",
    "chat",
    "catchup",
    "catch-up",
    "check-in",
    "checkin",
    "touchbase",
    "focus",
    "block",
    "hold",
    "review",
    "team",
    "recurring",
];

/// Filler words dropped everywhere.
pub const STOPWORDS: &[&str] = &[
    "a", "an", "and", "the", "of", "for", "to", "on", "in", "with", "at", "by", "or", "re",
    "fw", "fwd", "x", "vs",
];

/// Response statuses that mean the mailbox owner is not attending.
pub const DECLINED_STATUSES: &[&str] = &["declined"];
