//! Per-meeting preparation.
//!
//! Calendar fetch, Gmail search and the summarizer adapter live in
//! google_api/ and intelligence/. This module covers:
//! - constants: noise tokens, stopwords, personal email domains
//! - normalize: raw calendar entries to meeting records
//! - thread_matcher: mailbox query + candidate scoring
//! - prior_notes: notes mailed after earlier occurrences of a meeting
//! - meeting_context: bounded summarizer payload
//! - orchestrate: per-meeting state machine with failure isolation

pub mod constants;
pub mod meeting_context;
pub mod normalize;
pub mod orchestrate;
pub mod prior_notes;
pub mod thread_matcher;
