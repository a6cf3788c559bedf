//! Today workflow implementation
//!
//! One run, start to finish:
//! 1. Fetch the day's calendar and normalize it into meetings
//! 2. Prepare every meeting concurrently (threads, payload, summary)
//! 3. Assemble the digest and hand it to the delivery guard
//!
//! The whole of phases 1 and 2 is bounded by the run deadline.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use tokio::time::Instant;

use super::deliver::DeliveryGuard;
use super::digest::{assemble_digest, DigestDocument};
use crate::error::{CollaboratorError, ExecutionError};
use crate::prepare::normalize::normalize_events;
use crate::prepare::orchestrate::SummaryOrchestrator;
use crate::sources::{bounded_call, Collaborators};
use crate::types::{Config, DispatchOutcome, ExecutionTrigger};

/// What a single run did.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub outcome: DispatchOutcome,
    /// `None` when the run was skipped before the calendar was read.
    pub meeting_count: Option<usize>,
    pub failed_count: usize,
}

pub struct PrereadRun {
    config: Config,
    timezone: Tz,
    collaborators: Collaborators,
    guard: Arc<DeliveryGuard>,
}

impl PrereadRun {
    pub fn new(
        config: Config,
        collaborators: Collaborators,
        guard: Arc<DeliveryGuard>,
    ) -> Result<Self, ExecutionError> {
        let timezone: Tz = config.timezone.parse().map_err(|_| {
            ExecutionError::ConfigurationError(format!("Invalid timezone: {}", config.timezone))
        })?;
        Ok(Self {
            config,
            timezone,
            collaborators,
            guard,
        })
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn guard(&self) -> &Arc<DeliveryGuard> {
        &self.guard
    }

    /// Current calendar date in the configured timezone.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }

    fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeouts.call_secs)
    }

    /// Build the digest for `day` without sending it.
    ///
    /// A calendar failure aborts the run. Anything that goes wrong for a
    /// single meeting is recorded on that meeting's entry instead.
    pub async fn build_digest(&self, day: NaiveDate) -> Result<DigestDocument, ExecutionError> {
        let run_secs = self.config.timeouts.run_secs;
        let deadline = Instant::now() + Duration::from_secs(run_secs);

        let calendar = self.collaborators.calendar.as_ref();
        let tz = self.timezone;
        let fetch_timeout = self.call_timeout().min(Duration::from_secs(run_secs));
        let raw = bounded_call("calendar fetch", fetch_timeout, || calendar.list_events(day, tz))
            .await
            .map_err(|e| match e {
                CollaboratorError::Timeout(_) if Instant::now() >= deadline => {
                    ExecutionError::RunTimeout(run_secs)
                }
                other => ExecutionError::CalendarUnavailable(other),
            })?;

        let meetings = normalize_events(&raw);
        log::info!(
            "{} calendar entries for {}, {} qualifying meeting(s)",
            raw.len(),
            day,
            meetings.len()
        );

        let orchestrator = Arc::new(SummaryOrchestrator::new(
            &self.config,
            Arc::clone(&self.collaborators.mailbox),
            Arc::clone(&self.collaborators.summarizer),
        ));
        let results = orchestrator.prepare_all(meetings, deadline).await;

        Ok(assemble_digest(day, self.timezone, results))
    }

    /// Build and dispatch the digest for `day`.
    ///
    /// Guarded triggers skip all work when the day is already delivered.
    pub async fn run_once(
        &self,
        day: NaiveDate,
        trigger: ExecutionTrigger,
    ) -> Result<RunReport, ExecutionError> {
        log::info!("Preread run for {} ({:?})", day, trigger);

        if trigger.honors_delivery_guard() && self.guard.is_sent(day).await {
            log::info!("Digest for {} already delivered", day);
            return Ok(RunReport {
                outcome: DispatchOutcome::AlreadySent,
                meeting_count: None,
                failed_count: 0,
            });
        }

        let digest = self.build_digest(day).await?;
        if digest.failed_count() > 0 {
            log::warn!(
                "{} of {} meeting(s) could not be summarized",
                digest.failed_count(),
                digest.meeting_count()
            );
        }

        let outcome = self
            .guard
            .attempt_dispatch(
                &digest,
                day,
                trigger,
                self.collaborators.transport.as_ref(),
                self.call_timeout(),
            )
            .await;
        Ok(RunReport {
            outcome,
            meeting_count: Some(digest.meeting_count()),
            failed_count: digest.failed_count(),
        })
    }
}
