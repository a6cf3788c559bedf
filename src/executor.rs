//! Run execution engine
//!
//! Receives trigger messages from the scheduler (or a manual request), runs
//! the digest pipeline for the right local day, and keeps an execution
//! record for every run.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::sync::mpsc;

use crate::error::ExecutionError;
use crate::scheduler::SchedulerMessage;
use crate::state::{create_execution_record, AppState};
use crate::types::{DispatchOutcome, ExecutionTrigger};
use crate::workflow::{PrereadRun, RunReport};

/// Executor manages digest runs
pub struct Executor {
    state: Arc<AppState>,
    run: Arc<PrereadRun>,
}

impl Executor {
    pub fn new(state: Arc<AppState>, run: Arc<PrereadRun>) -> Self {
        Self { state, run }
    }

    /// Start the executor loop
    ///
    /// Listens for run requests from the scheduler or manual triggers.
    /// Runs are processed one at a time.
    pub async fn run(&self, mut receiver: mpsc::Receiver<SchedulerMessage>) {
        while let Some(msg) = receiver.recv().await {
            let day = msg
                .scheduled_for
                .with_timezone(&self.run.timezone())
                .date_naive();
            log::info!("Executing digest run for {} (trigger: {:?})", day, msg.trigger);

            match self.execute(day, msg.trigger).await {
                Ok(_) => {}
                Err(e) if e.is_retryable() => log::warn!(
                    "Digest run for {} failed: {}. Run `preread run` to retry.",
                    day,
                    e
                ),
                Err(e) => log::error!(
                    "Digest run for {} failed: {} ({})",
                    day,
                    e,
                    e.recovery_suggestion()
                ),
            }
        }
    }

    /// Execute one run and record it
    pub async fn execute(
        &self,
        day: NaiveDate,
        trigger: ExecutionTrigger,
    ) -> Result<RunReport, ExecutionError> {
        let record = create_execution_record(day, trigger);
        let execution_id = record.id.clone();
        self.state.add_execution_record(record);

        let result = self.run.run_once(day, trigger).await;
        let finished_at = Utc::now();

        match &result {
            Ok(report) => {
                let error_message = match &report.outcome {
                    DispatchOutcome::Failed(reason) => Some(reason.clone()),
                    _ => None,
                };
                self.state.update_execution_record(&execution_id, |r| {
                    r.finished_at = Some(finished_at);
                    r.outcome = Some(report.outcome.clone());
                    r.meeting_count = report.meeting_count;
                    r.error_message = error_message;
                });
            }
            Err(err) => {
                self.state.update_execution_record(&execution_id, |r| {
                    r.finished_at = Some(finished_at);
                    r.error_message = Some(err.to_string());
                });
            }
        }

        result
    }
}

/// Request a manual run through the executor queue
pub fn request_manual_run(sender: &mpsc::Sender<SchedulerMessage>) -> Result<(), String> {
    sender
        .try_send(SchedulerMessage {
            trigger: ExecutionTrigger::Manual,
            scheduled_for: Utc::now(),
        })
        .map_err(|e| format!("Failed to queue run: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::test_utils::{FakeCalendar, FakeMailbox, FakeSummarizer, FakeTransport};
    use crate::sources::Collaborators;
    use crate::types::Config;

    fn executor(calendar: FakeCalendar) -> (Executor, Arc<AppState>, Arc<FakeTransport>) {
        let config = Config {
            timezone: "UTC".to_string(),
            ..Default::default()
        };
        let state = Arc::new(AppState::new(config.clone()));
        let transport = Arc::new(FakeTransport::default());
        let collaborators = Collaborators {
            calendar: Arc::new(calendar),
            mailbox: Arc::new(FakeMailbox::default()),
            summarizer: Arc::new(FakeSummarizer::default()),
            transport: transport.clone(),
        };
        let run = PrereadRun::new(config, collaborators, Arc::clone(&state.delivery)).unwrap();
        (Executor::new(Arc::clone(&state), Arc::new(run)), state, transport)
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    #[tokio::test]
    async fn test_successful_run_is_recorded() {
        let (executor, state, transport) = executor(FakeCalendar::default());

        let report = executor.execute(day(), ExecutionTrigger::Scheduled).await.unwrap();
        assert_eq!(report.outcome, DispatchOutcome::Sent);
        assert_eq!(transport.sent_count(), 1);

        let history = state.get_execution_history(10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outcome, Some(DispatchOutcome::Sent));
        assert_eq!(history[0].meeting_count, Some(0));
        assert!(history[0].finished_at.is_some());
        assert!(state.delivery.is_sent(day()).await);
    }

    #[tokio::test]
    async fn test_calendar_failure_is_recorded() {
        let (executor, state, transport) = executor(FakeCalendar {
            events: Vec::new(),
            unreachable: true,
        });

        let err = executor.execute(day(), ExecutionTrigger::Scheduled).await.unwrap_err();
        assert!(matches!(err, ExecutionError::CalendarUnavailable(_)));
        assert_eq!(transport.sent_count(), 0);

        let history = state.get_execution_history(10);
        assert!(history[0].outcome.is_none());
        assert!(history[0]
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("Calendar unavailable"));
    }

    #[tokio::test]
    async fn test_queue_drives_runs() {
        let (executor, state, transport) = executor(FakeCalendar::default());
        let (sender, receiver) = mpsc::channel(4);

        request_manual_run(&sender).unwrap();
        request_manual_run(&sender).unwrap();
        drop(sender);
        executor.run(receiver).await;

        assert_eq!(transport.sent_count(), 2);
        assert_eq!(state.get_execution_history(10).len(), 2);
    }
}
