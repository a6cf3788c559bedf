pub mod error;
pub mod executor;
pub mod google_api;
pub mod intelligence;
pub mod prepare;
pub mod scheduler;
pub mod sources;
pub mod state;
pub mod types;
pub mod workflow;

use std::sync::Arc;

use tokio::sync::mpsc;

use error::ExecutionError;
use google_api::{GoogleCalendar, GoogleClient, Gmail, GmailTransport, TokenProvider};
use intelligence::ChatCompletionsSummarizer;
use sources::Collaborators;
use state::AppState;
use types::Config;
use workflow::PrereadRun;

/// Channel buffer size for scheduler messages
const SCHEDULER_CHANNEL_SIZE: usize = 32;

/// Wire the Google adapters and the chat-completions summarizer from config.
pub fn live_collaborators(config: &Config) -> Result<Collaborators, ExecutionError> {
    let tokens = Arc::new(TokenProvider::from_config(&config.google)?);
    let google = GoogleClient::new(tokens);
    let summarizer = ChatCompletionsSummarizer::from_env(&config.summarizer)?;

    Ok(Collaborators {
        calendar: Arc::new(GoogleCalendar::new(google.clone())),
        mailbox: Arc::new(Gmail::new(google.clone())),
        summarizer: Arc::new(summarizer),
        transport: Arc::new(GmailTransport::new(google, config.recipient.clone())),
    })
}

/// Run the scheduler and executor until the process is stopped.
///
/// With `run_now`, a manual run is queued ahead of the first scheduled one.
pub async fn run_daemon(state: Arc<AppState>, run: Arc<PrereadRun>, run_now: bool) {
    // Create channel for scheduler -> executor communication
    let (scheduler_tx, scheduler_rx) = mpsc::channel(SCHEDULER_CHANNEL_SIZE);

    if run_now {
        if let Err(e) = executor::request_manual_run(&scheduler_tx) {
            log::warn!("{}", e);
        }
    }

    let next_run = {
        let config = state.config.read();
        scheduler::schedule_timezone(&config)
            .and_then(|tz| scheduler::get_next_run_time(&config.schedule, tz))
    };
    match next_run {
        Ok(next) => log::info!("Next digest run at {}", next),
        Err(e) => log::warn!("Could not compute next run time: {}", e),
    }

    // Spawn scheduler
    let scheduler_state = state.clone();
    let scheduler = tokio::spawn(async move {
        scheduler::Scheduler::new(scheduler_state, scheduler_tx)
            .run()
            .await;
    });

    // Executor runs on this task until the channel closes
    executor::Executor::new(state, run).run(scheduler_rx).await;

    scheduler.abort();
}
