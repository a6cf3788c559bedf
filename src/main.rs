use std::process::ExitCode;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use preread_lib::error::ExecutionError;
use preread_lib::state::{config_path, load_config, AppState};
use preread_lib::types::{DispatchOutcome, ExecutionTrigger};
use preread_lib::workflow::PrereadRun;

#[derive(Parser)]
#[command(name = "preread")]
#[command(author, version, about = "Daily meeting prereads from your calendar and inbox")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and send the digest on schedule
    Daemon {
        /// Also send a digest for today right away
        #[arg(long)]
        now: bool,
    },
    /// Build and send the digest now, even if today's was already sent
    Run {
        /// Day to run for (YYYY-MM-DD), defaults to today
        date: Option<NaiveDate>,
    },
    /// Build the digest and print it without sending
    Preview {
        /// Day to preview (YYYY-MM-DD), defaults to today
        date: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match execute(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("{}\n{}", e, e.recovery_suggestion());
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Commands) -> Result<(), ExecutionError> {
    let config = load_config(&config_path()?)?;
    let collaborators = preread_lib::live_collaborators(&config)?;
    let state = Arc::new(AppState::new(config.clone()));
    let run = Arc::new(PrereadRun::new(
        config,
        collaborators,
        Arc::clone(&state.delivery),
    )?);

    match command {
        Commands::Daemon { now } => {
            log::info!("Starting preread daemon");
            preread_lib::run_daemon(state, run, now).await;
            Ok(())
        }
        Commands::Run { date } => {
            let day = date.unwrap_or_else(|| run.today());
            let report = run.run_once(day, ExecutionTrigger::Manual).await?;
            match report.outcome {
                DispatchOutcome::Sent => {
                    println!(
                        "Digest for {} sent ({} meeting(s), {} not summarized)",
                        day,
                        report.meeting_count.unwrap_or(0),
                        report.failed_count
                    );
                    Ok(())
                }
                DispatchOutcome::AlreadySent => {
                    println!("Digest for {} was already sent", day);
                    Ok(())
                }
                DispatchOutcome::Failed(reason) => Err(ExecutionError::DeliveryFailed(reason)),
            }
        }
        Commands::Preview { date } => {
            let day = date.unwrap_or_else(|| run.today());
            let rendering = run.build_digest(day).await?.render();
            println!("Subject: {}\n\n{}", rendering.subject, rendering.body);
            Ok(())
        }
    }
}
