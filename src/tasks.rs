use crate::state::AppState;
use crate::watcher;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Pause after a cycle that failed outright.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Runs watch cycles until `shutdown` fires. Cancellation only interrupts
/// the sleeps between cycles, never a cycle in progress.
pub async fn run(state: AppState, shutdown: CancellationToken) {
    info!("Starting TorBox Watcher");
    while !shutdown.is_cancelled() {
        let pause = match run_cycle(&state).await {
            Ok(()) => {
                info!(
                    "Waiting {} seconds until next scan",
                    state.settings.watch_interval
                );
                state.settings.watch_interval()
            }
            Err(e) => {
                error!("Unexpected error in main loop: {}", e);
                ERROR_BACKOFF
            }
        };

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }
    report_unfinished(&state);
    info!("Shutting down...");
}

fn report_unfinished(state: &AppState) {
    if !state.active.is_empty() {
        warn!(
            "{} download or extraction operations still in progress",
            state.active.len()
        );
    }
    if state.tracker.is_empty() {
        return;
    }
    info!("{} downloads still tracked:", state.tracker.len());
    let mut jobs: Vec<_> = state.tracker.all().into_iter().collect();
    jobs.sort_by(|a, b| a.1.submitted_at.cmp(&b.1.submitted_at));
    for (id, job) in jobs {
        info!(
            "  {} [{}]: {} (submitted {}, from {:?})",
            job.kind.label(),
            id,
            job.name,
            job.submitted_at.format("%Y-%m-%d %H:%M:%S UTC"),
            job.source_file
        );
    }
}

async fn run_cycle(state: &AppState) -> Result<(), crate::error::WatchError> {
    watcher::scan_watch_directory(state).await?;
    watcher::check_download_status(state).await;
    Ok(())
}
