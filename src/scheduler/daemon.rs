use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::{task::JoinHandle, time::sleep};
use tracing::info;

use crate::scheduler::{Scheduler, cadence::DailyCadence};

/// Spawns the daily pending sweep.
pub(crate) fn spawn_sweep_daemon(scheduler: Scheduler, cadence: DailyCadence) -> JoinHandle<()> {
    SweepDaemon { scheduler, cadence }.spawn()
}

struct SweepDaemon {
    scheduler: Scheduler,
    cadence: DailyCadence,
}

impl SweepDaemon {
    fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(self) {
        loop {
            let now = Utc::now();
            let next = self.cadence.next_run_from(now);
            let wait = duration_until(next, now);
            info!(
                next_run_utc = %next.to_rfc3339(),
                next_run_local = %next.with_timezone(&self.cadence.tz()).to_rfc3339(),
                wait_seconds = wait.as_secs(),
                "scheduled pending sweep"
            );
            sleep(wait).await;

            self.scheduler.run_sweep("daemon").await;

            // The trigger minute is still "now" right after a fast sweep.
            sleep(Duration::from_secs(60)).await;
        }
    }
}

fn duration_until(next: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (next - now).to_std().unwrap_or(Duration::ZERO)
}
