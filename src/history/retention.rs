// Retention worker: bounded sweeps on a fixed interval, VACUUM on a cron schedule (local
// time) or a fixed interval. Failures are logged and retried on the next cycle.

use chrono::{DateTime, Local};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use super::HistoryStore;
use crate::models::unix_millis;
use crate::stats::Stats;

/// Fallback wait when a cron schedule has no upcoming time.
const NO_SCHEDULE_RETRY: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub sweep_interval: Duration,
    /// Cron expression with seconds field, e.g. "0 0 3 * * *". Takes precedence over
    /// `vacuum_interval`.
    pub vacuum_schedule: Option<String>,
    pub vacuum_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(3600),
            vacuum_schedule: None,
            vacuum_interval: Duration::from_secs(86_400),
        }
    }
}

/// Time until the next VACUUM after `now`.
pub fn next_vacuum_delay(
    schedule: Option<&cron::Schedule>,
    fixed: Duration,
    now: DateTime<Local>,
) -> Duration {
    let Some(schedule) = schedule else {
        return fixed;
    };
    match schedule.after(&now).next() {
        Some(next) => (next - now).to_std().unwrap_or(Duration::from_secs(1)),
        None => NO_SCHEDULE_RETRY,
    }
}

/// One sweep against the current time. Returns rows deleted; errors are logged.
pub async fn sweep_once(store: &HistoryStore, stats: &Stats) -> u64 {
    match store.sweep(unix_millis()).await {
        Ok(n) => {
            stats.history_pruned.fetch_add(n, Ordering::Relaxed);
            if n > 0 {
                info!(operation = "sweep", deleted = n, "history retention sweep");
            }
            n
        }
        Err(e) => {
            warn!(error = %e, operation = "sweep", "retention sweep failed, retrying next cycle");
            0
        }
    }
}

pub fn spawn(
    store: Arc<HistoryStore>,
    config: RetentionConfig,
    stats: Arc<Stats>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run(store, config, stats, shutdown))
}

#[instrument(skip_all, fields(sweep_interval_secs = config.sweep_interval.as_secs()))]
async fn run(
    store: Arc<HistoryStore>,
    config: RetentionConfig,
    stats: Arc<Stats>,
    mut shutdown: watch::Receiver<bool>,
) {
    let schedule = match config.vacuum_schedule.as_deref().map(cron::Schedule::from_str) {
        Some(Ok(s)) => Some(s),
        Some(Err(e)) => {
            warn!(error = %e, "invalid vacuum_schedule; using vacuum_interval");
            None
        }
        None => None,
    };

    let mut sweep_tick = tokio::time::interval(config.sweep_interval);
    sweep_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let vacuum_sleep = tokio::time::sleep(next_vacuum_delay(
        schedule.as_ref(),
        config.vacuum_interval,
        Local::now(),
    ));
    tokio::pin!(vacuum_sleep);

    loop {
        tokio::select! {
            _ = sweep_tick.tick() => {
                sweep_once(&store, &stats).await;
            }
            _ = &mut vacuum_sleep => {
                if let Err(e) = store.vacuum().await {
                    warn!(error = %e, "vacuum failed");
                } else {
                    info!("vacuum complete");
                }
                let delay = next_vacuum_delay(schedule.as_ref(), config.vacuum_interval, Local::now());
                vacuum_sleep.as_mut().reset(tokio::time::Instant::now() + delay);
            }
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!("retention worker shutting down");
}
