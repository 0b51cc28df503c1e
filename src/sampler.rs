// Per-source polling: one task per provider, each on its own (jittered) timer.
// A poll never fails: timeouts and tool errors become Unavailable/Error samples.
// After `failure_threshold` consecutive failures the interval doubles per failure up to
// `max_interval`; the first success resets it.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, warn};

use crate::error::MonitorError;
use crate::models::{Sample, SampleStatus, unix_millis};
use crate::providers::Provider;

/// Cap on the exponent so the multiplier cannot overflow.
const MAX_DOUBLINGS: u32 = 16;

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub interval: Duration,
    /// Upper bound of the random delay added to every wait.
    pub jitter: Duration,
    pub timeout: Duration,
    pub failure_threshold: u32,
    pub max_interval: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            jitter: Duration::from_millis(250),
            timeout: Duration::from_secs(3),
            failure_threshold: 5,
            max_interval: Duration::from_secs(60),
        }
    }
}

/// Interval to use after `consecutive_failures` failures in a row.
pub fn backoff_interval(config: &SamplerConfig, consecutive_failures: u32) -> Duration {
    if consecutive_failures < config.failure_threshold {
        return config.interval;
    }
    let doublings = (consecutive_failures - config.failure_threshold + 1).min(MAX_DOUBLINGS);
    config
        .interval
        .checked_mul(1u32 << doublings)
        .unwrap_or(config.max_interval)
        .min(config.max_interval)
        .max(config.interval)
}

pub struct Sampler {
    provider: Arc<dyn Provider>,
    config: SamplerConfig,
    consecutive_failures: u32,
    interval: Duration,
}

impl Sampler {
    pub fn new(provider: Arc<dyn Provider>, config: SamplerConfig) -> Self {
        let interval = config.interval;
        Self {
            provider,
            config,
            consecutive_failures: 0,
            interval,
        }
    }

    pub fn source_id(&self) -> &str {
        self.provider.source_id()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Wait before the next poll, without jitter.
    pub fn current_interval(&self) -> Duration {
        self.interval
    }

    /// Poll the provider once, bounded by the configured timeout.
    pub async fn poll(&mut self) -> Sample {
        let provider = self.provider.clone();
        let source_id = provider.source_id().to_string();
        let result = tokio::time::timeout(self.config.timeout, provider.collect()).await;
        let timestamp = unix_millis();

        match result {
            Ok(Ok(payload)) => {
                self.record_success();
                Sample::ok(source_id, timestamp, payload)
            }
            Ok(Err(e)) => {
                self.record_failure();
                let reason = format!("{:#}", e);
                self.log_failure(&source_id, &reason);
                Sample::failed(source_id, timestamp, SampleStatus::Error, reason)
            }
            Err(_) => {
                self.record_failure();
                let err = MonitorError::SourceUnavailable {
                    source_id: source_id.clone(),
                    reason: format!("timed out after {:?}", self.config.timeout),
                };
                self.log_failure(&source_id, &err.to_string());
                Sample::failed(source_id, timestamp, SampleStatus::Unavailable, err)
            }
        }
    }

    fn record_success(&mut self) {
        if self.consecutive_failures >= self.config.failure_threshold {
            info!(
                source_id = self.provider.source_id(),
                failures = self.consecutive_failures,
                "source recovered, interval reset"
            );
        }
        self.consecutive_failures = 0;
        self.interval = self.config.interval;
    }

    fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.interval = backoff_interval(&self.config, self.consecutive_failures);
    }

    fn log_failure(&self, source_id: &str, reason: &str) {
        // Once backed off, repeats only go to debug.
        if self.consecutive_failures <= self.config.failure_threshold {
            warn!(
                source_id,
                error = reason,
                consecutive_failures = self.consecutive_failures,
                next_interval_ms = self.interval.as_millis() as u64,
                operation = "poll",
                "source poll failed"
            );
        } else {
            debug!(
                source_id,
                error = reason,
                consecutive_failures = self.consecutive_failures,
                next_interval_ms = self.interval.as_millis() as u64,
                operation = "poll",
                "source poll failed"
            );
        }
    }

    fn next_delay(&self) -> Duration {
        let jitter_ms = self.config.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.interval;
        }
        self.interval + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

/// Poll until shutdown, sending exactly one sample per cycle into `ingress`.
pub fn spawn(
    mut sampler: Sampler,
    ingress: mpsc::Sender<Sample>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let span = tracing::debug_span!("sampler", source_id = %sampler.source_id());
    tokio::spawn(
        async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                let sample = tokio::select! {
                    sample = sampler.poll() => sample,
                    _ = shutdown.changed() => break,
                };
                if ingress.send(sample).await.is_err() {
                    debug!("aggregator ingress closed");
                    break;
                }
                let delay = sampler.next_delay();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => break,
                }
            }
            debug!("sampler shutting down");
        }
        .instrument(span),
    )
}
