//! Per-host pacing. Every upstream gets its own minimum interval between request starts
//! and its own cap on in-flight requests, so a slow vendor never throttles the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::config::HttpSettings;

#[derive(Debug)]
struct HostSlot {
    interval: Duration,
    next_start: Mutex<Instant>,
    permits: Arc<Semaphore>,
}

#[derive(Debug)]
pub struct HostLimiter {
    default_interval: Duration,
    intervals: HashMap<String, Duration>,
    per_host_concurrency: usize,
    hosts: Mutex<HashMap<String, Arc<HostSlot>>>,
}

/// Held for the duration of one request; dropping it frees the host's concurrency slot.
#[derive(Debug)]
pub struct HostPermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl HostLimiter {
    pub fn new(
        default_interval: Duration,
        intervals: impl IntoIterator<Item = (String, Duration)>,
        per_host_concurrency: usize,
    ) -> Self {
        Self {
            default_interval,
            intervals: intervals.into_iter().collect(),
            per_host_concurrency: per_host_concurrency.max(1),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_settings(settings: &HttpSettings) -> Self {
        Self::new(
            settings.default_interval,
            settings.host_intervals.iter().cloned(),
            settings.per_host_concurrency,
        )
    }

    async fn slot(&self, host: &str) -> Arc<HostSlot> {
        let mut hosts = self.hosts.lock().await;
        hosts
            .entry(host.to_string())
            .or_insert_with(|| {
                Arc::new(HostSlot {
                    interval: self
                        .intervals
                        .get(host)
                        .copied()
                        .unwrap_or(self.default_interval),
                    next_start: Mutex::new(Instant::now()),
                    permits: Arc::new(Semaphore::new(self.per_host_concurrency)),
                })
            })
            .clone()
    }

    pub async fn acquire(&self, host: &str) -> HostPermit {
        let slot = self.slot(host).await;
        // The semaphore is never closed, so acquisition only fails if that changes.
        let permit = slot.permits.clone().acquire_owned().await.ok();

        let wait = {
            let mut next = slot.next_start.lock().await;
            let now = Instant::now();
            let start = (*next).max(now);
            *next = start + slot.interval;
            start - now
        };
        if !wait.is_zero() {
            debug!(host, wait_ms = wait.as_millis() as u64, "rate limit wait");
            sleep(wait).await;
        }
        HostPermit { _permit: permit }
    }
}
