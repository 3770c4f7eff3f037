//! Concurrent evaluation of all declared checks

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::checks::{Check, CheckResult};
use super::clock::{Clock, SystemClock};
use super::providers::Providers;
use super::registry::parse_checks;
use super::schedule::should_run;
use crate::cache::ResponseCache;
use crate::error::CheckError;

/// Runs every registered check through the cron gate and its provider with
/// bounded concurrency, and returns the results sorted by name.
pub struct ExternalServices {
    checks: Vec<Check>,
    providers: Providers,
    concurrency: usize,
    timeout: Duration,
    cache: ResponseCache,
    clock: Arc<dyn Clock>,
}

impl ExternalServices {
    pub fn new<S: AsRef<str>>(
        providers: Providers,
        concurrency: usize,
        timeout: Duration,
        declarations: &[S],
    ) -> Self {
        Self {
            checks: parse_checks(declarations),
            providers,
            concurrency: concurrency.max(1),
            timeout,
            cache: ResponseCache::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub async fn status(&self) -> Vec<CheckResult> {
        if self.checks.is_empty() {
            return Vec::new();
        }

        let started = Instant::now();
        let now = self.clock.now();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let (tx, mut rx) = mpsc::channel(self.checks.len());
        let mut tasks = JoinSet::new();

        for check in &self.checks {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    warn!("check semaphore closed: {}", e);
                    break;
                }
            };

            let check = check.clone();
            let providers = self.providers.clone();
            let cache = self.cache.clone();
            let timeout = self.timeout;
            let tx = tx.clone();

            tasks.spawn(async move {
                let _permit = permit;
                if let Some(result) = evaluate(check, providers, cache, timeout, now).await {
                    let _ = tx.send(result).await;
                }
            });
        }
        drop(tx);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!("check task failed: {}", e);
            }
        }

        let mut results = Vec::with_capacity(self.checks.len());
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        results.sort_by(|a, b| a.name.cmp(&b.name));

        info!(
            "evaluated {} of {} checks in {:?}",
            results.len(),
            self.checks.len(),
            started.elapsed()
        );
        let stats = self.cache.stats();
        debug!(
            hits = stats.hits,
            misses = stats.misses,
            writes = stats.writes,
            size = stats.current_size,
            hit_rate = stats.hit_rate,
            "response cache"
        );
        results
    }
}

/// Gate, route and execute a single check. `None` when the gate skipped the
/// check and nothing was cached for it.
async fn evaluate(
    check: Check,
    providers: Providers,
    cache: ResponseCache,
    timeout: Duration,
    now: DateTime<Local>,
) -> Option<CheckResult> {
    let run = match should_run(&check.url, &now) {
        Ok(run) => run,
        Err(e) => {
            warn!("can't evaluate schedule for {}, running it: {}", check.name, e);
            true
        }
    };

    if !run {
        debug!("check {} skipped by schedule", check.name);
        return cache.get(&check);
    }

    let start = Instant::now();
    let result = match execute(&check, &providers, timeout).await {
        Ok(result) => result.with_response_time(start.elapsed()),
        Err(e) => {
            warn!("check {} ({}) failed: {}", check.name, check.url, e);
            CheckResult::failed(&check.name, start.elapsed())
        }
    };

    cache.put(check, result.clone());
    Some(result)
}

async fn execute(check: &Check, providers: &Providers, timeout: Duration) -> Result<CheckResult, CheckError> {
    let provider = providers.route(&check.url)?;

    let owned = check.clone();
    let handle = tokio::spawn(async move { provider.status(&owned).await });
    let abort = handle.abort_handle();

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(CheckError::Transport(format!("provider task failed: {}", join_err))),
        Err(_) => {
            abort.abort();
            Err(CheckError::Timeout(timeout))
        }
    }
}
