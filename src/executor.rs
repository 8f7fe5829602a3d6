use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::time::{Duration, Instant};

use rand::Rng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::error::{FetchError, FetchErrorKind, ProfileError};
use crate::request::FetchTask;
use crate::retry::{NoRetry, RetryPolicy};
use crate::store::Store;
use crate::transport::Transport;

const NETCDF_MAGIC: [&[u8]; 4] = [b"CDF\x01", b"CDF\x02", b"CDF\x05", b"\x89HDF\r\n\x1a\n"];

/// Uniform random pause before each request, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const NONE: DelayRange = DelayRange {
        min_ms: 0,
        max_ms: 0,
    };

    fn sample(&self) -> Duration {
        if self.max_ms == 0 {
            return Duration::ZERO;
        }
        let millis = rand::thread_rng().gen_range(self.min_ms..=self.max_ms.max(self.min_ms));
        Duration::from_millis(millis)
    }
}

impl Default for DelayRange {
    fn default() -> Self {
        Self {
            min_ms: 1000,
            max_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutorOptions {
    pub concurrency: usize,
    pub delay: DelayRange,
    pub skip_existing: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            delay: DelayRange::default(),
            skip_existing: true,
        }
    }
}

pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(4)
}

/// Terminal outcome of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchResult {
    Fetched {
        path: String,
        bytes: u64,
        attempts: u32,
    },
    Reused {
        path: String,
    },
    Failed {
        error: FetchError,
        attempts: u32,
    },
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        !matches!(self, FetchResult::Failed { .. })
    }

    pub fn status(&self) -> &'static str {
        match self {
            FetchResult::Fetched { .. } => "fetched",
            FetchResult::Reused { .. } => "reused",
            FetchResult::Failed { .. } => "failed",
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            FetchResult::Fetched { path, .. } | FetchResult::Reused { path } => Some(path),
            FetchResult::Failed { .. } => None,
        }
    }
}

pub type FetchResults = HashMap<FetchTask, FetchResult>;

pub struct FetchExecutor<T: Transport> {
    transport: T,
    store: Store,
    retry: Box<dyn RetryPolicy>,
    options: ExecutorOptions,
}

impl<T: Transport> FetchExecutor<T> {
    pub fn new(transport: T, store: Store, options: ExecutorOptions) -> Self {
        Self {
            transport,
            store,
            retry: Box::new(NoRetry),
            options,
        }
    }

    pub fn with_retry_policy(mut self, retry: Box<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Runs every task on a fixed pool of `concurrency` threads and returns
    /// once each one has a terminal result. Individual failures never abort
    /// the pool.
    pub fn execute(
        &self,
        tasks: &[FetchTask],
        cancel: &CancellationToken,
    ) -> Result<FetchResults, ProfileError> {
        self.execute_with(tasks, cancel, &|_, _| {})
    }

    /// Like [`FetchExecutor::execute`], calling `on_done` from the worker
    /// thread as each task reaches its terminal result.
    pub fn execute_with(
        &self,
        tasks: &[FetchTask],
        cancel: &CancellationToken,
        on_done: &(dyn Fn(&FetchTask, &FetchResult) + Sync),
    ) -> Result<FetchResults, ProfileError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.concurrency.max(1))
            .thread_name(|idx| format!("fetch-{idx}"))
            .build()
            .map_err(|err| ProfileError::WorkerPool(err.to_string()))?;

        let start = Instant::now();
        info!(
            tasks = tasks.len(),
            workers = self.options.concurrency,
            "starting fetch pool"
        );
        let results: FetchResults = pool.install(|| {
            tasks
                .par_iter()
                .map(|task| {
                    let result = self.execute_one(task, cancel);
                    on_done(task, &result);
                    (task.clone(), result)
                })
                .collect()
        });
        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "fetch pool drained"
        );
        Ok(results)
    }

    fn execute_one(&self, task: &FetchTask, cancel: &CancellationToken) -> FetchResult {
        let dest = self.store.fetch_path(task);
        if self.options.skip_existing && Store::is_populated(&dest) {
            debug!(path = %dest, "reusing existing file");
            return FetchResult::Reused {
                path: dest.to_string(),
            };
        }

        let mut attempts = 0u32;
        loop {
            if !cancel.sleep(self.options.delay.sample()) {
                return cancelled(attempts);
            }
            attempts += 1;
            let start = Instant::now();
            match self.attempt(task, cancel) {
                Ok(bytes) => {
                    debug!(
                        locator = %task.locator,
                        bytes,
                        latency_ms = start.elapsed().as_millis() as u64,
                        "fetched"
                    );
                    return FetchResult::Fetched {
                        path: dest.to_string(),
                        bytes,
                        attempts,
                    };
                }
                Err(error) if error.kind == FetchErrorKind::Cancelled => {
                    debug!(locator = %task.locator, "fetch abandoned");
                    return FetchResult::Failed { error, attempts };
                }
                Err(error) => {
                    if let Some(delay) = self.retry.next_delay(attempts, &error) {
                        warn!(
                            locator = %task.locator,
                            kind = %error.kind,
                            attempt = attempts,
                            delay_ms = delay.as_millis() as u64,
                            "fetch failed, retrying"
                        );
                        if !cancel.sleep(delay) {
                            return cancelled(attempts);
                        }
                        continue;
                    }
                    warn!(
                        locator = %task.locator,
                        kind = %error.kind,
                        message = %error.message,
                        "fetch failed"
                    );
                    return FetchResult::Failed { error, attempts };
                }
            }
        }
    }

    /// One request, staged next to the destination and renamed into place
    /// only after the payload checks out.
    fn attempt(&self, task: &FetchTask, cancel: &CancellationToken) -> Result<u64, FetchError> {
        let dest = self.store.fetch_path(task);
        let mut staged = Store::staging_file(&dest)
            .map_err(|err| FetchError::new(FetchErrorKind::Io, err.to_string()))?;
        let bytes = self
            .transport
            .fetch(&task.locator, staged.as_file_mut(), cancel)?;
        if bytes == 0 {
            return Err(FetchError::new(FetchErrorKind::Payload, "empty payload"));
        }
        let mut header = Vec::with_capacity(8);
        File::open(staged.path())
            .and_then(|file| file.take(8).read_to_end(&mut header))
            .map_err(FetchError::io)?;
        if !looks_like_netcdf(&header) {
            return Err(FetchError::new(
                FetchErrorKind::Payload,
                "payload is not a NetCDF file",
            ));
        }
        Store::persist(staged, &dest)
            .map_err(|err| FetchError::new(FetchErrorKind::Io, err.to_string()))?;
        Ok(bytes)
    }
}

pub fn looks_like_netcdf(header: &[u8]) -> bool {
    NETCDF_MAGIC.iter().any(|magic| header.starts_with(magic))
}

fn cancelled(attempts: u32) -> FetchResult {
    FetchResult::Failed {
        error: FetchError::cancelled(),
        attempts,
    }
}
