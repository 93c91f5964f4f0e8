use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{DEFAULT_MAX_CONCURRENT_CONVERSIONS, DEFAULT_POLL_INTERVAL_MS, ResolvedConfig};
use crate::domain::{ConversionStatus, MarkerSets};
use crate::error::KiraError;
use crate::store::{RemoteStore, StoreBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionOptions {
    pub poll_interval: Duration,
    /// Total polling budget per job; `None` polls until a terminal status.
    pub timeout: Option<Duration>,
    pub max_concurrent: usize,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            timeout: None,
            max_concurrent: DEFAULT_MAX_CONCURRENT_CONVERSIONS,
        }
    }
}

impl From<&ResolvedConfig> for ConversionOptions {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            timeout: config.poll_timeout,
            max_concurrent: config.max_concurrent_conversions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConvertedDataset {
    pub path: String,
    pub markers: MarkerSets,
}

pub struct Converter<'a, B: StoreBackend> {
    store: &'a RemoteStore<B>,
    options: ConversionOptions,
}

impl<'a, B: StoreBackend> Converter<'a, B> {
    pub fn new(store: &'a RemoteStore<B>, options: ConversionOptions) -> Self {
        Self { store, options }
    }

    /// Submits `path` for conversion and blocks until the job is terminal.
    pub fn convert(&self, path: &str) -> Result<String, KiraError> {
        let started = Instant::now();
        let response = self.store.submit_conversion(path)?;
        let mut status = response.status;
        info!(path, %status, "conversion submitted");

        while status == ConversionStatus::Pending {
            let wait = match self.options.timeout {
                Some(budget) => {
                    let elapsed = started.elapsed();
                    if elapsed >= budget {
                        return Err(KiraError::ConversionTimeout {
                            path: path.to_string(),
                            elapsed_secs: elapsed.as_secs(),
                        });
                    }
                    self.options.poll_interval.min(budget - elapsed)
                }
                None => self.options.poll_interval,
            };
            self.store.cancel_token().wait(wait)?;

            let status_path = response.status_path.as_deref().unwrap_or_default();
            let text = self.store.fetch_text(status_path).map_err(|err| match err {
                KiraError::Cancelled => KiraError::Cancelled,
                other => KiraError::Conversion {
                    path: path.to_string(),
                    reason: format!("failed to poll for completion: {other}"),
                },
            })?;
            status = text.parse().map_err(|_| KiraError::Conversion {
                path: path.to_string(),
                reason: format!("unexpected status '{}'", text.trim_end()),
            })?;
            debug!(path, %status, "conversion polled");
        }

        if status == ConversionStatus::Failure {
            return Err(KiraError::Conversion {
                path: path.to_string(),
                reason: "backend reported FAILURE".to_string(),
            });
        }

        let data_path = response
            .data_path
            .ok_or_else(|| KiraError::invalid_payload(path, "conversion response without data_path"))?;
        info!(path, data_path = %data_path, elapsed_ms = started.elapsed().as_millis() as u64, "conversion finished");
        Ok(data_path)
    }

    /// Converts every path concurrently, at most `max_concurrent` at a time,
    /// returning data paths in input order.
    pub fn convert_many(&self, paths: &[String]) -> Result<Vec<String>, KiraError> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let workers = self.options.max_concurrent.max(1).min(paths.len());
        let next = AtomicUsize::new(0);
        let results: Mutex<Vec<Option<Result<String, KiraError>>>> =
            Mutex::new((0..paths.len()).map(|_| None).collect());

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        if index >= paths.len() {
                            break;
                        }
                        let outcome = self.convert(&paths[index]);
                        let failed = outcome.is_err();
                        if let Ok(mut slots) = results.lock() {
                            slots[index] = Some(outcome);
                        }
                        if failed {
                            // remaining jobs are pointless once one has failed
                            next.store(paths.len(), Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        let slots = results
            .into_inner()
            .map_err(|_| KiraError::Conversion {
                path: paths[0].clone(),
                reason: "conversion worker panicked".to_string(),
            })?;

        let mut converted = Vec::with_capacity(paths.len());
        let mut first_error = None;
        for (path, slot) in paths.iter().zip(slots) {
            match slot {
                Some(Ok(data_path)) => converted.push(data_path),
                Some(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                None => {
                    first_error.get_or_insert(KiraError::Conversion {
                        path: path.clone(),
                        reason: "skipped after an earlier failure".to_string(),
                    });
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(converted),
        }
    }

    /// Converts a dataset together with all of its marker candidates.
    pub fn convert_all(
        &self,
        dataset_path: &str,
        markers: &MarkerSets,
    ) -> Result<ConvertedDataset, KiraError> {
        let mut paths = vec![dataset_path.to_string()];
        paths.extend(markers.values().flatten().cloned());

        let mut resolved = self.convert_many(&paths)?.into_iter();
        let path = resolved
            .next()
            .ok_or_else(|| KiraError::invalid_payload(dataset_path, "no conversion result"))?;

        let mut converted = MarkerSets::new();
        for (kind, candidates) in markers {
            let current = resolved.by_ref().take(candidates.len()).collect();
            converted.insert(kind.clone(), current);
        }

        Ok(ConvertedDataset {
            path,
            markers: converted,
        })
    }
}
