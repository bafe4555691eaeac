//! Bounded worker pool draining a shared upload queue.

use futures::future::join_all;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info};

use photopush_common::Error;
use photopush_storage::FileMetadata;

use crate::retry::{RetryConfig, RetryError, RetryExecutor};
use crate::upload::{UploadJob, Uploader};

/// Default number of concurrent uploads.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Outcome of one upload pass.
#[derive(Debug, Default)]
pub struct UploadReport {
    /// Jobs handed to the scheduler.
    pub scheduled: usize,
    pub succeeded: Vec<FileMetadata>,
    /// One [`Error::UploadFailed`] per file that did not make it.
    pub failed: Vec<Error>,
    pub duration: Duration,
}

impl UploadReport {
    /// Every scheduled file was uploaded (vacuously true for no files).
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.succeeded.len() == self.scheduled
    }

    /// Jobs that never reported an outcome.
    pub fn lost(&self) -> usize {
        self.scheduled
            .saturating_sub(self.succeeded.len() + self.failed.len())
    }
}

type Queue = Arc<Mutex<VecDeque<UploadJob>>>;
type Outcome = std::result::Result<FileMetadata, Error>;

/// Runs uploads on a fixed number of tokio tasks.
pub struct UploadScheduler {
    uploader: Uploader,
    retry: RetryExecutor,
    concurrency: usize,
}

impl UploadScheduler {
    pub fn new(uploader: Uploader, retry_config: RetryConfig, concurrency: usize) -> Self {
        Self {
            uploader,
            retry: RetryExecutor::new(retry_config),
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Upload every job and wait for all of them to finish.
    ///
    /// A failing file never stops the others; its failure is recorded in
    /// the report.
    pub async fn run(&self, jobs: Vec<UploadJob>) -> UploadReport {
        let start = Instant::now();
        let scheduled = jobs.len();
        let queue: Queue = Arc::new(Mutex::new(VecDeque::from(jobs)));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let workers = self.concurrency.min(scheduled.max(1));
        info!("Uploading {} files with {} workers", scheduled, workers);

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                tokio::spawn(Self::worker(
                    worker,
                    queue.clone(),
                    self.uploader.clone(),
                    self.retry.clone(),
                    tx.clone(),
                ))
            })
            .collect();
        drop(tx);

        for (worker, result) in join_all(handles).await.into_iter().enumerate() {
            if let Err(e) = result {
                error!(worker, "Upload worker aborted: {}", e);
            }
        }

        let mut report = UploadReport {
            scheduled,
            ..UploadReport::default()
        };
        while let Some(outcome) = rx.recv().await {
            match outcome {
                Ok(meta) => report.succeeded.push(meta),
                Err(err) => report.failed.push(err),
            }
        }
        report.duration = start.elapsed();

        if report.is_success() {
            info!(
                "Uploaded {} files in {:?}",
                report.succeeded.len(),
                report.duration
            );
        } else {
            error!(
                "Upload pass incomplete: {} succeeded, {} failed, {} lost",
                report.succeeded.len(),
                report.failed.len(),
                report.lost()
            );
        }
        report
    }

    async fn worker(
        worker: usize,
        queue: Queue,
        uploader: Uploader,
        retry: RetryExecutor,
        tx: mpsc::UnboundedSender<Outcome>,
    ) {
        loop {
            let (job, remaining) = {
                let mut queue = queue.lock().unwrap_or_else(PoisonError::into_inner);
                match queue.pop_front() {
                    Some(job) => (job, queue.len()),
                    None => break,
                }
            };

            info!(
                worker,
                remaining,
                "Uploading {} ({} bytes) to {}",
                job.local.relative,
                job.local.size,
                job.destination
            );

            let outcome = match retry.execute(|| uploader.upload(&job)).await {
                Ok(meta) => Ok(meta),
                Err(RetryError { attempts, error }) => {
                    error!(worker, "Failed to upload {}: {}", job.local.path.display(), error);
                    Err(Error::UploadFailed {
                        path: job.local.path.display().to_string(),
                        attempts,
                        reason: error.to_string(),
                    })
                }
            };

            if tx.send(outcome).is_err() {
                break;
            }
        }
    }
}
