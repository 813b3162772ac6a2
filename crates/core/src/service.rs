//! Process-scoped ingest service
//!
//! The dispatcher owns a persistent worker pool and one pending batch, so
//! repeated calls amortize thread creation and a prefetch kicked off by one
//! call can be collected by the next. Dropping the service finalizes the
//! batch and joins every worker, which is the process-exit hook.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, warn};

use image_ingest_common::{IngestError, Result};

use crate::batch::{Batch, TensorOutput};
use crate::config::BatchConfig;
use crate::device::{DeviceRuntime, HostEmulatedDevice};
use crate::reader::{ImageReader, StdImageReader};
use crate::worker;

/// Produces one private reader per worker thread
pub type ReaderFactory = Arc<dyn Fn() -> Box<dyn ImageReader> + Send + Sync>;

/// One ingest invocation: a configuration record plus the filename list
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub config: BatchConfig,
    /// Kick off probe and fetch work, then return without waiting
    pub prefetch_only: bool,
    pub filenames: Vec<PathBuf>,
}

impl IngestRequest {
    #[must_use]
    pub fn new(config: BatchConfig, filenames: Vec<PathBuf>) -> Self {
        Self {
            config,
            prefetch_only: false,
            filenames,
        }
    }
}

/// Result of one ingest invocation
#[derive(Debug)]
pub struct BatchResult {
    /// True when the batch produced one shared (H, W, 3, N) tensor
    pub packed: bool,
    /// True when the call only started background work
    pub prefetched: bool,
    /// Packed mode: exactly one slot. Individual mode: one slot per file,
    /// `None` where the file failed.
    pub outputs: Vec<Option<TensorOutput>>,
    /// One line per failed file
    pub warnings: Vec<String>,
}

struct PendingBatch {
    filenames: Vec<PathBuf>,
    config: BatchConfig,
}

pub struct IngestService {
    batch: Arc<Batch>,
    workers: Vec<thread::JoinHandle<()>>,
    reader_factory: ReaderFactory,
    runtime: Arc<dyn DeviceRuntime>,
    pool_size: usize,
    pending: Option<PendingBatch>,
}

impl IngestService {
    /// Service with the standard reader and the host device emulation
    #[must_use]
    pub fn new() -> Self {
        Self::with_parts(
            Arc::new(|| Box::new(StdImageReader::new()) as Box<dyn ImageReader>),
            Arc::new(HostEmulatedDevice::new()),
        )
    }

    /// Seam for tests and embedders: inject the reader and device backends
    #[must_use]
    pub fn with_parts(reader_factory: ReaderFactory, runtime: Arc<dyn DeviceRuntime>) -> Self {
        Self {
            batch: Arc::new(Batch::new(Arc::clone(&runtime))),
            workers: Vec::new(),
            reader_factory,
            runtime,
            pool_size: 0,
            pending: None,
        }
    }

    /// Run one invocation: reconcile the filename list with any pending
    /// batch, prefetch, and unless asked otherwise collect the results
    pub fn run(&mut self, request: IngestRequest) -> Result<BatchResult> {
        request.config.validate().map_err(IngestError::Config)?;
        let threads = request.config.effective_threads();
        self.ensure_pool(threads)?;

        let reuse = self.pending.as_ref().is_some_and(|pending| {
            pending.filenames == request.filenames && pending.config == request.config
        });

        if reuse {
            debug!("reusing pending prefetch for {} files", request.filenames.len());
        } else {
            self.batch.clear();
            self.pending = None;
            self.batch
                .set_config(request.config.clone())
                .map_err(IngestError::Config)?;
            for name in &request.filenames {
                self.batch.register_item(name.clone());
            }
            self.batch.prefetch()?;
            self.pending = Some(PendingBatch {
                filenames: request.filenames.clone(),
                config: request.config.clone(),
            });
            info!("prefetching {} files", request.filenames.len());
        }

        if request.prefetch_only {
            return Ok(BatchResult {
                packed: false,
                prefetched: true,
                outputs: Vec::new(),
                warnings: Vec::new(),
            });
        }

        self.batch.sync()?;
        let (outputs, warnings) = self.batch.relinquish()?;
        for line in &warnings {
            warn!("{line}");
        }
        self.batch.clear();
        self.pending = None;

        Ok(BatchResult {
            packed: request.config.packing == crate::config::Packing::Packed,
            prefetched: false,
            outputs,
            warnings,
        })
    }

    /// Rebuild the worker pool when the requested size changes
    fn ensure_pool(&mut self, size: usize) -> Result<()> {
        if size == self.pool_size && !self.workers.is_empty() {
            return Ok(());
        }
        self.shutdown();
        self.batch = Arc::new(Batch::new(Arc::clone(&self.runtime)));
        self.pending = None;

        for id in 0..size {
            let batch = Arc::clone(&self.batch);
            let runtime = Arc::clone(&self.runtime);
            let reader = (self.reader_factory)();
            let handle = match thread::Builder::new()
                .name(format!("ingest-worker-{id}"))
                .spawn(move || worker::run(batch, reader, runtime))
            {
                Ok(handle) => handle,
                Err(e) => {
                    // Partial pools are torn down again; a half-built pool
                    // must never serve a batch.
                    self.shutdown();
                    return Err(IngestError::WorkerPool(format!(
                        "failed to spawn worker: {e}"
                    )));
                }
            };
            self.workers.push(handle);
        }
        self.pool_size = size;
        debug!("worker pool rebuilt with {size} threads");
        Ok(())
    }

    /// Finalize the current batch and join every worker
    fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.batch.finalize();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        self.pool_size = 0;
    }
}

impl Default for IngestService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IngestService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
