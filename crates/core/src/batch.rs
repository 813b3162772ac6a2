//! Batch coordinator
//!
//! Owns the configuration, the item queue, the pack tensors, and the device
//! stream, and drives the two-phase lifecycle:
//!
//! ```text
//! register*  ->  (workers drain probe work)  ->  prefetch: derive plans,
//! allocate outputs, promote to fetch  ->  (workers drain fetch work,
//! last packed-GPU return uploads the pack)  ->  sync  ->  relinquish  ->
//! clear
//! ```
//!
//! All queue state is serialized under one mutex with two condition
//! variables: `work_available` wakes workers, `item_completed` wakes anyone
//! waiting on returns. Collapsing the two would stampede every worker on
//! every return over large batches.

use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use image_ingest_common::{ConfigError, ImageShape, IngestError, Result};

use crate::config::{BatchConfig, Packing, ResizeMode};
use crate::device::{DeviceRuntime, DeviceStream, DeviceTensor};
use crate::item::{Item, OutputSlot};
use crate::plan::{derive_plan, discard_draws};
use crate::queue::QueueCore;
use crate::tensor::{HostTensor, PackTensor};

const POISONED: &str = "batch state mutex poisoned";

/// What `next_item` hands a worker
pub(crate) enum NextItem {
    Work(Box<Item>),
    Quit,
}

/// One relinquished output slot
#[derive(Debug)]
pub enum TensorOutput {
    Host(HostTensor),
    Device { tensor: DeviceTensor, shape: [usize; 4] },
}

impl TensorOutput {
    #[must_use]
    pub fn shape(&self) -> [usize; 4] {
        match self {
            TensorOutput::Host(tensor) => tensor.shape(),
            TensorOutput::Device { shape, .. } => *shape,
        }
    }

    /// Pixel data regardless of residency (the host emulation backs device
    /// tensors with addressable memory)
    #[must_use]
    pub fn pixels(&self) -> &[f32] {
        match self {
            TensorOutput::Host(tensor) => tensor.as_slice(),
            TensorOutput::Device { tensor, .. } => tensor.as_slice(),
        }
    }
}

struct BatchState {
    queue: QueueCore,
    config: BatchConfig,
    rng: StdRng,
    pack: Option<Arc<PackTensor>>,
    device_pack: Option<DeviceTensor>,
    stream: Option<Box<dyn DeviceStream>>,
}

pub(crate) struct Batch {
    state: Mutex<BatchState>,
    work_available: Condvar,
    item_completed: Condvar,
    runtime: Arc<dyn DeviceRuntime>,
}

impl Batch {
    pub(crate) fn new(runtime: Arc<dyn DeviceRuntime>) -> Self {
        Self {
            state: Mutex::new(BatchState {
                queue: QueueCore::new(),
                config: BatchConfig::default(),
                rng: StdRng::from_entropy(),
                pack: None,
                device_pack: None,
                stream: None,
            }),
            work_available: Condvar::new(),
            item_completed: Condvar::new(),
            runtime,
        }
    }

    /// Apply a configuration; only legal between `clear` and `register_item`
    pub(crate) fn set_config(&self, config: BatchConfig) -> std::result::Result<(), ConfigError> {
        let mut st = self.state.lock().expect(POISONED);
        if !st.queue.is_empty() {
            return Err(ConfigError::BatchActive);
        }
        config.validate()?;
        st.rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        st.config = config;
        Ok(())
    }

    pub(crate) fn gpu_enabled(&self) -> bool {
        self.state.lock().expect(POISONED).config.gpu
    }

    /// Append an item in probe state and wake one worker
    pub(crate) fn register_item(&self, name: PathBuf) {
        {
            let mut st = self.state.lock().expect(POISONED);
            st.queue.push(name);
        }
        self.work_available.notify_one();
    }

    /// Block until work or quit
    pub(crate) fn next_item(&self) -> NextItem {
        let mut st = self.state.lock().expect(POISONED);
        loop {
            if st.queue.is_quit() {
                return NextItem::Quit;
            }
            if let Some(item) = st.queue.next() {
                return NextItem::Work(item);
            }
            st = self.work_available.wait(st).expect(POISONED);
        }
    }

    /// Return an item from a worker.
    ///
    /// The last return of a packed GPU fetch phase enqueues the whole-pack
    /// upload on the batch stream; a failed enqueue lands on the returning
    /// item.
    pub(crate) fn finish_item(&self, mut item: Box<Item>) {
        {
            let mut st = self.state.lock().expect(POISONED);
            if st.queue.returning_last_fetch()
                && st.config.packing == Packing::Packed
                && st.config.gpu
            {
                let state = &mut *st;
                if let (Some(pack), Some(device_pack), Some(stream)) = (
                    state.pack.as_ref(),
                    state.device_pack.as_mut(),
                    state.stream.as_ref(),
                ) {
                    // Safety: this is the final fetch return; every slab
                    // write has completed.
                    let host = unsafe { pack.as_slice() };
                    if let Err(err) = stream.copy_to_device(host, device_pack) {
                        item.record_error(err.into());
                    }
                }
            }
            st.queue.finish(item);
        }
        self.item_completed.notify_all();
    }

    /// Enqueue the host-to-device copy for one individually packed item
    pub(crate) fn upload_item(&self, item: &mut Item) {
        let st = self.state.lock().expect(POISONED);
        let Some(stream) = st.stream.as_ref() else {
            item.record_error(IngestError::Other(
                "device upload requested without a stream".to_string(),
            ));
            return;
        };
        let (Some(output), Some(device)) = (item.output.as_mut(), item.device.as_mut()) else {
            return;
        };
        if let Err(err) = stream.copy_to_device(output.as_mut_slice(), device) {
            item.record_error(err.into());
        }
    }

    /// Collect probe results, build plans and output buffers, and promote
    /// every item to the fetch phase
    pub(crate) fn prefetch(&self) -> Result<()> {
        let mut st = self.state.lock().expect(POISONED);
        while !st.queue.all_returned() {
            st = self.item_completed.wait(st).expect(POISONED);
        }

        let BatchState {
            queue,
            config,
            rng,
            pack,
            device_pack,
            stream,
        } = &mut *st;

        // Packed mode: one (H, W, 3, N) tensor for the whole batch.
        if config.packing == Packing::Packed {
            let ResizeMode::Fixed { height, width } = config.resize else {
                // Guarded by validation; packed always rides a fixed resize.
                return Err(ConfigError::PackedNeedsFixedResize.into());
            };
            let shared = Arc::new(PackTensor::zeros(
                height as usize,
                width as usize,
                3,
                queue.len(),
            ));
            if config.gpu {
                *device_pack = Some(self.runtime.alloc(shared.total_len())?);
            }
            *pack = Some(shared);
        }

        if config.gpu && stream.is_none() {
            *stream = Some(self.runtime.new_stream()?);
        }

        // Plans and per-item buffers. Every item consumes its draw block in
        // index order, failed probes included, so the randomness of later
        // items never depends on which earlier files happened to fail.
        // Errored items keep no plan or buffers and are skipped by workers
        // during fetch.
        for item in queue.items_mut() {
            let Some(shape) = item.shape else {
                discard_draws(rng);
                if item.error.is_none() {
                    item.record_error(IngestError::Other(
                        "probe finished without a shape".to_string(),
                    ));
                }
                continue;
            };
            let plan = derive_plan(shape, config, rng);
            if item.error.is_some() {
                continue;
            }
            match config.packing {
                Packing::Individual => {
                    let out_shape = ImageShape::new(plan.out_h, plan.out_w, plan.out_c);
                    item.output = Some(OutputSlot::Owned(HostTensor::zeros(out_shape, 1)));
                    if config.gpu {
                        item.device = Some(self.runtime.alloc(out_shape.num_elements())?);
                    }
                }
                Packing::Packed => {
                    item.output = Some(OutputSlot::Pack {
                        pack: Arc::clone(pack.as_ref().expect("pack allocated above")),
                        index: item.index,
                    });
                }
            }
            item.plan = Some(plan);
        }

        queue.begin_fetch();
        debug!("promoted {} items to fetch", queue.len());
        drop(st);
        self.work_available.notify_all();
        Ok(())
    }

    /// Block until every item of the current phase has returned; in GPU mode
    /// also drain the stream
    pub(crate) fn sync(&self) -> Result<()> {
        let mut st = self.state.lock().expect(POISONED);
        while !st.queue.all_returned() {
            st = self.item_completed.wait(st).expect(POISONED);
        }
        if st.config.gpu {
            if let Some(stream) = st.stream.as_ref() {
                stream.synchronize()?;
            }
        }
        Ok(())
    }

    /// Transfer ownership of the outputs to the caller.
    ///
    /// Packed mode yields one slot; individual mode yields one slot per
    /// item, `None` where the item failed. Warnings carry every per-item
    /// error.
    pub(crate) fn relinquish(&self) -> Result<(Vec<Option<TensorOutput>>, Vec<String>)> {
        let mut st = self.state.lock().expect(POISONED);
        let packed = st.config.packing == Packing::Packed;
        let gpu = st.config.gpu;

        let mut warnings = Vec::new();
        for item in st.queue.items_mut() {
            if let Some(line) = item.warning_line() {
                warnings.push(line);
            }
        }

        if packed {
            // Per-item slots alias the pack; release them before unwrapping.
            for item in st.queue.items_mut() {
                item.output = None;
            }
            let pack = st
                .pack
                .take()
                .ok_or_else(|| IngestError::Other("packed batch has no pack tensor".to_string()))?;
            let pack = Arc::try_unwrap(pack)
                .map_err(|_| IngestError::Other("pack tensor still referenced".to_string()))?;
            let host = pack.into_host();
            let shape = host.shape();
            let output = if gpu {
                let tensor = st.device_pack.take().ok_or_else(|| {
                    IngestError::Other("packed GPU batch has no device tensor".to_string())
                })?;
                TensorOutput::Device { tensor, shape }
            } else {
                TensorOutput::Host(host)
            };
            return Ok((vec![Some(output)], warnings));
        }

        let mut outputs = Vec::with_capacity(st.queue.len());
        for item in st.queue.items_mut() {
            if item.error.is_some() {
                item.output = None;
                item.device = None;
                outputs.push(None);
                continue;
            }
            let slot = match (gpu, item.device.take(), item.output.take()) {
                (true, Some(tensor), Some(OutputSlot::Owned(host))) => Some(TensorOutput::Device {
                    tensor,
                    shape: host.shape(),
                }),
                (false, _, Some(OutputSlot::Owned(host))) => Some(TensorOutput::Host(host)),
                _ => None,
            };
            outputs.push(slot);
        }
        Ok((outputs, warnings))
    }

    /// Stop handouts, drain borrowed items, and drop the batch contents
    pub(crate) fn clear(&self) {
        let mut st = self.state.lock().expect(POISONED);
        st.queue.stop_handouts();
        while st.queue.borrowed() > 0 {
            st = self.item_completed.wait(st).expect(POISONED);
        }
        st.queue.reset();
        st.pack = None;
        st.device_pack = None;
    }

    /// `clear` plus quit: lets every worker observe shutdown and exit
    pub(crate) fn finalize(&self) {
        self.clear();
        {
            let mut st = self.state.lock().expect(POISONED);
            st.queue.set_quit();
        }
        self.work_available.notify_all();
        self.item_completed.notify_all();
    }
}
