//! Batched image-ingest pipeline
//!
//! Turns a list of file paths into decoded, resized, cropped, and
//! color-augmented float tensors, optionally mirrored into device memory.
//! Decode and augmentation latency hides behind the caller's consuming step:
//! a `prefetch`-style invocation kicks off shape probing and pixel work on a
//! persistent worker pool, and a later invocation with the same filenames
//! collects the finished batch.
//!
//! # Architecture
//!
//! ```text
//! [Dispatcher] -> register + prefetch -> [Worker pool] -- probe phase
//!                     |                        |
//!                 plans + buffers          fetch phase: decode, resize,
//!                     |                    crop/flip, color augment,
//!                 sync + relinquish  <--   device upload
//! ```
//!
//! Workers coordinate through one mutex and two condition variables
//! (work-available, item-completed); per-item failures are recorded on the
//! item and surfaced as warnings, never across threads.

pub mod config;
pub mod device;
pub mod plan;
pub mod reader;
pub mod service;
pub mod tensor;

mod batch;
mod item;
mod kernels;
mod queue;
mod scratch;
mod worker;

pub use batch::TensorOutput;
pub use config::{brightness_matrix, BatchConfig, CropLocation, Packing, ResizeMode};
pub use device::{DeviceCounters, DeviceRuntime, DeviceStream, DeviceTensor, HostEmulatedDevice};
pub use reader::{ImageReader, StdImageReader};
pub use service::{BatchResult, IngestRequest, IngestService, ReaderFactory};
pub use tensor::HostTensor;

pub use image_ingest_common::{ImageShape, IngestError};
