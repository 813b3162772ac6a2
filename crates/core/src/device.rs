//! Device transfer seam
//!
//! GPU stream primitives are external collaborators, expressed as traits so
//! the pipeline never links a vendor runtime directly. The crate ships a
//! host-memory emulation used whenever device output is requested; a CUDA or
//! HIP backend plugs in behind the same two traits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image_ingest_common::DeviceError;

/// Device-resident tensor handle.
///
/// The host emulation backs this with ordinary memory, which also gives
/// tests direct access to transferred pixels.
#[derive(Debug)]
pub struct DeviceTensor {
    data: Box<[f32]>,
}

impl DeviceTensor {
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Device runtime: allocation, stream creation, thread-device binding
pub trait DeviceRuntime: Send + Sync {
    /// Whether a real accelerator backs this runtime
    fn is_available(&self) -> bool;

    fn name(&self) -> &str;

    /// Bind the calling thread to the runtime's device; idempotent
    fn adopt_current_thread(&self) -> Result<(), DeviceError>;

    fn alloc(&self, len: usize) -> Result<DeviceTensor, DeviceError>;

    /// Create an asynchronous command stream (non-blocking with respect to
    /// the default stream on real backends)
    fn new_stream(&self) -> Result<Box<dyn DeviceStream>, DeviceError>;
}

/// Asynchronous device command stream
pub trait DeviceStream: Send + Sync {
    /// Enqueue a host-to-device copy; completion is only guaranteed after
    /// `synchronize`
    fn copy_to_device(&self, src: &[f32], dst: &mut DeviceTensor) -> Result<(), DeviceError>;

    /// Block until every enqueued operation has drained
    fn synchronize(&self) -> Result<(), DeviceError>;
}

/// Operation counters shared between a runtime and its streams
#[derive(Debug, Default)]
pub struct DeviceCounters {
    copies: AtomicUsize,
    syncs: AtomicUsize,
}

impl DeviceCounters {
    #[must_use]
    pub fn copies(&self) -> usize {
        self.copies.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn syncs(&self) -> usize {
        self.syncs.load(Ordering::Relaxed)
    }
}

/// Host-memory device emulation.
///
/// Copies land immediately, so stream ordering holds trivially; the counters
/// let callers observe that the transfer protocol ran.
#[derive(Debug, Default)]
pub struct HostEmulatedDevice {
    counters: Arc<DeviceCounters>,
}

impl HostEmulatedDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn counters(&self) -> Arc<DeviceCounters> {
        Arc::clone(&self.counters)
    }
}

impl DeviceRuntime for HostEmulatedDevice {
    fn is_available(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "host (emulated)"
    }

    fn adopt_current_thread(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn alloc(&self, len: usize) -> Result<DeviceTensor, DeviceError> {
        Ok(DeviceTensor {
            data: vec![0.0; len].into_boxed_slice(),
        })
    }

    fn new_stream(&self) -> Result<Box<dyn DeviceStream>, DeviceError> {
        Ok(Box::new(HostEmulatedStream {
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct HostEmulatedStream {
    counters: Arc<DeviceCounters>,
}

impl DeviceStream for HostEmulatedStream {
    fn copy_to_device(&self, src: &[f32], dst: &mut DeviceTensor) -> Result<(), DeviceError> {
        if src.len() != dst.data.len() {
            return Err(DeviceError::CopyFailed(format!(
                "size mismatch: host {} vs device {}",
                src.len(),
                dst.data.len()
            )));
        }
        dst.data.copy_from_slice(src);
        self.counters.copies.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn synchronize(&self) -> Result<(), DeviceError> {
        self.counters.syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
