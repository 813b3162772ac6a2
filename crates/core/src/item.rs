//! Per-image batch items
//!
//! One item tracks one filename through the probe -> fetch -> ready state
//! machine. State, borrow, and error fields only change under the batch
//! mutex; shape, plan, and output buffers are written outside it, but only
//! by the single worker that currently owns the item (or by the coordinator
//! between phases, when no worker owns anything).

use std::path::PathBuf;
use std::sync::Arc;

use image_ingest_common::{ImageShape, IngestError};

use crate::device::DeviceTensor;
use crate::plan::TransformPlan;
use crate::tensor::{HostTensor, PackTensor};

/// Longest error text carried per item
const MAX_ERROR_BYTES: usize = 512;

/// Item phase progression; never regresses within one prefetch cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemState {
    Probe,
    Fetch,
    Ready,
}

/// Where a fetch writes its pixels
pub(crate) enum OutputSlot {
    /// Individually packed item with its own tensor
    Owned(HostTensor),
    /// Slab `index` of the shared batch pack
    Pack {
        pack: Arc<PackTensor>,
        index: usize,
    },
}

impl OutputSlot {
    pub(crate) fn as_mut_slice(&mut self) -> &mut [f32] {
        match self {
            OutputSlot::Owned(tensor) => tensor.slab_mut(0),
            OutputSlot::Pack { pack, index } => {
                // Safety: the queue hands each item index to exactly one
                // worker at a time, so this slab has no other live reference.
                unsafe { pack.slab_mut(*index) }
            }
        }
    }
}

pub(crate) struct Item {
    pub(crate) name: PathBuf,
    pub(crate) index: usize,
    pub(crate) state: ItemState,
    pub(crate) shape: Option<ImageShape>,
    pub(crate) plan: Option<TransformPlan>,
    pub(crate) output: Option<OutputSlot>,
    pub(crate) device: Option<DeviceTensor>,
    pub(crate) error: Option<IngestError>,
}

impl Item {
    pub(crate) fn new(name: PathBuf, index: usize) -> Self {
        Self {
            name,
            index,
            state: ItemState::Probe,
            shape: None,
            plan: None,
            output: None,
            device: None,
            error: None,
        }
    }

    /// Record a failure; the first error wins and later stages skip the item
    pub(crate) fn record_error(&mut self, error: IngestError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Warning text for the dispatcher, capped at the per-item message limit
    pub(crate) fn warning_line(&self) -> Option<String> {
        self.error.as_ref().map(|err| {
            let mut message = err.to_string();
            if message.len() > MAX_ERROR_BYTES {
                let mut end = MAX_ERROR_BYTES;
                while !message.is_char_boundary(end) {
                    end -= 1;
                }
                message.truncate(end);
            }
            format!("{}: {message}", self.name.display())
        })
    }
}
