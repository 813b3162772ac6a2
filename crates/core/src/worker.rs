//! Worker task
//!
//! A long-lived thread that pulls items from the batch queue and runs the
//! work matching the item's phase: probe reads the image header, fetch runs
//! decode -> resize -> crop/flip -> color augment -> optional device upload.
//! Workers never panic across the pool boundary; failures land on the item.

use std::sync::Arc;

use tracing::{debug, trace};

use image_ingest_common::{ImageShape, IngestError, ReadError};

use crate::batch::{Batch, NextItem};
use crate::device::DeviceRuntime;
use crate::item::{Item, ItemState};
use crate::kernels::{apply_color_augment, resample_columns};
use crate::reader::ImageReader;
use crate::scratch::ScratchPool;

pub(crate) fn run(
    batch: Arc<Batch>,
    mut reader: Box<dyn ImageReader>,
    runtime: Arc<dyn DeviceRuntime>,
) {
    let mut scratch = ScratchPool::new();
    loop {
        match batch.next_item() {
            NextItem::Quit => break,
            NextItem::Work(mut item) => {
                if item.error.is_none() {
                    process(&batch, &runtime, reader.as_mut(), &mut scratch, &mut item);
                }
                batch.finish_item(item);
            }
        }
    }
    debug!("worker exiting");
}

fn process(
    batch: &Batch,
    runtime: &Arc<dyn DeviceRuntime>,
    reader: &mut dyn ImageReader,
    scratch: &mut ScratchPool,
    item: &mut Item,
) {
    if batch.gpu_enabled() {
        if let Err(err) = runtime.adopt_current_thread() {
            item.record_error(err.into());
            return;
        }
    }
    match item.state {
        ItemState::Probe => probe(reader, item),
        ItemState::Fetch => fetch(batch, reader, scratch, item),
        ItemState::Ready => {}
    }
}

fn probe(reader: &mut dyn ImageReader, item: &mut Item) {
    match reader.probe(&item.name) {
        Ok(shape) => {
            trace!("probed {} as {shape}", item.name.display());
            item.shape = Some(shape);
        }
        Err(err) => item.record_error(err.into()),
    }
}

fn fetch(batch: &Batch, reader: &mut dyn ImageReader, scratch: &mut ScratchPool, item: &mut Item) {
    let (Some(shape), Some(plan)) = (item.shape, item.plan.clone()) else {
        item.record_error(IngestError::Other(
            "item reached fetch without a transform plan".to_string(),
        ));
        return;
    };
    let ImageShape {
        height: in_h,
        width: in_w,
        channels,
    } = shape;

    let (decoded, vertical) = scratch.pair(shape.num_elements(), in_w * plan.out_h * channels);

    let found = match reader.decode(&item.name, decoded) {
        Ok(found) => found,
        Err(err) => {
            item.record_error(err.into());
            return;
        }
    };
    if found != shape {
        item.record_error(
            ReadError::ShapeChanged(format!(
                "{}: probed {shape}, decoded {found}",
                item.name.display()
            ))
            .into(),
        );
        return;
    }

    // Pass 1 resamples rows within the crop slab; pass 2 resamples columns,
    // restores orientation, and applies the horizontal flip.
    resample_columns(
        vertical,
        decoded,
        plan.out_h,
        in_h,
        in_w,
        channels,
        plan.crop_h,
        plan.crop_y,
        false,
    );
    let Some(output) = item.output.as_mut() else {
        item.record_error(IngestError::Other(
            "item reached fetch without an output buffer".to_string(),
        ));
        return;
    };
    let pixels = output.as_mut_slice();
    resample_columns(
        pixels,
        vertical,
        plan.out_w,
        in_w,
        plan.out_h,
        channels,
        plan.crop_w,
        plan.crop_x,
        plan.flip,
    );
    apply_color_augment(
        pixels,
        plan.out_h * plan.out_w,
        plan.out_c,
        channels,
        plan.subtract_average,
        plan.brightness_shift,
        plan.contrast_shift,
        plan.saturation_shift,
    );

    if item.device.is_some() {
        batch.upload_item(item);
    }
}
