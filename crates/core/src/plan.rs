//! Per-item transform plans
//!
//! A plan fixes everything a fetch needs before any pixel work starts: output
//! dimensions, the crop rectangle, the flip bit, and the color-augmentation
//! parameters. Plans are derived in item order from one per-batch RNG, and
//! every item consumes the same fixed-shape draw sequence whether or not an
//! option is enabled — items whose probe failed discard theirs — so
//! per-item randomness is a pure function of the batch seed and the item
//! index.

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

use image_ingest_common::ImageShape;

use crate::config::{BatchConfig, CropLocation, Packing, ResizeMode};

/// Precomputed transform for one image in one batch
#[derive(Debug, Clone, PartialEq)]
pub struct TransformPlan {
    pub out_h: usize,
    pub out_w: usize,
    pub out_c: usize,
    pub crop_h: usize,
    pub crop_w: usize,
    pub crop_x: usize,
    pub crop_y: usize,
    pub flip: bool,
    pub brightness_shift: [f32; 3],
    pub contrast_shift: f32,
    pub saturation_shift: f32,
    /// Channel averages copied from the batch config so fetch work touches no
    /// shared state
    pub subtract_average: [f32; 3],
}

/// Fixed-order draw block consumed once per item
struct Draws {
    anisotropy: f64,
    size: f64,
    place_x: f64,
    place_y: f64,
    flip: bool,
    saturation: f64,
    contrast: f64,
    normals: [f64; 3],
}

impl Draws {
    fn take(rng: &mut StdRng) -> Self {
        Self {
            anisotropy: rng.gen_range(0.0..=1.0),
            size: rng.gen_range(0.0..=1.0),
            place_x: rng.gen_range(0.0..=1.0),
            place_y: rng.gen_range(0.0..=1.0),
            flip: rng.gen_range(0..2u32) == 1,
            saturation: rng.gen_range(-1.0..=1.0),
            contrast: rng.gen_range(-1.0..=1.0),
            normals: [
                rng.sample(StandardNormal),
                rng.sample(StandardNormal),
                rng.sample(StandardNormal),
            ],
        }
    }
}

/// Consume one item's draw block without producing a plan, so an item that
/// never probed a shape still keeps later items' draws in place
pub(crate) fn discard_draws(rng: &mut StdRng) {
    let _ = Draws::take(rng);
}

/// Derive the transform plan for one probed image
pub(crate) fn derive_plan(
    shape: ImageShape,
    config: &BatchConfig,
    rng: &mut StdRng,
) -> TransformPlan {
    let draws = Draws::take(rng);

    let in_h = shape.height as f64;
    let in_w = shape.width as f64;

    let (out_h, out_w) = output_dims(shape, config.resize);

    // Crop aspect = anisotropy x output aspect; both bounds zero stretches
    // the crop to the input aspect, which with a full-size crop covers the
    // whole image.
    let (a_min, a_max) = (
        f64::from(config.crop_anisotropy.0),
        f64::from(config.crop_anisotropy.1),
    );
    let anisotropy = if a_min == 0.0 && a_max == 0.0 {
        (in_w / in_h) / (out_w as f64 / out_h as f64)
    } else {
        a_min + (a_max - a_min) * draws.anisotropy
    };
    let stretch = anisotropy.sqrt();
    let crop_w0 = out_w as f64 * stretch;
    let crop_h0 = out_h as f64 / stretch;

    // Scale the crop to fit the input, then apply the sampled relative size.
    let fit = (in_w / crop_w0).min(in_h / crop_h0);
    let (s_min, s_max) = (f64::from(config.crop_size.0), f64::from(config.crop_size.1));
    let size = s_min + (s_max - s_min) * draws.size;
    let crop_w = clamp_dim(crop_w0 * fit * size, shape.width);
    let crop_h = clamp_dim(crop_h0 * fit * size, shape.height);

    let dx = shape.width - crop_w;
    let dy = shape.height - crop_h;
    let (crop_x, crop_y) = match config.crop_location {
        CropLocation::Center => ((dx + 1) / 2, (dy + 1) / 2),
        CropLocation::Random => (place(draws.place_x, dx), place(draws.place_y, dy)),
    };

    let flip = config.flip && draws.flip;
    let saturation_shift = 1.0 + f64::from(config.saturation) * draws.saturation;
    let contrast_shift = 1.0 + f64::from(config.contrast) * draws.contrast;

    // Each component scales by its own normal draw; the column sum of B is
    // the per-channel magnitude.
    let mut brightness_shift = [0.0f32; 3];
    for i in 0..3 {
        let mut acc = 0.0f64;
        for j in 0..3 {
            acc += f64::from(config.brightness[i + 3 * j]) * draws.normals[i];
        }
        brightness_shift[i] = acc as f32;
    }

    let out_c = match config.packing {
        Packing::Individual => shape.channels,
        Packing::Packed => 3,
    };

    TransformPlan {
        out_h,
        out_w,
        out_c,
        crop_h,
        crop_w,
        crop_x,
        crop_y,
        flip,
        brightness_shift,
        contrast_shift: contrast_shift as f32,
        saturation_shift: saturation_shift as f32,
        subtract_average: config.subtract_average,
    }
}

/// Output dimensions for a probed shape under the configured resize mode
pub(crate) fn output_dims(shape: ImageShape, resize: ResizeMode) -> (usize, usize) {
    match resize {
        ResizeMode::None => (shape.height, shape.width),
        ResizeMode::Fixed { height, width } => (height as usize, width as usize),
        ResizeMode::ShortestSide(side) => {
            let scale = (f64::from(side) / shape.width as f64)
                .max(f64::from(side) / shape.height as f64);
            (
                round_dim(shape.height as f64 * scale),
                round_dim(shape.width as f64 * scale),
            )
        }
    }
}

fn round_dim(value: f64) -> usize {
    (value.round() as usize).max(1)
}

fn clamp_dim(value: f64, limit: usize) -> usize {
    (value.round() as usize).clamp(1, limit)
}

/// Map a unit draw onto the uniform integers [0, upper]
fn place(unit: f64, upper: usize) -> usize {
    ((unit * (upper as f64 + 1.0)).floor() as usize).min(upper)
}
