//! Batch configuration record and validation
//!
//! One configuration applies to one batch. The dispatcher applies it between
//! `clear` and the first `register_item`; it is immutable while items exist.

use image_ingest_common::ConfigError;

/// How decoded images are resized before cropping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeMode {
    /// Keep the input dimensions
    None,
    /// Scale so the shorter side reaches the given length, rounding the other
    ShortestSide(u32),
    /// Resize every image to exactly (height, width)
    Fixed { height: u32, width: u32 },
}

/// Output packing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packing {
    /// One tensor per image, channel count follows the input
    Individual,
    /// One (H, W, 3, N) tensor shared by the whole batch
    Packed,
}

/// Crop placement policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropLocation {
    Center,
    Random,
}

/// Immutable per-batch configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Worker pool size; values below 1 are coerced to 1
    pub num_threads: usize,
    pub resize: ResizeMode,
    pub packing: Packing,
    /// Mirror outputs into device memory
    pub gpu: bool,
    /// Per-channel mean subtracted from the output
    pub subtract_average: [f32; 3],
    /// Column-major 3x3 brightness deviation matrix
    pub brightness: [f32; 9],
    /// Contrast deviation in [0, 1]
    pub contrast: f32,
    /// Saturation deviation in [0, 1]
    pub saturation: f32,
    /// Crop aspect sampling range; (0, 0) stretches the crop to the input
    pub crop_anisotropy: (f32, f32),
    /// Relative crop size range, a subset of [0, 1]
    pub crop_size: (f32, f32),
    pub crop_location: CropLocation,
    /// Enable a 50/50 horizontal flip per image
    pub flip: bool,
    /// Batch RNG seed; unset means entropy-seeded
    pub seed: Option<u64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            num_threads: 1,
            resize: ResizeMode::None,
            packing: Packing::Individual,
            gpu: false,
            subtract_average: [0.0; 3],
            brightness: [0.0; 9],
            contrast: 0.0,
            saturation: 0.0,
            crop_anisotropy: (0.0, 0.0),
            crop_size: (1.0, 1.0),
            crop_location: CropLocation::Center,
            flip: false,
            seed: None,
        }
    }
}

impl BatchConfig {
    /// Worker count with the below-1 coercion applied
    #[must_use]
    pub fn effective_threads(&self) -> usize {
        self.num_threads.max(1)
    }

    /// Reject configurations no batch should ever start with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.packing == Packing::Packed && !matches!(self.resize, ResizeMode::Fixed { .. }) {
            return Err(ConfigError::PackedNeedsFixedResize);
        }
        match self.resize {
            ResizeMode::ShortestSide(0) => {
                return Err(ConfigError::Invalid {
                    option: "resize",
                    reason: "shortest side must be at least 1".to_string(),
                });
            }
            ResizeMode::Fixed { height: 0, .. } | ResizeMode::Fixed { width: 0, .. } => {
                return Err(ConfigError::Invalid {
                    option: "resize",
                    reason: "fixed dimensions must be at least 1".to_string(),
                });
            }
            _ => {}
        }
        check_unit_range("contrast", self.contrast)?;
        check_unit_range("saturation", self.saturation)?;

        let (a_min, a_max) = self.crop_anisotropy;
        if a_min < 0.0 || a_min > a_max {
            return Err(ConfigError::OutOfRange {
                option: "crop_anisotropy",
                value: f64::from(a_min),
                expected: "0 <= min <= max",
            });
        }
        let (s_min, s_max) = self.crop_size;
        if s_min < 0.0 || s_min > s_max || s_max > 1.0 {
            return Err(ConfigError::OutOfRange {
                option: "crop_size",
                value: f64::from(s_max),
                expected: "0 <= min <= max <= 1",
            });
        }
        Ok(())
    }
}

fn check_unit_range(option: &'static str, value: f32) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::OutOfRange {
            option,
            value: f64::from(value),
            expected: "[0, 1]",
        });
    }
    Ok(())
}

/// Expand a 1-, 3-, or 9-element brightness option into the column-major
/// deviation matrix: a scalar scales the identity, three values form a
/// diagonal, nine values are taken verbatim.
pub fn brightness_matrix(values: &[f32]) -> Result<[f32; 9], ConfigError> {
    let mut b = [0.0f32; 9];
    match values {
        [v] => {
            b[0] = *v;
            b[4] = *v;
            b[8] = *v;
        }
        [r, g, bl] => {
            b[0] = *r;
            b[4] = *g;
            b[8] = *bl;
        }
        full if full.len() == 9 => b.copy_from_slice(full),
        other => {
            return Err(ConfigError::Invalid {
                option: "brightness",
                reason: format!("expected 1, 3, or 9 values, got {}", other.len()),
            });
        }
    }
    Ok(b)
}
