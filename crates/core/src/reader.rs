//! Image readers: shape probing and planar float decode
//!
//! JPEG goes through mozjpeg (SIMD-optimized C decoder, and the header alone
//! is enough for a probe). Everything else goes through the `image` crate.
//! Format dispatch is by file extension only; no content sniffing.

use std::fs;
use std::path::Path;

use image_ingest_common::{ImageShape, ReadError};

/// Decodes one image at a time for one worker.
///
/// Pixels are written as planar column-major float32 in the decoder's native
/// 0-255 range: plane-by-plane, each plane column-major with the row index
/// fastest. `decode` returns the shape it actually found so callers can
/// detect files that changed between probe and fetch.
pub trait ImageReader: Send {
    /// Read enough of the file to learn its dimensions and plane count
    fn probe(&mut self, path: &Path) -> Result<ImageShape, ReadError>;

    /// Decode the full image into `out` (planar layout, at least
    /// `shape.num_elements()` floats) and return the decoded shape
    fn decode(&mut self, path: &Path, out: &mut [f32]) -> Result<ImageShape, ReadError>;
}

/// Default reader: mozjpeg for JPEG, `image` crate for the rest
#[derive(Debug, Default)]
pub struct StdImageReader;

impl StdImageReader {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ImageReader for StdImageReader {
    fn probe(&mut self, path: &Path) -> Result<ImageShape, ReadError> {
        if is_jpeg(path) {
            probe_jpeg(path)
        } else {
            // The image crate exposes no plane count without decoding, so a
            // non-JPEG probe pays for a full decode.
            let (shape, _pixels) = decode_with_image_crate(path)?;
            Ok(shape)
        }
    }

    fn decode(&mut self, path: &Path, out: &mut [f32]) -> Result<ImageShape, ReadError> {
        let (shape, interleaved) = if is_jpeg(path) {
            decode_jpeg(path)?
        } else {
            decode_with_image_crate(path)?
        };
        if out.len() < shape.num_elements() {
            return Err(ReadError::ShapeChanged(format!(
                "{}: decoded {} does not fit the probed buffer",
                path.display(),
                shape
            )));
        }
        interleaved_to_planar(&mut out[..shape.num_elements()], &interleaved, shape);
        Ok(shape)
    }
}

fn is_jpeg(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .as_deref(),
        Some("jpg" | "jpeg")
    )
}

/// Header-only JPEG probe
fn probe_jpeg(path: &Path) -> Result<ImageShape, ReadError> {
    let data = fs::read(path).map_err(|e| ReadError::Read(format!("{}: {e}", path.display())))?;
    let decompress = mozjpeg::Decompress::new_mem(&data)
        .map_err(|e| ReadError::Decode(format!("{}: {e}", path.display())))?;
    let channels = match decompress.color_space() {
        mozjpeg::ColorSpace::JCS_GRAYSCALE => 1,
        _ => 3,
    };
    shape_checked(decompress.height(), decompress.width(), channels, path)
}

/// Full JPEG decode to interleaved bytes
fn decode_jpeg(path: &Path) -> Result<(ImageShape, Vec<u8>), ReadError> {
    let data = fs::read(path).map_err(|e| ReadError::Read(format!("{}: {e}", path.display())))?;
    let decompress = mozjpeg::Decompress::new_mem(&data)
        .map_err(|e| ReadError::Decode(format!("{}: {e}", path.display())))?;
    let (height, width) = (decompress.height(), decompress.width());
    let grayscale = decompress.color_space() == mozjpeg::ColorSpace::JCS_GRAYSCALE;

    let (channels, pixels) = if grayscale {
        let mut started = decompress
            .grayscale()
            .map_err(|e| ReadError::Decode(format!("{}: {e}", path.display())))?;
        let pixels: Vec<u8> = started
            .read_scanlines()
            .map_err(|e| ReadError::Decode(format!("{}: {e}", path.display())))?;
        (1, pixels)
    } else {
        let mut started = decompress
            .rgb()
            .map_err(|e| ReadError::Decode(format!("{}: {e}", path.display())))?;
        let pixels: Vec<u8> = started
            .read_scanlines()
            .map_err(|e| ReadError::Decode(format!("{}: {e}", path.display())))?;
        (3, pixels)
    };

    let shape = shape_checked(height, width, channels, path)?;
    if pixels.len() != shape.num_elements() {
        return Err(ReadError::Decode(format!(
            "{}: scanline payload {} does not match {}",
            path.display(),
            pixels.len(),
            shape
        )));
    }
    Ok((shape, pixels))
}

/// Decode any non-JPEG format via the image crate, reducing to RGB or luma
fn decode_with_image_crate(path: &Path) -> Result<(ImageShape, Vec<u8>), ReadError> {
    let img = image::open(path).map_err(|e| match e {
        image::ImageError::IoError(io) => ReadError::Read(format!("{}: {io}", path.display())),
        image::ImageError::Unsupported(u) => {
            ReadError::UnsupportedFormat(format!("{}: {u}", path.display()))
        }
        other => ReadError::Decode(format!("{}: {other}", path.display())),
    })?;

    let grayscale = matches!(
        img.color(),
        image::ColorType::L8 | image::ColorType::L16 | image::ColorType::La8 | image::ColorType::La16
    );
    if grayscale {
        let luma = img.to_luma8();
        let (width, height) = luma.dimensions();
        let shape = shape_checked(height as usize, width as usize, 1, path)?;
        Ok((shape, luma.into_raw()))
    } else {
        // Alpha is dropped; 16-bit depths are narrowed to 8.
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        let shape = shape_checked(height as usize, width as usize, 3, path)?;
        Ok((shape, rgb.into_raw()))
    }
}

fn shape_checked(
    height: usize,
    width: usize,
    channels: usize,
    path: &Path,
) -> Result<ImageShape, ReadError> {
    if height == 0 || width == 0 {
        return Err(ReadError::Decode(format!(
            "{}: degenerate dimensions {height}x{width}",
            path.display()
        )));
    }
    Ok(ImageShape::new(height, width, channels))
}

/// Scatter interleaved row-major bytes into the planar column-major layout
fn interleaved_to_planar(dst: &mut [f32], src: &[u8], shape: ImageShape) {
    let ImageShape {
        height,
        width,
        channels,
    } = shape;
    let plane = height * width;
    for y in 0..height {
        let row = y * width;
        for x in 0..width {
            let px = (row + x) * channels;
            let col = x * height + y;
            for c in 0..channels {
                dst[c * plane + col] = f32::from(src[px + c]);
            }
        }
    }
}
