//! StdImageReader tests over real files on disk

use std::path::PathBuf;

use tempfile::TempDir;

use image_ingest_core::{
    BatchConfig, ImageReader, IngestRequest, IngestService, Packing, ResizeMode, StdImageReader,
};

fn write_rgb_png(dir: &TempDir, name: &str, width: u32, height: u32) -> PathBuf {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([x as u8, y as u8, (x + y) as u8])
    });
    let path = dir.path().join(name);
    img.save(&path).expect("Failed to write PNG fixture");
    path
}

#[test]
fn png_probe_reports_shape_without_error() {
    let dir = TempDir::new().unwrap();
    let path = write_rgb_png(&dir, "rgb.png", 3, 2);

    let mut reader = StdImageReader::new();
    let shape = reader.probe(&path).unwrap();
    assert_eq!((shape.height, shape.width, shape.channels), (2, 3, 3));
}

#[test]
fn png_decode_is_planar_column_major() {
    let dir = TempDir::new().unwrap();
    let path = write_rgb_png(&dir, "rgb.png", 3, 2);

    let mut reader = StdImageReader::new();
    let shape = reader.probe(&path).unwrap();
    let mut pixels = vec![0.0f32; shape.num_elements()];
    let decoded = reader.decode(&path, &mut pixels).unwrap();
    assert_eq!(decoded, shape);

    let plane = shape.num_pixels();
    for y in 0..2usize {
        for x in 0..3usize {
            let col = x * shape.height + y;
            assert_eq!(pixels[col], x as f32, "red at ({y},{x})");
            assert_eq!(pixels[plane + col], y as f32, "green at ({y},{x})");
            assert_eq!(pixels[2 * plane + col], (x + y) as f32, "blue at ({y},{x})");
        }
    }
}

#[test]
fn gray_png_probes_as_one_plane() {
    let dir = TempDir::new().unwrap();
    let img = image::GrayImage::from_pixel(5, 4, image::Luma([99]));
    let path = dir.path().join("gray.png");
    img.save(&path).unwrap();

    let mut reader = StdImageReader::new();
    let shape = reader.probe(&path).unwrap();
    assert_eq!((shape.height, shape.width, shape.channels), (4, 5, 1));

    let mut pixels = vec![0.0f32; shape.num_elements()];
    reader.decode(&path, &mut pixels).unwrap();
    assert!(pixels.iter().all(|&v| v == 99.0));
}

#[test]
fn jpeg_probe_is_header_only_and_decode_is_close() {
    let dir = TempDir::new().unwrap();
    let img = image::RgbImage::from_pixel(32, 24, image::Rgb([128, 128, 128]));
    let path = dir.path().join("gray-ish.jpg");
    img.save(&path).unwrap();

    let mut reader = StdImageReader::new();
    let shape = reader.probe(&path).unwrap();
    assert_eq!((shape.height, shape.width, shape.channels), (24, 32, 3));

    let mut pixels = vec![0.0f32; shape.num_elements()];
    let decoded = reader.decode(&path, &mut pixels).unwrap();
    assert_eq!(decoded, shape);
    // JPEG is lossy; a solid mid-gray survives within a small band.
    assert!(pixels.iter().all(|&v| (v - 128.0).abs() <= 6.0));
}

#[test]
fn missing_file_is_a_read_error() {
    let mut reader = StdImageReader::new();
    let err = reader.probe(&PathBuf::from("/nonexistent/image.png")).unwrap_err();
    assert!(err.to_string().contains("image.png"));
}

#[test]
fn full_stack_over_real_files() {
    let dir = TempDir::new().unwrap();
    let a = write_rgb_png(&dir, "a.png", 30, 20);
    let b = write_rgb_png(&dir, "b.png", 12, 18);

    let mut service = IngestService::new();
    let result = service
        .run(IngestRequest::new(
            BatchConfig {
                num_threads: 2,
                packing: Packing::Packed,
                resize: ResizeMode::Fixed {
                    height: 8,
                    width: 8,
                },
                seed: Some(9),
                ..BatchConfig::default()
            },
            vec![a, b],
        ))
        .unwrap();

    assert!(result.warnings.is_empty());
    let output = result.outputs[0].as_ref().unwrap();
    assert_eq!(output.shape(), [8, 8, 3, 2]);
}
