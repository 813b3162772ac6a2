//! End-to-end pipeline tests over an in-memory reader
//!
//! A fake reader serves synthetic planar images and counts probe/decode
//! calls, which makes prefetch reuse and error isolation directly
//! observable without touching the filesystem.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image_ingest_common::{ImageShape, ReadError};
use image_ingest_core::{
    BatchConfig, CropLocation, DeviceRuntime, HostEmulatedDevice, ImageReader, IngestRequest,
    IngestService, Packing, ReaderFactory, ResizeMode, TensorOutput,
};

#[derive(Clone)]
struct FakeImage {
    shape: ImageShape,
    pixels: Vec<f32>,
}

impl FakeImage {
    /// Deterministic gradient image in planar column-major layout
    fn gradient(height: usize, width: usize, channels: usize) -> Self {
        let shape = ImageShape::new(height, width, channels);
        let pixels = (0..shape.num_elements())
            .map(|i| (i % 251) as f32)
            .collect();
        Self { shape, pixels }
    }

    fn solid(height: usize, width: usize, channels: usize, value: f32) -> Self {
        let shape = ImageShape::new(height, width, channels);
        Self {
            shape,
            pixels: vec![value; shape.num_elements()],
        }
    }
}

#[derive(Default)]
struct ReaderCounters {
    probes: AtomicUsize,
    decodes: AtomicUsize,
}

struct FakeReader {
    images: Arc<HashMap<PathBuf, FakeImage>>,
    counters: Arc<ReaderCounters>,
}

impl FakeReader {
    fn lookup(&self, path: &Path) -> Result<&FakeImage, ReadError> {
        self.images
            .get(path)
            .ok_or_else(|| ReadError::Read(format!("{}: no such file", path.display())))
    }
}

impl ImageReader for FakeReader {
    fn probe(&mut self, path: &Path) -> Result<ImageShape, ReadError> {
        self.counters.probes.fetch_add(1, Ordering::Relaxed);
        Ok(self.lookup(path)?.shape)
    }

    fn decode(&mut self, path: &Path, out: &mut [f32]) -> Result<ImageShape, ReadError> {
        self.counters.decodes.fetch_add(1, Ordering::Relaxed);
        let image = self.lookup(path)?;
        out[..image.pixels.len()].copy_from_slice(&image.pixels);
        Ok(image.shape)
    }
}

struct Fixture {
    service: IngestService,
    counters: Arc<ReaderCounters>,
}

fn fixture(images: Vec<(&str, FakeImage)>) -> Fixture {
    fixture_with_device(images, Arc::new(HostEmulatedDevice::new()))
}

fn fixture_with_device(
    images: Vec<(&str, FakeImage)>,
    runtime: Arc<dyn DeviceRuntime>,
) -> Fixture {
    let images: Arc<HashMap<PathBuf, FakeImage>> = Arc::new(
        images
            .into_iter()
            .map(|(name, image)| (PathBuf::from(name), image))
            .collect(),
    );
    let counters = Arc::new(ReaderCounters::default());
    let factory: ReaderFactory = {
        let counters = Arc::clone(&counters);
        Arc::new(move || {
            Box::new(FakeReader {
                images: Arc::clone(&images),
                counters: Arc::clone(&counters),
            }) as Box<dyn ImageReader>
        })
    };
    Fixture {
        service: IngestService::with_parts(factory, runtime),
        counters,
    }
}

fn paths(names: &[&str]) -> Vec<PathBuf> {
    names.iter().map(PathBuf::from).collect()
}

fn packed_config(height: u32, width: u32, threads: usize) -> BatchConfig {
    BatchConfig {
        num_threads: threads,
        packing: Packing::Packed,
        resize: ResizeMode::Fixed { height, width },
        seed: Some(1),
        ..BatchConfig::default()
    }
}

#[test]
fn identity_pipeline_reproduces_the_input() {
    let image = FakeImage::gradient(5, 4, 3);
    let expected = image.pixels.clone();
    let mut fx = fixture(vec![("a.jpg", image)]);

    let result = fx
        .service
        .run(IngestRequest::new(
            BatchConfig::default(),
            paths(&["a.jpg"]),
        ))
        .unwrap();

    assert!(!result.packed);
    assert_eq!(result.warnings.len(), 0);
    let output = result.outputs[0].as_ref().unwrap();
    assert_eq!(output.shape(), [5, 4, 3, 1]);
    assert_eq!(output.pixels(), expected.as_slice());
}

#[test]
fn packed_batch_yields_one_tensor_with_a_slab_per_file() {
    let mut fx = fixture(vec![
        ("a.jpg", FakeImage::gradient(20, 30, 3)),
        ("b.jpg", FakeImage::solid(8, 8, 1, 50.0)),
    ]);

    let result = fx
        .service
        .run(IngestRequest::new(
            packed_config(16, 16, 4),
            paths(&["a.jpg", "b.jpg"]),
        ))
        .unwrap();

    assert!(result.packed);
    assert_eq!(result.outputs.len(), 1);
    let output = result.outputs[0].as_ref().unwrap();
    assert_eq!(output.shape(), [16, 16, 3, 2]);

    // The grayscale image broadcasts to three identical planes of 50s.
    let pixels = output.pixels();
    let slab = 16 * 16 * 3;
    assert!(pixels[slab..2 * slab].iter().all(|&v| v == 50.0));
}

#[test]
fn a_missing_file_fails_alone() {
    let mut fx = fixture(vec![
        ("a.jpg", FakeImage::gradient(10, 10, 3)),
        ("c.jpg", FakeImage::gradient(12, 9, 3)),
    ]);

    let result = fx
        .service
        .run(IngestRequest::new(
            BatchConfig {
                num_threads: 2,
                seed: Some(3),
                ..BatchConfig::default()
            },
            paths(&["a.jpg", "missing.jpg", "c.jpg"]),
        ))
        .unwrap();

    assert_eq!(result.outputs.len(), 3);
    assert_eq!(result.outputs[0].as_ref().unwrap().shape(), [10, 10, 3, 1]);
    assert!(result.outputs[1].is_none());
    assert_eq!(result.outputs[2].as_ref().unwrap().shape(), [12, 9, 3, 1]);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("missing.jpg"));
}

#[test]
fn packed_mode_keeps_surviving_slabs_stable_when_a_file_fails() {
    // Randomized crops, flips, and color noise make any shift in the
    // per-item draw order visible in the pixels.
    let config = BatchConfig {
        num_threads: 2,
        packing: Packing::Packed,
        resize: ResizeMode::Fixed {
            height: 8,
            width: 8,
        },
        crop_location: CropLocation::Random,
        crop_size: (0.4, 0.9),
        crop_anisotropy: (0.8, 1.2),
        flip: true,
        contrast: 0.3,
        saturation: 0.3,
        brightness: [0.05; 9],
        subtract_average: [10.0, 20.0, 30.0],
        seed: Some(7),
        ..BatchConfig::default()
    };
    let names = paths(&["a.jpg", "b.jpg", "c.jpg"]);
    let a = FakeImage::gradient(20, 16, 3);
    let b = FakeImage::gradient(14, 18, 3);
    let c = FakeImage::gradient(9, 27, 3);

    // Reference batch with every file present.
    let mut all_valid = fixture(vec![
        ("a.jpg", a.clone()),
        ("b.jpg", b),
        ("c.jpg", c.clone()),
    ]);
    let reference = all_valid
        .service
        .run(IngestRequest::new(config.clone(), names.clone()))
        .unwrap();
    let reference_pixels = reference.outputs[0].as_ref().unwrap().pixels().to_vec();

    // Same batch with the middle file missing.
    let mut with_missing = fixture(vec![("a.jpg", a), ("c.jpg", c)]);
    let result = with_missing
        .service
        .run(IngestRequest::new(config, names))
        .unwrap();

    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("b.jpg"));
    let output = result.outputs[0].as_ref().unwrap();
    assert_eq!(output.shape(), [8, 8, 3, 3]);

    // Surviving slabs come out exactly as they would in the all-valid
    // batch; the failed slot stays zeroed.
    let slab = 8 * 8 * 3;
    let pixels = output.pixels();
    assert_eq!(&pixels[..slab], &reference_pixels[..slab]);
    assert!(pixels[slab..2 * slab].iter().all(|&v| v == 0.0));
    assert_eq!(&pixels[2 * slab..], &reference_pixels[2 * slab..]);
}

#[test]
fn prefetch_then_collect_does_the_work_once() {
    let mut fx = fixture(vec![
        ("a.jpg", FakeImage::gradient(9, 9, 3)),
        ("b.jpg", FakeImage::gradient(7, 11, 3)),
    ]);
    let config = BatchConfig {
        num_threads: 2,
        seed: Some(5),
        ..BatchConfig::default()
    };

    let prefetch = fx
        .service
        .run(IngestRequest {
            config: config.clone(),
            prefetch_only: true,
            filenames: paths(&["a.jpg", "b.jpg"]),
        })
        .unwrap();
    assert!(prefetch.prefetched);
    assert!(prefetch.outputs.is_empty());

    let result = fx
        .service
        .run(IngestRequest::new(config, paths(&["a.jpg", "b.jpg"])))
        .unwrap();
    assert_eq!(result.outputs.len(), 2);
    assert!(result.outputs.iter().all(Option::is_some));

    // The collect call reused the pending batch: two probes, two decodes,
    // nothing repeated.
    assert_eq!(fx.counters.probes.load(Ordering::Relaxed), 2);
    assert_eq!(fx.counters.decodes.load(Ordering::Relaxed), 2);
}

#[test]
fn changed_filenames_invalidate_a_pending_prefetch() {
    let mut fx = fixture(vec![
        ("a.jpg", FakeImage::gradient(9, 9, 3)),
        ("b.jpg", FakeImage::gradient(7, 11, 3)),
    ]);
    let config = BatchConfig {
        seed: Some(5),
        ..BatchConfig::default()
    };

    fx.service
        .run(IngestRequest {
            config: config.clone(),
            prefetch_only: true,
            filenames: paths(&["a.jpg"]),
        })
        .unwrap();
    let result = fx
        .service
        .run(IngestRequest::new(config, paths(&["b.jpg"])))
        .unwrap();

    assert_eq!(result.outputs.len(), 1);
    assert_eq!(result.outputs[0].as_ref().unwrap().shape(), [7, 11, 3, 1]);
    // One probe for the abandoned prefetch, one for the real batch.
    assert_eq!(fx.counters.probes.load(Ordering::Relaxed), 2);
}

#[test]
fn pinned_seed_makes_augmentation_reproducible() {
    let images = || {
        vec![
            ("a.jpg", FakeImage::gradient(40, 30, 3)),
            ("b.jpg", FakeImage::gradient(33, 57, 3)),
        ]
    };
    let config = BatchConfig {
        num_threads: 3,
        resize: ResizeMode::ShortestSide(24),
        crop_location: CropLocation::Random,
        crop_size: (0.4, 0.9),
        crop_anisotropy: (0.8, 1.2),
        flip: true,
        contrast: 0.3,
        saturation: 0.3,
        brightness: [0.05; 9],
        subtract_average: [100.0, 110.0, 120.0],
        seed: Some(42),
        ..BatchConfig::default()
    };

    let mut first = fixture(images());
    let a = first
        .service
        .run(IngestRequest::new(config.clone(), paths(&["a.jpg", "b.jpg"])))
        .unwrap();
    let mut second = fixture(images());
    let b = second
        .service
        .run(IngestRequest::new(config, paths(&["a.jpg", "b.jpg"])))
        .unwrap();

    for (lhs, rhs) in a.outputs.iter().zip(b.outputs.iter()) {
        let lhs = lhs.as_ref().unwrap();
        let rhs = rhs.as_ref().unwrap();
        assert_eq!(lhs.shape(), rhs.shape());
        assert_eq!(lhs.pixels(), rhs.pixels());
    }
}

#[test]
fn shortest_side_resize_produces_the_expected_shape() {
    let image = FakeImage::gradient(64, 48, 3);
    let mut fx = fixture(vec![("a.jpg", image)]);
    let config = BatchConfig {
        resize: ResizeMode::ShortestSide(32),
        seed: Some(1),
        ..BatchConfig::default()
    };

    let first = fx
        .service
        .run(IngestRequest::new(config.clone(), paths(&["a.jpg"])))
        .unwrap();
    let output = first.outputs[0].as_ref().unwrap();
    assert_eq!(output.shape(), [43, 32, 3, 1]);
    let first_pixels = output.pixels().to_vec();

    let again = fx
        .service
        .run(IngestRequest::new(config, paths(&["a.jpg"])))
        .unwrap();
    assert_eq!(
        again.outputs[0].as_ref().unwrap().pixels(),
        first_pixels.as_slice()
    );
}

#[test]
fn packed_gpu_batch_lands_in_device_memory() {
    let images = || {
        vec![
            ("a.jpg", FakeImage::gradient(20, 30, 3)),
            ("b.jpg", FakeImage::solid(8, 8, 3, 77.0)),
        ]
    };

    // Host reference run.
    let mut host = fixture(images());
    let host_result = host
        .service
        .run(IngestRequest::new(
            packed_config(16, 16, 2),
            paths(&["a.jpg", "b.jpg"]),
        ))
        .unwrap();
    let host_pixels = host_result.outputs[0].as_ref().unwrap().pixels().to_vec();

    // Device run with observable transfer counters.
    let device = HostEmulatedDevice::new();
    let counters = device.counters();
    let mut gpu = fixture_with_device(images(), Arc::new(device));
    let mut config = packed_config(16, 16, 2);
    config.gpu = true;
    let gpu_result = gpu
        .service
        .run(IngestRequest::new(config, paths(&["a.jpg", "b.jpg"])))
        .unwrap();

    let output = gpu_result.outputs[0].as_ref().unwrap();
    assert!(matches!(output, TensorOutput::Device { .. }));
    assert_eq!(output.shape(), [16, 16, 3, 2]);
    assert_eq!(output.pixels(), host_pixels.as_slice());

    // One whole-pack upload on the last fetch return, drained by sync.
    assert_eq!(counters.copies(), 1);
    assert!(counters.syncs() >= 1);
}

#[test]
fn individual_gpu_mode_uploads_each_item() {
    let device = HostEmulatedDevice::new();
    let counters = device.counters();
    let mut fx = fixture_with_device(
        vec![
            ("a.jpg", FakeImage::gradient(6, 6, 3)),
            ("b.jpg", FakeImage::gradient(9, 4, 3)),
        ],
        Arc::new(device),
    );

    let result = fx
        .service
        .run(IngestRequest::new(
            BatchConfig {
                gpu: true,
                num_threads: 2,
                seed: Some(2),
                ..BatchConfig::default()
            },
            paths(&["a.jpg", "b.jpg"]),
        ))
        .unwrap();

    for output in result.outputs.iter() {
        assert!(matches!(
            output.as_ref().unwrap(),
            TensorOutput::Device { .. }
        ));
    }
    assert_eq!(counters.copies(), 2);
}

#[test]
fn packed_without_fixed_resize_is_rejected_before_any_work() {
    let mut fx = fixture(vec![("a.jpg", FakeImage::gradient(4, 4, 3))]);
    let err = fx
        .service
        .run(IngestRequest::new(
            BatchConfig {
                packing: Packing::Packed,
                resize: ResizeMode::ShortestSide(16),
                ..BatchConfig::default()
            },
            paths(&["a.jpg"]),
        ))
        .unwrap_err();
    assert!(err.to_string().contains("fixed resize"));
    assert_eq!(fx.counters.probes.load(Ordering::Relaxed), 0);
}

#[test]
fn zero_threads_are_coerced_to_one() {
    let mut fx = fixture(vec![("a.jpg", FakeImage::gradient(4, 4, 3))]);
    let result = fx
        .service
        .run(IngestRequest::new(
            BatchConfig {
                num_threads: 0,
                ..BatchConfig::default()
            },
            paths(&["a.jpg"]),
        ))
        .unwrap();
    assert!(result.outputs[0].is_some());
}

#[test]
fn worker_pool_follows_the_requested_size() {
    let mut fx = fixture(vec![("a.jpg", FakeImage::gradient(12, 12, 3))]);
    for threads in [2, 4, 1] {
        let result = fx
            .service
            .run(IngestRequest::new(
                BatchConfig {
                    num_threads: threads,
                    ..BatchConfig::default()
                },
                paths(&["a.jpg"]),
            ))
            .unwrap();
        assert!(result.outputs[0].is_some(), "threads={threads}");
    }
}

#[test]
fn grayscale_stays_single_channel_in_individual_mode() {
    let mut fx = fixture(vec![("g.png", FakeImage::solid(10, 8, 1, 33.0))]);
    let result = fx
        .service
        .run(IngestRequest::new(
            BatchConfig::default(),
            paths(&["g.png"]),
        ))
        .unwrap();
    let output = result.outputs[0].as_ref().unwrap();
    assert_eq!(output.shape(), [10, 8, 1, 1]);
    assert!(output.pixels().iter().all(|&v| v == 33.0));
}

#[test]
fn interleaved_prefetch_collect_rounds_stay_stable() {
    let mut images = Vec::new();
    let names: Vec<String> = (0..40).map(|i| format!("img-{i}.jpg")).collect();
    for (i, name) in names.iter().enumerate() {
        images.push((
            name.as_str(),
            FakeImage::gradient(6 + i % 5, 6 + (i * 3) % 7, 3),
        ));
    }
    let mut fx = fixture(images);
    let filenames: Vec<PathBuf> = names.iter().map(PathBuf::from).collect();

    for round in 0..6 {
        let config = packed_config(8, 8, 2);
        let prefetch = fx
            .service
            .run(IngestRequest {
                config: config.clone(),
                prefetch_only: true,
                filenames: filenames.clone(),
            })
            .unwrap();
        assert!(prefetch.prefetched, "round {round}");

        let result = fx
            .service
            .run(IngestRequest::new(config, filenames.clone()))
            .unwrap();
        let output = result.outputs[0].as_ref().unwrap();
        assert_eq!(output.shape(), [8, 8, 3, 40], "round {round}");
        assert!(result.warnings.is_empty(), "round {round}");
    }
}
