//! Host-side pixel tensors
//!
//! Outputs use a planar column-major layout, shape (H, W, C, N) with the row
//! index fastest: element (y, x, c, i) lives at
//! `i*H*W*C + c*H*W + x*H + y`. Each image therefore occupies one contiguous
//! slab of `H*W*C` floats, which is what lets packed mode hand disjoint
//! sub-slices of a single allocation to concurrent workers.

use std::cell::UnsafeCell;

use ndarray::{ArrayView4, ShapeBuilder};

use image_ingest_common::ImageShape;

/// Owned planar float tensor, shape (H, W, C, N)
#[derive(Debug, Clone)]
pub struct HostTensor {
    height: usize,
    width: usize,
    channels: usize,
    count: usize,
    data: Box<[f32]>,
}

impl HostTensor {
    /// Allocate a zero-filled tensor for `count` images of the given shape
    #[must_use]
    pub fn zeros(shape: ImageShape, count: usize) -> Self {
        Self {
            height: shape.height,
            width: shape.width,
            channels: shape.channels,
            count,
            data: vec![0.0; shape.num_elements() * count].into_boxed_slice(),
        }
    }

    #[must_use]
    pub fn shape(&self) -> [usize; 4] {
        [self.height, self.width, self.channels, self.count]
    }

    /// Elements per image slab
    #[must_use]
    pub fn slab_len(&self) -> usize {
        self.height * self.width * self.channels
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Contiguous slab for image `i`
    #[must_use]
    pub fn slab(&self, index: usize) -> &[f32] {
        let len = self.slab_len();
        &self.data[index * len..(index + 1) * len]
    }

    pub fn slab_mut(&mut self, index: usize) -> &mut [f32] {
        let len = self.slab_len();
        &mut self.data[index * len..(index + 1) * len]
    }

    /// Element accessor following the (y, x, c, i) index order
    #[must_use]
    pub fn at(&self, y: usize, x: usize, c: usize, i: usize) -> f32 {
        self.data[i * self.slab_len() + c * self.height * self.width + x * self.height + y]
    }

    /// Strided ndarray view over the planar layout
    #[must_use]
    pub fn view(&self) -> ArrayView4<'_, f32> {
        let plane = self.height * self.width;
        ArrayView4::from_shape(
            (self.height, self.width, self.channels, self.count)
                .strides((1, self.height, plane, self.slab_len())),
            &self.data,
        )
        .expect("planar layout always forms a valid strided view")
    }
}

/// Shared batch output written concurrently by workers at disjoint slabs.
///
/// The queue guarantees each image index is owned by at most one worker at a
/// time, so handing out one mutable slab per index never aliases. Everything
/// else about this type is ordinary bounds-checked slicing.
pub(crate) struct PackTensor {
    height: usize,
    width: usize,
    channels: usize,
    count: usize,
    cell: UnsafeCell<Box<[f32]>>,
}

// Safety: disjoint-slab discipline is enforced by the batch queue (an image
// index is handed to exactly one worker per phase); whole-buffer reads only
// happen after every slab write has completed.
unsafe impl Sync for PackTensor {}
unsafe impl Send for PackTensor {}

impl PackTensor {
    pub(crate) fn zeros(height: usize, width: usize, channels: usize, count: usize) -> Self {
        Self {
            height,
            width,
            channels,
            count,
            cell: UnsafeCell::new(vec![0.0; height * width * channels * count].into_boxed_slice()),
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.count
    }

    pub(crate) fn slab_len(&self) -> usize {
        self.height * self.width * self.channels
    }

    pub(crate) fn total_len(&self) -> usize {
        self.slab_len() * self.count
    }

    /// Mutable slab for image `index`.
    ///
    /// # Safety
    ///
    /// The caller must be the unique owner of `index` (queue borrow
    /// discipline); no other live reference to this slab may exist.
    pub(crate) unsafe fn slab_mut(&self, index: usize) -> &mut [f32] {
        assert!(
            index < self.count,
            "pack slab index {index} out of range (count {})",
            self.count
        );
        let len = self.slab_len();
        let base = (*self.cell.get()).as_mut_ptr();
        std::slice::from_raw_parts_mut(base.add(index * len), len)
    }

    /// Whole-buffer read.
    ///
    /// # Safety
    ///
    /// No slab may be concurrently written; call only after every fetch for
    /// this batch has returned.
    pub(crate) unsafe fn as_slice(&self) -> &[f32] {
        &*self.cell.get()
    }

    pub(crate) fn into_host(self) -> HostTensor {
        HostTensor {
            height: self.height,
            width: self.width,
            channels: self.channels,
            count: self.count,
            data: self.cell.into_inner(),
        }
    }
}
