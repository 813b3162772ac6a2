//! Per-worker scratch buffers
//!
//! Each worker owns two growable pixel buffers that live for the lifetime of
//! the thread: one for the decoded image, one for the vertical-resize
//! intermediate. Growth reallocates and discards contents; shrinking never
//! happens, so steady-state allocation per worker is bounded by the largest
//! image it has seen.

pub(crate) struct ScratchPool {
    buffers: [Vec<f32>; 2],
}

impl ScratchPool {
    pub(crate) fn new() -> Self {
        Self {
            buffers: [Vec::new(), Vec::new()],
        }
    }

    /// Buffer `index` with at least `len` elements
    pub(crate) fn get(&mut self, index: usize, len: usize) -> &mut [f32] {
        self.reserve(index, len);
        &mut self.buffers[index][..len]
    }

    /// Both buffers at once, for read-from-one-write-to-other stages
    pub(crate) fn pair(&mut self, len0: usize, len1: usize) -> (&mut [f32], &mut [f32]) {
        self.reserve(0, len0);
        self.reserve(1, len1);
        let [b0, b1] = &mut self.buffers;
        (&mut b0[..len0], &mut b1[..len1])
    }

    fn reserve(&mut self, index: usize, len: usize) {
        if self.buffers[index].len() < len {
            self.buffers[index] = vec![0.0; len];
        }
    }
}
