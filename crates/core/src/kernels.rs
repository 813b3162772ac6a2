//! Numeric kernels: transposing 1-D resampler and in-place color augmentation
//!
//! The 2-D resize + crop + flip is composed from two calls to a single 1-D
//! kernel. `resample_columns` resamples the contiguous (column) dimension of
//! a planar buffer and writes its output transposed, so applying it twice —
//! first over rows, then over columns — resizes both axes and restores the
//! original orientation.

/// Linearly resample the contiguous dimension of a planar buffer.
///
/// `src` is laid out (src_len, lines, planes) column-major; `dst` receives
/// (lines, dst_len, planes). Only the slab `[crop_offset, crop_offset +
/// crop_len)` of each source column is sampled, with clamp-to-edge at the
/// slab borders. When `flip` is set the resampled dimension is mirrored in
/// the output, which on the second (width) pass is a horizontal flip.
#[allow(clippy::too_many_arguments)]
pub(crate) fn resample_columns(
    dst: &mut [f32],
    src: &[f32],
    dst_len: usize,
    src_len: usize,
    lines: usize,
    planes: usize,
    crop_len: usize,
    crop_offset: usize,
    flip: bool,
) {
    debug_assert!(dst_len >= 1 && crop_len >= 1);
    debug_assert!(crop_offset + crop_len <= src_len);
    debug_assert!(src.len() >= src_len * lines * planes);
    debug_assert!(dst.len() >= dst_len * lines * planes);

    let scale = crop_len as f32 / dst_len as f32;
    let last = crop_len as isize - 1;

    for p in 0..planes {
        let src_plane = &src[p * src_len * lines..(p + 1) * src_len * lines];
        let dst_plane = &mut dst[p * dst_len * lines..(p + 1) * dst_len * lines];
        for j in 0..lines {
            let column = &src_plane[j * src_len..j * src_len + src_len];
            for y in 0..dst_len {
                let u = (y as f32 + 0.5) * scale - 0.5;
                let i0 = u.floor();
                let frac = u - i0;
                let lo = (i0 as isize).clamp(0, last) as usize;
                let hi = (i0 as isize + 1).clamp(0, last) as usize;
                let a = column[crop_offset + lo];
                let b = column[crop_offset + hi];
                let out_y = if flip { dst_len - 1 - y } else { y };
                dst_plane[out_y * lines + j] = a + (b - a) * frac;
            }
        }
    }
}

/// Apply the brightness/contrast/saturation transform in place.
///
/// `out` holds `out_c` planes of `pixels` elements each; only the first
/// `input_c` planes carry resized data on entry. A single-channel input with
/// three output planes is broadcast during the transform.
#[allow(clippy::too_many_arguments)]
pub(crate) fn apply_color_augment(
    out: &mut [f32],
    pixels: usize,
    out_c: usize,
    input_c: usize,
    avg: [f32; 3],
    brightness_shift: [f32; 3],
    contrast_shift: f32,
    saturation_shift: f32,
) {
    let c = contrast_shift;
    let mut dv = [0.0f32; 3];
    for k in 0..out_c {
        dv[k] = (1.0 - 2.0 * c) * (avg[k] + brightness_shift[k]);
    }
    if c != 1.0 {
        for k in 0..out_c {
            let source = k.min(input_c - 1);
            let plane = &out[source * pixels..(source + 1) * pixels];
            let mean = plane.iter().sum::<f32>() / pixels as f32;
            dv[k] -= (1.0 - c) * mean;
        }
    }

    if out_c == 3 {
        let a = c * saturation_shift;
        let b = c * (1.0 - saturation_shift) / 3.0;
        let (p0, rest) = out.split_at_mut(pixels);
        let (p1, p2) = rest.split_at_mut(pixels);
        if input_c == 3 {
            for i in 0..pixels {
                let v0 = p0[i] + dv[0];
                let v1 = p1[i] + dv[1];
                let v2 = p2[i] + dv[2];
                let mu = v0 + v1 + v2;
                p0[i] = a * v0 + b * mu;
                p1[i] = a * v1 + b * mu;
                p2[i] = a * v2 + b * mu;
            }
        } else {
            // Grayscale broadcast: one decoded plane feeds all three outputs.
            for i in 0..pixels {
                let g = p0[i];
                let v0 = g + dv[0];
                let v1 = g + dv[1];
                let v2 = g + dv[2];
                let mu = v0 + v1 + v2;
                p0[i] = a * v0 + b * mu;
                p1[i] = a * v1 + b * mu;
                p2[i] = a * v2 + b * mu;
            }
        }
    } else {
        for v in &mut out[..pixels] {
            *v = c * (*v + dv[0]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_passes_round_trip_a_2x2() {
        // Column-major 2x2: rows (1, 3) and (2, 4).
        let src = [1.0, 2.0, 3.0, 4.0];
        let mut tmp = [0.0; 4];
        let mut out = [0.0; 4];
        resample_columns(&mut tmp, &src, 2, 2, 2, 1, 2, 0, false);
        assert_eq!(tmp, [1.0, 3.0, 2.0, 4.0]);
        resample_columns(&mut out, &tmp, 2, 2, 2, 1, 2, 0, false);
        assert_eq!(out, src);
    }

    #[test]
    fn flip_mirrors_the_resampled_dimension() {
        let src = [1.0, 2.0, 3.0, 4.0];
        let mut tmp = [0.0; 4];
        let mut out = [0.0; 4];
        resample_columns(&mut tmp, &src, 2, 2, 2, 1, 2, 0, false);
        resample_columns(&mut out, &tmp, 2, 2, 2, 1, 2, 0, true);
        // Rows were (1, 3) / (2, 4); horizontally flipped: (3, 1) / (4, 2).
        assert_eq!(out, [3.0, 4.0, 1.0, 2.0]);
    }

    #[test]
    fn downsample_averages_neighbors() {
        let src = [0.0, 2.0];
        let mut dst = [0.0; 1];
        resample_columns(&mut dst, &src, 1, 2, 1, 1, 2, 0, false);
        assert_eq!(dst[0], 1.0);
    }

    #[test]
    fn crop_offset_selects_the_slab() {
        let src = [10.0, 20.0, 30.0, 40.0];
        let mut dst = [0.0; 2];
        resample_columns(&mut dst, &src, 2, 4, 1, 1, 2, 1, false);
        assert_eq!(dst, [20.0, 30.0]);
    }

    #[test]
    fn upsample_clamps_to_edge() {
        let src = [1.0, 3.0];
        let mut dst = [0.0; 4];
        resample_columns(&mut dst, &src, 4, 2, 1, 1, 2, 0, false);
        // u = -0.25, 0.25, 0.75, 1.25; edges clamp.
        assert_eq!(dst, [1.0, 1.5, 2.5, 3.0]);
    }

    #[test]
    fn augment_identity_subtracts_average() {
        let mut out = [10.0, 20.0, 30.0];
        apply_color_augment(&mut out, 1, 3, 3, [1.0, 2.0, 3.0], [0.0; 3], 1.0, 1.0);
        assert_eq!(out, [9.0, 18.0, 27.0]);
    }

    #[test]
    fn zero_saturation_averages_channels() {
        let mut out = [3.0, 6.0, 9.0];
        apply_color_augment(&mut out, 1, 3, 3, [0.0; 3], [0.0; 3], 1.0, 0.0);
        // a = 0, b = 1/3: every channel becomes the channel mean.
        assert_eq!(out, [6.0, 6.0, 6.0]);
    }

    #[test]
    fn grayscale_broadcast_fills_three_planes() {
        let mut out = [5.0, 7.0, 0.0, 0.0, 0.0, 0.0];
        apply_color_augment(&mut out, 2, 3, 1, [0.0; 3], [0.0; 3], 1.0, 1.0);
        assert_eq!(out, [5.0, 7.0, 5.0, 7.0, 5.0, 7.0]);
    }

    #[test]
    fn single_channel_contrast_pulls_toward_mean() {
        let mut out = [0.0, 4.0];
        apply_color_augment(&mut out, 2, 1, 1, [0.0; 3], [0.0; 3], 0.5, 1.0);
        // dv = -(1 - 0.5) * mean = -1; out = 0.5 * (v - 1).
        assert_eq!(out, [-0.5, 1.5]);
    }
}
