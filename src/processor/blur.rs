//! Separable Gaussian blur over rectangular regions.

use crate::frame::CHANNELS;

/// Precompute a normalized 1-D Gaussian kernel.
///
/// `kernel_size` must be odd and >= 1. Sigma is derived as `size / 6.0`,
/// matching the OpenCV sigma=0 convention the rest of the stack assumes.
pub fn gaussian_kernel_1d(kernel_size: usize) -> Vec<f32> {
    debug_assert!(kernel_size >= 1 && kernel_size % 2 == 1);
    let sigma = kernel_size as f64 / 6.0;
    let half = (kernel_size / 2) as f64;
    let mut kernel: Vec<f64> = (0..kernel_size)
        .map(|i| {
            let x = i as f64 - half;
            (-x * x / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel.iter().map(|&v| v as f32).collect()
}

/// Blur `data` (an RGB8 region of `width` x `height`) in place with a
/// precomputed kernel, reusing `temp` across calls.
///
/// Horizontal then vertical pass with clamp-to-edge sampling. Applying the
/// blur again over an already-blurred region is harmless, so overlapping
/// face rectangles need no special casing.
pub fn separable_blur_in_place(
    data: &mut [u8],
    width: usize,
    height: usize,
    kernel: &[f32],
    temp: &mut Vec<f32>,
) {
    let kernel_size = kernel.len();
    if kernel_size <= 1 || width == 0 || height == 0 {
        return;
    }
    let half = kernel_size / 2;

    temp.resize(width * height * CHANNELS, 0.0);

    // Horizontal pass: data -> temp
    for y in 0..height {
        for x in 0..width {
            for c in 0..CHANNELS {
                let mut sum = 0.0f32;
                for (k, &w) in kernel.iter().enumerate() {
                    let sx = (x as isize + k as isize - half as isize)
                        .max(0)
                        .min((width - 1) as isize) as usize;
                    sum += data[(y * width + sx) * CHANNELS + c] as f32 * w;
                }
                temp[(y * width + x) * CHANNELS + c] = sum;
            }
        }
    }

    // Vertical pass: temp -> data
    for y in 0..height {
        for x in 0..width {
            for c in 0..CHANNELS {
                let mut sum = 0.0f32;
                for (k, &w) in kernel.iter().enumerate() {
                    let sy = (y as isize + k as isize - half as isize)
                        .max(0)
                        .min((height - 1) as isize) as usize;
                    sum += temp[(sy * width + x) * CHANNELS + c] * w;
                }
                data[(y * width + x) * CHANNELS + c] = sum.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

/// Copy a rectangular region out of a frame buffer into `roi`.
pub fn extract_roi(
    data: &[u8],
    frame_width: usize,
    x: usize,
    y: usize,
    w: usize,
    h: usize,
    roi: &mut Vec<u8>,
) {
    roi.resize(w * h * CHANNELS, 0);
    for row in 0..h {
        let src = ((y + row) * frame_width + x) * CHANNELS;
        let dst = row * w * CHANNELS;
        roi[dst..dst + w * CHANNELS].copy_from_slice(&data[src..src + w * CHANNELS]);
    }
}

/// Write a region buffer back into a frame buffer.
pub fn write_roi_back(
    data: &mut [u8],
    frame_width: usize,
    x: usize,
    y: usize,
    w: usize,
    h: usize,
    roi: &[u8],
) {
    for row in 0..h {
        let dst = ((y + row) * frame_width + x) * CHANNELS;
        let src = row * w * CHANNELS;
        data[dst..dst + w * CHANNELS].copy_from_slice(&roi[src..src + w * CHANNELS]);
    }
}
