//! Detection and anonymization stage.
//!
//! `FrameProcessor` runs the shared face detector on a frame and produces
//! the blurred public copy alongside the filtered detection list. The raw
//! frame is never modified; the blur is applied in place on an independent
//! copy, so no original pixels survive inside a blurred region.

mod blur;

pub use blur::gaussian_kernel_1d;

use anyhow::{anyhow, Result};
use std::sync::Arc;

use crate::detect::{Detection, SharedDetector};
use crate::frame::Frame;

/// Padding applied around each detection rectangle before blurring,
/// as a fraction of the box size per side.
const PAD_RATIO: f64 = 0.15;

/// Output of one processing pass.
pub struct Processed {
    /// Independent copy with every face region irreversibly blurred.
    pub blurred: Frame,
    /// Detections at or above the configured confidence threshold.
    pub detections: Vec<Detection>,
}

pub struct FrameProcessor {
    detector: Arc<SharedDetector>,
    kernel: Vec<f32>,
    confidence_threshold: f32,
    roi_buf: Vec<u8>,
    blur_temp: Vec<f32>,
}

impl FrameProcessor {
    pub fn new(
        detector: Arc<SharedDetector>,
        blur_kernel: usize,
        confidence_threshold: f32,
    ) -> Result<Self> {
        if blur_kernel < 3 || blur_kernel % 2 == 0 {
            return Err(anyhow!("blur kernel must be an odd integer >= 3"));
        }
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(anyhow!("confidence threshold must be within [0, 1]"));
        }
        Ok(Self {
            detector,
            kernel: gaussian_kernel_1d(blur_kernel),
            confidence_threshold,
            roi_buf: Vec::new(),
            blur_temp: Vec::new(),
        })
    }

    /// Detect faces and produce the blurred public copy.
    pub fn process(&mut self, frame: &Frame) -> Result<Processed> {
        let mut detections = self.detector.detect(frame)?;
        detections.retain(|d| {
            d.confidence >= self.confidence_threshold && d.in_bounds(frame.width(), frame.height())
        });

        let mut blurred = frame.clone();
        for det in &detections {
            self.blur_region(&mut blurred, det);
        }

        Ok(Processed {
            blurred,
            detections,
        })
    }

    /// Blur one padded detection rectangle in place.
    ///
    /// Padded rectangles may overlap; blur-of-blur is still blurred, so
    /// overlap needs no bookkeeping.
    fn blur_region(&mut self, frame: &mut Frame, det: &Detection) {
        let fw = frame.width() as i32;
        let fh = frame.height() as i32;

        let (bw, bh) = det.size();
        let pad_x = (bw as f64 * PAD_RATIO) as i32;
        let pad_y = (bh as f64 * PAD_RATIO) as i32;

        let x1 = (det.x1 - pad_x).max(0);
        let y1 = (det.y1 - pad_y).max(0);
        let x2 = (det.x2 + pad_x).min(fw);
        let y2 = (det.y2 + pad_y).min(fh);

        if x2 <= x1 || y2 <= y1 {
            return;
        }

        let (x, y) = (x1 as usize, y1 as usize);
        let (w, h) = ((x2 - x1) as usize, (y2 - y1) as usize);
        let frame_width = fw as usize;

        blur::extract_roi(frame.data(), frame_width, x, y, w, h, &mut self.roi_buf);
        blur::separable_blur_in_place(&mut self.roi_buf, w, h, &self.kernel, &mut self.blur_temp);
        blur::write_roi_back(frame.data_mut(), frame_width, x, y, w, h, &self.roi_buf);
    }
}
