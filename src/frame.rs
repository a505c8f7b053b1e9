//! Frame raster and capture timestamps.
//!
//! A `Frame` is a fixed-resolution RGB8 raster in row-major order, produced
//! by a `FrameSource` and consumed by exactly one camera worker. Format
//! conversion (JPEG, resampling) happens here so the pipeline stages treat
//! pixel data as opaque.

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Pixel channels per sample. The whole pipeline is RGB8.
pub const CHANNELS: usize = 3;

/// Capture timestamp pair: wall-clock seconds for filenames and evidence
/// records, monotonic instant for pacing and segment rotation.
#[derive(Clone, Copy, Debug)]
pub struct CaptureTs {
    /// Seconds since the Unix epoch.
    pub wall: f64,
    /// Monotonic capture instant.
    pub mono: Instant,
}

impl CaptureTs {
    pub fn now() -> Self {
        Self {
            wall: wall_clock_secs(),
            mono: Instant::now(),
        }
    }
}

/// Current wall-clock time as fractional seconds since the Unix epoch.
pub fn wall_clock_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// A single decoded video frame (RGB8, row-major).
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    /// Capture time, carried through both output paths.
    pub capture: CaptureTs,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, capture: CaptureTs) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * CHANNELS,
            "frame data length must equal width * height * 3"
        );
        Self {
            data,
            width,
            height,
            capture,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Encode this frame as JPEG at the given quality (1-100).
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
        encoder
            .encode(
                &self.data,
                self.width,
                self.height,
                image::ExtendedColorType::Rgb8,
            )
            .context("encode frame as jpeg")?;
        Ok(out)
    }

    /// Decode a JPEG byte buffer back into a frame.
    pub fn from_jpeg(bytes: &[u8], capture: CaptureTs) -> Result<Self> {
        let img = image::load_from_memory(bytes)
            .context("decode jpeg")?
            .to_rgb8();
        let (width, height) = img.dimensions();
        Ok(Self::new(img.into_raw(), width, height, capture))
    }

    /// Conform this frame to the canonical processing resolution.
    ///
    /// Center-crops the longer axis to the target aspect ratio, then
    /// resamples to exactly `target_w` x `target_h`. Downstream stages
    /// assume a fixed resolution per worker lifetime.
    pub fn conform(self, target_w: u32, target_h: u32) -> Result<Self> {
        if target_w == 0 || target_h == 0 {
            return Err(anyhow!("target resolution must be positive"));
        }
        if self.width == target_w && self.height == target_h {
            return Ok(self);
        }

        let capture = self.capture;
        let src_w = self.width;
        let src_h = self.height;
        let img = image::RgbImage::from_raw(src_w, src_h, self.data)
            .ok_or_else(|| anyhow!("frame buffer does not match dimensions"))?;

        let target_aspect = target_w as f64 / target_h as f64;
        let current_aspect = src_w as f64 / src_h as f64;

        let cropped = if (current_aspect - target_aspect).abs() > 0.01 {
            if current_aspect > target_aspect {
                // Wider than target: crop horizontally.
                let new_w = ((src_h as f64) * target_aspect) as u32;
                let new_w = new_w.clamp(1, src_w);
                let x_off = (src_w - new_w) / 2;
                image::imageops::crop_imm(&img, x_off, 0, new_w, src_h).to_image()
            } else {
                // Taller than target (4:3, portrait): crop vertically.
                let new_h = ((src_w as f64) / target_aspect) as u32;
                let new_h = new_h.clamp(1, src_h);
                let y_off = (src_h - new_h) / 2;
                image::imageops::crop_imm(&img, 0, y_off, src_w, new_h).to_image()
            }
        } else {
            img
        };

        let resized = if cropped.dimensions() == (target_w, target_h) {
            cropped
        } else {
            image::imageops::resize(&cropped, target_w, target_h, FilterType::Triangle)
        };

        Ok(Self::new(resized.into_raw(), target_w, target_h, capture))
    }
}
