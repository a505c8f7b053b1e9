//! Stub face detector for tests and model-less deployments.

use anyhow::Result;
use std::collections::VecDeque;

use crate::detect::{Detection, DetectionClass, FaceDetector};
use crate::frame::wall_clock_secs;

/// Scripted detector backend.
///
/// Two modes:
/// - `every_nth(n)`: reports one centered face on every n-th frame, which
///   gives the daemon a realistic detection rhythm without a model.
/// - `scripted(pattern)`: consumes a fixed yes/no pattern, one entry per
///   `detect` call, then reports nothing. Used by the pipeline tests.
pub struct StubBackend {
    every_nth: u64,
    script: Option<VecDeque<bool>>,
    frame_count: u64,
    confidence: f32,
}

impl StubBackend {
    pub fn every_nth(n: u64) -> Self {
        Self {
            every_nth: n.max(1),
            script: None,
            frame_count: 0,
            confidence: 0.9,
        }
    }

    pub fn scripted(pattern: impl IntoIterator<Item = bool>) -> Self {
        Self {
            every_nth: 0,
            script: Some(pattern.into_iter().collect()),
            frame_count: 0,
            confidence: 0.9,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    fn fires(&mut self) -> bool {
        if let Some(script) = self.script.as_mut() {
            return script.pop_front().unwrap_or(false);
        }
        self.frame_count % self.every_nth == 0
    }

    fn centered_box(&self, width: u32, height: u32) -> Detection {
        // A face-sized box around the frame center.
        let w = (width / 6).max(2) as i32;
        let h = (height / 5).max(2) as i32;
        let cx = width as i32 / 2;
        let cy = height as i32 / 2;
        Detection {
            x1: cx - w / 2,
            y1: cy - h / 2,
            x2: cx + w / 2,
            y2: cy + h / 2,
            confidence: self.confidence,
            class: DetectionClass::Face,
            ts: wall_clock_secs(),
        }
    }
}

impl FaceDetector for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>> {
        self.frame_count += 1;
        if self.fires() {
            Ok(vec![self.centered_box(width, height)])
        } else {
            Ok(Vec::new())
        }
    }
}
