use anyhow::{anyhow, Result};
use std::sync::Mutex;

use crate::detect::Detection;
use crate::frame::Frame;

/// Detector execution target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Device {
    Cpu,
    #[default]
    Cuda,
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Device {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" => Ok(Device::Cuda),
            other => Err(anyhow!("unknown device: {}", other)),
        }
    }
}

/// Face detector backend trait.
///
/// Implementations receive decoded RGB8 pixels and return face bounding
/// boxes with confidence, already NMS-deduplicated at the configured IoU.
/// The pixel slice is read-only and ephemeral; backends must not retain it
/// beyond the `detect` call.
pub trait FaceDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run face detection on a frame.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook (model load, first inference).
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Thread-safe wrapper around a single detector instance.
///
/// One detector is shared by every camera worker. Backends are not required
/// to be internally thread-safe, so calls are serialized through a mutex;
/// workers treat detection as a short critical section.
pub struct SharedDetector {
    inner: Mutex<Box<dyn FaceDetector>>,
    name: &'static str,
}

impl SharedDetector {
    pub fn new(mut backend: Box<dyn FaceDetector>) -> Result<Self> {
        backend.warm_up()?;
        let name = backend.name();
        Ok(Self {
            inner: Mutex::new(backend),
            name,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut backend = self
            .inner
            .lock()
            .map_err(|_| anyhow!("detector mutex poisoned"))?;
        backend.detect(frame.data(), frame.width(), frame.height())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubBackend;
    use crate::frame::{CaptureTs, CHANNELS};

    #[test]
    fn device_parses_case_insensitively() {
        assert_eq!("CPU".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!(" cuda ".parse::<Device>().unwrap(), Device::Cuda);
        assert!("tpu".parse::<Device>().is_err());
    }

    #[test]
    fn shared_detector_serves_multiple_threads() -> Result<()> {
        use std::sync::Arc;

        let detector = Arc::new(SharedDetector::new(Box::new(StubBackend::every_nth(1)))?);
        let mut handles = Vec::new();
        for _ in 0..4 {
            let detector = Arc::clone(&detector);
            handles.push(std::thread::spawn(move || {
                let frame = Frame::new(
                    vec![0u8; 64 * 64 * CHANNELS],
                    64,
                    64,
                    CaptureTs::now(),
                );
                detector.detect(&frame).map(|d| d.len())
            }));
        }
        for handle in handles {
            assert_eq!(handle.join().unwrap()?, 1);
        }
        Ok(())
    }
}
