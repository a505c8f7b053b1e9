//! Per-camera status shared between workers and the HTTP surface.
//!
//! Counters are atomics; the composite state (connection state, fps, last
//! frame time) sits behind a short-lived mutex. Workers mutate, the engine
//! snapshot reads. Snapshots are serializable for the status endpoint.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// EWMA smoothing factor for the fps estimate.
pub const FPS_SMOOTHING: f64 = 0.1;

/// How many recent flush error descriptions are retained.
const FLUSH_ERROR_RING: usize = 8;

/// Camera connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraState {
    Connecting,
    Online,
    Offline,
}

struct StatusClock {
    state: CameraState,
    fps_ewma: f64,
    last_frame_ts: f64,
    last_frame_instant: Option<Instant>,
}

pub struct CameraStatus {
    pub index: usize,
    pub source: String,
    pub camera_tag: String,
    clock: Mutex<StatusClock>,
    last_detection_count: AtomicUsize,
    frames_total: AtomicU64,
    write_errors: AtomicU64,
    evidence_drops: AtomicU64,
    flush_errors: AtomicU64,
    flush_error_ring: Mutex<VecDeque<String>>,
}

impl CameraStatus {
    pub fn new(index: usize, source: &str, camera_tag: &str) -> Self {
        Self {
            index,
            source: source.to_string(),
            camera_tag: camera_tag.to_string(),
            clock: Mutex::new(StatusClock {
                state: CameraState::Connecting,
                fps_ewma: 0.0,
                last_frame_ts: 0.0,
                last_frame_instant: None,
            }),
            last_detection_count: AtomicUsize::new(0),
            frames_total: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            evidence_drops: AtomicU64::new(0),
            flush_errors: AtomicU64::new(0),
            flush_error_ring: Mutex::new(VecDeque::new()),
        }
    }

    pub fn set_state(&self, state: CameraState) {
        self.clock.lock().expect("status poisoned").state = state;
    }

    pub fn state(&self) -> CameraState {
        self.clock.lock().expect("status poisoned").state
    }

    /// Record a processed frame: bumps the total and folds the
    /// instantaneous rate into the EWMA fps estimate.
    pub fn record_frame(&self, wall_ts: f64) {
        self.frames_total.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut clock = self.clock.lock().expect("status poisoned");
        if let Some(prev) = clock.last_frame_instant {
            let gap = now.duration_since(prev).as_secs_f64();
            if gap > 0.0 {
                let instantaneous = 1.0 / gap;
                clock.fps_ewma =
                    (1.0 - FPS_SMOOTHING) * clock.fps_ewma + FPS_SMOOTHING * instantaneous;
            }
        }
        clock.last_frame_instant = Some(now);
        clock.last_frame_ts = wall_ts;
    }

    pub fn record_detections(&self, count: usize) {
        self.last_detection_count.store(count, Ordering::Relaxed);
    }

    pub fn add_write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    pub fn add_evidence_drop(&self) {
        self.evidence_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn evidence_drops(&self) -> u64 {
        self.evidence_drops.load(Ordering::Relaxed)
    }

    pub fn record_flush_error(&self, description: String) {
        self.flush_errors.fetch_add(1, Ordering::Relaxed);
        let mut ring = self.flush_error_ring.lock().expect("status poisoned");
        ring.push_back(description);
        while ring.len() > FLUSH_ERROR_RING {
            ring.pop_front();
        }
    }

    pub fn flush_errors(&self) -> u64 {
        self.flush_errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CameraStatusSnapshot {
        let (state, fps_ewma, last_frame_ts) = {
            let clock = self.clock.lock().expect("status poisoned");
            (clock.state, clock.fps_ewma, clock.last_frame_ts)
        };
        CameraStatusSnapshot {
            index: self.index,
            source: self.source.clone(),
            camera_tag: self.camera_tag.clone(),
            state,
            fps_ewma,
            last_detection_count: self.last_detection_count.load(Ordering::Relaxed),
            last_frame_ts,
            frames_total: self.frames_total.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            evidence_drops: self.evidence_drops.load(Ordering::Relaxed),
            flush_errors: self.flush_errors.load(Ordering::Relaxed),
            recent_flush_errors: self
                .flush_error_ring
                .lock()
                .expect("status poisoned")
                .iter()
                .cloned()
                .collect(),
        }
    }
}

/// Point-in-time copy of a camera's status, safe to serialize.
#[derive(Clone, Debug, Serialize)]
pub struct CameraStatusSnapshot {
    pub index: usize,
    pub source: String,
    pub camera_tag: String,
    pub state: CameraState,
    pub fps_ewma: f64,
    pub last_detection_count: usize,
    pub last_frame_ts: f64,
    pub frames_total: u64,
    pub write_errors: u64,
    pub evidence_drops: u64,
    pub flush_errors: u64,
    pub recent_flush_errors: Vec<String>,
}

/// Most recent preview JPEG for one camera.
#[derive(Clone, Debug)]
pub struct PreviewFrame {
    pub jpeg: Vec<u8>,
    pub seq: u64,
}

/// Newest-wins single-slot buffer feeding the streaming surface.
///
/// The worker overwrites under a short mutex with an incremented sequence
/// number; readers clone and release. A slow consumer never back-pressures
/// the worker, and readers never observe a torn frame.
pub struct LatestFrameSlot {
    inner: Mutex<Option<PreviewFrame>>,
}

impl LatestFrameSlot {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    pub fn store(&self, jpeg: Vec<u8>) {
        let mut slot = self.inner.lock().expect("frame slot poisoned");
        let seq = slot.as_ref().map(|f| f.seq + 1).unwrap_or(1);
        *slot = Some(PreviewFrame { jpeg, seq });
    }

    pub fn latest(&self) -> Option<PreviewFrame> {
        self.inner.lock().expect("frame slot poisoned").clone()
    }
}

impl Default for LatestFrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_is_newest_wins_with_increasing_seq() {
        let slot = LatestFrameSlot::new();
        assert!(slot.latest().is_none());
        slot.store(vec![1]);
        slot.store(vec![2]);
        let latest = slot.latest().unwrap();
        assert_eq!(latest.jpeg, vec![2]);
        assert_eq!(latest.seq, 2);
    }

    #[test]
    fn flush_error_ring_is_bounded() {
        let status = CameraStatus::new(0, "0", "cam0");
        for i in 0..20 {
            status.record_flush_error(format!("err {}", i));
        }
        let snapshot = status.snapshot();
        assert_eq!(snapshot.flush_errors, 20);
        assert_eq!(snapshot.recent_flush_errors.len(), 8);
        assert_eq!(snapshot.recent_flush_errors[0], "err 12");
    }

    #[test]
    fn fps_ewma_converges_toward_rate() {
        let status = CameraStatus::new(0, "0", "cam0");
        for _ in 0..50 {
            status.record_frame(1.0);
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let fps = status.snapshot().fps_ewma;
        // ~200 Hz nominal; generous bounds since CI timers jitter.
        assert!(fps > 20.0, "fps_ewma {}", fps);
    }

    #[test]
    fn state_transitions_are_visible() {
        let status = CameraStatus::new(0, "rtsp://cam", "rtsp");
        assert_eq!(status.state(), CameraState::Connecting);
        status.set_state(CameraState::Online);
        assert_eq!(status.state(), CameraState::Online);
    }
}
