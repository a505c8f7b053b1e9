//! Per-camera capture and processing loop.
//!
//! Each camera runs one dedicated worker thread through a small state
//! machine: Connecting (open with exponential backoff), Online (read,
//! process, fan out to both output paths), Offline (feed lost, reopen
//! after a pause). A shutdown flag is checked every iteration and inside
//! every sleep, so stop latency is bounded by the source read timeout.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::evidence::EvidenceManager;
use crate::frame::Frame;
use crate::ingest::{FrameSource, SourceSpec};
use crate::processor::FrameProcessor;
use crate::recorder::PublicRecorder;
use crate::status::{CameraState, CameraStatus, LatestFrameSlot};

/// Bound on a single source read; also bounds shutdown latency.
pub const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Consecutive read failures before the feed is declared lost.
const MAX_READ_FAILURES: u32 = 5;

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Pause before reopening a lost feed.
const OFFLINE_PAUSE: Duration = Duration::from_secs(2);

/// Preview JPEG quality for the streaming slot.
const PREVIEW_JPEG_QUALITY: u8 = 80;

pub struct CameraWorker {
    index: usize,
    spec: SourceSpec,
    resolution: (u32, u32),
    source: Box<dyn FrameSource>,
    processor: FrameProcessor,
    recorder: PublicRecorder,
    evidence: EvidenceManager,
    status: Arc<CameraStatus>,
    slot: Arc<LatestFrameSlot>,
    shutdown: Arc<AtomicBool>,
}

impl CameraWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: usize,
        spec: SourceSpec,
        resolution: (u32, u32),
        source: Box<dyn FrameSource>,
        processor: FrameProcessor,
        recorder: PublicRecorder,
        evidence: EvidenceManager,
        status: Arc<CameraStatus>,
        slot: Arc<LatestFrameSlot>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            index,
            spec,
            resolution,
            source,
            processor,
            recorder,
            evidence,
            status,
            slot,
            shutdown,
        }
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        let name = format!("camera-{}", self.index);
        std::thread::Builder::new().name(name).spawn(move || self.run())
    }

    pub fn run(mut self) {
        let mut backoff = BACKOFF_INITIAL;
        let mut consecutive_failures = 0u32;
        let mut connected = false;

        while !self.shutdown.load(Ordering::Relaxed) {
            if !connected {
                self.status.set_state(CameraState::Connecting);
                log::info!("[cam {}] connecting to {}", self.index, self.spec);
                match self.source.connect() {
                    Ok(()) => {
                        connected = true;
                        consecutive_failures = 0;
                        self.status.set_state(CameraState::Online);
                        log::info!("AUDIT: camera {} ({}) connected", self.index, self.spec);
                    }
                    Err(e) => {
                        log::warn!(
                            "[cam {}] connection failed ({}), retrying in {:?}",
                            self.index,
                            e,
                            backoff
                        );
                        self.sleep_interruptible(backoff);
                        backoff = (backoff * 2).min(BACKOFF_CAP);
                        continue;
                    }
                }
            }

            match self.source.read_frame(READ_TIMEOUT) {
                Ok(frame) => {
                    consecutive_failures = 0;
                    backoff = BACKOFF_INITIAL;
                    if let Err(e) = self.process_tick(frame) {
                        log::error!("[cam {}] processing error: {}", self.index, e);
                        self.sleep_interruptible(Duration::from_secs(2));
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    if consecutive_failures < MAX_READ_FAILURES {
                        log::debug!(
                            "[cam {}] read failure {}/{}: {}",
                            self.index,
                            consecutive_failures,
                            MAX_READ_FAILURES,
                            e
                        );
                        continue;
                    }

                    log::error!("[cam {}] feed lost: {}", self.index, e);
                    log::info!("AUDIT: camera {} ({}) connection lost", self.index, self.spec);

                    // Finalize both outputs immediately so the segments
                    // written so far are viewable.
                    self.recorder.rotate();
                    self.evidence.flush();

                    self.source.close();
                    connected = false;
                    consecutive_failures = 0;
                    self.status.set_state(CameraState::Offline);
                    self.sleep_interruptible(OFFLINE_PAUSE);
                }
            }
        }

        self.drain();
    }

    /// One Online tick: conform, process, fan out, publish preview.
    fn process_tick(&mut self, frame: Frame) -> Result<()> {
        let (width, height) = self.resolution;
        let frame = frame.conform(width, height)?;

        let processed = self.processor.process(&frame)?;

        self.recorder.write(&processed.blurred, &processed.detections)?;

        let sync_stamp = self.recorder.segment_stamp().map(|s| s.to_string());
        self.evidence
            .add_frame(&frame, &processed.detections, sync_stamp.as_deref())?;

        let preview = processed.blurred.to_jpeg(PREVIEW_JPEG_QUALITY)?;
        self.slot.store(preview);

        self.status.record_frame(frame.capture.wall);
        self.status.record_detections(processed.detections.len());
        Ok(())
    }

    fn drain(mut self) {
        log::info!("[cam {}] draining", self.index);
        self.recorder.close();
        self.evidence.close();
        self.source.close();
        self.status.set_state(CameraState::Offline);
        log::info!("[cam {}] stopped", self.index);
    }

    /// Sleep in short slices so shutdown is honored mid-wait.
    fn sleep_interruptible(&self, total: Duration) {
        let slice = Duration::from_millis(100);
        let mut remaining = total;
        while remaining > Duration::ZERO {
            if self.shutdown.load(Ordering::Relaxed) {
                return;
            }
            let step = remaining.min(slice);
            std::thread::sleep(step);
            remaining -= step;
        }
    }
}
