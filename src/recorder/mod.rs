//! Public (blurred) video recording with time-sliced segments.
//!
//! The recorder appends frames to the currently open segment and rotates
//! when the wall-clock duration budget is reached. Rotation never blocks
//! the camera loop: the old encoder is handed to a background finalize
//! thread and a new one is opened synchronously with a fresh timestamp.
//!
//! Codecs are tried in a fixed preference order. Only `MJPG` ships
//! built-in (pure-Rust AVI writer); the better codecs come from an
//! injected `EncoderFactory` backed by whatever codec library the
//! deployment links. A segment's codec choice is fixed for its lifetime,
//! and an MJPG segment switches the container extension to `.avi`.

mod mjpeg;

pub use mjpeg::MjpegAviWriter;

use anyhow::{anyhow, Result};
use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::detect::{Detection, DetectionClass};
use crate::frame::Frame;
use crate::status::CameraStatus;
use crate::storage::compact_stamp;

/// Codec preference, best first. The first codec whose encoder opens wins.
pub const CODEC_PREFERENCE: [&str; 4] = ["avc1", "X264", "mp4v", "MJPG"];

/// Wait budget for the finalize worker during close.
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(10);

/// Container extension for a codec. MJPEG cannot live in an MP4 container.
pub fn extension_for(codec: &str) -> &'static str {
    if codec == "MJPG" {
        "avi"
    } else {
        "mp4"
    }
}

/// One open segment encoder (the Encoder capability).
pub trait SegmentEncoder: Send {
    fn write(&mut self, frame: &Frame) -> Result<()>;
    fn finish(self: Box<Self>) -> Result<()>;
}

impl SegmentEncoder for MjpegAviWriter {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        self.write_frame(frame)
    }

    fn finish(self: Box<Self>) -> Result<()> {
        MjpegAviWriter::finish(*self)
    }
}

/// Opens encoders for a requested codec, or fails so the recorder falls
/// through to the next preference.
pub trait EncoderFactory: Send + Sync {
    fn open(
        &self,
        codec: &str,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Box<dyn SegmentEncoder>>;
}

/// Built-in factory: supports only the MJPG fallback. Deployments with a
/// real codec library inject their own factory for the H.264/MPEG-4 tiers.
pub struct DefaultEncoderFactory {
    jpeg_quality: u8,
}

impl DefaultEncoderFactory {
    pub fn new() -> Self {
        Self { jpeg_quality: 85 }
    }
}

impl Default for DefaultEncoderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderFactory for DefaultEncoderFactory {
    fn open(
        &self,
        codec: &str,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Box<dyn SegmentEncoder>> {
        match codec {
            "MJPG" => Ok(Box::new(MjpegAviWriter::create(
                path,
                width,
                height,
                fps,
                self.jpeg_quality,
            )?)),
            other => Err(anyhow!("codec {} not available", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RecorderConfig {
    pub output_dir: PathBuf,
    pub camera_tag: String,
    pub fps: u32,
    pub segment_seconds: u64,
    pub width: u32,
    pub height: u32,
}

/// A detection event in the sidecar metadata: frame index plus the classes
/// seen on that frame.
#[derive(Clone, Debug, Serialize)]
struct DetectionEvent {
    f: u32,
    c: Vec<&'static str>,
}

#[derive(Serialize)]
struct SidecarMeta<'a> {
    filename: &'a str,
    fps: u32,
    total_frames: u32,
    detections: &'a [DetectionEvent],
}

struct ActiveSegment {
    encoder: Box<dyn SegmentEncoder>,
    path: PathBuf,
    stamp: String,
    codec: &'static str,
    /// Wall-clock time of the segment's first frame.
    opened_wall: f64,
    frame_count: u32,
    detection_events: Vec<DetectionEvent>,
}

struct FinalizeJob {
    encoder: Box<dyn SegmentEncoder>,
    path: PathBuf,
    fps: u32,
    frame_count: u32,
    detection_events: Vec<DetectionEvent>,
}

pub struct PublicRecorder {
    cfg: RecorderConfig,
    factory: Arc<dyn EncoderFactory>,
    status: Arc<CameraStatus>,
    active: Option<ActiveSegment>,
    finalize_tx: Option<Sender<FinalizeJob>>,
    worker: Option<JoinHandle<()>>,
}

impl PublicRecorder {
    pub fn new(
        cfg: RecorderConfig,
        factory: Arc<dyn EncoderFactory>,
        status: Arc<CameraStatus>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&cfg.output_dir)?;

        let (tx, rx) = crossbeam_channel::unbounded::<FinalizeJob>();
        let tag = cfg.camera_tag.clone();
        let worker = std::thread::Builder::new()
            .name(format!("finalize-{}", cfg.camera_tag))
            .spawn(move || finalize_worker_loop(rx, tag))?;

        Ok(Self {
            cfg,
            factory,
            status,
            active: None,
            finalize_tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Append a blurred frame to the current segment, rotating first when
    /// the duration budget is spent.
    pub fn write(&mut self, frame: &Frame, detections: &[Detection]) -> Result<()> {
        let now_wall = frame.capture.wall;

        if self
            .active
            .as_ref()
            .map(|seg| now_wall - seg.opened_wall >= self.cfg.segment_seconds as f64)
            .unwrap_or(false)
        {
            self.rotate();
        }

        if self.active.is_none() {
            match self.open_segment(now_wall) {
                Ok(segment) => self.active = Some(segment),
                Err(e) => {
                    self.status.add_write_error();
                    log::error!("[{}] cannot open segment: {}", self.cfg.camera_tag, e);
                    return Ok(());
                }
            }
        }

        let write_result = self
            .active
            .as_mut()
            .expect("segment just opened")
            .encoder
            .write(frame);
        if let Err(e) = write_result {
            // Encoder died mid-segment: close it out, count the failure,
            // and start over with a fresh timestamp on the next frame.
            self.status.add_write_error();
            if let Some(segment) = &self.active {
                log::error!(
                    "[{}] encoder failure on {}: {}",
                    self.cfg.camera_tag,
                    segment.path.display(),
                    e
                );
            }
            self.rotate();
            return Ok(());
        }

        let segment = self.active.as_mut().expect("segment just opened");
        if !detections.is_empty() {
            let mut classes: Vec<&'static str> = detections
                .iter()
                .map(|d| match d.class {
                    DetectionClass::Face => "face",
                })
                .collect();
            classes.sort_unstable();
            classes.dedup();
            let frame_index = segment.frame_count;
            segment.detection_events.push(DetectionEvent {
                f: frame_index,
                c: classes,
            });
        }
        segment.frame_count += 1;
        Ok(())
    }

    /// Stamp of the currently open segment, used to pair evidence
    /// filenames with the public file.
    pub fn segment_stamp(&self) -> Option<&str> {
        self.active.as_ref().map(|seg| seg.stamp.as_str())
    }

    /// Codec chosen for the currently open segment.
    pub fn segment_codec(&self) -> Option<&'static str> {
        self.active.as_ref().map(|seg| seg.codec)
    }

    /// Hand the current segment to the finalize worker.
    pub fn rotate(&mut self) {
        if let Some(segment) = self.active.take() {
            let job = FinalizeJob {
                encoder: segment.encoder,
                path: segment.path,
                fps: self.cfg.fps,
                frame_count: segment.frame_count,
                detection_events: segment.detection_events,
            };
            if let Some(tx) = &self.finalize_tx {
                if tx.send(job).is_err() {
                    log::error!("[{}] finalize worker is gone", self.cfg.camera_tag);
                }
            }
        }
    }

    /// Finalize the open segment and stop the background worker.
    pub fn close(&mut self) {
        self.rotate();
        drop(self.finalize_tx.take());
        if let Some(worker) = self.worker.take() {
            let deadline = Instant::now() + FINALIZE_TIMEOUT;
            while !worker.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(20));
            }
            if worker.is_finished() {
                let _ = worker.join();
            } else {
                log::warn!(
                    "[{}] finalize worker still running after timeout",
                    self.cfg.camera_tag
                );
            }
        }
        log::info!("[{}] recorder closed", self.cfg.camera_tag);
    }

    fn open_segment(&self, now_wall: f64) -> Result<ActiveSegment> {
        let stamp = compact_stamp(now_wall);
        let mut last_err = anyhow!("no codec attempted");
        for codec in CODEC_PREFERENCE {
            let filename = format!(
                "public_{}_{}.{}",
                self.cfg.camera_tag,
                stamp,
                extension_for(codec)
            );
            let path = self.cfg.output_dir.join(&filename);
            match self.factory.open(
                codec,
                &path,
                self.cfg.width,
                self.cfg.height,
                self.cfg.fps,
            ) {
                Ok(encoder) => {
                    log::info!(
                        "[{}] recording: {} (codec: {})",
                        self.cfg.camera_tag,
                        filename,
                        codec
                    );
                    return Ok(ActiveSegment {
                        encoder,
                        path,
                        stamp,
                        codec,
                        opened_wall: now_wall,
                        frame_count: 0,
                        detection_events: Vec::new(),
                    });
                }
                Err(e) => {
                    log::debug!("[{}] codec {} unavailable: {}", self.cfg.camera_tag, codec, e);
                    last_err = e;
                }
            }
        }
        Err(anyhow!("all codecs failed, last error: {}", last_err))
    }
}

impl Drop for PublicRecorder {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.close();
        }
    }
}

fn finalize_worker_loop(rx: Receiver<FinalizeJob>, tag: String) {
    while let Ok(job) = rx.recv() {
        let FinalizeJob {
            encoder,
            path,
            fps,
            frame_count,
            detection_events,
        } = job;

        if let Err(e) = encoder.finish() {
            log::error!("[{}] finalize failed for {}: {}", tag, path.display(), e);
            continue;
        }
        log::info!(
            "[{}] finished: {} ({} frames)",
            tag,
            path.file_name().and_then(|n| n.to_str()).unwrap_or("?"),
            frame_count
        );

        if !detection_events.is_empty() {
            if let Err(e) = write_sidecar(&path, fps, frame_count, &detection_events) {
                log::error!("[{}] sidecar write failed for {}: {}", tag, path.display(), e);
            }
        }
    }
}

fn write_sidecar(
    video_path: &Path,
    fps: u32,
    frame_count: u32,
    events: &[DetectionEvent],
) -> Result<()> {
    let filename = video_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("segment path has no filename"))?;
    let meta = SidecarMeta {
        filename,
        fps,
        total_frames: frame_count,
        detections: events,
    };
    let sidecar_path = video_path.with_extension("json");
    std::fs::write(&sidecar_path, serde_json::to_vec_pretty(&meta)?)?;
    Ok(())
}
