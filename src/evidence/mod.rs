//! Encrypted evidence recording.
//!
//! The evidence manager buffers raw (pre-blur) frames under
//! selective-recording rules, then hands closed segments to a background
//! worker that serializes, encrypts through the vault, and writes the
//! container atomically. The camera loop never blocks on encryption or
//! disk.
//!
//! Selective recording keeps a pre-roll ring of recent no-detection frames;
//! when a detection starts a new segment the ring is drained in front of it
//! so the archive carries context. The flush queue is bounded and drops the
//! oldest queued job when the disk cannot keep up: the most recent window
//! is worth more than stale ones.

mod codec;

pub use codec::{decode_package, encode_package, FrameRecord, SegmentMeta};

use anyhow::Result;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::detect::Detection;
use crate::frame::Frame;
use crate::status::CameraStatus;
use crate::storage::compact_stamp;
use crate::vault::Vault;

/// Hard deadline for draining the flush queue on close.
const CLOSE_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct EvidenceConfig {
    pub output_dir: PathBuf,
    pub camera_tag: String,
    pub segment_seconds: u64,
    pub detection_only: bool,
    pub jpeg_quality: u8,
    pub pre_roll_size: usize,
    pub flush_queue_capacity: usize,
}

/// A closed segment awaiting encryption.
struct FlushJob {
    records: Vec<FrameRecord>,
    meta: SegmentMeta,
    stamp: String,
    seq: u32,
}

impl FlushJob {
    fn describe(&self) -> String {
        format!(
            "{} seq {:04} ({} frames, {:.0}..{:.0})",
            self.meta.camera_id, self.seq, self.meta.frame_count, self.meta.start_ts, self.meta.end_ts
        )
    }
}

/// Persistence seam between the flush worker and the vault, so tests can
/// substitute slow or failing sinks.
pub trait EvidenceSink: Send + Sync + 'static {
    fn persist(&self, payload: &[u8], meta_json: &[u8], path: &Path) -> Result<()>;
}

/// Production sink: encrypt through the vault, write atomically.
pub struct VaultSink {
    vault: Arc<Vault>,
}

impl VaultSink {
    pub fn new(vault: Arc<Vault>) -> Self {
        Self { vault }
    }
}

impl EvidenceSink for VaultSink {
    fn persist(&self, payload: &[u8], meta_json: &[u8], path: &Path) -> Result<()> {
        self.vault.seal_to_file(payload, meta_json, path)
    }
}

/// Bounded single-consumer job queue with a drop-oldest producer policy.
struct FlushQueue {
    capacity: usize,
    inner: Mutex<FlushQueueInner>,
    cond: Condvar,
}

struct FlushQueueInner {
    jobs: VecDeque<FlushJob>,
    closed: bool,
}

impl FlushQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(FlushQueueInner {
                jobs: VecDeque::new(),
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Enqueue a job, evicting the oldest queued job when full.
    /// Returns the evicted job, if any.
    fn push(&self, job: FlushJob) -> Option<FlushJob> {
        let mut inner = self.inner.lock().expect("flush queue poisoned");
        let evicted = if inner.jobs.len() >= self.capacity {
            inner.jobs.pop_front()
        } else {
            None
        };
        inner.jobs.push_back(job);
        drop(inner);
        self.cond.notify_one();
        evicted
    }

    /// Blocking pop; returns `None` once closed and empty.
    fn pop(&self) -> Option<FlushJob> {
        let mut inner = self.inner.lock().expect("flush queue poisoned");
        loop {
            if let Some(job) = inner.jobs.pop_front() {
                return Some(job);
            }
            if inner.closed {
                return None;
            }
            inner = self.cond.wait(inner).expect("flush queue poisoned");
        }
    }

    fn close(&self) {
        self.inner.lock().expect("flush queue poisoned").closed = true;
        self.cond.notify_all();
    }

    fn is_empty(&self) -> bool {
        self.inner.lock().expect("flush queue poisoned").jobs.is_empty()
    }

    /// Remove and return everything still queued (deadline handling).
    fn drain(&self) -> Vec<FlushJob> {
        let mut inner = self.inner.lock().expect("flush queue poisoned");
        inner.jobs.drain(..).collect()
    }
}

pub struct EvidenceManager {
    cfg: EvidenceConfig,
    status: Arc<CameraStatus>,
    pre_roll: VecDeque<FrameRecord>,
    buffer: Vec<FrameRecord>,
    buffer_stamp: Option<String>,
    seq: u32,
    queue: Arc<FlushQueue>,
    worker: Option<JoinHandle<()>>,
}

impl EvidenceManager {
    pub fn new(cfg: EvidenceConfig, vault: Arc<Vault>, status: Arc<CameraStatus>) -> Result<Self> {
        Self::with_sink(cfg, Arc::new(VaultSink::new(vault)), status)
    }

    pub fn with_sink(
        cfg: EvidenceConfig,
        sink: Arc<dyn EvidenceSink>,
        status: Arc<CameraStatus>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&cfg.output_dir)?;

        let queue = Arc::new(FlushQueue::new(cfg.flush_queue_capacity));
        let worker = {
            let queue = Arc::clone(&queue);
            let status = Arc::clone(&status);
            let output_dir = cfg.output_dir.clone();
            let tag = cfg.camera_tag.clone();
            std::thread::Builder::new()
                .name(format!("evidence-{}", cfg.camera_tag))
                .spawn(move || flush_worker_loop(queue, sink, status, output_dir, tag))?
        };

        Ok(Self {
            cfg,
            status,
            pre_roll: VecDeque::new(),
            buffer: Vec::new(),
            buffer_stamp: None,
            seq: 0,
            queue,
            worker: Some(worker),
        })
    }

    /// Buffer one raw frame under the selective-recording rules.
    ///
    /// `sync_stamp` is the public recorder's current segment stamp; when a
    /// new evidence buffer starts it adopts that stamp so the evidence file
    /// pairs with the public segment by filename.
    pub fn add_frame(
        &mut self,
        frame: &Frame,
        detections: &[Detection],
        sync_stamp: Option<&str>,
    ) -> Result<()> {
        let ts = frame.capture.wall;
        let record = FrameRecord {
            jpeg: frame.to_jpeg(self.cfg.jpeg_quality)?,
            detections: detections.to_vec(),
            ts,
        };

        if self.cfg.detection_only {
            if detections.is_empty() && self.buffer.is_empty() {
                // Idle: context only.
                self.pre_roll.push_back(record);
                while self.pre_roll.len() > self.cfg.pre_roll_size {
                    self.pre_roll.pop_front();
                }
                return Ok(());
            }
            if !detections.is_empty() && self.buffer.is_empty() {
                // Segment starts: pre-roll becomes its head.
                self.buffer.extend(self.pre_roll.drain(..));
            }
            // Buffer already active: append regardless of this frame's
            // detections; pre-roll is only consumed on the empty->non-empty
            // transition.
        }

        if self.buffer_stamp.is_none() {
            let stamp_ts = self.buffer.first().map(|r| r.ts).unwrap_or(ts);
            self.buffer_stamp = Some(match sync_stamp {
                Some(stamp) => stamp.to_string(),
                None => compact_stamp(stamp_ts),
            });
        }

        self.buffer.push(record);

        let segment_start = self.buffer[0].ts;
        if ts - segment_start >= self.cfg.segment_seconds as f64 {
            self.flush();
        }
        Ok(())
    }

    /// Hand the active buffer to the background worker.
    pub fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let records = std::mem::take(&mut self.buffer);
        let stamp = self
            .buffer_stamp
            .take()
            .unwrap_or_else(|| compact_stamp(records[0].ts));
        let meta = SegmentMeta::from_records(&records, &self.cfg.camera_tag);
        let seq = self.seq;
        self.seq += 1;

        let job = FlushJob {
            records,
            meta,
            stamp,
            seq,
        };
        if let Some(evicted) = self.queue.push(job) {
            self.status.add_evidence_drop();
            log::warn!(
                "[{}] flush queue full, dropped oldest segment: {}",
                self.cfg.camera_tag,
                evicted.describe()
            );
        }
    }

    /// Number of frames in the active buffer.
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Number of frames in the pre-roll ring.
    pub fn pre_roll_len(&self) -> usize {
        self.pre_roll.len()
    }

    /// Flush remaining data and stop the background worker.
    ///
    /// Waits up to 30 seconds for queued segments to reach disk; anything
    /// later is logged as dropped with its metadata.
    pub fn close(&mut self) {
        self.flush();
        self.queue.close();

        if let Some(worker) = self.worker.take() {
            let deadline = Instant::now() + CLOSE_DEADLINE;
            while !worker.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(20));
            }
            if worker.is_finished() {
                let _ = worker.join();
            } else {
                for job in self.queue.drain() {
                    self.status.add_evidence_drop();
                    log::error!(
                        "[{}] shutdown deadline exceeded, dropping segment: {}",
                        self.cfg.camera_tag,
                        job.describe()
                    );
                }
            }
        }
        log::info!("[{}] evidence manager closed", self.cfg.camera_tag);
    }
}

impl Drop for EvidenceManager {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.close();
        }
    }
}

fn flush_worker_loop(
    queue: Arc<FlushQueue>,
    sink: Arc<dyn EvidenceSink>,
    status: Arc<CameraStatus>,
    output_dir: PathBuf,
    tag: String,
) {
    while let Some(job) = queue.pop() {
        let filename = format!("evidence_{}_{}_{:04}.enc", tag, job.stamp, job.seq);
        let path = output_dir.join(&filename);

        let result = codec::encode_package(&job.records, &job.meta)
            .and_then(|payload| {
                let meta_json = serde_json::to_vec(&job.meta)?;
                sink.persist(&payload, &meta_json, &path)?;
                Ok(payload.len())
            });

        match result {
            Ok(payload_len) => {
                log::info!(
                    "[{}] saved evidence: {} ({} frames, {:.1} KB)",
                    tag,
                    filename,
                    job.meta.frame_count,
                    payload_len as f64 / 1024.0
                );
            }
            Err(e) => {
                status.record_flush_error(format!("{}: {}", filename, e));
                log::error!("[{}] evidence flush failed for {}: {}", tag, filename, e);
            }
        }
    }
}
