//! System orchestration.
//!
//! The engine owns the vault, the shared detector, and one set of
//! per-camera components (worker thread, public recorder, evidence
//! manager, latest-frame slot, status). It is a plain value owned by the
//! caller; the HTTP surface interacts with it only through the snapshot
//! accessors below.

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::detect::{SharedDetector, StubBackend};
use crate::evidence::{
    decode_package, EvidenceConfig, EvidenceManager, FrameRecord, SegmentMeta,
};
use crate::ingest::{DefaultSourceFactory, SourceFactory};
use crate::processor::FrameProcessor;
use crate::recorder::{DefaultEncoderFactory, EncoderFactory, PublicRecorder, RecorderConfig};
use crate::status::{CameraStatus, CameraStatusSnapshot, LatestFrameSlot, PreviewFrame};
use crate::storage::{list_evidence, list_public, RecordingEntry, StorageJanitor};
use crate::vault::{Unsealed, Vault};
use crate::worker::CameraWorker;

/// Interval between storage janitor sweeps.
const JANITOR_INTERVAL: Duration = Duration::from_secs(60);

/// Startup failure: none of the configured camera sources could be
/// instantiated. Maps to its own exit code in the daemon.
#[derive(Debug)]
pub struct NoCameraSources;

impl std::fmt::Display for NoCameraSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no camera sources could be opened")
    }
}

impl std::error::Error for NoCameraSources {}

struct CameraHandle {
    status: Arc<CameraStatus>,
    slot: Arc<LatestFrameSlot>,
    worker: Option<JoinHandle<()>>,
}

pub struct Engine {
    cfg: EngineConfig,
    detector: Arc<SharedDetector>,
    source_factory: Arc<dyn SourceFactory>,
    encoder_factory: Arc<dyn EncoderFactory>,
    vault: Option<Arc<Vault>>,
    cameras: Vec<CameraHandle>,
    shutdown: Arc<AtomicBool>,
    janitor: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn new(
        cfg: EngineConfig,
        detector: Arc<SharedDetector>,
        source_factory: Arc<dyn SourceFactory>,
        encoder_factory: Arc<dyn EncoderFactory>,
    ) -> Self {
        Self {
            cfg,
            detector,
            source_factory,
            encoder_factory,
            vault: None,
            cameras: Vec::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            janitor: None,
        }
    }

    /// Engine wired with the built-in stub detector, synthetic sources,
    /// and the MJPG fallback encoder. Real deployments inject their own
    /// detector backend and factories through [`Engine::new`].
    pub fn with_defaults(cfg: EngineConfig) -> Result<Self> {
        let detector = Arc::new(SharedDetector::new(Box::new(StubBackend::every_nth(60)))?);
        let source_factory = Arc::new(DefaultSourceFactory {
            width: cfg.resolution.0,
            height: cfg.resolution.1,
            fps: cfg.target_fps,
        });
        let encoder_factory = Arc::new(DefaultEncoderFactory::new());
        Ok(Self::new(cfg, detector, source_factory, encoder_factory))
    }

    /// Construct the vault, instantiate per-camera components, and spawn
    /// the worker threads plus the storage janitor.
    pub fn start(&mut self) -> Result<()> {
        if !self.cameras.is_empty() {
            return Err(anyhow!("engine already started"));
        }
        self.shutdown.store(false, Ordering::SeqCst);

        log::info!(
            "starting engine: {} camera(s), device {}, detector {}",
            self.cfg.camera_sources.len(),
            self.cfg.device,
            self.detector.name()
        );

        let vault = Arc::new(Vault::open(&self.cfg.key_path)?);
        self.vault = Some(Arc::clone(&vault));

        std::fs::create_dir_all(&self.cfg.public_path)
            .with_context(|| format!("create {}", self.cfg.public_path.display()))?;
        std::fs::create_dir_all(&self.cfg.evidence_path)
            .with_context(|| format!("create {}", self.cfg.evidence_path.display()))?;

        let specs = self.cfg.source_specs()?;
        let tags = assign_camera_tags(&specs);
        for (index, (spec, tag)) in specs.into_iter().zip(tags).enumerate() {
            let source = match self.source_factory.open(&spec) {
                Ok(source) => source,
                Err(e) => {
                    log::error!("[cam {}] cannot open source {}: {}", index, spec, e);
                    continue;
                }
            };

            let status = Arc::new(CameraStatus::new(index, &spec.to_string(), &tag));
            let slot = Arc::new(LatestFrameSlot::new());

            let processor = FrameProcessor::new(
                Arc::clone(&self.detector),
                self.cfg.blur_kernel,
                self.cfg.confidence_threshold,
            )?;

            let recorder = PublicRecorder::new(
                RecorderConfig {
                    output_dir: self.cfg.public_path.clone(),
                    camera_tag: tag.clone(),
                    fps: self.cfg.target_fps,
                    segment_seconds: self.cfg.segment_seconds,
                    width: self.cfg.resolution.0,
                    height: self.cfg.resolution.1,
                },
                Arc::clone(&self.encoder_factory),
                Arc::clone(&status),
            )?;

            let evidence = EvidenceManager::new(
                EvidenceConfig {
                    output_dir: self.cfg.evidence_path.join(&tag),
                    camera_tag: tag.clone(),
                    segment_seconds: self.cfg.segment_seconds,
                    detection_only: self.cfg.evidence_detection_only,
                    jpeg_quality: self.cfg.evidence_jpeg_quality,
                    pre_roll_size: self.cfg.pre_roll_size,
                    flush_queue_capacity: self.cfg.flush_queue_capacity,
                },
                Arc::clone(&vault),
                Arc::clone(&status),
            )?;

            let worker = CameraWorker::new(
                index,
                spec,
                self.cfg.resolution,
                source,
                processor,
                recorder,
                evidence,
                Arc::clone(&status),
                Arc::clone(&slot),
                Arc::clone(&self.shutdown),
            );
            let handle = worker.spawn()?;

            self.cameras.push(CameraHandle {
                status,
                slot,
                worker: Some(handle),
            });
        }

        if self.cameras.is_empty() {
            self.vault = None;
            return Err(NoCameraSources.into());
        }

        self.janitor = Some(self.spawn_janitor()?);

        log::info!("engine ready: {} worker(s) running", self.cameras.len());
        Ok(())
    }

    /// Snapshot of every camera's status.
    pub fn status(&self) -> Vec<CameraStatusSnapshot> {
        self.cameras.iter().map(|c| c.status.snapshot()).collect()
    }

    /// Most recent preview JPEG for a camera, if one was ever produced.
    pub fn latest_jpeg(&self, camera_idx: usize) -> Option<Vec<u8>> {
        self.latest_preview(camera_idx).map(|p| p.jpeg)
    }

    /// Most recent preview frame with its sequence number.
    pub fn latest_preview(&self, camera_idx: usize) -> Option<PreviewFrame> {
        self.cameras
            .iter()
            .find(|c| c.status.index == camera_idx)?
            .slot
            .latest()
    }

    /// Public segment listing, newest first.
    pub fn list_public(&self) -> Result<Vec<RecordingEntry>> {
        list_public(&self.cfg.public_path)
    }

    /// Evidence container listing, newest first.
    pub fn list_evidence(&self) -> Result<Vec<RecordingEntry>> {
        list_evidence(&self.cfg.evidence_path)
    }

    /// Decrypt an evidence container. Vault errors surface verbatim.
    pub fn decrypt(&self, path: &Path) -> Result<Unsealed> {
        let vault = self
            .vault
            .as_ref()
            .ok_or_else(|| anyhow!("engine is not started"))?;
        vault.open_file(path)
    }

    /// Decrypt and parse an evidence container into its frame records.
    pub fn decrypt_package(
        &self,
        path: &Path,
    ) -> Result<(Vec<FrameRecord>, SegmentMeta, String)> {
        let unsealed = self.decrypt(path)?;
        let (records, meta) = decode_package(&unsealed.payload)?;
        Ok((records, meta, unsealed.hash_hex))
    }

    /// Signal all workers, wait for them to drain, and release the vault.
    /// Best-effort: individual teardown failures are logged, not raised.
    pub fn stop(&mut self) {
        if self.cameras.is_empty() {
            return;
        }
        log::info!("stopping engine");
        self.shutdown.store(true, Ordering::SeqCst);

        for camera in &mut self.cameras {
            if let Some(handle) = camera.worker.take() {
                if let Err(e) = handle.join() {
                    log::error!(
                        "[cam {}] worker terminated abnormally: {:?}",
                        camera.status.index,
                        e
                    );
                }
            }
        }
        if let Some(janitor) = self.janitor.take() {
            let _ = janitor.join();
        }
        self.cameras.clear();

        // Last reference released here; key bytes are zeroized on drop.
        self.vault = None;
        log::info!("engine stopped");
    }

    fn spawn_janitor(&self) -> std::io::Result<JoinHandle<()>> {
        let janitor = StorageJanitor::new(
            vec![self.cfg.public_path.clone(), self.cfg.evidence_path.clone()],
            self.cfg.max_storage_gb,
        );
        let shutdown = Arc::clone(&self.shutdown);
        std::thread::Builder::new()
            .name("storage-janitor".to_string())
            .spawn(move || {
                let slice = Duration::from_millis(200);
                loop {
                    let mut waited = Duration::ZERO;
                    while waited < JANITOR_INTERVAL {
                        if shutdown.load(Ordering::Relaxed) {
                            return;
                        }
                        std::thread::sleep(slice);
                        waited += slice;
                    }
                    if let Err(e) = janitor.run_once() {
                        log::warn!("storage cleanup sweep failed: {}", e);
                    }
                }
            })
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Stable per-worker filename tags. Device sources are `cam{index}`; URL
/// sources use their scheme, suffixed with the camera index when several
/// sources share one scheme so filenames never collide.
fn assign_camera_tags(specs: &[crate::ingest::SourceSpec]) -> Vec<String> {
    let base: Vec<String> = specs
        .iter()
        .enumerate()
        .map(|(index, spec)| spec.camera_tag(index))
        .collect();
    base.iter()
        .enumerate()
        .map(|(index, tag)| {
            let duplicated = base.iter().filter(|other| *other == tag).count() > 1;
            if duplicated {
                format!("{}{}", tag, index)
            } else {
                tag.clone()
            }
        })
        .collect()
}
