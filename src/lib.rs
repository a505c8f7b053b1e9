//! Secure edge vision pipeline.
//!
//! This crate ingests live video from multiple cameras, detects faces in
//! every frame, and produces two durable artifacts per camera at once:
//!
//! 1. a publicly viewable recording with faces irreversibly blurred, and
//! 2. a tamper-evident encrypted archive of the original frames for
//!    forensic use.
//!
//! # Architecture
//!
//! Control flow per camera:
//!
//! ```text
//! FrameSource -> Processor -> blurred  -> PublicRecorder -> .mp4/.avi
//!                         \-> raw+dets -> EvidenceManager -> Vault -> .enc
//! ```
//!
//! One detector instance is shared by all camera workers; each worker owns
//! its recorder, evidence manager, and latest-frame slot. The engine owns
//! the workers and exposes snapshot accessors for an external HTTP
//! surface.
//!
//! # Module Structure
//!
//! - `frame`: RGB8 raster, capture timestamps, JPEG and resampling
//! - `ingest`: frame sources (synthetic stub; drivers are injected)
//! - `detect`: detection types, shared detector wrapper, stub backend
//! - `processor`: detection + Gaussian anonymization
//! - `recorder`: time-sliced public segments with codec fallback
//! - `evidence`: selective buffering, pre-roll, background encryption
//! - `vault`: AES-256-GCM containers with an embedded payload hash
//! - `engine`: lifecycle, status aggregation, decrypt path
//! - `storage`: listings, filename stamps, storage budget janitor

pub mod config;
pub mod detect;
pub mod engine;
pub mod evidence;
pub mod frame;
pub mod ingest;
pub mod processor;
pub mod recorder;
pub mod status;
pub mod storage;
pub mod vault;
pub mod worker;

pub use config::EngineConfig;
pub use detect::{Detection, DetectionClass, Device, FaceDetector, SharedDetector, StubBackend};
pub use engine::{Engine, NoCameraSources};
pub use evidence::{
    decode_package, encode_package, EvidenceConfig, EvidenceManager, EvidenceSink, FrameRecord,
    SegmentMeta, VaultSink,
};
pub use frame::{CaptureTs, Frame};
pub use ingest::{
    DefaultSourceFactory, FrameSource, SourceFactory, SourceSpec, SyntheticSource,
};
pub use processor::{FrameProcessor, Processed};
pub use recorder::{
    DefaultEncoderFactory, EncoderFactory, MjpegAviWriter, PublicRecorder, RecorderConfig,
    SegmentEncoder, CODEC_PREFERENCE,
};
pub use status::{CameraState, CameraStatus, CameraStatusSnapshot, LatestFrameSlot, PreviewFrame};
pub use storage::{RecordingEntry, StorageJanitor};
pub use vault::{Unsealed, Vault, VaultError};

#[cfg(feature = "hybrid-vault")]
pub use vault::hybrid::HybridVault;
