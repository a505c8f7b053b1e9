//! Engine configuration.
//!
//! Settings come from an optional JSON config file (path in
//! `EDGE_VISION_CONFIG`), are overridden by individual environment
//! variables, then validated. Invalid configuration is fatal at startup;
//! the engine refuses to start rather than run half-configured.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::Device;
use crate::ingest::SourceSpec;

const DEFAULT_CONFIDENCE: f32 = 0.35;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_BLUR_KERNEL: usize = 51;
const DEFAULT_SEGMENT_SECONDS: u64 = 300;
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_RESOLUTION: (u32, u32) = (1280, 720);
const DEFAULT_JPEG_QUALITY: u8 = 75;
const DEFAULT_PRE_ROLL: usize = 30;
const DEFAULT_FLUSH_QUEUE: usize = 10;
const DEFAULT_MAX_STORAGE_GB: u64 = 50;
const DEFAULT_PUBLIC_PATH: &str = "recordings/public";
const DEFAULT_EVIDENCE_PATH: &str = "recordings/evidence";
const DEFAULT_KEY_PATH: &str = "keys/master.key";

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    camera_sources: Option<Vec<String>>,
    device: Option<String>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    blur_kernel: Option<usize>,
    segment_seconds: Option<u64>,
    target_fps: Option<u32>,
    resolution: Option<(u32, u32)>,
    evidence_detection_only: Option<bool>,
    evidence_jpeg_quality: Option<u8>,
    pre_roll_size: Option<usize>,
    flush_queue_capacity: Option<usize>,
    max_storage_gb: Option<u64>,
    public_path: Option<PathBuf>,
    evidence_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Raw camera source strings (device indices or URLs).
    pub camera_sources: Vec<String>,
    pub device: Device,
    pub confidence_threshold: f32,
    /// NMS/tracking threshold, forwarded to the detector backend.
    pub iou_threshold: f32,
    pub blur_kernel: usize,
    pub segment_seconds: u64,
    pub target_fps: u32,
    pub resolution: (u32, u32),
    pub evidence_detection_only: bool,
    pub evidence_jpeg_quality: u8,
    pub pre_roll_size: usize,
    pub flush_queue_capacity: usize,
    pub max_storage_gb: u64,
    pub public_path: PathBuf,
    pub evidence_path: PathBuf,
    pub key_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_file(ConfigFile::default()).expect("defaults are valid")
    }
}

impl EngineConfig {
    /// Load from `EDGE_VISION_CONFIG` (when set) plus environment
    /// overrides, then validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("EDGE_VISION_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => ConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parsed source specs, in configured order.
    pub fn source_specs(&self) -> Result<Vec<SourceSpec>> {
        self.camera_sources.iter().map(|s| SourceSpec::parse(s)).collect()
    }

    fn from_file(file: ConfigFile) -> Result<Self> {
        let device = match file.device {
            Some(raw) => raw.parse()?,
            None => Device::default(),
        };
        Ok(Self {
            camera_sources: file
                .camera_sources
                .unwrap_or_else(|| vec!["0".to_string()]),
            device,
            confidence_threshold: file.confidence_threshold.unwrap_or(DEFAULT_CONFIDENCE),
            iou_threshold: file.iou_threshold.unwrap_or(DEFAULT_IOU),
            blur_kernel: file.blur_kernel.unwrap_or(DEFAULT_BLUR_KERNEL),
            segment_seconds: file.segment_seconds.unwrap_or(DEFAULT_SEGMENT_SECONDS),
            target_fps: file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            resolution: file.resolution.unwrap_or(DEFAULT_RESOLUTION),
            evidence_detection_only: file.evidence_detection_only.unwrap_or(true),
            evidence_jpeg_quality: file.evidence_jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            pre_roll_size: file.pre_roll_size.unwrap_or(DEFAULT_PRE_ROLL),
            flush_queue_capacity: file.flush_queue_capacity.unwrap_or(DEFAULT_FLUSH_QUEUE),
            max_storage_gb: file.max_storage_gb.unwrap_or(DEFAULT_MAX_STORAGE_GB),
            public_path: file
                .public_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PUBLIC_PATH)),
            evidence_path: file
                .evidence_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EVIDENCE_PATH)),
            key_path: file
                .key_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_KEY_PATH)),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(sources) = std::env::var("CAMERA_SOURCES") {
            let parsed = split_csv(&sources);
            if !parsed.is_empty() {
                self.camera_sources = parsed;
            }
        }
        if let Ok(device) = std::env::var("DEVICE") {
            if !device.trim().is_empty() {
                self.device = device.parse()?;
            }
        }
        parse_env_into("DETECTION_CONFIDENCE", &mut self.confidence_threshold)?;
        parse_env_into("DETECTION_IOU", &mut self.iou_threshold)?;
        parse_env_into("BLUR_INTENSITY", &mut self.blur_kernel)?;
        parse_env_into("RECORDING_DURATION_SECONDS", &mut self.segment_seconds)?;
        parse_env_into("TARGET_FPS", &mut self.target_fps)?;
        if let Ok(flag) = std::env::var("EVIDENCE_DETECTION_ONLY") {
            self.evidence_detection_only = flag.trim().eq_ignore_ascii_case("true");
        }
        parse_env_into("EVIDENCE_JPEG_QUALITY", &mut self.evidence_jpeg_quality)?;
        parse_env_into("PRE_ROLL_SIZE", &mut self.pre_roll_size)?;
        parse_env_into("FLUSH_QUEUE_CAPACITY", &mut self.flush_queue_capacity)?;
        parse_env_into("MAX_STORAGE_GB", &mut self.max_storage_gb)?;
        if let Ok(path) = std::env::var("PUBLIC_RECORDINGS_PATH") {
            if !path.trim().is_empty() {
                self.public_path = PathBuf::from(path);
            }
        }
        if let Ok(path) = std::env::var("EVIDENCE_RECORDINGS_PATH") {
            if !path.trim().is_empty() {
                self.evidence_path = PathBuf::from(path);
            }
        }
        if let Ok(path) = std::env::var("ENCRYPTION_KEY_PATH") {
            if !path.trim().is_empty() {
                self.key_path = PathBuf::from(path);
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.camera_sources.is_empty() {
            return Err(anyhow!("at least one camera source is required"));
        }
        for source in &self.camera_sources {
            SourceSpec::parse(source)?;
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!("confidence_threshold must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(anyhow!("iou_threshold must be within [0, 1]"));
        }
        if self.blur_kernel < 3 {
            return Err(anyhow!("blur_kernel must be >= 3"));
        }
        if self.blur_kernel % 2 == 0 {
            log::warn!(
                "blur_kernel {} is even, using {}",
                self.blur_kernel,
                self.blur_kernel + 1
            );
            self.blur_kernel += 1;
        }
        if self.segment_seconds == 0 {
            return Err(anyhow!("segment_seconds must be greater than zero"));
        }
        if self.target_fps == 0 {
            return Err(anyhow!("target_fps must be greater than zero"));
        }
        if self.resolution.0 == 0 || self.resolution.1 == 0 {
            return Err(anyhow!("resolution must be positive"));
        }
        if !(1..=100).contains(&self.evidence_jpeg_quality) {
            return Err(anyhow!("evidence_jpeg_quality must be within [1, 100]"));
        }
        if self.flush_queue_capacity == 0 {
            return Err(anyhow!("flush_queue_capacity must be >= 1"));
        }
        if self.max_storage_gb == 0 {
            return Err(anyhow!("max_storage_gb must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
}

fn parse_env_into<T: std::str::FromStr>(name: &str, target: &mut T) -> Result<()> {
    if let Ok(raw) = std::env::var(name) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            *target = trimmed
                .parse()
                .map_err(|_| anyhow!("{} has an invalid value: {}", name, raw))?;
        }
    }
    Ok(())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
