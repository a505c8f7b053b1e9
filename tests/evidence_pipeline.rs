//! Selective recording, pre-roll, and flush behaviour of the evidence
//! manager, verified end-to-end through the vault.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use edge_vision::{
    decode_package, CameraStatus, CaptureTs, Detection, DetectionClass, EvidenceConfig,
    EvidenceManager, Frame, Vault,
};

const KEY: [u8; 32] = [5u8; 32];
const W: u32 = 32;
const H: u32 = 24;

fn frame_at(ts: f64) -> Frame {
    Frame::new(
        vec![120u8; (W * H * 3) as usize],
        W,
        H,
        CaptureTs {
            wall: ts,
            mono: Instant::now(),
        },
    )
}

fn face_at(ts: f64) -> Detection {
    Detection {
        x1: 4,
        y1: 4,
        x2: 12,
        y2: 12,
        confidence: 0.9,
        class: DetectionClass::Face,
        ts,
    }
}

fn config(dir: &Path, detection_only: bool, pre_roll: usize, segment_seconds: u64) -> EvidenceConfig {
    EvidenceConfig {
        output_dir: dir.to_path_buf(),
        camera_tag: "cam0".to_string(),
        segment_seconds,
        detection_only,
        jpeg_quality: 75,
        pre_roll_size: pre_roll,
        flush_queue_capacity: 10,
    }
}

fn evidence_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|x| x.to_str()) == Some("enc"))
        .collect();
    files.sort();
    files
}

#[test]
fn selective_recording_prepends_pre_roll() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let vault = Arc::new(Vault::from_key(KEY));
    let status = Arc::new(CameraStatus::new(0, "0", "cam0"));
    let mut manager = EvidenceManager::new(
        config(dir.path(), true, 3, 300),
        Arc::clone(&vault),
        status,
    )?;

    // Detection pattern over ten frames, 100 ms apart.
    let pattern = [
        false, false, false, false, true, true, false, true, false, false,
    ];
    let base = 1_700_000_000.0;
    for (i, &has_detection) in pattern.iter().enumerate() {
        let ts = base + i as f64 * 0.1;
        let detections = if has_detection {
            vec![face_at(ts)]
        } else {
            Vec::new()
        };
        manager.add_frame(&frame_at(ts), &detections, None)?;
    }

    // First detection arrives at frame 4; the ring held frames 1..=3.
    assert_eq!(manager.buffer_len(), 9);
    assert_eq!(manager.pre_roll_len(), 0);

    manager.close();

    let files = evidence_files(dir.path());
    assert_eq!(files.len(), 1, "exactly one evidence file expected");

    let unsealed = vault.open_file(&files[0])?;
    let (records, meta) = decode_package(&unsealed.payload)?;

    // Pre-roll context (frames 1..=3) precedes the first detection frame,
    // then every subsequent frame regardless of its own detections.
    assert_eq!(records.len(), 9);
    let first_ts = base + 0.1;
    assert!((records[0].ts - first_ts).abs() < 1e-9);
    assert!(records[0].detections.is_empty());
    assert!(records[1].detections.is_empty());
    assert!(records[2].detections.is_empty());
    assert_eq!(records[3].detections.len(), 1); // frame 4, first detection
    assert!((records[3].ts - (base + 0.4)).abs() < 1e-9);
    assert!((records[8].ts - (base + 0.9)).abs() < 1e-9);

    assert_eq!(meta.frame_count, 9);
    assert_eq!(meta.total_detections, 3);
    assert_eq!(meta.camera_id, "cam0");
    Ok(())
}

#[test]
fn no_detections_means_no_evidence_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let vault = Arc::new(Vault::from_key(KEY));
    let status = Arc::new(CameraStatus::new(0, "0", "cam0"));
    let mut manager = EvidenceManager::new(config(dir.path(), true, 3, 300), vault, status)?;

    for i in 0..20 {
        manager.add_frame(&frame_at(1_700_000_000.0 + i as f64 * 0.1), &[], None)?;
    }
    assert_eq!(manager.buffer_len(), 0);
    assert_eq!(manager.pre_roll_len(), 3);
    manager.close();

    assert!(evidence_files(dir.path()).is_empty());
    Ok(())
}

#[test]
fn zero_pre_roll_starts_at_the_detection_frame() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let vault = Arc::new(Vault::from_key(KEY));
    let status = Arc::new(CameraStatus::new(0, "0", "cam0"));
    let mut manager = EvidenceManager::new(
        config(dir.path(), true, 0, 300),
        Arc::clone(&vault),
        status,
    )?;

    let base = 1_700_000_000.0;
    for i in 0..5 {
        manager.add_frame(&frame_at(base + i as f64), &[], None)?;
    }
    let det_ts = base + 5.0;
    manager.add_frame(&frame_at(det_ts), &[face_at(det_ts)], None)?;
    manager.close();

    let files = evidence_files(dir.path());
    assert_eq!(files.len(), 1);
    let (records, _) = decode_package(&vault.open_file(&files[0])?.payload)?;
    assert_eq!(records.len(), 1);
    assert!((records[0].ts - det_ts).abs() < 1e-9);
    assert_eq!(records[0].detections.len(), 1);
    Ok(())
}

#[test]
fn mid_buffer_detection_does_not_redrain_pre_roll() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let vault = Arc::new(Vault::from_key(KEY));
    let status = Arc::new(CameraStatus::new(0, "0", "cam0"));
    let mut manager = EvidenceManager::new(
        config(dir.path(), true, 3, 300),
        Arc::clone(&vault),
        status,
    )?;

    let base = 1_700_000_000.0;
    // Detection immediately: buffer active from frame 0.
    manager.add_frame(&frame_at(base), &[face_at(base)], None)?;
    // Gap frames land in the buffer, not the ring.
    for i in 1..4 {
        manager.add_frame(&frame_at(base + i as f64 * 0.1), &[], None)?;
    }
    assert_eq!(manager.pre_roll_len(), 0);
    // A later detection while the buffer is non-empty is a plain append.
    let late = base + 0.4;
    manager.add_frame(&frame_at(late), &[face_at(late)], None)?;
    assert_eq!(manager.buffer_len(), 5);
    manager.close();

    let files = evidence_files(dir.path());
    let (records, _) = decode_package(&vault.open_file(&files[0])?.payload)?;
    assert_eq!(records.len(), 5);
    Ok(())
}

#[test]
fn continuous_mode_rotates_by_duration() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let vault = Arc::new(Vault::from_key(KEY));
    let status = Arc::new(CameraStatus::new(0, "0", "cam0"));
    let mut manager = EvidenceManager::new(
        config(dir.path(), false, 3, 1),
        Arc::clone(&vault),
        status,
    )?;

    // Frames at 0.0, 0.5, 1.0 close the first window (1.0 - 0.0 >= 1),
    // then 1.5, 2.0, 2.5 close the second, 3.0 flushes on close.
    let base = 1_700_000_000.0;
    for i in 0..7 {
        manager.add_frame(&frame_at(base + i as f64 * 0.5), &[], None)?;
    }
    manager.close();

    let files = evidence_files(dir.path());
    assert_eq!(files.len(), 3);

    let counts: Vec<u32> = files
        .iter()
        .map(|f| {
            let (records, _) = decode_package(&vault.open_file(f).unwrap().payload).unwrap();
            records.len() as u32
        })
        .collect();
    assert_eq!(counts, vec![3, 3, 1]);
    Ok(())
}

#[test]
fn sync_stamp_lands_in_the_filename() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let vault = Arc::new(Vault::from_key(KEY));
    let status = Arc::new(CameraStatus::new(0, "0", "cam0"));
    let mut manager = EvidenceManager::new(
        config(dir.path(), true, 3, 300),
        Arc::clone(&vault),
        status,
    )?;

    let ts = 1_700_000_000.0;
    manager.add_frame(&frame_at(ts), &[face_at(ts)], Some("20240115120000"))?;
    manager.close();

    let files = evidence_files(dir.path());
    assert_eq!(files.len(), 1);
    let name = files[0].file_name().unwrap().to_str().unwrap();
    assert_eq!(name, "evidence_cam0_20240115120000_0000.enc");
    Ok(())
}

#[test]
fn evidence_frames_are_raw_not_blurred() -> Result<()> {
    // The manager receives the raw frame; its JPEG must decode back to
    // something close to the original pixels (JPEG loss aside), proving
    // no blur pass touched it.
    let dir = tempfile::tempdir()?;
    let vault = Arc::new(Vault::from_key(KEY));
    let status = Arc::new(CameraStatus::new(0, "0", "cam0"));
    let mut manager = EvidenceManager::new(
        config(dir.path(), true, 0, 300),
        Arc::clone(&vault),
        status,
    )?;

    let ts = 1_700_000_000.0;
    manager.add_frame(&frame_at(ts), &[face_at(ts)], None)?;
    manager.close();

    let files = evidence_files(dir.path());
    let (records, _) = decode_package(&vault.open_file(&files[0])?.payload)?;
    let decoded = Frame::from_jpeg(&records[0].jpeg, CaptureTs::now())?;
    assert!(decoded
        .data()
        .iter()
        .all(|&v| (v as i32 - 120).abs() <= 6));
    Ok(())
}
