//! Whole-engine lifecycle against synthetic sources: start, stream,
//! record both paths, pair filenames, decrypt, stop.

use anyhow::Result;
use std::time::{Duration, Instant};

use edge_vision::{CameraState, Engine, EngineConfig};

fn test_config(root: &std::path::Path) -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.camera_sources = vec!["stub://front".to_string(), "stub://back".to_string()];
    cfg.resolution = (64, 36);
    cfg.target_fps = 100;
    cfg.segment_seconds = 1;
    cfg.blur_kernel = 11;
    cfg.pre_roll_size = 5;
    cfg.public_path = root.join("public");
    cfg.evidence_path = root.join("evidence");
    cfg.key_path = root.join("keys/master.key");
    cfg
}

#[test]
fn engine_runs_both_paths_and_pairs_filenames() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut engine = Engine::with_defaults(test_config(dir.path()))?;
    engine.start()?;

    // Wait for both cameras to stream and for at least one evidence file
    // to land (stub detector fires every 60th frame; segments are 1s).
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        let previews_ready = engine.latest_jpeg(0).is_some() && engine.latest_jpeg(1).is_some();
        let evidence_ready = !engine.list_evidence()?.is_empty();
        if previews_ready && evidence_ready {
            break;
        }
        if Instant::now() > deadline {
            panic!(
                "pipeline did not produce output in time: previews={} evidence={}",
                previews_ready, evidence_ready
            );
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    // Streaming surface: JPEG previews with advancing sequence numbers.
    let preview = engine.latest_preview(0).unwrap();
    assert!(preview.jpeg.starts_with(&[0xFF, 0xD8]));
    std::thread::sleep(Duration::from_millis(200));
    assert!(engine.latest_preview(0).unwrap().seq > preview.seq);
    assert!(engine.latest_jpeg(99).is_none());

    // Status snapshot: both cameras online and counting frames.
    let status = engine.status();
    assert_eq!(status.len(), 2);
    for camera in &status {
        assert_eq!(camera.state, CameraState::Online);
        assert!(camera.frames_total > 0);
        assert!(camera.fps_ewma > 0.0);
    }

    // Decrypt an evidence container while the engine is live.
    let evidence = engine.list_evidence()?;
    let (records, meta, hash) = engine.decrypt_package(&evidence[0].path)?;
    assert!(!records.is_empty());
    assert_eq!(meta.frame_count as usize, records.len());
    assert_eq!(hash.len(), 64);
    // Detection-only recording: every segment contains detections.
    assert!(meta.total_detections > 0);

    engine.stop();

    // Every evidence file pairs with a public segment of the same
    // camera tag and stamp; the converse need not hold.
    let public = engine.list_public()?;
    let evidence = engine.list_evidence()?;
    assert!(!public.is_empty());
    assert!(!evidence.is_empty());
    for item in &evidence {
        let tag = item.camera_tag.as_deref().expect("evidence tag");
        let stamp = item.stamp.as_deref().expect("evidence stamp");
        assert!(
            public
                .iter()
                .any(|p| p.camera_tag.as_deref() == Some(tag)
                    && p.stamp.as_deref() == Some(stamp)),
            "no public segment pairs with {}",
            item.filename
        );
    }

    // After stop the per-camera components are torn down and the decrypt
    // path is gone with the vault.
    assert!(engine.status().is_empty());
    assert!(engine.decrypt(&evidence[0].path).is_err());
    Ok(())
}

#[test]
fn engine_with_no_usable_sources_refuses_to_start() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut cfg = test_config(dir.path());
    // Device indices have no built-in source factory.
    cfg.camera_sources = vec!["0".to_string()];
    let mut engine = Engine::with_defaults(cfg)?;
    let err = engine.start().unwrap_err();
    assert!(err.downcast_ref::<edge_vision::NoCameraSources>().is_some());
    Ok(())
}

#[test]
fn stop_is_idempotent_and_restart_is_possible() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut engine = Engine::with_defaults(test_config(dir.path()))?;
    engine.start()?;
    engine.stop();
    engine.stop();

    engine.start()?;
    let deadline = Instant::now() + Duration::from_secs(10);
    while engine.latest_jpeg(0).is_none() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(engine.latest_jpeg(0).is_some());
    engine.stop();
    Ok(())
}
