//! Recording listings, filename stamps, and storage budget enforcement.
//!
//! Filenames pair the two output paths: a public segment
//! `public_{tag}_{stamp}.{mp4|avi}` and its evidence file
//! `evidence_{tag}_{stamp}_{seq}.enc` share the same compact
//! `YYYYMMDDHHMMSS` stamp. Older archives used an underscore form
//! (`YYYYMMDD_HHMMSS`); both are accepted on read.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime, TimeZone};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Compact local-time stamp used in filenames.
pub fn compact_stamp(ts_secs: f64) -> String {
    match Local.timestamp_opt(ts_secs as i64, 0) {
        chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
            dt.format("%Y%m%d%H%M%S").to_string()
        }
        chrono::LocalResult::None => "19700101000000".to_string(),
    }
}

/// Parse a filename stamp in either the compact or the underscore form.
pub fn parse_stamp(stamp: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S")
        .or_else(|_| NaiveDateTime::parse_from_str(stamp, "%Y%m%d_%H%M%S"))
        .ok()
}

/// Extract the stamp portion of a recording filename, normalized to the
/// compact form.
pub fn stamp_of_filename(name: &str) -> Option<String> {
    let stem = name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name);
    for part in stem.split('_') {
        if part.len() == 14 && part.bytes().all(|b| b.is_ascii_digit()) {
            return Some(part.to_string());
        }
    }
    // Underscore form: the stamp spans two '_'-separated parts.
    let parts: Vec<&str> = stem.split('_').collect();
    for window in parts.windows(2) {
        if window[0].len() == 8
            && window[1].len() == 6
            && window[0].bytes().all(|b| b.is_ascii_digit())
            && window[1].bytes().all(|b| b.is_ascii_digit())
        {
            return Some(format!("{}{}", window[0], window[1]));
        }
    }
    None
}

/// One entry in a recording or evidence listing.
#[derive(Clone, Debug, Serialize)]
pub struct RecordingEntry {
    pub filename: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    /// File modification time, seconds since epoch.
    pub modified_ts: f64,
    /// Camera tag parsed from the filename, when present.
    pub camera_tag: Option<String>,
    /// Normalized compact stamp parsed from the filename, when present.
    pub stamp: Option<String>,
}

/// List public segments (`.mp4`/`.avi`) in `dir`, newest first.
pub fn list_public(dir: &Path) -> Result<Vec<RecordingEntry>> {
    let mut entries = collect_entries(dir, &["mp4", "avi"], "public_")?;
    entries.sort_by(|a, b| b.modified_ts.total_cmp(&a.modified_ts));
    Ok(entries)
}

/// List evidence containers (`.enc`) under `dir`, newest first.
/// Evidence is laid out one subdirectory per camera tag.
pub fn list_evidence(dir: &Path) -> Result<Vec<RecordingEntry>> {
    let mut entries = collect_entries(dir, &["enc"], "evidence_")?;
    entries.sort_by(|a, b| b.modified_ts.total_cmp(&a.modified_ts));
    Ok(entries)
}

fn collect_entries(dir: &Path, extensions: &[&str], prefix: &str) -> Result<Vec<RecordingEntry>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    collect_into(dir, extensions, prefix, 0, &mut out)?;
    Ok(out)
}

fn collect_into(
    dir: &Path,
    extensions: &[&str],
    prefix: &str,
    depth: usize,
    out: &mut Vec<RecordingEntry>,
) -> Result<()> {
    for entry in std::fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            // One level of per-camera subdirectories.
            if depth == 0 {
                collect_into(&path, extensions, prefix, depth + 1, out)?;
            }
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let ext_matches = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
            .unwrap_or(false);
        if !ext_matches || !name.starts_with(prefix) {
            continue;
        }
        let meta = entry.metadata()?;
        out.push(RecordingEntry {
            filename: name.to_string(),
            path: path.clone(),
            size_bytes: meta.len(),
            modified_ts: modified_secs(&meta),
            camera_tag: tag_of_filename(name, prefix),
            stamp: stamp_of_filename(name),
        });
    }
    Ok(())
}

fn tag_of_filename(name: &str, prefix: &str) -> Option<String> {
    let rest = name.strip_prefix(prefix)?;
    let tag = rest.split('_').next()?;
    if tag.is_empty() {
        None
    } else {
        Some(tag.to_string())
    }
}

fn modified_secs(meta: &std::fs::Metadata) -> f64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// FIFO storage cleanup over the output roots.
///
/// When the combined size of the public and evidence trees exceeds the
/// configured budget, the oldest files (by modification time) are deleted
/// until the total fits again. Cleanup is an orthogonal background
/// responsibility; it is never triggered from a request path.
pub struct StorageJanitor {
    roots: Vec<PathBuf>,
    max_bytes: u64,
}

impl StorageJanitor {
    pub fn new(roots: Vec<PathBuf>, max_storage_gb: u64) -> Self {
        Self {
            roots,
            max_bytes: max_storage_gb.saturating_mul(1024 * 1024 * 1024),
        }
    }

    /// Enforce the budget once. Returns the number of files deleted.
    pub fn run_once(&self) -> Result<usize> {
        let mut files: Vec<(PathBuf, u64, f64)> = Vec::new();
        let mut total: u64 = 0;
        for root in &self.roots {
            if !root.exists() {
                continue;
            }
            walk_files(root, &mut files, &mut total)?;
        }
        if total <= self.max_bytes {
            return Ok(0);
        }

        // Oldest first.
        files.sort_by(|a, b| a.2.total_cmp(&b.2));
        let mut deleted = 0usize;
        for (path, size, _) in files {
            if total <= self.max_bytes {
                break;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    total = total.saturating_sub(size);
                    deleted += 1;
                    log::info!("AUDIT: storage budget cleanup removed {}", path.display());
                }
                Err(e) => {
                    log::warn!("cleanup failed for {}: {}", path.display(), e);
                }
            }
        }
        Ok(deleted)
    }
}

fn walk_files(dir: &Path, out: &mut Vec<(PathBuf, u64, f64)>, total: &mut u64) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_files(&path, out, total)?;
        } else {
            let meta = entry.metadata()?;
            *total += meta.len();
            out.push((path, meta.len(), modified_secs(&meta)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn stamps_parse_in_both_forms() {
        assert!(parse_stamp("20240115120000").is_some());
        assert!(parse_stamp("20240115_120000").is_some());
        assert!(parse_stamp("2024-01-15").is_none());
        assert_eq!(
            parse_stamp("20240115120000"),
            parse_stamp("20240115_120000")
        );
    }

    #[test]
    fn filename_stamps_are_normalized() {
        assert_eq!(
            stamp_of_filename("public_cam0_20240115120000.mp4").as_deref(),
            Some("20240115120000")
        );
        assert_eq!(
            stamp_of_filename("evidence_rtsp_20240115_120000_0001.enc").as_deref(),
            Some("20240115120000")
        );
        assert_eq!(stamp_of_filename("readme.txt"), None);
    }

    #[test]
    fn compact_stamp_round_trips_through_parse() {
        let stamp = compact_stamp(1_700_000_000.0);
        assert_eq!(stamp.len(), 14);
        assert!(parse_stamp(&stamp).is_some());
    }

    #[test]
    fn listings_filter_by_prefix_and_extension() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("public_cam0_20240115120000.mp4"), b"v")?;
        fs::write(dir.path().join("public_rtsp_20240115120500.avi"), b"v")?;
        fs::write(dir.path().join("notes.txt"), b"x")?;
        fs::write(dir.path().join("evidence_cam0_20240115120000_0000.enc"), b"e")?;

        let public = list_public(dir.path())?;
        assert_eq!(public.len(), 2);
        assert!(public.iter().all(|e| e.stamp.is_some()));

        let evidence = list_evidence(dir.path())?;
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].camera_tag.as_deref(), Some("cam0"));
        Ok(())
    }

    #[test]
    fn evidence_listing_descends_camera_subdirs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sub = dir.path().join("cam0");
        fs::create_dir_all(&sub)?;
        fs::write(sub.join("evidence_cam0_20240115120000_0000.enc"), b"e")?;
        let evidence = list_evidence(dir.path())?;
        assert_eq!(evidence.len(), 1);
        Ok(())
    }

    #[test]
    fn janitor_deletes_oldest_first() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let old = dir.path().join("public_cam0_20240101000000.mp4");
        let new = dir.path().join("public_cam0_20240201000000.mp4");
        fs::write(&old, vec![0u8; 4096])?;
        fs::write(&new, vec![0u8; 4096])?;

        // Make `old` definitively older.
        let past = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        let file = fs::File::options().write(true).open(&old)?;
        file.set_modified(past)?;

        // A zero budget forces deletion of everything, oldest first.
        let janitor = StorageJanitor::new(vec![dir.path().to_path_buf()], 0);
        let deleted = janitor.run_once()?;
        assert_eq!(deleted, 2);
        assert!(!old.exists());
        assert!(!new.exists());
        Ok(())
    }

    #[test]
    fn janitor_is_idle_under_budget() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("public_cam0_20240101000000.mp4"), b"tiny")?;
        let janitor = StorageJanitor::new(vec![dir.path().to_path_buf()], 50);
        assert_eq!(janitor.run_once()?, 0);
        Ok(())
    }
}
