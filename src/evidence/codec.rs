//! Evidence payload wire format.
//!
//! A flushed segment is serialized into a single deterministic,
//! length-prefixed byte string before encryption. The format is
//! self-delimiting and parseable with bounded memory; no language-native
//! object serializer is involved. All integers are little-endian, all
//! strings UTF-8.
//!
//! ```text
//! u32  frame_count
//! repeat frame_count times:
//!     f64  ts_seconds_since_epoch
//!     u32  jpeg_len
//!     bytes[jpeg_len]
//!     u16  det_count
//!     repeat det_count times:
//!         i32 x1, i32 y1, i32 x2, i32 y2
//!         f32 confidence
//!         u8  class_id        (0 = face)
//! u32  meta_json_len
//! bytes[meta_json_len]        segment metadata as UTF-8 JSON
//! ```

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::detect::{Detection, DetectionClass};

/// Maximum JPEG size per frame (64 MiB) to bound hostile input.
const MAX_JPEG_LEN: usize = 64 * 1024 * 1024;

/// Maximum frames per package. At 30 fps this is over three hours.
const MAX_FRAME_COUNT: u32 = 1_000_000;

/// One buffered evidence frame: the raw (pre-blur) frame as JPEG plus the
/// detections observed on it.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameRecord {
    pub jpeg: Vec<u8>,
    pub detections: Vec<Detection>,
    pub ts: f64,
}

/// Segment metadata, stored both inside the encrypted payload and in the
/// container header.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub frame_count: u32,
    pub start_ts: f64,
    pub end_ts: f64,
    pub total_detections: u32,
    pub camera_id: String,
}

impl SegmentMeta {
    pub fn from_records(records: &[FrameRecord], camera_id: &str) -> Self {
        Self {
            frame_count: records.len() as u32,
            start_ts: records.first().map(|r| r.ts).unwrap_or(0.0),
            end_ts: records.last().map(|r| r.ts).unwrap_or(0.0),
            total_detections: records.iter().map(|r| r.detections.len() as u32).sum(),
            camera_id: camera_id.to_string(),
        }
    }
}

/// Serialize an evidence package.
pub fn encode_package(records: &[FrameRecord], meta: &SegmentMeta) -> Result<Vec<u8>> {
    let meta_json = serde_json::to_vec(meta).context("serialize segment metadata")?;

    let mut out = Vec::new();
    out.extend_from_slice(&(records.len() as u32).to_le_bytes());
    for record in records {
        out.extend_from_slice(&record.ts.to_le_bytes());
        out.extend_from_slice(&(record.jpeg.len() as u32).to_le_bytes());
        out.extend_from_slice(&record.jpeg);
        out.extend_from_slice(&(record.detections.len() as u16).to_le_bytes());
        for det in &record.detections {
            out.extend_from_slice(&det.x1.to_le_bytes());
            out.extend_from_slice(&det.y1.to_le_bytes());
            out.extend_from_slice(&det.x2.to_le_bytes());
            out.extend_from_slice(&det.y2.to_le_bytes());
            out.extend_from_slice(&det.confidence.to_le_bytes());
            out.push(det.class.wire_id());
        }
    }
    out.extend_from_slice(&(meta_json.len() as u32).to_le_bytes());
    out.extend_from_slice(&meta_json);
    Ok(out)
}

/// Parse an evidence package.
///
/// The wire format carries one timestamp per frame; decoded detections
/// inherit their frame's timestamp.
pub fn decode_package(bytes: &[u8]) -> Result<(Vec<FrameRecord>, SegmentMeta)> {
    let mut cursor = 0usize;

    let frame_count = read_u32(bytes, &mut cursor)?;
    if frame_count > MAX_FRAME_COUNT {
        return Err(anyhow!("frame count {} exceeds maximum", frame_count));
    }

    let mut records = Vec::with_capacity(frame_count as usize);
    for _ in 0..frame_count {
        let ts = f64::from_le_bytes(read_array::<8>(bytes, &mut cursor)?);
        let jpeg_len = read_u32(bytes, &mut cursor)? as usize;
        if jpeg_len > MAX_JPEG_LEN {
            return Err(anyhow!("jpeg length {} exceeds maximum", jpeg_len));
        }
        let jpeg = read_slice(bytes, &mut cursor, jpeg_len)?.to_vec();

        let det_count = u16::from_le_bytes(read_array::<2>(bytes, &mut cursor)?);
        let mut detections = Vec::with_capacity(det_count as usize);
        for _ in 0..det_count {
            let x1 = i32::from_le_bytes(read_array::<4>(bytes, &mut cursor)?);
            let y1 = i32::from_le_bytes(read_array::<4>(bytes, &mut cursor)?);
            let x2 = i32::from_le_bytes(read_array::<4>(bytes, &mut cursor)?);
            let y2 = i32::from_le_bytes(read_array::<4>(bytes, &mut cursor)?);
            let confidence = f32::from_le_bytes(read_array::<4>(bytes, &mut cursor)?);
            let class_id = read_slice(bytes, &mut cursor, 1)?[0];
            let class = DetectionClass::from_wire(class_id)
                .ok_or_else(|| anyhow!("unknown detection class id {}", class_id))?;
            detections.push(Detection {
                x1,
                y1,
                x2,
                y2,
                confidence,
                class,
                ts,
            });
        }

        records.push(FrameRecord {
            jpeg,
            detections,
            ts,
        });
    }

    let meta_len = read_u32(bytes, &mut cursor)? as usize;
    let meta_json = read_slice(bytes, &mut cursor, meta_len)?;
    let meta: SegmentMeta =
        serde_json::from_slice(meta_json).context("parse segment metadata")?;

    if cursor != bytes.len() {
        return Err(anyhow!(
            "trailing {} bytes after evidence package",
            bytes.len() - cursor
        ));
    }

    Ok((records, meta))
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array::<4>(bytes, cursor)?))
}

fn read_array<const N: usize>(bytes: &[u8], cursor: &mut usize) -> Result<[u8; N]> {
    let slice = read_slice(bytes, cursor, N)?;
    Ok(slice.try_into().expect("slice length checked"))
}

fn read_slice<'a>(bytes: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = cursor
        .checked_add(len)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| anyhow!("evidence package truncated"))?;
    let out = &bytes[*cursor..end];
    *cursor = end;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ts: f64, with_detection: bool) -> FrameRecord {
        let detections = if with_detection {
            vec![Detection {
                x1: 100,
                y1: 120,
                x2: 180,
                y2: 220,
                confidence: 0.87,
                class: DetectionClass::Face,
                ts,
            }]
        } else {
            Vec::new()
        };
        FrameRecord {
            jpeg: vec![0xFF, 0xD8, 0xFF, 0xD9],
            detections,
            ts,
        }
    }

    #[test]
    fn package_round_trips() -> Result<()> {
        let records = vec![record(100.0, false), record(100.1, true), record(100.2, true)];
        let meta = SegmentMeta::from_records(&records, "cam0");
        assert_eq!(meta.frame_count, 3);
        assert_eq!(meta.total_detections, 2);

        let bytes = encode_package(&records, &meta)?;
        let (decoded, decoded_meta) = decode_package(&bytes)?;
        assert_eq!(decoded, records);
        assert_eq!(decoded_meta, meta);
        Ok(())
    }

    #[test]
    fn empty_package_round_trips() -> Result<()> {
        let records = Vec::new();
        let meta = SegmentMeta::from_records(&records, "rtsp");
        let bytes = encode_package(&records, &meta)?;
        let (decoded, decoded_meta) = decode_package(&bytes)?;
        assert!(decoded.is_empty());
        assert_eq!(decoded_meta.frame_count, 0);
        Ok(())
    }

    #[test]
    fn encoding_is_deterministic() -> Result<()> {
        let records = vec![record(5.0, true)];
        let meta = SegmentMeta::from_records(&records, "cam1");
        assert_eq!(encode_package(&records, &meta)?, encode_package(&records, &meta)?);
        Ok(())
    }

    #[test]
    fn truncated_package_is_rejected() -> Result<()> {
        let records = vec![record(5.0, true)];
        let meta = SegmentMeta::from_records(&records, "cam0");
        let bytes = encode_package(&records, &meta)?;
        for cut in [1, 8, bytes.len() / 2, bytes.len() - 1] {
            assert!(decode_package(&bytes[..cut]).is_err(), "cut {}", cut);
        }
        Ok(())
    }

    #[test]
    fn trailing_bytes_are_rejected() -> Result<()> {
        let records = vec![record(5.0, false)];
        let meta = SegmentMeta::from_records(&records, "cam0");
        let mut bytes = encode_package(&records, &meta)?;
        bytes.push(0);
        assert!(decode_package(&bytes).is_err());
        Ok(())
    }

    #[test]
    fn unknown_class_id_is_rejected() -> Result<()> {
        let records = vec![record(5.0, true)];
        let meta = SegmentMeta::from_records(&records, "cam0");
        let mut bytes = encode_package(&records, &meta)?;
        // The class byte sits right before the meta length suffix.
        let meta_json_len = serde_json::to_vec(&meta)?.len();
        let class_pos = bytes.len() - 4 - meta_json_len - 1;
        bytes[class_pos] = 99;
        assert!(decode_package(&bytes).is_err());
        Ok(())
    }
}
