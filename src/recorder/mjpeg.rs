//! Pure-Rust MJPEG-in-AVI segment encoder.
//!
//! MJPEG is the recorder's universal fallback codec: every frame is an
//! independent JPEG inside a minimal RIFF/AVI container, so no external
//! codec library is needed. MJPEG is not valid in an MP4 container, which
//! is why segments produced by this encoder carry the `.avi` extension.
//!
//! Header sizes are unknown until the segment closes; placeholders are
//! written up front and patched in `finish`.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::frame::Frame;

/// AVIF_HASINDEX: the file carries an idx1 chunk.
const AVIF_HASINDEX: u32 = 0x0000_0010;
/// AVIIF_KEYFRAME: every MJPEG frame is independently decodable.
const AVIIF_KEYFRAME: u32 = 0x0000_0010;

pub struct MjpegAviWriter {
    file: File,
    width: u32,
    height: u32,
    fps: u32,
    jpeg_quality: u8,
    frame_count: u32,
    /// (offset from 'movi' fourcc, chunk data size) per frame, for idx1.
    index: Vec<(u32, u32)>,
    /// File offset of the 'movi' fourcc.
    movi_fourcc_pos: u64,
    /// Positions of the size placeholders patched on finish.
    riff_size_pos: u64,
    total_frames_pos: u64,
    stream_length_pos: u64,
    movi_size_pos: u64,
}

impl MjpegAviWriter {
    pub fn create(
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
        jpeg_quality: u8,
    ) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("create segment {}", path.display()))?;
        let mut writer = Self {
            file,
            width,
            height,
            fps: fps.max(1),
            jpeg_quality,
            frame_count: 0,
            index: Vec::new(),
            movi_fourcc_pos: 0,
            riff_size_pos: 0,
            total_frames_pos: 0,
            stream_length_pos: 0,
            movi_size_pos: 0,
        };
        writer.write_headers()?;
        Ok(writer)
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let jpeg = frame.to_jpeg(self.jpeg_quality)?;
        self.write_jpeg(&jpeg)
    }

    pub fn write_jpeg(&mut self, jpeg: &[u8]) -> Result<()> {
        let chunk_pos = self.file.stream_position()?;
        let offset = (chunk_pos - self.movi_fourcc_pos) as u32;

        self.file.write_all(b"00dc")?;
        self.file.write_all(&(jpeg.len() as u32).to_le_bytes())?;
        self.file.write_all(jpeg)?;
        if jpeg.len() % 2 == 1 {
            // RIFF chunks are word-aligned.
            self.file.write_all(&[0u8])?;
        }

        self.index.push((offset, jpeg.len() as u32));
        self.frame_count += 1;
        Ok(())
    }

    /// Write the index, patch the deferred sizes, and sync the file.
    pub fn finish(mut self) -> Result<()> {
        // 'movi' list size: everything from the fourcc to here, minus the
        // 8-byte list chunk header that precedes the fourcc.
        let movi_end = self.file.stream_position()?;
        let movi_size = (movi_end - self.movi_fourcc_pos) as u32;

        // idx1
        self.file.write_all(b"idx1")?;
        self.file
            .write_all(&((self.index.len() * 16) as u32).to_le_bytes())?;
        for (offset, size) in &self.index {
            self.file.write_all(b"00dc")?;
            self.file.write_all(&AVIIF_KEYFRAME.to_le_bytes())?;
            self.file.write_all(&offset.to_le_bytes())?;
            self.file.write_all(&size.to_le_bytes())?;
        }

        let file_end = self.file.stream_position()?;

        self.patch_u32(self.riff_size_pos, (file_end - 8) as u32)?;
        self.patch_u32(self.total_frames_pos, self.frame_count)?;
        self.patch_u32(self.stream_length_pos, self.frame_count)?;
        self.patch_u32(self.movi_size_pos, movi_size)?;

        self.file.seek(SeekFrom::End(0))?;
        self.file.sync_all()?;
        Ok(())
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    fn patch_u32(&mut self, pos: u64, value: u32) -> Result<()> {
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    fn write_headers(&mut self) -> Result<()> {
        let w = self.width;
        let h = self.height;

        self.file.write_all(b"RIFF")?;
        self.riff_size_pos = self.file.stream_position()?;
        self.file.write_all(&0u32.to_le_bytes())?; // patched
        self.file.write_all(b"AVI ")?;

        // hdrl list: avih (64 bytes) + strl list (124 bytes) + headers.
        // LIST hdrl size = 4 ('hdrl') + 8 + 56 (avih) + 8 + 116 (strl list)
        let strl_list_size: u32 = 4 + 8 + 56 + 8 + 40; // 'strl' + strh + strf
        let hdrl_list_size: u32 = 4 + 8 + 56 + 8 + strl_list_size;

        self.file.write_all(b"LIST")?;
        self.file.write_all(&hdrl_list_size.to_le_bytes())?;
        self.file.write_all(b"hdrl")?;

        // avih: MainAVIHeader
        self.file.write_all(b"avih")?;
        self.file.write_all(&56u32.to_le_bytes())?;
        let usec_per_frame = 1_000_000u32 / self.fps;
        self.file.write_all(&usec_per_frame.to_le_bytes())?;
        self.file
            .write_all(&(w * h * 3 * self.fps).to_le_bytes())?; // max bytes/sec (upper bound)
        self.file.write_all(&0u32.to_le_bytes())?; // padding granularity
        self.file.write_all(&AVIF_HASINDEX.to_le_bytes())?;
        self.total_frames_pos = self.file.stream_position()?;
        self.file.write_all(&0u32.to_le_bytes())?; // total frames, patched
        self.file.write_all(&0u32.to_le_bytes())?; // initial frames
        self.file.write_all(&1u32.to_le_bytes())?; // streams
        self.file.write_all(&(w * h * 3).to_le_bytes())?; // suggested buffer
        self.file.write_all(&w.to_le_bytes())?;
        self.file.write_all(&h.to_le_bytes())?;
        self.file.write_all(&[0u8; 16])?; // reserved

        // strl list
        self.file.write_all(b"LIST")?;
        self.file.write_all(&strl_list_size.to_le_bytes())?;
        self.file.write_all(b"strl")?;

        // strh: AVIStreamHeader
        self.file.write_all(b"strh")?;
        self.file.write_all(&56u32.to_le_bytes())?;
        self.file.write_all(b"vids")?;
        self.file.write_all(b"MJPG")?;
        self.file.write_all(&0u32.to_le_bytes())?; // flags
        self.file.write_all(&0u16.to_le_bytes())?; // priority
        self.file.write_all(&0u16.to_le_bytes())?; // language
        self.file.write_all(&0u32.to_le_bytes())?; // initial frames
        self.file.write_all(&1u32.to_le_bytes())?; // scale
        self.file.write_all(&self.fps.to_le_bytes())?; // rate
        self.file.write_all(&0u32.to_le_bytes())?; // start
        self.stream_length_pos = self.file.stream_position()?;
        self.file.write_all(&0u32.to_le_bytes())?; // length, patched
        self.file.write_all(&(w * h * 3).to_le_bytes())?; // suggested buffer
        self.file.write_all(&u32::MAX.to_le_bytes())?; // quality (default)
        self.file.write_all(&0u32.to_le_bytes())?; // sample size
        self.file.write_all(&0u16.to_le_bytes())?; // rcFrame left
        self.file.write_all(&0u16.to_le_bytes())?; // rcFrame top
        self.file.write_all(&(w as u16).to_le_bytes())?; // rcFrame right
        self.file.write_all(&(h as u16).to_le_bytes())?; // rcFrame bottom

        // strf: BITMAPINFOHEADER
        self.file.write_all(b"strf")?;
        self.file.write_all(&40u32.to_le_bytes())?;
        self.file.write_all(&40u32.to_le_bytes())?; // biSize
        self.file.write_all(&(w as i32).to_le_bytes())?;
        self.file.write_all(&(h as i32).to_le_bytes())?;
        self.file.write_all(&1u16.to_le_bytes())?; // planes
        self.file.write_all(&24u16.to_le_bytes())?; // bit count
        self.file.write_all(b"MJPG")?; // compression
        self.file.write_all(&(w * h * 3).to_le_bytes())?; // image size
        self.file.write_all(&[0u8; 16])?; // x/y pels, clr used/important

        // movi list
        self.file.write_all(b"LIST")?;
        self.movi_size_pos = self.file.stream_position()?;
        self.file.write_all(&0u32.to_le_bytes())?; // patched
        self.movi_fourcc_pos = self.file.stream_position()?;
        self.file.write_all(b"movi")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CaptureTs, CHANNELS};

    fn frame(w: u32, h: u32) -> Frame {
        Frame::new(
            vec![90u8; (w * h) as usize * CHANNELS],
            w,
            h,
            CaptureTs::now(),
        )
    }

    #[test]
    fn produces_a_well_formed_riff_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("public_cam0_20240115120000.avi");

        let mut writer = MjpegAviWriter::create(&path, 64, 48, 30, 85)?;
        for _ in 0..3 {
            writer.write_frame(&frame(64, 48))?;
        }
        assert_eq!(writer.frame_count(), 3);
        writer.finish()?;

        let bytes = std::fs::read(&path)?;
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"AVI ");
        // RIFF size covers the whole file minus the 8-byte RIFF header.
        let riff_size = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        assert_eq!(riff_size as usize, bytes.len() - 8);
        // The index chunk is present.
        assert!(bytes.windows(4).any(|w| w == b"idx1"));
        Ok(())
    }

    #[test]
    fn frame_chunks_contain_jpeg_magic() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("seg.avi");
        let mut writer = MjpegAviWriter::create(&path, 32, 32, 10, 85)?;
        writer.write_frame(&frame(32, 32))?;
        writer.finish()?;

        let bytes = std::fs::read(&path)?;
        let movi = bytes.windows(4).position(|w| w == b"movi").unwrap();
        assert_eq!(&bytes[movi + 4..movi + 8], b"00dc");
        // JPEG SOI marker right after the chunk header.
        assert_eq!(&bytes[movi + 12..movi + 14], &[0xFF, 0xD8]);
        Ok(())
    }

    #[test]
    fn total_frames_is_patched() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("seg.avi");
        let mut writer = MjpegAviWriter::create(&path, 16, 16, 5, 85)?;
        for _ in 0..7 {
            writer.write_frame(&frame(16, 16))?;
        }
        writer.finish()?;

        let bytes = std::fs::read(&path)?;
        // avih begins after RIFF(12) + LIST header(12): fourcc at 24,
        // size at 28, data at 32. dwTotalFrames is the 4th field.
        let total_frames_off = 32 + 16;
        let total = u32::from_le_bytes(
            bytes[total_frames_off..total_frames_off + 4]
                .try_into()
                .unwrap(),
        );
        assert_eq!(total, 7);
        Ok(())
    }
}
