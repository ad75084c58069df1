//! Read side of the double-buffered shared-memory channel: opens the
//! segment read-only, validates the header, and exposes the currently
//! published buffer as a borrowed [`FrameView`].
//!
//! Ported directly from the original `SharedMemoryReader`: open once, poll
//! `latest()` as often as needed, verify the checksum only when the caller
//! actually wants the integrity guarantee.

use std::fs::File;

use anyhow::{bail, Context, Result};
use memmap2::Mmap;
use nix::fcntl::OFlag;
use nix::sys::mman::shm_open;
use nix::sys::stat::Mode;

use super::layout::{self, ShmHeader};

/// A borrowed view of the most recently published frame. Valid only for as
/// long as the originating [`SharedMemoryReader`] stays open; a writer may
/// overwrite the *other* buffer concurrently, but never the one this view
/// points at until the active index flips away from it.
pub struct FrameView<'a> {
    pub frame_id: u64,
    pub timestamp_ns: u64,
    pub width: u32,
    pub height: u32,
    pub data: &'a [f32],
    pub checksum: u32,
    pub checksum_algorithm: u32,
}

impl FrameView<'_> {
    /// `true` if no checksum was recorded for this frame (a zero checksum is
    /// the writer's sentinel for "not computed this frame", whether because
    /// checksumming is off or the recompute interval hadn't elapsed yet), or
    /// if the recomputed CRC32 matches the recorded one.
    pub fn verify_checksum(&self) -> bool {
        if self.checksum == 0 {
            return true;
        }
        match self.checksum_algorithm {
            layout::CHECKSUM_NONE => true,
            layout::CHECKSUM_CRC32 => crate::checksum::crc32_floats(self.data) == self.checksum,
            _ => true, // unknown algorithm: non-fatal, caller may warn
        }
    }
}

pub struct SharedMemoryReader {
    mmap: Option<Mmap>,
    max_width: u32,
    max_height: u32,
}

impl SharedMemoryReader {
    pub fn new() -> Self {
        Self {
            mmap: None,
            max_width: 0,
            max_height: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.mmap.is_some()
    }

    /// Opens and validates the segment's header (magic + version). Returns
    /// an error rather than silently treating a mismatched layout as empty.
    pub fn open(&mut self, shm_name: &str, max_width: u32, max_height: u32) -> Result<()> {
        let fd = shm_open(shm_name, OFlag::O_RDONLY, Mode::empty())
            .with_context(|| format!("shm_open({shm_name}) failed"))?;
        let file = File::from(fd);
        let mmap = unsafe { Mmap::map(&file).context("mmap of shared-memory segment failed")? };

        if mmap.len() < layout::HEADER_SIZE {
            bail!("shared-memory segment too small for header ({} bytes)", mmap.len());
        }
        let header = ShmHeader::read_from(&mmap);
        if header.magic != layout::MAGIC {
            bail!("shared-memory segment magic mismatch: got {:#x}", header.magic);
        }
        if header.version != layout::VERSION {
            bail!("shared-memory segment version mismatch: got {}", header.version);
        }

        self.mmap = Some(mmap);
        self.max_width = max_width;
        self.max_height = max_height;
        Ok(())
    }

    pub fn close(&mut self) {
        self.mmap = None;
    }

    /// The latest frame ready to read, or `None` if the writer has not
    /// published anything yet (or the reader is not open).
    pub fn latest(&self) -> Option<FrameView<'_>> {
        let mmap = self.mmap.as_ref()?;
        let header = ShmHeader::read_from(mmap);
        let idx = header.active_index;
        if idx > 1 {
            return None;
        }
        let meta = header.buffers[idx as usize];
        if meta.ready != 1 {
            return None;
        }

        let offset = layout::payload_offset(idx as usize, self.max_width, self.max_height);
        let byte_len = (meta.float_count as usize) * std::mem::size_of::<f32>();
        if offset + byte_len > mmap.len() {
            return None;
        }
        let bytes = &mmap[offset..offset + byte_len];
        // SAFETY: `bytes` is exactly `float_count * 4` bytes sliced from the
        // mapped segment at a `HEADER_SIZE`-aligned offset; `HEADER_SIZE` is
        // a multiple of 4 (see layout tests), and the platform's mmap base is
        // page-aligned, so this slice is 4-byte aligned for `f32`.
        let data = unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const f32, meta.float_count as usize) };

        Some(FrameView {
            frame_id: meta.frame_id,
            timestamp_ns: meta.timestamp_ns,
            width: meta.width,
            height: meta.height,
            data,
            checksum: meta.checksum,
            checksum_algorithm: header.checksum_algorithm,
        })
    }
}

impl Default for SharedMemoryReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::transport::writer::SharedMemoryWriter;
    use crate::types::{HeightMap, WorldFrame};

    #[test]
    fn reader_sees_frame_published_by_writer() {
        let name = "/caldera_test_reader_a";
        let mut writer = SharedMemoryWriter::new(TransportConfig {
            shm_name: name.to_string(),
            max_width: 4,
            max_height: 4,
            checksum_interval_ms: 0,
        });
        writer.start().unwrap();
        let mut hm = HeightMap::new(2, 2);
        hm.data = vec![1.0, 2.0, 3.0, 4.0];
        writer
            .send_world_frame(&WorldFrame {
                frame_id: 3,
                timestamp_ns: 55,
                height_map: hm,
                checksum: 0,
            })
            .unwrap();

        let mut reader = SharedMemoryReader::new();
        reader.open(name, 4, 4).unwrap();
        let view = reader.latest().expect("frame should be ready");
        assert_eq!(view.frame_id, 3);
        assert_eq!(view.data, &[1.0, 2.0, 3.0, 4.0]);
        assert!(view.verify_checksum());

        writer.stop();
    }

    #[test]
    fn reader_rejects_wrong_magic_segment() {
        let name = "/caldera_test_reader_b";
        // A bare POSIX shm segment with no header at all should fail to open.
        let fd = shm_open(name, OFlag::O_CREAT | OFlag::O_RDWR | OFlag::O_TRUNC, Mode::from_bits_truncate(0o666)).unwrap();
        nix::unistd::ftruncate(&fd, layout::HEADER_SIZE as i64).unwrap();
        drop(fd);

        let mut reader = SharedMemoryReader::new();
        let result = reader.open(name, 4, 4);
        assert!(result.is_err());
        let _ = nix::sys::mman::shm_unlink(name);
    }
}
