//! Write side of the double-buffered shared-memory channel: a POSIX shared
//! memory object (`shm_open` + `mmap`) holding one [`ShmHeader`] and two
//! payload regions, with the header's `active_index` flipped after each
//! frame to hand the freshly written buffer to readers.

use std::fs::File;
use std::os::fd::OwnedFd;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use memmap2::MmapMut;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;

use crate::config::TransportConfig;
use crate::types::WorldFrame;

use super::layout::{self, BufferMeta, ShmHeader, BUFFER_META_SIZE};

/// Outcome of [`SharedMemoryWriter::send_world_frame`], for the caller's own
/// publish-rate bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Published,
    /// Frame dimensions exceed the configured maximum; dropped without
    /// touching shared memory.
    DroppedOversized,
}

pub struct SharedMemoryWriter {
    config: TransportConfig,
    mmap: Option<MmapMut>,
    active_index: u32,
    last_checksum_at: Option<Instant>,
}

impl SharedMemoryWriter {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            mmap: None,
            active_index: 0,
            last_checksum_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.mmap.is_some()
    }

    /// Creates (or re-creates) the shared-memory segment and writes an
    /// initial empty header. Idempotent: a second call while already
    /// running is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.mmap.is_some() {
            return Ok(());
        }
        let size = layout::segment_size(self.config.max_width, self.config.max_height);
        let fd: OwnedFd = shm_open(
            self.config.shm_name.as_str(),
            nix::fcntl::OFlag::O_CREAT | nix::fcntl::OFlag::O_RDWR | nix::fcntl::OFlag::O_TRUNC,
            Mode::from_bits_truncate(0o666),
        )
        .with_context(|| format!("shm_open({}) failed", self.config.shm_name))?;
        ftruncate(&fd, size as i64).context("ftruncate of shared-memory segment failed")?;

        let file = File::from(fd);
        let mut mmap = unsafe { MmapMut::map_mut(&file).context("mmap of shared-memory segment failed")? };

        let header = ShmHeader::default();
        header.write_to(&mut mmap);
        self.mmap = Some(mmap);
        self.active_index = 0;
        tracing::info!(target: "transport.server", name = %self.config.shm_name, size, "shared memory segment ready");
        Ok(())
    }

    /// Writes `frame` into the inactive buffer and flips `active_index` to
    /// publish it. Oversized frames (beyond `max_width`/`max_height`) are
    /// dropped rather than truncated, since a partial height map would be
    /// silently wrong.
    pub fn send_world_frame(&mut self, frame: &WorldFrame) -> Result<SendOutcome> {
        let should_refresh_checksum = self.config.checksum_interval_ms > 0 && self.should_refresh_checksum();
        let Some(mmap) = self.mmap.as_mut() else {
            bail!("send_world_frame called before start()");
        };
        let hm = &frame.height_map;
        if hm.width > self.config.max_width || hm.height > self.config.max_height {
            tracing::warn!(
                target: "transport.server",
                width = hm.width, height = hm.height,
                max_width = self.config.max_width, max_height = self.config.max_height,
                "dropping oversized world frame"
            );
            return Ok(SendOutcome::DroppedOversized);
        }

        let next_index = 1 - self.active_index;
        let payload_offset = layout::payload_offset(next_index as usize, self.config.max_width, self.config.max_height);
        let float_count = hm.data.len();
        let payload_bytes = float_count * std::mem::size_of::<f32>();
        let dest = &mut mmap[payload_offset..payload_offset + payload_bytes];
        for (chunk, value) in dest.chunks_exact_mut(4).zip(hm.data.iter()) {
            chunk.copy_from_slice(&value.to_ne_bytes());
        }

        // Checksum policy: a caller-supplied checksum wins outright; failing
        // that, recompute on the configured interval; otherwise publish with
        // no checksum (0) rather than restamping a previous frame's value
        // onto this frame's bytes.
        let checksum = if frame.checksum != 0 {
            frame.checksum
        } else if should_refresh_checksum {
            self.last_checksum_at = Some(Instant::now());
            crate::checksum::crc32_floats(&hm.data)
        } else {
            0
        };

        let meta = BufferMeta {
            frame_id: frame.frame_id,
            timestamp_ns: frame.timestamp_ns,
            width: hm.width,
            height: hm.height,
            float_count: float_count as u32,
            checksum,
            ready: 1,
        };
        let meta_offset = layout::OFFSET_BUFFERS + (next_index as usize) * BUFFER_META_SIZE;
        meta.write_to(mmap, meta_offset);
        mmap[layout::OFFSET_CHECKSUM_ALGORITHM..layout::OFFSET_CHECKSUM_ALGORITHM + 4]
            .copy_from_slice(&layout::CHECKSUM_CRC32.to_ne_bytes());

        // Published last: the single word a reader polls.
        ShmHeader::write_active_index(mmap, next_index);
        self.active_index = next_index;
        Ok(SendOutcome::Published)
    }

    /// Whether enough time has passed since the last computed checksum to
    /// recompute one now. Callers are expected to have already checked
    /// `checksum_interval_ms > 0`.
    fn should_refresh_checksum(&self) -> bool {
        match self.last_checksum_at {
            None => true,
            Some(at) => at.elapsed().as_millis() as u64 >= self.config.checksum_interval_ms,
        }
    }

    /// Unmaps and unlinks the shared-memory segment. Safe to call more than
    /// once or without a prior `start()`.
    pub fn stop(&mut self) {
        self.mmap = None;
        let _ = shm_unlink(self.config.shm_name.as_str());
    }
}

impl Drop for SharedMemoryWriter {
    fn drop(&mut self) {
        self.stop();
    }
}
