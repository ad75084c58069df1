//! Byte layout of the double-buffered shared-memory segment, shared by the
//! writer and reader so both sides agree on offsets without a serialization
//! library: a fixed header followed by two `BufferMeta` descriptors and two
//! contiguous `f32` payload regions.

pub const MAGIC: u32 = 0x4341_4C44; // "CALD"
pub const VERSION: u32 = 2;

pub const CHECKSUM_NONE: u32 = 0;
pub const CHECKSUM_CRC32: u32 = 1;

/// Per-buffer descriptor, 40 bytes: two `u64` fields followed by five `u32`
/// fields. `repr(C)` gives the `u64`s 8-byte alignment, which pads the
/// struct to 40 bytes — matching the original layout exactly.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferMeta {
    pub frame_id: u64,
    pub timestamp_ns: u64,
    pub width: u32,
    pub height: u32,
    pub float_count: u32,
    pub checksum: u32,
    pub ready: u32,
}

pub const BUFFER_META_SIZE: usize = std::mem::size_of::<BufferMeta>();

impl BufferMeta {
    /// Encodes this descriptor into `buf` at `offset`, native-endian, matching
    /// the field order a C `reinterpret_cast` over the same bytes would see.
    pub fn write_to(&self, buf: &mut [u8], offset: usize) {
        let mut o = offset;
        buf[o..o + 8].copy_from_slice(&self.frame_id.to_ne_bytes());
        o += 8;
        buf[o..o + 8].copy_from_slice(&self.timestamp_ns.to_ne_bytes());
        o += 8;
        buf[o..o + 4].copy_from_slice(&self.width.to_ne_bytes());
        o += 4;
        buf[o..o + 4].copy_from_slice(&self.height.to_ne_bytes());
        o += 4;
        buf[o..o + 4].copy_from_slice(&self.float_count.to_ne_bytes());
        o += 4;
        buf[o..o + 4].copy_from_slice(&self.checksum.to_ne_bytes());
        o += 4;
        buf[o..o + 4].copy_from_slice(&self.ready.to_ne_bytes());
    }

    pub fn read_from(buf: &[u8], offset: usize) -> Self {
        let mut o = offset;
        let frame_id = u64::from_ne_bytes(buf[o..o + 8].try_into().unwrap());
        o += 8;
        let timestamp_ns = u64::from_ne_bytes(buf[o..o + 8].try_into().unwrap());
        o += 8;
        let width = u32::from_ne_bytes(buf[o..o + 4].try_into().unwrap());
        o += 4;
        let height = u32::from_ne_bytes(buf[o..o + 4].try_into().unwrap());
        o += 4;
        let float_count = u32::from_ne_bytes(buf[o..o + 4].try_into().unwrap());
        o += 4;
        let checksum = u32::from_ne_bytes(buf[o..o + 4].try_into().unwrap());
        o += 4;
        let ready = u32::from_ne_bytes(buf[o..o + 4].try_into().unwrap());
        Self {
            frame_id,
            timestamp_ns,
            width,
            height,
            float_count,
            checksum,
            ready,
        }
    }
}

/// Fixed-size segment header: magic, version, active buffer index, checksum
/// algorithm, then both buffer descriptors.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ShmHeader {
    pub magic: u32,
    pub version: u32,
    pub active_index: u32,
    pub checksum_algorithm: u32,
    pub buffers: [BufferMeta; 2],
}

pub const HEADER_SIZE: usize = std::mem::size_of::<ShmHeader>();

pub const OFFSET_MAGIC: usize = 0;
pub const OFFSET_VERSION: usize = 4;
pub const OFFSET_ACTIVE_INDEX: usize = 8;
pub const OFFSET_CHECKSUM_ALGORITHM: usize = 12;
pub const OFFSET_BUFFERS: usize = 16;

impl ShmHeader {
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[OFFSET_MAGIC..OFFSET_MAGIC + 4].copy_from_slice(&self.magic.to_ne_bytes());
        buf[OFFSET_VERSION..OFFSET_VERSION + 4].copy_from_slice(&self.version.to_ne_bytes());
        buf[OFFSET_ACTIVE_INDEX..OFFSET_ACTIVE_INDEX + 4].copy_from_slice(&self.active_index.to_ne_bytes());
        buf[OFFSET_CHECKSUM_ALGORITHM..OFFSET_CHECKSUM_ALGORITHM + 4].copy_from_slice(&self.checksum_algorithm.to_ne_bytes());
        self.buffers[0].write_to(buf, OFFSET_BUFFERS);
        self.buffers[1].write_to(buf, OFFSET_BUFFERS + BUFFER_META_SIZE);
    }

    pub fn read_from(buf: &[u8]) -> Self {
        let magic = u32::from_ne_bytes(buf[OFFSET_MAGIC..OFFSET_MAGIC + 4].try_into().unwrap());
        let version = u32::from_ne_bytes(buf[OFFSET_VERSION..OFFSET_VERSION + 4].try_into().unwrap());
        let active_index = u32::from_ne_bytes(buf[OFFSET_ACTIVE_INDEX..OFFSET_ACTIVE_INDEX + 4].try_into().unwrap());
        let checksum_algorithm =
            u32::from_ne_bytes(buf[OFFSET_CHECKSUM_ALGORITHM..OFFSET_CHECKSUM_ALGORITHM + 4].try_into().unwrap());
        let buffers = [
            BufferMeta::read_from(buf, OFFSET_BUFFERS),
            BufferMeta::read_from(buf, OFFSET_BUFFERS + BUFFER_META_SIZE),
        ];
        Self {
            magic,
            version,
            active_index,
            checksum_algorithm,
            buffers,
        }
    }

    /// Writes only the `active_index` word, the single field a reader polls
    /// to discover a new frame. Done last so a concurrent reader never
    /// observes a flipped index with a stale buffer descriptor.
    pub fn write_active_index(buf: &mut [u8], index: u32) {
        buf[OFFSET_ACTIVE_INDEX..OFFSET_ACTIVE_INDEX + 4].copy_from_slice(&index.to_ne_bytes());
    }
}

impl Default for ShmHeader {
    fn default() -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            active_index: 0,
            checksum_algorithm: CHECKSUM_NONE,
            buffers: [BufferMeta::default(); 2],
        }
    }
}

/// Total mapped segment size for a given max frame resolution: header plus
/// two payload regions of `max_width * max_height` `f32` samples each.
pub fn segment_size(max_width: u32, max_height: u32) -> usize {
    let payload_bytes = (max_width as usize) * (max_height as usize) * std::mem::size_of::<f32>();
    HEADER_SIZE + payload_bytes * 2
}

/// Byte offset of payload buffer `index` (0 or 1) within the segment.
pub fn payload_offset(index: usize, max_width: u32, max_height: u32) -> usize {
    let payload_bytes = (max_width as usize) * (max_height as usize) * std::mem::size_of::<f32>();
    HEADER_SIZE + index * payload_bytes
}
