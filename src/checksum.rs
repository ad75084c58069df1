//! CRC32 (polynomial 0xEDB88320, reflected, init/final 0xFFFFFFFF) over
//! byte and float buffers, used by the shared-memory transport's optional
//! integrity check.

/// CRC32 over raw bytes. This is the standard reflected CRC-32 (IEEE 802.3 /
/// zip) that `crc32fast` implements; callers never need polynomial details.
pub fn crc32_bytes(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// CRC32 over a float buffer, covering exactly `floats.len() * 4` bytes
/// (the little-endian byte representation of each `f32`), matching the
/// transport's checksum policy.
pub fn crc32_floats(floats: &[f32]) -> u32 {
    // f32 has no guaranteed uniform byte representation via `as_bytes` in
    // safe stable Rust, so we walk the slice and feed each value's LE bytes.
    // This must match a reader reconstructing the same buffer byte-for-byte.
    let mut hasher = crc32fast::Hasher::new();
    for value in floats {
        hasher.update(&value.to_le_bytes());
    }
    hasher.finalize()
}
