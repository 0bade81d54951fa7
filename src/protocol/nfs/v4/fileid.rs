//! Packing of open-file ids into the 96-bit opaque part of a stateid.
//!
//! The first two words carry the 64-bit file id big-endian, the third the
//! client's OPEN sequence id. The file id is recoverable from the first two
//! words alone.

/// Packs a file id and OPEN sequence id into stateid `other` words.
pub fn file_other(file_id: u64, client_seq_id: u32) -> [u32; 3] {
    [(file_id >> 32) as u32, file_id as u32, client_seq_id]
}

/// Recovers the file id packed by [`file_other`].
pub fn file_id(other: [u32; 3]) -> u64 {
    (u64::from(other[0]) << 32) + u64::from(other[1])
}
