//! Binary versus ASCII STL detection.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::debug;

/// Size of the binary STL header.
pub const HEADER_SIZE: usize = 80;

/// Size of one binary STL triangle record.
pub const TRIANGLE_RECORD_SIZE: usize = 50;

/// Byte length of a binary STL declaring `count` triangles.
pub fn expected_binary_size(count: u32) -> u64 {
    (HEADER_SIZE + 4) as u64 + u64::from(count) * TRIANGLE_RECORD_SIZE as u64
}

/// Classify an STL file from its first bytes and its total length.
///
/// A header not starting with `solid` is binary. A header starting with
/// `solid` is binary only when the triangle count that would follow it
/// predicts the total length exactly.
pub fn classify_header(header: &[u8], total_len: u64) -> bool {
    if !header.starts_with(b"solid") {
        return true;
    }
    match header.get(HEADER_SIZE..HEADER_SIZE + 4) {
        Some(count) => {
            let count = u32::from_le_bytes([count[0], count[1], count[2], count[3]]);
            expected_binary_size(count) == total_len
        }
        None => false,
    }
}

/// Returns `true` if the file at `path` is a binary STL.
///
/// Unreadable files classify as not binary; the decoder that follows
/// reports the I/O failure.
pub fn is_binary_stl(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    let Ok(mut file) = File::open(path) else {
        return false;
    };
    let Ok(total_len) = file.metadata().map(|m| m.len()) else {
        return false;
    };

    let mut header = Vec::with_capacity(HEADER_SIZE + 4);
    if file
        .by_ref()
        .take((HEADER_SIZE + 4) as u64)
        .read_to_end(&mut header)
        .is_err()
    {
        return false;
    }

    let binary = classify_header(&header, total_len);
    debug!(path = %path.display(), total_len, binary, "classified STL");
    binary
}
