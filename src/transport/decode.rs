//! Chunk decoding
//!
//! Transports hand over raw byte chunks. Each chunk becomes one message, so
//! a multi-byte character split across two reads would otherwise render as
//! two replacement characters. The decoder keeps the incomplete tail and
//! prepends it to the next chunk.

/// Incremental UTF-8 decoder for one byte stream
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    remainder: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `chunk`; returns `None` when only a partial character is buffered
    pub fn decode(&mut self, chunk: &[u8]) -> Option<String> {
        let mut bytes = if self.remainder.is_empty() {
            chunk.to_vec()
        } else {
            let mut combined = std::mem::take(&mut self.remainder);
            combined.extend_from_slice(chunk);
            combined
        };

        let safe_end = find_utf8_safe_boundary(&bytes);
        if safe_end < bytes.len() {
            self.remainder = bytes[safe_end..].to_vec();
            bytes.truncate(safe_end);
        }

        if bytes.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&bytes).into_owned())
        }
    }

    /// Flush whatever is buffered at end of stream
    pub fn finish(&mut self) -> Option<String> {
        if self.remainder.is_empty() {
            None
        } else {
            let rest = std::mem::take(&mut self.remainder);
            Some(String::from_utf8_lossy(&rest).into_owned())
        }
    }
}

/// Find a safe UTF-8 boundary in a byte slice.
/// Returns the index up to which the bytes form complete UTF-8 characters;
/// a trailing incomplete multi-byte sequence is excluded.
pub fn find_utf8_safe_boundary(buf: &[u8]) -> usize {
    if buf.is_empty() {
        return 0;
    }

    let mut i = buf.len();

    // Max UTF-8 char is 4 bytes, only the tail can be incomplete
    while i > 0 && i > buf.len().saturating_sub(4) {
        let byte = buf[i - 1];

        // ASCII
        if byte & 0x80 == 0 {
            return i;
        }

        // Continuation byte, keep going back
        if byte & 0xC0 == 0x80 {
            i -= 1;
            continue;
        }

        let char_len = if byte & 0xF8 == 0xF0 {
            4
        } else if byte & 0xF0 == 0xE0 {
            3
        } else if byte & 0xE0 == 0xC0 {
            2
        } else {
            // Invalid start byte
            return i;
        };

        let start_pos = i - 1;
        let available = buf.len() - start_pos;

        return if available >= char_len {
            start_pos + char_len
        } else {
            start_pos
        };
    }

    buf.len()
}
