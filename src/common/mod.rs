//! Shared helpers: currency parameters, varint encoding and clock access

pub mod currency;

pub use currency::*;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in seconds
pub fn unix_time_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Append `value` as a LEB128 varint
pub fn write_varint(buffer: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buffer.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buffer.push(value as u8);
}

/// Read a LEB128 varint, returning the value and the number of bytes consumed
pub fn read_varint(data: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, byte) in data.iter().enumerate() {
        if i >= 10 {
            return None;
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_encoding_matches_leb128() {
        let mut buffer = Vec::new();
        write_varint(&mut buffer, 300);
        assert_eq!(buffer, vec![0xac, 0x02]);
        assert_eq!(read_varint(&buffer), Some((300, 2)));
    }

    #[test]
    fn truncated_varint_is_rejected() {
        assert_eq!(read_varint(&[0x80, 0x80]), None);
    }
}
