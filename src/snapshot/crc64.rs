//! CRC-64 used by the dump file trailer
//!
//! Jones polynomial, bit-reflected, initial value 0, no final xor. The exact
//! parameters are part of the on-disk contract: the trailer of every dump
//! file must verify against files produced by the reference server.

use lazy_static::lazy_static;

/// Reflected form of the Jones polynomial 0xad93d23594c935a9.
const POLY_REFLECTED: u64 = 0x95AC_9329_AC4B_C9B5;

lazy_static! {
    static ref CRC64_TABLE: [u64; 256] = {
        let mut table = [0u64; 256];
        let mut i = 0usize;
        while i < 256 {
            let mut crc = i as u64;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 { (crc >> 1) ^ POLY_REFLECTED } else { crc >> 1 };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };
}

/// Fold `data` into a running checksum. Start from 0 for a fresh stream.
pub fn crc64(mut crc: u64, data: &[u8]) -> u64 {
    for &byte in data {
        crc = CRC64_TABLE[((crc ^ byte as u64) & 0xFF) as usize] ^ (crc >> 8);
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_answer() {
        // Reference check value for this polynomial/parameter set
        assert_eq!(crc64(0, b"123456789"), 0xe9c6_d914_c4b8_d9ca);
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let oneshot = crc64(0, data);
        let mut running = 0;
        for chunk in data.chunks(7) {
            running = crc64(running, chunk);
        }
        assert_eq!(running, oneshot);
    }

    #[test]
    fn test_empty_input_is_identity() {
        assert_eq!(crc64(0, b""), 0);
        assert_eq!(crc64(42, b""), 42);
    }
}
