//! Frame checksum: CRC-16/CCITT in its reflected form.
//!
//! Polynomial 0x8408 (0x1021 bit-reversed), register preset to 0xFFFF,
//! complemented on output, then the two output bytes are swapped. The
//! server computes the same value over the same bytes; any deviation here
//! makes every frame fail integrity on the far side.

const POLY: u16 = 0x8408;

/// Compute the frame checksum over `data`.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        let mut bits = byte as u16;
        for _ in 0..8 {
            if (crc ^ bits) & 0x0001 != 0 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
            bits >>= 1;
        }
    }

    (!crc).swap_bytes()
}
