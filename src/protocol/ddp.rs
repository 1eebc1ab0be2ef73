//! DDP packet encoding.
//!
//! Header layout (10 bytes, big-endian integers):
//! ```text
//! 0     version (high nibble 0x4) | flags (bit0 = PUSH)  -> 0x41
//! 1     reserved, 0
//! 2     data type, 0x01 = RGB
//! 3     output id, 0x01
//! 4..8  pixel offset (u32), always 0
//! 8..10 payload length in bytes (u16)
//! ```

use crate::error::ProtocolError;

pub const HEADER_LEN: usize = 10;

const VERSION_1: u8 = 0x40;
const FLAG_PUSH: u8 = 0x01;
const DATA_TYPE_RGB: u8 = 0x01;
const OUTPUT_ID: u8 = 0x01;

/// Build a single push packet carrying the whole string.
pub fn encode_packet(rgb: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let len = u16::try_from(rgb.len()).map_err(|_| ProtocolError::PayloadTooLarge(rgb.len()))?;

    let mut packet = Vec::with_capacity(HEADER_LEN + rgb.len());
    packet.push(VERSION_1 | FLAG_PUSH);
    packet.push(0x00);
    packet.push(DATA_TYPE_RGB);
    packet.push(OUTPUT_ID);
    packet.extend_from_slice(&0u32.to_be_bytes());
    packet.extend_from_slice(&len.to_be_bytes());
    packet.extend_from_slice(rgb);
    Ok(packet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_for_three_leds() {
        let rgb = [255, 0, 0, 0, 255, 0, 0, 0, 255];
        let packet = encode_packet(&rgb).unwrap();

        assert_eq!(packet.len(), HEADER_LEN + 9);
        assert_eq!(packet[0], 0x41, "Version 1 with PUSH flag");
        assert_eq!(&packet[1..4], &[0x00, 0x01, 0x01]);
        assert_eq!(&packet[4..8], &[0, 0, 0, 0], "Offset is always zero");
        assert_eq!(u16::from_be_bytes([packet[8], packet[9]]), 9, "Length field counts payload bytes");
        assert_eq!(&packet[HEADER_LEN..], &rgb);
    }

    #[test]
    fn test_empty_payload() {
        let packet = encode_packet(&[]).unwrap();
        assert_eq!(packet.len(), HEADER_LEN);
        assert_eq!(&packet[8..10], &[0, 0]);
    }

    #[test]
    fn test_length_is_big_endian() {
        let rgb = vec![1u8; 300 * 3];
        let packet = encode_packet(&rgb).unwrap();
        assert_eq!(&packet[8..10], &[0x03, 0x84], "900 = 0x0384");
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let rgb = vec![0u8; u16::MAX as usize + 1];
        assert!(matches!(encode_packet(&rgb), Err(ProtocolError::PayloadTooLarge(n)) if n == 65536));
    }
}
