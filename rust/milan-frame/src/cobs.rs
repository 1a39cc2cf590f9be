//! Consistent Overhead Byte Stuffing.
//!
//! Classic COBS: the output carries no zero bytes, each group header
//! counts the non-zero bytes that follow plus one, and a header of 0xff
//! marks a maximal 254-byte group with no implied zero. The frame
//! delimiter itself is written by the serial-line protocol, not here.

use milan_wire::{Error, Result};

/// Longest run of non-zero bytes in one group.
const MAX_GROUP: u8 = 0xff;

/// Encode `data` so the result contains no zero bytes.
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 254 + 2);
    let mut code_at = out.len();
    out.push(0);
    let mut code: u8 = 1;

    for &byte in data {
        if byte == 0 {
            out[code_at] = code;
            code_at = out.len();
            out.push(0);
            code = 1;
        } else {
            out.push(byte);
            code += 1;
            if code == MAX_GROUP {
                out[code_at] = code;
                code_at = out.len();
                out.push(0);
                code = 1;
            }
        }
    }

    out[code_at] = code;
    out
}

/// Decode a COBS frame (without its trailing delimiter).
pub fn decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let code = data[i];
        if code == 0 {
            return Err(Error::data_mismatch("zero byte inside cobs frame"));
        }
        i += 1;
        let run = (code - 1) as usize;
        if i + run > data.len() {
            return Err(Error::data_mismatch("cobs group overruns frame"));
        }
        for &byte in &data[i..i + run] {
            if byte == 0 {
                return Err(Error::data_mismatch("zero byte inside cobs group"));
            }
            out.push(byte);
        }
        i += run;
        if code != MAX_GROUP && i < data.len() {
            out.push(0);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(data: &[u8]) {
        let encoded = encode(data);
        assert!(!encoded.contains(&0), "encoded form must be zero-free");
        assert_eq!(decode(&encoded).unwrap(), data);
    }

    #[test]
    fn known_encodings() {
        assert_eq!(encode(&[]), [0x01]);
        assert_eq!(encode(&[0x00]), [0x01, 0x01]);
        assert_eq!(encode(&[0x00, 0x00]), [0x01, 0x01, 0x01]);
        assert_eq!(encode(&[0x11, 0x22, 0x00, 0x33]), [0x03, 0x11, 0x22, 0x02, 0x33]);
        assert_eq!(encode(&[0x11, 0x00]), [0x02, 0x11, 0x01]);
    }

    #[test]
    fn empty_and_zero_heavy_inputs() {
        roundtrip(&[]);
        roundtrip(&[0]);
        roundtrip(&[0; 600]);
    }

    #[test]
    fn maximal_group_boundaries() {
        // Runs right at and around the 254-byte group limit.
        for len in [253usize, 254, 255, 300, 508, 509, 1000] {
            let data: Vec<u8> = (0..len).map(|i| (i % 255) as u8 + 1).collect();
            roundtrip(&data);
        }
    }

    #[test]
    fn exact_254_run_has_no_phantom_zero() {
        let data = vec![0xaau8; 254];
        let encoded = encode(&data);
        assert_eq!(encoded.len(), 256);
        assert_eq!(encoded[0], 0xff);
        assert_eq!(decode(&encoded).unwrap(), data);
    }

    #[test]
    fn mixed_content() {
        let mut data = Vec::new();
        for i in 0..2048u32 {
            if i % 7 == 0 {
                data.push(0);
            } else {
                data.push(((i * 31) % 256) as u8);
            }
        }
        roundtrip(&data);
    }

    #[test]
    fn malformed_frames_rejected() {
        // Embedded zero.
        assert!(decode(&[0x02, 0x00]).is_err());
        // Group claims more bytes than present.
        assert!(decode(&[0x05, 0x01]).is_err());
        // Leading zero header.
        assert!(decode(&[0x00]).is_err());
    }
}
