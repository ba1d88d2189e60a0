//! Filesystem IDs and their packed / `FSID:a:b` forms

use crate::error::{Error, Result};
use crate::jail::ffi::FSID_PREFIX;
use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Kernel-assigned identifier of a live mount (`fsid_t`)
///
/// `mount -v` prints the 8 raw bytes as 16 hex digits. Each 32-bit half is
/// little-endian, so `8bf7e1c0de000000` is `(-1058932853, 222)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FsId {
    pub val: [i32; 2],
}

impl FsId {
    pub fn new(val0: i32, val1: i32) -> Self {
        Self { val: [val0, val1] }
    }

    /// Decode the packed 16-hex-digit form
    pub fn from_packed(packed: &str) -> Result<Self> {
        if packed.len() != 16 {
            return Err(Error::MountTableParse(format!(
                "fsid '{}' is not 16 hex digits",
                packed
            )));
        }
        let bytes = hex::decode(packed)
            .map_err(|e| Error::MountTableParse(format!("fsid '{}': {}", packed, e)))?;

        Ok(Self::new(
            LittleEndian::read_i32(&bytes[0..4]),
            LittleEndian::read_i32(&bytes[4..8]),
        ))
    }

    /// Encode back into the packed form
    pub fn to_packed(&self) -> String {
        let mut bytes = [0u8; 8];
        LittleEndian::write_i32(&mut bytes[0..4], self.val[0]);
        LittleEndian::write_i32(&mut bytes[4..8], self.val[1]);
        hex::encode(bytes)
    }

    /// Parse the `FSID:<val0>:<val1>` unmount target form
    pub fn from_target(target: &str) -> Result<Self> {
        let invalid = || Error::MountTableParse(format!("invalid fsid target '{}'", target));

        let rest = target.strip_prefix(FSID_PREFIX).ok_or_else(invalid)?;
        let (val0, val1) = rest.split_once(':').ok_or_else(invalid)?;

        Ok(Self::new(
            val0.parse().map_err(|_| invalid())?,
            val1.parse().map_err(|_| invalid())?,
        ))
    }
}

/// Formats as the target string accepted by unmount(2) with `MNT_BYFSID`
impl fmt::Display for FsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}:{}", FSID_PREFIX, self.val[0], self.val[1])
    }
}

/// Accepts either the target form or the packed form
impl FromStr for FsId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.starts_with(FSID_PREFIX) {
            Self::from_target(s)
        } else {
            Self::from_packed(s)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_little_endian_halves() {
        let fsid = FsId::from_packed("8bf7e1c0de000000").unwrap();
        assert_eq!(fsid, FsId::new(-1058932853, 222));
        assert_eq!(fsid.to_string(), "FSID:-1058932853:222");
    }

    /// All-zero, all-ones, and every byte position holding each edge value
    /// on its own, so each half's sign bit and byte order get exercised
    fn edge_byte_patterns() -> Vec<[u8; 8]> {
        let mut patterns = vec![[0x00; 8], [0xff; 8]];
        for position in 0..8 {
            for value in [0x01, 0x7f, 0x80, 0xff] {
                let mut bytes = [0u8; 8];
                bytes[position] = value;
                patterns.push(bytes);
            }
        }
        patterns
    }

    #[test]
    fn test_round_trip_through_both_forms() {
        for bytes in edge_byte_patterns() {
            let packed: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            let decoded = FsId::from_packed(&packed).unwrap();

            let expected = [
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
                i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            ];
            assert_eq!(decoded.val, expected, "decoding {}", packed);
            assert_eq!(decoded.to_packed(), packed);
            assert_eq!(
                FsId::from_target(&decoded.to_string()).unwrap(),
                decoded,
                "target form of {}",
                packed
            );
        }
    }

    #[test]
    fn test_sign_bit_lands_in_the_right_half() {
        assert_eq!(
            FsId::from_packed("0000008000000000").unwrap(),
            FsId::new(i32::MIN, 0)
        );
        assert_eq!(
            FsId::from_packed("0000000000000080").unwrap(),
            FsId::new(0, i32::MIN)
        );
    }

    #[test]
    fn test_uppercase_hex() {
        assert_eq!(
            FsId::from_packed("FFFFFFFF07000000").unwrap(),
            FsId::new(-1, 7)
        );
    }

    #[test]
    fn test_reject_malformed() {
        assert!(FsId::from_packed("8bf7e1c0").is_err());
        assert!(FsId::from_packed("zzf7e1c0de000000").is_err());
        assert!(FsId::from_target("FSID:12").is_err());
        assert!(FsId::from_target("12:34").is_err());
    }

    #[test]
    fn test_from_str_detects_form() {
        assert_eq!("FSID:-1:7".parse::<FsId>().unwrap(), FsId::new(-1, 7));
        assert_eq!("ffffffff07000000".parse::<FsId>().unwrap(), FsId::new(-1, 7));
    }
}
