//! Code specific to the container format.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`read`] and [`write`] modules.
//!
//! A container is laid out as:
//!
//! ```text
//! +---------------------------+
//! | Decoder executable        |  LenDecoder bytes
//! +---------------------------+
//! | Deflated tar stream       |  LenTar bytes
//! +---------------------------+
//! | JSON metadata             |  LenJson bytes
//! +---------------------------+
//! | Footer                    |  32 bytes
//! +---------------------------+
//! ```
//!
//! The footer is four big-endian `i64`s so that a reader can find every
//! section after a single seek to the end of the file.
//!
//! [`read`]: ../read/index.html
//! [`write`]: ../write/index.html

use std::convert::TryInto;
use std::ops::Range;

use crate::result::*;

/// Identifies a container. It looks kind of like DEFLATED if you squint hard.
pub const SIGNATURE: i64 = 0xDEF1_A7ED;

/// Size of the footer at the very end of every container
pub const FOOTER_SIZE: usize = 32;

/// Reads a big-endian i64 from the front of the provided slice, shrinking it.
fn read_i64(input: &mut &[u8]) -> i64 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<i64>());
    *input = rest;
    i64::from_be_bytes(int_bytes.try_into().expect("less than eight bytes for i64"))
}

/// The fixed-length trailer of a container
///
/// Lengths are signed on disk,
/// but a valid container never has a negative (or zero) one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    /// How long the decoder is (i.e., where the tar stream starts)
    pub decoder_len: i64,
    /// How long the deflated tar stream is
    pub tree_len: i64,
    /// How long the JSON metadata is
    pub metadata_len: i64,
    /// Always [`SIGNATURE`] in a valid container
    pub signature: i64,
}

impl Footer {
    pub fn new(decoder_len: i64, tree_len: i64, metadata_len: i64) -> Self {
        Self {
            decoder_len,
            tree_len,
            metadata_len,
            signature: SIGNATURE,
        }
    }

    pub fn to_bytes(&self) -> [u8; FOOTER_SIZE] {
        let mut buf = [0u8; FOOTER_SIZE];
        buf[0..8].copy_from_slice(&self.decoder_len.to_be_bytes());
        buf[8..16].copy_from_slice(&self.tree_len.to_be_bytes());
        buf[16..24].copy_from_slice(&self.metadata_len.to_be_bytes());
        buf[24..32].copy_from_slice(&self.signature.to_be_bytes());
        buf
    }

    pub fn parse(mut footer: &[u8]) -> SfxResult<Self> {
        // LenDecoder  8 bytes
        // LenTar      8 bytes
        // LenJson     8 bytes
        // Signature   8 bytes  (0x00000000DEF1A7ED)
        if footer.len() != FOOTER_SIZE {
            return Err(SfxError::InvalidContainer("Footer is the wrong size"));
        }
        let decoder_len = read_i64(&mut footer);
        let tree_len = read_i64(&mut footer);
        let metadata_len = read_i64(&mut footer);
        let signature = read_i64(&mut footer);

        if signature != SIGNATURE {
            return Err(SfxError::InvalidContainer("Bad signature"));
        }

        Ok(Self {
            decoder_len,
            tree_len,
            metadata_len,
            signature,
        })
    }

    /// Checks that the three sections and the footer exactly tile
    /// a container of `container_len` bytes.
    pub fn check_layout(&self, container_len: u64) -> SfxResult<()> {
        if self.decoder_len <= 0 || self.tree_len <= 0 || self.metadata_len <= 0 {
            return Err(SfxError::InvalidContainer(
                "Section lengths must all be positive",
            ));
        }
        let expected = self
            .decoder_len
            .checked_add(self.tree_len)
            .and_then(|n| n.checked_add(self.metadata_len))
            .and_then(|n| n.checked_add(FOOTER_SIZE as i64))
            .ok_or(SfxError::InvalidContainer("Section lengths overflow"))?;

        if u64::try_from(expected).ok() != Some(container_len) {
            return Err(SfxError::InvalidContainer(
                "Section lengths don't match the file size",
            ));
        }
        Ok(())
    }

    // The ranges below assume check_layout() passed.

    pub fn decoder_range(&self) -> Range<u64> {
        0..self.decoder_len as u64
    }

    pub fn tree_range(&self) -> Range<u64> {
        let start = self.decoder_len as u64;
        start..start + self.tree_len as u64
    }

    pub fn metadata_range(&self) -> Range<u64> {
        let start = self.tree_range().end;
        start..start + self.metadata_len as u64
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn byte_layout() {
        let footer = Footer::new(1, 0x0102, 14);
        let bytes = footer.to_bytes();
        assert_eq!(&bytes[0..8], &[0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(&bytes[8..16], &[0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(&bytes[16..24], &[0, 0, 0, 0, 0, 0, 0, 14]);
        assert_eq!(&bytes[24..32], &[0, 0, 0, 0, 0xDE, 0xF1, 0xA7, 0xED]);
        assert_eq!(Footer::parse(&bytes).unwrap(), footer);
    }

    #[test]
    fn bad_signature() {
        let mut bytes = Footer::new(1, 2, 3).to_bytes();
        bytes[31] ^= 1;
        match Footer::parse(&bytes) {
            Err(SfxError::InvalidContainer(_)) => { /* Cool. */ }
            other => panic!("Expected a format error, got {:?}", other),
        }
    }

    #[test]
    fn wrong_size() {
        let bytes = Footer::new(1, 2, 3).to_bytes();
        assert!(matches!(
            Footer::parse(&bytes[1..]),
            Err(SfxError::InvalidContainer(_))
        ));
    }

    #[test]
    fn layout_checks() {
        let footer = Footer::new(10, 20, 30);
        footer.check_layout(92).unwrap();
        assert!(footer.check_layout(91).is_err());
        assert!(footer.check_layout(93).is_err());

        assert_eq!(footer.decoder_range(), 0..10);
        assert_eq!(footer.tree_range(), 10..30);
        assert_eq!(footer.metadata_range(), 30..60);

        // Zero-length sections mean the build never finished.
        assert!(Footer::new(0, 20, 30).check_layout(82).is_err());
        assert!(Footer::new(10, 0, 30).check_layout(72).is_err());
        assert!(Footer::new(10, 20, 0).check_layout(62).is_err());
        // Negative ones that happen to sum correctly are still garbage.
        assert!(Footer::new(-10, 40, 30).check_layout(92).is_err());

        let huge = Footer::new(i64::MAX, i64::MAX, 1);
        assert!(matches!(
            huge.check_layout(u64::MAX),
            Err(SfxError::InvalidContainer(_))
        ));
    }
}
