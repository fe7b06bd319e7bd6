//! Byte-order handling for the receiving architectures a legacy ACR-NEMA
//! stream may have been written for.
//!
//! The eight historical architecture codes collapse to four byte layouts,
//! each with an optional flag telling that ASCII text fields were stored
//! with every byte pair swapped. A layout describes how the four bytes of
//! a big-endian field `A B C D` appear in the file.

use std::io::Read;

use crate::reader::ReadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// `A B C D`, most significant byte first.
    BigEndian,
    /// `B A D C`.
    BytePairSwapped,
    /// `D C B A`.
    #[default]
    LittleEndian,
    /// `C D A B`.
    WordSwapped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArchType {
    pub order: ByteOrder,
    /// Text fields hold byte-pair swapped characters.
    pub swapped_text: bool,
}

impl ArchType {
    pub const LITTLE_ENDIAN: ArchType = ArchType {
        order: ByteOrder::LittleEndian,
        swapped_text: false,
    };

    pub const BIG_ENDIAN: ArchType = ArchType {
        order: ByteOrder::BigEndian,
        swapped_text: false,
    };

    pub fn new(order: ByteOrder) -> Self {
        Self {
            order,
            swapped_text: false,
        }
    }

    /// Maps a legacy `TYPE1`..`TYPE8` receiver code.
    pub fn from_legacy_code(code: u8) -> Option<Self> {
        let order = match code {
            1 | 5 => ByteOrder::BigEndian,
            2 | 6 => ByteOrder::BytePairSwapped,
            3 | 7 => ByteOrder::LittleEndian,
            4 | 8 => ByteOrder::WordSwapped,
            _ => return None,
        };
        Some(Self {
            order,
            swapped_text: code >= 5,
        })
    }

    /// Orders a 16-bit field read straight from the stream.
    pub fn decode_u16(&self, raw: [u8; 2]) -> u16 {
        match self.order {
            ByteOrder::BigEndian | ByteOrder::WordSwapped => u16::from_be_bytes(raw),
            ByteOrder::BytePairSwapped | ByteOrder::LittleEndian => u16::from_le_bytes(raw),
        }
    }

    /// Orders a 32-bit field read straight from the stream.
    pub fn decode_u32(&self, raw: [u8; 4]) -> u32 {
        let [a, b, c, d] = raw;
        match self.order {
            ByteOrder::BigEndian => u32::from_be_bytes(raw),
            ByteOrder::BytePairSwapped => u32::from_be_bytes([b, a, d, c]),
            ByteOrder::LittleEndian => u32::from_le_bytes(raw),
            ByteOrder::WordSwapped => u32::from_be_bytes([c, d, a, b]),
        }
    }

    pub fn encode_u16(&self, value: u16) -> [u8; 2] {
        match self.order {
            ByteOrder::BigEndian | ByteOrder::WordSwapped => value.to_be_bytes(),
            ByteOrder::BytePairSwapped | ByteOrder::LittleEndian => value.to_le_bytes(),
        }
    }

    pub fn encode_u32(&self, value: u32) -> [u8; 4] {
        let [a, b, c, d] = value.to_be_bytes();
        match self.order {
            ByteOrder::BigEndian => [a, b, c, d],
            ByteOrder::BytePairSwapped => [b, a, d, c],
            ByteOrder::LittleEndian => [d, c, b, a],
            ByteOrder::WordSwapped => [c, d, a, b],
        }
    }
}

/// Reads one 16-bit value at the current stream position.
pub fn read_u16<R: Read>(stream: &mut R, arch: ArchType, offset: u64) -> Result<u16, ReadError> {
    let mut raw = [0u8; 2];
    read_exact(stream, &mut raw, offset)?;
    Ok(arch.decode_u16(raw))
}

/// Reads one 32-bit value at the current stream position.
pub fn read_u32<R: Read>(stream: &mut R, arch: ArchType, offset: u64) -> Result<u32, ReadError> {
    let mut raw = [0u8; 4];
    read_exact(stream, &mut raw, offset)?;
    Ok(arch.decode_u32(raw))
}

pub(crate) fn read_exact<R: Read>(
    stream: &mut R,
    buffer: &mut [u8],
    offset: u64,
) -> Result<(), ReadError> {
    stream.read_exact(buffer).map_err(|err| match err.kind() {
        std::io::ErrorKind::UnexpectedEof => ReadError::ShortRead { offset },
        _ => ReadError::Io(err),
    })
}

/// Undoes the pairwise character swap of `TYPE5`..`TYPE8` text fields.
/// An odd trailing byte stays in place.
pub fn swap_text_pairs(text: &mut [u8]) {
    for pair in text.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const FIELD: [u8; 4] = [0x11, 0x22, 0x33, 0x44];

    #[test]
    fn legacy_codes_share_layouts() {
        for (low, high) in [(1, 5), (2, 6), (3, 7), (4, 8)] {
            let a = ArchType::from_legacy_code(low).unwrap();
            let b = ArchType::from_legacy_code(high).unwrap();
            assert_eq!(a.order, b.order);
            assert!(!a.swapped_text);
            assert!(b.swapped_text);
        }
        assert!(ArchType::from_legacy_code(0).is_none());
        assert!(ArchType::from_legacy_code(9).is_none());
    }

    #[test]
    fn decodes_each_layout() {
        let value = |order| ArchType::new(order).decode_u32(FIELD);
        assert_eq!(value(ByteOrder::BigEndian), 0x1122_3344);
        assert_eq!(value(ByteOrder::BytePairSwapped), 0x2211_4433);
        assert_eq!(value(ByteOrder::LittleEndian), 0x4433_2211);
        assert_eq!(value(ByteOrder::WordSwapped), 0x3344_1122);

        let short = |order| ArchType::new(order).decode_u16([0x11, 0x22]);
        assert_eq!(short(ByteOrder::BigEndian), 0x1122);
        assert_eq!(short(ByteOrder::LittleEndian), 0x2211);
        assert_eq!(short(ByteOrder::BytePairSwapped), 0x2211);
        assert_eq!(short(ByteOrder::WordSwapped), 0x1122);
    }

    #[test]
    fn encode_inverts_decode() {
        for order in [
            ByteOrder::BigEndian,
            ByteOrder::BytePairSwapped,
            ByteOrder::LittleEndian,
            ByteOrder::WordSwapped,
        ] {
            let arch = ArchType::new(order);
            assert_eq!(arch.decode_u32(arch.encode_u32(0xDEAD_BEEF)), 0xDEAD_BEEF);
            assert_eq!(arch.decode_u16(arch.encode_u16(0xBEEF)), 0xBEEF);
        }
    }

    #[test]
    fn truncated_stream_is_short_read() {
        let mut stream = Cursor::new(vec![0x01, 0x02, 0x03]);
        let err = read_u32(&mut stream, ArchType::LITTLE_ENDIAN, 40).unwrap_err();
        assert!(matches!(err, ReadError::ShortRead { offset: 40 }));
    }

    #[test]
    fn swaps_text_pairs() {
        let mut text = *b"1.2.34";
        swap_text_pairs(&mut text);
        assert_eq!(&text, b".1.243");
        let mut odd = *b"abc";
        swap_text_pairs(&mut odd);
        assert_eq!(&odd, b"bac");
    }
}
