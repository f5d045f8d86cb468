// psi/section.rs
//! Generic private-section reader with CRC-32 (MPEG-2) validation.
//!
//! Input is one complete section starting at `table_id`; the pointer field
//! and packet boundaries are handled by the demuxer.

use crc::{Crc, CRC_32_MPEG_2};

use crate::error::SectionError;

pub const CRC_MPEG: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// Returned by [`SectionReader::new`].
#[derive(Debug, Clone, Copy)]
pub struct SectionReader<'a> {
    pub table_id:           u8,
    pub syntax_indicator:   bool,
    pub table_id_extension: u16,
    pub version:            u8,
    pub current_next:       bool,
    pub section_number:     u8,
    pub last_section:       u8,
    pub body:               &'a [u8],   // bytes between fixed header & CRC
}

impl<'a> SectionReader<'a> {
    /// Validates length and CRC-32 of a long-form section.
    pub fn new(section: &'a [u8]) -> Result<Self, SectionError> {
        let end = section_end(section)?;
        if end < 3 + 5 + 4 { return Err(SectionError::InvalidLength(end - 3)) }

        let syntax_indicator = section[1] & 0x80 != 0;
        if syntax_indicator {
            let crc_calc = CRC_MPEG.checksum(&section[..end - 4]);
            let crc_pkt  = u32::from_be_bytes([section[end-4], section[end-3], section[end-2], section[end-1]]);
            if crc_calc != crc_pkt {
                return Err(SectionError::CrcMismatch { calculated: crc_calc, carried: crc_pkt });
            }
        }

        Ok(Self {
            table_id:           section[0],
            syntax_indicator,
            table_id_extension: u16::from_be_bytes([section[3], section[4]]),
            version:            (section[5] & 0x3E) >> 1,
            current_next:       section[5] & 0x01 != 0,
            section_number:     section[6],
            last_section:       section[7],
            body:               &section[8 .. end - 4],
        })
    }

    /// Same as [`SectionReader::new`] but also checks the table id.
    pub fn expect(section: &'a [u8], table_id: u8) -> Result<Self, SectionError> {
        let sec = Self::new(section)?;
        if sec.table_id != table_id { return Err(SectionError::UnexpectedTable(sec.table_id)) }
        Ok(sec)
    }
}

/// Total byte length (`3 + section_length`) of the section at the head of
/// `section`, validated against the available bytes.
pub fn section_end(section: &[u8]) -> Result<usize, SectionError> {
    if section.len() < 3 { return Err(SectionError::TooShort(section.len())) }
    let sec_len = ((section[1] & 0x0F) as usize) << 8 | section[2] as usize;
    let end     = 3 + sec_len;
    if end > section.len() {
        return Err(SectionError::Truncated { expected: end, actual: section.len() });
    }
    Ok(end)
}

/// Iterates `tag, length, payload` descriptors; stops at the first entry
/// overrunning the loop.
pub fn descriptors(mut data: &[u8]) -> impl Iterator<Item = (u8, &[u8])> {
    std::iter::from_fn(move || {
        if data.len() < 2 { return None }
        let tag = data[0];
        let len = data[1] as usize;
        if 2 + len > data.len() { return None }
        let payload = &data[2 .. 2 + len];
        data = &data[2 + len ..];
        Some((tag, payload))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::build_section;

    #[test]
    fn reads_long_header_fields() {
        let sec = build_section(0x3C, 0x0001, 3, 2, 5, &[0xAA, 0xBB]);
        let r = SectionReader::new(&sec).unwrap();
        assert_eq!(r.table_id, 0x3C);
        assert_eq!(r.table_id_extension, 1);
        assert_eq!(r.version, 3);
        assert_eq!(r.section_number, 2);
        assert_eq!(r.last_section, 5);
        assert_eq!(r.body, &[0xAA, 0xBB]);
    }

    #[test]
    fn rejects_corrupted_crc() {
        let mut sec = build_section(0x00, 0x7FE0, 0, 0, 0, &[0, 1, 0xE1, 0x00]);
        let n = sec.len();
        sec[n - 1] ^= 0xFF;
        assert!(matches!(SectionReader::new(&sec), Err(SectionError::CrcMismatch { .. })));
    }

    #[test]
    fn rejects_truncated_section() {
        let sec = build_section(0x02, 1, 0, 0, 0, &[0; 16]);
        assert!(matches!(
            SectionReader::new(&sec[..sec.len() - 3]),
            Err(SectionError::Truncated { .. })
        ));
    }

    #[test]
    fn descriptor_loop_stops_on_overrun() {
        let data = [0x52, 1, 0x40, 0xFD, 9, 0x00];
        let found: Vec<_> = descriptors(&data).collect();
        assert_eq!(found, vec![(0x52, &[0x40][..])]);
    }
}
