// psi/pmt.rs
use bitstream_io::{BigEndian, BitRead, BitReader};

use crate::constants::{descriptor_tag, table_id, BXML_DATA_COMPONENT_IDS};
use crate::psi::section::{descriptors, SectionReader};
use crate::types::{AribCarouselInfo, BxmlEntryPointInfo, BxmlInfo};

/// ─────────── PMT ───────────
#[derive(Clone, Debug)]
pub struct PmtSection {
    pub version:        u8,
    pub program_number: u16,
    pub pcr_pid:        u16,
    pub streams:        Vec<StreamInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamInfo {
    pub stream_type:       u8,
    pub elementary_pid:    u16,
    /// stream_identifier_descriptor (0x52)
    pub component_tag:     Option<u8>,
    /// data_component_descriptor (0xFD)
    pub data_component_id: Option<u16>,
    pub bxml_info:         Option<BxmlInfo>,
}

pub fn parse_pmt(section: &[u8]) -> anyhow::Result<PmtSection> {
    let sec = SectionReader::expect(section, table_id::PMT)?;
    let b = sec.body;
    if b.len() < 4 { anyhow::bail!("PMT body too short") }

    /* ── fixed header inside body ── */
    let pcr_pid       = (((b[0] & 0x1F) as u16) << 8) | (b[1] as u16);
    let prog_info_len = (((b[2] & 0x0F) as usize) << 8) | (b[3] as usize);
    let mut idx       = 4 + prog_info_len;          // program descriptors skipped

    /* ── ES loop ── */
    let mut streams = Vec::new();
    while idx + 5 <= b.len() {
        let stype = b[idx];
        let pid   = (((b[idx+1] & 0x1F) as u16) << 8) | (b[idx+2] as u16);
        let eslen = (((b[idx+3] & 0x0F) as usize) << 8) | (b[idx+4] as usize);
        let end   = (idx + 5 + eslen).min(b.len());

        let mut info = StreamInfo {
            stream_type: stype, elementary_pid: pid,
            component_tag: None, data_component_id: None, bxml_info: None,
        };
        for (tag, d) in descriptors(&b[idx+5 .. end]) {
            match tag {
                descriptor_tag::STREAM_IDENTIFIER if !d.is_empty() => info.component_tag = Some(d[0]),
                descriptor_tag::DATA_COMPONENT if d.len() >= 2 => {
                    let id = u16::from_be_bytes([d[0], d[1]]);
                    info.data_component_id = Some(id);
                    if BXML_DATA_COMPONENT_IDS.contains(&id) {
                        info.bxml_info = decode_bxml_info(&d[2..]);
                    }
                }
                _ => {}
            }
        }
        streams.push(info);
        idx += 5 + eslen;
    }

    Ok(PmtSection { version: sec.version,
                    program_number: sec.table_id_extension,
                    pcr_pid,
                    streams })
}

/// additional_arib_bxml_info; `None` when truncated.
pub fn decode_bxml_info(data: &[u8]) -> Option<BxmlInfo> {
    let mut br = BitReader::endian(data, BigEndian);

    let transmission_format = br.read::<2, u8>().ok()?;
    let entry_point_flag    = br.read_bit().ok()?;

    let entry_point_info = if entry_point_flag {
        let auto_start_flag      = br.read_bit().ok()?;
        let document_resolution  = br.read::<4, u8>().ok()?;
        let use_xml              = br.read_bit().ok()?;
        let default_version_flag = br.read_bit().ok()?;
        let independent_flag     = br.read_bit().ok()?;
        let style_for_tv_flag    = br.read_bit().ok()?;
        br.skip(4).ok()?;                                   // reserved

        let mut info = BxmlEntryPointInfo {
            auto_start_flag, document_resolution, use_xml, default_version_flag,
            independent_flag, style_for_tv_flag,
            bml_major_version: 1, bml_minor_version: 0,
            bxml_major_version: None, bxml_minor_version: None,
        };
        if !default_version_flag {
            info.bml_major_version = br.read::<16, u16>().ok()?;
            info.bml_minor_version = br.read::<16, u16>().ok()?;
            if use_xml {
                info.bxml_major_version = Some(br.read::<16, u16>().ok()?);
                info.bxml_minor_version = Some(br.read::<16, u16>().ok()?);
            }
        }
        Some(info)
    } else {
        br.skip(5 + 8).ok()?;                               // reserved
        None
    };

    // additional_arib_carousel_info, only for data carousel transmission
    let additional_arib_carousel_info = if transmission_format == 0 {
        let data_event_id      = br.read::<4, u8>().ok()?;
        let event_section_flag = br.read_bit().ok()?;
        br.skip(3).ok()?;
        let ondemand_retrieval_flag = br.read_bit().ok()?;
        let file_storable_flag      = br.read_bit().ok()?;
        let start_priority          = br.read::<1, u8>().ok()?;
        Some(AribCarouselInfo {
            data_event_id, event_section_flag, ondemand_retrieval_flag,
            file_storable_flag, start_priority,
        })
    } else {
        None
    };

    Some(BxmlInfo { transmission_format, entry_point_flag, entry_point_info, additional_arib_carousel_info })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::build_section;

    #[test]
    fn test_bxml_info_entry_point_with_versions() {
        // format 0, entry point, auto start, resolution 3
        // use_xml 0, default_version 0, independent, style_for_tv
        let data = [0b0011_0011, 0b0011_0000, 0x00, 0x03, 0x00, 0x00, 0xF8, 0xA0];
        let info = decode_bxml_info(&data).unwrap();
        assert_eq!(info.transmission_format, 0);
        let ep = info.entry_point_info.unwrap();
        assert!(ep.auto_start_flag);
        assert_eq!(ep.document_resolution, 3);
        assert!(ep.independent_flag && ep.style_for_tv_flag && !ep.use_xml);
        assert_eq!(ep.bml_major_version, 3);
        let car = info.additional_arib_carousel_info.unwrap();
        assert_eq!(car.data_event_id, 0xF);
        assert!(car.event_section_flag);
        assert!(car.ondemand_retrieval_flag && !car.file_storable_flag);
        assert_eq!(car.start_priority, 1);
    }

    #[test]
    fn test_bxml_info_truncated() {
        assert!(decode_bxml_info(&[0b0010_0000]).is_none());
    }

    #[test]
    fn test_parse_pmt_component_descriptors() {
        let mut body = vec![0xE1, 0x00, 0xF0, 0x00];
        // data ES on 0x0130: stream id descr (tag 0x40) + data component descr 0x000C
        body.extend_from_slice(&[0x0D, 0xE1, 0x30, 0xF0, 0x0B]);
        body.extend_from_slice(&[0x52, 0x01, 0x40]);
        body.extend_from_slice(&[0xFD, 0x06, 0x00, 0x0C, 0b0001_0000, 0x00, 0xF8, 0xA0]);
        // video without descriptors
        body.extend_from_slice(&[0x02, 0xE1, 0x11, 0xF0, 0x00]);

        let pmt = parse_pmt(&build_section(0x02, 0x0400, 2, 0, 0, &body)).unwrap();
        assert_eq!(pmt.program_number, 0x0400);
        assert_eq!(pmt.pcr_pid, 0x0100);
        assert_eq!(pmt.streams.len(), 2);
        let data = &pmt.streams[0];
        assert_eq!(data.component_tag, Some(0x40));
        assert_eq!(data.data_component_id, Some(0x0C));
        let bxml = data.bxml_info.as_ref().unwrap();
        assert!(!bxml.entry_point_flag);
        assert!(bxml.additional_arib_carousel_info.is_some());
        assert_eq!(pmt.streams[1].component_tag, None);
    }
}
