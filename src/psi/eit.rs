// psi/eit.rs
//! EIT present/following (actual TS, table_id 0x4E).

use crate::constants::{descriptor_tag, table_id};
use super::section::{descriptors, SectionReader};
use super::tdt::{decode_bcd_duration, decode_jst_time};
use super::decode_arib_text;

#[derive(Clone, Debug)]
pub struct EitPfSection {
    pub version:             u8,
    pub service_id:          u16,
    pub current_next:        bool,
    pub section_number:      u8,
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub events:              Vec<EitEvent>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EitEvent {
    pub event_id:               u16,
    pub start_time_unix_millis: Option<i64>,
    pub duration_seconds:       Option<u32>,
    /// short_event_descriptor event name
    pub event_name:             Option<String>,
}

pub fn parse_eit_pf(section: &[u8]) -> anyhow::Result<EitPfSection> {
    let sec = SectionReader::expect(section, table_id::EIT_PF_ACTUAL)?;
    let b = sec.body;
    if b.len() < 6 { anyhow::bail!("EIT body too short") }

    let mut idx = 6;
    let mut events = Vec::new();
    while idx + 12 <= b.len() {
        let e = &b[idx..];
        let desc_len = (((e[10] & 0x0F) as usize) << 8) | e[11] as usize;
        let end      = (idx + 12 + desc_len).min(b.len());
        let event_name = descriptors(&b[idx + 12 .. end])
            .find(|(tag, _)| *tag == descriptor_tag::SHORT_EVENT)
            .and_then(|(_, d)| {
                // ISO_639_language_code(24) event_name_length(8)
                let len = *d.get(3)? as usize;
                d.get(4 .. 4 + len).map(decode_arib_text)
            });
        events.push(EitEvent {
            event_id:               u16::from_be_bytes([e[0], e[1]]),
            start_time_unix_millis: decode_jst_time(&e[2..7]).map(|t| t.timestamp_millis()),
            duration_seconds:       decode_bcd_duration(&e[7..10]),
            event_name,
        });
        idx += 12 + desc_len;
    }

    Ok(EitPfSection {
        version:             sec.version,
        service_id:          sec.table_id_extension,
        current_next:        sec.current_next,
        section_number:      sec.section_number,
        transport_stream_id: u16::from_be_bytes([b[0], b[1]]),
        original_network_id: u16::from_be_bytes([b[2], b[3]]),
        events,
    })
}
