//! Stream descriptor sections (table_id 0x3D): NPT reference and general
//! event descriptors.

use bitstream_io::{BigEndian, BitRead, BitReader};
use tracing::debug;

use crate::constants::descriptor_tag;
use crate::types::EsEvent;

const NPT_REFERENCE_MIN_LEN: usize = 18;
const GENERAL_EVENT_MIN_LEN: usize = 11;

/// Returns `(data_event_id, events)`. `table_id_extension` carries the
/// data_event_id in its top 4 bits.
pub fn parse_stream_descriptors(table_id_extension: u16, body: &[u8]) -> (u8, Vec<EsEvent>) {
    let data_event_id = (table_id_extension >> 12) as u8;
    let mut events = Vec::new();

    let mut i = 0;
    while i + 1 < body.len() {
        let tag = body[i];
        let len = body[i + 1] as usize;
        let Some(d) = body.get(i + 2 .. i + 2 + len) else {
            debug!(tag, len, "stream descriptor overruns section");
            break;
        };
        i += 2 + len;

        let event = match tag {
            descriptor_tag::NPT_REFERENCE if len >= NPT_REFERENCE_MIN_LEN => npt_reference(d),
            descriptor_tag::GENERAL_EVENT if len >= GENERAL_EVENT_MIN_LEN => general_event(d),
            _ => None,
        };
        events.extend(event);
    }
    (data_event_id, events)
}

fn npt_reference(d: &[u8]) -> Option<EsEvent> {
    let mut br = BitReader::endian(d, BigEndian);
    let post_discontinuity_indicator = br.read_bit().ok()?;
    let dsm_content_id = br.read::<7, u8>().ok()?;
    br.skip(7).ok()?;
    let stc_reference  = br.read::<33, u64>().ok()?;
    br.skip(31).ok()?;
    let npt_reference  = br.read::<33, u64>().ok()?;
    Some(EsEvent::NptReference {
        post_discontinuity_indicator,
        dsm_content_id,
        stc_reference,
        npt_reference,
        scale_numerator:   br.read::<16, u16>().ok()?,
        scale_denominator: br.read::<16, u16>().ok()?,
    })
}

/// Only time modes 0 (immediate) and 2 (NPT) are operated.
fn general_event(d: &[u8]) -> Option<EsEvent> {
    let event_message_group_id = u16::from_be_bytes([d[0], d[1]]) >> 4;
    let time_mode              = d[2];
    let event_message_type     = d[8];
    let event_message_id       = u16::from_be_bytes([d[9], d[10]]);
    let private_data_byte      = d[11..].to_vec();

    match time_mode {
        0x00 => Some(EsEvent::ImmediateEvent {
            event_message_group_id, time_mode, event_message_type, event_message_id, private_data_byte,
        }),
        0x02 => {
            let mut br = BitReader::endian(&d[3..8], BigEndian);
            br.skip(7).ok()?;
            let event_message_npt = br.read::<33, u64>().ok()?;
            Some(EsEvent::NptEvent {
                event_message_group_id, time_mode, event_message_npt,
                event_message_type, event_message_id, private_data_byte,
            })
        }
        other => {
            debug!(time_mode = other, "general event time mode not handled");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_npt_reference_and_events() {
        let mut body = vec![0x17, 18,
            0x00, 0xFF, 0x00, 0x00, 0x10, 0x00,         // STC = 0x1_0000_1000 (bit 32 set)
            0xFF, 0xFF, 0xFE, 0x00, 0x00, 0x00, 0x00, 0x20,
            0x00, 0x01, 0x00, 0x01];
        body.extend_from_slice(&[0x40, 12, 0x00, 0x10, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01, 0x00, 0x05, 0xAA]);
        body.extend_from_slice(&[0x40, 11, 0x00, 0x20, 0x02, 0xFF, 0x00, 0x00, 0x01, 0x00, 0x02, 0x00, 0x06]);

        let (event_id, events) = parse_stream_descriptors(0x3001, &body);
        assert_eq!(event_id, 3);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], EsEvent::NptReference {
            post_discontinuity_indicator: false,
            dsm_content_id: 0,
            stc_reference: 0x1_0000_1000,
            npt_reference: 0x20,
            scale_numerator: 1,
            scale_denominator: 1,
        });
        assert_eq!(events[1], EsEvent::ImmediateEvent {
            event_message_group_id: 1, time_mode: 0, event_message_type: 1,
            event_message_id: 5, private_data_byte: vec![0xAA],
        });
        assert_eq!(events[2], EsEvent::NptEvent {
            event_message_group_id: 2, time_mode: 2, event_message_npt: 0x1_0000_0100,
            event_message_type: 2, event_message_id: 6, private_data_byte: vec![],
        });
    }

    #[test]
    fn short_descriptor_skipped_overrun_stops() {
        let body = [0x40, 2, 0x00, 0x00,  0x40, 11, 0x00, 0x10, 0x00, 0, 0, 0, 0, 0, 1, 0, 1,  0x17, 40, 0x00];
        let (_, events) = parse_stream_descriptors(0, &body);
        assert_eq!(events.len(), 1);
    }
}
