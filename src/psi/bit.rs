// psi/bit.rs
//! Broadcaster Information Table (table_id 0xC4).

use crate::constants::{descriptor_tag, table_id};
use crate::types::{BitBroadcaster, BitExtendedBroadcaster, BitService};
use super::section::{descriptors, SectionReader};
use super::decode_arib_text;

#[derive(Clone, Debug)]
pub struct BitSection {
    pub version:             u8,
    pub original_network_id: u16,
    pub broadcasters:        Vec<BitBroadcaster>,
}

pub fn parse_bit(section: &[u8]) -> anyhow::Result<BitSection> {
    let sec = SectionReader::expect(section, table_id::BIT)?;
    let b = sec.body;
    if b.len() < 2 { anyhow::bail!("BIT body too short") }

    let first_len = (((b[0] & 0x0F) as usize) << 8) | b[1] as usize;
    let mut idx = 2 + first_len;                        // SI parameter descriptors skipped

    let mut broadcasters = Vec::new();
    while idx + 3 <= b.len() {
        let broadcaster_id = b[idx];
        let desc_len = (((b[idx + 1] & 0x0F) as usize) << 8) | b[idx + 2] as usize;
        let end      = (idx + 3 + desc_len).min(b.len());

        let mut bc = BitBroadcaster { broadcaster_id, ..Default::default() };
        for (tag, d) in descriptors(&b[idx + 3 .. end]) {
            match tag {
                descriptor_tag::BROADCASTER_NAME => bc.broadcaster_name = Some(decode_arib_text(d)),
                descriptor_tag::SERVICE_LIST => {
                    bc.services = d.chunks_exact(3)
                        .map(|s| BitService {
                            service_id:   u16::from_be_bytes([s[0], s[1]]),
                            service_type: s[2],
                        })
                        .collect();
                }
                descriptor_tag::EXTENDED_BROADCASTER => parse_extended_broadcaster(d, &mut bc),
                _ => {}
            }
        }
        broadcasters.push(bc);
        idx += 3 + desc_len;
    }

    Ok(BitSection { version: sec.version, original_network_id: sec.table_id_extension, broadcasters })
}

/// Terrestrial (type 1) and terrestrial sound (type 2) layouts share the
/// affiliation / broadcaster loops.
fn parse_extended_broadcaster(d: &[u8], bc: &mut BitBroadcaster) {
    let broadcaster_type = d.first().map(|x| x >> 4);
    if !matches!(broadcaster_type, Some(1) | Some(2)) || d.len() < 4 { return }

    bc.terrestrial_broadcaster_id = Some(u16::from_be_bytes([d[1], d[2]]));
    let n_affiliations  = (d[3] >> 4) as usize;
    let n_broadcasters  = (d[3] & 0x0F) as usize;

    let aff_end = (4 + n_affiliations).min(d.len());
    bc.affiliations = d[4 .. aff_end].to_vec();

    bc.affiliation_broadcasters = d[aff_end..]
        .chunks_exact(3)
        .take(n_broadcasters)
        .map(|x| BitExtendedBroadcaster {
            original_network_id: u16::from_be_bytes([x[0], x[1]]),
            broadcaster_id:      x[2],
        })
        .collect();
}
