// psi/sdt.rs
use crate::constants::table_id;
use super::section::SectionReader;

#[derive(Clone, Debug)]
pub struct SdtSection {
    pub version:             u8,
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub services:            Vec<Service>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Service {
    pub service_id:                 u16,
    pub eit_present_following_flag: bool,
}

/// SDT actual (table_id 0x42).
pub fn parse_sdt(section: &[u8]) -> anyhow::Result<SdtSection> {
    let sec = SectionReader::expect(section, table_id::SDT_ACTUAL)?;

    let b = sec.body;
    if b.len() < 3 {
        anyhow::bail!("SDT body too short");
    }
    let original_network_id = u16::from_be_bytes([b[0], b[1]]);

    let mut idx = 3;                              // start of service loop
    let mut services = Vec::new();
    while idx + 5 <= b.len() {
        let service_id = u16::from_be_bytes([b[idx], b[idx + 1]]);
        let eit_pf     = b[idx + 2] & 0x01 != 0;
        let desc_len   = (((b[idx + 3] & 0x0F) as usize) << 8) | b[idx + 4] as usize;
        idx += 5 + desc_len;
        if idx > b.len() { break; }               // graceful exit on malformed len
        services.push(Service { service_id, eit_present_following_flag: eit_pf });
    }

    Ok(SdtSection {
        version: sec.version,
        transport_stream_id: sec.table_id_extension,
        original_network_id,
        services,
    })
}
