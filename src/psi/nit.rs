// psi/nit.rs
//! Network Information Table (actual network, tid 0x40)
use crate::constants::table_id;
use crate::psi::section::SectionReader;

#[derive(Clone, Debug)]
pub struct NitSection {
    pub version:    u8,
    pub network_id: u16,
    pub transports: Vec<Transport>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transport {
    pub ts_id:       u16,
    pub orig_net_id: u16,
}

pub fn parse_nit(section: &[u8]) -> anyhow::Result<NitSection> {
    let sec = SectionReader::expect(section, table_id::NIT_ACTUAL)?;

    let b = sec.body;                 // CRC already stripped
    if b.len() < 4 {
        anyhow::bail!("NIT body too short");
    }

    let net_desc_len = (((b[0] & 0x0F) as usize) << 8) | b[1] as usize;
    let mut idx = 2 + net_desc_len;   // skip network descriptors
    if idx + 2 > b.len() { anyhow::bail!("truncated network descriptors"); }
    idx += 2;                         // transport_stream_loop_length

    let mut transports = Vec::new();
    while idx + 6 <= b.len() {
        let ts_id       = u16::from_be_bytes([b[idx], b[idx + 1]]);
        let orig_net_id = u16::from_be_bytes([b[idx + 2], b[idx + 3]]);
        let desc_len    = (((b[idx + 4] & 0x0F) as usize) << 8) | b[idx + 5] as usize;
        idx += 6 + desc_len;
        transports.push(Transport { ts_id, orig_net_id });
        if idx > b.len() { break; }   // malformed length, keep what we have
    }

    Ok(NitSection { version: sec.version, network_id: sec.table_id_extension, transports })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::build_section;

    #[test]
    fn test_parse_nit_transport_loop() {
        let body = [0xF0, 0x00, 0xF0, 0x06, 0x7F, 0xE1, 0x7F, 0xE1, 0xF0, 0x00];
        let nit = parse_nit(&build_section(0x40, 0x7FE1, 0, 0, 0, &body)).unwrap();
        assert_eq!(nit.network_id, 0x7FE1);
        assert_eq!(nit.transports, vec![Transport { ts_id: 0x7FE1, orig_net_id: 0x7FE1 }]);
    }
}
