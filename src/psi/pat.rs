// psi/pat.rs
use crate::constants::table_id;
use crate::psi::section::SectionReader;

/// ─────────── PAT ───────────
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatSection {
    pub version:             u8,
    pub transport_stream_id: u16,
    pub programs:            Vec<PatEntry>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatEntry {
    pub program_number: u16,
    pub pmt_pid:        u16,
}

/// Program 0 (network PID) entries are skipped.
pub fn parse_pat(section: &[u8]) -> anyhow::Result<PatSection> {
    let sec = SectionReader::expect(section, table_id::PAT)?;

    let programs = sec.body
        .chunks_exact(4)
        .map(|e| PatEntry {
            program_number: u16::from_be_bytes([e[0], e[1]]),
            pmt_pid:        (((e[2] & 0x1F) as u16) << 8) | (e[3] as u16),
        })
        .filter(|e| e.program_number != 0)
        .collect();

    Ok(PatSection { version: sec.version, transport_stream_id: sec.table_id_extension, programs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::build_section;

    #[test]
    fn test_parse_pat_skips_network_pid() {
        let body = [0x00, 0x00, 0xE0, 0x10,  0x04, 0x08, 0xE1, 0xF0];
        let pat = parse_pat(&build_section(0x00, 0x7FE1, 1, 0, 0, &body)).unwrap();
        assert_eq!(pat.transport_stream_id, 0x7FE1);
        assert_eq!(pat.programs, vec![PatEntry { program_number: 0x0408, pmt_pid: 0x01F0 }]);
    }
}
