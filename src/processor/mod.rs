//! Transport stream demultiplexer: PSI/SI tracking, program selection and
//! DSM-CC carousel sections turned into protocol messages.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, trace, warn};

use crate::carousel::CarouselReassembler;
use crate::constants::*;
use crate::dsmcc::{parse_ddb, parse_dii, parse_stream_descriptors};
use crate::psi::section::section_end;
use crate::psi::{parse_bit, parse_eit_pf, parse_nit, parse_pat, parse_pmt, parse_sdt, parse_tdt_tot, SectionReader};
use crate::types::{
    BitMessage, ComponentPmt, CurrentTime, EsEventUpdated, Message, Pcr, PmtMessage, ProgramInfo,
};

/// Per-PID accumulation of sections spanning several packets.
#[derive(Debug, Default)]
struct SectionBuffer {
    data:               Vec<u8>,
    continuity_counter: Option<u8>,
    /// set once a payload_unit_start has been seen
    synced:             bool,
}

impl SectionBuffer {
    fn reset(&mut self) {
        self.data.clear();
        self.synced = false;
    }

    /// Appends one packet payload and returns every section it completed.
    fn push(&mut self, payload: &[u8], start: bool, cc: u8) -> Vec<Vec<u8>> {
        if let Some(prev) = self.continuity_counter {
            if cc == prev {
                return Vec::new();                       // duplicate packet
            }
            if cc != (prev + 1) & 0x0F {
                trace!(expected = (prev + 1) & 0x0F, cc, "continuity error");
                self.reset();
            }
        }
        self.continuity_counter = Some(cc);

        let mut sections = Vec::new();
        if start {
            let Some((&pointer, rest)) = payload.split_first() else { return sections };
            let pointer = pointer as usize;
            if pointer > rest.len() {
                self.reset();
                return sections;
            }
            // tail of the previous section
            if self.synced {
                self.data.extend_from_slice(&rest[..pointer]);
                self.drain(&mut sections);
            }
            self.data.clear();
            self.data.extend_from_slice(&rest[pointer..]);
            self.synced = true;
        } else if self.synced {
            self.data.extend_from_slice(payload);
        } else {
            return sections;
        }
        self.drain(&mut sections);
        sections
    }

    fn drain(&mut self, out: &mut Vec<Vec<u8>>) {
        loop {
            if self.data.first().is_none_or(|&tid| tid == 0xFF) {
                self.data.clear();                       // stuffing
                return;
            }
            match section_end(&self.data) {
                Ok(end) => {
                    out.push(self.data.drain(..end).collect());
                }
                Err(_) => {
                    if self.data.len() > MAX_SECTION_SIZE { self.reset() }
                    return;
                }
            }
        }
    }
}

/// Demuxer configuration.
#[derive(Debug, Clone, Default)]
pub struct DemuxOptions {
    /// Program to follow; the first program of the PAT when unset.
    pub service_id: Option<u16>,
}

/// Identifiers of the tuned stream gathered from PAT/NIT/SDT.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamIds {
    pub network_id:          Option<u16>,
    pub original_network_id: Option<u16>,
    pub transport_stream_id: Option<u16>,
    pub service_id:          Option<u16>,
}

pub struct SectionDemuxer {
    opts:                  DemuxOptions,
    section_buffers:       HashMap<u16, SectionBuffer>,
    pid_to_program_number: HashMap<u16, u16>,
    program_number:        Option<u16>,
    pat_retrieved:         bool,
    pmt_retrieved:         bool,
    one_seg_pmt_count:     u32,
    one_seg:               bool,
    pid_to_component:      HashMap<u16, ComponentPmt>,
    component_ids:         HashSet<u8>,
    pcr_pid:               Option<u16>,
    carousel:              CarouselReassembler,
    current_time:          Option<i64>,
    network_id:            Option<u16>,
    nit_transports:        HashMap<u16, u16>,  // ts_id -> original_network_id
    sdt_ids:               Option<(u16, u16)>, // (transport_stream_id, original_network_id)
    transport_stream_id:   Option<u16>,
    program_info:          Option<ProgramInfo>,
}

impl SectionDemuxer {
    pub fn new(opts: DemuxOptions) -> Self {
        Self {
            opts,
            section_buffers:       HashMap::new(),
            pid_to_program_number: HashMap::new(),
            program_number:        None,
            pat_retrieved:         false,
            pmt_retrieved:         false,
            one_seg_pmt_count:     0,
            one_seg:               false,
            pid_to_component:      HashMap::new(),
            component_ids:         HashSet::new(),
            pcr_pid:               None,
            carousel:              CarouselReassembler::new(),
            current_time:          None,
            network_id:            None,
            nit_transports:        HashMap::new(),
            sdt_ids:               None,
            transport_stream_id:   None,
            program_info:          None,
        }
    }

    pub fn is_one_seg(&self) -> bool { self.one_seg }

    pub fn program_number(&self) -> Option<u16> { self.opts.service_id.or(self.program_number) }

    pub fn carousel(&self) -> &CarouselReassembler { &self.carousel }

    /// Components of the selected program, by PID.
    pub fn components(&self) -> &HashMap<u16, ComponentPmt> { &self.pid_to_component }

    /// Feeds raw TS bytes; packets are located by sync byte.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Message> {
        let mut out = Vec::new();
        let mut offset = 0;
        while offset + TS_PACKET_SIZE <= data.len() {
            if data[offset] != TS_SYNC_BYTE {
                offset += 1;
                continue;
            }
            self.process_packet(&data[offset .. offset + TS_PACKET_SIZE], &mut out);
            offset += TS_PACKET_SIZE;
        }
        out
    }

    /// Process a single TS packet
    pub fn process_packet(&mut self, chunk: &[u8], out: &mut Vec<Message>) {
        if chunk.len() < TS_PACKET_SIZE || chunk[0] != TS_SYNC_BYTE {
            return;
        }
        let transport_error     = chunk[1] & 0x80 != 0;
        let payload_unit_start  = chunk[1] & 0x40 != 0;
        let pid                 = (((chunk[1] & 0x1F) as u16) << 8) | (chunk[2] as u16);
        let scrambling          = chunk[3] >> 6;
        let adaption_field_ctrl = (chunk[3] & 0x30) >> 4;
        let cc                  = chunk[3] & 0x0F;
        if transport_error || pid == NULL_PID {
            return;
        }

        let mut payload_offset = 4usize;
        if adaption_field_ctrl & 0x02 != 0 {
            let adap_len = chunk[4] as usize;
            if Some(pid) == self.pcr_pid && adap_len >= 7 && chunk[5] & 0x10 != 0 {
                out.push(Message::Pcr(read_pcr(&chunk[6..12])));
            }
            payload_offset += 1 + adap_len;
        }
        if adaption_field_ctrl & 0x01 == 0 || payload_offset >= TS_PACKET_SIZE || scrambling != 0 {
            return;
        }
        if !self.wants_sections(pid) {
            return;
        }

        let payload  = &chunk[payload_offset..];
        let sections = self.section_buffers.entry(pid).or_default().push(payload, payload_unit_start, cc);
        for section in sections {
            self.process_section(pid, &section, out);
        }
    }

    fn wants_sections(&self, pid: u16) -> bool {
        matches!(pid, PAT_PID | NIT_PID | SDT_BAT_PID | H_EIT_PID | TDT_TOT_PID | BIT_PID | L_EIT_PID)
            || self.pid_to_program_number.contains_key(&pid)
            || self.pid_to_component.contains_key(&pid)
            || (ONE_SEG_PMT_PID ..= ONE_SEG_PMT_PID + 7).contains(&pid)
    }

    /// Dispatches one complete section received on `pid`. Malformed input
    /// is logged and skipped.
    pub fn process_section(&mut self, pid: u16, section: &[u8], out: &mut Vec<Message>) {
        let Some(&tid) = section.first() else { return };
        let result = match (pid, tid) {
            (PAT_PID, table_id::PAT) => self.on_pat(section),
            (_, table_id::PMT)
                if self.pid_to_program_number.contains_key(&pid)
                    || (ONE_SEG_PMT_PID ..= ONE_SEG_PMT_PID + 7).contains(&pid) =>
            {
                self.on_pmt(pid, section, out)
            }
            (_, table_id::DII | table_id::DDB | table_id::STREAM_DESCRIPTORS)
                if self.pid_to_component.contains_key(&pid) =>
            {
                self.on_dsmcc(pid, section, out)
            }
            (NIT_PID, table_id::NIT_ACTUAL) => self.on_nit(section, out),
            (SDT_BAT_PID, table_id::SDT_ACTUAL) => self.on_sdt(section, out),
            (H_EIT_PID | L_EIT_PID, table_id::EIT_PF_ACTUAL) => self.on_eit(pid, section, out),
            (TDT_TOT_PID, table_id::TDT | table_id::TOT) => self.on_time(section, out),
            (BIT_PID, table_id::BIT) => self.on_bit(section, out),
            _ => Ok(()),
        };
        if let Err(e) = result {
            debug!(pid, table_id = tid, "section skipped: {e:#}");
        }
    }

    /* ── PAT / PMT ─────────────────────────────────────────────────── */

    fn on_pat(&mut self, section: &[u8]) -> anyhow::Result<()> {
        let pat = parse_pat(section)?;
        self.pat_retrieved = true;
        self.transport_stream_id = Some(pat.transport_stream_id);

        let pat_map: HashMap<u16, u16> = pat.programs.iter().map(|e| (e.pmt_pid, e.program_number)).collect();
        self.program_number = pat.programs.first().map(|e| e.program_number);

        let changed = pat_map.len() != self.pid_to_program_number.len()
            || self.pid_to_program_number.keys().any(|pid| !pat_map.contains_key(pid));
        if changed {
            info!(programs = pat_map.len(), "PAT changed");
            if self.opts.service_id.is_some() && pat_map.len() != 1 {
                warn!("multiplexed transport stream");
            }
            self.pmt_retrieved = false;
            // carousel state of the old program must not suppress the new one's DIIs
            self.carousel.reset();
        }
        self.pid_to_program_number = pat_map;
        Ok(())
    }

    fn on_pmt(&mut self, pid: u16, section: &[u8], out: &mut Vec<Message>) -> anyhow::Result<()> {
        let pmt = parse_pmt(section)?;

        if !self.one_seg {
            let selected = self.pid_to_program_number.get(&pid)
                .is_some_and(|&n| Some(n) == self.program_number());
            if !selected {
                if pid == ONE_SEG_PMT_PID && !self.pat_retrieved {
                    self.one_seg_pmt_count += 1;
                    if self.one_seg_pmt_count >= ONE_SEG_PMT_THRESHOLD {
                        info!(program_number = pmt.program_number, "no PAT, assuming one-seg broadcast");
                        self.one_seg = true;
                        self.program_number.get_or_insert(pmt.program_number);
                    }
                }
                if !self.one_seg {
                    return Ok(());
                }
            }
        }

        let mut pid_to_component = HashMap::new();
        for s in pmt.streams {
            let Some(component_id) = s.component_tag else { continue };
            pid_to_component.insert(s.elementary_pid, ComponentPmt {
                pid:               s.elementary_pid,
                component_id,
                stream_type:       s.stream_type,
                data_component_id: s.data_component_id,
                bxml_info:         s.bxml_info,
            });
        }
        let component_ids: HashSet<u8> = pid_to_component.values().map(|c| c.component_id).collect();

        self.pcr_pid = Some(pmt.pcr_pid);
        self.pid_to_component = pid_to_component;
        if !self.pmt_retrieved || component_ids != self.component_ids {
            self.component_ids = component_ids;
            self.pmt_retrieved = true;
            let mut components: Vec<ComponentPmt> = self.pid_to_component.values().cloned().collect();
            components.sort_by_key(|c| c.component_id);
            info!(components = components.len(), "PMT updated");
            out.push(Message::Pmt(PmtMessage { components }));
        }
        Ok(())
    }

    /* ── DSM-CC ────────────────────────────────────────────────────── */

    fn on_dsmcc(&mut self, pid: u16, section: &[u8], out: &mut Vec<Message>) -> anyhow::Result<()> {
        let Some(component) = self.pid_to_component.get(&pid) else { return Ok(()) };
        let component_id = component.component_id;
        let has_bxml     = component.bxml_info.is_some();
        let sec = SectionReader::new(section)?;

        match sec.table_id {
            table_id::DII => {
                let dii = parse_dii(sec.body)?;
                if let Some(list) = self.carousel.on_dii(component_id, &dii) {
                    out.push(Message::ModuleListUpdated(list));
                }
            }
            table_id::DDB => {
                if !has_bxml {
                    return Ok(());
                }
                let ddb = parse_ddb(sec.body)?;
                if let Some(done) = self.carousel.on_ddb(component_id, &ddb) {
                    out.push(Message::ModuleDownloaded(done));
                }
            }
            _ => {
                let (data_event_id, events) = parse_stream_descriptors(sec.table_id_extension, sec.body);
                out.push(Message::EsEventUpdated(EsEventUpdated { component_id, events, data_event_id }));
            }
        }
        Ok(())
    }

    /* ── SI ────────────────────────────────────────────────────────── */

    pub fn stream_ids(&self) -> StreamIds {
        let transport_stream_id = self.transport_stream_id.or(self.sdt_ids.map(|(ts, _)| ts));
        let original_network_id = transport_stream_id
            .and_then(|ts| self.nit_transports.get(&ts).copied())
            .or(self.sdt_ids.map(|(_, onid)| onid));
        StreamIds {
            network_id: self.network_id,
            original_network_id,
            transport_stream_id,
            service_id: self.program_number(),
        }
    }

    fn send_stream_info(&mut self, out: &mut Vec<Message>) {
        if self.program_info.is_some() {
            return;
        }
        let ids = self.stream_ids();
        if ids.original_network_id.is_none() || ids.transport_stream_id.is_none() || ids.network_id.is_none() {
            return;
        }
        let info = ProgramInfo {
            original_network_id: ids.original_network_id,
            transport_stream_id: ids.transport_stream_id,
            service_id:          ids.service_id,
            network_id:          ids.network_id,
            ..Default::default()
        };
        self.program_info = Some(info.clone());
        out.push(Message::ProgramInfo(info));
    }

    fn on_nit(&mut self, section: &[u8], out: &mut Vec<Message>) -> anyhow::Result<()> {
        let nit = parse_nit(section)?;
        self.network_id = Some(nit.network_id);
        for t in nit.transports {
            self.nit_transports.insert(t.ts_id, t.orig_net_id);
        }
        self.send_stream_info(out);
        Ok(())
    }

    fn on_sdt(&mut self, section: &[u8], out: &mut Vec<Message>) -> anyhow::Result<()> {
        let sdt = parse_sdt(section)?;
        self.sdt_ids = Some((sdt.transport_stream_id, sdt.original_network_id));
        self.send_stream_info(out);
        Ok(())
    }

    fn on_eit(&mut self, pid: u16, section: &[u8], out: &mut Vec<Message>) -> anyhow::Result<()> {
        if (self.one_seg && pid != L_EIT_PID) || (!self.one_seg && pid != H_EIT_PID) {
            return Ok(());
        }
        let eit = parse_eit_pf(section)?;
        let ids = self.stream_ids();
        if ids.original_network_id.is_none() || ids.transport_stream_id.is_none() {
            return Ok(());
        }
        if ids.original_network_id != Some(eit.original_network_id)
            || ids.service_id != Some(eit.service_id)
            || !eit.current_next
            || eit.section_number != 0
            || eit.events.len() != 1
        {
            return Ok(());
        }

        let event = &eit.events[0];
        let info = ProgramInfo {
            original_network_id:    ids.original_network_id,
            transport_stream_id:    ids.transport_stream_id,
            service_id:             ids.service_id,
            event_id:               Some(event.event_id),
            event_name:             event.event_name.clone(),
            start_time_unix_millis: event.start_time_unix_millis,
            duration_seconds:       event.duration_seconds,
            network_id:             ids.network_id,
        };
        if self.program_info.as_ref() != Some(&info) {
            self.program_info = Some(info.clone());
            out.push(Message::ProgramInfo(info));
        }
        Ok(())
    }

    fn on_time(&mut self, section: &[u8], out: &mut Vec<Message>) -> anyhow::Result<()> {
        let time = parse_tdt_tot(section)?.timestamp_millis();
        if self.current_time != Some(time) {
            self.current_time = Some(time);
            out.push(Message::CurrentTime(CurrentTime { time_unix_millis: time }));
        }
        Ok(())
    }

    fn on_bit(&mut self, section: &[u8], out: &mut Vec<Message>) -> anyhow::Result<()> {
        let bit = parse_bit(section)?;
        out.push(Message::Bit(BitMessage {
            original_network_id: bit.original_network_id,
            broadcasters:        bit.broadcasters,
        }));
        Ok(())
    }
}

/// program_clock_reference from the 6 bytes following the adaptation flags
fn read_pcr(p: &[u8]) -> Pcr {
    let pcr_base = ((p[0] as u64) << 25)
                 | ((p[1] as u64) << 17)
                 | ((p[2] as u64) << 9)
                 | ((p[3] as u64) << 1)
                 | ((p[4] as u64) >> 7);
    let pcr_extension = (((p[4] & 0x01) as u16) << 8) | (p[5] as u16);
    Pcr { pcr_base, pcr_extension }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    fn run(d: &mut SectionDemuxer, pid: u16, section: &[u8]) -> Vec<Message> {
        let mut out = Vec::new();
        d.process_section(pid, section, &mut out);
        out
    }

    #[test]
    fn test_pmt_reemitted_only_on_component_change() {
        let mut d = SectionDemuxer::new(DemuxOptions::default());
        run(&mut d, PAT_PID, &pat());
        let first = run(&mut d, PMT_PID, &pmt(&[0x40]));
        assert!(matches!(&first[..], [Message::Pmt(p)] if p.components[0].component_id == 0x40));
        assert!(run(&mut d, PMT_PID, &pmt(&[0x40])).is_empty());
        assert_eq!(run(&mut d, PMT_PID, &pmt(&[0x40, 0x50])).len(), 1);
    }

    #[test]
    fn test_one_seg_after_repeated_pmt_without_pat() {
        let mut d = SectionDemuxer::new(DemuxOptions::default());
        for _ in 0..ONE_SEG_PMT_THRESHOLD - 1 {
            assert!(run(&mut d, ONE_SEG_PMT_PID, &pmt(&[0x40])).is_empty());
        }
        assert!(!d.is_one_seg());
        let out = run(&mut d, ONE_SEG_PMT_PID, &pmt(&[0x40]));
        assert!(d.is_one_seg());
        assert_eq!(d.program_number(), Some(0x0408));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_carousel_through_packets() {
        let mut d = SectionDemuxer::new(DemuxOptions::default());
        let mut cc = 0u8;
        let mut ts = Vec::new();
        ts.extend(packetize(PAT_PID, &pat(), &mut cc));
        ts.extend(packetize(PMT_PID, &pmt(&[0x40]), &mut cc));
        let info = type_descriptor("text/plain");
        let mut data_cc = 0u8;
        ts.extend(packetize(DATA_PID, &dii_section(0, 1, download_id(0), 4066,
            &[TestModule { id: 0, size: 5000, version: 0, info: &info }]), &mut data_cc));
        ts.extend(packetize(DATA_PID, &ddb_section(download_id(0), 0, 0, 1, &[b'b'; 934]), &mut data_cc));
        ts.extend(packetize(DATA_PID, &ddb_section(download_id(0), 0, 0, 0, &[b'a'; 4066]), &mut data_cc));

        let msgs = d.feed(&ts);
        let kinds: Vec<_> = msgs.iter().map(|m| match m {
            Message::Pmt(_) => "pmt",
            Message::ModuleListUpdated(_) => "list",
            Message::ModuleDownloaded(_) => "downloaded",
            _ => "other",
        }).collect();
        assert_eq!(kinds, vec!["pmt", "list", "downloaded"]);
        let Message::ModuleDownloaded(m) = &msgs[2] else { unreachable!() };
        assert_eq!(m.files[0].data.len(), 5000);
    }

    #[test]
    fn test_pat_change_restarts_carousel() {
        let mut d = SectionDemuxer::new(DemuxOptions::default());
        let info = type_descriptor("text/plain");
        let dii = dii_section(0, 1, download_id(0), 4066, &[TestModule { id: 0, size: 3, version: 0, info: &info }]);
        run(&mut d, PAT_PID, &pat());
        run(&mut d, PMT_PID, &pmt(&[0x40]));
        assert!(matches!(&run(&mut d, DATA_PID, &dii)[..], [Message::ModuleListUpdated(_)]));
        assert!(run(&mut d, DATA_PID, &dii).is_empty());

        // same program moved to another PMT PID
        run(&mut d, PAT_PID, &build_section(0x00, 0x7FE1, 1, 0, 0, &[0x04, 0x08, 0xE1, 0xF1]));
        assert!(d.carousel().component(0x40).is_none());
        let out = run(&mut d, PMT_PID + 1, &pmt(&[0x40]));
        assert!(matches!(&out[..], [Message::Pmt(_)]));
        assert!(matches!(&run(&mut d, DATA_PID, &dii)[..], [Message::ModuleListUpdated(_)]));
    }

    #[test]
    fn test_ddb_ignored_without_bxml_info() {
        let mut d = SectionDemuxer::new(DemuxOptions::default());
        run(&mut d, PAT_PID, &pat());
        let mut body = vec![0xE1, 0x00, 0xF0, 0x00];
        body.extend_from_slice(&[0x0D, 0xE1, 0x30, 0xF0, 0x03, 0x52, 0x01, 0x40]);
        run(&mut d, PMT_PID, &build_section(0x02, 0x0408, 0, 0, 0, &body));
        run(&mut d, DATA_PID, &dii_section(0, 1, download_id(0), 4066,
            &[TestModule { id: 0, size: 3, version: 0, info: &[] }]));
        assert!(run(&mut d, DATA_PID, &ddb_section(download_id(0), 0, 0, 0, b"abc")).is_empty());
    }

    #[test]
    fn test_corrupt_section_skipped() {
        let mut d = SectionDemuxer::new(DemuxOptions::default());
        let mut sec = pat();
        let n = sec.len();
        sec[n - 1] ^= 0x55;
        assert!(run(&mut d, PAT_PID, &sec).is_empty());
        assert!(d.program_number().is_none());
    }

    #[test]
    fn test_section_buffer_pointer_field_and_stuffing() {
        let a = build_section(0x00, 1, 0, 0, 0, &[0, 1, 0xE0, 0x10]);
        let b = build_section(0x00, 2, 0, 0, 0, &[0, 1, 0xE0, 0x10]);
        let mut buf = SectionBuffer::default();
        // first packet: a, then head of b
        let mut p1 = vec![0x00];
        p1.extend_from_slice(&a);
        p1.extend_from_slice(&b[..5]);
        let got = buf.push(&p1, true, 0);
        assert_eq!(got, vec![a.clone()]);
        // second packet: pointer to the tail of b, then stuffing
        let mut p2 = vec![(b.len() - 5) as u8];
        p2.extend_from_slice(&b[5..]);
        p2.extend_from_slice(&[0xFF; 10]);
        let got = buf.push(&p2, true, 1);
        assert_eq!(got, vec![b]);
    }

    #[test]
    fn test_pcr_read() {
        let pcr = read_pcr(&[0x00, 0x00, 0x00, 0x01, 0x7E, 0x05]);
        assert_eq!(pcr.pcr_base, 2);
        assert_eq!(pcr.pcr_extension, 5);
    }

    #[test]
    fn test_program_info_from_nit_sdt_and_eit() {
        let mut d = SectionDemuxer::new(DemuxOptions::default());
        run(&mut d, PAT_PID, &pat());
        run(&mut d, NIT_PID, &build_section(0x40, 0x7FE1, 0, 0, 0,
            &[0xF0, 0x00, 0xF0, 0x06, 0x7F, 0xE1, 0x7F, 0xE2, 0xF0, 0x00]));
        let out = run(&mut d, SDT_BAT_PID, &build_section(0x42, 0x7FE1, 0, 0, 0, &[0x7F, 0xE2, 0xFF]));
        assert!(out.is_empty());                                   // already announced from NIT
        assert_eq!(d.stream_ids().original_network_id, Some(0x7FE2));

        let mjd = 58300u16.to_be_bytes();
        let mut body = vec![0x7F, 0xE1, 0x7F, 0xE2, 0x00, 0x4E];
        body.extend_from_slice(&[0x12, 0x34, mjd[0], mjd[1], 0x20, 0x00, 0x00, 0x00, 0x30, 0x00, 0xF0, 0x00]);
        let eit = build_section(0x4E, 0x0408, 0, 0, 1, &body);
        let out = run(&mut d, H_EIT_PID, &eit);
        let [Message::ProgramInfo(info)] = &out[..] else { panic!("expected programInfo") };
        assert_eq!(info.event_id, Some(0x1234));
        assert_eq!(info.duration_seconds, Some(1800));
        assert!(run(&mut d, H_EIT_PID, &eit).is_empty());
    }
}
