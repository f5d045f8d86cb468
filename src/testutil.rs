//! Builders for synthetic sections and TS packets, shared by the unit
//! tests and, through the `test-util` feature, the integration tests.

use std::collections::HashMap;
use std::io::Write;

use flate2::{write::ZlibEncoder, Compression};

use crate::constants::{TS_PACKET_SIZE, TS_SYNC_BYTE};
use crate::psi::section::CRC_MPEG;

pub const PMT_PID: u16 = 0x01F0;
pub const DATA_PID: u16 = 0x0130;
pub const SERVICE_ID: u16 = 0x0408;
/// Type descriptor for a single `text/plain` file.
pub const TEXT_PLAIN: &[u8] = b"\x01\x0Atext/plain";

/// Long-form section with a valid CRC-32.
pub fn build_section(table_id: u8, ext: u16, version: u8, section_number: u8, last: u8, body: &[u8]) -> Vec<u8> {
    let len = 5 + body.len() + 4;
    let mut s = vec![
        table_id,
        0xB0 | ((len >> 8) as u8 & 0x0F),
        len as u8,
        (ext >> 8) as u8,
        ext as u8,
        0xC1 | ((version & 0x1F) << 1),
        section_number,
        last,
    ];
    s.extend_from_slice(body);
    let crc = CRC_MPEG.checksum(&s);
    s.extend_from_slice(&crc.to_be_bytes());
    s
}

/// Splits one section into 188-byte packets (pointer_field 0, 0xFF stuffing).
pub fn packetize(pid: u16, section: &[u8], cc: &mut u8) -> Vec<u8> {
    let mut out = Vec::new();
    let mut rest = section;
    let mut first = true;
    while first || !rest.is_empty() {
        let mut pkt = vec![
            TS_SYNC_BYTE,
            (if first { 0x40 } else { 0x00 }) | ((pid >> 8) as u8 & 0x1F),
            pid as u8,
            0x10 | (*cc & 0x0F),
        ];
        *cc = (*cc + 1) & 0x0F;
        if first { pkt.push(0x00) }
        let n = rest.len().min(TS_PACKET_SIZE - pkt.len());
        pkt.extend_from_slice(&rest[..n]);
        rest = &rest[n..];
        pkt.resize(TS_PACKET_SIZE, 0xFF);
        out.extend_from_slice(&pkt);
        first = false;
    }
    out
}

/// Continuity counters per PID of a synthetic stream.
#[derive(Default)]
pub struct TsWriter {
    pub ts: Vec<u8>,
    cc:     HashMap<u16, u8>,
}

impl TsWriter {
    pub fn section(&mut self, pid: u16, section: &[u8]) -> &mut Self {
        let cc = self.cc.entry(pid).or_default();
        self.ts.extend(packetize(pid, section, cc));
        self
    }

    pub fn take(&mut self) -> Vec<u8> { std::mem::take(&mut self.ts) }
}

/// PAT naming [`SERVICE_ID`] on [`PMT_PID`].
pub fn pat() -> Vec<u8> {
    build_section(0x00, 0x7FE1, 0, 0, 0, &[(SERVICE_ID >> 8) as u8, SERVICE_ID as u8, 0xE0 | (PMT_PID >> 8) as u8, PMT_PID as u8])
}

/// PMT with one BML data component per tag from [`DATA_PID`] on, each
/// carrying a data component descriptor with entry point info.
pub fn pmt(tags: &[u8]) -> Vec<u8> {
    let mut body = vec![0xE1, 0x00, 0xF0, 0x00];
    for (i, &tag) in tags.iter().enumerate() {
        let pid = DATA_PID + i as u16;
        body.extend_from_slice(&[0x0D, 0xE0 | (pid >> 8) as u8, pid as u8, 0xF0, 0x0B]);
        body.extend_from_slice(&[0x52, 0x01, tag]);
        body.extend_from_slice(&[0xFD, 0x06, 0x00, 0x0C, 0b0011_0011, 0b0111_0000, 0xF8, 0xA0]);
    }
    build_section(0x02, SERVICE_ID, 0, 0, 0, &body)
}

fn dsmcc_header(message_id: u16, id: u32, message_len: usize) -> Vec<u8> {
    let mut h = vec![0x11, 0x03];
    h.extend_from_slice(&message_id.to_be_bytes());
    h.extend_from_slice(&id.to_be_bytes());
    h.push(0xFF);
    h.push(0x00);
    h.extend_from_slice(&(message_len as u16).to_be_bytes());
    h
}

pub struct TestModule<'a> {
    pub id:      u16,
    pub size:    u32,
    pub version: u8,
    pub info:    &'a [u8],
}

/// DII message body (what follows the 8-byte section header).
pub fn dii_body(transaction_id: u32, download_id: u32, block_size: u16, modules: &[TestModule], private: &[u8]) -> Vec<u8> {
    let mut m = Vec::new();
    m.extend_from_slice(&download_id.to_be_bytes());
    m.extend_from_slice(&block_size.to_be_bytes());
    m.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);  // window, ack, tCDownloadWindow, tCDownloadScenario
    m.extend_from_slice(&[0, 0]);                            // compatibilityDescriptorLength
    m.extend_from_slice(&(modules.len() as u16).to_be_bytes());
    for md in modules {
        m.extend_from_slice(&md.id.to_be_bytes());
        m.extend_from_slice(&md.size.to_be_bytes());
        m.push(md.version);
        m.push(md.info.len() as u8);
        m.extend_from_slice(md.info);
    }
    m.extend_from_slice(&(private.len() as u16).to_be_bytes());
    m.extend_from_slice(private);

    let mut body = dsmcc_header(0x1002, transaction_id, m.len());
    body.extend_from_slice(&m);
    body
}

pub fn dii_section(component_ext: u16, transaction_id: u32, download_id: u32, block_size: u16, modules: &[TestModule]) -> Vec<u8> {
    build_section(0x3B, component_ext, 0, 0, 0, &dii_body(transaction_id, download_id, block_size, modules, &[]))
}

/// DDB message body (what follows the 8-byte section header).
pub fn ddb_body(download_id: u32, module_id: u16, version: u8, block_number: u16, data: &[u8]) -> Vec<u8> {
    let mut m = Vec::new();
    m.extend_from_slice(&module_id.to_be_bytes());
    m.push(version);
    m.push(0xFF);
    m.extend_from_slice(&block_number.to_be_bytes());
    m.extend_from_slice(data);

    let mut body = dsmcc_header(0x1003, download_id, m.len());
    body.extend_from_slice(&m);
    body
}

pub fn ddb_section(download_id: u32, module_id: u16, version: u8, block_number: u16, data: &[u8]) -> Vec<u8> {
    build_section(0x3C, module_id, version & 0x1F, block_number as u8, 0xFF, &ddb_body(download_id, module_id, version, block_number, data))
}

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

/// Type descriptor (0x01) carrying `text`.
pub fn type_descriptor(text: &str) -> Vec<u8> {
    let mut d = vec![0x01, text.len() as u8];
    d.extend_from_slice(text.as_bytes());
    d
}

/// Compression Type descriptor (0xC2), zlib.
pub fn compression_descriptor(original_size: u32) -> Vec<u8> {
    let mut d = vec![0xC2, 0x05, 0x00];
    d.extend_from_slice(&original_size.to_be_bytes());
    d
}

/// Download id carrying `data_event_id` in its top nibble.
pub fn download_id(data_event_id: u8) -> u32 {
    ((data_event_id as u32) << 28) | 0x0FFF_FFFF
}
