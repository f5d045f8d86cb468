//! Constants for MPEG-TS demultiplexing and ARIB data carousel reception

/// MPEG-TS packet constants
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_SYNC_BYTE: u8 = 0x47;

/// Longest private section (section_length is 12 bits)
pub const MAX_SECTION_SIZE: usize = 4096 + 3;

/// System PIDs
pub const PAT_PID: u16 = 0x0000;
pub const NIT_PID: u16 = 0x0010;
pub const SDT_BAT_PID: u16 = 0x0011;
pub const H_EIT_PID: u16 = 0x0012;
pub const TDT_TOT_PID: u16 = 0x0014;
pub const BIT_PID: u16 = 0x0024;
pub const L_EIT_PID: u16 = 0x0027;
pub const NULL_PID: u16 = 0x1FFF;

/// One-seg PMTs are carried on the fixed PIDs 0x1FC8..=0x1FCF without a PAT.
pub const ONE_SEG_PMT_PID: u16 = 0x1FC8;
/// Heuristic, not protocol-mandated: PMT receptions on [`ONE_SEG_PMT_PID`]
/// without any PAT before the stream is treated as a one-seg broadcast.
pub const ONE_SEG_PMT_THRESHOLD: u32 = 10;

/// Table ids
pub mod table_id {
    pub const PAT: u8 = 0x00;
    pub const PMT: u8 = 0x02;
    pub const DII: u8 = 0x3B;
    pub const DDB: u8 = 0x3C;
    pub const STREAM_DESCRIPTORS: u8 = 0x3D;
    pub const NIT_ACTUAL: u8 = 0x40;
    pub const SDT_ACTUAL: u8 = 0x42;
    pub const EIT_PF_ACTUAL: u8 = 0x4E;
    pub const TDT: u8 = 0x70;
    pub const TOT: u8 = 0x73;
    pub const BIT: u8 = 0xC4;
}

/// Descriptor tags used by the carousel path
pub mod descriptor_tag {
    /// DII moduleInfo: Type descriptor (content type text)
    pub const TYPE: u8 = 0x01;
    /// NPT reference descriptor (stream event sections)
    pub const NPT_REFERENCE: u8 = 0x17;
    /// General event descriptor (stream event sections)
    pub const GENERAL_EVENT: u8 = 0x40;
    pub const SERVICE_LIST: u8 = 0x41;
    pub const SHORT_EVENT: u8 = 0x4D;
    pub const STREAM_IDENTIFIER: u8 = 0x52;
    /// DII moduleInfo: Compression Type descriptor
    pub const COMPRESSION_TYPE: u8 = 0xC2;
    pub const EXTENDED_BROADCASTER: u8 = 0xCE;
    pub const BROADCASTER_NAME: u8 = 0xD8;
    /// DII privateData: arib_bxml_privatedata_descriptor
    pub const BXML_PRIVATE_DATA: u8 = 0xF0;
    pub const DATA_COMPONENT: u8 = 0xFD;
}

/// Data component ids carrying ARIB-XML based multimedia coding
/// (terrestrial 0x0C/0x0D, BS 0x07, CS 0x0B).
pub const BXML_DATA_COMPONENT_IDS: &[u16] = &[0x0C, 0x0D, 0x07, 0x0B];

/// DSM-CC message ids
pub const DSMCC_PROTOCOL_DISCRIMINATOR: u8 = 0x11;
pub const DSMCC_TYPE_DOWNLOAD: u8 = 0x03;
pub const DSMCC_MESSAGE_DII: u16 = 0x1002;
pub const DSMCC_MESSAGE_DDB: u16 = 0x1003;

/// Block size used in operation (every DII announces it, this is only the
/// documented value).
pub const STANDARD_BLOCK_SIZE: u16 = 4066;
