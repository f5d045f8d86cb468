//! DSM-CC download messages (DII / DDB) and stream descriptor sections as
//! carried in ARIB data carousels.
//!
//! Parsers take the section body (after the 8-byte long header, before the
//! CRC) as exposed by [`crate::psi::SectionReader`].

pub mod dii;
pub mod ddb;
pub mod stream_event;

pub use ddb::{parse_ddb, DdbMessage};
pub use dii::{parse_dii, Compression, DiiMessage, DiiModule};
pub use stream_event::parse_stream_descriptors;

use crate::constants::{DSMCC_PROTOCOL_DISCRIMINATOR, DSMCC_TYPE_DOWNLOAD};
use crate::error::SectionError;

/// dsmccMessageHeader / dsmccDownloadDataHeader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_id: u16,
    /// transaction_id for DII, downloadId for DDB
    pub id:         u32,
}

/// data_event_id lives in the top nibble of the download id.
pub fn data_event_id(download_id: u32) -> u8 {
    ((download_id >> 28) & 0x0F) as u8
}

/// Validates the 12-byte header and returns it with the message payload
/// (adaptation bytes skipped, clipped to `messageLength`).
pub fn read_header(body: &[u8], expected_message_id: u16) -> Result<(MessageHeader, &[u8]), SectionError> {
    if body.len() < 12 { return Err(SectionError::Malformed("dsmcc header")) }
    if body[0] != DSMCC_PROTOCOL_DISCRIMINATOR || body[1] != DSMCC_TYPE_DOWNLOAD {
        return Err(SectionError::Malformed("dsmcc protocol"));
    }
    let message_id = u16::from_be_bytes([body[2], body[3]]);
    if message_id != expected_message_id {
        return Err(SectionError::Malformed("dsmcc message id"));
    }
    let id                = u32::from_be_bytes([body[4], body[5], body[6], body[7]]);
    let adaptation_length = body[9] as usize;
    let message_length    = u16::from_be_bytes([body[10], body[11]]) as usize;
    if message_length < adaptation_length {
        return Err(SectionError::Malformed("dsmcc adaptation"));
    }

    let start = 12 + adaptation_length;
    let end   = (12 + message_length).min(body.len());
    if start > end { return Err(SectionError::Malformed("dsmcc adaptation")) }
    Ok((MessageHeader { message_id, id }, &body[start..end]))
}
