//! DownloadDataBlock (table_id 0x3C)

use crate::constants::DSMCC_MESSAGE_DDB;
use crate::error::SectionError;

use super::{data_event_id, read_header};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DdbMessage<'a> {
    pub download_id:   u32,
    pub data_event_id: u8,
    pub module_id:     u16,
    pub version:       u8,
    pub block_number:  u16,
    pub data:          &'a [u8],
}

pub fn parse_ddb(body: &[u8]) -> Result<DdbMessage<'_>, SectionError> {
    let (header, m) = read_header(body, DSMCC_MESSAGE_DDB)?;
    if m.len() < 6 { return Err(SectionError::Malformed("DDB")) }
    Ok(DdbMessage {
        download_id:   header.id,
        data_event_id: data_event_id(header.id),
        module_id:     u16::from_be_bytes([m[0], m[1]]),
        version:       m[2],
        block_number:  u16::from_be_bytes([m[4], m[5]]),
        data:          &m[6..],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ddb_body, download_id};

    #[test]
    fn parses_block_header() {
        let body = ddb_body(download_id(0xA), 0x0102, 7, 3, b"abc");
        let ddb = parse_ddb(&body).unwrap();
        assert_eq!(ddb.data_event_id, 0xA);
        assert_eq!(ddb.module_id, 0x0102);
        assert_eq!(ddb.version, 7);
        assert_eq!(ddb.block_number, 3);
        assert_eq!(ddb.data, b"abc");
    }

    #[test]
    fn short_block_header_is_malformed() {
        let body = ddb_body(download_id(0), 1, 0, 0, b"");
        assert!(parse_ddb(&body[..body.len() - 2]).is_err());
    }
}
