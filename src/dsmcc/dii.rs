//! DownloadInfoIndication (table_id 0x3B)

use crate::constants::{descriptor_tag, DSMCC_MESSAGE_DII};
use crate::error::SectionError;
use crate::psi::section::descriptors;

use super::{data_event_id, read_header};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Zlib { original_size: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiiModule {
    pub module_id:    u16,
    pub module_size:  u32,
    pub version:      u8,
    /// Type descriptor text, e.g. `multipart/mixed; boundary=...`
    pub content_type: Option<String>,
    pub compression:  Compression,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiiMessage {
    pub transaction_id:       u32,
    pub download_id:          u32,
    pub data_event_id:        u8,
    pub block_size:           u16,
    pub modules:              Vec<DiiModule>,
    /// arib_bxml_privatedata_descriptor
    pub return_to_entry_flag: Option<bool>,
}

fn be16(b: &[u8], at: usize) -> Result<u16, SectionError> {
    b.get(at..at + 2)
        .map(|x| u16::from_be_bytes([x[0], x[1]]))
        .ok_or(SectionError::Malformed("DII"))
}

fn be32(b: &[u8], at: usize) -> Result<u32, SectionError> {
    b.get(at..at + 4)
        .map(|x| u32::from_be_bytes([x[0], x[1], x[2], x[3]]))
        .ok_or(SectionError::Malformed("DII"))
}

pub fn parse_dii(body: &[u8]) -> Result<DiiMessage, SectionError> {
    let (header, m) = read_header(body, DSMCC_MESSAGE_DII)?;

    let download_id = be32(m, 0)?;
    let block_size  = be16(m, 4)?;
    if block_size == 0 { return Err(SectionError::Malformed("DII blockSize")) }
    // windowSize, ackPeriod, tCDownloadWindow, tCDownloadScenario
    let compat_len  = be16(m, 16)? as usize;
    let mut idx     = 18 + compat_len;
    let n_modules   = be16(m, idx)?;
    idx += 2;

    let mut modules = Vec::with_capacity(n_modules as usize);
    for _ in 0..n_modules {
        let module_id   = be16(m, idx)?;
        let module_size = be32(m, idx + 2)?;
        let version     = *m.get(idx + 6).ok_or(SectionError::Malformed("DII module"))?;
        let info_len    = *m.get(idx + 7).ok_or(SectionError::Malformed("DII module"))? as usize;
        let info        = m.get(idx + 8 .. idx + 8 + info_len).ok_or(SectionError::Malformed("DII moduleInfo"))?;
        idx += 8 + info_len;

        let mut module = DiiModule { module_id, module_size, version, content_type: None, compression: Compression::None };
        for (tag, d) in descriptors(info) {
            match tag {
                descriptor_tag::TYPE => {
                    module.content_type = Some(String::from_utf8_lossy(d).into_owned());
                }
                // compression_type 0 is zlib, the only one defined
                descriptor_tag::COMPRESSION_TYPE if d.len() >= 5 && d[0] == 0 => {
                    module.compression = Compression::Zlib { original_size: be32(d, 1)? };
                }
                _ => {}
            }
        }
        modules.push(module);
    }

    let mut return_to_entry_flag = None;
    if let Ok(private_len) = be16(m, idx) {
        let private = m.get(idx + 2 ..).unwrap_or_default();
        let private = &private[..(private_len as usize).min(private.len())];
        for (tag, d) in descriptors(private) {
            if tag == descriptor_tag::BXML_PRIVATE_DATA {
                return_to_entry_flag = d.first().map(|b| b & 0x80 != 0);
            }
        }
    }

    Ok(DiiMessage {
        transaction_id: header.id,
        download_id,
        data_event_id: data_event_id(download_id),
        block_size,
        modules,
        return_to_entry_flag,
    })
}

impl DiiModule {
    /// `ceil(module_size / block_size)`
    pub fn block_count(&self, block_size: u16) -> usize {
        (self.module_size as usize).div_ceil(block_size as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{compression_descriptor, dii_body, download_id, type_descriptor, TestModule};

    #[test]
    fn parses_module_loop_and_descriptors() {
        let info = [type_descriptor("text/X-arib-bml"), compression_descriptor(12000)].concat();
        let body = dii_body(0x8000_0002, download_id(3), 4066, &[
            TestModule { id: 0, size: 9000, version: 1, info: &info },
            TestModule { id: 1, size: 0, version: 4, info: &[] },
        ], &[0xF0, 0x01, 0x80]);
        let dii = parse_dii(&body).unwrap();
        assert_eq!(dii.transaction_id, 0x8000_0002);
        assert_eq!(dii.data_event_id, 3);
        assert_eq!(dii.block_size, 4066);
        assert_eq!(dii.modules.len(), 2);
        assert_eq!(dii.modules[0].content_type.as_deref(), Some("text/X-arib-bml"));
        assert_eq!(dii.modules[0].compression, Compression::Zlib { original_size: 12000 });
        assert_eq!(dii.modules[0].block_count(dii.block_size), 3);
        assert_eq!(dii.modules[1].block_count(dii.block_size), 0);
        assert_eq!(dii.return_to_entry_flag, Some(true));
    }

    #[test]
    fn rejects_wrong_message_id() {
        let mut body = dii_body(1, download_id(0), 4066, &[], &[]);
        body[3] = 0x03;
        assert!(parse_dii(&body).is_err());
    }

    #[test]
    fn truncated_module_loop_is_malformed() {
        let body = dii_body(1, download_id(0), 4066, &[TestModule { id: 0, size: 10, version: 0, info: &[] }], &[]);
        // cut inside the module entry; messageLength still claims more
        assert!(parse_dii(&body[..body.len() - 6]).is_err());
    }
}
