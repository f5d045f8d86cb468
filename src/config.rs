//! Receiver run options.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use crate::processor::DemuxOptions;
use crate::resource::RemoteCacheLimits;

/// Where transport stream packets come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// unicast or multicast IPv4; `iface` selects the multicast interface
    Udp { addr: SocketAddr, iface: Option<Ipv4Addr> },
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Options {
    pub input:         Input,
    /// program to follow; first PAT entry when unset
    pub service_id:    Option<u16>,
    /// print protocol messages as JSON lines
    pub json:          bool,
    /// cache status snapshot period in seconds, 0 disables it
    pub refresh_secs:  u64,
    pub remote_limits: RemoteCacheLimits,
}

impl Options {
    pub fn demux_options(&self) -> DemuxOptions {
        DemuxOptions { service_id: self.service_id }
    }
}

/// Decimal or `0x`-prefixed hexadecimal service id.
pub fn parse_service_id(s: &str) -> anyhow::Result<u16> {
    let s = s.trim();
    let id = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16)?,
        None => s.parse()?,
    };
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_id_forms() {
        assert_eq!(parse_service_id("1024").unwrap(), 1024);
        assert_eq!(parse_service_id("0x0400").unwrap(), 0x400);
        assert!(parse_service_id("0x10000").is_err());
        assert!(parse_service_id("abc").is_err());
    }
}
