//! PSI/SI table parsers.
//!
//! Every parser takes one complete section (starting at `table_id`) and
//! validates it through [`section::SectionReader`].

pub mod section;
pub mod pat;
pub mod pmt;
pub mod nit;
pub mod sdt;
pub mod eit;
pub mod tdt;
pub mod bit;

pub use bit::{parse_bit, BitSection};
pub use eit::{parse_eit_pf, EitPfSection};
pub use nit::{parse_nit, NitSection};
pub use pat::{parse_pat, PatSection};
pub use pmt::{parse_pmt, PmtSection};
pub use sdt::{parse_sdt, SdtSection};
pub use section::{descriptors, SectionReader};
pub use tdt::parse_tdt_tot;

/// Lossy text decode of ARIB 8-unit strings: control and escape sequences
/// are dropped and the rest is taken as UTF-8.
pub fn decode_arib_text(bytes: &[u8]) -> String {
    let printable: Vec<u8> = bytes
        .iter()
        .copied()
        .filter(|&b| b >= 0x20 && b != 0x7F)
        .collect();
    String::from_utf8_lossy(&printable).trim().to_string()
}
