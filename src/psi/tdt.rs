// psi/tdt.rs
//! TDT (0x70, no CRC) & TOT (0x73, CRC present), plus the MJD/BCD time
//! fields shared with EIT.

use anyhow::bail;
use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveTime};

use crate::constants::table_id;
use super::section::{section_end, CRC_MPEG};

/// JST offset, the reference time of ARIB SI
const JST_OFFSET_SECS: i32 = 9 * 3600;

/// Returns the carried JST time.
pub fn parse_tdt_tot(section: &[u8]) -> anyhow::Result<DateTime<FixedOffset>> {
    let end = section_end(section)?;
    let tid = section[0];
    if end < 8 { bail!("short TDT/TOT"); }

    match tid {
        table_id::TDT => {}
        table_id::TOT => {
            if end < 12 { bail!("short TOT"); }
            let crc_calc = CRC_MPEG.checksum(&section[..end - 4]);
            let crc_pkt  = u32::from_be_bytes([section[end-4], section[end-3], section[end-2], section[end-1]]);
            if crc_calc != crc_pkt { bail!("TOT CRC mismatch"); }
        }
        _ => bail!("not TDT/TOT"),
    }
    match decode_jst_time(&section[3..8]) {
        Some(t) => Ok(t),
        None    => bail!("undefined JST_time"),
    }
}

fn bcd(b: u8) -> Option<u32> {
    let (hi, lo) = ((b >> 4) as u32, (b & 0x0F) as u32);
    (hi < 10 && lo < 10).then_some(hi * 10 + lo)
}

/// 16-bit MJD followed by 24-bit BCD hhmmss; all-ones means undefined.
pub fn decode_jst_time(b: &[u8]) -> Option<DateTime<FixedOffset>> {
    if b.len() < 5 || b[..5].iter().all(|&x| x == 0xFF) { return None }
    let mjd  = u16::from_be_bytes([b[0], b[1]]) as u64;
    let date = NaiveDate::from_ymd_opt(1858, 11, 17)?.checked_add_days(Days::new(mjd))?;
    let time = NaiveTime::from_hms_opt(bcd(b[2])?, bcd(b[3])?, bcd(b[4])?)?;
    date.and_time(time).and_local_timezone(FixedOffset::east_opt(JST_OFFSET_SECS)?).single()
}

/// 24-bit BCD hhmmss duration in seconds; all-ones means undefined.
pub fn decode_bcd_duration(b: &[u8]) -> Option<u32> {
    if b.len() < 3 || b[..3].iter().all(|&x| x == 0xFF) { return None }
    Some(bcd(b[0])? * 3600 + bcd(b[1])? * 60 + bcd(b[2])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_jst_time() {
        let mjd = 58300u16.to_be_bytes();
        let t = decode_jst_time(&[mjd[0], mjd[1], 0x12, 0x34, 0x56]).unwrap();
        assert_eq!(t.to_rfc3339(), "2018-07-01T12:34:56+09:00");
        assert_eq!(t.timestamp_millis() % 1000, 0);
    }

    #[test]
    fn test_undefined_fields() {
        assert!(decode_jst_time(&[0xFF; 5]).is_none());
        assert!(decode_bcd_duration(&[0xFF; 3]).is_none());
        assert_eq!(decode_bcd_duration(&[0x01, 0x30, 0x00]), Some(5400));
    }

    #[test]
    fn test_parse_tdt() {
        let mjd = 58300u16.to_be_bytes();
        let sec = [0x70, 0x70, 0x05, mjd[0], mjd[1], 0x00, 0x00, 0x00];
        let t = parse_tdt_tot(&sec).unwrap();
        assert_eq!(t.to_rfc3339(), "2018-07-01T00:00:00+09:00");
    }
}
