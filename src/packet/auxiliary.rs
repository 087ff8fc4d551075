use serde::{Deserialize, Serialize};

use super::PmtcHeader;
use crate::bytes::Bytes;
use crate::error::DecodeError;

const AUX_SYNC: u16 = 0xDDDD;

/// Scanner status at one broadcast counter tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BcpRecord {
    pub sync: u16,
    pub bcps: u16,
    pub flags: u16,
    /// Azimuth encoder counter, 20 bits.
    pub azi_encode_cntr: u32,
    /// Elevation encoder counter, 20 bits.
    pub ele_encode_cntr: u32,
    pub azi_cntr_error: u16,
    pub ele_cntr_error: u16,
    pub azi_scan_error: u16,
    pub ele_scan_error: u16,
}

impl BcpRecord {
    pub const LEN: usize = 20;

    fn decode(bytes: &mut Bytes) -> Result<Self, DecodeError> {
        let sync = bytes.u16()?;
        let bcps = bytes.u16()?;
        let flags = bytes.u16()?;
        // two 20-bit counters packed in 6 bytes, the top byte is spare
        let enc = bytes.take(6)?;
        let azi = u32::from_be_bytes([enc[0], enc[1], enc[2], enc[3]]);
        let ele = u32::from_be_bytes([enc[2], enc[3], enc[4], enc[5]]);
        Ok(BcpRecord {
            sync,
            bcps,
            flags,
            azi_encode_cntr: azi >> 4 & 0xf_ffff,
            ele_encode_cntr: ele & 0xf_ffff,
            azi_cntr_error: bytes.u16()?,
            ele_cntr_error: bytes.u16()?,
            azi_scan_error: bytes.u16()?,
            ele_scan_error: bytes.u16()?,
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.sync.to_be_bytes());
        out.extend_from_slice(&self.bcps.to_be_bytes());
        out.extend_from_slice(&self.flags.to_be_bytes());
        let enc = u64::from(self.azi_encode_cntr & 0xf_ffff) << 20
            | u64::from(self.ele_encode_cntr & 0xf_ffff);
        out.extend_from_slice(&enc.to_be_bytes()[2..]);
        for v in [
            self.azi_cntr_error,
            self.ele_cntr_error,
            self.azi_scan_error,
            self.ele_scan_error,
        ] {
            out.extend_from_slice(&v.to_be_bytes());
        }
    }

    /// Scan phase from the flags word.
    #[must_use]
    pub fn phase(&self) -> u8 {
        (self.flags >> 8 & 0xf) as u8
    }

    /// Pointing counter from the flags word.
    #[must_use]
    pub fn pointing(&self) -> u8 {
        (self.flags & 0x3f) as u8
    }

    #[must_use]
    pub fn sync_ok(&self) -> bool {
        self.sync == AUX_SYNC || self.sync == 0
    }
}

/// One PMTC frame: 16 broadcast counter records and optical bench housekeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmtcFrame {
    pub bcp: Vec<BcpRecord>,
    pub bench_rad: u16,
    pub bench_elv: u16,
    pub bench_az: u16,
}

impl PmtcFrame {
    pub const RECORDS: usize = 16;
    pub const LEN: usize = Self::RECORDS * BcpRecord::LEN + 6;

    fn decode(bytes: &mut Bytes) -> Result<Self, DecodeError> {
        let bcp = (0..Self::RECORDS)
            .map(|_| BcpRecord::decode(bytes))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PmtcFrame {
            bcp,
            bench_rad: bytes.u16()?,
            bench_elv: bytes.u16()?,
            bench_az: bytes.u16()?,
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        for rec in &self.bcp {
            rec.encode(out);
        }
        out.extend_from_slice(&self.bench_rad.to_be_bytes());
        out.extend_from_slice(&self.bench_elv.to_be_bytes());
        out.extend_from_slice(&self.bench_az.to_be_bytes());
    }
}

/// Body of an auxiliary packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxiliaryPacket {
    pub pmtc: PmtcHeader,
    pub frames: Vec<PmtcFrame>,
}

impl AuxiliaryPacket {
    pub const FRAMES: usize = 5;
    pub const BODY_LEN: usize = PmtcHeader::LEN + Self::FRAMES * PmtcFrame::LEN;

    pub(super) fn decode(bytes: &mut Bytes) -> Result<Self, DecodeError> {
        let pmtc = PmtcHeader::decode(bytes)?;
        let frames = (0..Self::FRAMES)
            .map(|_| PmtcFrame::decode(bytes))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AuxiliaryPacket { pmtc, frames })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        self.pmtc.encode(out);
        for frame in &self.frames {
            frame.encode(out);
        }
    }

    /// Number of BCP records with a sync marker that is neither the constant nor zero.
    #[must_use]
    pub fn sync_errors(&self) -> usize {
        self.records().filter(|r| !r.sync_ok()).count()
    }

    /// All BCP records in transmission order.
    pub fn records(&self) -> impl Iterator<Item = &BcpRecord> {
        self.frames.iter().flat_map(|f| f.bcp.iter())
    }
}
