use serde::{Deserialize, Serialize};

use crate::bytes::Bytes;
use crate::error::DecodeError;

const PMD_SYNC: u16 = 0xEEEE;

/// Number of polarisation measurement devices.
pub const PMD_NUMBER: usize = 7;

/// PMD readouts at one 1/32 s sample.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmdRecord {
    pub sync: u16,
    /// Two readouts per device.
    pub data: [[u16; 2]; PMD_NUMBER],
    pub bcps: u16,
    pub integration_status: bool,
    pub delta_time: u16,
}

impl PmdRecord {
    pub const LEN: usize = 4 * PMD_NUMBER + 6;

    fn decode(bytes: &mut Bytes) -> Result<Self, DecodeError> {
        let sync = bytes.u16()?;
        let mut data = [[0u16; 2]; PMD_NUMBER];
        for pair in &mut data {
            pair[0] = bytes.u16()?;
            pair[1] = bytes.u16()?;
        }
        let bcps = bytes.u16()?;
        let time = bytes.u16()?;
        Ok(PmdRecord {
            sync,
            data,
            bcps,
            integration_status: time & 0x8000 != 0,
            delta_time: time & 0x7fff,
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.sync.to_be_bytes());
        for v in self.data.iter().flatten() {
            out.extend_from_slice(&v.to_be_bytes());
        }
        out.extend_from_slice(&self.bcps.to_be_bytes());
        let time = u16::from(self.integration_status) << 15 | self.delta_time & 0x7fff;
        out.extend_from_slice(&time.to_be_bytes());
    }

    #[must_use]
    pub fn sync_ok(&self) -> bool {
        self.sync == PMD_SYNC || self.sync == 0
    }
}

/// Body of a PMD packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmdPacket {
    pub temp: u16,
    pub records: Vec<PmdRecord>,
}

impl PmdPacket {
    pub const RECORDS: usize = 200;
    pub const BODY_LEN: usize = 2 + Self::RECORDS * PmdRecord::LEN;

    pub(super) fn decode(bytes: &mut Bytes) -> Result<Self, DecodeError> {
        let temp = bytes.u16()?;
        let records = (0..Self::RECORDS)
            .map(|_| PmdRecord::decode(bytes))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PmdPacket { temp, records })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.temp.to_be_bytes());
        for rec in &self.records {
            rec.encode(out);
        }
    }

    #[must_use]
    pub fn sync_errors(&self) -> usize {
        self.records.iter().filter(|r| !r.sync_ok()).count()
    }
}
