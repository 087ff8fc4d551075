use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DecodedPacket, PacketType};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSummary {
    pub count: usize,
    pub bytes: usize,
    pub corrupted: usize,
}

/// Running statistics of a decoded packet stream.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub count: usize,
    pub bytes: usize,
    /// Packets that could not be decoded.
    pub skipped: usize,
    pub corrupted: usize,
    pub crc_errors: usize,
    pub rs_errors: usize,
    pub types: BTreeMap<PacketType, TypeSummary>,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
}

impl Summary {
    pub fn add(&mut self, packet: &DecodedPacket) {
        let len = packet.packet_len();
        self.count += 1;
        self.bytes += len;
        self.crc_errors += usize::from(packet.annotation.crc_errors);
        self.rs_errors += usize::from(packet.annotation.rs_errors);

        let summary = self.types.entry(packet.packet_type()).or_default();
        summary.count += 1;
        summary.bytes += len;
        if packet.is_corrupted() {
            summary.corrupted += 1;
            self.corrupted += 1;
        }

        let time = &packet.annotation.isp_time;
        if !time.is_unset() {
            if let Some(dt) = time.to_datetime() {
                self.first = Some(self.first.map_or(dt, |f| f.min(dt)));
                self.last = Some(self.last.map_or(dt, |l| l.max(dt)));
            }
        }
    }
}
