//! Level-1b measurement states.
//!
//! A state is a sequence of DSRs sharing one instrument configuration. Each DSR
//! holds, per cluster, `n_read` readouts of `length` pixels together with the
//! geolocation records of that scan.
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cluster::ClusterDescriptor;
use crate::geolocation::GeoRecords;
use crate::packet::{CoaddedSample, DetectorPacket};
use crate::time::SensingTime;

/// Viewing geometry of a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Geometry {
    Nadir,
    Limb,
    Occultation,
    Monitor,
}

impl Geometry {
    /// # Errors
    /// Returns the unknown id.
    pub fn from_id(id: u8) -> Result<Self, u8> {
        match id {
            1 => Ok(Geometry::Nadir),
            2 => Ok(Geometry::Limb),
            3 => Ok(Geometry::Occultation),
            4 => Ok(Geometry::Monitor),
            _ => Err(id),
        }
    }

    #[must_use]
    pub fn id(self) -> u8 {
        match self {
            Geometry::Nadir => 1,
            Geometry::Limb => 2,
            Geometry::Occultation => 3,
            Geometry::Monitor => 4,
        }
    }

    /// Empty geolocation collection for this geometry.
    #[must_use]
    pub fn empty_geolocation(self) -> GeoRecords {
        match self {
            Geometry::Nadir => GeoRecords::Nadir(Vec::new()),
            Geometry::Limb | Geometry::Occultation => GeoRecords::Limb(Vec::new()),
            Geometry::Monitor => GeoRecords::Monitor(Vec::new()),
        }
    }
}

/// One pixel readout with its embedded correction bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readout {
    pub sample: CoaddedSample,
    /// Memory (Reticon) or non-linearity (Epitaxx) correction, see
    /// [`MemoryScale`](crate::calib::MemoryScale).
    pub corr: i8,
    /// Straylight correction in units of the channel scale factor.
    pub stray: u8,
}

impl Readout {
    #[must_use]
    pub fn new(sample: CoaddedSample) -> Self {
        Readout {
            sample,
            corr: 0,
            stray: 0,
        }
    }
}

/// Stokes fractions of one DSR.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stokes {
    pub q: f32,
    pub u: f32,
}

/// Readouts of one cluster within one DSR, readout major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterReadouts {
    /// Index into [`State::clusters`].
    pub cluster: usize,
    pub readouts: Vec<Readout>,
}

/// A level-1b DSR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level1bRecord {
    pub time: SensingTime,
    /// Negative when the record is suspect.
    pub quality: i8,
    /// Straylight scale factor per channel, in tenths.
    pub scale_factor: [u8; 8],
    pub geolocation: GeoRecords,
    pub polarization: Stokes,
    pub clusters: Vec<ClusterReadouts>,
}

impl Level1bRecord {
    /// Assemble a DSR from the detector packets read out during it.
    ///
    /// Every cluster block contributes one readout to the descriptor with the same
    /// channel and cluster id, in packet order. Blocks whose length or co-adding
    /// factor does not match their descriptor are dropped. Embedded correction bytes are zero since
    /// level-0 data carries none.
    #[must_use]
    pub fn from_detector_packets(
        time: SensingTime,
        descriptors: &[ClusterDescriptor],
        packets: &[DetectorPacket],
        geolocation: GeoRecords,
    ) -> Self {
        let mut clusters: Vec<ClusterReadouts> = (0..descriptors.len())
            .map(|cluster| ClusterReadouts {
                cluster,
                readouts: Vec::new(),
            })
            .collect();

        for block in packets.iter().flat_map(DetectorPacket::blocks) {
            let Some(idx) = descriptors
                .iter()
                .position(|d| d.channel == block.channel && d.cluster_id == block.cluster_id)
            else {
                debug!(
                    channel = %block.channel,
                    cluster = block.cluster_id,
                    "no descriptor for cluster block"
                );
                continue;
            };
            if block.length != descriptors[idx].length || block.samples.len() != usize::from(block.length) {
                warn!(
                    channel = %block.channel,
                    cluster = block.cluster_id,
                    length = block.length,
                    expected = descriptors[idx].length,
                    "cluster block length mismatch"
                );
                continue;
            }
            if block.coadd != descriptors[idx].coadd {
                warn!(
                    channel = %block.channel,
                    cluster = block.cluster_id,
                    coadd = block.coadd,
                    expected = descriptors[idx].coadd,
                    "cluster block co-adding mismatch"
                );
                continue;
            }
            clusters[idx]
                .readouts
                .extend(block.samples.iter().copied().map(Readout::new));
        }

        Level1bRecord {
            time,
            quality: 0,
            scale_factor: [0; 8],
            geolocation,
            polarization: Stokes::default(),
            clusters,
        }
    }

    /// Readouts of cluster `idx`, if present in this DSR.
    #[must_use]
    pub fn readouts(&self, idx: usize) -> Option<&[Readout]> {
        self.clusters
            .iter()
            .find(|c| c.cluster == idx)
            .map(|c| c.readouts.as_slice())
    }
}

/// A level-1b measurement state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub state_id: u8,
    pub category: u8,
    pub geometry: Geometry,
    /// Orbit phase at the start of the state.
    pub orbit_phase: f32,
    /// Duration of a scan in seconds.
    pub dur_scan: f32,
    pub clusters: Vec<ClusterDescriptor>,
    pub records: Vec<Level1bRecord>,
}

impl State {
    #[must_use]
    pub fn num_dsr(&self) -> usize {
        self.records.len()
    }

    /// Start time of the state, that of its first DSR.
    #[must_use]
    pub fn start_time(&self) -> Option<SensingTime> {
        self.records.first().map(|r| r.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Channel;
    use crate::packet::{ChannelData, ChannelHeader, ClusterBlock, PmtcHeader};

    fn block(channel: Channel, cluster_id: u8, values: &[u16]) -> ClusterBlock {
        ClusterBlock {
            channel,
            sync: 0xBBBB,
            block_nr: 0,
            cluster_id,
            coadd: 1,
            start: 0,
            length: values.len() as u16,
            samples: values.iter().map(|v| CoaddedSample::Single(*v)).collect(),
            fix: None,
        }
    }

    fn packet(blocks: Vec<ClusterBlock>) -> DetectorPacket {
        let channel = blocks[0].channel;
        DetectorPacket {
            bcps: 0,
            pmtc: PmtcHeader::default(),
            orbit_vector: [0; 8],
            channels: vec![ChannelData {
                header: ChannelHeader {
                    sync: 0xAAAA,
                    channel,
                    is: 0,
                    lu: 0,
                    clusters: blocks.len() as u8,
                    bcps: 0,
                    command: 0,
                    ratio: 0,
                    status: 0,
                    frame: 0,
                    bias: 0,
                    temp: 0,
                },
                clusters: blocks,
            }],
        }
    }

    #[test]
    fn assemble_record_from_packets() {
        let chan = Channel::new(2).unwrap();
        let descriptors = vec![
            ClusterDescriptor::new(chan, 10, 0, 3, 1, 0.5, 2).unwrap(),
            ClusterDescriptor::new(chan, 11, 3, 2, 1, 1.0, 1).unwrap(),
        ];
        let packets = vec![
            packet(vec![block(chan, 10, &[1, 2, 3]), block(chan, 11, &[7, 8])]),
            packet(vec![block(chan, 10, &[4, 5, 6]), block(chan, 12, &[9])]),
            packet(vec![block(chan, 11, &[1, 2, 3])]),
        ];

        let rec = Level1bRecord::from_detector_packets(
            SensingTime::default(),
            &descriptors,
            &packets,
            Geometry::Nadir.empty_geolocation(),
        );
        let values: Vec<u32> = rec.readouts(0).unwrap().iter().map(|r| r.sample.value()).collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5, 6]);
        // the 3 pixel block of cluster 11 does not fit its descriptor
        assert_eq!(rec.readouts(1).unwrap().len(), 2);
    }

    #[test]
    fn coadd_mismatch_drops_block() {
        let chan = Channel::new(7).unwrap();
        let descriptors = vec![ClusterDescriptor::new(chan, 40, 0, 2, 2, 0.25, 1).unwrap()];
        let mut summed = block(chan, 40, &[0, 0]);
        summed.coadd = 2;
        summed.samples = vec![CoaddedSample::Summed { factor: 2, value: 300 }; 2];
        let packets = vec![packet(vec![block(chan, 40, &[1, 2])]), packet(vec![summed])];

        let rec = Level1bRecord::from_detector_packets(
            SensingTime::default(),
            &descriptors,
            &packets,
            Geometry::Limb.empty_geolocation(),
        );
        let values: Vec<u32> = rec.readouts(0).unwrap().iter().map(|r| r.sample.value()).collect();
        assert_eq!(values, vec![300, 300]);
    }

    #[test]
    fn geometry_ids() {
        for id in 1..=4 {
            assert_eq!(Geometry::from_id(id).unwrap().id(), id);
        }
        assert_eq!(Geometry::from_id(7), Err(7));
        assert!(matches!(Geometry::Occultation.empty_geolocation(), GeoRecords::Limb(_)));
    }
}
