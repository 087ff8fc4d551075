use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::PmtcHeader;
use crate::bytes::Bytes;
use crate::cluster::{repair_cluster_header, Channel, ClusterDefinition, ClusterFix, Technology};
use crate::error::DecodeError;

const CHANNEL_SYNC: u16 = 0xAAAA;
const CLUSTER_SYNC: u16 = 0xBBBB;

/// Detector readout of one pixel, possibly the on-board sum of several readouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoaddedSample {
    /// Co-adding factor 1, transmitted as a 2 byte count.
    Single(u16),
    /// `factor` readouts summed on board, transmitted as a 3 byte count.
    Summed { factor: u8, value: u32 },
}

impl CoaddedSample {
    /// Largest valid value for a co-adding factor: `factor * 2^16 - 1`.
    #[must_use]
    pub fn max_value(factor: u8) -> u32 {
        u32::from(factor.max(1)) * 0x1_0000 - 1
    }

    #[must_use]
    pub fn value(self) -> u32 {
        match self {
            CoaddedSample::Single(v) => u32::from(v),
            CoaddedSample::Summed { value, .. } => value,
        }
    }

    #[must_use]
    pub fn coadd(self) -> u8 {
        match self {
            CoaddedSample::Single(_) => 1,
            CoaddedSample::Summed { factor, .. } => factor,
        }
    }

    /// Size in bytes of a block of `length` samples with co-adding factor `coadd`.
    ///
    /// 24-bit blocks with an odd number of samples carry one padding byte.
    #[must_use]
    pub fn block_len(coadd: u8, length: u16) -> usize {
        let length = usize::from(length);
        if coadd == 1 {
            2 * length
        } else {
            3 * length + length % 2
        }
    }

    /// Unpack a block of `length` samples.
    ///
    /// Returns the samples together with the number of samples that exceeded
    /// [`CoaddedSample::max_value`]; those are clamped to the maximum.
    ///
    /// # Errors
    /// [`DecodeError::InvalidCoadd`] for a zero factor, [`DecodeError::NotEnoughData`]
    /// if the block is cut short.
    pub fn decode_block(
        bytes: &mut Bytes,
        coadd: u8,
        length: u16,
    ) -> Result<(Vec<CoaddedSample>, usize), DecodeError> {
        if coadd == 0 {
            return Err(DecodeError::InvalidCoadd(coadd));
        }
        let mut block = Bytes::new(bytes.take(Self::block_len(coadd, length))?);
        let mut samples = Vec::with_capacity(usize::from(length));
        let mut errors = 0;
        if coadd == 1 {
            for _ in 0..length {
                samples.push(CoaddedSample::Single(block.u16()?));
            }
        } else {
            let max = Self::max_value(coadd);
            for _ in 0..length {
                let mut value = block.u24()?;
                if value > max {
                    errors += 1;
                    value = max;
                }
                samples.push(CoaddedSample::Summed {
                    factor: coadd,
                    value,
                });
            }
        }
        Ok((samples, errors))
    }

    /// Pack samples the way [`CoaddedSample::decode_block`] expects them.
    pub fn encode_block(samples: &[CoaddedSample], coadd: u8, out: &mut Vec<u8>) {
        if coadd == 1 {
            for s in samples {
                out.extend_from_slice(&(s.value().min(0xffff) as u16).to_be_bytes());
            }
        } else {
            for s in samples {
                out.extend_from_slice(&s.value().to_be_bytes()[1..]);
            }
            if samples.len() % 2 == 1 {
                out.push(0);
            }
        }
    }
}

/// Per channel header of a detector packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelHeader {
    pub sync: u16,
    pub channel: Channel,
    /// Integration status.
    pub is: u8,
    /// Latch-up indicator.
    pub lu: u8,
    pub clusters: u8,
    pub bcps: u16,
    /// Detector command word; layout differs between visible and infrared channels.
    pub command: u32,
    pub ratio: u8,
    pub status: u8,
    pub frame: u8,
    pub bias: u16,
    pub temp: u16,
}

impl ChannelHeader {
    pub const LEN: usize = 16;

    fn decode(bytes: &mut Bytes) -> Result<Self, DecodeError> {
        let sync = bytes.u16()?;
        let word = bytes.u16()?;
        let bcps = bytes.u16()?;
        let command = bytes.u32()?;
        let ratio_hdr = bytes.u16()?;
        let bias = bytes.u16()?;
        let temp = bytes.u16()?;
        Ok(ChannelHeader {
            sync,
            channel: Channel::new((word >> 12) as u8)?,
            is: (word >> 10 & 0x3) as u8,
            lu: (word >> 8 & 0x3) as u8,
            clusters: (word & 0xff) as u8,
            bcps,
            command,
            ratio: (ratio_hdr >> 11) as u8,
            status: (ratio_hdr >> 8 & 0x7) as u8,
            frame: (ratio_hdr & 0xff) as u8,
            bias,
            temp,
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let word = u16::from(self.channel.id()) << 12
            | u16::from(self.is & 0x3) << 10
            | u16::from(self.lu & 0x3) << 8
            | u16::from(self.clusters);
        let ratio_hdr =
            u16::from(self.ratio & 0x1f) << 11 | u16::from(self.status & 0x7) << 8 | u16::from(self.frame);
        out.extend_from_slice(&self.sync.to_be_bytes());
        out.extend_from_slice(&word.to_be_bytes());
        out.extend_from_slice(&self.bcps.to_be_bytes());
        out.extend_from_slice(&self.command.to_be_bytes());
        out.extend_from_slice(&ratio_hdr.to_be_bytes());
        out.extend_from_slice(&self.bias.to_be_bytes());
        out.extend_from_slice(&self.temp.to_be_bytes());
    }

    fn etf(&self) -> u32 {
        self.command >> 18
    }

    fn mode(&self) -> u32 {
        self.command >> 16 & 0x3
    }

    fn etf_pet(&self) -> f32 {
        match self.etf() {
            0 => 31.25e-3,
            etf => 62.5e-3 * etf as f32,
        }
    }

    /// Pixel exposure time in seconds from the command word.
    ///
    /// For visible channels operated as virtual channels this is the exposure time of
    /// the first part; see [`ChannelHeader::virtual_channel`]. Returns `None` for
    /// infrared channels in a mode other than normal or hot.
    #[must_use]
    pub fn pet(&self) -> Option<f32> {
        match self.channel.technology() {
            Technology::Reticon => {
                let sec = self.command >> 7 & 0x1ff;
                let ratio = self.command >> 2 & 0x1f;
                let pet = self.etf_pet();
                if sec > 1 && ratio > 1 {
                    Some(pet * ratio as f32)
                } else {
                    Some(pet)
                }
            }
            Technology::Epitaxx => match self.mode() {
                0 => Some(self.etf_pet()),
                1 => Some(28.125e-6 * 2f32.powi((self.command >> 2 & 0xf) as i32)),
                _ => None,
            },
        }
    }

    /// First pixel and exposure time of the second part of a visible virtual channel.
    #[must_use]
    pub fn virtual_channel(&self) -> Option<(u16, f32)> {
        if self.channel.technology() != Technology::Reticon {
            return None;
        }
        let sec = self.command >> 7 & 0x1ff;
        if sec > 1 {
            Some(((2 * sec) as u16, self.etf_pet()))
        } else {
            None
        }
    }
}

/// One cluster of pixel data within a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterBlock {
    pub channel: Channel,
    pub sync: u16,
    pub block_nr: u16,
    pub cluster_id: u8,
    pub coadd: u8,
    pub start: u16,
    pub length: u16,
    pub samples: Vec<CoaddedSample>,
    /// Set when the header was repaired against the cluster definitions.
    pub fix: Option<ClusterFix>,
}

impl ClusterBlock {
    pub const HEADER_LEN: usize = 10;

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.sync.to_be_bytes());
        out.extend_from_slice(&self.block_nr.to_be_bytes());
        out.push(self.cluster_id);
        out.push(self.coadd);
        out.extend_from_slice(&self.start.to_be_bytes());
        out.extend_from_slice(&self.length.to_be_bytes());
        CoaddedSample::encode_block(&self.samples, self.coadd, out);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelData {
    pub header: ChannelHeader,
    pub clusters: Vec<ClusterBlock>,
}

/// Body of a detector packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorPacket {
    pub bcps: u16,
    pub pmtc: PmtcHeader,
    pub orbit_vector: [i32; 8],
    pub channels: Vec<ChannelData>,
}

#[derive(Debug, Default, Clone, Copy)]
pub(super) struct DecodeStatus {
    pub sync_errors: usize,
    pub sample_errors: usize,
    /// False if decoding stopped early at a corrupted sync marker.
    pub complete: bool,
}

fn sync_ok(sync: u16, expected: u16) -> bool {
    sync == expected || sync == 0
}

impl DetectorPacket {
    /// Fixed part of the body preceding the channel data.
    pub const HEADER_LEN: usize = 2 + PmtcHeader::LEN + 32 + 2;

    /// Decode the body of a detector packet.
    ///
    /// Cluster headers are repaired against `definitions` when it is not empty. A
    /// corrupted channel or cluster sync marker ends decoding; the channels read
    /// so far are kept.
    pub(super) fn decode(
        bytes: &mut Bytes,
        definitions: &[ClusterDefinition],
    ) -> Result<(Self, DecodeStatus), DecodeError> {
        let bcps = bytes.u16()?;
        let pmtc = PmtcHeader::decode(bytes)?;
        let mut orbit_vector = [0i32; 8];
        for v in &mut orbit_vector {
            *v = bytes.i32()?;
        }
        let num_chan = bytes.u16()?;

        let mut status = DecodeStatus {
            complete: true,
            ..Default::default()
        };
        let mut channels = Vec::with_capacity(usize::from(num_chan));
        'channels: for _ in 0..num_chan {
            let header = ChannelHeader::decode(bytes)?;
            if !sync_ok(header.sync, CHANNEL_SYNC) {
                warn!(sync = header.sync, "corrupted channel sync, remainder skipped");
                status.sync_errors += 1;
                status.complete = false;
                break;
            }
            let mut clusters = Vec::with_capacity(usize::from(header.clusters));
            for _ in 0..header.clusters {
                let sync = bytes.u16()?;
                if !sync_ok(sync, CLUSTER_SYNC) {
                    warn!(
                        channel = %header.channel,
                        sync,
                        "corrupted cluster sync, remainder skipped"
                    );
                    status.sync_errors += 1;
                    status.complete = false;
                    channels.push(ChannelData { header, clusters });
                    break 'channels;
                }
                let block_nr = bytes.u16()?;
                let cluster_id = bytes.u8()?;
                let coadd = bytes.u8()?;
                let start = bytes.u16()?;
                let length = bytes.u16()?;

                let mut def = ClusterDefinition {
                    channel: header.channel.id(),
                    cluster_id,
                    start,
                    length,
                };
                let fix = if definitions.is_empty() {
                    None
                } else {
                    repair_cluster_header(definitions, &mut def)?
                };

                let (samples, errors) = CoaddedSample::decode_block(bytes, coadd, def.length)?;
                if errors > 0 {
                    debug!(
                        channel = def.channel,
                        cluster = def.cluster_id,
                        errors,
                        "co-added samples out of range"
                    );
                }
                status.sample_errors += errors;
                clusters.push(ClusterBlock {
                    channel: Channel::new(def.channel)?,
                    sync,
                    block_nr,
                    cluster_id: def.cluster_id,
                    coadd,
                    start: def.start,
                    length: def.length,
                    samples,
                    fix,
                });
            }
            channels.push(ChannelData { header, clusters });
        }

        Ok((
            DetectorPacket {
                bcps,
                pmtc,
                orbit_vector,
                channels,
            },
            status,
        ))
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.bcps.to_be_bytes());
        self.pmtc.encode(out);
        for v in &self.orbit_vector {
            out.extend_from_slice(&v.to_be_bytes());
        }
        out.extend_from_slice(&(self.channels.len() as u16).to_be_bytes());
        for chan in &self.channels {
            chan.header.encode(out);
            for block in &chan.clusters {
                block.encode(out);
            }
        }
    }

    /// Iterate over all cluster blocks of all channels.
    pub fn blocks(&self) -> impl Iterator<Item = &ClusterBlock> {
        self.channels.iter().flat_map(|c| c.clusters.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn decode_single_samples() {
        #[rustfmt::skip]
        let dat: &[u8] = &[
            0x00, 0x01,
            0x12, 0x34,
            0xff, 0xff,
        ];
        let mut bytes = Bytes::new(dat);
        let (samples, errors) = CoaddedSample::decode_block(&mut bytes, 1, 3).unwrap();
        assert_eq!(errors, 0);
        assert_eq!(
            samples,
            vec![
                CoaddedSample::Single(1),
                CoaddedSample::Single(0x1234),
                CoaddedSample::Single(0xffff),
            ]
        );
        assert_eq!(bytes.remaining(), 0);
    }

    #[test]
    fn decode_summed_samples_with_padding() {
        #[rustfmt::skip]
        let dat: &[u8] = &[
            0x00, 0x00, 0x01,
            0x02, 0x00, 0x00,
            0x00, 0x10, 0x00,
            0x00,             // pad
            0xab,             // next block
        ];
        let mut bytes = Bytes::new(dat);
        let (samples, errors) = CoaddedSample::decode_block(&mut bytes, 2, 3).unwrap();
        // 0x020000 is above 2 * 2^16 - 1
        assert_eq!(errors, 1);
        let values: Vec<u32> = samples.iter().map(|s| s.value()).collect();
        assert_eq!(values, vec![1, CoaddedSample::max_value(2), 0x1000]);
        assert_eq!(bytes.u8().unwrap(), 0xab, "padding byte must be consumed");
    }

    #[test]
    fn zero_coadd_is_invalid() {
        let mut bytes = Bytes::new(&[0, 0, 0, 0]);
        assert_eq!(
            CoaddedSample::decode_block(&mut bytes, 0, 1).unwrap_err(),
            DecodeError::InvalidCoadd(0)
        );
    }

    #[test_case(1, 1)]
    #[test_case(1, 7)]
    #[test_case(2, 1)]
    #[test_case(2, 6)]
    #[test_case(16, 5)]
    #[test_case(255, 3)]
    fn samples_survive_encoding(coadd: u8, length: u16) {
        let max = CoaddedSample::max_value(coadd);
        let samples: Vec<CoaddedSample> = (0..u32::from(length))
            .map(|n| {
                let value = (n * 7919 + 3) % (max + 1);
                if coadd == 1 {
                    CoaddedSample::Single(value as u16)
                } else {
                    CoaddedSample::Summed {
                        factor: coadd,
                        value,
                    }
                }
            })
            .collect();

        let mut out = Vec::new();
        CoaddedSample::encode_block(&samples, coadd, &mut out);
        assert_eq!(out.len(), CoaddedSample::block_len(coadd, length));

        let (decoded, errors) =
            CoaddedSample::decode_block(&mut Bytes::new(&out), coadd, length).unwrap();
        assert_eq!(errors, 0);
        assert_eq!(decoded, samples);
    }

    fn header(channel: u8, command: u32) -> ChannelHeader {
        ChannelHeader {
            sync: CHANNEL_SYNC,
            channel: Channel::new(channel).unwrap(),
            is: 0,
            lu: 0,
            clusters: 0,
            bcps: 0,
            command,
            ratio: 0,
            status: 0,
            frame: 0,
            bias: 0,
            temp: 0,
        }
    }

    #[test_case(2, 0, Some(31.25e-3); "vis etf zero")]
    #[test_case(2, 16 << 18, Some(1.0); "vis etf 16")]
    #[test_case(2, 2 << 18 | 3 << 7 | 4 << 2, Some(0.5); "vis virtual channel")]
    #[test_case(7, 8 << 18, Some(0.5); "ir normal")]
    #[test_case(7, 1 << 16 | 3 << 2, Some(225e-6); "ir hot")]
    #[test_case(7, 2 << 16, None; "ir unknown mode")]
    fn pixel_exposure_time(channel: u8, command: u32, expected: Option<f32>) {
        let pet = header(channel, command).pet();
        match (pet, expected) {
            (Some(p), Some(e)) => assert!((p - e).abs() < 1e-9, "{p} != {e}"),
            (p, e) => assert_eq!(p, e),
        }
    }

    #[test]
    fn virtual_channel_boundary() {
        let hdr = header(2, 2 << 18 | 3 << 7 | 4 << 2);
        assert_eq!(hdr.virtual_channel(), Some((6, 0.125)));
        assert_eq!(header(2, 2 << 18).virtual_channel(), None);
        assert_eq!(header(6, 2 << 18 | 3 << 7).virtual_channel(), None);
    }

    #[test]
    fn channel_header_fields() {
        #[rustfmt::skip]
        let dat: &[u8] = &[
            0xaa, 0xaa,             // sync
            0x36, 0x02,             // channel 3, is 1, lu 2, 2 clusters
            0x00, 0x10,             // bcps
            0x00, 0x40, 0x00, 0x00, // command
            0x2b, 0x07,             // ratio 5, status 3, frame 7
            0x00, 0x01,             // bias
            0x00, 0x02,             // temp
        ];
        let hdr = ChannelHeader::decode(&mut Bytes::new(dat)).unwrap();
        assert_eq!(hdr.channel.id(), 3);
        assert_eq!(hdr.is, 1);
        assert_eq!(hdr.lu, 2);
        assert_eq!(hdr.clusters, 2);
        assert_eq!(hdr.bcps, 16);
        assert_eq!(hdr.ratio, 5);
        assert_eq!(hdr.status, 3);
        assert_eq!(hdr.frame, 7);

        let mut out = Vec::new();
        hdr.encode(&mut out);
        assert_eq!(out, dat);
    }
}
