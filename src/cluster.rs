use std::fmt::Display;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DecodeError;

/// Number of pixels per science channel.
pub const CHANNEL_SIZE: usize = 1024;
/// Number of science channels.
pub const SCIENCE_CHANNELS: usize = 8;
/// Number of science pixels over all channels.
pub const SCIENCE_PIXELS: usize = CHANNEL_SIZE * SCIENCE_CHANNELS;
/// First channel using Epitaxx (infrared) detectors.
pub const FIRST_INFRARED_CHANNEL: u8 = 6;

/// Physical detector technology of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Technology {
    /// Silicon diode arrays, channels 1-5.
    Reticon,
    /// InGaAs arrays, channels 6-8.
    Epitaxx,
}

/// Science channel id, guaranteed to be in 1..=8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Channel(u8);

impl Channel {
    /// # Errors
    /// [`DecodeError::InvalidChannel`] for ids outside 1..=8.
    pub fn new(id: u8) -> Result<Self, DecodeError> {
        if (1..=SCIENCE_CHANNELS as u8).contains(&id) {
            Ok(Channel(id))
        } else {
            Err(DecodeError::InvalidChannel(id))
        }
    }

    #[must_use]
    pub fn id(self) -> u8 {
        self.0
    }

    /// Zero based channel index.
    #[must_use]
    pub fn index(self) -> usize {
        usize::from(self.0 - 1)
    }

    #[must_use]
    pub fn technology(self) -> Technology {
        if self.0 < FIRST_INFRARED_CHANNEL {
            Technology::Reticon
        } else {
            Technology::Epitaxx
        }
    }

    /// Absolute pixel id of the first pixel of this channel.
    #[must_use]
    pub fn pixel_offset(self) -> usize {
        self.index() * CHANNEL_SIZE
    }
}

impl TryFrom<u8> for Channel {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Channel::new(value)
    }
}

impl From<Channel> for u8 {
    fn from(value: Channel) -> Self {
        value.0
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Static configuration of one cluster within a state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    pub channel: Channel,
    /// Cluster id, unique over the instrument (1 based).
    pub cluster_id: u8,
    /// First pixel relative to the start of the channel.
    pub start: u16,
    /// Number of pixels, always > 0.
    pub length: u16,
    pub coadd: u8,
    /// Pixel exposure time in seconds.
    pub pet: f32,
    /// Readouts per DSR.
    pub n_read: u16,
}

impl ClusterDescriptor {
    /// # Errors
    /// [`DecodeError::InvalidCoadd`] if `coadd` is zero, or
    /// [`DecodeError::ClusterDefinition`] if `length` is zero or the cluster does not fit
    /// in its channel.
    pub fn new(
        channel: Channel,
        cluster_id: u8,
        start: u16,
        length: u16,
        coadd: u8,
        pet: f32,
        n_read: u16,
    ) -> Result<Self, DecodeError> {
        if coadd == 0 {
            return Err(DecodeError::InvalidCoadd(coadd));
        }
        if length == 0 || usize::from(start) + usize::from(length) > CHANNEL_SIZE {
            return Err(DecodeError::ClusterDefinition {
                channel: channel.id(),
                cluster: cluster_id,
            });
        }
        Ok(ClusterDescriptor {
            channel,
            cluster_id,
            start,
            length,
            coadd,
            pet,
            n_read,
        })
    }

    /// Absolute id of the first pixel, `channel_offset + start`.
    #[must_use]
    pub fn first_pixel(&self) -> usize {
        self.channel.pixel_offset() + usize::from(self.start)
    }

    /// Integration time of one transmitted sample.
    #[must_use]
    pub fn integration_time(&self) -> f32 {
        f32::from(self.coadd) * self.pet
    }
}

/// Bit-per-cluster selection, bit `n` selects cluster id `n + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMask(u64);

impl Default for ClusterMask {
    fn default() -> Self {
        Self::ALL
    }
}

impl ClusterMask {
    pub const ALL: ClusterMask = ClusterMask(u64::MAX);
    pub const NONE: ClusterMask = ClusterMask(0);

    #[must_use]
    pub fn from_bits(bits: u64) -> Self {
        ClusterMask(bits)
    }

    #[must_use]
    pub fn bits(self) -> u64 {
        self.0
    }

    /// Mask selecting only the given cluster ids. Ids outside 1..=64 are ignored.
    #[must_use]
    pub fn from_ids(ids: &[u8]) -> Self {
        let mut mask = Self::NONE;
        for id in ids {
            mask = mask.with(*id);
        }
        mask
    }

    #[must_use]
    pub fn with(self, cluster_id: u8) -> Self {
        match cluster_id {
            1..=64 => ClusterMask(self.0 | 1 << (cluster_id - 1)),
            _ => self,
        }
    }

    #[must_use]
    pub fn contains(self, cluster_id: u8) -> bool {
        match cluster_id {
            1..=64 => self.0 & (1 << (cluster_id - 1)) != 0,
            _ => false,
        }
    }
}

/// Known layout of a cluster, used to repair corrupted detector cluster headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDefinition {
    pub channel: u8,
    pub cluster_id: u8,
    pub start: u16,
    pub length: u16,
}

/// Single field repaired in a cluster header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterFix {
    ClusterId { from: u8, to: u8 },
    Channel { from: u8, to: u8 },
    Start { from: u16, to: u16 },
    Length { from: u16, to: u16 },
}

/// Match `header` against `definitions` and repair at most one field.
///
/// Returns `Ok(None)` when the header matches a definition exactly and
/// `Ok(Some(fix))` after repairing one field. Fields are tried in the order
/// cluster id, channel, start, length.
///
/// # Errors
/// [`DecodeError::ClusterDefinition`] if more than one field is wrong.
pub fn repair_cluster_header(
    definitions: &[ClusterDefinition],
    header: &mut ClusterDefinition,
) -> Result<Option<ClusterFix>, DecodeError> {
    let h = *header;
    if definitions.iter().any(|d| *d == h) {
        return Ok(None);
    }

    let fix = if let Some(d) = definitions
        .iter()
        .find(|d| d.channel == h.channel && d.start == h.start && d.length == h.length)
    {
        header.cluster_id = d.cluster_id;
        ClusterFix::ClusterId {
            from: h.cluster_id,
            to: d.cluster_id,
        }
    } else if let Some(d) = definitions
        .iter()
        .find(|d| d.cluster_id == h.cluster_id && d.start == h.start && d.length == h.length)
    {
        header.channel = d.channel;
        ClusterFix::Channel {
            from: h.channel,
            to: d.channel,
        }
    } else if let Some(d) = definitions.iter().find(|d| {
        d.channel == h.channel && d.cluster_id == h.cluster_id && d.length == h.length
    }) {
        header.start = d.start;
        ClusterFix::Start {
            from: h.start,
            to: d.start,
        }
    } else if let Some(d) = definitions
        .iter()
        .find(|d| d.channel == h.channel && d.cluster_id == h.cluster_id && d.start == h.start)
    {
        header.length = d.length;
        ClusterFix::Length {
            from: h.length,
            to: d.length,
        }
    } else {
        return Err(DecodeError::ClusterDefinition {
            channel: h.channel,
            cluster: h.cluster_id,
        });
    };

    debug!(channel = h.channel, cluster = h.cluster_id, ?fix, "repaired cluster header");
    Ok(Some(fix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn definitions() -> Vec<ClusterDefinition> {
        vec![
            ClusterDefinition { channel: 1, cluster_id: 1, start: 0, length: 5 },
            ClusterDefinition { channel: 1, cluster_id: 2, start: 5, length: 192 },
            ClusterDefinition { channel: 6, cluster_id: 40, start: 0, length: 10 },
        ]
    }

    #[test_case(1, Technology::Reticon)]
    #[test_case(5, Technology::Reticon)]
    #[test_case(6, Technology::Epitaxx)]
    #[test_case(8, Technology::Epitaxx)]
    fn channel_technology(id: u8, expected: Technology) {
        assert_eq!(Channel::new(id).unwrap().technology(), expected);
    }

    #[test_case(0)]
    #[test_case(9)]
    fn invalid_channel(id: u8) {
        assert_eq!(Channel::new(id), Err(DecodeError::InvalidChannel(id)));
    }

    #[test]
    fn descriptor_rejects_empty_cluster() {
        let chan = Channel::new(2).unwrap();
        assert!(ClusterDescriptor::new(chan, 3, 10, 0, 1, 0.5, 1).is_err());
        assert!(ClusterDescriptor::new(chan, 3, 1000, 30, 1, 0.5, 1).is_err());
        assert!(ClusterDescriptor::new(chan, 3, 10, 20, 0, 0.5, 1).is_err());

        let desc = ClusterDescriptor::new(chan, 3, 10, 20, 2, 0.5, 1).unwrap();
        assert_eq!(desc.first_pixel(), 1034);
        assert!((desc.integration_time() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn cluster_mask() {
        let mask = ClusterMask::from_ids(&[1, 3, 64, 65]);
        assert!(mask.contains(1));
        assert!(!mask.contains(2));
        assert!(mask.contains(3));
        assert!(mask.contains(64));
        assert!(!mask.contains(65));
        assert!(!mask.contains(0));
        assert!(ClusterMask::default().contains(17));
        assert!(!ClusterMask::NONE.contains(17));
    }

    #[test]
    fn exact_header_needs_no_repair() {
        let mut hdr = ClusterDefinition { channel: 1, cluster_id: 2, start: 5, length: 192 };
        assert_eq!(repair_cluster_header(&definitions(), &mut hdr).unwrap(), None);
    }

    #[test_case(
        ClusterDefinition { channel: 1, cluster_id: 9, start: 5, length: 192 },
        ClusterFix::ClusterId { from: 9, to: 2 }; "cluster id"
    )]
    #[test_case(
        ClusterDefinition { channel: 3, cluster_id: 40, start: 0, length: 10 },
        ClusterFix::Channel { from: 3, to: 6 }; "channel"
    )]
    #[test_case(
        ClusterDefinition { channel: 1, cluster_id: 2, start: 77, length: 192 },
        ClusterFix::Start { from: 77, to: 5 }; "start"
    )]
    #[test_case(
        ClusterDefinition { channel: 1, cluster_id: 1, start: 0, length: 5000 },
        ClusterFix::Length { from: 5000, to: 5 }; "length"
    )]
    fn repairs_single_field(mut hdr: ClusterDefinition, expected: ClusterFix) {
        let fix = repair_cluster_header(&definitions(), &mut hdr).unwrap();
        assert_eq!(fix, Some(expected));
        assert!(definitions().contains(&hdr), "repaired header should match: {hdr:?}");
    }

    #[test]
    fn two_bad_fields_cannot_be_repaired() {
        let mut hdr = ClusterDefinition { channel: 4, cluster_id: 2, start: 77, length: 192 };
        assert!(matches!(
            repair_cluster_header(&definitions(), &mut hdr),
            Err(DecodeError::ClusterDefinition { channel: 4, cluster: 2 })
        ));
    }
}
