//! Level-0 telemetry packet decoding.
//!
//! A packet on disk is a 32 byte annotation added by the ground segment followed by the
//! instrument source packet: a 6 byte packet header, a 12 byte data field header and a
//! body whose layout depends on the packet type. All values are big-endian.
mod auxiliary;
mod detector;
mod pmd;
mod summary;

use std::fmt::Display;
use std::io::{ErrorKind, Read};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::bytes::Bytes;
use crate::cluster::ClusterDefinition;
use crate::error::DecodeError;
use crate::time::SensingTime;

pub use auxiliary::{AuxiliaryPacket, BcpRecord, PmtcFrame};
pub use detector::{ChannelData, ChannelHeader, ClusterBlock, CoaddedSample, DetectorPacket};
pub use pmd::{PmdPacket, PmdRecord};
pub use summary::{Summary, TypeSummary};

/// Instrument packet type from the data field header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PacketType {
    Detector,
    Auxiliary,
    Pmd,
}

impl PacketType {
    /// # Errors
    /// [`DecodeError::UnknownPacketType`] for ids other than 1, 2 or 3.
    pub fn from_id(id: u8) -> Result<Self, DecodeError> {
        match id {
            1 => Ok(PacketType::Detector),
            2 => Ok(PacketType::Auxiliary),
            3 => Ok(PacketType::Pmd),
            _ => Err(DecodeError::UnknownPacketType(id)),
        }
    }

    #[must_use]
    pub fn id(self) -> u8 {
        match self {
            PacketType::Detector => 1,
            PacketType::Auxiliary => 2,
            PacketType::Pmd => 3,
        }
    }
}

impl Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketType::Detector => write!(f, "detector"),
            PacketType::Auxiliary => write!(f, "auxiliary"),
            PacketType::Pmd => write!(f, "pmd"),
        }
    }
}

/// Ground segment annotation preceding every packet.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Sensing time of the packet.
    pub isp_time: SensingTime,
    /// Ground station reception time.
    pub ground_time: SensingTime,
    pub isp_length: u16,
    pub crc_errors: u16,
    pub rs_errors: u16,
}

impl Annotation {
    pub const LEN: usize = 32;

    /// # Errors
    /// [`DecodeError::NotEnoughData`] if fewer than [`Annotation::LEN`] bytes remain.
    pub fn decode(bytes: &mut Bytes) -> Result<Self, DecodeError> {
        let isp_time = SensingTime::decode(bytes)?;
        let ground_time = SensingTime::decode(bytes)?;
        let isp_length = bytes.u16()?;
        let crc_errors = bytes.u16()?;
        let rs_errors = bytes.u16()?;
        bytes.skip(2)?;
        Ok(Annotation {
            isp_time,
            ground_time,
            isp_length,
            crc_errors,
            rs_errors,
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        self.isp_time.encode(out);
        self.ground_time.encode(out);
        out.extend_from_slice(&self.isp_length.to_be_bytes());
        out.extend_from_slice(&self.crc_errors.to_be_bytes());
        out.extend_from_slice(&self.rs_errors.to_be_bytes());
        out.extend_from_slice(&[0, 0]);
    }
}

/// Source packet header.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    pub vcid: u8,
    pub op_mode: u8,
    pub seq_cntrl: u16,
    /// Length of the packet data field minus 1.
    pub length: u16,
}

impl PacketHeader {
    pub const LEN: usize = 6;

    /// # Errors
    /// [`DecodeError::NotEnoughData`] if fewer than [`PacketHeader::LEN`] bytes remain.
    pub fn decode(bytes: &mut Bytes) -> Result<Self, DecodeError> {
        let api = bytes.u16()?;
        Ok(PacketHeader {
            vcid: (api >> 5 & 0x1f) as u8,
            op_mode: (api & 0x1f) as u8,
            seq_cntrl: bytes.u16()?,
            length: bytes.u16()?,
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let api = u16::from(self.vcid & 0x1f) << 5 | u16::from(self.op_mode & 0x1f);
        out.extend_from_slice(&api.to_be_bytes());
        out.extend_from_slice(&self.seq_cntrl.to_be_bytes());
        out.extend_from_slice(&self.length.to_be_bytes());
    }

    /// Length of the data field in bytes.
    #[must_use]
    pub fn data_field_len(&self) -> usize {
        usize::from(self.length) + 1
    }

    /// Total on-disk size of the annotated packet.
    #[must_use]
    pub fn packet_len(&self) -> usize {
        Annotation::LEN + Self::LEN + self.data_field_len()
    }
}

/// Data field header, common to all packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataHeader {
    pub length: u16,
    pub category: u8,
    pub state_id: u8,
    pub on_board_time: u32,
    pub hsm: u8,
    pub atc_id: u8,
    pub config_id: u8,
    pub packet_type: PacketType,
    pub overflow: u8,
}

impl DataHeader {
    pub const LEN: usize = 12;

    /// # Errors
    /// [`DecodeError::NotEnoughData`] if fewer than [`DataHeader::LEN`] bytes remain, or
    /// [`DecodeError::UnknownPacketType`].
    pub fn decode(bytes: &mut Bytes) -> Result<Self, DecodeError> {
        let length = bytes.u16()?;
        let category = bytes.u8()?;
        let state_id = bytes.u8()?;
        let on_board_time = bytes.u32()?;
        let rdv = bytes.u16()?;
        let id = bytes.u16()?;
        Ok(DataHeader {
            length,
            category,
            state_id,
            on_board_time,
            hsm: (rdv >> 14) as u8,
            atc_id: (rdv >> 8 & 0x3f) as u8,
            config_id: (rdv & 0xff) as u8,
            packet_type: PacketType::from_id((id >> 12 & 0xf) as u8)?,
            overflow: (id & 0xf) as u8,
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let rdv = u16::from(self.hsm & 0x3) << 14
            | u16::from(self.atc_id & 0x3f) << 8
            | u16::from(self.config_id);
        let id = u16::from(self.packet_type.id()) << 12 | u16::from(self.overflow & 0xf);
        out.extend_from_slice(&self.length.to_be_bytes());
        out.push(self.category);
        out.push(self.state_id);
        out.extend_from_slice(&self.on_board_time.to_be_bytes());
        out.extend_from_slice(&rdv.to_be_bytes());
        out.extend_from_slice(&id.to_be_bytes());
    }
}

/// Programmable mechanism timing control header of auxiliary and detector packets.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmtcHeader {
    pub pmtc_1: u16,
    pub scanner_mode: u16,
    pub az_param: u32,
    pub elv_param: u32,
    pub factor: [u8; 6],
}

impl PmtcHeader {
    pub const LEN: usize = 18;

    /// # Errors
    /// [`DecodeError::NotEnoughData`] if fewer than [`PmtcHeader::LEN`] bytes remain.
    pub fn decode(bytes: &mut Bytes) -> Result<Self, DecodeError> {
        let pmtc_1 = bytes.u16()?;
        let scanner_mode = bytes.u16()?;
        let az_param = bytes.u32()?;
        let elv_param = bytes.u32()?;
        let mut factor = [0u8; 6];
        factor.copy_from_slice(bytes.take(6)?);
        Ok(PmtcHeader {
            pmtc_1,
            scanner_mode,
            az_param,
            elv_param,
            factor,
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.pmtc_1.to_be_bytes());
        out.extend_from_slice(&self.scanner_mode.to_be_bytes());
        out.extend_from_slice(&self.az_param.to_be_bytes());
        out.extend_from_slice(&self.elv_param.to_be_bytes());
        out.extend_from_slice(&self.factor);
    }

    /// Scan phase, the high nibble of `pmtc_1`.
    #[must_use]
    pub fn phase(&self) -> u8 {
        (self.pmtc_1 >> 12) as u8
    }
}

/// Validated view of one annotated packet before its body is decoded.
///
/// Construction checks that the buffer holds exactly the number of bytes declared by
/// the packet header, so the body decoders never have to second guess the total size.
#[derive(Debug, Clone)]
pub struct RawPacket<'a> {
    buf: &'a [u8],
    pub annotation: Annotation,
    pub header: PacketHeader,
    pub data_header: DataHeader,
}

impl<'a> RawPacket<'a> {
    /// Offset of the packet body within the annotated packet.
    pub const BODY_OFFSET: usize = Annotation::LEN + PacketHeader::LEN + DataHeader::LEN;

    /// # Errors
    /// [`DecodeError::Truncated`] if the buffer length differs from the declared packet
    /// length or the data field header claims more than the data field,
    /// [`DecodeError::UnknownPacketType`] for unsupported packet types.
    pub fn new(buf: &'a [u8]) -> Result<Self, DecodeError> {
        if buf.len() < Self::BODY_OFFSET {
            return Err(DecodeError::Truncated {
                declared: Self::BODY_OFFSET,
                actual: buf.len(),
            });
        }
        let mut bytes = Bytes::new(buf);
        let annotation = Annotation::decode(&mut bytes)?;
        let header = PacketHeader::decode(&mut bytes)?;
        if header.data_field_len() < DataHeader::LEN || header.packet_len() != buf.len() {
            return Err(DecodeError::Truncated {
                declared: header.packet_len(),
                actual: buf.len(),
            });
        }
        let data_header = DataHeader::decode(&mut bytes)?;
        // detector packets declare only their fixed part here, never more than the field
        if usize::from(data_header.length) > header.data_field_len() {
            return Err(DecodeError::Truncated {
                declared: Annotation::LEN + PacketHeader::LEN + usize::from(data_header.length),
                actual: buf.len(),
            });
        }
        Ok(RawPacket {
            buf,
            annotation,
            header,
            data_header,
        })
    }

    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        self.data_header.packet_type
    }

    #[must_use]
    pub fn on_board_time(&self) -> u32 {
        self.data_header.on_board_time
    }

    #[must_use]
    pub fn crc_errors(&self) -> u16 {
        self.annotation.crc_errors
    }

    #[must_use]
    pub fn rs_errors(&self) -> u16 {
        self.annotation.rs_errors
    }

    /// True when the ground segment reported CRC or Reed-Solomon errors.
    #[must_use]
    pub fn is_corrupted(&self) -> bool {
        self.annotation.crc_errors > 0 || self.annotation.rs_errors > 0
    }

    /// Total size in bytes, including the annotation.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes following the data field header.
    #[must_use]
    pub fn body(&self) -> &'a [u8] {
        &self.buf[Self::BODY_OFFSET..]
    }
}

/// Type specific packet contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PacketBody {
    Auxiliary(AuxiliaryPacket),
    Detector(DetectorPacket),
    Pmd(PmdPacket),
}

/// A fully decoded packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedPacket {
    pub annotation: Annotation,
    pub header: PacketHeader,
    pub data_header: DataHeader,
    pub body: PacketBody,
    /// Number of sync markers that were neither the expected constant nor zero.
    pub sync_errors: usize,
    /// Number of co-added samples exceeding their maximum representable value.
    pub sample_errors: usize,
}

impl DecodedPacket {
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        self.data_header.packet_type
    }

    #[must_use]
    pub fn state_id(&self) -> u8 {
        self.data_header.state_id
    }

    /// True if the packet should be treated with suspicion: transmission errors were
    /// reported or sync markers did not match.
    #[must_use]
    pub fn is_corrupted(&self) -> bool {
        self.sync_errors > 0 || self.annotation.crc_errors > 0 || self.annotation.rs_errors > 0
    }

    #[must_use]
    pub fn as_detector(&self) -> Option<&DetectorPacket> {
        match &self.body {
            PacketBody::Detector(det) => Some(det),
            _ => None,
        }
    }

    /// Size of the annotated packet in bytes.
    #[must_use]
    pub fn packet_len(&self) -> usize {
        self.header.packet_len()
    }
}

/// Packet decoder, optionally repairing detector cluster headers against a table of
/// known cluster definitions.
#[derive(Debug, Default, Clone)]
pub struct Decoder {
    definitions: Vec<ClusterDefinition>,
}

impl Decoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Repair single-field corruption in detector cluster headers using `definitions`.
    #[must_use]
    pub fn with_cluster_definitions(mut self, definitions: Vec<ClusterDefinition>) -> Self {
        self.definitions = definitions;
        self
    }

    /// Decode a single annotated packet.
    ///
    /// # Errors
    /// [`DecodeError::Truncated`] if the buffer does not hold exactly the declared
    /// number of bytes or the body does not consume them all. Other [`DecodeError`]s
    /// for invalid field values.
    pub fn decode(&self, buf: &[u8]) -> Result<DecodedPacket, DecodeError> {
        let raw = RawPacket::new(buf)?;
        let body = raw.body();
        let mut bytes = Bytes::new(body);

        let truncated = |err: DecodeError| match err {
            DecodeError::NotEnoughData { offset, wanted, .. } => DecodeError::Truncated {
                declared: raw.len(),
                actual: RawPacket::BODY_OFFSET + offset + wanted,
            },
            err => err,
        };

        let mut sync_errors = 0;
        let mut sample_errors = 0;
        let mut complete = true;
        let body = match raw.packet_type() {
            PacketType::Auxiliary => {
                let aux = AuxiliaryPacket::decode(&mut bytes).map_err(truncated)?;
                sync_errors += aux.sync_errors();
                PacketBody::Auxiliary(aux)
            }
            PacketType::Detector => {
                let (det, status) =
                    DetectorPacket::decode(&mut bytes, &self.definitions).map_err(truncated)?;
                sync_errors += status.sync_errors;
                sample_errors += status.sample_errors;
                complete = status.complete;
                PacketBody::Detector(det)
            }
            PacketType::Pmd => {
                let pmd = PmdPacket::decode(&mut bytes).map_err(truncated)?;
                sync_errors += pmd.sync_errors();
                PacketBody::Pmd(pmd)
            }
        };

        if complete && bytes.remaining() != 0 {
            return Err(DecodeError::Truncated {
                declared: raw.len(),
                actual: RawPacket::BODY_OFFSET + bytes.offset(),
            });
        }
        if sync_errors > 0 {
            debug!(
                packet_type = %raw.packet_type(),
                state_id = raw.data_header.state_id,
                sync_errors,
                "sync marker mismatch"
            );
        }

        Ok(DecodedPacket {
            annotation: raw.annotation,
            header: raw.header,
            data_header: raw.data_header,
            body,
            sync_errors,
            sample_errors,
        })
    }
}

/// Decode a single annotated packet without cluster header repair.
///
/// # Errors
/// See [`Decoder::decode`].
pub fn decode(buf: &[u8]) -> Result<DecodedPacket, DecodeError> {
    Decoder::default().decode(buf)
}

/// Iterator of decoded packets read from a byte stream.
///
/// Packets that fail to decode are skipped and counted. The iterator ends at the end of
/// the stream, including a partial packet at the end, and yields an error only for I/O
/// failures of the underlying reader.
pub struct PacketIter<R>
where
    R: Read + Send,
{
    reader: R,
    decoder: Decoder,
    offset: usize,
    skipped: usize,
    summary: Summary,
    buf: Vec<u8>,
}

impl<R> PacketIter<R>
where
    R: Read + Send,
{
    fn new(reader: R, decoder: Decoder) -> Self {
        PacketIter {
            reader,
            decoder,
            offset: 0,
            skipped: 0,
            summary: Summary::default(),
            buf: Vec::with_capacity(8192),
        }
    }

    /// Number of packets skipped because they could not be decoded.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Summary of the packets yielded so far.
    #[must_use]
    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    /// Byte offset of the next packet in the stream.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn read_packet(&mut self) -> std::io::Result<()> {
        const PREFIX: usize = Annotation::LEN + PacketHeader::LEN;
        self.buf.resize(PREFIX, 0);
        self.reader.read_exact(&mut self.buf)?;
        let header = PacketHeader::decode(&mut Bytes::new(&self.buf[Annotation::LEN..]))
            .map_err(|err| std::io::Error::new(ErrorKind::InvalidData, err))?;
        self.buf.resize(header.packet_len(), 0);
        self.reader.read_exact(&mut self.buf[PREFIX..])
    }
}

impl<R> Iterator for PacketIter<R>
where
    R: Read + Send,
{
    type Item = std::io::Result<DecodedPacket>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Err(err) = self.read_packet() {
                if err.kind() == ErrorKind::UnexpectedEof {
                    return None;
                }
                return Some(Err(err));
            }
            let offset = self.offset;
            self.offset += self.buf.len();

            match self.decoder.decode(&self.buf) {
                Ok(packet) => {
                    trace!(offset, packet_type = %packet.packet_type(), "decoded packet");
                    self.summary.add(&packet);
                    return Some(Ok(packet));
                }
                Err(err) => {
                    debug!(offset, %err, "skipping undecodable packet");
                    self.skipped += 1;
                    self.summary.skipped += 1;
                }
            }
        }
    }
}

/// Decode all packets from `reader`.
pub fn decode_packets<R>(reader: R) -> PacketIter<R>
where
    R: Read + Send,
{
    PacketIter::new(reader, Decoder::default())
}

/// Decode all packets from `reader`, repairing detector cluster headers against
/// `definitions`.
pub fn decode_packets_with<R>(reader: R, decoder: Decoder) -> PacketIter<R>
where
    R: Read + Send,
{
    PacketIter::new(reader, decoder)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pmd_packet(state_id: u8, crc_errors: u16) -> Vec<u8> {
        let data_len = DataHeader::LEN + PmdPacket::BODY_LEN;
        let mut out = Vec::new();
        Annotation {
            isp_time: SensingTime { days: 2606, seconds: 10, micros: 0 },
            crc_errors,
            ..Default::default()
        }
        .encode(&mut out);
        PacketHeader {
            vcid: 3,
            op_mode: 2,
            seq_cntrl: 7,
            length: (data_len - 1) as u16,
        }
        .encode(&mut out);
        DataHeader {
            length: data_len as u16,
            category: 1,
            state_id,
            on_board_time: 1234,
            hsm: 1,
            atc_id: 5,
            config_id: 9,
            packet_type: PacketType::Pmd,
            overflow: 0,
        }
        .encode(&mut out);
        out.extend_from_slice(&[0x01, 0x02]);
        for n in 0..PmdPacket::RECORDS {
            out.extend_from_slice(&[0xee, 0xee]);
            out.extend(std::iter::repeat(0x11).take(28));
            out.extend_from_slice(&(n as u16).to_be_bytes());
            out.extend_from_slice(&[0x80, 0x05]);
        }
        out
    }

    #[test]
    fn decode_headers() {
        #[rustfmt::skip]
        let dat: &[u8] = &[
            // api: vcid 3, op mode 2
            0x00, 0x62,
            0x00, 0x07,
            0x1a, 0x9d,
        ];
        let hdr = PacketHeader::decode(&mut Bytes::new(dat)).unwrap();
        assert_eq!(hdr.vcid, 3);
        assert_eq!(hdr.op_mode, 2);
        assert_eq!(hdr.seq_cntrl, 7);
        assert_eq!(hdr.data_field_len(), 6814);

        #[rustfmt::skip]
        let dat: &[u8] = &[
            0x1a, 0x9e,             // length
            0x01,                   // category
            0x08,                   // state id
            0x00, 0x00, 0x04, 0xd2, // on board time
            0x45, 0x09,             // hsm 1, atc 5, config 9
            0x30, 0x00,             // pmd
        ];
        let hdr = DataHeader::decode(&mut Bytes::new(dat)).unwrap();
        assert_eq!(hdr.state_id, 8);
        assert_eq!(hdr.on_board_time, 1234);
        assert_eq!(hdr.hsm, 1);
        assert_eq!(hdr.atc_id, 5);
        assert_eq!(hdr.config_id, 9);
        assert_eq!(hdr.packet_type, PacketType::Pmd);

        let mut out = Vec::new();
        hdr.encode(&mut out);
        assert_eq!(out, dat);
    }

    #[test]
    fn unknown_packet_type() {
        let mut dat = pmd_packet(8, 0);
        dat[Annotation::LEN + PacketHeader::LEN + 10] = 0x70;
        assert_eq!(decode(&dat).unwrap_err(), DecodeError::UnknownPacketType(7));
    }

    #[test]
    fn decode_pmd_packet() {
        let dat = pmd_packet(8, 0);
        let pkt = decode(&dat).unwrap();

        assert_eq!(pkt.packet_type(), PacketType::Pmd);
        assert_eq!(pkt.state_id(), 8);
        assert_eq!(pkt.packet_len(), dat.len());
        assert!(!pkt.is_corrupted());
        let PacketBody::Pmd(pmd) = pkt.body else {
            panic!("expected pmd body");
        };
        assert_eq!(pmd.temp, 0x0102);
        assert_eq!(pmd.records.len(), PmdPacket::RECORDS);
        assert_eq!(pmd.records[3].bcps, 3);
        assert!(pmd.records[3].integration_status);
        assert_eq!(pmd.records[3].delta_time, 5);
    }

    #[test]
    fn crc_errors_flag_corruption() {
        let raw_dat = pmd_packet(8, 2);
        let raw = RawPacket::new(&raw_dat).unwrap();
        assert!(raw.is_corrupted());
        assert_eq!(raw.on_board_time(), 1234);
        assert!(decode(&raw_dat).unwrap().is_corrupted());
    }

    #[test]
    fn length_mismatch_is_truncated() {
        let dat = pmd_packet(8, 0);
        let err = decode(&dat[..dat.len() - 1]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                declared: dat.len(),
                actual: dat.len() - 1
            }
        );

        let mut longer = dat.clone();
        longer.push(0);
        assert!(matches!(decode(&longer), Err(DecodeError::Truncated { .. })));

        for n in [0, 10, 37, 49] {
            assert!(
                matches!(decode(&dat[..n]), Err(DecodeError::Truncated { .. })),
                "{n} bytes should be truncated"
            );
        }
    }

    #[test]
    fn data_header_longer_than_data_field() {
        let mut dat = pmd_packet(8, 0);
        let at = Annotation::LEN + PacketHeader::LEN;
        let length = u16::from_be_bytes([dat[at], dat[at + 1]]);
        dat[at..at + 2].copy_from_slice(&(length + 1).to_be_bytes());
        assert_eq!(
            decode(&dat).unwrap_err(),
            DecodeError::Truncated {
                declared: dat.len() + 1,
                actual: dat.len()
            }
        );

        // a shorter declaration covers the fixed part of detector packets
        dat[at..at + 2].copy_from_slice(&(DataHeader::LEN as u16).to_be_bytes());
        assert!(decode(&dat).is_ok());
    }

    #[test]
    fn stream_skips_bad_packets() {
        let good = pmd_packet(8, 0);
        let mut bad = pmd_packet(9, 0);
        // shrink the declared length by one byte; the packet now leaves one byte unread
        let len_at = Annotation::LEN + 4;
        let length = u16::from_be_bytes([bad[len_at], bad[len_at + 1]]) - 1;
        bad[len_at..len_at + 2].copy_from_slice(&length.to_be_bytes());
        bad.pop();

        let mut stream = Vec::new();
        stream.extend_from_slice(&good);
        stream.extend_from_slice(&bad);
        stream.extend_from_slice(&good);
        // partial trailing packet
        stream.extend_from_slice(&good[..100]);

        let mut iter = decode_packets(std::io::Cursor::new(stream));
        let packets: Vec<DecodedPacket> = iter.by_ref().map(Result::unwrap).collect();

        assert_eq!(packets.len(), 2);
        assert_eq!(iter.skipped(), 1);
        assert_eq!(iter.summary().count, 2);
        assert_eq!(iter.summary().skipped, 1);
        assert_eq!(iter.offset(), good.len() * 2 + bad.len());
    }
}
