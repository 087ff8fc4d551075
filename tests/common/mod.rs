use scia::cluster::Channel;
use scia::packet::{
    Annotation, ChannelData, ChannelHeader, ClusterBlock, CoaddedSample, DataHeader,
    DetectorPacket, PacketHeader, PacketType, PmtcHeader,
};
use scia::time::SensingTime;

/// Cluster contents of a synthetic detector packet.
pub struct Block {
    pub channel: u8,
    pub cluster_id: u8,
    pub coadd: u8,
    pub start: u16,
    pub values: Vec<u32>,
}

pub fn sample(coadd: u8, value: u32) -> CoaddedSample {
    if coadd == 1 {
        CoaddedSample::Single(value as u16)
    } else {
        CoaddedSample::Summed {
            factor: coadd,
            value,
        }
    }
}

/// Detector packet body with one channel per block.
pub fn detector_body(bcps: u16, blocks: &[Block]) -> DetectorPacket {
    let channels = blocks
        .iter()
        .map(|b| {
            let channel = Channel::new(b.channel).unwrap();
            ChannelData {
                header: ChannelHeader {
                    sync: 0xaaaa,
                    channel,
                    is: 0,
                    lu: 0,
                    clusters: 1,
                    bcps,
                    command: 8 << 18,
                    ratio: 0,
                    status: 0,
                    frame: 0,
                    bias: 0,
                    temp: 0,
                },
                clusters: vec![ClusterBlock {
                    channel,
                    sync: 0xbbbb,
                    block_nr: 0,
                    cluster_id: b.cluster_id,
                    coadd: b.coadd,
                    start: b.start,
                    length: b.values.len() as u16,
                    samples: b.values.iter().map(|v| sample(b.coadd, *v)).collect(),
                    fix: None,
                }],
            }
        })
        .collect();
    DetectorPacket {
        bcps,
        pmtc: PmtcHeader::default(),
        orbit_vector: [0; 8],
        channels,
    }
}

/// Annotated detector packet as found in a level-0 product.
pub fn detector_packet(state_id: u8, seconds: u32, body: &DetectorPacket) -> Vec<u8> {
    let mut data = Vec::new();
    body.encode(&mut data);
    let data_len = DataHeader::LEN + data.len();

    let mut out = Vec::new();
    Annotation {
        isp_time: SensingTime {
            days: 1500,
            seconds,
            micros: 0,
        },
        isp_length: (PacketHeader::LEN + data_len) as u16,
        ..Default::default()
    }
    .encode(&mut out);
    PacketHeader {
        vcid: 1,
        op_mode: 2,
        seq_cntrl: 0,
        length: (data_len - 1) as u16,
    }
    .encode(&mut out);
    DataHeader {
        length: data_len as u16,
        category: 2,
        state_id,
        on_board_time: seconds,
        hsm: 0,
        atc_id: 0,
        config_id: 0,
        packet_type: PacketType::Detector,
        overflow: 0,
    }
    .encode(&mut out);
    out.extend_from_slice(&data);
    out
}
