//! Parsing of inbound datagrams.
//!
//! [`ReceivedPacket::parse`] validates a raw datagram against the wire
//! grammar (see the crate documentation), classifies its subtype and exposes
//! the residual payload. Nothing beyond the parser ever sees a malformed
//! packet: every rejection is a [`ParseError`] and the datagram is dropped.

use crate::config::CHANNEL_COUNT;
use bytes::{Buf, Bytes};
use rand::RngCore;
use std::fmt::{Debug, Display, Formatter};
use std::net::SocketAddr;
use thiserror::Error;

pub const PACKET_TYPE_CONTROL: u8 = 0;
pub const PACKET_TYPE_ORIGINAL: u8 = 1;
pub const PACKET_TYPE_SPLIT: u8 = 2;
pub const PACKET_TYPE_RELIABLE: u8 = 3;

pub const CONTROL_TYPE_ACK: u8 = 0;
pub const CONTROL_TYPE_SET_PEER_ID: u8 = 1;
pub const CONTROL_TYPE_PING: u8 = 2;
pub const CONTROL_TYPE_DISCO: u8 = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected EOF in packet of length {len}")]
    UnexpectedEof { len: usize },
    #[error("protocol_id {actual:#010x} != {expected:#010x}")]
    BadProtocolId { actual: u32, expected: u32 },
    #[error("invalid channel {0}")]
    BadChannel(u8),
    #[error("invalid packet type {0}")]
    BadPacketType(u8),
    #[error("nested reliable packets")]
    NestedReliable,
    #[error("invalid control type {0}")]
    BadControlType(u8),
    #[error("chunk_num >= chunk_count: {chunk_num} >= {chunk_count}")]
    BadChunkNum { chunk_num: u16, chunk_count: u16 },
    #[error("empty contents")]
    EmptyContents,
}

/// Random tag identifying one received datagram in the logs, so a packet can
/// be followed from parsing through reordering to dispatch.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TrackId(u64);

impl TrackId {
    fn generate() -> TrackId {
        TrackId(rand::rng().next_u64())
    }

    #[cfg(test)]
    pub(crate) fn for_test(raw: u64) -> TrackId {
        TrackId(raw)
    }
}

impl Display for TrackId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Debug for TrackId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Header of the reliable envelope, if the packet was wrapped in one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReliableHeader {
    /// Sequence number as transmitted on the wire.
    pub seqnum: u16,
    /// The sequence number this packet would carry if the wire field were a
    /// full 64 bits. Zero until the reorder buffer extrapolates it.
    pub full_seqnum: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitHeader {
    pub seqnum: u16,
    pub chunk_count: u16,
    pub chunk_num: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketKind {
    /// Plain payload, handed to the upper layer as-is.
    Original,
    /// Acknowledges the reliable packet with the given seqnum.
    Ack { seqnum: u16 },
    /// Assigns the receiving endpoint its peer id.
    SetPeerId { new_peer_id: u16 },
    /// No direct reply; send it in a reliable envelope to get one.
    Ping,
    Disco,
    /// One chunk of a larger payload, reassembled by the split buffer.
    Split(SplitHeader),
}

/// An owned, validated inbound datagram.
///
/// Produced by [`ReceivedPacket::parse`], moved through the receive pipeline,
/// dropped after delivery or discard.
#[derive(Debug)]
pub struct ReceivedPacket {
    pub received_time_ms: u64,
    pub source: SocketAddr,
    pub track_id: TrackId,

    pub protocol_id: u32,
    pub peer_id: u16,
    pub channel: u8,

    pub kind: PacketKind,
    /// Present iff the packet arrived inside a reliable envelope.
    pub reliable: Option<ReliableHeader>,

    /// The contents following all headers. A zero-copy slice of the datagram.
    pub contents: Bytes,
}

impl ReceivedPacket {
    pub fn is_reliable(&self) -> bool {
        self.reliable.is_some()
    }

    /// Parses a datagram. All multi-byte fields are big-endian; reads past the
    /// end of the buffer fail cleanly with [`ParseError::UnexpectedEof`].
    pub fn parse(
        data: Bytes,
        source: SocketAddr,
        received_time_ms: u64,
        expected_protocol_id: u32,
    ) -> Result<ReceivedPacket, ParseError> {
        let len = data.len();
        let eof = |_| ParseError::UnexpectedEof { len };
        let mut buf = data;

        let protocol_id = buf.try_get_u32().map_err(eof)?;
        if protocol_id != expected_protocol_id {
            return Err(ParseError::BadProtocolId {
                actual: protocol_id,
                expected: expected_protocol_id,
            });
        }
        let peer_id = buf.try_get_u16().map_err(eof)?;
        let channel = buf.try_get_u8().map_err(eof)?;
        if channel >= CHANNEL_COUNT {
            return Err(ParseError::BadChannel(channel));
        }

        let mut raw_type = buf.try_get_u8().map_err(eof)?;
        let mut reliable = None;
        if raw_type == PACKET_TYPE_RELIABLE {
            let seqnum = buf.try_get_u16().map_err(eof)?;
            reliable = Some(ReliableHeader {
                seqnum,
                full_seqnum: 0,
            });
            // the envelope wraps exactly one inner packet of a different type
            raw_type = buf.try_get_u8().map_err(eof)?;
        }

        let kind = match raw_type {
            PACKET_TYPE_CONTROL => {
                let control_type = buf.try_get_u8().map_err(eof)?;
                match control_type {
                    CONTROL_TYPE_ACK => PacketKind::Ack {
                        seqnum: buf.try_get_u16().map_err(eof)?,
                    },
                    CONTROL_TYPE_SET_PEER_ID => PacketKind::SetPeerId {
                        new_peer_id: buf.try_get_u16().map_err(eof)?,
                    },
                    CONTROL_TYPE_PING => PacketKind::Ping,
                    CONTROL_TYPE_DISCO => PacketKind::Disco,
                    other => return Err(ParseError::BadControlType(other)),
                }
            }
            PACKET_TYPE_ORIGINAL => PacketKind::Original,
            PACKET_TYPE_SPLIT => {
                let seqnum = buf.try_get_u16().map_err(eof)?;
                let chunk_count = buf.try_get_u16().map_err(eof)?;
                let chunk_num = buf.try_get_u16().map_err(eof)?;
                if chunk_num >= chunk_count {
                    return Err(ParseError::BadChunkNum {
                        chunk_num,
                        chunk_count,
                    });
                }
                PacketKind::Split(SplitHeader {
                    seqnum,
                    chunk_count,
                    chunk_num,
                })
            }
            PACKET_TYPE_RELIABLE => return Err(ParseError::NestedReliable),
            other => return Err(ParseError::BadPacketType(other)),
        };

        if matches!(kind, PacketKind::Original | PacketKind::Split(_)) && !buf.has_remaining() {
            return Err(ParseError::EmptyContents);
        }

        Ok(ReceivedPacket {
            received_time_ms,
            source,
            track_id: TrackId::generate(),
            protocol_id,
            peer_id,
            channel,
            kind,
            reliable,
            contents: buf,
        })
    }
}

impl Display for ReceivedPacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReceivedPacket[{}]", self.track_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PROTOCOL_ID;
    use rstest::rstest;

    fn parse(data: Vec<u8>) -> Result<ReceivedPacket, ParseError> {
        ReceivedPacket::parse(
            Bytes::from(data),
            SocketAddr::from(([127, 0, 0, 1], 30000)),
            1234,
            PROTOCOL_ID,
        )
    }

    // base header for peer 9, channel 1: protocol id "RUDP", 0x0009, 0x01
    const BASE: [u8; 7] = [0x52, 0x55, 0x44, 0x50, 0, 9, 1];

    fn packet(tail: &[u8]) -> Vec<u8> {
        let mut data = BASE.to_vec();
        data.extend_from_slice(tail);
        data
    }

    #[test]
    fn test_parse_original() {
        let rpkt = parse(packet(&[1, 0xaa, 0xbb])).unwrap();
        assert_eq!(rpkt.protocol_id, PROTOCOL_ID);
        assert_eq!(rpkt.peer_id, 9);
        assert_eq!(rpkt.channel, 1);
        assert_eq!(rpkt.kind, PacketKind::Original);
        assert!(!rpkt.is_reliable());
        assert_eq!(&rpkt.contents[..], &[0xaa, 0xbb]);
        assert_eq!(rpkt.received_time_ms, 1234);
    }

    #[test]
    fn test_parse_reliable_original() {
        let rpkt = parse(packet(&[3, 0xff, 0xdc, 1, 0x42])).unwrap();
        assert_eq!(
            rpkt.reliable,
            Some(ReliableHeader {
                seqnum: 65500,
                full_seqnum: 0
            })
        );
        assert_eq!(rpkt.kind, PacketKind::Original);
        assert_eq!(&rpkt.contents[..], &[0x42]);
    }

    #[test]
    fn test_parse_split() {
        let rpkt = parse(packet(&[2, 0, 7, 0, 3, 0, 2, 0xcc])).unwrap();
        assert_eq!(
            rpkt.kind,
            PacketKind::Split(SplitHeader {
                seqnum: 7,
                chunk_count: 3,
                chunk_num: 2
            })
        );
        assert_eq!(&rpkt.contents[..], &[0xcc]);
    }

    #[test]
    fn test_parse_reliable_split() {
        let rpkt = parse(packet(&[3, 0xff, 0xdd, 2, 0, 7, 0, 2, 0, 0, 0xcc])).unwrap();
        assert_eq!(rpkt.reliable.as_ref().unwrap().seqnum, 65501);
        assert_eq!(
            rpkt.kind,
            PacketKind::Split(SplitHeader {
                seqnum: 7,
                chunk_count: 2,
                chunk_num: 0
            })
        );
    }

    #[rstest]
    #[case::ack(vec![0, 0, 0x12, 0x34], PacketKind::Ack { seqnum: 0x1234 })]
    #[case::set_peer_id(vec![0, 1, 0, 77], PacketKind::SetPeerId { new_peer_id: 77 })]
    #[case::ping(vec![0, 2], PacketKind::Ping)]
    #[case::disco(vec![0, 3], PacketKind::Disco)]
    fn test_parse_control(#[case] tail: Vec<u8>, #[case] expected: PacketKind) {
        let rpkt = parse(packet(&tail)).unwrap();
        assert_eq!(rpkt.kind, expected);
        assert!(rpkt.contents.is_empty());
    }

    #[test]
    fn test_reliable_ping_for_rtt_probing() {
        let rpkt = parse(packet(&[3, 0, 5, 0, 2])).unwrap();
        assert_eq!(rpkt.kind, PacketKind::Ping);
        assert_eq!(rpkt.reliable.as_ref().unwrap().seqnum, 5);
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::partial_protocol_id(vec![0x52, 0x55])]
    #[case::missing_channel(vec![0x52, 0x55, 0x44, 0x50, 0, 9])]
    #[case::missing_type(BASE.to_vec())]
    #[case::reliable_missing_seqnum(packet(&[3, 0xff]))]
    #[case::reliable_missing_inner_type(packet(&[3, 0xff, 0xdc]))]
    #[case::ack_missing_seqnum(packet(&[0, 0, 0x12]))]
    #[case::split_missing_chunk_num(packet(&[2, 0, 7, 0, 3]))]
    fn test_truncated(#[case] data: Vec<u8>) {
        let len = data.len();
        assert_eq!(parse(data).unwrap_err(), ParseError::UnexpectedEof { len });
    }

    #[test]
    fn test_bad_protocol_id() {
        let mut data = packet(&[1, 0xaa]);
        data[0] = 0xee;
        assert!(matches!(
            parse(data),
            Err(ParseError::BadProtocolId { .. })
        ));
    }

    #[rstest]
    #[case::first_invalid(3)]
    #[case::way_off(200)]
    fn test_bad_channel(#[case] channel: u8) {
        let mut data = packet(&[1, 0xaa]);
        data[6] = channel;
        assert_eq!(parse(data).unwrap_err(), ParseError::BadChannel(channel));
    }

    #[rstest]
    #[case::plain(packet(&[4, 0xaa]), 4)]
    #[case::inside_reliable(packet(&[3, 0, 1, 9, 0xaa]), 9)]
    fn test_bad_packet_type(#[case] data: Vec<u8>, #[case] raw_type: u8) {
        assert_eq!(parse(data).unwrap_err(), ParseError::BadPacketType(raw_type));
    }

    #[test]
    fn test_nested_reliable_rejected() {
        let data = packet(&[3, 0, 1, 3, 0, 2, 1, 0xaa]);
        assert_eq!(parse(data).unwrap_err(), ParseError::NestedReliable);
    }

    #[test]
    fn test_bad_control_type() {
        assert_eq!(parse(packet(&[0, 4])).unwrap_err(), ParseError::BadControlType(4));
    }

    #[rstest]
    #[case::zero_count(0, 0)]
    #[case::equal(3, 3)]
    #[case::above(2, 5)]
    fn test_bad_chunk_num(#[case] chunk_count: u16, #[case] chunk_num: u16) {
        let data = packet(&[
            2,
            0,
            7,
            (chunk_count >> 8) as u8,
            chunk_count as u8,
            (chunk_num >> 8) as u8,
            chunk_num as u8,
            0xcc,
        ]);
        assert_eq!(
            parse(data).unwrap_err(),
            ParseError::BadChunkNum {
                chunk_num,
                chunk_count
            }
        );
    }

    #[rstest]
    #[case::original(packet(&[1]))]
    #[case::split(packet(&[2, 0, 7, 0, 3, 0, 2]))]
    #[case::reliable_original(packet(&[3, 0, 1, 1]))]
    fn test_empty_contents_rejected(#[case] data: Vec<u8>) {
        assert_eq!(parse(data).unwrap_err(), ParseError::EmptyContents);
    }

    #[test]
    fn test_control_may_be_empty_after_headers() {
        // control packets carry no payload requirement
        assert!(parse(packet(&[0, 2])).is_ok());
    }
}
