use anyhow::bail;

/// Protocol magic at the start of every datagram. Packets carrying a different
/// value are rejected before any further parsing.
pub const PROTOCOL_ID: u32 = 0x5255_4450;

/// Size of the base header: `u32` protocol id, `u16` peer id, `u8` channel.
pub const BASE_HEADER_SIZE: usize = 7;
/// Size of the reliable envelope header: `u8` type tag, `u16` seqnum.
pub const RELIABLE_HEADER_SIZE: usize = 3;
/// Size of the original header: the `u8` type tag alone.
pub const ORIGINAL_HEADER_SIZE: usize = 1;

/// Number of independent ordering namespaces per peer session. Channel numbers
/// have no intrinsic meaning.
pub const CHANNEL_COUNT: u8 = 3;

/// Receive buffer size. The IPv6 minimum MTU is the theoretical reliable upper
/// bound for a UDP packet on all IPv6-capable infrastructure.
pub const PACKET_MAXSIZE: usize = 1500;

/// Initial value for all sequence number counters. Chosen close to the wrap
/// point so that wrap handling is exercised early in every session.
pub const SEQNUM_INITIAL: u16 = 65500;
pub const SEQNUM_MAX: u16 = 65535;

/// Upper bound for the reliable window; 0xFFFF is the theoretical maximum, but
/// getting close to it makes stale wire seqnums ambiguous.
pub const MAX_RELIABLE_WINDOW_SIZE: u16 = 0x8000;
/// Starting value for the reliable window size.
pub const START_RELIABLE_WINDOW_SIZE: u16 = 0x400;
/// Minimum value for the reliable window size.
pub const MIN_RELIABLE_WINDOW_SIZE: u16 = 0x40;

/// How long a partially received unreliable split group may go without a new
/// chunk before it is discarded.
pub const SPLIT_TIMEOUT_MS: u64 = 30;

/// Reserved peer id for endpoints that have not been assigned one yet.
pub const PEER_ID_INEXISTENT: u16 = 0;
/// Reserved peer id for the server side of a session.
pub const PEER_ID_SERVER: u16 = 1;

pub struct TransportConfig {
    /// Protocol magic expected in inbound datagrams.
    pub protocol_id: u32,

    /// Eviction deadline for partially received unreliable split groups.
    ///
    /// Reliable split groups are exempt: the reliable layer already bounds how
    /// many of their chunks can be in flight.
    pub split_timeout_ms: u64,

    /// Starting reliable window size per channel. The send side adjusts it at
    /// runtime within `[MIN_RELIABLE_WINDOW_SIZE, MAX_RELIABLE_WINDOW_SIZE]`.
    pub initial_window_size: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            protocol_id: PROTOCOL_ID,
            split_timeout_ms: SPLIT_TIMEOUT_MS,
            initial_window_size: START_RELIABLE_WINDOW_SIZE,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.split_timeout_ms == 0 {
            bail!("split timeout must be positive");
        }
        if self.initial_window_size < MIN_RELIABLE_WINDOW_SIZE
            || self.initial_window_size > MAX_RELIABLE_WINDOW_SIZE
        {
            bail!(
                "initial window size {} outside [{:#x}, {:#x}]",
                self.initial_window_size,
                MIN_RELIABLE_WINDOW_SIZE,
                MAX_RELIABLE_WINDOW_SIZE
            );
        }
        Ok(())
    }
}
