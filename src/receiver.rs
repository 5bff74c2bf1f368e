//! Per-peer receive pipeline.
//!
//! The externally-run receive task parses each inbound datagram and hands the
//! result to [`PeerReceiver::dispatch`]. Control packets are surfaced
//! directly, original packets are delivered directly, reliable envelopes go
//! through the channel's reorder buffer, split chunks through its reassembly
//! buffer. A reliable envelope may wrap an original or split payload; after
//! in-order extraction its inner packet takes the same dispatch path. The
//! parser rejects nested reliability, so that recursion is exactly one level
//! deep.
//!
//! All state is owned by the receive task; none of it is internally
//! synchronised. The task is expected to call
//! [`PeerReceiver::process_timeouts`] between datagrams or on an idle tick.

use crate::clock::Clock;
use crate::config::{
    TransportConfig, CHANNEL_COUNT, MAX_RELIABLE_WINDOW_SIZE, MIN_RELIABLE_WINDOW_SIZE,
};
use crate::packet::{PacketKind, ReceivedPacket};
use crate::reorder_buffer::{ReorderBuffer, ReorderHandler};
use crate::split_buffer::SplitBuffer;
use crate::timeout_queue::TimeoutQueue;
use bytes::Bytes;
use std::ops::ControlFlow;
use std::rc::Rc;
use tracing::trace;

/// The upper layer of the receive pipeline. All callbacks run on the receive
/// task; `Break` means the connection is closing and stops any further
/// delivery from the ongoing dispatch.
pub trait TransportHandler {
    /// Emit a CONTROL/ACK for the given reliable packet.
    fn send_ack(&mut self, rpkt: &ReceivedPacket);

    /// A control packet (ACK, SET_PEER_ID, PING, DISCO) was received.
    fn on_control(&mut self, rpkt: &ReceivedPacket) -> ControlFlow<()>;

    /// An application payload is ready: the contents of an original packet,
    /// or a fully reassembled split payload.
    fn on_data(&mut self, channel: u8, payload: Bytes) -> ControlFlow<()>;
}

pub struct ChannelState {
    reorder: ReorderBuffer,
    splits: SplitBuffer,
    window_size: u16,
}

impl ChannelState {
    fn new(timeout_queue: &TimeoutQueue, config: &TransportConfig) -> ChannelState {
        ChannelState {
            reorder: ReorderBuffer::new(),
            splits: SplitBuffer::new(timeout_queue.clone(), config.split_timeout_ms),
            window_size: config.initial_window_size,
        }
    }

    pub fn window_size(&self) -> u16 {
        self.window_size
    }

    /// Adjusts the reliable window size, clamped to its legal range. The send
    /// side tunes this at runtime; the receive side's acceptance cutoff is
    /// always the maximum.
    pub fn set_window_size(&mut self, size: u32) {
        self.window_size = size.clamp(
            MIN_RELIABLE_WINDOW_SIZE as u32,
            MAX_RELIABLE_WINDOW_SIZE as u32,
        ) as u16;
    }

    pub fn next_incoming_seqnum(&self) -> u64 {
        self.reorder.next_incoming_seqnum()
    }
}

/// Receive-side state for one peer: per-channel reorder and split buffers
/// plus the timeout queue driving split-group expiry.
pub struct PeerReceiver<H> {
    channels: [ChannelState; CHANNEL_COUNT as usize],
    handler: H,
    timeout_queue: TimeoutQueue,
}

impl<H: TransportHandler> PeerReceiver<H> {
    pub fn new(config: &TransportConfig, clock: Rc<dyn Clock>, handler: H) -> PeerReceiver<H> {
        let timeout_queue = TimeoutQueue::new(clock);
        let channels = std::array::from_fn(|_| ChannelState::new(&timeout_queue, config));
        PeerReceiver {
            channels,
            handler,
            timeout_queue,
        }
    }

    /// Routes one parsed packet. The parser guarantees `rpkt.channel` is in
    /// range.
    pub fn dispatch(&mut self, rpkt: ReceivedPacket) -> ControlFlow<()> {
        trace!("{} dispatching on channel {}", rpkt, rpkt.channel);
        let channel = &mut self.channels[rpkt.channel as usize];

        if rpkt.is_reliable() {
            let mut dispatch = InnerDispatch {
                handler: &mut self.handler,
                splits: &channel.splits,
            };
            channel.reorder.insert(rpkt, &mut dispatch)
        } else {
            dispatch_unwrapped(&mut self.handler, &channel.splits, rpkt)
        }
    }

    /// Runs expired timeout callbacks; call between datagrams or on an idle
    /// tick.
    pub fn process_timeouts(&self) {
        self.timeout_queue.process_timeouts();
    }

    /// Milliseconds until the next scheduled timeout, if any.
    pub fn next_timeout_ms(&self) -> Option<u64> {
        self.timeout_queue.next_timeout_ms()
    }

    pub fn channel(&self, channel: u8) -> &ChannelState {
        &self.channels[channel as usize]
    }

    pub fn channel_mut(&mut self, channel: u8) -> &mut ChannelState {
        &mut self.channels[channel as usize]
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }
}

/// Adapter feeding packets extracted by the reorder buffer back into the
/// plain dispatch path.
struct InnerDispatch<'a, H> {
    handler: &'a mut H,
    splits: &'a SplitBuffer,
}

impl<H: TransportHandler> ReorderHandler for InnerDispatch<'_, H> {
    fn send_ack(&mut self, rpkt: &ReceivedPacket) {
        self.handler.send_ack(rpkt);
    }

    fn process_packet(&mut self, rpkt: ReceivedPacket) -> ControlFlow<()> {
        dispatch_unwrapped(self.handler, self.splits, rpkt)
    }
}

fn dispatch_unwrapped<H: TransportHandler>(
    handler: &mut H,
    splits: &SplitBuffer,
    rpkt: ReceivedPacket,
) -> ControlFlow<()> {
    match rpkt.kind {
        PacketKind::Original => {
            let channel = rpkt.channel;
            handler.on_data(channel, rpkt.contents)
        }
        PacketKind::Split(_) => {
            let channel = rpkt.channel;
            match splits.insert(rpkt) {
                Some(payload) => handler.on_data(channel, payload),
                None => ControlFlow::Continue(()),
            }
        }
        PacketKind::Ack { .. } | PacketKind::SetPeerId { .. } | PacketKind::Ping
        | PacketKind::Disco => handler.on_control(&rpkt),
    }
}
