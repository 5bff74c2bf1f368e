//! Receiving side of reliable packet delivery.
//!
//! Per channel, the [`ReorderBuffer`] turns the stream of reliable envelopes
//! (arriving duplicated, delayed, reordered or not at all) into in-order,
//! at-most-once delivery. 16-bit wire sequence numbers are extrapolated to a
//! monotonic 64-bit stream position relative to the next expected packet.

use crate::config::{MAX_RELIABLE_WINDOW_SIZE, SEQNUM_INITIAL};
use crate::packet::ReceivedPacket;
#[cfg(test)]
use mockall::automock;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::ops::ControlFlow;
use tracing::{debug, warn};

/// The 64-bit position a wire seqnum refers to, relative to the current
/// expectation `base`: the nearest position whose low 16 bits equal `seqnum`,
/// preferring the forward direction on ties, and never going below zero.
pub fn compute_full_seqnum(base: u64, seqnum: u16) -> u64 {
    let base_mod = base as u16;
    let forward = seqnum.wrapping_sub(base_mod);
    let backward = base_mod.wrapping_sub(seqnum);
    if forward <= 32768 || backward as u64 > base {
        base + forward as u64
    } else {
        base - backward as u64
    }
}

/// Callbacks invoked while inserting into the reorder buffer. Both may be
/// called multiple times during a single insert.
#[cfg_attr(test, automock)]
pub trait ReorderHandler {
    /// Emit a CONTROL/ACK for the given packet.
    fn send_ack(&mut self, rpkt: &ReceivedPacket);

    /// Deliver a reliable packet that is ready to be processed.
    ///
    /// Returns `Break` if the connection ended during processing; no further
    /// packets are delivered from the ongoing insert in that case.
    fn process_packet(&mut self, rpkt: ReceivedPacket) -> ControlFlow<()>;
}

/// Pending packets, smallest `full_seqnum` first.
struct PendingPacket(ReceivedPacket);

impl PendingPacket {
    fn full_seqnum(&self) -> u64 {
        self.0
            .reliable
            .as_ref()
            .expect("only reliable packets are queued")
            .full_seqnum
    }
}

impl PartialEq for PendingPacket {
    fn eq(&self, other: &Self) -> bool {
        self.full_seqnum() == other.full_seqnum()
    }
}
impl Eq for PendingPacket {}
impl PartialOrd for PendingPacket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PendingPacket {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed so the std max-heap pops the smallest seqnum first
        other.full_seqnum().cmp(&self.full_seqnum())
    }
}

pub struct ReorderBuffer {
    /// The next stream position to deliver. Everything below has already been
    /// handed to the handler.
    next_incoming_seqnum: u64,
    queue: BinaryHeap<PendingPacket>,
}

impl ReorderBuffer {
    pub fn new() -> ReorderBuffer {
        ReorderBuffer {
            next_incoming_seqnum: SEQNUM_INITIAL as u64,
            queue: BinaryHeap::new(),
        }
    }

    pub fn next_incoming_seqnum(&self) -> u64 {
        self.next_incoming_seqnum
    }

    /// Number of packets buffered because earlier ones are still missing.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Accepts one reliable packet from the wire.
    ///
    /// ACKs everything inside the acceptance window (duplicates included, to
    /// absorb lost ACKs), delivers in-order packets immediately and buffers
    /// the rest. Returns `Break` as soon as the handler does.
    pub fn insert(
        &mut self,
        mut rpkt: ReceivedPacket,
        handler: &mut impl ReorderHandler,
    ) -> ControlFlow<()> {
        let full_seqnum = {
            let reliable = rpkt
                .reliable
                .as_mut()
                .expect("only reliable packets go through the reorder buffer");
            reliable.full_seqnum = compute_full_seqnum(self.next_incoming_seqnum, reliable.seqnum);
            reliable.full_seqnum
        };

        if full_seqnum > self.next_incoming_seqnum + MAX_RELIABLE_WINDOW_SIZE as u64 {
            // Too far in the future, discard without sending an ACK. If this
            // is a valid packet, it'll be retransmitted.
            warn!(
                "{} reliable packet too far in the future (#{}, expecting #{}) - ignoring",
                rpkt, full_seqnum, self.next_incoming_seqnum
            );
            return ControlFlow::Continue(());
        }

        handler.send_ack(&rpkt);

        if full_seqnum < self.next_incoming_seqnum {
            // Old packet. Don't process again; the ACK above covers the case
            // where our earlier ACK got lost.
            debug!("{} duplicate of delivered packet #{} - dropping", rpkt, full_seqnum);
            return ControlFlow::Continue(());
        }

        if full_seqnum == self.next_incoming_seqnum {
            self.next_incoming_seqnum += 1;
            handler.process_packet(rpkt)?;
            return self.flush(handler);
        }

        self.queue.push(PendingPacket(rpkt));
        ControlFlow::Continue(())
    }

    /// Delivers all queued packets that are ready now.
    fn flush(&mut self, handler: &mut impl ReorderHandler) -> ControlFlow<()> {
        while self
            .queue
            .peek()
            .is_some_and(|pending| pending.full_seqnum() <= self.next_incoming_seqnum)
        {
            let PendingPacket(rpkt) = self.queue.pop().expect("peeked entry exists");
            let full_seqnum = rpkt
                .reliable
                .as_ref()
                .expect("only reliable packets are queued")
                .full_seqnum;
            if full_seqnum < self.next_incoming_seqnum {
                debug!("{} discarding duplicate packet #{}", rpkt, full_seqnum);
                continue;
            }
            self.next_incoming_seqnum += 1;
            handler.process_packet(rpkt)?;
        }
        ControlFlow::Continue(())
    }

    #[cfg(test)]
    fn with_next_seqnum(next_incoming_seqnum: u64) -> ReorderBuffer {
        ReorderBuffer {
            next_incoming_seqnum,
            queue: BinaryHeap::new(),
        }
    }
}

impl Default for ReorderBuffer {
    fn default() -> Self {
        ReorderBuffer::new()
    }
}
