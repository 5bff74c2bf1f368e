//! Reassembly of payloads that were split across several datagrams.
//!
//! Chunks carrying the same split seqnum form a group; when all
//! `chunk_count` chunks of a group have arrived, the payloads are
//! concatenated in ascending `chunk_num` order and handed back to the caller.
//! Groups of *unreliable* chunks are discarded after a quiet period, since
//! nothing would ever complete them; groups of reliable chunks persist until
//! completion because the reliable layer already bounds what can be in
//! flight.

use crate::packet::{PacketKind, ReceivedPacket};
use crate::timeout_queue::{TimeoutHandle, TimeoutQueue};
use bytes::{BufMut, Bytes, BytesMut};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use tracing::{debug, error, warn};

struct SplitGroup {
    chunk_count: u16,
    /// If true, the group is exempt from the inactivity deadline.
    reliable: bool,
    /// Key is the chunk number; ascending iteration is the reassembly order.
    chunks: BTreeMap<u16, ReceivedPacket>,
    timeout: TimeoutHandle,
}

impl SplitGroup {
    fn all_received(&self) -> bool {
        self.chunks.len() == self.chunk_count as usize
    }

    fn reassemble(self) -> Bytes {
        let total_size: usize = self.chunks.values().map(|rpkt| rpkt.contents.len()).sum();
        let mut full_data = BytesMut::with_capacity(total_size);
        for (_, rpkt) in self.chunks {
            full_data.put_slice(&rpkt.contents);
        }
        full_data.freeze()
    }
}

struct SplitBufferInner {
    /// Key is the split seqnum.
    groups: FxHashMap<u16, SplitGroup>,
    timeout_queue: TimeoutQueue,
    split_timeout_ms: u64,
}

/// Buffer for reconstructing split packets, one per channel.
///
/// Cheap to clone; clones share the same state. Not internally synchronised -
/// all entry points must be called from the receive task.
#[derive(Clone)]
pub struct SplitBuffer {
    inner: Rc<RefCell<SplitBufferInner>>,
}

impl SplitBuffer {
    pub fn new(timeout_queue: TimeoutQueue, split_timeout_ms: u64) -> SplitBuffer {
        SplitBuffer {
            inner: Rc::new(RefCell::new(SplitBufferInner {
                groups: FxHashMap::default(),
                timeout_queue,
                split_timeout_ms,
            })),
        }
    }

    /// Accepts one split packet, returning the fully reassembled payload if
    /// this chunk completed its group.
    pub fn insert(&self, rpkt: ReceivedPacket) -> Option<Bytes> {
        let header = match &rpkt.kind {
            PacketKind::Split(header) => *header,
            _ => panic!("only split packets go through the split buffer"),
        };

        let mut inner = self.inner.borrow_mut();
        let inner = &mut *inner;

        let group = inner.groups.entry(header.seqnum).or_insert_with(|| {
            let mut group = SplitGroup {
                chunk_count: header.chunk_count,
                reliable: rpkt.is_reliable(),
                chunks: BTreeMap::new(),
                timeout: inner.timeout_queue.handle(),
            };
            Self::reset_timeout(
                &mut group,
                &self.inner,
                header.seqnum,
                inner.split_timeout_ms,
            );
            group
        });

        if group.chunk_count != header.chunk_count {
            // The sender must not reuse a split seqnum with a different size
            // before the previous group completes.
            error!(
                "{} split chunk_count {} != {} of the existing group #{} - ignoring",
                rpkt, header.chunk_count, group.chunk_count, header.seqnum
            );
            return None;
        }
        if group.reliable != rpkt.is_reliable() {
            warn!(
                "{} split reliable flag {} != {} of the existing group #{}",
                rpkt,
                rpkt.is_reliable(),
                group.reliable,
                header.seqnum
            );
        }

        // Identical chunks can arrive when the sender re-transmits under lag.
        if group.chunks.contains_key(&header.chunk_num) {
            debug!("{} duplicate chunk {} of group #{}", rpkt, header.chunk_num, header.seqnum);
            return None;
        }

        group.chunks.insert(header.chunk_num, rpkt);
        Self::reset_timeout(group, &self.inner, header.seqnum, inner.split_timeout_ms);

        if group.all_received() {
            let group = inner
                .groups
                .remove(&header.seqnum)
                .expect("group was just updated");
            return Some(group.reassemble());
        }
        None
    }

    /// Arms (or re-arms) the inactivity deadline of an unreliable group.
    fn reset_timeout(
        group: &mut SplitGroup,
        inner: &Rc<RefCell<SplitBufferInner>>,
        seqnum: u16,
        split_timeout_ms: u64,
    ) {
        if group.reliable {
            return;
        }
        let weak = Rc::downgrade(inner);
        group.timeout.set_timeout(split_timeout_ms, move || {
            Self::evict_expired(&weak, seqnum);
        });
    }

    fn evict_expired(inner: &Weak<RefCell<SplitBufferInner>>, seqnum: u16) {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        debug!("removing timed out unreliable split group #{}", seqnum);
        inner.borrow_mut().groups.remove(&seqnum);
    }

    #[cfg(test)]
    pub(crate) fn group_count(&self) -> usize {
        self.inner.borrow().groups.len()
    }
}
