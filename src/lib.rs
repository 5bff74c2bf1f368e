//! Receive path of a reliable-ordered datagram transport tunneled through a
//! connectionless, unreliable packet substrate (UDP-like). The substrate may
//! drop, duplicate, delay or reorder packets; this crate turns that into
//! in-order, at-most-once delivery per channel, and reassembles application
//! payloads that were split across several datagrams.
//!
//! ## Design goals
//!
//! * The abstraction is receiving *packets* (defined-length chunks of data),
//!   not a byte stream
//! * Reliable packets are acknowledged per arrival and delivered to the upper
//!   layer in exactly the order they were sent, each exactly once
//!   * duplicates are re-ACKed (the previous ACK may have been lost) but
//!     never re-delivered
//! * Payloads too big for one datagram are chunked by the sender and
//!   reassembled here, without IP-level fragmentation
//!   * partially received unreliable groups are discarded after a quiet
//!     period; reliable groups persist, because the reliable window already
//!     bounds what can be in flight
//! * All deadline work runs through a single timeout queue driven by the
//!   receive task; every scheduled callback is owned by a handle that cancels
//!   it on drop
//! * A single receive task owns all state - no internal locking
//! * Memory is bounded by the reliable window and the set of live split
//!   groups; packets beyond the window are discarded unacknowledged
//!
//! Out of scope, interfaced with only through callbacks: socket I/O, the
//! outgoing reliable pipeline (retransmission, RTT estimation, send-side
//! window dynamics), peer lifecycle management, and the application protocol
//! above the transport.
//!
//! ## Header
//!
//! Every datagram starts with the base header - all numbers in network byte
//! order (BE):
//!
//! ```ascii
//! 0: protocol id (u32)
//! 4: sender peer id (u16) - 0 is reserved for unassigned peers, 1 for the
//!     server
//! 6: channel (u8): 0..2, independent ordering namespaces within the session
//! ```
//!
//! Then one packet follows, introduced by a type tag (u8):
//!
//! ```ascii
//! ORIGINAL (1): [payload...]
//!     Plain packet, handed to the upper layer as-is. Payload must not be
//!     empty.
//!
//! SPLIT (2): [seqnum (u16)][chunk_count (u16)][chunk_num (u16)][payload...]
//!     One chunk of a larger payload. When all chunk_nums 0..chunk_count-1
//!     of a seqnum have arrived, the concatenated payload is handed to the
//!     upper layer. Payload must not be empty, chunk_num must be below
//!     chunk_count. The seqnum lives in its own namespace, unrelated to
//!     reliable seqnums.
//!
//! RELIABLE (3): [seqnum (u16)]  -> then one inner packet (not RELIABLE)
//!     Envelope forcing ACKed, in-order delivery of the inner packet.
//!     Nested envelopes are rejected.
//!
//! CONTROL (0): [control type (u8)][...]
//!     Protocol-internal packets, nothing is handed to the upper layer:
//!       ACK         (0): [seqnum (u16)]
//!       SET_PEER_ID (1): [new peer id (u16)]
//!       PING        (2): no payload; no direct reply, but can be sent in a
//!                         reliable envelope to force one
//!       DISCO       (3): no payload
//! ```
//!
//! ## Sequence numbers
//!
//! Wire sequence numbers are 16 bits and wrap; all counters start at 65500 so
//! a wrap occurs within the first few dozen packets of every session. The
//! receive side extrapolates each wire seqnum to a monotonic 64-bit stream
//! position relative to the next expected packet, choosing the nearest
//! position and preferring forward on ties. Packets more than the maximum
//! window size ahead of the expectation are dropped without an ACK - an
//! honest sender will retransmit.
//!
//! ## Related
//!
//! * TCP: full reliability and total order, but stream-oriented and
//!   head-of-line blocking across logically independent messages
//! * QUIC: connection handshake, mandatory encryption, stream multiplexing -
//!   a much bigger surface than a per-channel ordered datagram pipe
//! * plain UDP: the substrate; no ordering, no reassembly above the IP layer

pub mod binheap;
pub mod clock;
pub mod config;
pub mod packet;
pub mod receiver;
pub mod reorder_buffer;
pub mod split_buffer;
pub mod timeout_queue;
