//! Deadline scheduling for the receive task.
//!
//! A [`TimeoutQueue`] holds callbacks ordered by absolute expiration time; the
//! receive task drives it by calling [`TimeoutQueue::process_timeouts`]
//! between datagrams or on an idle tick. Every scheduled callback is owned by
//! a [`TimeoutHandle`]: dropping or clearing the handle guarantees the
//! callback will not run.

use crate::binheap::{HeapKey, IndexedBinHeap};
use crate::clock::Clock;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;
use tracing::trace;

pub type TimeoutCallback = Box<dyn FnOnce()>;

struct TimeoutRecord {
    expiration_ms: u64,
    callback: TimeoutCallback,
}

impl PartialEq for TimeoutRecord {
    fn eq(&self, other: &Self) -> bool {
        self.expiration_ms == other.expiration_ms
    }
}
impl Eq for TimeoutRecord {}
impl PartialOrd for TimeoutRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimeoutRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.expiration_ms.cmp(&other.expiration_ms)
    }
}

struct Shared {
    heap: RefCell<IndexedBinHeap<TimeoutRecord>>,
    clock: Rc<dyn Clock>,
}

#[derive(Clone)]
pub struct TimeoutQueue {
    shared: Rc<Shared>,
}

impl TimeoutQueue {
    pub fn new(clock: Rc<dyn Clock>) -> TimeoutQueue {
        TimeoutQueue {
            shared: Rc::new(Shared {
                heap: RefCell::new(IndexedBinHeap::new()),
                clock,
            }),
        }
    }

    /// A new, inactive handle on this queue.
    pub fn handle(&self) -> TimeoutHandle {
        TimeoutHandle {
            shared: self.shared.clone(),
            key: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.shared.heap.borrow().is_empty()
    }

    /// Milliseconds until the next timeout expires; 0 if there are already
    /// expired timeouts, `None` if nothing is scheduled.
    pub fn next_timeout_ms(&self) -> Option<u64> {
        let heap = self.shared.heap.borrow();
        let (_, record) = heap.peek()?;
        Some(
            record
                .expiration_ms
                .saturating_sub(self.shared.clock.now_ms()),
        )
    }

    /// Invokes every callback whose expiration lies in the past.
    ///
    /// Each record is removed from the heap *before* its callback runs, so a
    /// callback may re-arm the handle that scheduled it, drop other handles,
    /// or schedule new timeouts.
    pub fn process_timeouts(&self) {
        let now = self.shared.clock.now_ms();
        loop {
            let expired = self
                .shared
                .heap
                .borrow()
                .peek()
                .filter(|(_, record)| record.expiration_ms < now)
                .map(|(key, _)| key);
            let Some(key) = expired else {
                break;
            };

            let record = self
                .shared
                .heap
                .borrow_mut()
                .remove(key)
                .expect("peeked entry is resident");
            // The record is out of the heap at this point, so the callback
            // may legally re-arm the handle that scheduled it.
            (record.callback)();
        }
    }
}

/// Tracks one pending (or inactive) callback on a timeout queue.
///
/// Once the handle is cleared or dropped, the callback it held is guaranteed
/// not to run. The callback may therefore reference state that lives at the
/// same level as the handle, as long as that state outlives it.
pub struct TimeoutHandle {
    shared: Rc<Shared>,
    key: Option<HeapKey>,
}

impl TimeoutHandle {
    /// Timeout is pending in the queue.
    pub fn is_active(&self) -> bool {
        self.key
            .is_some_and(|key| self.shared.heap.borrow().contains(key))
    }

    /// Cancel the timeout and drop its callback, if pending.
    pub fn clear_timeout(&mut self) {
        if let Some(key) = self.key.take() {
            // stale after firing, in which case this is a no-op
            self.shared.heap.borrow_mut().remove(key);
        }
    }

    /// Set or update this timeout. Any previous timeout on this handle is
    /// cancelled.
    pub fn set_timeout(&mut self, delay_ms: u64, callback: impl FnOnce() + 'static) {
        self.clear_timeout();
        let expiration_ms = self.shared.clock.now_ms() + delay_ms;
        trace!("scheduling timeout at {} ms", expiration_ms);
        let key = self.shared.heap.borrow_mut().insert(TimeoutRecord {
            expiration_ms,
            callback: Box::new(callback),
        });
        self.key = Some(key);
    }
}

impl Drop for TimeoutHandle {
    fn drop(&mut self) {
        self.clear_timeout();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn queue_with_clock(start_ms: u64) -> (TimeoutQueue, Rc<ManualClock>) {
        let clock = Rc::new(ManualClock::new(start_ms));
        (TimeoutQueue::new(clock.clone()), clock)
    }

    fn counter() -> (Rc<std::cell::Cell<u32>>, impl Fn() -> Box<dyn FnOnce()>) {
        let fired = Rc::new(std::cell::Cell::new(0u32));
        let make = {
            let fired = fired.clone();
            move || -> Box<dyn FnOnce()> {
                let fired = fired.clone();
                Box::new(move || fired.set(fired.get() + 1))
            }
        };
        (fired, make)
    }

    #[test]
    fn test_fires_exactly_once() {
        let (queue, clock) = queue_with_clock(1000);
        let (fired, make) = counter();

        let mut handle = queue.handle();
        handle.set_timeout(30, make());
        assert!(handle.is_active());
        assert_eq!(queue.next_timeout_ms(), Some(30));

        // expiration is exclusive: nothing fires at exactly t0 + delay
        clock.advance(30);
        queue.process_timeouts();
        assert_eq!(fired.get(), 0);
        assert_eq!(queue.next_timeout_ms(), Some(0));

        clock.advance(1);
        queue.process_timeouts();
        assert_eq!(fired.get(), 1);
        assert!(!handle.is_active());
        assert!(queue.is_empty());

        // no re-fire on later calls
        clock.advance(1000);
        queue.process_timeouts();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_clear_timeout_cancels() {
        let (queue, clock) = queue_with_clock(0);
        let (fired, make) = counter();

        let mut handle = queue.handle();
        handle.set_timeout(10, make());
        handle.clear_timeout();
        assert!(!handle.is_active());
        assert!(queue.is_empty());

        clock.advance(100);
        queue.process_timeouts();
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn test_drop_cancels() {
        let (queue, clock) = queue_with_clock(0);
        let (fired, make) = counter();

        {
            let mut handle = queue.handle();
            handle.set_timeout(10, make());
        }
        assert!(queue.is_empty());

        clock.advance(100);
        queue.process_timeouts();
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn test_set_timeout_replaces_pending() {
        let (queue, clock) = queue_with_clock(0);
        let (fired, make) = counter();

        let mut handle = queue.handle();
        handle.set_timeout(10, make());
        handle.set_timeout(50, make());
        assert_eq!(queue.next_timeout_ms(), Some(50));

        clock.advance(100);
        queue.process_timeouts();
        // the first callback was cancelled, only one firing
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_rearm_from_inside_callback() {
        let (queue, clock) = queue_with_clock(0);
        let (fired, make) = counter();

        // The handle must be reachable from inside its own callback, so it
        // lives behind a shared cell like the handles embedded in buffers do.
        let handle = Rc::new(RefCell::new(queue.handle()));
        {
            let handle2 = handle.clone();
            let inner = make();
            handle.borrow_mut().set_timeout(10, move || {
                handle2.borrow_mut().set_timeout(10, inner);
            });
        }

        clock.advance(11);
        queue.process_timeouts();
        assert_eq!(fired.get(), 0);
        assert!(handle.borrow().is_active());

        clock.advance(11);
        queue.process_timeouts();
        assert_eq!(fired.get(), 1);
        assert!(!handle.borrow().is_active());
    }

    #[test]
    fn test_equal_expirations_all_fire() {
        let (queue, clock) = queue_with_clock(0);
        let (fired, make) = counter();

        let mut handles = (0..5).map(|_| queue.handle()).collect::<Vec<_>>();
        for handle in &mut handles {
            handle.set_timeout(20, make());
        }

        clock.advance(21);
        queue.process_timeouts();
        assert_eq!(fired.get(), 5);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_expiration_order() {
        let (queue, clock) = queue_with_clock(0);
        let order = Rc::new(RefCell::new(Vec::new()));

        let mut handles = Vec::new();
        for delay in [30u64, 10, 20] {
            let mut handle = queue.handle();
            let order = order.clone();
            handle.set_timeout(delay, move || order.borrow_mut().push(delay));
            handles.push(handle);
        }

        clock.advance(31);
        queue.process_timeouts();
        assert_eq!(*order.borrow(), vec![10, 20, 30]);
    }
}
