//! ASDU queues of the sending side.
//!
//! - [`AsduQueue`] - low priority event ring with confirmation tracking
//! - [`AsduFifo`] - bounded FIFO for high priority data and CS101 classes
//! - [`SharedQueue`] - `AsduQueue` shared by the connections of one
//!   redundancy group

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{Iec60870Error, Result};
use crate::types::Asdu;

/// What to do when a low priority queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EnqueueMode {
    /// Overwrite the oldest entry
    #[default]
    RemoveOldest,
    /// Drop the new ASDU
    Ignore,
    /// Fail with `QueueOverflow`
    Reject,
}

/// Handle of a queue entry that was handed out for transmission.
///
/// The stamp distinguishes the entry from a later one that reused the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueMark {
    /// Slot in the ring
    pub index: usize,
    /// Enqueue stamp of the entry
    pub stamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    NotUsed,
    Waiting,
    SentUnconfirmed,
}

#[derive(Debug, Clone)]
struct QueueEntry {
    asdu: Option<Asdu>,
    stamp: u64,
    state: EntryState,
}

impl QueueEntry {
    const EMPTY: Self = Self {
        asdu: None,
        stamp: 0,
        state: EntryState::NotUsed,
    };
}

/// Fixed capacity ring of ASDUs waiting for transmission or confirmation.
///
/// Entries move `NotUsed -> Waiting -> SentUnconfirmed -> NotUsed`. A
/// confirmation retires the confirmed entry together with every sent entry
/// before it.
#[derive(Debug, Clone)]
pub struct AsduQueue {
    entries: Vec<QueueEntry>,
    oldest: usize,
    latest: usize,
    count: usize,
    mode: EnqueueMode,
    next_stamp: u64,
}

impl AsduQueue {
    /// Create a queue with room for `capacity` ASDUs (at least one).
    pub fn new(capacity: usize, mode: EnqueueMode) -> Self {
        Self {
            entries: vec![QueueEntry::EMPTY; capacity.max(1)],
            oldest: 0,
            latest: 0,
            count: 0,
            mode,
            next_stamp: 1,
        }
    }

    /// Maximum number of entries.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Entries currently in use (waiting or unconfirmed).
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.count == self.entries.len()
    }

    /// Entries not yet handed out for transmission.
    pub fn waiting(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.state == EntryState::Waiting)
            .count()
    }

    /// Append an ASDU.
    ///
    /// Returns `Ok(false)` when the queue is full and the mode is
    /// [`EnqueueMode::Ignore`].
    pub fn enqueue(&mut self, asdu: Asdu) -> Result<bool> {
        let size = self.entries.len();

        if self.count == 0 {
            self.oldest = 0;
            self.latest = 0;
            self.count = 1;
        } else {
            if self.count == size {
                match self.mode {
                    EnqueueMode::RemoveOldest => {}
                    EnqueueMode::Ignore => {
                        tracing::debug!("queue is full, ignoring new ASDU");
                        return Ok(false);
                    }
                    EnqueueMode::Reject => return Err(Iec60870Error::QueueOverflow(size)),
                }
            }

            self.latest = (self.latest + 1) % size;
            if self.latest == self.oldest {
                self.oldest = (self.oldest + 1) % size;
            } else {
                self.count += 1;
            }
        }

        let stamp = self.next_stamp;
        self.next_stamp += 1;
        self.entries[self.latest] = QueueEntry {
            asdu: Some(asdu),
            stamp,
            state: EntryState::Waiting,
        };

        tracing::trace!(
            count = self.count,
            oldest = self.oldest,
            latest = self.latest,
            "ASDU enqueued"
        );
        Ok(true)
    }

    /// Take the oldest waiting entry and mark it as sent.
    pub fn next_waiting(&mut self) -> Option<(Asdu, QueueMark)> {
        if self.count == 0 {
            return None;
        }

        let size = self.entries.len();
        let mut index = self.oldest;
        loop {
            match self.entries[index].state {
                EntryState::Waiting => break,
                EntryState::NotUsed => return None,
                EntryState::SentUnconfirmed => {}
            }
            index = (index + 1) % size;
            if index == self.oldest {
                return None;
            }
        }

        let entry = &mut self.entries[index];
        entry.state = EntryState::SentUnconfirmed;
        let asdu = entry.asdu.clone()?;
        Some((
            asdu,
            QueueMark {
                index,
                stamp: entry.stamp,
            },
        ))
    }

    /// Retire the entry behind `mark` and every sent entry before it.
    ///
    /// Stale marks (slot overwritten since) are ignored.
    pub fn mark_confirmed(&mut self, mark: QueueMark) {
        let size = self.entries.len();
        if self.count == 0 || mark.index >= size {
            return;
        }
        let entry = &self.entries[mark.index];
        if entry.state != EntryState::SentUnconfirmed || entry.stamp != mark.stamp {
            return;
        }

        let mut index = mark.index;
        while self.entries[index].state == EntryState::SentUnconfirmed {
            self.entries[index] = QueueEntry::EMPTY;
            self.count -= 1;
            if self.count == 0 || index == self.oldest {
                break;
            }
            index = (index + size - 1) % size;
            if index == mark.index {
                break;
            }
        }

        if self.count == 0 {
            self.oldest = 0;
            self.latest = 0;
            return;
        }
        while self.entries[self.oldest].state == EntryState::NotUsed {
            self.oldest = (self.oldest + 1) % size;
        }
        tracing::trace!(count = self.count, oldest = self.oldest, "queue entries confirmed");
    }

    /// Return all sent but unconfirmed entries to the waiting state.
    pub fn unmark_all(&mut self) {
        for entry in &mut self.entries {
            if entry.state == EntryState::SentUnconfirmed {
                entry.state = EntryState::Waiting;
            }
        }
    }
}

/// Bounded FIFO of ASDUs.
#[derive(Debug, Clone)]
pub struct AsduFifo {
    items: VecDeque<Asdu>,
    capacity: usize,
}

impl AsduFifo {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    /// Append, failing with `QueueOverflow` when full.
    pub fn push(&mut self, asdu: Asdu) -> Result<()> {
        if self.is_full() {
            return Err(Iec60870Error::QueueOverflow(self.capacity));
        }
        self.items.push_back(asdu);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Asdu> {
        self.items.pop_front()
    }

    pub fn front(&self) -> Option<&Asdu> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// Low priority queue shared between the connections of a redundancy group.
///
/// Every successful enqueue wakes the subscribed connection tasks.
#[derive(Debug)]
pub struct SharedQueue {
    queue: Mutex<AsduQueue>,
    subscribers: Mutex<Vec<Weak<Notify>>>,
}

impl SharedQueue {
    pub fn new(capacity: usize, mode: EnqueueMode) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(AsduQueue::new(capacity, mode)),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Wake `notify` on every enqueue until it is dropped.
    pub fn subscribe(&self, notify: &Arc<Notify>) {
        self.subscribers.lock().push(Arc::downgrade(notify));
    }

    fn wake(&self) {
        self.subscribers.lock().retain(|weak| match weak.upgrade() {
            Some(notify) => {
                notify.notify_one();
                true
            }
            None => false,
        });
    }

    pub fn enqueue(&self, asdu: Asdu) -> Result<bool> {
        let queued = self.queue.lock().enqueue(asdu)?;
        if queued {
            self.wake();
        }
        Ok(queued)
    }

    /// Find and mark the next entry under one lock.
    pub fn next_waiting(&self) -> Option<(Asdu, QueueMark)> {
        self.queue.lock().next_waiting()
    }

    pub fn mark_confirmed(&self, mark: QueueMark) {
        self.queue.lock().mark_confirmed(mark);
    }

    /// Make unconfirmed entries sendable again, e.g. after their connection
    /// was lost.
    pub fn unmark_all(&self) {
        self.queue.lock().unmark_all();
        self.wake();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.lock().is_full()
    }

    pub fn waiting(&self) -> usize {
        self.queue.lock().waiting()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Element, InformationObject};
    use crate::types::{ApplicationLayerParameters, Cot, QualityDescriptor};

    fn asdu(ioa: u32) -> Asdu {
        Asdu::with_object(
            &ApplicationLayerParameters::iec104(),
            Cot::Spontaneous,
            1,
            InformationObject::new(ioa, Element::single_point(true, QualityDescriptor::GOOD)),
        )
        .unwrap()
    }

    fn first_ioa(asdu: &Asdu) -> u32 {
        asdu.element(0).unwrap().ioa
    }

    #[test]
    fn test_overflow_remove_oldest() {
        let mut q = AsduQueue::new(3, EnqueueMode::RemoveOldest);
        for ioa in 1..=4 {
            assert!(q.enqueue(asdu(ioa)).unwrap());
        }
        assert_eq!(q.len(), 3);

        let (a, _) = q.next_waiting().unwrap();
        assert_eq!(first_ioa(&a), 2);
    }

    #[test]
    fn test_overflow_reject() {
        let mut q = AsduQueue::new(3, EnqueueMode::Reject);
        for ioa in 1..=3 {
            q.enqueue(asdu(ioa)).unwrap();
        }
        assert!(matches!(
            q.enqueue(asdu(4)),
            Err(Iec60870Error::QueueOverflow(3))
        ));
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn test_overflow_ignore() {
        let mut q = AsduQueue::new(2, EnqueueMode::Ignore);
        q.enqueue(asdu(1)).unwrap();
        q.enqueue(asdu(2)).unwrap();
        assert!(!q.enqueue(asdu(3)).unwrap());
        assert_eq!(q.len(), 2);
        let (a, _) = q.next_waiting().unwrap();
        assert_eq!(first_ioa(&a), 1);
    }

    #[test]
    fn test_confirm_walks_backward() {
        let mut q = AsduQueue::new(5, EnqueueMode::RemoveOldest);
        for ioa in 1..=4 {
            q.enqueue(asdu(ioa)).unwrap();
        }
        let _m1 = q.next_waiting().unwrap().1;
        let _m2 = q.next_waiting().unwrap().1;
        let m3 = q.next_waiting().unwrap().1;
        assert_eq!(q.waiting(), 1);

        q.mark_confirmed(m3);
        assert_eq!(q.len(), 1);

        let (a, m4) = q.next_waiting().unwrap();
        assert_eq!(first_ioa(&a), 4);
        q.mark_confirmed(m4);
        assert!(q.is_empty());
        assert!(q.next_waiting().is_none());
    }

    #[test]
    fn test_confirm_is_idempotent() {
        let mut q = AsduQueue::new(3, EnqueueMode::RemoveOldest);
        q.enqueue(asdu(1)).unwrap();
        q.enqueue(asdu(2)).unwrap();
        let m1 = q.next_waiting().unwrap().1;

        q.mark_confirmed(m1);
        assert_eq!(q.len(), 1);
        q.mark_confirmed(m1);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_confirm_across_ring_wrap() {
        let mut q = AsduQueue::new(3, EnqueueMode::RemoveOldest);
        for ioa in 1..=3 {
            q.enqueue(asdu(ioa)).unwrap();
        }
        let m = q.next_waiting().unwrap().1;
        q.mark_confirmed(m);
        let m = q.next_waiting().unwrap().1;
        q.mark_confirmed(m);

        // slots 0 and 1 are free again, latest wraps around to them
        q.enqueue(asdu(4)).unwrap();
        q.enqueue(asdu(5)).unwrap();
        assert!(q.is_full());

        let mut last = None;
        for expected in 3..=5 {
            let (a, m) = q.next_waiting().unwrap();
            assert_eq!(first_ioa(&a), expected);
            last = Some(m);
        }
        q.mark_confirmed(last.unwrap());
        assert!(q.is_empty());
    }

    #[test]
    fn test_stale_mark_ignored() {
        let mut q = AsduQueue::new(1, EnqueueMode::RemoveOldest);
        q.enqueue(asdu(1)).unwrap();
        let stale = q.next_waiting().unwrap().1;
        q.enqueue(asdu(2)).unwrap();
        q.mark_confirmed(stale);
        assert_eq!(q.len(), 1);
        assert_eq!(q.waiting(), 1);
    }

    #[test]
    fn test_unmark_all() {
        let mut q = AsduQueue::new(3, EnqueueMode::RemoveOldest);
        q.enqueue(asdu(1)).unwrap();
        q.enqueue(asdu(2)).unwrap();
        q.next_waiting().unwrap();
        q.next_waiting().unwrap();
        assert!(q.next_waiting().is_none());

        q.unmark_all();
        assert_eq!(q.waiting(), 2);
        let (a, _) = q.next_waiting().unwrap();
        assert_eq!(first_ioa(&a), 1);
    }

    #[test]
    fn test_fifo_bounded() {
        let mut f = AsduFifo::new(2);
        f.push(asdu(1)).unwrap();
        f.push(asdu(2)).unwrap();
        assert!(f.push(asdu(3)).is_err());
        assert_eq!(first_ioa(&f.pop().unwrap()), 1);
        assert_eq!(f.len(), 1);
    }

    #[tokio::test]
    async fn test_shared_queue_wakes_subscribers() {
        let q = SharedQueue::new(4, EnqueueMode::RemoveOldest);
        let notify = Arc::new(Notify::new());
        q.subscribe(&notify);

        q.enqueue(asdu(7)).unwrap();
        // permit is stored even though nobody was waiting yet
        notify.notified().await;
        assert_eq!(q.next_waiting().map(|(a, _)| first_ioa(&a)), Some(7));

        drop(notify);
        q.enqueue(asdu(8)).unwrap();
        assert!(q.subscribers.lock().is_empty());
    }
}
