//! Send window of a CS104 connection.
//!
//! Holds the I-frames that were sent but not yet confirmed by the peer, in
//! send order. Entries remember their own N(S) so that an acknowledgement
//! N(R) retires exactly the frames in front of it, across the 32768 wrap.

use std::collections::VecDeque;

use tokio::time::Instant;

use crate::error::{Iec60870Error, Result};
use crate::queue::QueueMark;
use crate::types::seq_distance;

/// One sent, unconfirmed I-frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentEntry {
    /// N(S) the frame was sent with
    pub seq: u16,
    /// When the frame was handed to the transport
    pub sent_at: Instant,
    /// Position in the low priority queue, if the ASDU came from there
    pub mark: Option<QueueMark>,
}

/// Bounded window of unconfirmed I-frames (at most K).
#[derive(Debug, Clone)]
pub struct SentWindow {
    entries: VecDeque<SentEntry>,
    k: u16,
}

impl SentWindow {
    /// Empty window with capacity `k`.
    pub fn new(k: u16) -> Self {
        Self {
            entries: VecDeque::with_capacity(usize::from(k)),
            k,
        }
    }

    /// Number of outstanding frames.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No frame outstanding.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// K frames outstanding; the sender must stall.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= usize::from(self.k)
    }

    /// Oldest outstanding frame.
    pub fn oldest(&self) -> Option<&SentEntry> {
        self.entries.front()
    }

    /// Newest outstanding frame.
    pub fn newest(&self) -> Option<&SentEntry> {
        self.entries.back()
    }

    /// Record a sent frame.
    pub fn push(&mut self, entry: SentEntry) -> Result<()> {
        if self.is_full() {
            return Err(Iec60870Error::TooManyUnconfirmed(self.k));
        }
        self.entries.push_back(entry);
        Ok(())
    }

    /// Apply an acknowledgement N(R).
    ///
    /// `next_send` is the N(S) the next frame will carry. N(R) confirms every
    /// frame with a sequence number before it. Valid values are the oldest
    /// outstanding N(S) up to `next_send`; anything else fails with
    /// `SequenceOutOfWindow` and leaves the window untouched. Returns the
    /// retired entries, oldest first.
    pub fn confirm(&mut self, recv_seq: u16, next_send: u16) -> Result<Vec<SentEntry>> {
        let Some(oldest) = self.entries.front().map(|e| e.seq) else {
            if recv_seq == next_send {
                return Ok(Vec::new());
            }
            return Err(Iec60870Error::SequenceOutOfWindow {
                recv_seq,
                oldest: next_send,
                next: next_send,
            });
        };

        let retire = usize::from(seq_distance(oldest, recv_seq));
        if retire > self.entries.len() {
            return Err(Iec60870Error::SequenceOutOfWindow {
                recv_seq,
                oldest,
                next: next_send,
            });
        }

        Ok(self.entries.drain(..retire).collect())
    }

    /// Drop all entries, returning them.
    pub fn clear(&mut self) -> Vec<SentEntry> {
        self.entries.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(seqs: std::ops::Range<u16>) -> SentWindow {
        let now = Instant::now();
        let mut w = SentWindow::new(12);
        for seq in seqs {
            w.push(SentEntry {
                seq: seq % 32768,
                sent_at: now,
                mark: None,
            })
            .unwrap();
        }
        w
    }

    #[test]
    fn test_confirm_retires_prefix() {
        let mut w = window(5..17);
        assert!(w.is_full());

        let retired = w.confirm(10, 17).unwrap();
        assert_eq!(retired.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![5, 6, 7, 8, 9]);
        assert_eq!(w.len(), 7);
        assert_eq!(w.oldest().unwrap().seq, 10);
        assert_eq!(w.newest().unwrap().seq, 16);
    }

    #[test]
    fn test_repeated_confirm_is_noop() {
        let mut w = window(5..17);
        w.confirm(10, 17).unwrap();
        assert!(w.confirm(10, 17).unwrap().is_empty());
        assert_eq!(w.len(), 7);
    }

    #[test]
    fn test_out_of_window_rejected_without_change() {
        let mut w = window(5..17);
        w.confirm(10, 17).unwrap();

        assert!(matches!(
            w.confirm(4, 17),
            Err(Iec60870Error::SequenceOutOfWindow { recv_seq: 4, oldest: 10, next: 17 })
        ));
        assert!(w.confirm(18, 17).is_err());
        assert_eq!(w.len(), 7);

        assert_eq!(w.confirm(17, 17).unwrap().len(), 7);
        assert!(w.is_empty());
    }

    #[test]
    fn test_empty_window() {
        let mut w = SentWindow::new(12);
        assert!(w.confirm(3, 3).unwrap().is_empty());
        assert!(w.confirm(2, 3).is_err());
    }

    #[test]
    fn test_confirm_across_wrap() {
        let mut w = window(32765..32771);
        assert_eq!(w.oldest().unwrap().seq, 32765);
        assert_eq!(w.newest().unwrap().seq, 2);

        let retired = w.confirm(1, 3).unwrap();
        assert_eq!(retired.len(), 4);
        assert_eq!(w.oldest().unwrap().seq, 1);
    }

    #[test]
    fn test_push_beyond_k() {
        let mut w = window(0..12);
        let err = w
            .push(SentEntry {
                seq: 12,
                sent_at: Instant::now(),
                mark: None,
            })
            .unwrap_err();
        assert!(matches!(err, Iec60870Error::TooManyUnconfirmed(12)));
    }
}
