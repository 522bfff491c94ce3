//! Go-Back-N send-side reliability state.
//!
//! [`SendWindow`] maintains the sliding window of in-flight segments for one
//! connection:
//!
//! - At most `effective_window` segments may be in flight at once (the cap
//!   is supplied per call by the congestion controller).
//! - ACKs are **cumulative**: `ack_num = K` acknowledges every segment with
//!   seq < K and requests K next.
//! - On timeout, every unacked segment from `send_base` onwards is
//!   retransmitted (go back N).
//! - Three duplicate ACKs for `send_base` trigger a fast retransmit of the
//!   oldest unacked segment, reported to the caller as
//!   [`AckEvent::TripleDup`].
//!
//! Sequence numbers are packet-indexed: each data segment consumes exactly
//! one. This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use crate::segment::Segment;

/// Fixed retransmission timeout (design constant; no adaptive RTT).
pub const TIMEOUT_INTERVAL: Duration = Duration::from_secs(1);

/// Number of duplicate ACKs that triggers a fast retransmit.
pub const DUP_ACK_THRESHOLD: u32 = 3;

/// Outcome of processing one inbound acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckEvent {
    /// Cumulative advance: `newly_acked` segments left the window.
    Advanced { newly_acked: u32 },
    /// Duplicate ACK below the fast-retransmit threshold.
    Duplicate { count: u32 },
    /// Third duplicate ACK — the caller must retransmit the oldest unacked
    /// segment and notify the congestion controller.
    TripleDup,
    /// Duplicate ACK beyond the threshold, while loss recovery is underway.
    DupInRecovery,
    /// ACK for data below `send_base` (or beyond `next_seq_num`); ignored.
    Stale,
}

/// Send-side sliding window for one connection.
///
/// ```text
///  send_base        next_seq_num
///      │                  │
///  ────┼──────────────────┼──────────────▶ seq space
///      │ ◀── in flight ──▶│ ◀─ sendable ─
/// ```
#[derive(Debug)]
pub struct SendWindow {
    /// Sequence number of the oldest unacknowledged segment.
    send_base: u32,
    /// Sequence number to assign to the next new segment.
    next_seq_num: u32,
    /// Retained copies of in-flight segments, keyed by seq.
    buffer: BTreeMap<u32, Segment>,
    /// Timestamp of the last (re)transmission, same key set as `buffer`.
    timers: HashMap<u32, Instant>,
    /// Consecutive duplicate ACKs observed for `send_base`.
    dup_ack_count: u32,
    /// Highest cumulative ACK seen so far.
    last_ack_num: u32,
}

impl SendWindow {
    /// Create a window whose first data segment will carry `initial_seq`.
    ///
    /// After the three-way handshake this is 1 (the SYN consumed seq 0).
    pub fn new(initial_seq: u32) -> Self {
        Self {
            send_base: initial_seq,
            next_seq_num: initial_seq,
            buffer: BTreeMap::new(),
            timers: HashMap::new(),
            dup_ack_count: 0,
            last_ack_num: initial_seq,
        }
    }

    pub fn send_base(&self) -> u32 {
        self.send_base
    }

    pub fn next_seq_num(&self) -> u32 {
        self.next_seq_num
    }

    /// Number of segments currently awaiting acknowledgement.
    pub fn in_flight(&self) -> u32 {
        self.next_seq_num - self.send_base
    }

    /// `true` when at least one segment is awaiting acknowledgement.
    pub fn has_unacked(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// `true` when the window has room under `effective_window`.
    pub fn can_send(&self, effective_window: u32) -> bool {
        self.in_flight() < effective_window
    }

    /// Build the next data segment without transmitting or recording it.
    ///
    /// Call [`record_sent`](Self::record_sent) immediately after the segment
    /// hits the wire.
    pub fn next_segment(&self, ack_num: u32, window: u16, payload: Vec<u8>) -> Segment {
        Segment::data(self.next_seq_num, ack_num, window, payload)
    }

    /// Place a just-transmitted segment into the window and start its timer.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if the segment does not carry `next_seq_num`.
    pub fn record_sent(&mut self, segment: Segment, now: Instant) {
        debug_assert_eq!(segment.seq_num, self.next_seq_num);
        self.timers.insert(segment.seq_num, now);
        self.buffer.insert(segment.seq_num, segment);
        self.next_seq_num += 1;
    }

    /// Process a cumulative acknowledgement.
    pub fn on_ack(&mut self, ack_num: u32, _now: Instant) -> AckEvent {
        if ack_num > self.send_base && ack_num <= self.next_seq_num {
            let newly_acked = ack_num - self.send_base;
            for seq in self.send_base..ack_num {
                self.buffer.remove(&seq);
                self.timers.remove(&seq);
            }
            self.send_base = ack_num;
            self.dup_ack_count = 0;
            self.last_ack_num = ack_num;
            return AckEvent::Advanced { newly_acked };
        }

        if ack_num == self.send_base {
            self.dup_ack_count += 1;
            return match self.dup_ack_count.cmp(&DUP_ACK_THRESHOLD) {
                std::cmp::Ordering::Less => AckEvent::Duplicate {
                    count: self.dup_ack_count,
                },
                std::cmp::Ordering::Equal => AckEvent::TripleDup,
                std::cmp::Ordering::Greater => AckEvent::DupInRecovery,
            };
        }

        // Behind send_base, or claims data we never sent.
        AckEvent::Stale
    }

    /// The oldest unacked segment (the fast-retransmit target).
    pub fn oldest_unacked(&self) -> Option<&Segment> {
        self.buffer.get(&self.send_base)
    }

    /// Restart the retransmission timer for `seq` after a fast retransmit.
    pub fn refresh_timer(&mut self, seq: u32, now: Instant) {
        if self.buffer.contains_key(&seq) {
            self.timers.insert(seq, now);
        }
    }

    /// Expire timers.
    ///
    /// If any in-flight segment's timer has exceeded [`TIMEOUT_INTERVAL`],
    /// returns the whole window `[send_base, next_seq_num)` in ascending seq
    /// order for retransmission and restarts every timer.  At most one
    /// timeout is reported per call, however many timers had expired.
    pub fn check_timeout(&mut self, now: Instant) -> Option<Vec<Segment>> {
        let expired = self
            .timers
            .values()
            .any(|sent_at| now.duration_since(*sent_at) >= TIMEOUT_INTERVAL);
        if !expired {
            return None;
        }

        let batch: Vec<Segment> = self.buffer.values().cloned().collect();
        for sent_at in self.timers.values_mut() {
            *sent_at = now;
        }
        self.dup_ack_count = 0;
        Some(batch)
    }

    /// Invariant check used by tests: `buffer` and `timers` share a key set
    /// and every buffered seq lies in `[send_base, next_seq_num)`.
    #[cfg(test)]
    fn assert_consistent(&self) {
        assert_eq!(self.buffer.len(), self.timers.len());
        for seq in self.buffer.keys() {
            assert!(self.timers.contains_key(seq));
            assert!(self.send_base <= *seq && *seq < self.next_seq_num);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_window(count: u32) -> (SendWindow, Instant) {
        let now = Instant::now();
        let mut w = SendWindow::new(1);
        for _ in 0..count {
            let seg = w.next_segment(1, 8192, vec![0u8; 8]);
            w.record_sent(seg, now);
        }
        w.assert_consistent();
        (w, now)
    }

    #[test]
    fn initial_state() {
        let w = SendWindow::new(1);
        assert_eq!(w.send_base(), 1);
        assert_eq!(w.next_seq_num(), 1);
        assert_eq!(w.in_flight(), 0);
        assert!(!w.has_unacked());
        assert!(w.can_send(1));
    }

    #[test]
    fn record_sent_advances_next_seq() {
        let (w, _) = filled_window(1);
        assert_eq!(w.next_seq_num(), 2);
        assert_eq!(w.send_base(), 1);
        assert_eq!(w.in_flight(), 1);
    }

    #[test]
    fn window_cap_blocks_send() {
        let (w, _) = filled_window(4);
        assert!(!w.can_send(4));
        assert!(w.can_send(5));
    }

    #[test]
    fn cumulative_ack_removes_covered_segments() {
        let (mut w, now) = filled_window(3);
        let ev = w.on_ack(3, now);
        assert_eq!(ev, AckEvent::Advanced { newly_acked: 2 });
        assert_eq!(w.send_base(), 3);
        assert_eq!(w.in_flight(), 1);
        w.assert_consistent();
    }

    #[test]
    fn full_ack_empties_window() {
        let (mut w, now) = filled_window(3);
        let ev = w.on_ack(4, now);
        assert_eq!(ev, AckEvent::Advanced { newly_acked: 3 });
        assert!(!w.has_unacked());
        w.assert_consistent();
    }

    #[test]
    fn duplicate_acks_escalate_to_fast_retransmit() {
        let (mut w, now) = filled_window(3);
        assert_eq!(w.on_ack(1, now), AckEvent::Duplicate { count: 1 });
        assert_eq!(w.on_ack(1, now), AckEvent::Duplicate { count: 2 });
        assert_eq!(w.on_ack(1, now), AckEvent::TripleDup);
        assert_eq!(w.on_ack(1, now), AckEvent::DupInRecovery);
        assert_eq!(w.on_ack(1, now), AckEvent::DupInRecovery);
    }

    #[test]
    fn advance_resets_duplicate_count() {
        let (mut w, now) = filled_window(3);
        w.on_ack(1, now);
        w.on_ack(1, now);
        assert!(matches!(w.on_ack(2, now), AckEvent::Advanced { .. }));
        // Counter restarts: the next duplicate is the first again.
        assert_eq!(w.on_ack(2, now), AckEvent::Duplicate { count: 1 });
    }

    #[test]
    fn stale_ack_is_ignored() {
        let (mut w, now) = filled_window(2);
        w.on_ack(3, now);
        assert_eq!(w.on_ack(2, now), AckEvent::Stale);
        assert_eq!(w.send_base(), 3, "send_base must not regress");
    }

    #[test]
    fn ack_beyond_next_seq_is_ignored() {
        let (mut w, now) = filled_window(2);
        assert_eq!(w.on_ack(100, now), AckEvent::Stale);
        assert_eq!(w.send_base(), 1);
        w.assert_consistent();
    }

    #[test]
    fn replayed_ack_does_not_regress_send_base() {
        let (mut w, now) = filled_window(3);
        w.on_ack(4, now);
        assert_eq!(w.on_ack(4, now), AckEvent::Duplicate { count: 1 });
        assert_eq!(w.send_base(), 4);
    }

    #[test]
    fn oldest_unacked_is_send_base() {
        let (mut w, now) = filled_window(3);
        w.on_ack(2, now);
        assert_eq!(w.oldest_unacked().map(|s| s.seq_num), Some(2));
    }

    #[test]
    fn timeout_retransmits_whole_window_in_order() {
        let (mut w, now) = filled_window(4);
        let later = now + TIMEOUT_INTERVAL;
        let batch = w.check_timeout(later).expect("timers expired");
        let seqs: Vec<u32> = batch.iter().map(|s| s.seq_num).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        w.assert_consistent();
    }

    #[test]
    fn timeout_restarts_all_timers() {
        let (mut w, now) = filled_window(2);
        let later = now + TIMEOUT_INTERVAL;
        assert!(w.check_timeout(later).is_some());
        // Timers were reset to `later`; no further timeout until another
        // full interval elapses.
        assert!(w.check_timeout(later + Duration::from_millis(500)).is_none());
        assert!(w.check_timeout(later + TIMEOUT_INTERVAL).is_some());
    }

    #[test]
    fn no_timeout_before_interval() {
        let (mut w, now) = filled_window(2);
        assert!(w.check_timeout(now + Duration::from_millis(999)).is_none());
    }

    #[test]
    fn empty_window_never_times_out() {
        let mut w = SendWindow::new(1);
        assert!(w.check_timeout(Instant::now() + TIMEOUT_INTERVAL).is_none());
    }

    #[test]
    fn fast_retransmit_refresh_only_touches_live_timer() {
        let (mut w, now) = filled_window(2);
        w.on_ack(3, now); // drain everything
        w.refresh_timer(1, now); // seq 1 no longer buffered
        w.assert_consistent();
    }
}
