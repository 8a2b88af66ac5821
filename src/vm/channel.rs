//! Channels for communication between goroutines.
//!
//! A channel is a bounded FIFO over a circular buffer. It never blocks:
//! callers ask `has_space`/`has_contents` first and suspend when the answer
//! is no, so every operation here completes immediately.

use std::collections::VecDeque;

use super::error::Fault;
use super::value::Value;

/// Index of a channel in the runtime's channel table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChanId(pub u32);

pub struct Channel {
    /// The message queue
    buffer: VecDeque<Value>,
    /// Declared capacity (0 for unbuffered)
    capacity: usize,
    closed: bool,
    /// Value received from a closed, drained channel
    zero: Value,
    /// Number of messages sent
    sent_count: usize,
    /// Number of messages received
    recv_count: usize,
}

impl Channel {
    pub fn new(capacity: usize, zero: Value) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity.max(1)),
            capacity,
            closed: false,
            zero,
            sent_count: 0,
            recv_count: 0,
        }
    }

    /// Slots actually available; unbuffered channels hold one value in flight.
    fn effective_capacity(&self) -> usize {
        self.capacity.max(1)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of messages currently buffered.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn has_space(&self) -> bool {
        !self.closed && self.buffer.len() < self.effective_capacity()
    }

    pub fn has_contents(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Whether a send would complete now (possibly by faulting).
    pub fn can_send(&self) -> bool {
        self.has_space() || self.closed
    }

    /// Whether a receive would complete now.
    pub fn can_recv(&self) -> bool {
        self.has_contents() || self.closed
    }

    /// Enqueue a value. Only valid when [`Channel::can_send`] holds.
    pub fn send(&mut self, value: Value) -> Result<(), Fault> {
        if self.closed {
            return Err(Fault::SendOnClosed);
        }
        debug_assert!(self.buffer.len() < self.effective_capacity());
        self.buffer.push_back(value);
        self.sent_count += 1;
        Ok(())
    }

    /// Dequeue a value with its `ok` flag. `None` means the caller must wait.
    pub fn recv(&mut self) -> Option<(Value, bool)> {
        if let Some(value) = self.buffer.pop_front() {
            self.recv_count += 1;
            return Some((value, true));
        }
        if self.closed {
            return Some((self.zero.clone(), false));
        }
        None
    }

    /// Close the channel. Buffered values stay receivable.
    pub fn close(&mut self) -> Result<(), Fault> {
        if self.closed {
            return Err(Fault::CloseOfClosed);
        }
        self.closed = true;
        Ok(())
    }

    /// Get send/receive statistics.
    pub fn stats(&self) -> (usize, usize) {
        (self.sent_count, self.recv_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut ch = Channel::new(3, Value::Int(0));
        for i in 1..=3 {
            assert!(ch.has_space());
            ch.send(Value::Int(i)).unwrap();
        }
        assert!(!ch.has_space());
        assert_eq!(ch.recv(), Some((Value::Int(1), true)));
        assert_eq!(ch.recv(), Some((Value::Int(2), true)));
        assert_eq!(ch.len(), 1);
        assert_eq!(ch.stats(), (3, 2));
    }

    #[test]
    fn test_unbuffered_holds_one_value() {
        let mut ch = Channel::new(0, Value::Int(0));
        assert!(ch.has_space());
        ch.send(Value::Int(9)).unwrap();
        assert!(!ch.has_space());
        assert!(!ch.can_send());
        assert_eq!(ch.capacity(), 0);
    }

    #[test]
    fn test_empty_recv_waits() {
        let mut ch = Channel::new(1, Value::Int(0));
        assert!(!ch.can_recv());
        assert_eq!(ch.recv(), None);
    }

    #[test]
    fn test_close_drains_then_zero() {
        let mut ch = Channel::new(2, Value::Int(0));
        ch.send(Value::Int(5)).unwrap();
        ch.close().unwrap();
        assert!(!ch.has_space());
        assert!(ch.can_send());
        assert_eq!(ch.recv(), Some((Value::Int(5), true)));
        assert_eq!(ch.recv(), Some((Value::Int(0), false)));
    }

    #[test]
    fn test_occupancy_stays_within_capacity() {
        // Mixed send/recv/close sequences from a fixed LCG.
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
        for capacity in [0, 1, 3] {
            for _ in 0..50 {
                let mut ch = Channel::new(capacity, Value::Int(0));
                let mut closed_len = None;
                for _ in 0..40 {
                    seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                    match (seed >> 33) % 10 {
                        0..=4 if ch.can_send() && !ch.is_closed() => ch.send(Value::Int(1)).unwrap(),
                        5..=8 => {
                            ch.recv();
                        }
                        9 if !ch.is_closed() => ch.close().unwrap(),
                        _ => {}
                    }
                    assert!(ch.len() <= capacity.max(1));
                    if let Some(prev) = closed_len {
                        assert!(ch.len() <= prev);
                    }
                    if ch.is_closed() {
                        closed_len = Some(ch.len());
                    }
                }
            }
        }
    }

    #[test]
    fn test_closed_faults() {
        let mut ch = Channel::new(1, Value::Nil);
        ch.close().unwrap();
        assert!(matches!(ch.send(Value::Nil), Err(Fault::SendOnClosed)));
        assert!(matches!(ch.close(), Err(Fault::CloseOfClosed)));
    }
}
