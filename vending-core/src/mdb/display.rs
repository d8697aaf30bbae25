//! Display-frame encoding and the pending-display queue.
//!
//! Lines are always exactly [`DISPLAY_LINE_LEN`] bytes, space-padded or
//! truncated. The duration byte is tenths of a second, clamped to
//! `[DISPLAY_DURATION_MIN, DISPLAY_DURATION_MAX]`.

use crate::constants::{DISPLAY_DURATION_MAX, DISPLAY_DURATION_MIN, DISPLAY_LINE_LEN};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A two-line display update destined for the customer-facing VFD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayRequest {
    pub top: String,
    pub bottom: String,
    pub duration: Duration,
    /// Priority requests are shown even while another display is active.
    pub priority: bool,
}

impl DisplayRequest {
    pub fn new(top: impl Into<String>, bottom: impl Into<String>, duration: Duration) -> Self {
        Self {
            top: top.into(),
            bottom: bottom.into(),
            duration,
            priority: false,
        }
    }

    pub fn priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }

    /// Encodes this request into the `0x02 <duration> <line1:16> <line2:16>` payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + 2 * DISPLAY_LINE_LEN);
        buf.push(0x02);
        buf.push(duration_byte(self.duration));
        buf.extend_from_slice(&pad_line(&self.top));
        buf.extend_from_slice(&pad_line(&self.bottom));
        buf
    }
}

fn duration_byte(duration: Duration) -> u8 {
    let tenths = (duration.as_secs_f32() * 10.0).round() as i32;
    tenths.clamp(DISPLAY_DURATION_MIN as i32, DISPLAY_DURATION_MAX as i32) as u8
}

fn pad_line(s: &str) -> [u8; DISPLAY_LINE_LEN] {
    let mut out = [b' '; DISPLAY_LINE_LEN];
    for (slot, b) in out.iter_mut().zip(s.as_bytes().iter().take(DISPLAY_LINE_LEN)) {
        *slot = *b;
    }
    out
}

/// FIFO of pending display requests with priority-aware suppression while a
/// prior display is still being shown.
#[derive(Debug, Default)]
pub struct DisplayQueue {
    queue: VecDeque<DisplayRequest>,
    display_until: Option<Instant>,
}

impl DisplayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `req` unless a non-priority arrival lands while a prior display
    /// is still active.
    pub fn push(&mut self, req: DisplayRequest, now: Instant) {
        if let Some(until) = self.display_until {
            if now < until && !req.priority {
                return;
            }
        }
        self.queue.push_back(req);
    }

    /// Pops the next request to show, recording when it will stop occupying
    /// the display.
    pub fn pop_ready(&mut self, now: Instant) -> Option<DisplayRequest> {
        let req = self.queue.pop_front()?;
        self.display_until = Some(now + req.duration);
        Some(req)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_byte_clamps_bounds() {
        assert_eq!(duration_byte(Duration::from_millis(0)), DISPLAY_DURATION_MIN);
        assert_eq!(duration_byte(Duration::from_secs(60)), DISPLAY_DURATION_MAX);
        assert_eq!(duration_byte(Duration::from_millis(300)), 3);
    }

    #[test]
    fn pad_line_truncates_and_pads() {
        assert_eq!(&pad_line("hi")[..2], b"hi");
        assert_eq!(pad_line("hi")[2], b' ');
        let long = "x".repeat(32);
        assert_eq!(pad_line(&long).len(), DISPLAY_LINE_LEN);
    }

    #[test]
    fn encode_has_expected_layout() {
        let req = DisplayRequest::new("Hello", "World", Duration::from_secs(3));
        let bytes = req.encode();
        assert_eq!(bytes.len(), 2 + 2 * DISPLAY_LINE_LEN);
        assert_eq!(bytes[0], 0x02);
        assert_eq!(bytes[1], 30);
        assert_eq!(&bytes[2..7], b"Hello");
    }

    #[test]
    fn non_priority_suppressed_while_displaying() {
        let mut q = DisplayQueue::new();
        let now = Instant::now();
        q.push(DisplayRequest::new("a", "b", Duration::from_secs(2)), now);
        assert!(q.pop_ready(now).is_some());
        q.push(DisplayRequest::new("c", "d", Duration::from_secs(1)), now);
        assert!(q.is_empty());
    }

    #[test]
    fn priority_request_bypasses_suppression() {
        let mut q = DisplayQueue::new();
        let now = Instant::now();
        q.push(DisplayRequest::new("a", "b", Duration::from_secs(2)), now);
        q.pop_ready(now);
        q.push(
            DisplayRequest::new("c", "d", Duration::from_secs(1)).priority(true),
            now,
        );
        assert!(!q.is_empty());
    }
}
