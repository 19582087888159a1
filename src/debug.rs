//! Real-time safe logging for the compressor.
//!
//! `comp_log!` formats into a fixed-size entry and pushes it onto a lock-free
//! single-producer ring; nothing is allocated on the audio thread. The plugin
//! schedules [`drain`] as a background task every [`DRAIN_INTERVAL_BLOCKS`]
//! blocks, which forwards queued lines to the `log` facade before the ring
//! fills. Without the `debug` feature the macro compiles to nothing.

use std::fmt;

#[cfg(feature = "debug")]
pub mod logger {
    use std::cell::UnsafeCell;
    use std::fmt;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::OnceLock;

    const LOG_CAP: usize = 256;
    const LOG_MSG_MAX: usize = 256;

    #[derive(Copy, Clone)]
    struct LogEntry {
        len: u16,
        bytes: [u8; LOG_MSG_MAX],
    }

    impl Default for LogEntry {
        fn default() -> Self {
            Self {
                len: 0,
                bytes: [0; LOG_MSG_MAX],
            }
        }
    }

    pub(super) struct LogRing {
        head: AtomicUsize,
        tail: AtomicUsize,
        buf: Box<[UnsafeCell<LogEntry>]>,
    }

    // One producer (audio thread) and one consumer (drain) per ring.
    unsafe impl Sync for LogRing {}

    impl LogRing {
        pub(super) fn new() -> Self {
            let buf: Vec<UnsafeCell<LogEntry>> = (0..LOG_CAP)
                .map(|_| UnsafeCell::new(LogEntry::default()))
                .collect();
            Self {
                head: AtomicUsize::new(0),
                tail: AtomicUsize::new(0),
                buf: buf.into_boxed_slice(),
            }
        }

        /// Drops the entry when full.
        pub(super) fn push(&self, entry: &FixedBuf) {
            let cap = self.buf.len();
            let head = self.head.load(Ordering::Relaxed);
            let next = (head + 1) % cap;
            if next == self.tail.load(Ordering::Acquire) {
                return;
            }
            unsafe {
                let slot = &mut *self.buf[head].get();
                slot.len = entry.len as u16;
                slot.bytes[..entry.len].copy_from_slice(&entry.buf[..entry.len]);
            }
            self.head.store(next, Ordering::Release);
        }

        fn pop(&self) -> Option<LogEntry> {
            let cap = self.buf.len();
            let tail = self.tail.load(Ordering::Relaxed);
            if tail == self.head.load(Ordering::Acquire) {
                return None;
            }
            let entry = unsafe { *self.buf[tail].get() };
            self.tail.store((tail + 1) % cap, Ordering::Release);
            Some(entry)
        }
    }

    static LOGGER: OnceLock<LogRing> = OnceLock::new();
    static LOG_ENABLED: AtomicBool = AtomicBool::new(false);

    /// Allocates the ring. Call from `initialize`, never from `process`.
    pub fn init_logger() {
        let _ = LOGGER.get_or_init(LogRing::new);
        LOG_ENABLED.store(true, Ordering::Relaxed);
    }

    pub(super) struct FixedBuf {
        buf: [u8; LOG_MSG_MAX],
        len: usize,
    }

    impl FixedBuf {
        pub(super) fn new() -> Self {
            Self {
                buf: [0; LOG_MSG_MAX],
                len: 0,
            }
        }
    }

    impl fmt::Write for FixedBuf {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            let avail = LOG_MSG_MAX - self.len;
            if avail == 0 {
                return Ok(());
            }
            // Truncate on a char boundary so drained lines stay valid UTF-8.
            let mut n = s.len().min(avail);
            while !s.is_char_boundary(n) {
                n -= 1;
            }
            self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
            self.len += n;
            Ok(())
        }
    }

    pub fn log_args(args: fmt::Arguments) {
        if !LOG_ENABLED.load(Ordering::Relaxed) {
            return;
        }
        let logger = match LOGGER.get() {
            Some(l) => l,
            None => return,
        };

        let mut buf = FixedBuf::new();
        let _ = fmt::write(&mut buf, args);
        logger.push(&buf);
    }

    /// Hand every queued line to `sink`. Returns the number drained.
    pub(super) fn drain_ring(ring: &LogRing, mut sink: impl FnMut(&str)) -> usize {
        let mut count = 0;
        while let Some(entry) = ring.pop() {
            let len = entry.len as usize;
            if len == 0 {
                continue;
            }
            sink(std::str::from_utf8(&entry.bytes[..len]).unwrap_or("<invalid>"));
            count += 1;
        }
        count
    }

    /// Forward every queued line to `log::debug!`. Returns the number drained.
    pub fn drain() -> usize {
        match LOGGER.get() {
            Some(l) => drain_ring(l, |msg| log::debug!(target: "compressor::rt", "{}", msg)),
            None => 0,
        }
    }
}

#[cfg(feature = "debug")]
pub(crate) fn comp_log_inner(args: fmt::Arguments) {
    logger::log_args(args);
}

#[cfg(not(feature = "debug"))]
pub(crate) fn comp_log_inner(_args: fmt::Arguments) {}

#[cfg(feature = "debug")]
pub fn init() {
    logger::init_logger();
}

#[cfg(not(feature = "debug"))]
pub fn init() {}

/// Drain queued real-time log lines. No-op without the `debug` feature.
#[cfg(feature = "debug")]
pub fn drain() -> usize {
    logger::drain()
}

#[cfg(not(feature = "debug"))]
pub fn drain() -> usize {
    0
}

/// Process blocks between background drains. The ring holds 255 lines, and
/// the engine emits at most a few per block.
pub const DRAIN_INTERVAL_BLOCKS: u32 = 64;

/// Counts process blocks and says when the next background drain is due.
#[derive(Debug, Default)]
pub struct DrainSchedule {
    blocks: u32,
}

impl DrainSchedule {
    /// Count one block. True once every [`DRAIN_INTERVAL_BLOCKS`] calls.
    pub fn tick(&mut self) -> bool {
        self.blocks += 1;
        if self.blocks >= DRAIN_INTERVAL_BLOCKS {
            self.blocks = 0;
            true
        } else {
            false
        }
    }
}

#[macro_export]
macro_rules! comp_log {
    ($($arg:tt)*) => {
        $crate::debug::comp_log_inner(format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_schedule_fires_every_interval() {
        let mut schedule = DrainSchedule::default();
        let fired: Vec<u32> = (1..=3 * DRAIN_INTERVAL_BLOCKS)
            .filter(|_| schedule.tick())
            .collect();
        assert_eq!(
            fired,
            vec![
                DRAIN_INTERVAL_BLOCKS,
                2 * DRAIN_INTERVAL_BLOCKS,
                3 * DRAIN_INTERVAL_BLOCKS
            ]
        );
    }

    #[cfg(feature = "debug")]
    #[test]
    fn test_ring_round_trip() {
        init();
        crate::comp_log!("gain reduction {:.1} dB", -6.0f32);
        crate::comp_log!("{}", "x".repeat(1000));
        assert!(drain() >= 2);
    }

    #[cfg(feature = "debug")]
    fn push_line(ring: &logger::LogRing, i: usize) {
        let mut buf = logger::FixedBuf::new();
        let _ = fmt::write(&mut buf, format_args!("block {}", i));
        ring.push(&buf);
    }

    #[cfg(feature = "debug")]
    #[test]
    fn test_periodic_drain_keeps_every_line() {
        let ring = logger::LogRing::new();
        let mut lines = Vec::new();
        let mut drained = 0;
        for i in 0..1000 {
            push_line(&ring, i);
            if (i + 1) % 100 == 0 {
                drained += logger::drain_ring(&ring, |msg| lines.push(msg.to_string()));
            }
        }
        assert_eq!(drained, 1000);
        assert_eq!(lines[0], "block 0");
        assert_eq!(lines[999], "block 999");
    }

    #[cfg(feature = "debug")]
    #[test]
    fn test_undrained_ring_drops_overflow() {
        let ring = logger::LogRing::new();
        for i in 0..1000 {
            push_line(&ring, i);
        }
        assert_eq!(logger::drain_ring(&ring, |_| {}), 255);
    }
}
