//! # Half-Duplex Transceiver
//!
//! Owns the physical serial line together with its direction pins and
//! arbitrates between transmitting and receiving.
//!
//! One mutex covers the port, the pins and the current [`Direction`]. A send
//! holds it for the whole transaction (switch, write, drain, switch back), so
//! a concurrent [`poll_receive`](HalfDuplexTransceiver::poll_receive) can
//! never observe the line mid-transmit or read our own echo.
//!
//! Peer bytes that are pending when a send starts are moved aside and handed
//! out by the next poll; only as many bytes as were written are dropped as
//! echo.

use std::borrow::Cow;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tracing::{debug, trace, warn};

use super::direction::{Direction, DirectionControl};
use super::port_trait::SerialLine;
use super::timer::{wire_time, Delay};
use crate::error::Result;

/// Timing of the line and its direction switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineTiming {
    pub baud_rate: u32,
    /// Wait after every direction change
    pub settle: Duration,
    /// Margin added to the computed wire time before switching back
    pub tx_tail: Duration,
}

struct LineState {
    port: Box<dyn SerialLine>,
    control: DirectionControl,
    direction: Direction,
    /// Peer bytes read off the port during a send, not yet polled
    carry: BytesMut,
}

/// Exclusive-access half-duplex serial line
pub struct HalfDuplexTransceiver {
    line: Mutex<LineState>,
    timing: LineTiming,
    invert: bool,
    delay: Box<dyn Delay>,
}

impl std::fmt::Debug for HalfDuplexTransceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HalfDuplexTransceiver")
            .field("timing", &self.timing)
            .field("invert", &self.invert)
            .finish_non_exhaustive()
    }
}

impl HalfDuplexTransceiver {
    /// Take ownership of the line and put it in RECEIVE
    ///
    /// # Errors
    ///
    /// Returns error if the direction pins cannot be driven.
    pub fn new(
        port: Box<dyn SerialLine>,
        control: DirectionControl,
        timing: LineTiming,
        invert: bool,
        delay: Box<dyn Delay>,
    ) -> Result<Self> {
        let transceiver = Self {
            line: Mutex::new(LineState {
                port,
                control,
                direction: Direction::Receive,
                carry: BytesMut::new(),
            }),
            timing,
            invert,
            delay,
        };

        {
            let mut line = transceiver.lock();
            transceiver.switch(&mut line, Direction::Receive)?;
        }

        Ok(transceiver)
    }

    fn lock(&self) -> MutexGuard<'_, LineState> {
        // A panic mid-send leaves the port itself usable; the next switch
        // re-establishes the pin levels.
        self.line.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn switch(&self, line: &mut LineState, direction: Direction) -> Result<()> {
        line.control.apply(direction)?;
        line.direction = direction;
        self.delay.delay(self.timing.settle);
        Ok(())
    }

    /// Transmit `data` and return the line to RECEIVE
    ///
    /// The line is back in RECEIVE when this returns, even if the write
    /// failed. On switched wiring, input pending before the write is kept
    /// for the next poll and at most `data.len()` echoed bytes are dropped.
    ///
    /// # Errors
    ///
    /// Returns the first failure among switching, writing, draining and
    /// switching back.
    pub fn send(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let out: Cow<'_, [u8]> = if self.invert {
            Cow::Owned(data.iter().map(|b| !b).collect())
        } else {
            Cow::Borrowed(data)
        };

        let mut line = self.lock();

        // Pins may be half switched on failure: still try to restore RECEIVE
        if let Err(e) = self.switch(&mut line, Direction::Transmit) {
            if let Err(restore) = self.switch(&mut line, Direction::Receive) {
                warn!("Failed to restore RECEIVE: {}", restore);
            }
            return Err(e);
        }

        // Without a direction switch the wiring is full duplex: no echo to drop
        let switched = line.control.is_switched();

        let stashed = if switched { stash_pending(&mut line) } else { Ok(()) };
        let written = stashed
            .and_then(|()| line.port.write_all(&out))
            .and_then(|()| line.port.flush());
        if written.is_ok() {
            self.delay
                .delay(wire_time(out.len(), self.timing.baud_rate) + self.timing.tx_tail);
        }

        let echo_dropped = if switched && written.is_ok() {
            discard_echo(&mut line, out.len())
        } else {
            Ok(())
        };

        let restored = self.switch(&mut line, Direction::Receive);

        written?;
        echo_dropped?;
        restored?;

        trace!("Serial TX {:02X?}", data);
        Ok(())
    }

    /// Read whatever has already arrived, without waiting
    ///
    /// Bytes set aside by an earlier send come first. Returns `Ok(0)` when
    /// nothing is pending.
    pub fn poll_receive(&self, buf: &mut [u8]) -> Result<usize> {
        let mut line = self.lock();

        if line.direction != Direction::Receive {
            debug!("Line not in RECEIVE, skipping poll");
            return Ok(0);
        }

        let mut n = line.carry.len().min(buf.len());
        if n > 0 {
            buf[..n].copy_from_slice(&line.carry[..n]);
            line.carry.advance(n);
        }

        if n < buf.len() {
            let available = line.port.bytes_available()?;
            if available > 0 {
                let want = available.min(buf.len() - n);
                n += line.port.read(&mut buf[n..n + want])?;
            }
        }
        drop(line);

        if self.invert {
            buf[..n].iter_mut().for_each(|b| *b = !*b);
        }

        Ok(n)
    }

    pub fn direction(&self) -> Direction {
        self.lock().direction
    }
}

/// Move everything the port holds into the carry buffer
fn stash_pending(line: &mut LineState) -> std::io::Result<()> {
    let available = line.port.bytes_available()?;
    if available == 0 {
        return Ok(());
    }

    let start = line.carry.len();
    line.carry.resize(start + available, 0);
    let n = line.port.read(&mut line.carry[start..])?;
    line.carry.truncate(start + n);
    trace!("Kept {} pending bytes across send", n);
    Ok(())
}

/// Drop up to `max` bytes of our own echo
fn discard_echo(line: &mut LineState, max: usize) -> std::io::Result<()> {
    let available = line.port.bytes_available()?.min(max);
    if available == 0 {
        return Ok(());
    }

    let mut scratch = vec![0u8; available];
    let n = line.port.read(&mut scratch)?;
    trace!("Dropped {} echo bytes", n);
    Ok(())
}

impl Drop for HalfDuplexTransceiver {
    fn drop(&mut self) {
        let line = self.line.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = line.control.apply(Direction::Receive) {
            warn!("Failed to leave line in RECEIVE: {}", e);
        }
        line.direction = Direction::Receive;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::direction::MockOutputLine;
    use crate::serial::port_trait::mocks::{MockSerialLine, MirrorLine};
    use crate::serial::timer::{MockDelay, MonotonicDelay};
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn timing() -> LineTiming {
        LineTiming {
            baud_rate: 416_666,
            settle: Duration::from_micros(20),
            tx_tail: Duration::from_micros(20),
        }
    }

    /// Transceiver on a mock line with a single monitored DIR pin
    fn monitored(line: MockSerialLine, invert: bool) -> (HalfDuplexTransceiver, Arc<AtomicBool>) {
        let pin = MirrorLine::default();
        let level = Arc::clone(&pin.level);
        let line = line.monitored(Arc::clone(&level));
        let transceiver = HalfDuplexTransceiver::new(
            Box::new(line),
            DirectionControl::Single(Box::new(pin)),
            timing(),
            invert,
            Box::new(MonotonicDelay),
        )
        .unwrap();
        (transceiver, level)
    }

    #[test]
    fn test_starts_in_receive() {
        let (transceiver, level) = monitored(MockSerialLine::new(), false);
        assert_eq!(transceiver.direction(), Direction::Receive);
        assert!(!level.load(Ordering::SeqCst));
    }

    #[test]
    fn test_send_writes_and_returns_to_receive() {
        let line = MockSerialLine::with_echo();
        let (transceiver, level) = monitored(line.clone(), false);

        transceiver.send(&[0xC8, 0x02, 0x0B, 0x00]).unwrap();

        assert_eq!(line.get_written_data(), vec![vec![0xC8, 0x02, 0x0B, 0x00]]);
        assert_eq!(transceiver.direction(), Direction::Receive);
        assert!(!level.load(Ordering::SeqCst));
        // Echo was dropped
        assert_eq!(line.pending_input(), 0);
        assert_eq!(line.violations(), 0);
    }

    #[test]
    fn test_failed_write_still_returns_to_receive() {
        let line = MockSerialLine::new();
        line.set_write_error(io::ErrorKind::BrokenPipe);
        let (transceiver, level) = monitored(line, false);

        assert!(transceiver.send(&[1, 2, 3]).is_err());
        assert_eq!(transceiver.direction(), Direction::Receive);
        assert!(!level.load(Ordering::SeqCst));
    }

    #[test]
    fn test_poll_receive_reads_available_bytes() {
        let line = MockSerialLine::new();
        let (transceiver, _) = monitored(line.clone(), false);
        let mut buf = [0u8; 64];

        assert_eq!(transceiver.poll_receive(&mut buf).unwrap(), 0);

        line.inject(&[0xEE, 0x04, 0x28]);
        assert_eq!(transceiver.poll_receive(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[0xEE, 0x04, 0x28]);

        // Small buffers take what fits, the rest stays pending
        line.inject(&[1, 2, 3, 4]);
        let mut small = [0u8; 3];
        assert_eq!(transceiver.poll_receive(&mut small).unwrap(), 3);
        assert_eq!(line.pending_input(), 1);
    }

    #[test]
    fn test_inversion_applies_both_ways() {
        let line = MockSerialLine::new();
        let (transceiver, _) = monitored(line.clone(), true);

        transceiver.send(&[0x00, 0xC8]).unwrap();
        assert_eq!(line.get_written_data(), vec![vec![0xFF, 0x37]]);

        line.inject(&[0x37, 0xFF]);
        let mut buf = [0u8; 8];
        let n = transceiver.poll_receive(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0xC8, 0x00]);
    }

    #[test]
    fn test_read_error_is_propagated() {
        let line = MockSerialLine::new();
        line.set_read_error(io::ErrorKind::TimedOut);
        let (transceiver, _) = monitored(line, false);

        let mut buf = [0u8; 8];
        assert!(transceiver.poll_receive(&mut buf).is_err());
    }

    #[test]
    fn test_unpolled_peer_bytes_survive_send() {
        let line = MockSerialLine::with_echo();
        let (transceiver, _) = monitored(line.clone(), false);

        line.inject(&[1, 2, 3, 4, 5]);
        transceiver.send(&[0xC8, 0x02, 0x0B, 0x00]).unwrap();

        let mut small = [0u8; 3];
        assert_eq!(transceiver.poll_receive(&mut small).unwrap(), 3);
        assert_eq!(small, [1, 2, 3]);

        let mut buf = [0u8; 64];
        let n = transceiver.poll_receive(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[4, 5]);
        assert_eq!(transceiver.poll_receive(&mut buf).unwrap(), 0);
        assert_eq!(line.violations(), 0);
    }

    #[test]
    fn test_peer_bytes_around_send_are_kept() {
        let line = MockSerialLine::with_echo();
        let pin = MirrorLine::default();

        // Every settle and the wire wait see one more peer byte arrive
        let mut delay = MockDelay::new();
        {
            let line = line.clone();
            delay.expect_delay().returning(move |_| line.inject(&[0x77]));
        }

        let transceiver = HalfDuplexTransceiver::new(
            Box::new(line.clone()),
            DirectionControl::Single(Box::new(pin)),
            timing(),
            false,
            Box::new(delay),
        )
        .unwrap();
        transceiver.send(&[0xAA, 0xAA, 0xAA]).unwrap();

        let mut buf = [0u8; 64];
        let n = transceiver.poll_receive(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x77; 4]);
    }

    #[test]
    fn test_full_duplex_keeps_input() {
        let line = MockSerialLine::new();
        let transceiver = HalfDuplexTransceiver::new(
            Box::new(line.clone()),
            DirectionControl::None,
            timing(),
            false,
            Box::new(MonotonicDelay),
        )
        .unwrap();

        line.inject(&[9, 9]);
        transceiver.send(&[1]).unwrap();
        assert_eq!(line.pending_input(), 2);
    }

    #[test]
    fn test_send_timing_sequence() {
        let timing = LineTiming {
            baud_rate: 10_000,
            settle: Duration::from_micros(100),
            tx_tail: Duration::from_micros(50),
        };

        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut delay = MockDelay::new();
        {
            let calls = Arc::clone(&calls);
            delay
                .expect_delay()
                .times(4)
                .returning(move |d| calls.lock().unwrap().push(d));
        }

        let transceiver = HalfDuplexTransceiver::new(
            Box::new(MockSerialLine::new()),
            DirectionControl::None,
            timing,
            false,
            Box::new(delay),
        )
        .unwrap();
        transceiver.send(&[1, 2, 3]).unwrap();

        // Initial RECEIVE settle, TRANSMIT settle, 3 bytes at 10 kbaud plus
        // tail, RECEIVE settle
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                timing.settle,
                timing.settle,
                Duration::from_micros(3_050),
                timing.settle,
            ]
        );
    }

    #[test]
    fn test_pin_failure_restores_receive() {
        let levels = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut dir = MockOutputLine::new();
        {
            let levels = Arc::clone(&levels);
            dir.expect_set().returning(move |high| {
                levels.lock().unwrap().push(high);
                if high {
                    Err(crate::error::BridgeError::Gpio("stuck".to_string()))
                } else {
                    Ok(())
                }
            });
        }

        let line = MockSerialLine::new();
        let transceiver = HalfDuplexTransceiver::new(
            Box::new(line.clone()),
            DirectionControl::Single(Box::new(dir)),
            timing(),
            false,
            Box::new(MonotonicDelay),
        )
        .unwrap();

        assert!(transceiver.send(&[1]).is_err());
        assert!(line.get_written_data().is_empty());
        assert_eq!(transceiver.direction(), Direction::Receive);
        assert_eq!(*levels.lock().unwrap(), vec![false, true, false]);
    }

    #[test]
    fn test_concurrent_send_and_receive_are_exclusive() {
        let line = MockSerialLine::with_echo();
        let (transceiver, level) = monitored(line.clone(), false);
        let transceiver = Arc::new(transceiver);
        let stop = Arc::new(AtomicBool::new(false));

        let sender = {
            let transceiver = Arc::clone(&transceiver);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    transceiver.send(&[0xAA; 8]).unwrap();
                }
            })
        };

        // The far end only talks while our pin says RECEIVE
        let remote = {
            let line = line.clone();
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let mut injected = 0usize;
                while !stop.load(Ordering::SeqCst) {
                    {
                        let mut input = line.input.lock().unwrap();
                        if !level.load(Ordering::SeqCst) {
                            input.push_back(0x55);
                            injected += 1;
                        }
                    }
                    std::thread::yield_now();
                }
                injected
            })
        };

        let receiver = {
            let transceiver = Arc::clone(&transceiver);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let mut seen = Vec::new();
                let mut buf = [0u8; 64];
                while !stop.load(Ordering::SeqCst) {
                    let n = transceiver.poll_receive(&mut buf).unwrap();
                    seen.extend_from_slice(&buf[..n]);
                }
                seen
            })
        };

        sender.join().unwrap();
        stop.store(true, Ordering::SeqCst);
        let injected = remote.join().unwrap();
        let mut seen = receiver.join().unwrap();

        let mut buf = [0u8; 64];
        loop {
            let n = transceiver.poll_receive(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            seen.extend_from_slice(&buf[..n]);
        }

        assert!(seen.iter().all(|&b| b == 0x55), "receive path saw transmitted bytes");
        assert_eq!(seen.len(), injected, "peer bytes were lost");
        assert_eq!(line.violations(), 0);
        assert_eq!(transceiver.direction(), Direction::Receive);
    }
}
