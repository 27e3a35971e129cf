//! Trait abstraction for serial line operations to enable testing

use std::io;

/// Blocking byte-level access to a serial line
///
/// Every method returns promptly: reads are only issued for bytes already
/// reported by [`bytes_available`](SerialLine::bytes_available).
pub trait SerialLine: Send {
    /// Write all data to the line
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    fn flush(&mut self) -> io::Result<()>;

    /// Bytes waiting in the input buffer
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Read up to `buf.len()` bytes
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Native port opened through `tokio_serial`
impl SerialLine for Box<dyn tokio_serial::SerialPort> {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut **self, data)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut **self)
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.bytes_to_read()? as usize)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut **self, buf)
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use crate::error::Result;
    use crate::serial::direction::OutputLine;

    /// Mock serial line for testing
    ///
    /// Clones share state, so a test keeps one handle while the transceiver
    /// owns another. With `echo` on, written bytes loop back into the input
    /// buffer the way they do on a single-wire bus.
    #[derive(Clone, Default)]
    pub struct MockSerialLine {
        pub written_data: Arc<Mutex<Vec<Vec<u8>>>>,
        pub input: Arc<Mutex<VecDeque<u8>>>,
        pub echo: Arc<AtomicBool>,
        pub write_error: Arc<Mutex<Option<io::ErrorKind>>>,
        pub read_error: Arc<Mutex<Option<io::ErrorKind>>>,
        /// High while the direction pin says TRANSMIT
        pub transmit_level: Option<Arc<AtomicBool>>,
        /// Writes seen while the pin says RECEIVE
        pub violations: Arc<AtomicUsize>,
    }

    impl MockSerialLine {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_echo() -> Self {
            let line = Self::new();
            line.echo.store(true, Ordering::SeqCst);
            line
        }

        /// Check writes against `level`
        pub fn monitored(mut self, level: Arc<AtomicBool>) -> Self {
            self.transmit_level = Some(level);
            self
        }

        /// Bytes arriving from the far end
        pub fn inject(&self, data: &[u8]) {
            self.input.lock().unwrap().extend(data.iter().copied());
        }

        pub fn get_written_data(&self) -> Vec<Vec<u8>> {
            self.written_data.lock().unwrap().clone()
        }

        pub fn pending_input(&self) -> usize {
            self.input.lock().unwrap().len()
        }

        pub fn set_write_error(&self, error: io::ErrorKind) {
            *self.write_error.lock().unwrap() = Some(error);
        }

        pub fn set_read_error(&self, error: io::ErrorKind) {
            *self.read_error.lock().unwrap() = Some(error);
        }

        pub fn violations(&self) -> usize {
            self.violations.load(Ordering::SeqCst)
        }

        fn transmitting(&self) -> Option<bool> {
            self.transmit_level.as_ref().map(|p| p.load(Ordering::SeqCst))
        }
    }

    impl SerialLine for MockSerialLine {
        fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            if let Some(error) = *self.write_error.lock().unwrap() {
                return Err(io::Error::new(error, "Mock write error"));
            }
            if self.transmitting() == Some(false) {
                self.violations.fetch_add(1, Ordering::SeqCst);
            }
            self.written_data.lock().unwrap().push(data.to_vec());
            if self.echo.load(Ordering::SeqCst) {
                self.inject(data);
            }
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn bytes_available(&mut self) -> io::Result<usize> {
            if let Some(error) = *self.read_error.lock().unwrap() {
                return Err(io::Error::new(error, "Mock read error"));
            }
            Ok(self.pending_input())
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut input = self.input.lock().unwrap();
            let n = buf.len().min(input.len());
            for (slot, byte) in buf.iter_mut().zip(input.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    /// Output line that mirrors its level into a shared flag
    #[derive(Clone, Default)]
    pub struct MirrorLine {
        pub level: Arc<AtomicBool>,
    }

    impl OutputLine for MirrorLine {
        fn set(&mut self, high: bool) -> Result<()> {
            self.level.store(high, Ordering::SeqCst);
            Ok(())
        }
    }
}
