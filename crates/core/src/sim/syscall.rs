//! Emulator syscall I/O.
//!
//! The engine performs syscalls only at the retire boundary and receives
//! these handles as parameters, never through globals. `write` is
//! non-blocking; `read` blocks the emulator on the underlying reader and
//! buffers whatever arrives beyond the requested size for the next call.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

/// Syscall numbers, selected through `a7`.
pub mod numbers {
    /// `exit(status)`.
    pub const EXIT: i32 = -1;
    /// `write(buf_ptr, size)`.
    pub const WRITE: i32 = -2;
    /// `read(buf_ptr, size)`.
    pub const READ: i32 = -3;
}

/// Console handles owned by the emulator.
pub struct EmuIo {
    reader: Box<dyn Read>,
    writer: Box<dyn Write>,
    /// Input read from the reader but not yet consumed by the guest.
    pending: VecDeque<u8>,
}

impl EmuIo {
    /// Creates I/O over arbitrary reader/writer handles.
    pub fn new(reader: Box<dyn Read>, writer: Box<dyn Write>) -> Self {
        Self {
            reader,
            writer,
            pending: VecDeque::new(),
        }
    }

    /// Standard console I/O.
    pub fn stdio() -> Self {
        Self::new(Box::new(io::stdin()), Box::new(io::stdout()))
    }

    /// Fixed input with captured output, for tests and scripted runs.
    /// Returns the I/O object and a handle observing everything written.
    pub fn capture(input: &[u8]) -> (Self, OutputCapture) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let capture = OutputCapture {
            buffer: Arc::clone(&buffer),
        };
        let io = Self::new(
            Box::new(io::Cursor::new(input.to_vec())),
            Box::new(CaptureWriter { buffer }),
        );
        (io, capture)
    }

    /// `read`: returns up to `max` bytes, blocking on the reader when the
    /// pending buffer is empty. An empty result means end of input.
    pub fn syscall_read(&mut self, max: usize) -> io::Result<Vec<u8>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        if self.pending.is_empty() {
            let mut chunk = [0u8; 4096];
            let n = self.reader.read(&mut chunk)?;
            self.pending.extend(&chunk[..n]);
        }
        let take = max.min(self.pending.len());
        Ok(self.pending.drain(..take).collect())
    }

    /// `write`: emits bytes to the console without blocking the guest.
    pub fn syscall_write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()
    }
}

impl std::fmt::Debug for EmuIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmuIo")
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// Observer handle for output written through [`EmuIo::capture`].
#[derive(Clone)]
pub struct OutputCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl OutputCapture {
    /// Everything the guest has written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.buffer.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// Everything written, as lossy UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

struct CaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Ok(mut b) = self.buffer.lock() {
            b.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_buffers_remainder() {
        let (mut io, _) = EmuIo::capture(b"hello world");
        let first = io.syscall_read(5).unwrap();
        assert_eq!(first, b"hello");
        let rest = io.syscall_read(64).unwrap();
        assert_eq!(rest, b" world");
        assert_eq!(io.syscall_read(4).unwrap(), b"");
    }

    #[test]
    fn test_write_captures() {
        let (mut io, out) = EmuIo::capture(b"");
        io.syscall_write(b"Hello").unwrap();
        io.syscall_write(b" World").unwrap();
        assert_eq!(out.text(), "Hello World");
    }
}
