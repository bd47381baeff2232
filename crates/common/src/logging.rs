//! Logging setup and configuration

use crate::log_ring::LogRingBuffer;
use std::io;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Setup tracing subscriber for the application
///
/// When `ring` is given, every formatted log line is also appended to it so
/// diagnostic consumers can read or stream recent output.
pub fn setup_logging(default_level: &str, ring: Option<Arc<LogRingBuffer>>) -> crate::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))?;

    let ring_layer = ring.map(|ring| {
        fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(RingWriter::new(ring))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(ring_layer)
        .try_init()
        .map_err(|e| crate::Error::Config(format!("Logging already initialized: {}", e)))?;

    Ok(())
}

/// `MakeWriter` that feeds formatted lines into a [`LogRingBuffer`]
#[derive(Clone)]
pub struct RingWriter {
    ring: Arc<LogRingBuffer>,
}

impl RingWriter {
    pub fn new(ring: Arc<LogRingBuffer>) -> Self {
        Self { ring }
    }
}

impl<'a> MakeWriter<'a> for RingWriter {
    type Writer = RingLineWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RingLineWriter {
            ring: Arc::clone(&self.ring),
            buf: Vec::with_capacity(128),
        }
    }
}

/// Per-event writer; lines are committed to the ring when it is dropped
pub struct RingLineWriter {
    ring: Arc<LogRingBuffer>,
    buf: Vec<u8>,
}

impl io::Write for RingLineWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for RingLineWriter {
    fn drop(&mut self) {
        let text = String::from_utf8_lossy(&self.buf);
        for line in text.lines() {
            let line = line.trim_end();
            if !line.is_empty() {
                self.ring.write(line);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_ring_writer_splits_lines() {
        let ring = Arc::new(LogRingBuffer::new(8, 64, 1));
        let make = RingWriter::new(Arc::clone(&ring));

        {
            let mut w = make.make_writer();
            w.write_all(b"first line\nsecond").unwrap();
            w.write_all(b" part\n\n").unwrap();
        }

        assert_eq!(ring.dump_all(), vec!["first line", "second part"]);
    }
}
