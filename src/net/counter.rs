use std::io;

/// Byte-counting sink.
///
/// Every chunk written is counted and dropped, so a payload can be measured
/// without ever holding it in memory. The total is only final once the
/// stream feeding it has finished.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SizeCounter {
    total: u64,
}

impl SizeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a chunk. Never fails.
    pub fn record(&mut self, chunk: &[u8]) {
        self.total += chunk.len() as u64;
    }

    /// Bytes counted so far.
    pub fn total(&self) -> u64 {
        self.total
    }
}

impl io::Write for SizeCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.record(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
