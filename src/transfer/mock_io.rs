use std::io::{self, Read};

/// Yields its data in reads of at most `chunk` bytes, then fails on read
/// number `fail_after_reads` to simulate a dropped connection.
pub struct PartialReader {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
    fail_after_reads: usize,
    reads: usize,
}

impl PartialReader {
    pub fn new(data: &[u8], chunk: usize, fail_after_reads: usize) -> Self {
        Self { data: data.to_vec(), pos: 0, chunk: chunk.max(1), fail_after_reads, reads: 0 }
    }
}

impl Read for PartialReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.reads >= self.fail_after_reads {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "simulated read failure"));
        }
        self.reads += 1;
        if self.pos >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.chunk).min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
