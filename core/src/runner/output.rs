/// Merged process output awaiting delivery to the server.
///
/// Bytes stay pending until an update carrying them is accepted, so a failed
/// update folds its data into the next one and reported chunks never overlap.
#[derive(Debug, Default)]
pub struct OutputAccumulator {
    pending: Vec<u8>,
    chunk_start: u64,
}

impl OutputAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Offset of the first pending byte, i.e. the number of bytes accepted.
    pub fn chunk_start(&self) -> u64 {
        self.chunk_start
    }

    /// Total bytes captured so far.
    pub fn total(&self) -> u64 {
        self.chunk_start + self.pending.len() as u64
    }

    /// The next chunk to report: at most `max` pending bytes.
    pub fn peek(&self, max: usize) -> &[u8] {
        &self.pending[..self.pending.len().min(max)]
    }

    /// Drops the first `len` pending bytes after the server accepted them.
    pub fn commit(&mut self, len: usize) {
        let len = len.min(self.pending.len());
        self.pending.drain(..len);
        self.chunk_start += len as u64;
    }
}
