//! Sequential page writer for the VACUUM-for-rekey rebuild.
//!
//! Reassembles the executor's out-of-order [`PageResult`]s into page-number order via
//! [`crate::worker::buffer::Buffer`] and writes them to the rebuilt file back to back —
//! page 1 occupies the first `page_size` bytes, page 2 the next, and so on, with no
//! length prefix needed since every page is a fixed size.

use std::io::Write;

use flume::Receiver;

use crate::error::{Result, ShimError};
use crate::types::PageResult;
use crate::worker::buffer::Buffer;

pub struct Writer {
    buffer: Buffer,
}

impl Writer {
    #[inline]
    pub fn new() -> Self {
        Self { buffer: Buffer::new(1) }
    }

    /// Consumes results from `receiver`, writing contiguous runs as they become available,
    /// then flushes whatever remains once the channel closes (the executor finished).
    pub fn write_all<W: Write>(&mut self, mut output: W, receiver: Receiver<PageResult>) -> Result<()> {
        while let Ok(result) = receiver.recv() {
            let ready = self.buffer.add(result);
            self.write_batch(&mut output, &ready)?;
        }

        let remaining = self.buffer.flush();
        self.write_batch(&mut output, &remaining)?;
        output.flush().map_err(ShimError::from)
    }

    fn write_batch<W: Write>(&self, output: &mut W, results: &[PageResult]) -> Result<()> {
        for r in results {
            if let Some(err) = &r.error {
                return Err(ShimError::Corrupt(format!("page {} failed to re-encrypt: {err}", r.page_no)));
            }
            output.write_all(&r.data)?;
        }
        Ok(())
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_pages_in_order_despite_out_of_order_arrival() {
        let mut writer = Writer::new();
        let mut output = Vec::new();
        let (tx, rx) = flume::unbounded();

        tx.send(PageResult::ok(2, vec![0x22u8; 4])).unwrap();
        tx.send(PageResult::ok(1, vec![0x11u8; 4])).unwrap();
        drop(tx);

        writer.write_all(&mut output, rx).unwrap();
        assert_eq!(output, vec![0x11, 0x11, 0x11, 0x11, 0x22, 0x22, 0x22, 0x22]);
    }

    #[test]
    fn page_error_aborts_the_write() {
        let mut writer = Writer::new();
        let mut output = Vec::new();
        let (tx, rx) = flume::unbounded();

        tx.send(PageResult { page_no: 1, data: Vec::new(), error: Some("boom".into()) }).unwrap();
        drop(tx);

        assert!(writer.write_all(&mut output, rx).is_err());
    }
}
