//! Reordering buffer for concurrent page results.
//!
//! Worker threads finish pages out of order (page 7 might finish before page 3), but the
//! writer must lay pages down in a predictable sequence to keep progress reporting and
//! short-circuit error handling simple. The buffer holds "future" pages until the "next
//! expected" page arrives, then releases a contiguous run at once.

use hashbrown::HashMap;

use crate::types::PageResult;

/// A buffer that holds completed page results and releases them in page-number order.
pub struct Buffer {
    /// Storage for out-of-order results, keyed by page number.
    buffer: HashMap<u32, PageResult>,
    /// The page number of the next result expected to be written.
    next_pgno: u32,
}

impl Buffer {
    /// Creates a new reordering buffer starting at the given page number.
    #[inline]
    pub fn new(start: u32) -> Self {
        Self { buffer: HashMap::new(), next_pgno: start }
    }

    /// Adds a result to the buffer and returns any contiguous run now available, in order.
    #[must_use]
    #[inline]
    pub fn add(&mut self, result: PageResult) -> Vec<PageResult> {
        self.buffer.insert(result.page_no, result);

        let mut ready = Vec::new();
        while let Some(result) = self.buffer.remove(&self.next_pgno) {
            ready.push(result);
            self.next_pgno += 1;
        }
        ready
    }

    /// Flushes all remaining items, sorted by page number, regardless of contiguity. Called
    /// once the reader has signalled no more pages are coming.
    #[must_use]
    #[inline]
    pub fn flush(&mut self) -> Vec<PageResult> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let mut results: Vec<(u32, PageResult)> = self.buffer.drain().collect();
        results.sort_unstable_by_key(|(pgno, _)| *pgno);
        results.into_iter().map(|(_, result)| result).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_releases_immediately() {
        let mut buffer = Buffer::new(1);

        let out1 = buffer.add(PageResult::ok(1, vec![]));
        assert_eq!(out1.len(), 1);
        assert_eq!(out1[0].page_no, 1);

        let out2 = buffer.add(PageResult::ok(2, vec![]));
        assert_eq!(out2.len(), 1);
        assert_eq!(out2[0].page_no, 2);
    }

    #[test]
    fn out_of_order_waits_for_gap_to_close() {
        let mut buffer = Buffer::new(1);

        let out3 = buffer.add(PageResult::ok(3, vec![]));
        assert!(out3.is_empty());

        let out1 = buffer.add(PageResult::ok(1, vec![]));
        assert_eq!(out1.len(), 1);
        assert_eq!(out1[0].page_no, 1);

        let out2 = buffer.add(PageResult::ok(2, vec![]));
        assert_eq!(out2.len(), 2);
        assert_eq!(out2[0].page_no, 2);
        assert_eq!(out2[1].page_no, 3);
    }

    #[test]
    fn flush_drains_remaining_sorted() {
        let mut buffer = Buffer::new(1);
        let _ = buffer.add(PageResult::ok(5, vec![]));
        let _ = buffer.add(PageResult::ok(3, vec![]));

        let flushed = buffer.flush();
        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[0].page_no, 3);
        assert_eq!(flushed[1].page_no, 5);
    }
}
