//! Concurrent page executor: bridges the single-threaded reader with a Rayon-backed
//! worker pool so pages are re-encrypted across every available CPU core.
//!
//! The executor itself runs on one thread but fans each [`PageTask`] out via
//! `par_bridge()`; ordering is restored downstream by [`crate::worker::buffer::Buffer`].

use std::sync::Arc;

use flume::{Receiver, Sender};
use rayon::iter::{ParallelBridge, ParallelIterator};

use crate::types::{PageResult, PageTask};
use crate::worker::pipeline::Pipeline;

pub struct Executor {
    /// Arc-wrapped so Rayon's worker threads share one cipher instance read-only.
    pipeline: Arc<Pipeline>,
}

impl Executor {
    #[inline]
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline: Arc::new(pipeline) }
    }

    /// Consumes tasks until `tasks` is closed (the reader finished or errored out).
    /// Send failures on `results` are ignored: they mean the writer already shut down,
    /// which happens on a normal early-exit.
    pub fn process(&self, tasks: &Receiver<PageTask>, results: &Sender<PageResult>) {
        tasks.iter().par_bridge().for_each(|task| {
            let result = self.pipeline.process(&task);
            let _ = results.send(result);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;

    #[test]
    fn processes_every_task_exactly_once() {
        let mut cipher = registry::allocate("aes256cbc").unwrap();
        cipher.generate_key(b"key", false, None).unwrap();
        let reserved = cipher.reserved_bytes();
        let executor = Executor::new(Pipeline::new(cipher, reserved));

        let (task_tx, task_rx) = flume::unbounded();
        let (result_tx, result_rx) = flume::unbounded();

        for page_no in 1..=5u32 {
            task_tx.send(PageTask { page_no, data: vec![0u8; 4096] }).unwrap();
        }
        drop(task_tx);

        executor.process(&task_rx, &result_tx);
        drop(result_tx);

        let mut seen: Vec<u32> = result_rx.iter().map(|r| r.page_no).collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }
}
