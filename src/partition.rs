//! Wavefront partitioning of the classifier's inner comparison loop.
//!
//! For each outer iteration the inner index range is split into contiguous
//! near-equal chunks, one chunk per worker, executed on a bounded rayon pool
//! and joined before the outer loop advances.

use std::ops::Range;

use rayon::prelude::*;

use crate::error::{Error, Result};

/// Split `range` into at most `workers` contiguous near-equal chunks.
/// The remainder is spread one element each over the leading chunks; empty
/// chunks are never produced.
pub fn chunk_ranges(range: Range<usize>, workers: usize) -> Vec<Range<usize>> {
    let len = range.len();
    if len == 0 || workers == 0 {
        return Vec::new();
    }
    let workers = workers.min(len);
    let base = len / workers;
    let remainder = len % workers;
    let mut chunks = Vec::with_capacity(workers);
    let mut start = range.start;
    for index in 0..workers {
        let size = base + usize::from(index < remainder);
        chunks.push(start..start + size);
        start += size;
    }
    chunks
}

/// Build the bounded worker pool used for one classification call.
/// A pool that cannot be built fails the whole call.
pub fn build_pool(workers: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|error| Error::ThreadPool(error.to_string()))
}

/// Run one fork-join step: every chunk of `range` is mapped on the pool and
/// the per-chunk outputs are concatenated in chunk order after the join.
pub fn fork_join_map<T, F>(pool: &rayon::ThreadPool, range: Range<usize>, workers: usize, map: F) -> Vec<T>
where
    T: Send,
    F: Fn(Range<usize>) -> Vec<T> + Send + Sync,
{
    let chunks = chunk_ranges(range, workers);
    pool.install(|| {
        chunks
            .into_par_iter()
            .map(|chunk| map(chunk))
            .collect::<Vec<Vec<T>>>()
    })
    .into_iter()
    .flatten()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_are_contiguous_and_near_equal() {
        let chunks = chunk_ranges(3..17, 4);
        assert_eq!(chunks, vec![3..7, 7..11, 11..14, 14..17]);
        let sizes: Vec<usize> = chunks.iter().map(|chunk| chunk.len()).collect();
        assert!(sizes.iter().max().unwrap() - sizes.iter().min().unwrap() <= 1);
    }

    #[test]
    fn test_more_workers_than_items_never_yields_empty_chunks() {
        let chunks = chunk_ranges(0..3, 8);
        assert_eq!(chunks, vec![0..1, 1..2, 2..3]);
        assert!(chunk_ranges(5..5, 4).is_empty());
    }

    #[test]
    fn test_fork_join_preserves_chunk_order() {
        let pool = build_pool(4).unwrap();
        let out = fork_join_map(&pool, 0..100, 4, |chunk| chunk.collect::<Vec<_>>());
        assert_eq!(out, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_single_worker_degrades_to_sequential() {
        let pool = build_pool(1).unwrap();
        let out = fork_join_map(&pool, 10..14, 1, |chunk| vec![chunk]);
        assert_eq!(out, vec![10..14]);
    }
}
