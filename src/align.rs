//! Needleman-Wunsch-style alignment of two equal-length sample rows.

use std::ops::{Index, IndexMut};

use crate::error::{Error, Result};
use crate::metric::SimilarityMetric;

/// Owned `(side x side)` score grid with 2-D indexing.
///
/// One matrix is reused (reset, not reallocated) across every row-pair
/// comparison of a batch with the same row length.
#[derive(Debug, Clone)]
pub struct AlignmentMatrix {
    side: usize,
    data: Vec<f64>,
}

impl AlignmentMatrix {
    /// Matrix for aligning rows of `columns` samples; the grid carries one
    /// extra leading row and column for the pure-gap prefixes.
    pub fn new(columns: usize) -> Self {
        let side = columns + 1;
        Self {
            side,
            data: vec![0.0; side * side],
        }
    }

    /// Write the pure-gap alignments along row 0 and column 0.
    fn seed_gaps(&mut self, gap: f64) {
        for i in 0..self.side {
            let edge = i as f64 * gap;
            self[(0, i)] = edge;
            self[(i, 0)] = edge;
        }
    }
}

impl Index<(usize, usize)> for AlignmentMatrix {
    type Output = f64;

    fn index(&self, (row, column): (usize, usize)) -> &f64 {
        &self.data[row * self.side + column]
    }
}

impl IndexMut<(usize, usize)> for AlignmentMatrix {
    fn index_mut(&mut self, (row, column): (usize, usize)) -> &mut f64 {
        &mut self.data[row * self.side + column]
    }
}

/// Dynamic-programming scorer for equal-length sample rows, owning the
/// reusable matrix for one row length.
pub struct AlignmentScorer {
    matrix: AlignmentMatrix,
    columns: usize,
    gap: f64,
}

impl AlignmentScorer {
    pub fn new(columns: usize, gap: f64) -> Self {
        Self {
            matrix: AlignmentMatrix::new(columns),
            columns,
            gap,
        }
    }

    pub fn gap(&self) -> f64 {
        self.gap
    }

    /// Optimal alignment score of two rows of `columns` samples.
    ///
    /// The match term maps the metric's `[0, 1]` similarity onto a symmetric
    /// `[-1, 1]` contribution; gaps in either row cost `gap`. Deterministic,
    /// O(columns^2) time on the reused matrix.
    pub fn score(&mut self, a: &[i32], b: &[i32], metric: &dyn SimilarityMetric) -> f64 {
        debug_assert_eq!(a.len(), self.columns);
        debug_assert_eq!(b.len(), self.columns);
        let gap = self.gap;
        self.matrix.seed_gaps(gap);
        for i in 1..=self.columns {
            for j in 1..=self.columns {
                let matched =
                    self.matrix[(i - 1, j - 1)] + 2.0 * metric.sample_similarity(a[i - 1], b[j - 1]) - 1.0;
                let gap_a = self.matrix[(i - 1, j)] + gap;
                let gap_b = self.matrix[(i, j - 1)] + gap;
                self.matrix[(i, j)] = matched.max(gap_a).max(gap_b);
            }
        }
        self.matrix[(self.columns, self.columns)]
    }
}

/// Theoretical `(min, max)` alignment score of one row of `columns` samples.
/// Both bounds honor the sign of `gap`: a positive gap raises the maximum, a
/// gap below `-1` lowers the minimum.
pub fn row_bounds(columns: usize, gap: f64) -> (f64, f64) {
    let min = (-1.0_f64).min(gap) * columns as f64;
    let max = 1.0_f64.max(gap) * columns as f64;
    (min, max)
}

/// One-shot entry point aligning two equal-length channel rows.
pub fn alignment_score(a: &[i32], b: &[i32], metric: &dyn SimilarityMetric, gap: f64) -> Result<f64> {
    if a.is_empty() {
        return Err(Error::EmptyInput);
    }
    if a.len() != b.len() {
        return Err(Error::ChannelLength {
            expected: a.len(),
            found: b.len(),
        });
    }
    Ok(AlignmentScorer::new(a.len(), gap).score(a, b, metric))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::MetricKind;
    use crate::sequence::PixelRange;

    fn raw() -> Box<dyn SimilarityMetric> {
        MetricKind::Raw.build(PixelRange::default()).unwrap()
    }

    #[test]
    fn test_identical_rows_score_the_row_maximum() {
        let row = [3, 60, 120, 255];
        let score = alignment_score(&row, &row, raw().as_ref(), -1.0).unwrap();
        assert_eq!(score, row_bounds(row.len(), -1.0).1);
        assert_eq!(score, 4.0);
    }

    #[test]
    fn test_opposite_rows_score_the_row_minimum() {
        let a = [0, 0, 0, 0];
        let b = [255, 255, 255, 255];
        let score = alignment_score(&a, &b, raw().as_ref(), -1.0).unwrap();
        assert_eq!(score, row_bounds(a.len(), -1.0).0);
        assert_eq!(score, -4.0);
    }

    #[test]
    fn test_score_is_symmetric() {
        let a = [10, 250, 80, 40, 200];
        let b = [12, 40, 90, 250, 10];
        let metric = raw();
        let ab = alignment_score(&a, &b, metric.as_ref(), -1.0).unwrap();
        let ba = alignment_score(&b, &a, metric.as_ref(), -1.0).unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_gap_alignment_beats_forced_mismatches() {
        // A one-sample shift can be absorbed by two gaps instead of paying
        // for every shifted mismatch.
        let a = [0, 0, 255, 0, 0, 0];
        let b = [0, 0, 0, 255, 0, 0];
        let metric = raw();
        let aligned = alignment_score(&a, &b, metric.as_ref(), -0.5).unwrap();
        let unshifted: f64 = a
            .iter()
            .zip(&b)
            .map(|(&x, &y)| 2.0 * metric.sample_similarity(x, y) - 1.0)
            .sum();
        assert!(aligned > unshifted);
    }

    #[test]
    fn test_positive_gap_raises_the_maximum_bound() {
        let (min, max) = row_bounds(4, 2.0);
        assert_eq!(min, -4.0);
        assert_eq!(max, 8.0);
        let (min, max) = row_bounds(4, -3.0);
        assert_eq!(min, -12.0);
        assert_eq!(max, 4.0);
    }

    #[test]
    fn test_rejects_empty_and_mismatched_rows() {
        let metric = raw();
        assert!(matches!(
            alignment_score(&[], &[], metric.as_ref(), -1.0),
            Err(Error::EmptyInput)
        ));
        assert!(matches!(
            alignment_score(&[1, 2], &[1], metric.as_ref(), -1.0),
            Err(Error::ChannelLength { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn test_matrix_is_reused_across_calls() {
        let mut scorer = AlignmentScorer::new(3, -1.0);
        let metric = raw();
        let first = scorer.score(&[0, 128, 255], &[0, 128, 255], metric.as_ref());
        let second = scorer.score(&[255, 0, 255], &[0, 255, 0], metric.as_ref());
        let again = scorer.score(&[0, 128, 255], &[0, 128, 255], metric.as_ref());
        assert_eq!(first, again);
        assert!(second < first);
    }
}
