//! Whole-sequence scoring: per-row alignments summed across channels, then
//! normalized against the theoretical score bounds.

use log::trace;

use crate::align::{AlignmentScorer, row_bounds};
use crate::error::{Error, Result};
use crate::metric::SimilarityMetric;
use crate::sequence::Sequence;

/// Which axis the per-line alignments run along.
///
/// Row-major and column-major artifacts from upstream sampling produce the
/// same pixels in a different line order; scoring both orientations and
/// taking the max is tolerant of that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Rows,
    Columns,
}

/// Scores whole sequence pairs, reusing one alignment matrix per orientation
/// across every row, channel and pair it is handed.
pub struct BatchScorer {
    rows: usize,
    columns: usize,
    gap: f64,
    row_scorer: AlignmentScorer,
    column_scorer: AlignmentScorer,
    column_a: Vec<i32>,
    column_b: Vec<i32>,
}

impl BatchScorer {
    pub fn new(rows: usize, columns: usize, gap: f64) -> Result<Self> {
        if rows == 0 || columns == 0 {
            return Err(Error::EmptyInput);
        }
        Ok(Self {
            rows,
            columns,
            gap,
            row_scorer: AlignmentScorer::new(columns, gap),
            column_scorer: AlignmentScorer::new(rows, gap),
            column_a: vec![0; rows],
            column_b: vec![0; rows],
        })
    }

    /// Scorer shaped for `sequence`; infallible because a `Sequence` cannot
    /// have an empty shape.
    pub fn for_sequence(sequence: &Sequence, gap: f64) -> Self {
        let rows = sequence.rows();
        let columns = sequence.columns();
        Self {
            rows,
            columns,
            gap,
            row_scorer: AlignmentScorer::new(columns, gap),
            column_scorer: AlignmentScorer::new(rows, gap),
            column_a: vec![0; rows],
            column_b: vec![0; rows],
        }
    }

    /// Normalized score of two sequences along one orientation.
    ///
    /// Raw per-line alignment scores are summed over every line of every
    /// channel, then mapped through `(raw - min) / (max - min)` where the
    /// bounds are the per-line bounds scaled by line and channel counts. The
    /// result sits in `[0, 1]` whenever samples respect the pixel range the
    /// metric was built with; this is deliberately NOT clamped, so bounds
    /// that disagree with the metric surface as out-of-range scores instead
    /// of being hidden.
    pub fn score_pair(
        &mut self,
        a: &Sequence,
        b: &Sequence,
        metric: &dyn SimilarityMetric,
        orientation: Orientation,
    ) -> Result<f64> {
        self.check_pair(a, b)?;
        let mut raw = 0.0;
        for (channel_a, channel_b) in a.channels().into_iter().zip(b.channels()) {
            raw += match orientation {
                Orientation::Rows => self.channel_by_rows(channel_a, channel_b, metric),
                Orientation::Columns => self.channel_by_columns(channel_a, channel_b, metric),
            };
        }
        let channels = a.channel_count() as f64;
        let (line_min, line_max) = match orientation {
            Orientation::Rows => row_bounds(self.columns, self.gap),
            Orientation::Columns => row_bounds(self.rows, self.gap),
        };
        let lines = match orientation {
            Orientation::Rows => self.rows,
            Orientation::Columns => self.columns,
        } as f64;
        let total_min = line_min * lines * channels;
        let total_max = line_max * lines * channels;
        let score = (raw - total_min) / (total_max - total_min);
        trace!(
            "batch score {}x{} {:?}: raw {raw:.3} -> {score:.6}",
            self.rows, self.columns, orientation
        );
        Ok(score)
    }

    /// Max of the two orientations.
    pub fn best_score(&mut self, a: &Sequence, b: &Sequence, metric: &dyn SimilarityMetric) -> Result<f64> {
        let by_rows = self.score_pair(a, b, metric, Orientation::Rows)?;
        let by_columns = self.score_pair(a, b, metric, Orientation::Columns)?;
        Ok(by_rows.max(by_columns))
    }

    fn check_pair(&self, a: &Sequence, b: &Sequence) -> Result<()> {
        a.check_shape(b)?;
        if a.rows() != self.rows || a.columns() != self.columns {
            return Err(Error::ShapeMismatch {
                expected_rows: self.rows,
                expected_columns: self.columns,
                rows: a.rows(),
                columns: a.columns(),
            });
        }
        if a.channel_count() != b.channel_count() {
            return Err(Error::ChannelLength {
                expected: a.channel_count(),
                found: b.channel_count(),
            });
        }
        Ok(())
    }

    fn channel_by_rows(&mut self, a: &[i32], b: &[i32], metric: &dyn SimilarityMetric) -> f64 {
        let mut total = 0.0;
        for row in 0..self.rows {
            let start = row * self.columns;
            let end = start + self.columns;
            total += self.row_scorer.score(&a[start..end], &b[start..end], metric);
        }
        total
    }

    fn channel_by_columns(&mut self, a: &[i32], b: &[i32], metric: &dyn SimilarityMetric) -> f64 {
        let mut total = 0.0;
        for column in 0..self.columns {
            for row in 0..self.rows {
                let index = row * self.columns + column;
                self.column_a[row] = a[index];
                self.column_b[row] = b[index];
            }
            total += self.column_scorer.score(&self.column_a, &self.column_b, metric);
        }
        total
    }
}

/// Normalized whole-sequence score along the row orientation, the batch entry
/// point mirroring [`crate::align::alignment_score`] for full sequences.
pub fn batch_alignment_score(
    a: &Sequence,
    b: &Sequence,
    metric: &dyn SimilarityMetric,
    gap: f64,
) -> Result<f64> {
    a.check_shape(b)?;
    BatchScorer::new(a.rows(), a.columns(), gap)?.score_pair(a, b, metric, Orientation::Rows)
}
