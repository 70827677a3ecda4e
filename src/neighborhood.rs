//! Shift-tolerant full-image comparison.
//!
//! Instead of aligning rows, every pixel of one sequence is compared against
//! the 3x3 window around the same position in the other sequence, keeping the
//! best match. Tolerates single-pixel spatial jitter at O(width * height * 9)
//! cost, an order cheaper than the aligner's O(rows * columns^2).

use crate::error::{Error, Result};
use crate::metric::SimilarityMetric;
use crate::sequence::Sequence;

/// Average best-in-window similarity between two same-shaped sequences.
///
/// The window is the 3x3 neighborhood clipped to the image bounds: corner
/// pixels search a 2x2 window, edge pixels 2x3 or 3x2.
pub fn neighborhood_similarity(a: &Sequence, b: &Sequence, metric: &dyn SimilarityMetric) -> Result<f64> {
    a.check_shape(b)?;
    let columns = a.columns();
    let rows = a.rows();
    let shape = (columns, rows);
    let mut total = 0.0;
    for y in 0..rows {
        for x in 0..columns {
            let pixel = a.pixel(x, y);
            let mut best = f64::NEG_INFINITY;
            for ny in y.saturating_sub(1)..=(y + 1).min(rows - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(columns - 1) {
                    let candidate =
                        metric.pixel_similarity_at(pixel, (x, y), b.pixel(nx, ny), (nx, ny), shape);
                    if candidate > best {
                        best = candidate;
                    }
                }
            }
            total += best;
        }
    }
    Ok(total / (rows * columns) as f64)
}

/// Sparse variant over the sequences' index permutations: sample `k` of `a`
/// is compared to sample `k` of `b` at their respective positions, letting a
/// position-aware metric discount spatially far matches.
pub fn sparse_similarity(a: &Sequence, b: &Sequence, metric: &dyn SimilarityMetric) -> Result<f64> {
    a.check_shape(b)?;
    let (samples_a, samples_b) = match (a.samples(), b.samples()) {
        (Some(sa), Some(sb)) => (sa, sb),
        _ => {
            return Err(Error::InvalidParameter {
                name: "samples",
                message: "both sequences need a sample permutation",
            });
        }
    };
    if samples_a.is_empty() || samples_a.len() != samples_b.len() {
        return Err(Error::ChannelLength {
            expected: samples_a.len().max(1),
            found: samples_b.len(),
        });
    }
    let shape = (a.columns(), a.rows());
    let total: f64 = samples_a
        .iter()
        .zip(samples_b)
        .map(|(&index_a, &index_b)| {
            metric.pixel_similarity_at(
                a.pixel_at(index_a),
                a.position(index_a),
                b.pixel_at(index_b),
                b.position(index_b),
                shape,
            )
        })
        .sum();
    Ok(total / samples_a.len() as f64)
}
