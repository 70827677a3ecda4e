//! Perceptual similarity scoring and near-duplicate grouping for frame
//! sequences.
//!
//! A [`Sequence`] is a frame (or image) reduced to parallel per-channel
//! integer sample arrays by an upstream ingestion pipeline; this crate never
//! decodes media. It scores sequence pairs with interchangeable pixel metrics
//! fed through either a dynamic-programming alignment
//! ([`batch_alignment_score`]) or a shift-tolerant window search
//! ([`neighborhood_similarity`]), and groups whole batches into clusters of
//! near-duplicates ([`classify_similarities`]), parallelizing the O(n²)
//! pairwise workload over a bounded worker pool.
//!
//! ```rust
//! use framesim::{ClassifyOptions, Sequence, classify_similarities};
//!
//! let frame = |value: i32| {
//!     let pixels = vec![value; 8];
//!     Sequence::new(pixels.clone(), pixels.clone(), pixels, 2, 4).unwrap()
//! };
//! let mut sequences = vec![frame(10), frame(12), frame(200)];
//! let cluster0 = classify_similarities(&mut sequences, &ClassifyOptions::default()).unwrap();
//! assert_eq!(cluster0, 2);
//! assert_ne!(sequences[2].classification, sequences[0].classification);
//! ```

#![forbid(unsafe_code)]

pub mod aggregate;
pub mod align;
pub mod classify;
pub mod error;
pub mod metric;
pub mod neighborhood;
pub mod partition;
pub mod sequence;

pub use aggregate::{BatchScorer, Orientation, batch_alignment_score};
pub use align::{AlignmentMatrix, AlignmentScorer, alignment_score, row_bounds};
pub use classify::{
    Classifier, ClassifyOptions, Policy, Prefilter, Scoring, classify_by_neighborhood,
    classify_similarities,
};
pub use error::{Error, Result};
pub use metric::{MetricKind, ModerationCurve, SimilarityMetric};
pub use neighborhood::{neighborhood_similarity, sparse_similarity};
pub use sequence::{PixelRange, Sequence, UNCLASSIFIED};
