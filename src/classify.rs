//! Pairwise classification of sequences into near-duplicate clusters.
//!
//! Two greedy single-link policies are supported. Both mutate
//! `score`/`classification` in place and return the size of cluster 0 (the
//! cluster of the first sequence). Pixel buffers are only ever read; every
//! label write happens on the orchestrating thread after its workers have
//! joined, so first-match-wins is deterministic.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::aggregate::{BatchScorer, Orientation};
use crate::error::{Error, Result};
use crate::metric::{MetricKind, SimilarityMetric};
use crate::neighborhood::neighborhood_similarity;
use crate::partition::{build_pool, fork_join_map};
use crate::sequence::{PixelRange, Sequence, UNCLASSIFIED};

/// Clustering policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Score everything against sequence 0, then carve the sorted remainder
    /// into groups wherever the score gap exceeds `difference_limit`.
    ReferenceSort,
    /// Walk unclassified sequences in order; each one founds a cluster and
    /// pulls in every later unclassified sequence crossing `similarity_limit`.
    Propagation,
}

/// How a pair's final score is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scoring {
    /// Full dynamic-programming alignment, normalized per channel.
    Alignment,
    /// Best-in-window neighborhood similarity, no alignment.
    Neighborhood,
}

/// Cheap metric used to gate the full aligner when `alignment_limit` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prefilter {
    /// Mean per-position pixel similarity, no window search.
    Raw,
    /// Shift-tolerant neighborhood similarity.
    Neighborhood,
}

/// Configuration surface of a classification run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyOptions {
    /// Gap penalty of the aligner, typically negative.
    pub gap_score: i32,
    /// Inclusive threshold a pair must reach to share a cluster.
    pub similarity_limit: f64,
    /// Maximum score gap tolerated inside one sorted group (ReferenceSort).
    pub difference_limit: f64,
    /// When set, pairs are pre-filtered with the cheap `prefilter` metric and
    /// only escalate to the full aligner once the cheap score clears this
    /// limit (typically above `similarity_limit`).
    pub alignment_limit: Option<f64>,
    pub prefilter: Prefilter,
    pub metric: MetricKind,
    pub policy: Policy,
    pub scoring: Scoring,
    /// Per-line alignment axis; `None` scores both and keeps the max.
    pub orientation: Option<Orientation>,
    /// Worker pool size, defaults to the number of CPUs.
    pub workers: Option<usize>,
    pub pixel_range: PixelRange,
}

impl Default for ClassifyOptions {
    fn default() -> Self {
        Self {
            gap_score: -1,
            similarity_limit: 0.9,
            difference_limit: 0.05,
            alignment_limit: None,
            prefilter: Prefilter::Raw,
            metric: MetricKind::Raw,
            policy: Policy::ReferenceSort,
            scoring: Scoring::Alignment,
            orientation: Some(Orientation::Rows),
            workers: None,
            pixel_range: PixelRange::default(),
        }
    }
}

impl ClassifyOptions {
    /// Fail fast on any configuration value that could poison a run.
    pub fn validate(&self) -> Result<()> {
        let unit_interval = |name: &'static str, value: f64| {
            if value.is_finite() && (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(Error::InvalidParameter {
                    name,
                    message: "must lie in [0, 1]",
                })
            }
        };
        unit_interval("similarity_limit", self.similarity_limit)?;
        if let Some(limit) = self.alignment_limit {
            unit_interval("alignment_limit", limit)?;
        }
        if !self.difference_limit.is_finite() || self.difference_limit < 0.0 {
            return Err(Error::InvalidParameter {
                name: "difference_limit",
                message: "must be finite and non-negative",
            });
        }
        if self.workers == Some(0) {
            return Err(Error::InvalidParameter {
                name: "workers",
                message: "worker pool cannot be empty",
            });
        }
        if self.pixel_range.max <= self.pixel_range.min {
            return Err(Error::InvalidParameter {
                name: "pixel_range",
                message: "max must be strictly greater than min",
            });
        }
        self.metric.validate()
    }

    fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }
}

/// Outcome of scoring one pair.
#[derive(Debug, Clone, Copy)]
struct PairScore {
    score: f64,
    /// False when the pre-filter rejected the pair before the configured
    /// metric ran; the recorded score is then the cheap metric's and must
    /// never be tested for cluster membership.
    eligible: bool,
}

impl PairScore {
    fn scored(score: f64) -> Self {
        Self { score, eligible: true }
    }

    fn rejected(score: f64) -> Self {
        Self { score, eligible: false }
    }
}

/// Orchestrates one classification workload over a bounded worker pool.
pub struct Classifier {
    options: ClassifyOptions,
    metric: Box<dyn SimilarityMetric>,
    prefilter_metric: Box<dyn SimilarityMetric>,
    pool: rayon::ThreadPool,
    workers: usize,
    cancel: Arc<AtomicBool>,
}

impl Classifier {
    pub fn new(options: ClassifyOptions) -> Result<Self> {
        options.validate()?;
        let metric = options.metric.build(options.pixel_range)?;
        let prefilter_metric = MetricKind::Raw.build(options.pixel_range)?;
        let workers = options.worker_count();
        let pool = build_pool(workers)?;
        Ok(Self {
            options,
            metric,
            prefilter_metric,
            pool,
            workers,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Token observed between outer iterations; setting it stops the run
    /// cleanly with [`Error::Cancelled`], keeping labels assigned so far.
    pub fn cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Label every sequence and return the number of sequences in cluster 0.
    ///
    /// Classification state is reset first, so rerunning over the same input
    /// yields identical labels.
    pub fn classify(&self, sequences: &mut [Sequence]) -> Result<usize> {
        let first = sequences.first().ok_or(Error::EmptyInput)?;
        for other in &sequences[1..] {
            first.check_shape(other)?;
            if first.channel_count() != other.channel_count() {
                return Err(Error::ChannelLength {
                    expected: first.channel_count(),
                    found: other.channel_count(),
                });
            }
        }
        for sequence in sequences.iter_mut() {
            sequence.reset_classification();
        }
        debug!(
            "classifying {} sequences ({:?}, {:?}, metric {}, {} workers)",
            sequences.len(),
            self.options.policy,
            self.options.scoring,
            self.metric.name(),
            self.workers
        );
        match self.options.policy {
            Policy::ReferenceSort => self.classify_reference_sort(sequences),
            Policy::Propagation => self.classify_propagation(sequences),
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Score one pair, pre-filtering with the cheap metric when configured.
    ///
    /// A pair the pre-filter rejects keeps the cheap score but is marked
    /// ineligible: only the configured metric's own verdict may grant
    /// cluster membership.
    fn pair_score(&self, scorer: &mut BatchScorer, a: &Sequence, b: &Sequence) -> Result<PairScore> {
        if self.options.scoring == Scoring::Neighborhood {
            return Ok(PairScore::scored(neighborhood_similarity(a, b, self.metric.as_ref())?));
        }
        if let Some(limit) = self.options.alignment_limit {
            let cheap = match self.options.prefilter {
                Prefilter::Raw => direct_similarity(a, b, self.prefilter_metric.as_ref()),
                Prefilter::Neighborhood => neighborhood_similarity(a, b, self.prefilter_metric.as_ref())?,
            };
            if cheap < limit {
                return Ok(PairScore::rejected(cheap));
            }
        }
        let score = match self.options.orientation {
            Some(orientation) => scorer.score_pair(a, b, self.metric.as_ref(), orientation)?,
            None => scorer.best_score(a, b, self.metric.as_ref())?,
        };
        Ok(PairScore::scored(score))
    }

    /// Fork-join one wavefront: score `reference` against every unclassified
    /// index in `range`, workers reading only, results joined in index order.
    fn score_wavefront(
        &self,
        sequences: &[Sequence],
        reference: usize,
        range: std::ops::Range<usize>,
    ) -> Result<Vec<(usize, PairScore)>> {
        let gap = f64::from(self.options.gap_score);
        fork_join_map(&self.pool, range, self.workers, |chunk| {
            let mut scorer = BatchScorer::for_sequence(&sequences[reference], gap);
            chunk
                .filter(|&j| sequences[j].classification == UNCLASSIFIED)
                .map(|j| {
                    self.pair_score(&mut scorer, &sequences[reference], &sequences[j])
                        .map(|outcome| (j, outcome))
                })
                .collect()
        })
        .into_iter()
        .collect()
    }

    /// Policy A: reference scoring against sequence 0, then grouping of the
    /// sorted remainder by score gaps.
    fn classify_reference_sort(&self, sequences: &mut [Sequence]) -> Result<usize> {
        sequences[0].classification = 0;
        sequences[0].score = 1.0;
        if sequences.len() == 1 {
            return Ok(1);
        }
        self.check_cancelled()?;

        let scored = self.score_wavefront(sequences, 0, 1..sequences.len())?;
        let mut cluster0 = 1;
        for (j, outcome) in scored {
            sequences[j].score = outcome.score;
            if outcome.eligible && outcome.score >= self.options.similarity_limit {
                sequences[j].classification = 0;
                cluster0 += 1;
            } else {
                sequences[j].classification = 1;
            }
        }
        self.check_cancelled()?;

        // Stable sort of the remainder by its score against sequence 0; when
        // nothing but sequence 0 made cluster 0, this is the full remainder.
        let mut order: Vec<usize> = (1..sequences.len())
            .filter(|&j| sequences[j].classification == 1)
            .collect();
        order.sort_by(|&x, &y| sequences[x].score.total_cmp(&sequences[y].score));

        let mut next_class = 1;
        let mut anchor = 0;
        for position in 1..order.len() {
            let gap = (sequences[order[anchor]].score - sequences[order[position]].score).abs();
            if gap > self.options.difference_limit {
                for &index in &order[anchor..position] {
                    sequences[index].classification = next_class;
                }
                next_class += 1;
                anchor = position;
            }
        }
        if !order.is_empty() {
            for &index in &order[anchor..] {
                sequences[index].classification = next_class;
            }
        }
        debug!("reference sort: {cluster0} in cluster 0, {next_class} later groups");
        Ok(cluster0)
    }

    /// Policy B: strictly sequential outer loop; each wavefront's label
    /// writes are applied by this thread only, after the join.
    fn classify_propagation(&self, sequences: &mut [Sequence]) -> Result<usize> {
        let count = sequences.len();
        for i in 0..count {
            self.check_cancelled()?;
            if sequences[i].classification != UNCLASSIFIED {
                continue;
            }
            // A fresh cluster keeps its founder's index as id.
            let cluster = i as i32;
            sequences[i].classification = cluster;
            sequences[i].score = 1.0;
            if i + 1 == count {
                break;
            }
            let matches = self.score_wavefront(sequences, i, i + 1..count)?;
            for (j, outcome) in matches {
                if outcome.eligible && outcome.score >= self.options.similarity_limit {
                    sequences[j].classification = cluster;
                    sequences[j].score = outcome.score;
                }
            }
        }
        let cluster0 = sequences
            .iter()
            .filter(|sequence| sequence.classification == 0)
            .count();
        debug!("propagation: {cluster0} in cluster 0");
        Ok(cluster0)
    }
}

/// Mean pixel similarity at identical positions, the cheapest whole-image
/// comparison. Used as the raw pre-filter.
fn direct_similarity(a: &Sequence, b: &Sequence, metric: &dyn SimilarityMetric) -> f64 {
    let len = a.len();
    let total: f64 = (0..len)
        .map(|index| metric.pixel_similarity(a.pixel_at(index), b.pixel_at(index)))
        .sum();
    total / len as f64
}

/// Classify `sequences` in place per `options`; returns the size of
/// cluster 0. The main library entry point.
pub fn classify_similarities(sequences: &mut [Sequence], options: &ClassifyOptions) -> Result<usize> {
    Classifier::new(options.clone())?.classify(sequences)
}

/// Classification over the shift-tolerant neighborhood comparator alone, no
/// alignment pass.
pub fn classify_by_neighborhood(sequences: &mut [Sequence], similarity_limit: f64) -> Result<usize> {
    let options = ClassifyOptions {
        similarity_limit,
        policy: Policy::Propagation,
        scoring: Scoring::Neighborhood,
        ..ClassifyOptions::default()
    };
    classify_similarities(sequences, &options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(value: i32, rows: usize, columns: usize) -> Sequence {
        let pixels = vec![value; rows * columns];
        Sequence::new(pixels.clone(), pixels.clone(), pixels, rows, columns).unwrap()
    }

    fn options(policy: Policy) -> ClassifyOptions {
        ClassifyOptions {
            policy,
            workers: Some(2),
            ..ClassifyOptions::default()
        }
    }

    #[test]
    fn test_validate_rejects_bad_limits() {
        let mut bad = ClassifyOptions::default();
        bad.similarity_limit = 1.5;
        assert!(bad.validate().is_err());
        bad = ClassifyOptions::default();
        bad.difference_limit = -0.1;
        assert!(bad.validate().is_err());
        bad = ClassifyOptions::default();
        bad.workers = Some(0);
        assert!(bad.validate().is_err());
        bad = ClassifyOptions::default();
        bad.pixel_range = PixelRange { min: 5, max: 5 };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_identical_sequences_form_one_cluster() {
        for policy in [Policy::ReferenceSort, Policy::Propagation] {
            let mut sequences = vec![flat(100, 2, 4), flat(100, 2, 4), flat(100, 2, 4)];
            let cluster0 = classify_similarities(&mut sequences, &options(policy)).unwrap();
            assert_eq!(cluster0, 3);
            assert!(sequences.iter().all(|s| s.classification == 0));
            assert!(sequences.iter().all(|s| s.score == 1.0));
        }
    }

    #[test]
    fn test_dissimilar_sequences_split() {
        for policy in [Policy::ReferenceSort, Policy::Propagation] {
            let mut sequences = vec![flat(0, 2, 4), flat(255, 2, 4)];
            let cluster0 = classify_similarities(&mut sequences, &options(policy)).unwrap();
            assert_eq!(cluster0, 1);
            assert_ne!(sequences[0].classification, sequences[1].classification);
        }
    }

    #[test]
    fn test_threshold_is_inclusive() {
        // One full-range outlier per row of a 4x4 frame: each row aligns to
        // 3 matches and 1 mismatch, landing exactly on 0.75 after
        // normalization in every channel.
        let same = flat(0, 4, 4);
        let mut pixels = vec![0; 16];
        for row in 0..4 {
            pixels[row * 4] = 255;
        }
        let other = Sequence::new(pixels.clone(), pixels.clone(), pixels, 4, 4).unwrap();
        let mut sequences = vec![same, other];
        let mut opts = options(Policy::Propagation);
        opts.similarity_limit = 0.75;
        let cluster0 = classify_similarities(&mut sequences, &opts).unwrap();
        assert_eq!(cluster0, 2, "score exactly at the limit must join");
    }

    #[test]
    fn test_reference_sort_groups_by_difference_limit() {
        // Engineered so scores vs sequence 0 are exactly 1.0, 0.95, 0.5,
        // 0.48, 0.1 is hard with real pixels; approximate with graded noise
        // and assert the structural outcome instead: cluster 0 plus two
        // gap-separated groups.
        let make = |distance: i32| {
            let pixels = vec![distance; 8];
            Sequence::new(pixels.clone(), pixels.clone(), pixels, 2, 4).unwrap()
        };
        // Scores vs 0: 1.0, then pairs clustered around two levels far apart.
        let mut sequences = vec![make(0), make(2), make(128), make(132), make(250)];
        let mut opts = options(Policy::ReferenceSort);
        opts.similarity_limit = 0.99;
        opts.difference_limit = 0.05;
        let cluster0 = classify_similarities(&mut sequences, &opts).unwrap();
        assert_eq!(cluster0, 2);
        assert_eq!(sequences[0].classification, 0);
        assert_eq!(sequences[1].classification, 0);
        assert_eq!(sequences[2].classification, sequences[3].classification);
        assert_ne!(sequences[2].classification, sequences[4].classification);
        let labels: std::collections::HashSet<i32> =
            sequences.iter().map(|s| s.classification).collect();
        assert_eq!(labels.len(), 3);
    }

    #[test]
    fn test_propagation_first_match_wins() {
        // 1 is near 0; 2 is near 1 but nearer to 0 than the limit allows.
        let make = |value: i32| flat(value, 2, 4);
        let mut sequences = vec![make(0), make(10), make(200)];
        let mut opts = options(Policy::Propagation);
        opts.similarity_limit = 0.9;
        classify_similarities(&mut sequences, &opts).unwrap();
        assert_eq!(sequences[0].classification, 0);
        assert_eq!(sequences[1].classification, 0);
        // 200 is far from 0, founds its own cluster keyed by its index.
        assert_eq!(sequences[2].classification, 2);
        assert_eq!(sequences[2].score, 1.0);
    }

    #[test]
    fn test_classification_is_idempotent() {
        let mut sequences = vec![flat(0, 2, 4), flat(30, 2, 4), flat(200, 2, 4), flat(210, 2, 4)];
        let opts = options(Policy::Propagation);
        classify_similarities(&mut sequences, &opts).unwrap();
        let first: Vec<i32> = sequences.iter().map(|s| s.classification).collect();
        classify_similarities(&mut sequences, &opts).unwrap();
        let second: Vec<i32> = sequences.iter().map(|s| s.classification).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_prefilter_keeps_cheap_score_for_rejected_pairs() {
        let mut sequences = vec![flat(0, 2, 4), flat(255, 2, 4)];
        let mut opts = options(Policy::ReferenceSort);
        opts.alignment_limit = Some(0.95);
        let cluster0 = classify_similarities(&mut sequences, &opts).unwrap();
        assert_eq!(cluster0, 1);
        // The rejected pair's score is the cheap metric's output.
        assert_eq!(sequences[1].score, 0.0);
    }

    #[test]
    fn test_prefilter_band_score_never_grants_membership() {
        // Cheap raw score 0.9216 lands between similarity_limit and
        // alignment_limit; under the configured moderated metric the pair is
        // clearly dissimilar (aligned score ~0.048). The rejected pair must
        // stay out of the cluster instead of joining on the cheap score.
        let mut sequences = vec![flat(0, 2, 4), flat(20, 2, 4)];
        let mut opts = options(Policy::ReferenceSort);
        opts.metric = MetricKind::Moderated {
            curve: crate::metric::ModerationCurve::Rational { v: 1.0, h: 1.0 },
        };
        opts.similarity_limit = 0.9;
        opts.alignment_limit = Some(0.95);
        let cluster0 = classify_similarities(&mut sequences, &opts).unwrap();
        assert_eq!(cluster0, 1);
        assert_ne!(sequences[1].classification, sequences[0].classification);
        // The cheap score is still recorded for the rejected pair.
        assert!((sequences[1].score - 705.0 / 765.0).abs() < 1e-12);
    }

    #[test]
    fn test_escalated_pair_is_judged_by_the_configured_metric() {
        // Same pair, but the cheap score clears alignment_limit: the aligner
        // runs and its much lower verdict decides (and is recorded), even
        // though the pre-filter score was above similarity_limit.
        let mut sequences = vec![flat(0, 2, 4), flat(20, 2, 4)];
        let mut opts = options(Policy::ReferenceSort);
        opts.metric = MetricKind::Moderated {
            curve: crate::metric::ModerationCurve::Rational { v: 1.0, h: 1.0 },
        };
        opts.similarity_limit = 0.9;
        opts.alignment_limit = Some(0.9);
        let cluster0 = classify_similarities(&mut sequences, &opts).unwrap();
        assert_eq!(cluster0, 1);
        assert_ne!(sequences[1].classification, sequences[0].classification);
        // Moderated sample similarity h/(d+h) with h=1, d=20.
        assert!((sequences[1].score - 1.0 / 21.0).abs() < 1e-9);
    }

    #[test]
    fn test_neighborhood_prefilter_escalates_where_raw_rejects() {
        // One-pixel horizontal jitter: the raw pre-filter sees half the
        // pixels mismatched (0.5) and rejects, the shift-tolerant one scores
        // 1.0 and lets the aligner run (0.625 after gaps).
        let stripe = |offset: usize| {
            let mut pixels = vec![0; 16];
            for y in 0..4 {
                pixels[y * 4 + offset] = 255;
            }
            Sequence::new(pixels.clone(), pixels.clone(), pixels, 4, 4).unwrap()
        };
        let mut opts = options(Policy::ReferenceSort);
        opts.alignment_limit = Some(0.95);

        let mut sequences = vec![stripe(1), stripe(2)];
        opts.prefilter = Prefilter::Raw;
        classify_similarities(&mut sequences, &opts).unwrap();
        assert_eq!(sequences[1].score, 0.5);

        let mut sequences = vec![stripe(1), stripe(2)];
        opts.prefilter = Prefilter::Neighborhood;
        classify_similarities(&mut sequences, &opts).unwrap();
        assert_eq!(sequences[1].score, 0.625);
    }

    #[test]
    fn test_cancellation_stops_cleanly() {
        let classifier = Classifier::new(options(Policy::Propagation)).unwrap();
        classifier.cancellation_token().store(true, Ordering::Relaxed);
        let mut sequences = vec![flat(0, 2, 4), flat(255, 2, 4)];
        assert!(matches!(
            classifier.classify(&mut sequences),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn test_neighborhood_classification_tolerates_jitter() {
        let stripe = |offset: usize| {
            let mut pixels = vec![0; 16];
            for y in 0..4 {
                pixels[y * 4 + offset] = 255;
            }
            Sequence::new(pixels.clone(), pixels.clone(), pixels, 4, 4).unwrap()
        };
        let mut sequences = vec![stripe(1), stripe(2), flat(128, 4, 4)];
        let cluster0 = classify_by_neighborhood(&mut sequences, 0.95).unwrap();
        assert_eq!(cluster0, 2);
        assert_ne!(sequences[2].classification, 0);
    }

    #[test]
    fn test_mismatched_shapes_fail_before_any_work() {
        let mut sequences = vec![flat(0, 2, 4), flat(0, 4, 2)];
        let result = classify_similarities(&mut sequences, &options(Policy::Propagation));
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_options_serde_round_trip() {
        let opts = ClassifyOptions {
            alignment_limit: Some(0.92),
            prefilter: Prefilter::Neighborhood,
            orientation: None,
            ..ClassifyOptions::default()
        };
        let json = serde_json::to_string(&opts).unwrap();
        let back: ClassifyOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(opts, back);
    }
}
