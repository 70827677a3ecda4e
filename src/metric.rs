//! Interchangeable pixel similarity metrics.
//!
//! Every metric maps a pair of samples to a similarity in `[0, 1]` where
//! higher means more similar. Scalar-sample similarity feeds the alignment
//! scorer; RGB similarity feeds the neighborhood comparator. Metrics are
//! selected and parameterized through [`MetricKind`], which validates its
//! divisors before building anything.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sequence::PixelRange;

/// An RGB pixel sample.
pub type Rgb = [i32; 3];

/// Maximum color-class distance: all three channel orderings differ.
pub const CLASS_DISTANCE_MAX: f64 = 3.0;

/// Similarity between pixel samples, interchangeable across the scorer,
/// the aggregator and the neighborhood comparator.
pub trait SimilarityMetric: Send + Sync {
    /// Metric name, used in logs.
    fn name(&self) -> &'static str;

    /// Similarity in `[0, 1]` between two scalar channel samples.
    fn sample_similarity(&self, a: i32, b: i32) -> f64;

    /// Similarity in `[0, 1]` between two RGB samples.
    fn pixel_similarity(&self, a: Rgb, b: Rgb) -> f64;

    /// Position-aware similarity; the default ignores positions. `shape` is
    /// `(columns, rows)` of the image both positions live in.
    fn pixel_similarity_at(
        &self,
        a: Rgb,
        _position_a: (usize, usize),
        b: Rgb,
        _position_b: (usize, usize),
        _shape: (usize, usize),
    ) -> f64 {
        self.pixel_similarity(a, b)
    }
}

/// Discrete category of a pixel's channel-ordering pattern.
///
/// Two pixels can be close in Euclidean distance yet have different hues;
/// comparing which channels dominate catches that. The category is the sign
/// pattern of `r-g`, `g-b` and `r-b` (13 reachable patterns).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorClass {
    rg: i8,
    gb: i8,
    rb: i8,
}

impl ColorClass {
    pub fn of(pixel: Rgb) -> Self {
        let [r, g, b] = pixel;
        Self {
            rg: (r - g).signum() as i8,
            gb: (g - b).signum() as i8,
            rb: (r - b).signum() as i8,
        }
    }

    /// Number of channel orderings on which the two classes disagree, in
    /// `0..=3` (see [`CLASS_DISTANCE_MAX`]).
    pub fn distance(&self, other: &ColorClass) -> f64 {
        f64::from(u8::from(self.rg != other.rg))
            + f64::from(u8::from(self.gb != other.gb))
            + f64::from(u8::from(self.rb != other.rb))
    }
}

/// Monotonic saturating map from raw distance to a bounded "moderated"
/// distance. Compresses large distances so isolated extreme pixels cannot
/// dominate an aggregate score, while keeping small distances distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum ModerationCurve {
    /// `moderated(x) = (v + h) * x / (x + h)`; `h` is the half-value point
    /// (the distance mapped to half the saturation limit `v + h`).
    Rational { v: f64, h: f64 },
    /// Quadratic `curvature * x^2` below `cutoff`, shifted-rational beyond it.
    /// The rational branch constants are derived so value and first
    /// derivative are continuous at the cutoff.
    TwoRegime { cutoff: f64, curvature: f64, h: f64 },
}

impl ModerationCurve {
    pub fn validate(&self) -> Result<()> {
        let positive = |name: &'static str, value: f64| {
            if value > 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(Error::InvalidParameter {
                    name,
                    message: "must be strictly positive and finite",
                })
            }
        };
        match *self {
            ModerationCurve::Rational { v, h } => {
                positive("v", v)?;
                positive("h", h)
            }
            ModerationCurve::TwoRegime { cutoff, curvature, h } => {
                positive("cutoff", cutoff)?;
                positive("curvature", curvature)?;
                positive("h", h)
            }
        }
    }

    /// Moderated distance for a raw distance `x >= 0`.
    pub fn moderate(&self, x: f64) -> f64 {
        match *self {
            ModerationCurve::Rational { v, h } => (v + h) * x / (x + h),
            ModerationCurve::TwoRegime { cutoff, curvature, h } => {
                if x < cutoff {
                    curvature * x * x
                } else {
                    // Value at the cutoff is curvature * cutoff^2 and the
                    // slope there is 2 * curvature * cutoff, matching the
                    // quadratic branch.
                    let at_cutoff = curvature * cutoff * cutoff;
                    let gain = 2.0 * curvature * cutoff * h;
                    at_cutoff + gain * (x - cutoff) / (x - cutoff + h)
                }
            }
        }
    }

    /// Upper bound the moderated distance approaches as `x` grows.
    pub fn limit(&self) -> f64 {
        match *self {
            ModerationCurve::Rational { v, h } => v + h,
            ModerationCurve::TwoRegime { cutoff, curvature, h } => {
                curvature * cutoff * cutoff + 2.0 * curvature * cutoff * h
            }
        }
    }

    /// Similarity in `(0, 1]` for a raw distance: `1` at zero distance,
    /// approaching `0` as the curve saturates.
    pub fn similarity(&self, x: f64) -> f64 {
        1.0 - self.moderate(x) / self.limit()
    }
}

/// Raw channel-sum distance, the cheap pre-filter metric.
#[derive(Debug, Clone, Copy)]
pub struct RawMetric {
    interval: f64,
}

impl RawMetric {
    pub fn new(range: PixelRange) -> Self {
        Self {
            interval: range.interval(),
        }
    }
}

impl SimilarityMetric for RawMetric {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn sample_similarity(&self, a: i32, b: i32) -> f64 {
        (self.interval - f64::from((a - b).abs())) / self.interval
    }

    fn pixel_similarity(&self, a: Rgb, b: Rgb) -> f64 {
        let sum: i32 = (0..3).map(|c| (a[c] - b[c]).abs()).sum();
        1.0 - f64::from(sum) / (3.0 * self.interval)
    }
}

/// Euclidean color distance scaled by the color-class penalty.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanClassMetric {
    interval: f64,
    class_weight: f64,
}

impl EuclideanClassMetric {
    pub fn new(range: PixelRange, class_weight: f64) -> Self {
        Self {
            interval: range.interval(),
            class_weight,
        }
    }
}

impl SimilarityMetric for EuclideanClassMetric {
    fn name(&self) -> &'static str {
        "euclidean_class"
    }

    fn sample_similarity(&self, a: i32, b: i32) -> f64 {
        // Single-channel samples carry no ordering pattern.
        (self.interval - f64::from((a - b).abs())) / self.interval
    }

    fn pixel_similarity(&self, a: Rgb, b: Rgb) -> f64 {
        let squared: f64 = (0..3)
            .map(|c| {
                let d = f64::from(a[c] - b[c]);
                d * d
            })
            .sum();
        let normalized = squared.sqrt() / (3.0_f64.sqrt() * self.interval);
        let class_penalty =
            1.0 + self.class_weight * ColorClass::of(a).distance(&ColorClass::of(b)) / CLASS_DISTANCE_MAX;
        1.0 - (normalized * class_penalty).min(1.0)
    }
}

/// Channel-sum distance passed through a moderation curve.
#[derive(Debug, Clone, Copy)]
pub struct ModeratedMetric {
    curve: ModerationCurve,
}

impl ModeratedMetric {
    pub fn new(curve: ModerationCurve) -> Self {
        Self { curve }
    }
}

impl SimilarityMetric for ModeratedMetric {
    fn name(&self) -> &'static str {
        "moderated"
    }

    fn sample_similarity(&self, a: i32, b: i32) -> f64 {
        self.curve.similarity(f64::from((a - b).abs()))
    }

    fn pixel_similarity(&self, a: Rgb, b: Rgb) -> f64 {
        let sum: i32 = (0..3).map(|c| (a[c] - b[c]).abs()).sum();
        self.curve.similarity(f64::from(sum))
    }
}

/// Wraps another metric and discounts matches found far from the pixel's own
/// position. Used with sparse (index-sampled) sequences and by the
/// neighborhood comparator's window search.
pub struct PositionWeightedMetric {
    inner: Box<dyn SimilarityMetric>,
    offset_curve: ModerationCurve,
}

impl PositionWeightedMetric {
    pub fn new(inner: Box<dyn SimilarityMetric>, offset_curve: ModerationCurve) -> Self {
        Self { inner, offset_curve }
    }
}

impl SimilarityMetric for PositionWeightedMetric {
    fn name(&self) -> &'static str {
        "position_weighted"
    }

    fn sample_similarity(&self, a: i32, b: i32) -> f64 {
        self.inner.sample_similarity(a, b)
    }

    fn pixel_similarity(&self, a: Rgb, b: Rgb) -> f64 {
        self.inner.pixel_similarity(a, b)
    }

    fn pixel_similarity_at(
        &self,
        a: Rgb,
        position_a: (usize, usize),
        b: Rgb,
        position_b: (usize, usize),
        _shape: (usize, usize),
    ) -> f64 {
        let dx = position_a.0 as f64 - position_b.0 as f64;
        let dy = position_a.1 as f64 - position_b.1 as f64;
        let offset = (dx * dx + dy * dy).sqrt();
        // Inflate the inner distance by up to 2x for far-away matches; a zero
        // offset leaves the inner similarity untouched.
        let distance = 1.0 - self.inner.pixel_similarity(a, b);
        let factor = 1.0 + self.offset_curve.moderate(offset) / self.offset_curve.limit();
        1.0 - (distance * factor).min(1.0)
    }
}

/// Metric selection and parameters, the serializable half of the
/// configuration surface. [`MetricKind::build`] validates every divisor and
/// returns the boxed strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "metric", rename_all = "snake_case")]
pub enum MetricKind {
    Raw,
    EuclideanClass { class_weight: f64 },
    Moderated { curve: ModerationCurve },
    PositionWeighted {
        base: Box<MetricKind>,
        offset_curve: ModerationCurve,
    },
}

impl Default for MetricKind {
    fn default() -> Self {
        MetricKind::Raw
    }
}

impl MetricKind {
    pub fn validate(&self) -> Result<()> {
        match self {
            MetricKind::Raw => Ok(()),
            MetricKind::EuclideanClass { class_weight } => {
                if class_weight.is_finite() && *class_weight >= 0.0 {
                    Ok(())
                } else {
                    Err(Error::InvalidParameter {
                        name: "class_weight",
                        message: "must be finite and non-negative",
                    })
                }
            }
            MetricKind::Moderated { curve } => curve.validate(),
            MetricKind::PositionWeighted { base, offset_curve } => {
                base.validate()?;
                offset_curve.validate()
            }
        }
    }

    /// Validate parameters and build the metric.
    pub fn build(&self, range: PixelRange) -> Result<Box<dyn SimilarityMetric>> {
        self.validate()?;
        Ok(match self {
            MetricKind::Raw => Box::new(RawMetric::new(range)),
            MetricKind::EuclideanClass { class_weight } => {
                Box::new(EuclideanClassMetric::new(range, *class_weight))
            }
            MetricKind::Moderated { curve } => Box::new(ModeratedMetric::new(*curve)),
            MetricKind::PositionWeighted { base, offset_curve } => {
                Box::new(PositionWeightedMetric::new(base.build(range)?, *offset_curve))
            }
        })
    }
}
