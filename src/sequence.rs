use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Cluster label of a sequence that has not been classified yet.
pub const UNCLASSIFIED: i32 = -1;

/// Inclusive range of valid pixel sample values.
///
/// The distance between `min` and `max` is the scale denominator of every
/// metric, so it is validated strictly positive before any comparison runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRange {
    pub min: i32,
    pub max: i32,
}

impl PixelRange {
    pub fn new(min: i32, max: i32) -> Result<Self> {
        if max <= min {
            return Err(Error::InvalidParameter {
                name: "pixel_range",
                message: "max must be strictly greater than min",
            });
        }
        Ok(Self { min, max })
    }

    /// Width of the range, always strictly positive.
    pub fn interval(&self) -> f64 {
        f64::from(self.max - self.min)
    }
}

impl Default for PixelRange {
    fn default() -> Self {
        Self { min: 0, max: 255 }
    }
}

/// A frame (or reduced image) as parallel per-channel sample arrays, plus the
/// mutable classification state the classifier writes back.
///
/// Pixel buffers are allocated by the caller and only ever read by this crate;
/// classification mutates `score` and `classification` in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequence {
    red: Vec<i32>,
    green: Vec<i32>,
    blue: Vec<i32>,
    /// Optional precomputed intensity channel, aggregated like the color
    /// channels when present.
    gray: Option<Vec<i32>>,
    /// Optional index permutation for sparse (sampled) comparison.
    samples: Option<Vec<usize>>,
    rows: usize,
    columns: usize,
    /// Similarity to the reference sequence of this sequence's cluster.
    /// Meaningful only once `classification != UNCLASSIFIED`.
    pub score: f64,
    /// Cluster label, `UNCLASSIFIED` until the classifier has run.
    pub classification: i32,
}

impl Sequence {
    /// Build a sequence from three equal-length channel buffers.
    pub fn new(red: Vec<i32>, green: Vec<i32>, blue: Vec<i32>, rows: usize, columns: usize) -> Result<Self> {
        let expected = rows * columns;
        if expected == 0 {
            return Err(Error::EmptyInput);
        }
        for channel in [&red, &green, &blue] {
            if channel.len() != expected {
                return Err(Error::ChannelLength {
                    expected,
                    found: channel.len(),
                });
            }
        }
        Ok(Self {
            red,
            green,
            blue,
            gray: None,
            samples: None,
            rows,
            columns,
            score: 0.0,
            classification: UNCLASSIFIED,
        })
    }

    /// Build a sequence from an already-decoded image. Decoding and scaling
    /// stay with the caller; this only unpacks channels.
    pub fn from_image(image: &DynamicImage) -> Result<Self> {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        let len = (width * height) as usize;
        let mut red = Vec::with_capacity(len);
        let mut green = Vec::with_capacity(len);
        let mut blue = Vec::with_capacity(len);
        for pixel in rgb.pixels() {
            red.push(i32::from(pixel[0]));
            green.push(i32::from(pixel[1]));
            blue.push(i32::from(pixel[2]));
        }
        Self::new(red, green, blue, height as usize, width as usize)
    }

    /// Attach a precomputed intensity channel.
    pub fn with_gray_channel(mut self, gray: Vec<i32>) -> Result<Self> {
        let expected = self.len();
        if gray.len() != expected {
            return Err(Error::ChannelLength {
                expected,
                found: gray.len(),
            });
        }
        self.gray = Some(gray);
        Ok(self)
    }

    /// Compute and attach an intensity channel using the standard luminance
    /// weights (0.299, 0.587, 0.114).
    pub fn with_gray(self) -> Self {
        let gray = self
            .red
            .iter()
            .zip(&self.green)
            .zip(&self.blue)
            .map(|((&r, &g), &b)| {
                (0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b)).round() as i32
            })
            .collect();
        Self {
            gray: Some(gray),
            ..self
        }
    }

    /// Attach an index permutation for sparse comparison. Every index must
    /// point inside the pixel buffer.
    pub fn with_samples(mut self, samples: Vec<usize>) -> Result<Self> {
        let len = self.len();
        if let Some(&index) = samples.iter().find(|&&index| index >= len) {
            return Err(Error::SampleIndex { index, len });
        }
        self.samples = Some(samples);
        Ok(self)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Number of pixels (`rows * columns`).
    pub fn len(&self) -> usize {
        self.rows * self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn red(&self) -> &[i32] {
        &self.red
    }

    pub fn green(&self) -> &[i32] {
        &self.green
    }

    pub fn blue(&self) -> &[i32] {
        &self.blue
    }

    pub fn gray(&self) -> Option<&[i32]> {
        self.gray.as_deref()
    }

    pub fn samples(&self) -> Option<&[usize]> {
        self.samples.as_deref()
    }

    /// All channels present on this sequence, color first.
    pub fn channels(&self) -> Vec<&[i32]> {
        let mut channels = vec![self.red.as_slice(), self.green.as_slice(), self.blue.as_slice()];
        if let Some(gray) = &self.gray {
            channels.push(gray.as_slice());
        }
        channels
    }

    pub fn channel_count(&self) -> usize {
        3 + usize::from(self.gray.is_some())
    }

    /// RGB samples at `(x, y)`, `x` being the column.
    pub fn pixel(&self, x: usize, y: usize) -> [i32; 3] {
        let index = y * self.columns + x;
        [self.red[index], self.green[index], self.blue[index]]
    }

    /// RGB samples at a flat pixel index.
    pub fn pixel_at(&self, index: usize) -> [i32; 3] {
        [self.red[index], self.green[index], self.blue[index]]
    }

    /// `(x, y)` position of a flat pixel index.
    pub fn position(&self, index: usize) -> (usize, usize) {
        (index % self.columns, index / self.columns)
    }

    /// True when both sequences have the same shape.
    pub fn same_shape(&self, other: &Sequence) -> bool {
        self.rows == other.rows && self.columns == other.columns
    }

    /// Fail unless `other` matches this sequence's shape.
    pub fn check_shape(&self, other: &Sequence) -> Result<()> {
        if self.same_shape(other) {
            Ok(())
        } else {
            Err(Error::ShapeMismatch {
                expected_rows: self.rows,
                expected_columns: self.columns,
                rows: other.rows,
                columns: other.columns,
            })
        }
    }

    /// Reset classification state to the unclassified sentinel.
    pub fn reset_classification(&mut self) {
        self.score = 0.0;
        self.classification = UNCLASSIFIED;
    }
}
