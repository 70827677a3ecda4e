use thiserror::Error;

/// Errors reported by the similarity core.
///
/// Configuration problems are detected before any comparison runs; a single
/// pairwise comparison itself cannot fail, it only produces a score.
#[derive(Debug, Error)]
pub enum Error {
    /// Input slice of sequences (or a pixel buffer) is empty.
    #[error("empty input")]
    EmptyInput,

    /// Invalid configuration value.
    #[error("invalid parameter {name}: {message}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Human-readable explanation.
        message: &'static str,
    },

    /// Two sequences (or two channel slices) do not share the same shape.
    #[error("shape mismatch: expected {expected_rows}x{expected_columns}, found {rows}x{columns}")]
    ShapeMismatch {
        expected_rows: usize,
        expected_columns: usize,
        rows: usize,
        columns: usize,
    },

    /// A channel buffer does not match the declared `rows * columns` length.
    #[error("channel length mismatch: expected {expected}, found {found}")]
    ChannelLength { expected: usize, found: usize },

    /// A sample index points outside the pixel buffer.
    #[error("sample index {index} out of range for {len} pixels")]
    SampleIndex { index: usize, len: usize },

    /// Classification was stopped through the cancellation token.
    /// Labels assigned before the stop are kept.
    #[error("classification cancelled")]
    Cancelled,

    /// The worker pool could not be built; the whole classification call fails.
    #[error("thread pool setup failed: {0}")]
    ThreadPool(String),
}

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;
