//! Error types

use thiserror::Error;

/// All errors the codec core can surface. Errors are reported at
/// packet boundaries; partially decoded state is discarded by the
/// caller-facing wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The bitstream ended before the expected data.
    #[error("bitstream ended before the expected data")]
    Truncated,

    /// The packet header carries an unknown mode or pixel format.
    #[error("unknown frame mode or pixel format")]
    InvalidHeader,

    /// The transmitted mesh code lengths do not form a prefix code.
    #[error("mesh code lengths do not form a prefix code")]
    InvalidHuffman,

    /// The hop stream is internally inconsistent, e.g. a run-length
    /// episode claims more samples than the plane holds.
    #[error("malformed hop stream")]
    InvalidBitstream,

    /// Elastic geometry produced a block with a non-positive
    /// downsampled side.
    #[error("elastic geometry produced an empty block")]
    GeometryOverflow,

    /// A delta packet arrived before any intra frame was decoded.
    #[error("delta frame received before any reference frame")]
    DeltaWithoutReference,

    /// The encoder was configured with out-of-range options.
    #[error("invalid encoder configuration")]
    InvalidConfiguration,
}

/// Alias for `Result` wrapping the codec [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
