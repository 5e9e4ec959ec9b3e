use thiserror::Error;

/// Errors surfaced by the tracing engine.
///
/// None of these are ever allowed to propagate into instrumented application
/// code: adapter-facing entry points recover from them internally and degrade
/// to an incomplete or missing span instead.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// An ID string was not 16 or 32 lowercase hex characters.
    #[error("{0:?} is not a valid unsigned hex ID, expected 16 or 32 lowercase hex characters")]
    InvalidId(String),

    /// A buffer passed to the ID codec was too small for the requested write.
    #[error("target buffer of {len} bytes cannot hold {needed} bytes at offset {offset} from the right")]
    BufferTooSmall {
        /// Length of the target buffer.
        len: usize,
        /// Bytes required by the encoded ID.
        needed: usize,
        /// Requested offset from the right end of the buffer.
        offset: usize,
    },

    /// Exporting a batch of finished spans failed.
    #[error("span export failed: {0}")]
    Export(String),
}
