use thiserror::Error;

/// Errors that can cross the library boundary when constructing a [`crate::Demod`]
/// or [`crate::Mod`]. Internal protocol failures never reach here - see
/// [`crate::demod::DemodError`] for those.
#[derive(Debug, Error, PartialEq, Clone, Copy)]
pub enum OokError {
    #[error("tolerance must be in (0.0, 1.0), got {0}")]
    InvalidTolerance(f64),
    #[error("sample rate must be nonzero")]
    ZeroSampleRate,
}
