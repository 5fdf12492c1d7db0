use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Domain errors
// ---------------------------------------------------------------------------

/// Everything that can go wrong while loading, normalizing, extracting or
/// capturing a hyperspectral stack.
#[derive(Debug, Error)]
pub enum SpectralError {
    /// No filter or camera could be opened at session start.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A device call failed after the session was open.
    #[error("device error: {0}")]
    Device(String),

    /// The camera produced no frame within the poll timeout.
    #[error("timed out waiting for a frame at {wavelength} nm")]
    FrameTimeout { wavelength: u32 },

    /// The calibration map has no entry for this wavelength.
    #[error("no calibration data for {wavelength} nm")]
    CalibrationMissing { wavelength: u32 },

    /// The calibration file exists but could not be turned into a map.
    #[error("failed to load calibration {path}: {reason}")]
    CalibrationLoad { path: PathBuf, reason: String },

    /// A calibration TIFF with the wrong number of pages.
    #[error("calibration file has {found} pages, expected {expected}")]
    CalibrationPageCount { expected: usize, found: usize },

    /// A scaled pixel did not fit into 16 bits.
    #[error("normalized value {max_value} at {wavelength} nm exceeds the 16-bit range")]
    NormalizationOverflow { wavelength: u32, max_value: f64 },

    /// A reference pixel of zero.
    #[error("zero calibration reference at ({row}, {col}) for {wavelength} nm")]
    DivideByZero { wavelength: u32, row: usize, col: usize },

    /// A reference pixel that is negative, NaN or infinite.
    #[error("unusable calibration reference {value} at ({row}, {col}) for {wavelength} nm")]
    InvalidReference {
        wavelength: u32,
        row: usize,
        col: usize,
        value: f64,
    },

    #[error("invalid wavelength range {min}..={max} nm")]
    InvalidRange { min: u32, max: u32 },

    #[error("inverted region: top-left ({top}, {left}) lies past bottom-right ({bottom}, {right})")]
    InvalidRegion {
        top: usize,
        left: usize,
        bottom: usize,
        right: usize,
    },

    #[error("({row}, {col}) is outside a {height}x{width} frame")]
    OutOfBounds {
        row: usize,
        col: usize,
        height: usize,
        width: usize,
    },

    #[error("wavelength range has {range} entries but the stack has {slides} slides")]
    WavelengthMismatch { range: usize, slides: usize },

    #[error("frame shape {found:?} does not match {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("unsupported TIFF sample format: {0}")]
    UnsupportedSampleFormat(String),

    /// A malformed form field; rendered inline, never propagated further.
    #[error("{field}: {message}")]
    InputValidation { field: &'static str, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Tiff(#[from] tiff::TiffError),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl SpectralError {
    /// Whether the error only affects the current frame, so a capture run
    /// can keep going with the raw data in that slot.
    pub fn is_frame_level(&self) -> bool {
        matches!(
            self,
            SpectralError::CalibrationMissing { .. }
                | SpectralError::NormalizationOverflow { .. }
                | SpectralError::DivideByZero { .. }
                | SpectralError::InvalidReference { .. }
                | SpectralError::ShapeMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SpectralError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_level_errors_are_classified() {
        assert!(SpectralError::CalibrationMissing { wavelength: 500 }.is_frame_level());
        assert!(SpectralError::DivideByZero {
            wavelength: 500,
            row: 0,
            col: 0
        }
        .is_frame_level());
        assert!(SpectralError::InvalidReference {
            wavelength: 500,
            row: 0,
            col: 0,
            value: f64::NAN
        }
        .is_frame_level());
        assert!(!SpectralError::FrameTimeout { wavelength: 500 }.is_frame_level());
        assert!(!SpectralError::Cancelled.is_frame_level());
    }

    #[test]
    fn messages_name_the_wavelength() {
        let msg = SpectralError::FrameTimeout { wavelength: 612 }.to_string();
        assert!(msg.contains("612 nm"));
    }
}
