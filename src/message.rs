//! Messages sent from background workers to the UI thread.

use std::path::PathBuf;

use crate::capture::CaptureReport;
use crate::data::calibration::PowerReading;
use crate::data::model::ImageStack;

pub enum AppMessage {
    /// Capture progress: fraction done and a status line.
    CaptureProgress(f32, String),

    /// A frame could not be normalized; its raw data was kept.
    FrameFlagged { wavelength: u32, reason: String },

    /// Capture finished; the stack has also been written to `report.output`.
    CaptureComplete(Box<ImageStack>, CaptureReport),

    /// Capture aborted (timeout, device failure, cancellation).
    CaptureError(String),

    /// Power sweep progress.
    PowerProgress(f32, String),

    /// Power sweep finished and the table was written to the path.
    PowerComplete(PathBuf, Vec<PowerReading>),

    PowerError(String),
}
