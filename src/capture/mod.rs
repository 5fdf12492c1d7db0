//! Hardware-driven acquisition: device seams, the capture sweep and the
//! power-meter sweep.  Both sweeps run on a worker thread and talk to the UI
//! through [`crate::message::AppMessage`].

pub mod device;
pub mod power;
pub mod sequencer;
pub mod simulated;

pub use device::{provider_for, DeviceProvider};
pub use power::{power_worker, PowerPlan};
pub use sequencer::{capture_worker, CapturePlan, CaptureReport, MAX_EXPOSURE};
