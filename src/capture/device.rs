//! Hardware seams for the filter, the camera and the power meter.
//!
//! Vendor SDKs stay behind these traits; the capture and power-sweep loops
//! only ever see a [`TunableFilter`] plus a [`Camera`] or [`PowerMeter`].

use std::sync::Arc;
use std::time::Duration;

use crate::config::{DeviceBackend, DeviceConfig};
use crate::data::model::Frame;
use crate::error::{Result, SpectralError};

use super::simulated::SimulatedProvider;

/// A liquid-crystal tunable filter (Kurios-style).
pub trait TunableFilter: Send {
    /// Tune the pass band.  Blocks until the device acknowledged the command.
    fn set_wavelength(&mut self, nm: u32) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// A camera in continuous acquisition.
pub trait Camera: Send {
    fn set_exposure(&mut self, exposure: Duration) -> Result<()>;

    /// Wait up to `timeout` for the next frame.  `Ok(None)` means nothing
    /// arrived in time; the caller decides whether that is fatal.
    fn poll_frame(&mut self, timeout: Duration) -> Result<Option<Frame>>;

    fn close(&mut self) -> Result<()>;
}

/// An optical power meter.
pub trait PowerMeter: Send {
    /// One reading in watts.
    fn read(&mut self) -> Result<f64>;

    fn close(&mut self) -> Result<()>;
}

/// Discovers and opens device pairs.
pub trait DeviceProvider: Send + Sync {
    fn open_imaging(&self) -> Result<(Box<dyn TunableFilter>, Box<dyn Camera>)>;

    fn open_power(&self) -> Result<(Box<dyn TunableFilter>, Box<dyn PowerMeter>)>;
}

/// Provider used when no hardware backend is configured.
pub struct NoDevices;

impl DeviceProvider for NoDevices {
    fn open_imaging(&self) -> Result<(Box<dyn TunableFilter>, Box<dyn Camera>)> {
        Err(SpectralError::DeviceUnavailable(
            "no filter or camera backend configured".to_string(),
        ))
    }

    fn open_power(&self) -> Result<(Box<dyn TunableFilter>, Box<dyn PowerMeter>)> {
        Err(SpectralError::DeviceUnavailable(
            "no filter or power meter backend configured".to_string(),
        ))
    }
}

pub fn provider_for(config: &DeviceConfig) -> Arc<dyn DeviceProvider> {
    match config.backend {
        DeviceBackend::Simulated => Arc::new(SimulatedProvider::new(
            config.frame_width,
            config.frame_height,
        )),
        DeviceBackend::None => Arc::new(NoDevices),
    }
}

// ---------------------------------------------------------------------------
// Sessions – devices are released when the session goes out of scope
// ---------------------------------------------------------------------------

/// An open filter + camera pair.  Both are closed on drop, including when a
/// capture run bails out with an error.
pub struct ImagingSession {
    filter: Box<dyn TunableFilter>,
    camera: Box<dyn Camera>,
}

impl ImagingSession {
    pub fn open(provider: &dyn DeviceProvider) -> Result<Self> {
        let (filter, camera) = provider.open_imaging()?;
        log::info!("imaging session opened");
        Ok(Self { filter, camera })
    }

    pub fn filter(&mut self) -> &mut dyn TunableFilter {
        self.filter.as_mut()
    }

    pub fn camera(&mut self) -> &mut dyn Camera {
        self.camera.as_mut()
    }
}

impl Drop for ImagingSession {
    fn drop(&mut self) {
        if let Err(e) = self.camera.close() {
            log::warn!("failed to close camera: {e}");
        }
        if let Err(e) = self.filter.close() {
            log::warn!("failed to close filter: {e}");
        }
        log::info!("imaging session closed");
    }
}

/// An open filter + power meter pair, closed on drop.
pub struct PowerSession {
    filter: Box<dyn TunableFilter>,
    meter: Box<dyn PowerMeter>,
}

impl PowerSession {
    pub fn open(provider: &dyn DeviceProvider) -> Result<Self> {
        let (filter, meter) = provider.open_power()?;
        log::info!("power session opened");
        Ok(Self { filter, meter })
    }

    pub fn filter(&mut self) -> &mut dyn TunableFilter {
        self.filter.as_mut()
    }

    pub fn meter(&mut self) -> &mut dyn PowerMeter {
        self.meter.as_mut()
    }
}

impl Drop for PowerSession {
    fn drop(&mut self) {
        if let Err(e) = self.meter.close() {
            log::warn!("failed to close power meter: {e}");
        }
        if let Err(e) = self.filter.close() {
            log::warn!("failed to close filter: {e}");
        }
        log::info!("power session closed");
    }
}
