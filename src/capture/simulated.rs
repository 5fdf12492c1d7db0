//! Synthetic filter, camera and power meter.
//!
//! The filter and its paired sensor share the tuned wavelength, so frames and
//! readings follow a Gaussian transmission curve.  Handy for running the GUI
//! without hardware, and as a fake in tests.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ndarray::Array2;

use super::device::{Camera, DeviceProvider, PowerMeter, TunableFilter};
use crate::data::model::Frame;
use crate::error::{Result, SpectralError};

/// Pass band of the simulated filter.
pub const FILTER_MIN_NM: u32 = 420;
pub const FILTER_MAX_NM: u32 = 730;

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Relative transmission of the light path at `nm`.
fn transmission(nm: u32) -> f64 {
    gaussian(f64::from(nm), 590.0, 70.0, 1.0) + 0.05
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct SimulatedProvider {
    width: usize,
    height: usize,
    /// Wavelength at which the camera stops delivering frames.
    stall_at: Option<u32>,
    closed: Arc<AtomicUsize>,
}

impl SimulatedProvider {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            stall_at: None,
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make every poll at `nm` time out.
    #[cfg(test)]
    pub fn with_stall_at(mut self, nm: u32) -> Self {
        self.stall_at = Some(nm);
        self
    }

    /// Devices closed so far across all sessions.
    #[cfg(test)]
    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn filter(&self, tuned: &Arc<AtomicU32>) -> SimulatedFilter {
        SimulatedFilter {
            tuned: Arc::clone(tuned),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl DeviceProvider for SimulatedProvider {
    fn open_imaging(&self) -> Result<(Box<dyn TunableFilter>, Box<dyn Camera>)> {
        let tuned = Arc::new(AtomicU32::new(FILTER_MIN_NM));
        let camera = SimulatedCamera {
            tuned: Arc::clone(&tuned),
            width: self.width,
            height: self.height,
            exposure: Duration::from_millis(10),
            stall_at: self.stall_at,
            closed: Arc::clone(&self.closed),
        };
        Ok((Box::new(self.filter(&tuned)), Box::new(camera)))
    }

    fn open_power(&self) -> Result<(Box<dyn TunableFilter>, Box<dyn PowerMeter>)> {
        let tuned = Arc::new(AtomicU32::new(FILTER_MIN_NM));
        let meter = SimulatedPowerMeter {
            tuned: Arc::clone(&tuned),
            reads: 0,
            closed: Arc::clone(&self.closed),
        };
        Ok((Box::new(self.filter(&tuned)), Box::new(meter)))
    }
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

pub struct SimulatedFilter {
    tuned: Arc<AtomicU32>,
    closed: Arc<AtomicUsize>,
}

impl TunableFilter for SimulatedFilter {
    fn set_wavelength(&mut self, nm: u32) -> Result<()> {
        if !(FILTER_MIN_NM..=FILTER_MAX_NM).contains(&nm) {
            return Err(SpectralError::Device(format!(
                "{nm} nm is outside the filter range {FILTER_MIN_NM}–{FILTER_MAX_NM} nm"
            )));
        }
        self.tuned.store(nm, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct SimulatedCamera {
    tuned: Arc<AtomicU32>,
    width: usize,
    height: usize,
    exposure: Duration,
    stall_at: Option<u32>,
    closed: Arc<AtomicUsize>,
}

impl SimulatedCamera {
    /// A bright disc on a dim background, scaled by the filter transmission
    /// and the exposure time.  12-bit counts, like a Kiralux sensor.
    fn render(&self, nm: u32) -> Frame {
        let gain = transmission(nm) * self.exposure.as_secs_f64().min(1.0) * 10.0;
        let (cy, cx) = (self.height as f64 / 2.0, self.width as f64 / 2.0);
        let radius = (self.height.min(self.width) as f64 / 3.0).max(1.0);
        Array2::from_shape_fn((self.height, self.width), |(r, c)| {
            let d = ((r as f64 - cy).powi(2) + (c as f64 - cx).powi(2)).sqrt();
            let base = if d <= radius { 400.0 } else { 60.0 };
            (base * gain).clamp(0.0, 4095.0).round() as u16
        })
    }
}

impl Camera for SimulatedCamera {
    fn set_exposure(&mut self, exposure: Duration) -> Result<()> {
        self.exposure = exposure;
        Ok(())
    }

    fn poll_frame(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        let nm = self.tuned.load(Ordering::SeqCst);
        if self.stall_at == Some(nm) {
            std::thread::sleep(timeout);
            return Ok(None);
        }
        Ok(Some(self.render(nm)))
    }

    fn close(&mut self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct SimulatedPowerMeter {
    tuned: Arc<AtomicU32>,
    reads: u64,
    closed: Arc<AtomicUsize>,
}

impl PowerMeter for SimulatedPowerMeter {
    fn read(&mut self) -> Result<f64> {
        self.reads += 1;
        // Deterministic ripple in place of detector noise.
        let ripple = ((self.reads * 7919) % 13) as f64 / 13.0 - 0.5;
        let nm = self.tuned.load(Ordering::SeqCst);
        Ok(transmission(nm) * 1e-3 * (1.0 + 0.01 * ripple))
    }

    fn close(&mut self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_follow_the_tuned_wavelength() {
        let provider = SimulatedProvider::new(16, 12);
        let (mut filter, mut camera) = provider.open_imaging().unwrap();
        camera.set_exposure(Duration::from_millis(500)).unwrap();

        filter.set_wavelength(590).unwrap();
        let peak = camera.poll_frame(Duration::ZERO).unwrap().unwrap();
        filter.set_wavelength(430).unwrap();
        let edge = camera.poll_frame(Duration::ZERO).unwrap().unwrap();

        assert_eq!(peak.dim(), (12, 16));
        assert!(peak[[6, 8]] > edge[[6, 8]]);
        assert!(peak[[6, 8]] > peak[[0, 0]]);
    }

    #[test]
    fn filter_rejects_out_of_band_wavelengths() {
        let provider = SimulatedProvider::new(4, 4);
        let (mut filter, _) = provider.open_imaging().unwrap();
        assert!(filter.set_wavelength(800).is_err());
    }

    #[test]
    fn stalled_camera_returns_nothing() {
        let provider = SimulatedProvider::new(4, 4).with_stall_at(500);
        let (mut filter, mut camera) = provider.open_imaging().unwrap();
        filter.set_wavelength(500).unwrap();
        assert!(camera.poll_frame(Duration::from_millis(1)).unwrap().is_none());
    }

    #[test]
    fn power_meter_peaks_near_590() {
        let provider = SimulatedProvider::new(4, 4);
        let (mut filter, mut meter) = provider.open_power().unwrap();
        filter.set_wavelength(590).unwrap();
        let peak = meter.read().unwrap();
        filter.set_wavelength(700).unwrap();
        assert!(meter.read().unwrap() < peak);
    }
}
