//! Power-meter sweep producing the CSV calibration table.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use super::device::{DeviceProvider, PowerSession};
use super::sequencer::{check_cancel, wait};
use crate::data::calibration::{write_power_csv, PowerReading};
use crate::data::model::WavelengthRange;
use crate::error::{Result, SpectralError};
use crate::message::AppMessage;

#[derive(Debug, Clone)]
pub struct PowerPlan {
    pub range: WavelengthRange,
    /// Readings averaged per wavelength.
    pub samples: usize,
    pub settle: Duration,
    pub output: PathBuf,
}

/// Mean and population standard deviation.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Tune through `plan.range`, average `plan.samples` readings at each step,
/// and write the table to `plan.output`.
pub fn run_power_sweep(
    session: &mut PowerSession,
    plan: &PowerPlan,
    tx: &Sender<AppMessage>,
    cancel: &AtomicBool,
) -> Result<Vec<PowerReading>> {
    if plan.samples == 0 {
        return Err(SpectralError::InputValidation {
            field: "samples",
            message: "at least one reading per wavelength is required".to_string(),
        });
    }
    let total = plan.range.len();
    let mut readings = Vec::with_capacity(total);
    let mut buf = Vec::with_capacity(plan.samples);

    for (i, wavelength) in plan.range.iter().enumerate() {
        check_cancel(cancel)?;
        session.filter().set_wavelength(wavelength)?;
        wait(plan.settle, cancel)?;

        buf.clear();
        for _ in 0..plan.samples {
            buf.push(session.meter().read()?);
        }
        let (mean, std_dev) = mean_std(&buf);
        log::debug!("{wavelength} nm: {mean:.4e} W ± {std_dev:.2e}");
        readings.push(PowerReading {
            wavelength,
            mean,
            std_dev,
        });

        let _ = tx.send(AppMessage::PowerProgress(
            (i + 1) as f32 / total as f32,
            format!("Measured {wavelength} nm ({}/{total})", i + 1),
        ));
    }

    write_power_csv(&plan.output, &readings)?;
    log::info!(
        "power table with {} rows written to {}",
        readings.len(),
        plan.output.display()
    );
    Ok(readings)
}

pub fn power_worker(
    provider: Arc<dyn DeviceProvider>,
    plan: PowerPlan,
    tx: Sender<AppMessage>,
    cancel: Arc<AtomicBool>,
) {
    let outcome = PowerSession::open(provider.as_ref())
        .and_then(|mut session| run_power_sweep(&mut session, &plan, &tx, &cancel));

    match outcome {
        Ok(readings) => {
            let _ = tx.send(AppMessage::PowerComplete(plan.output, readings));
        }
        Err(e) => {
            log::error!("power sweep aborted: {e}");
            let _ = tx.send(AppMessage::PowerError(e.to_string()));
        }
    }
}
