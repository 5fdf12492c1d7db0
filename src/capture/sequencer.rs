//! Wavelength sweep: tune the filter, wait, grab a frame, normalize, append.

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::device::{Camera, DeviceProvider, ImagingSession};
use ndarray::Array2;

use crate::data::calibration::{CalibrationKind, CalibrationMap};
use crate::data::loader::StackWriter;
use crate::data::model::{Frame, ImageStack, WavelengthRange};
use crate::data::normalize::{divide, normalize, rescale_to_peak, run_peak};
use crate::error::{Result, SpectralError};
use crate::message::AppMessage;

/// Granularity of sleeps and polls, so cancellation is noticed quickly.
const SLICE: Duration = Duration::from_millis(25);

/// Longest exposure the capture form accepts.
pub const MAX_EXPOSURE: Duration = Duration::from_secs(3600);

/// Cap on any single wait, so deadlines stay representable.
const MAX_WAIT: Duration = Duration::from_secs(24 * 3600);

/// Everything a capture run needs besides the devices.
#[derive(Debug, Clone)]
pub struct CapturePlan {
    pub range: WavelengthRange,
    pub exposure: Duration,
    pub settle_margin: Duration,
    pub poll_timeout: Duration,
    pub output: PathBuf,
    pub calibration: Option<Arc<CalibrationMap>>,
}

impl CapturePlan {
    /// Wait after each filter step: one exposure plus the margin.
    pub fn settle_delay(&self) -> Duration {
        self.exposure.saturating_add(self.settle_margin)
    }
}

/// A slide that kept its raw data because normalization failed.
#[derive(Debug, Clone, PartialEq)]
pub struct FlaggedFrame {
    pub wavelength: u32,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct CaptureReport {
    pub range: WavelengthRange,
    pub output: PathBuf,
    pub normalized: bool,
    pub flagged: Vec<FlaggedFrame>,
    pub elapsed: Duration,
}

/// A power-table slide waiting for the run's peak.
enum Pending {
    Divided(Array2<f64>),
    Raw(Frame),
}

/// Sweep `plan.range` on an open session.  Every wavelength yields exactly
/// one slide.
///
/// Without calibration, or with reference images, each slide is written to
/// `plan.output` as it arrives.  With a power table the quotients are held
/// until the sweep ends, rescaled so the run's brightest pixel maps to 256,
/// and written then.
///
/// A frame timeout or device error ends the run.  Normalization failures only
/// flag the frame: its raw data takes the slot so slide `i` stays at
/// `min + i`.
pub fn run_capture(
    session: &mut ImagingSession,
    plan: &CapturePlan,
    tx: &Sender<AppMessage>,
    cancel: &AtomicBool,
) -> Result<(ImageStack, CaptureReport)> {
    let start = Instant::now();
    let total = plan.range.len();
    let mut stack = ImageStack::with_capacity(total);
    let mut flagged = Vec::new();
    let mut pending = Vec::new();
    let mut writer = StackWriter::create(&plan.output)?;

    session.camera().set_exposure(plan.exposure)?;
    log::info!(
        "capturing {} ({total} slides) to {}",
        plan.range,
        plan.output.display()
    );

    for (i, wavelength) in plan.range.iter().enumerate() {
        check_cancel(cancel)?;
        session.filter().set_wavelength(wavelength)?;
        wait(plan.settle_delay(), cancel)?;
        let raw = poll_frame(session.camera(), wavelength, plan.poll_timeout, cancel)?;

        match plan.calibration.as_deref() {
            None => append(&mut stack, &mut writer, raw)?,
            Some(calibration) if calibration.kind() == CalibrationKind::PowerTable => {
                let slot = match divide(calibration, wavelength, &raw) {
                    Ok(quotient) => Pending::Divided(quotient),
                    Err(e) if e.is_frame_level() => {
                        flag(tx, &mut flagged, wavelength, &e);
                        Pending::Raw(raw)
                    }
                    Err(e) => return Err(e),
                };
                pending.push(slot);
            }
            Some(calibration) => {
                let slide = match normalize(calibration, wavelength, &raw) {
                    Ok(frame) => frame,
                    Err(e) if e.is_frame_level() => {
                        flag(tx, &mut flagged, wavelength, &e);
                        raw
                    }
                    Err(e) => return Err(e),
                };
                append(&mut stack, &mut writer, slide)?;
            }
        }
        log::debug!("slide {}/{total} at {wavelength} nm", i + 1);

        let _ = tx.send(AppMessage::CaptureProgress(
            (i + 1) as f32 / total as f32,
            format!("Captured {wavelength} nm ({}/{total})", i + 1),
        ));
    }

    if !pending.is_empty() {
        let peak = run_peak(pending.iter().filter_map(|p| match p {
            Pending::Divided(q) => Some(q),
            Pending::Raw(_) => None,
        }));
        log::info!("power-normalizing {} slides to peak {peak:.4e}", pending.len());
        for slot in pending {
            let slide = match slot {
                Pending::Divided(quotient) => rescale_to_peak(&quotient, peak),
                Pending::Raw(raw) => raw,
            };
            append(&mut stack, &mut writer, slide)?;
        }
    }

    let report = CaptureReport {
        range: plan.range,
        output: plan.output.clone(),
        normalized: plan.calibration.is_some(),
        flagged,
        elapsed: start.elapsed(),
    };
    log::info!(
        "capture finished: {} pages written, {} flagged, {:.1?}",
        writer.pages(),
        report.flagged.len(),
        report.elapsed
    );
    Ok((stack, report))
}

/// Add a slide to the stack, then to the file, so both always agree.
fn append(stack: &mut ImageStack, writer: &mut StackWriter<File>, slide: Frame) -> Result<()> {
    stack.push(slide)?;
    if let Some(slide) = stack.slides().last() {
        writer.write_slide(slide)?;
    }
    Ok(())
}

fn flag(tx: &Sender<AppMessage>, flagged: &mut Vec<FlaggedFrame>, wavelength: u32, e: &SpectralError) {
    log::warn!("keeping raw frame at {wavelength} nm: {e}");
    let reason = e.to_string();
    let _ = tx.send(AppMessage::FrameFlagged {
        wavelength,
        reason: reason.clone(),
    });
    flagged.push(FlaggedFrame { wavelength, reason });
}

/// Background entry point: open the devices, run, report the outcome.
/// The session is dropped (and the devices released) before the final
/// message is sent.
pub fn capture_worker(
    provider: Arc<dyn DeviceProvider>,
    plan: CapturePlan,
    tx: Sender<AppMessage>,
    cancel: Arc<AtomicBool>,
) {
    let outcome = ImagingSession::open(provider.as_ref())
        .and_then(|mut session| run_capture(&mut session, &plan, &tx, &cancel));

    match outcome {
        Ok((stack, report)) => {
            let _ = tx.send(AppMessage::CaptureComplete(Box::new(stack), report));
        }
        Err(e) => {
            log::error!("capture aborted: {e}");
            let _ = tx.send(AppMessage::CaptureError(e.to_string()));
        }
    }
}

pub(crate) fn check_cancel(cancel: &AtomicBool) -> Result<()> {
    if cancel.load(Ordering::SeqCst) {
        Err(SpectralError::Cancelled)
    } else {
        Ok(())
    }
}

/// Deadline `total` from now, capped at [`MAX_WAIT`].
fn deadline_after(total: Duration) -> Instant {
    Instant::now() + total.min(MAX_WAIT)
}

/// Sleep for `total`, waking every slice to look at the cancel flag.
pub(crate) fn wait(total: Duration, cancel: &AtomicBool) -> Result<()> {
    let deadline = deadline_after(total);
    loop {
        check_cancel(cancel)?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        std::thread::sleep((deadline - now).min(SLICE));
    }
}

fn poll_frame(
    camera: &mut dyn Camera,
    wavelength: u32,
    timeout: Duration,
    cancel: &AtomicBool,
) -> Result<Frame> {
    let deadline = deadline_after(timeout);
    loop {
        check_cancel(cancel)?;
        let now = Instant::now();
        if now >= deadline {
            return Err(SpectralError::FrameTimeout { wavelength });
        }
        if let Some(frame) = camera.poll_frame((deadline - now).min(SLICE))? {
            return Ok(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::device::{PowerMeter, TunableFilter};
    use crate::capture::power::{power_worker, PowerPlan};
    use crate::capture::simulated::SimulatedProvider;
    use crate::data::calibration::Reference;
    use crate::data::loader::read_stack;
    use std::sync::mpsc::channel;

    fn plan(dir: &std::path::Path, min: u32, max: u32) -> CapturePlan {
        CapturePlan {
            range: WavelengthRange::new(min, max).unwrap(),
            exposure: Duration::from_millis(1),
            settle_margin: Duration::ZERO,
            poll_timeout: Duration::from_millis(60),
            output: dir.join("run.tif"),
            calibration: None,
        }
    }

    #[test]
    fn one_slide_per_wavelength_on_disk_and_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let provider = SimulatedProvider::new(10, 8);
        let mut session = ImagingSession::open(&provider).unwrap();
        let (tx, rx) = channel();
        let plan = plan(dir.path(), 550, 560);

        let (stack, report) =
            run_capture(&mut session, &plan, &tx, &AtomicBool::new(false)).unwrap();
        assert_eq!(stack.len(), 11);
        assert_eq!(report.range.wavelength_at(10), Some(560));
        assert!(report.flagged.is_empty());

        let on_disk = read_stack(&plan.output).unwrap();
        assert_eq!(on_disk.len(), 11);
        assert_eq!(on_disk.slide(3), stack.slide(3));

        let progress = rx
            .try_iter()
            .filter(|m| matches!(m, AppMessage::CaptureProgress(..)))
            .count();
        assert_eq!(progress, 11);
    }

    #[test]
    fn calibration_normalizes_and_flags_missing_wavelengths() {
        let dir = tempfile::tempdir().unwrap();
        let provider = SimulatedProvider::new(6, 4);
        let mut session = ImagingSession::open(&provider).unwrap();
        let (tx, rx) = channel();
        let mut plan = plan(dir.path(), 600, 603);
        // Covers 600..=601 only.
        let reference = Reference::Frame(Array2::from_elem((4, 6), 256.0));
        plan.calibration = Some(Arc::new(
            CalibrationMap::from_references(600, vec![reference; 2]).unwrap(),
        ));

        let (stack, report) =
            run_capture(&mut session, &plan, &tx, &AtomicBool::new(false)).unwrap();
        assert_eq!(stack.len(), 4);
        assert!(report.normalized);
        let flagged: Vec<u32> = report.flagged.iter().map(|f| f.wavelength).collect();
        assert_eq!(flagged, vec![602, 603]);
        assert!(rx
            .try_iter()
            .any(|m| matches!(m, AppMessage::FrameFlagged { wavelength: 602, .. })));
    }

    #[test]
    fn timeout_aborts_the_run_and_releases_devices() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(SimulatedProvider::new(4, 4).with_stall_at(552));
        let (tx, rx) = channel();

        capture_worker(
            provider.clone(),
            plan(dir.path(), 550, 555),
            tx,
            Arc::new(AtomicBool::new(false)),
        );

        let last = rx.try_iter().last().unwrap();
        match last {
            AppMessage::CaptureError(msg) => assert!(msg.contains("552 nm"), "{msg}"),
            _ => panic!("expected a capture error"),
        }
        assert_eq!(provider.closed_count(), 2);
    }

    #[test]
    fn cancelled_run_stops_before_the_first_slide() {
        let dir = tempfile::tempdir().unwrap();
        let provider = SimulatedProvider::new(4, 4);
        let mut session = ImagingSession::open(&provider).unwrap();
        let (tx, _rx) = channel();

        let err = run_capture(
            &mut session,
            &plan(dir.path(), 500, 510),
            &tx,
            &AtomicBool::new(true),
        )
        .unwrap_err();
        assert!(matches!(err, SpectralError::Cancelled));
    }

    #[test]
    fn settle_delay_adds_margin_to_exposure() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = plan(dir.path(), 500, 501);
        plan.exposure = Duration::from_secs(5);
        plan.settle_margin = Duration::from_millis(300);
        assert_eq!(plan.settle_delay(), Duration::from_millis(5300));
    }

    #[test]
    fn power_table_capture_peaks_at_256() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(SimulatedProvider::new(6, 4));
        let power = PowerPlan {
            range: WavelengthRange::new(550, 560).unwrap(),
            samples: 3,
            settle: Duration::ZERO,
            output: dir.path().join("Calib.csv"),
        };
        let (tx, _rx) = channel();
        power_worker(provider.clone(), power.clone(), tx, Arc::new(AtomicBool::new(false)));

        let calibration = CalibrationMap::load(&power.output).unwrap();
        assert_eq!(calibration.kind(), CalibrationKind::PowerTable);
        let mut plan = plan(dir.path(), 550, 560);
        plan.calibration = Some(Arc::new(calibration));

        let mut session = ImagingSession::open(provider.as_ref()).unwrap();
        let (tx, _rx) = channel();
        let (stack, report) =
            run_capture(&mut session, &plan, &tx, &AtomicBool::new(false)).unwrap();
        assert!(report.normalized);
        assert!(report.flagged.is_empty());
        assert_eq!(stack.len(), 11);

        let peak = stack.slides().iter().flat_map(|s| s.iter()).copied().max();
        assert_eq!(peak, Some(256));
        let on_disk = read_stack(&plan.output).unwrap();
        assert_eq!(on_disk.len(), 11);
        assert_eq!(on_disk.slide(5), stack.slide(5));
    }

    #[test]
    fn power_table_flags_wavelengths_it_does_not_cover() {
        let dir = tempfile::tempdir().unwrap();
        let provider = SimulatedProvider::new(6, 4);
        let readings: Vec<_> = (600..=601)
            .map(|wavelength| crate::data::calibration::PowerReading {
                wavelength,
                mean: 1e-3,
                std_dev: 1e-6,
            })
            .collect();
        let mut plan = plan(dir.path(), 600, 602);
        plan.calibration = Some(Arc::new(
            CalibrationMap::from_power_readings(&readings).unwrap(),
        ));

        let mut session = ImagingSession::open(&provider).unwrap();
        let (tx, _rx) = channel();
        let (stack, report) =
            run_capture(&mut session, &plan, &tx, &AtomicBool::new(false)).unwrap();
        let flagged: Vec<u32> = report.flagged.iter().map(|f| f.wavelength).collect();
        assert_eq!(flagged, vec![602]);
        assert_eq!(stack.len(), 3);
        // The uncovered slide keeps its raw counts, the others are rescaled.
        let max = |i: usize| stack.slide(i).unwrap().iter().copied().max().unwrap();
        assert_eq!(max(0).max(max(1)), 256);
        assert!(max(2) > 0 && max(2) <= 4095);
    }

    #[test]
    fn cancel_interrupts_a_stalled_poll() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(SimulatedProvider::new(4, 4).with_stall_at(550));
        let mut plan = plan(dir.path(), 550, 555);
        plan.poll_timeout = Duration::from_secs(10);
        let (tx, rx) = channel();
        let cancel = Arc::new(AtomicBool::new(false));

        let started = Instant::now();
        let worker = {
            let provider = provider.clone();
            let cancel = Arc::clone(&cancel);
            std::thread::spawn(move || capture_worker(provider, plan, tx, cancel))
        };
        std::thread::sleep(Duration::from_millis(50));
        cancel.store(true, Ordering::SeqCst);

        let outcome = rx
            .iter()
            .find(|m| matches!(m, AppMessage::CaptureError(_) | AppMessage::CaptureComplete(..)));
        worker.join().unwrap();
        match outcome {
            Some(AppMessage::CaptureError(msg)) => assert!(msg.contains("cancelled"), "{msg}"),
            _ => panic!("expected the run to be cancelled"),
        }
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(provider.closed_count(), 2);
    }

    #[test]
    fn huge_waits_do_not_overflow() {
        let cancel = AtomicBool::new(true);
        let err = wait(Duration::MAX, &cancel).unwrap_err();
        assert!(matches!(err, SpectralError::Cancelled));

        let mut plan = plan(std::path::Path::new("."), 500, 501);
        plan.exposure = Duration::MAX;
        plan.settle_margin = Duration::from_millis(300);
        assert_eq!(plan.settle_delay(), Duration::MAX);
    }

    /// Camera whose frames grow one column after the first.
    struct GrowingCamera {
        frames: usize,
    }

    impl Camera for GrowingCamera {
        fn set_exposure(&mut self, _exposure: Duration) -> Result<()> {
            Ok(())
        }

        fn poll_frame(&mut self, _timeout: Duration) -> Result<Option<Frame>> {
            self.frames += 1;
            let cols = if self.frames == 1 { 4 } else { 5 };
            Ok(Some(Array2::from_elem((4, cols), 100)))
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct GrowingProvider(SimulatedProvider);

    impl DeviceProvider for GrowingProvider {
        fn open_imaging(&self) -> Result<(Box<dyn TunableFilter>, Box<dyn Camera>)> {
            let (filter, _) = self.0.open_imaging()?;
            Ok((filter, Box::new(GrowingCamera { frames: 0 })))
        }

        fn open_power(&self) -> Result<(Box<dyn TunableFilter>, Box<dyn PowerMeter>)> {
            self.0.open_power()
        }
    }

    #[test]
    fn shape_change_leaves_file_and_stack_in_step() {
        let dir = tempfile::tempdir().unwrap();
        let provider = GrowingProvider(SimulatedProvider::new(4, 4));
        let mut session = ImagingSession::open(&provider).unwrap();
        let (tx, _rx) = channel();
        let plan = plan(dir.path(), 550, 552);

        let err = run_capture(&mut session, &plan, &tx, &AtomicBool::new(false)).unwrap_err();
        assert!(matches!(err, SpectralError::ShapeMismatch { .. }), "{err}");
        drop(session);

        let on_disk = read_stack(&plan.output).unwrap();
        assert_eq!(on_disk.len(), 1);
    }
}
