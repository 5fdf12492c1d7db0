use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use eframe::egui::Color32;

use crate::capture::{
    capture_worker, power_worker, CapturePlan, DeviceProvider, PowerPlan, MAX_EXPOSURE,
};
use crate::color::SpectrumColors;
use crate::config::AppConfig;
use crate::data::calibration::CalibrationMap;
use crate::data::extract::extract;
use crate::data::loader::{self, parse_stack_filename, stack_filename};
use crate::data::model::{ImageStack, Region, Selection, Spectrum, WavelengthRange};
use crate::error::SpectralError;
use crate::message::AppMessage;

// ---------------------------------------------------------------------------
// Pieces of state
// ---------------------------------------------------------------------------

/// A stack on display together with where it came from.
pub struct LoadedStack {
    pub stack: ImageStack,
    pub source: PathBuf,
}

/// One spectrum popup.
pub struct SpectrumWindow {
    pub id: usize,
    pub spectrum: Spectrum,
    pub color: Color32,
    pub open: bool,
}

/// Raw text of the capture form, as typed.
#[derive(Debug, Clone)]
pub struct CaptureForm {
    pub min_wavelength: String,
    pub max_wavelength: String,
    pub exposure_s: String,
    pub file_name: String,
    pub output_dir: PathBuf,
    pub calibration_file: Option<PathBuf>,
}

/// Inline messages next to the capture form fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormErrors {
    pub min_wavelength: Option<String>,
    pub max_wavelength: Option<String>,
    pub exposure_s: Option<String>,
}

impl FormErrors {
    pub fn is_empty(&self) -> bool {
        self.min_wavelength.is_none() && self.max_wavelength.is_none() && self.exposure_s.is_none()
    }
}

/// Corners of an area typed in by hand, as pixel indices.
#[derive(Debug, Clone, Default)]
pub struct AreaForm {
    pub top: String,
    pub left: String,
    pub bottom: String,
    pub right: String,
    pub error: Option<String>,
}

impl AreaForm {
    /// Parse the corners; inverted rectangles are rejected.
    pub fn region(&self) -> std::result::Result<Region, SpectralError> {
        let top = parse_field("Top", &self.top, "a pixel index")?;
        let left = parse_field("Left", &self.left, "a pixel index")?;
        let bottom = parse_field("Bottom", &self.bottom, "a pixel index")?;
        let right = parse_field("Right", &self.right, "a pixel index")?;
        Region::new((top, left), (bottom, right))
    }
}

/// Validated capture form.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub range: WavelengthRange,
    pub exposure: Duration,
    pub file_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Capture,
    PowerSweep,
}

/// A running background job.
pub struct Worker {
    pub kind: WorkerKind,
    pub rx: Receiver<AppMessage>,
    pub cancel: Arc<AtomicBool>,
    pub progress: f32,
    pub status: String,
}

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// The full UI state, independent of rendering.
pub struct AppState {
    pub config: AppConfig,

    /// Stack under display (None until a file is loaded or a capture ends).
    pub loaded: Option<LoadedStack>,

    /// Wavelength of slide 0 of the loaded stack.
    pub stack_min_wavelength: u32,

    /// Bumped whenever a new stack is ingested; keys cached textures.
    pub stack_generation: usize,

    /// Slide shown in the viewer.
    pub current_slide: usize,

    /// Stretch each slide to its own range when displaying it.
    pub minmax_scaling: bool,

    pub spectra: Vec<SpectrumWindow>,
    pub area_form: AreaForm,
    next_spectrum_id: usize,
    colors: SpectrumColors,

    pub form: CaptureForm,
    pub form_errors: FormErrors,

    /// Calibration used by the next capture, shared with the worker.
    pub calibration: Option<Arc<CalibrationMap>>,

    pub worker: Option<Worker>,

    /// Status / error message shown in the UI.
    pub status_message: Option<String>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let capture = &config.capture;
        let form = CaptureForm {
            min_wavelength: capture.min_wavelength.to_string(),
            max_wavelength: capture.max_wavelength.to_string(),
            exposure_s: capture.exposure_s.to_string(),
            file_name: capture.file_name.clone(),
            output_dir: capture.output_dir.clone(),
            calibration_file: None,
        };
        let mut state = Self {
            stack_min_wavelength: capture.min_wavelength,
            stack_generation: 0,
            config,
            loaded: None,
            current_slide: 0,
            minmax_scaling: true,
            spectra: Vec::new(),
            area_form: AreaForm::default(),
            next_spectrum_id: 0,
            colors: SpectrumColors::default(),
            form,
            form_errors: FormErrors::default(),
            calibration: None,
            worker: None,
            status_message: None,
        };
        if let Some(path) = state.config.capture.calibration_file.clone() {
            state.load_calibration(&path);
        }
        state
    }

    // -- Stack --------------------------------------------------------------

    /// Ingest a stack; the wavelength of slide 0 comes from the file name
    /// when it follows the capture naming scheme.
    pub fn set_stack(&mut self, stack: ImageStack, source: PathBuf) {
        self.stack_min_wavelength = match parse_stack_filename(&source) {
            Some(range) if range.len() == stack.len() => range.min(),
            Some(range) => {
                log::warn!(
                    "{} names {} wavelengths but holds {} slides",
                    source.display(),
                    range.len(),
                    stack.len()
                );
                self.config.capture.min_wavelength
            }
            None => self.config.capture.min_wavelength,
        };
        self.current_slide = 0;
        self.stack_generation += 1;
        self.spectra.clear();
        self.loaded = Some(LoadedStack { stack, source });
        self.status_message = None;
    }

    pub fn open_stack(&mut self, path: &Path) {
        match loader::load_file(path).with_context(|| format!("loading {}", path.display())) {
            Ok(stack) => {
                log::info!("Loaded {} slides from {}", stack.len(), path.display());
                self.set_stack(stack, path.to_path_buf());
            }
            Err(e) => {
                log::error!("Failed to load stack: {e:#}");
                self.status_message = Some(format!("Error: {e:#}"));
            }
        }
    }

    /// Wavelengths of the loaded stack.
    pub fn stack_range(&self) -> Option<WavelengthRange> {
        let loaded = self.loaded.as_ref()?;
        WavelengthRange::starting_at(self.stack_min_wavelength, loaded.stack.len()).ok()
    }

    pub fn current_wavelength(&self) -> Option<u32> {
        self.stack_range()?.wavelength_at(self.current_slide)
    }

    /// Extract a spectrum for `selection` and open a window for it.
    pub fn add_spectrum(&mut self, selection: Selection) {
        let Some(loaded) = &self.loaded else {
            return;
        };
        let Some(range) = self.stack_range() else {
            self.status_message = Some("Error: wavelength range does not fit the stack".into());
            return;
        };
        match extract(&loaded.stack, selection, range) {
            Ok(spectrum) => {
                log::debug!("extracted {} over {range} ({} points)", spectrum.label, spectrum.len());
                let id = self.next_spectrum_id;
                self.next_spectrum_id += 1;
                self.spectra.push(SpectrumWindow {
                    id,
                    spectrum,
                    color: self.colors.next_color(),
                    open: true,
                });
            }
            Err(e) => {
                log::warn!("spectrum extraction failed: {e}");
                self.status_message = Some(format!("Error: {e}"));
            }
        }
    }

    /// Area spectrum from the corners typed into [`AreaForm`].
    pub fn add_area_from_form(&mut self) {
        let region = self.area_form.region();
        match region {
            Ok(region) => {
                self.area_form.error = None;
                self.add_spectrum(Selection::Area(region));
            }
            Err(e) => self.area_form.error = Some(e.to_string()),
        }
    }

    /// Forget spectrum windows the user closed.
    pub fn prune_spectra(&mut self) {
        self.spectra.retain(|w| w.open);
    }

    // -- Calibration ----------------------------------------------------------

    pub fn load_calibration(&mut self, path: &Path) {
        match CalibrationMap::load(path) {
            Ok(map) => {
                log::info!(
                    "calibration {} covers {} ({} references, {:?})",
                    path.display(),
                    map.range(),
                    map.len(),
                    map.kind()
                );
                self.calibration = Some(Arc::new(map));
                self.form.calibration_file = Some(path.to_path_buf());
                self.status_message = None;
            }
            Err(e) => {
                log::error!("Failed to load calibration: {e}");
                self.calibration = None;
                self.form.calibration_file = None;
                self.status_message = Some(format!("Error: {e}"));
            }
        }
    }

    pub fn clear_calibration(&mut self) {
        self.calibration = None;
        self.form.calibration_file = None;
    }

    // -- Capture form -----------------------------------------------------------

    /// Check the form, filling in inline messages.  Nothing propagates.
    pub fn validate_form(&mut self) -> Option<CaptureRequest> {
        let mut errors = FormErrors::default();

        let min = parse_field::<u32>("Min. wavelength", &self.form.min_wavelength, "an integer")
            .map_err(|e| errors.min_wavelength = Some(e.to_string()))
            .ok();
        let max = parse_field::<u32>("Max. wavelength", &self.form.max_wavelength, "an integer")
            .map_err(|e| errors.max_wavelength = Some(e.to_string()))
            .ok();
        let exposure = parse_field::<f64>("Exposure time", &self.form.exposure_s, "a number")
            .and_then(|s| {
                let invalid = |message: String| SpectralError::InputValidation {
                    field: "Exposure time",
                    message,
                };
                if s.is_nan() || s <= 0.0 {
                    return Err(invalid("must be greater than zero".to_string()));
                }
                match Duration::try_from_secs_f64(s) {
                    Ok(exposure) if exposure <= MAX_EXPOSURE => Ok(exposure),
                    _ => Err(invalid(format!(
                        "must be at most {} s",
                        MAX_EXPOSURE.as_secs()
                    ))),
                }
            })
            .map_err(|e| errors.exposure_s = Some(e.to_string()))
            .ok();

        let mut range = None;
        if let (Some(min), Some(max)) = (min, max) {
            if min < max {
                range = WavelengthRange::new(min, max).ok();
            } else {
                errors.max_wavelength =
                    Some("Max. wavelength must be bigger than Min. wavelength".to_string());
            }
        }

        self.form_errors = errors;
        let file_name = match self.form.file_name.trim() {
            "" => self.config.capture.file_name.clone(),
            name => name.to_string(),
        };
        Some(CaptureRequest {
            range: range?,
            exposure: exposure?,
            file_name,
        })
    }

    // -- Background work ----------------------------------------------------------

    pub fn is_busy(&self) -> bool {
        self.worker.is_some()
    }

    /// Validate the form and start a capture on a worker thread.
    pub fn start_capture(&mut self, provider: Arc<dyn DeviceProvider>) {
        if self.is_busy() {
            return;
        }
        let Some(request) = self.validate_form() else {
            return;
        };
        let output = self.form.output_dir.join(stack_filename(
            &request.file_name,
            request.range,
            chrono::Local::now(),
        ));
        let plan = CapturePlan {
            range: request.range,
            exposure: request.exposure,
            settle_margin: self.config.capture.settle_margin(),
            poll_timeout: self.config.capture.poll_timeout(),
            output,
            calibration: self.calibration.clone(),
        };
        let status = format!(
            "Capturing {} at {:.2} s exposure",
            plan.range,
            plan.exposure.as_secs_f64()
        );
        self.spawn(WorkerKind::Capture, status, move |tx, cancel| {
            capture_worker(provider, plan, tx, cancel)
        });
    }

    /// Sweep the power meter over the form's wavelength range.
    pub fn start_power_sweep(&mut self, provider: Arc<dyn DeviceProvider>) {
        if self.is_busy() {
            return;
        }
        let Some(request) = self.validate_form() else {
            return;
        };
        let power = &self.config.power;
        let plan = PowerPlan {
            range: request.range,
            samples: power.samples,
            settle: Duration::from_millis(power.settle_ms),
            output: power.folder.join(&power.file_name),
        };
        let status = format!("Power sweep over {}", plan.range);
        self.spawn(WorkerKind::PowerSweep, status, move |tx, cancel| {
            power_worker(provider, plan, tx, cancel)
        });
    }

    fn spawn<F>(&mut self, kind: WorkerKind, status: String, job: F)
    where
        F: FnOnce(Sender<AppMessage>, Arc<AtomicBool>) + Send + 'static,
    {
        let (tx, rx) = channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = Arc::clone(&cancel);
        std::thread::spawn(move || job(tx, worker_cancel));
        log::info!("{status}");
        self.status_message = None;
        self.worker = Some(Worker {
            kind,
            rx,
            cancel,
            progress: 0.0,
            status,
        });
    }

    pub fn cancel_worker(&mut self) {
        if let Some(worker) = &self.worker {
            log::info!("cancel requested");
            worker.cancel.store(true, Ordering::SeqCst);
        }
    }

    /// Drain worker messages.  Returns true when anything changed.
    pub fn poll_worker(&mut self) -> bool {
        let Some(worker) = &mut self.worker else {
            return false;
        };
        let mut messages = Vec::new();
        let disconnected = loop {
            match worker.rx.try_recv() {
                Ok(message) => messages.push(message),
                Err(TryRecvError::Empty) => break false,
                Err(TryRecvError::Disconnected) => break true,
            }
        };
        let changed = !messages.is_empty();

        for message in messages {
            self.handle_message(message);
        }
        if disconnected && self.worker.is_some() {
            self.worker = None;
            self.status_message = Some("Error: worker stopped unexpectedly".to_string());
            return true;
        }
        changed
    }

    pub fn handle_message(&mut self, message: AppMessage) {
        match message {
            AppMessage::CaptureProgress(progress, status)
            | AppMessage::PowerProgress(progress, status) => {
                if let Some(worker) = &mut self.worker {
                    worker.progress = progress;
                    worker.status = status;
                }
            }
            AppMessage::FrameFlagged { wavelength, reason } => {
                self.status_message = Some(format!("Warning: {wavelength} nm kept raw ({reason})"));
            }
            AppMessage::CaptureComplete(stack, report) => {
                self.worker = None;
                let flagged = report.flagged.len();
                self.set_stack(*stack, report.output.clone());
                self.stack_min_wavelength = report.range.min();
                self.status_message = Some(format!(
                    "Saved {} {} to {} in {:.1?}{}",
                    if report.normalized { "normalized" } else { "raw" },
                    report.range,
                    report.output.display(),
                    report.elapsed,
                    if flagged > 0 {
                        format!(", {flagged} frame(s) flagged")
                    } else {
                        String::new()
                    }
                ));
            }
            AppMessage::PowerComplete(path, readings) => {
                self.worker = None;
                self.status_message = Some(format!(
                    "Wrote {} power readings to {}",
                    readings.len(),
                    path.display()
                ));
            }
            AppMessage::CaptureError(msg) | AppMessage::PowerError(msg) => {
                self.worker = None;
                self.status_message = Some(format!("Error: {msg}"));
            }
        }
    }

    // -- Export ----------------------------------------------------------------

    pub fn export_spectrum(&self, id: usize, path: &Path) -> Result<()> {
        let window = self
            .spectra
            .iter()
            .find(|w| w.id == id)
            .context("spectrum window no longer exists")?;
        let mut writer = csv::Writer::from_path(path).context("creating CSV")?;
        writer.write_record(["wavelength_nm", "intensity"])?;
        for (wl, value) in &window.spectrum.points {
            writer.write_record([wl.to_string(), value.to_string()])?;
        }
        writer.flush().context("writing CSV")?;
        log::info!("exported {} to {}", window.spectrum.label, path.display());
        Ok(())
    }

    pub fn export_slide_png(&self, path: &Path) -> Result<()> {
        let loaded = self.loaded.as_ref().context("no stack loaded")?;
        let slide = loaded
            .stack
            .slide(self.current_slide)
            .context("slide index out of range")?;
        let (height, width) = slide.dim();
        let levels = crate::color::display_levels(slide, self.minmax_scaling);
        let img = image::GrayImage::from_raw(width as u32, height as u32, levels)
            .context("building image buffer")?;
        img.save(path)
            .with_context(|| format!("saving {}", path.display()))?;
        Ok(())
    }
}

fn parse_field<T: std::str::FromStr>(
    field: &'static str,
    text: &str,
    kind: &str,
) -> std::result::Result<T, SpectralError> {
    text.trim()
        .parse::<T>()
        .map_err(|_| SpectralError::InputValidation {
            field,
            message: format!("please enter {kind}"),
        })
}
