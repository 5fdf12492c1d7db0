use std::sync::Arc;

use eframe::egui::{self, Color32, RichText, TextEdit, Ui};

use crate::capture::DeviceProvider;
use crate::state::{AppState, WorkerKind};

// ---------------------------------------------------------------------------
// Left side panel – capture form
// ---------------------------------------------------------------------------

/// Render the capture / calibration panel.
pub fn side_panel(ui: &mut Ui, state: &mut AppState, devices: &Arc<dyn DeviceProvider>) {
    ui.heading("Capture");
    ui.separator();

    let busy = state.is_busy();
    ui.add_enabled_ui(!busy, |ui: &mut Ui| {
        egui::Grid::new("capture_form")
            .num_columns(2)
            .spacing([8.0, 6.0])
            .show(ui, |ui: &mut Ui| {
                form_field(
                    ui,
                    "Min. wavelength [nm]",
                    &mut state.form.min_wavelength,
                    state.form_errors.min_wavelength.as_deref(),
                );
                form_field(
                    ui,
                    "Max. wavelength [nm]",
                    &mut state.form.max_wavelength,
                    state.form_errors.max_wavelength.as_deref(),
                );
                form_field(
                    ui,
                    "Exposure [s]",
                    &mut state.form.exposure_s,
                    state.form_errors.exposure_s.as_deref(),
                );

                ui.label("File name");
                ui.add(TextEdit::singleline(&mut state.form.file_name).desired_width(120.0));
                ui.end_row();
            });

        ui.add_space(4.0);
        ui.horizontal(|ui: &mut Ui| {
            if ui.button("Folder…").clicked() {
                if let Some(dir) = rfd::FileDialog::new()
                    .set_title("Output folder")
                    .set_directory(&state.form.output_dir)
                    .pick_folder()
                {
                    state.form.output_dir = dir;
                }
            }
            ui.label(RichText::new(state.form.output_dir.display().to_string()).small());
        });

        ui.horizontal(|ui: &mut Ui| {
            if ui.button("Calibration…").clicked() {
                open_calibration_dialog(state);
            }
            match &state.form.calibration_file {
                Some(path) => {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    ui.label(RichText::new(name).small());
                    if ui.small_button("✖").on_hover_text("Capture raw").clicked() {
                        state.clear_calibration();
                    }
                }
                None => {
                    ui.label(RichText::new("raw (no calibration)").small().weak());
                }
            }
        });

        ui.add_space(8.0);
        ui.horizontal(|ui: &mut Ui| {
            if ui.button("Collect images").clicked() {
                state.start_capture(Arc::clone(devices));
            }
            if ui
                .button("Power sweep")
                .on_hover_text("Measure lamp power over the range with the power meter")
                .clicked()
            {
                state.start_power_sweep(Arc::clone(devices));
            }
        });
    });

    // ---- Running job ----
    if let Some(worker) = &state.worker {
        ui.separator();
        let title = match worker.kind {
            WorkerKind::Capture => "Capture running",
            WorkerKind::PowerSweep => "Power sweep running",
        };
        ui.strong(title);
        ui.add(egui::ProgressBar::new(worker.progress).show_percentage());
        ui.label(RichText::new(&worker.status).small());
        if ui.button("Cancel").clicked() {
            state.cancel_worker();
        }
    }

    // ---- Viewer settings ----
    ui.separator();
    ui.heading("Viewer");
    if state.loaded.is_some() {
        ui.horizontal(|ui: &mut Ui| {
            ui.label("First slide [nm]");
            ui.add(egui::DragValue::new(&mut state.stack_min_wavelength).range(0..=2000));
        });
        if let Some(range) = state.stack_range() {
            ui.label(format!("Range {range}"));
        }

        ui.add_space(4.0);
        ui.label("Area spectrum (pixel corners)");
        egui::Grid::new("area_form")
            .num_columns(4)
            .spacing([4.0, 4.0])
            .show(ui, |ui: &mut Ui| {
                let form = &mut state.area_form;
                ui.label("Top");
                ui.add(TextEdit::singleline(&mut form.top).desired_width(40.0));
                ui.label("Left");
                ui.add(TextEdit::singleline(&mut form.left).desired_width(40.0));
                ui.end_row();
                ui.label("Bottom");
                ui.add(TextEdit::singleline(&mut form.bottom).desired_width(40.0));
                ui.label("Right");
                ui.add(TextEdit::singleline(&mut form.right).desired_width(40.0));
                ui.end_row();
            });
        if let Some(msg) = &state.area_form.error {
            ui.label(RichText::new(msg).small().color(Color32::RED));
        }
        if ui.button("Area spectrum").clicked() {
            state.add_area_from_form();
        }
    } else {
        ui.label("No stack loaded.");
    }
}

fn form_field(ui: &mut Ui, label: &str, text: &mut String, error: Option<&str>) {
    ui.label(label);
    ui.vertical(|ui: &mut Ui| {
        ui.add(TextEdit::singleline(text).desired_width(120.0));
        if let Some(msg) = error {
            ui.label(RichText::new(msg).small().color(Color32::RED));
        }
    });
    ui.end_row();
}

// ---------------------------------------------------------------------------
// Top bar
// ---------------------------------------------------------------------------

/// Render the top menu / toolbar.
pub fn top_bar(ui: &mut Ui, state: &mut AppState) {
    egui::menu::bar(ui, |ui: &mut Ui| {
        ui.menu_button("File", |ui: &mut Ui| {
            if ui.button("Open stack…").clicked() {
                open_stack_dialog(state);
                ui.close_menu();
            }
            if ui.button("Open calibration…").clicked() {
                open_calibration_dialog(state);
                ui.close_menu();
            }
            ui.separator();
            if ui
                .add_enabled(state.loaded.is_some(), egui::Button::new("Export slide PNG…"))
                .clicked()
            {
                export_slide_dialog(state);
                ui.close_menu();
            }
        });

        ui.separator();

        if let Some(loaded) = &state.loaded {
            let name = loaded
                .source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match (loaded.stack.shape(), state.stack_range()) {
                _ if loaded.stack.is_empty() => {
                    ui.label(format!("{name}: no slides"));
                }
                (Some((h, w)), Some(range)) => {
                    ui.label(format!("{name}: {} slides, {w}×{h} px, {range}", loaded.stack.len()))
                        .on_hover_text(loaded.source.display().to_string());
                }
                _ => {
                    ui.label(name);
                }
            }
        }

        ui.separator();

        if ui
            .selectable_label(state.minmax_scaling, "Min-Max Scaling")
            .clicked()
        {
            state.minmax_scaling = !state.minmax_scaling;
        }

        if let Some(msg) = &state.status_message {
            let color = if msg.starts_with("Error") {
                Color32::RED
            } else if msg.starts_with("Warning") {
                Color32::YELLOW
            } else {
                ui.visuals().text_color()
            };
            ui.label(RichText::new(msg).color(color));
        }
    });
}

// ---------------------------------------------------------------------------
// File dialogs
// ---------------------------------------------------------------------------

pub fn open_stack_dialog(state: &mut AppState) {
    let file = rfd::FileDialog::new()
        .set_title("Open image stack")
        .add_filter("TIFF stack", &["tif", "tiff"])
        .pick_file();

    if let Some(path) = file {
        state.open_stack(&path);
    }
}

pub fn open_calibration_dialog(state: &mut AppState) {
    let file = rfd::FileDialog::new()
        .set_title("Open calibration")
        .add_filter("Calibration", &["tif", "tiff", "csv"])
        .add_filter("Reference stack", &["tif", "tiff"])
        .add_filter("Power table", &["csv"])
        .pick_file();

    if let Some(path) = file {
        state.load_calibration(&path);
    }
}

pub fn export_spectrum_dialog(state: &mut AppState, id: usize) {
    let file = rfd::FileDialog::new()
        .set_title("Export spectrum")
        .add_filter("CSV", &["csv"])
        .set_file_name(format!("spectrum_{}.csv", id + 1))
        .save_file();

    if let Some(path) = file {
        if let Err(e) = state.export_spectrum(id, &path) {
            log::error!("Failed to export spectrum: {e:#}");
            state.status_message = Some(format!("Error: {e:#}"));
        }
    }
}

pub fn export_slide_dialog(state: &mut AppState) {
    let name = state
        .current_wavelength()
        .map(|wl| format!("slide_{wl}nm.png"))
        .unwrap_or_else(|| "slide.png".to_string());
    let file = rfd::FileDialog::new()
        .set_title("Export slide")
        .add_filter("PNG", &["png"])
        .set_file_name(name)
        .save_file();

    if let Some(path) = file {
        match state.export_slide_png(&path) {
            Ok(()) => log::info!("slide written to {}", path.display()),
            Err(e) => {
                log::error!("Failed to export slide: {e:#}");
                state.status_message = Some(format!("Error: {e:#}"));
            }
        }
    }
}
