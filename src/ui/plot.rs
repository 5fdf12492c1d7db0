use eframe::egui::{self, Ui};
use egui_plot::{Legend, Line, Plot, PlotPoints};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Spectrum windows
// ---------------------------------------------------------------------------

/// One floating window per extracted spectrum.  Closed windows are dropped
/// from the state at the end of the frame.
pub fn spectrum_windows(ctx: &egui::Context, state: &mut AppState) {
    let minmax = state.minmax_scaling;
    let mut export = None;

    for window in &mut state.spectra {
        let title = format!("Spectrum #{} – {}", window.id + 1, window.spectrum.label);
        egui::Window::new(title)
            .id(egui::Id::new(("spectrum", window.id)))
            .open(&mut window.open)
            .default_size([420.0, 280.0])
            .resizable(true)
            .show(ctx, |ui: &mut Ui| {
                if window.spectrum.is_empty() {
                    ui.label("Empty spectrum.");
                    return;
                }
                if ui.small_button("Export CSV…").clicked() {
                    export = Some(window.id);
                }

                let points: PlotPoints = if minmax {
                    window.spectrum.min_max_scaled().into()
                } else {
                    window.spectrum.xy().into()
                };
                let line = Line::new(points)
                    .name(&window.spectrum.label)
                    .color(window.color)
                    .width(1.5);

                Plot::new(("spectrum_plot", window.id))
                    .legend(Legend::default())
                    .x_axis_label("Wavelength [nm]")
                    .y_axis_label(if minmax { "Intensity (scaled)" } else { "Intensity" })
                    .allow_boxed_zoom(true)
                    .allow_drag(true)
                    .allow_scroll(true)
                    .allow_zoom(true)
                    .show(ui, |plot_ui| plot_ui.line(line));
            });
    }

    if let Some(id) = export {
        super::panels::export_spectrum_dialog(state, id);
    }
    state.prune_spectra();
}
