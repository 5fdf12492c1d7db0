use std::sync::Arc;
use std::time::Duration;

use eframe::egui;

use crate::capture::{provider_for, DeviceProvider};
use crate::config::AppConfig;
use crate::state::AppState;
use crate::ui::viewer::StackViewer;
use crate::ui::{panels, plot};

// ---------------------------------------------------------------------------
// eframe App implementation
// ---------------------------------------------------------------------------

pub struct HyperspecApp {
    pub state: AppState,
    viewer: StackViewer,
    devices: Arc<dyn DeviceProvider>,
}

impl HyperspecApp {
    pub fn new(config: AppConfig) -> Self {
        let devices = provider_for(&config.devices);
        Self {
            state: AppState::new(config),
            viewer: StackViewer::default(),
            devices,
        }
    }
}

impl eframe::App for HyperspecApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // ---- Drain background work ----
        self.state.poll_worker();
        if self.state.is_busy() {
            ctx.request_repaint_after(Duration::from_millis(50));
        }

        // ---- Top panel: menu bar ----
        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            panels::top_bar(ui, &mut self.state);
        });

        // ---- Left side panel: capture form ----
        egui::SidePanel::left("capture_panel")
            .default_width(240.0)
            .resizable(true)
            .show(ctx, |ui| {
                panels::side_panel(ui, &mut self.state, &self.devices);
            });

        // ---- Central panel: stack viewer ----
        egui::CentralPanel::default().show(ctx, |ui| {
            self.viewer.show(ui, &mut self.state);
        });

        // ---- Floating spectrum windows ----
        plot::spectrum_windows(ctx, &mut self.state);
    }
}

impl Drop for HyperspecApp {
    fn drop(&mut self) {
        // Lets a running sweep release the devices.
        self.state.cancel_worker();
    }
}
