mod app;
mod capture;
mod color;
mod config;
mod data;
mod error;
mod message;
mod state;
mod ui;

use app::HyperspecApp;
use config::AppConfig;
use eframe::egui;

fn main() -> eframe::Result {
    env_logger::init();

    let config_path = AppConfig::default_path();
    let config = AppConfig::load_or_default(&config_path);
    log::info!(
        "devices: {:?}, frames {}×{}",
        config.devices.backend,
        config.devices.frame_width,
        config.devices.frame_height
    );

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_min_inner_size([600.0, 400.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Hyperspec – Stack Viewer",
        options,
        Box::new(|_cc| Ok(Box::new(HyperspecApp::new(config)))),
    )
}
