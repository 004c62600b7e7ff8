//! QHub desktop entry point.

mod app;

use anyhow::Context;
use eframe::egui;

fn main() -> anyhow::Result<()> {
    app::install_logger();
    let (config, config_path) = qhub::config::load_config(None)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("starting async runtime")?;

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1100.0, 760.0])
            .with_min_inner_size([720.0, 520.0]),
        ..Default::default()
    };
    eframe::run_native(
        "QHub",
        options,
        Box::new(move |cc| Box::new(app::QHubApp::new(cc, config, config_path, runtime))),
    )
    .map_err(|e| anyhow::anyhow!("desktop exited: {}", e))
}
