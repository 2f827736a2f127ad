//! Keystone Projector - pre-warp a flat design for a curved, obliquely lit surface
//!
//! This application takes the last exported design, compensates for the
//! surface's cylindrical curvature, maps it into an operator-calibrated
//! quadrilateral, and serves the calibration session over a small web API.
//! With `--export` it renders one projector-ready PNG and exits.

mod calibration;
mod config;
mod cylinder;
mod error;
mod geometry;
mod keystone;
mod outline;
mod render;
mod scale;
mod server;
mod source;
mod store;
mod transform;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::calibration::CalibrationStore;
use crate::keystone::KeystoneController;
use crate::render::{RenderMode, RenderOutcome};
use crate::scale::ScaleModel;
use crate::store::{FileStore, KeyValueStore};

/// Keystone Projector - curvature pre-warp and four-corner calibration
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// State directory for calibration and design records (overrides config)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Design image to use as the last export (PNG/JPEG or a data-URL text file)
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Render a projector-ready PNG to this path and exit
    #[arg(short, long)]
    export: Option<PathBuf>,

    /// Web server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Web server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("Keystone Projector v{}", env!("CARGO_PKG_VERSION"));

    // Load or create configuration, CLI args override
    let config = config::Config::load_or_create(&args.config)?;
    let state_dir = args
        .state_dir
        .clone()
        .unwrap_or_else(|| config.storage.state_dir.clone());
    let host = args.host.clone().unwrap_or_else(|| config.server.host.clone());
    let port = args.port.unwrap_or(config.server.port);

    let params = config.render_params();
    info!("State directory: {:?}", state_dir);
    info!("Surface: {}x{}", params.surface.0, params.surface.1);

    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(state_dir));

    if let Some(path) = &args.source {
        import_source(path, store.as_ref())?;
    }

    let mut controller = KeystoneController::new(
        CalibrationStore::new(store.clone()),
        config.keystone_settings(),
        params,
        config.initial_controls(),
    );
    match source::load_last_export(store.as_ref()) {
        Some(image) => controller.load_source(image),
        None => warn!("{}", render::PLACEHOLDER_MESSAGE),
    }

    if let Some(path) = &args.export {
        return export_once(&controller, store.as_ref(), path);
    }

    let state = Arc::new(server::AppState::new(controller, store));
    let addr = format!("{}:{}", host, port);
    info!("Starting web server at http://{}", addr);
    server::run_server(&addr, state).await
}

/// Store a design file as the last export
fn import_source(path: &std::path::Path, store: &dyn KeyValueStore) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read design {:?}", path))?;
    let image = source::decode_any(&bytes)
        .with_context(|| format!("Failed to decode design {:?}", path))?;
    info!("Imported design {:?} ({}x{})", path, image.width(), image.height());

    let url = source::encode_data_url(&image).context("Failed to encode design")?;
    store
        .set(source::EXPORT_KEY, &url)
        .context("Failed to store design")?;
    Ok(())
}

/// Headless render of the projector-ready frame
fn export_once(controller: &KeystoneController, store: &dyn KeyValueStore, path: &std::path::Path) -> Result<()> {
    let snapshot = controller.snapshot(ScaleModel::load(store));
    let (image, outcome) = render::render(&snapshot, RenderMode::Export);
    match outcome {
        RenderOutcome::Rendered(stats) => info!(
            "Rendered {} mesh cells ({} triangles skipped)",
            stats.cells, stats.triangles_skipped
        ),
        RenderOutcome::Placeholder => warn!("Exporting placeholder: {}", render::PLACEHOLDER_MESSAGE),
    }

    let png = render::encode_png(&image).context("Failed to encode PNG")?;
    std::fs::write(path, png).with_context(|| format!("Failed to write {:?}", path))?;
    info!("Wrote {}x{} frame to {:?}", image.width(), image.height(), path);
    Ok(())
}
