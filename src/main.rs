use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};

use async_detect::backend::{InferenceBackend, SimulatedBackend};
use async_detect::config::Settings;
use async_detect::detection::LabelMap;
use async_detect::render::ConsoleRenderer;
use async_detect::source::ImageSequenceSource;
use async_detect::{AppError, Scheduler};

fn init_logging() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();
}

fn spawn_interrupt_handler(cancel_token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping");
            cancel_token.cancel();
        }
    });
}

async fn run(settings_path: Option<PathBuf>) -> Result<(), AppError> {
    let settings = Settings::load(settings_path.as_deref())?;

    let backend = SimulatedBackend::default();
    let shape = backend.model_shape();
    let labels = LabelMap::load(Path::new(&settings.model), shape.num_classes)?;
    let renderer = ConsoleRenderer::new(
        labels,
        settings.confidence_threshold,
        settings.raw_output,
        settings.headless,
    );

    let cancel_token = CancellationToken::new();
    spawn_interrupt_handler(cancel_token.clone());

    let summary = Scheduler::builder(settings)
        .backend(backend)
        .source(ImageSequenceSource::new())
        .renderer(renderer)
        .cancel_token(cancel_token)
        .build()?
        .run()
        .await?;

    info!(
        "Rendered {} of {} frames, stopped with {:?} in {} mode",
        summary.rendered,
        summary.dispatched,
        summary.stop,
        summary.final_mode.mode_name()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    init_logging();
    let settings_path = std::env::args().nth(1).map(PathBuf::from);

    if let Err(e) = run(settings_path).await {
        error!("{}", e);
        return Err(e);
    }
    info!("The execution has completed successfully");
    Ok(())
}
