use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use volume_session::{
    DicomDirectoryLoader, HeadlessBackend, Runtime, Session, SessionConfig, SortBy, Toolkit,
    WindowLevel,
};

/// Bootstrap a viewer session headlessly and write one PNG per viewport.
#[derive(Debug, Parser)]
#[command(name = "volume-session", version)]
struct Cli {
    /// Session config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Volume id, e.g. `dicom:/data/ct`
    #[arg(long)]
    volume: Option<String>,

    /// Label volume id for a labelmap segmentation
    #[arg(long)]
    label: Option<String>,

    /// Window center
    #[arg(long, requires = "width", allow_negative_numbers = true)]
    center: Option<f64>,

    /// Window width
    #[arg(long, requires = "center")]
    width: Option<f64>,

    /// Slice ordering for `dicom:` volumes
    #[arg(long, value_enum, default_value_t = SortOrder::ImagePositionPatient)]
    sort_by: SortOrder,

    /// Directory the viewport snapshots are written to
    #[arg(short, long, default_value = ".")]
    out: PathBuf,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum SortOrder {
    ImagePositionPatient,
    TablePosition,
    InstanceNumber,
    None,
}

impl From<SortOrder> for SortBy {
    fn from(order: SortOrder) -> Self {
        match order {
            SortOrder::ImagePositionPatient => SortBy::ImagePositionPatient,
            SortOrder::TablePosition => SortBy::TablePosition,
            SortOrder::InstanceNumber => SortBy::InstanceNumber,
            SortOrder::None => SortBy::None,
        }
    }
}

impl Cli {
    fn session_config(&self) -> Result<SessionConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::load_from_path(path)?,
            None => SessionConfig::default(),
        };
        if let Some(volume) = &self.volume {
            config.volume_id = volume.clone();
        }
        if let Some(label) = &self.label {
            config.label_volume_id = Some(label.clone());
        }
        if let (Some(center), Some(width)) = (self.center, self.width) {
            config.window_level = WindowLevel::new(center, width);
        }
        config.validate()?;
        Ok(config)
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = cli.session_config()?;

    let backend = Arc::new(HeadlessBackend::with_mounts(
        config.viewports.iter().map(|viewport| viewport.mount.clone()),
    ));
    let runtime = Arc::new(Runtime::new(Toolkit::from_backend(backend.clone())));
    runtime.loader().register_scheme(
        DicomDirectoryLoader::SCHEME,
        Arc::new(DicomDirectoryLoader::new(cli.sort_by.into())),
    );

    let mut session = Session::new(runtime, config);
    session.bootstrap().await?;

    let engine = backend
        .engine(&session.config().engine_id)
        .ok_or("rendering engine was not created")?;
    std::fs::create_dir_all(&cli.out)?;
    for viewport_id in session.viewport_ids() {
        let Some(frame) = engine.frame(viewport_id) else {
            continue;
        };
        let path = cli.out.join(format!("{viewport_id}.png"));
        frame.save(&path)?;
        info!(viewport = %viewport_id, path = %path.display(), "snapshot written");
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
