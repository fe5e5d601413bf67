//! Headless driver for the card layer editor.
//!
//! Loads the saved session of one asset, runs a single editing command
//! against it, drains the upload queue and saves the session again. Remote
//! jobs can optionally be awaited so their result layers land in the saved
//! session.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use cardlayers::config::{ConfigError, EditorConfig};
use cardlayers::error::EditorError;
use cardlayers::geometry::{Bounds, NormalizedPoint, SurfaceSize};
use cardlayers::layers::{LayerType, Side};
use cardlayers::notify::NoticeLevel;
use cardlayers::raster::{self, RasterError};
use cardlayers::remote::RemoteError;
use cardlayers::remote::http::HttpRemoteApi;
use cardlayers::services::{compose, persistence, processor, upload};
use cardlayers::session::FileSessionStore;
use cardlayers::state::{AssetInfo, EditorState};
use cardlayers::watermark::{self, ScrubStrength};
use clap::{Parser, Subcommand, ValueEnum};
use image::Rgba;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Editor(#[from] EditorError),
    #[error(transparent)]
    Raster(#[from] RasterError),
    #[error("io error on {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },
    #[error("invalid JSON output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0} failed")]
    Workflow(&'static str),
}

#[derive(Parser, Debug)]
#[command(name = "cardlayers", about = "ID-card layer editor driver")]
struct Cli {
    /// Asset whose session is edited.
    #[arg(long, env = "CARDLAYERS_ASSET_ID", default_value = "default")]
    asset_id: String,

    /// Template the asset belongs to, for paired-element sync.
    #[arg(long, env = "CARDLAYERS_TEMPLATE_ID")]
    template_id: Option<String>,

    #[arg(long, env = "CARDLAYERS_SURFACE_WIDTH", default_value_t = 1012)]
    width: u32,

    #[arg(long, env = "CARDLAYERS_SURFACE_HEIGHT", default_value_t = 638)]
    height: u32,

    /// Card side to edit.
    #[arg(long, value_enum, default_value_t = CardSide::Front)]
    side: CardSide,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CardSide {
    Front,
    Back,
}

impl From<CardSide> for Side {
    fn from(side: CardSide) -> Self {
        match side {
            CardSide::Front => Side::Front,
            CardSide::Back => Side::Back,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Strength {
    Low,
    High,
}

impl From<Strength> for ScrubStrength {
    fn from(strength: Strength) -> Self {
        match strength {
            Strength::Low => ScrubStrength::Low,
            Strength::High => ScrubStrength::High,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the layers of the selected side.
    Layers,
    /// Add an image file as a new top layer.
    Import {
        file: PathBuf,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value_t = 0)]
        x: i32,
        #[arg(long, default_value_t = 0)]
        y: i32,
    },
    /// Queue a decomposition of an image into layers.
    Decompose {
        image_url: String,
        #[arg(long, default_value_t = 4)]
        layers: u32,
        #[arg(long)]
        prompt: Option<String>,
        #[arg(long)]
        negative_prompt: Option<String>,
        /// Wait for the job and add its layers.
        #[arg(long)]
        wait: bool,
    },
    /// Queue an upscale of a layer.
    Upscale {
        layer_id: String,
        #[arg(long, default_value = "clarity")]
        model: String,
        /// Scrub invisible watermarks before upload.
        #[arg(long)]
        scrub: bool,
        #[arg(long)]
        wait: bool,
    },
    /// Queue removal of an element from a layer.
    Remove {
        layer_id: String,
        prompt: String,
        #[arg(long)]
        wait: bool,
    },
    /// Crop a layer to a pixel region.
    Crop { layer_id: String, x: i32, y: i32, width: u32, height: u32 },
    /// Merge two or more layers into one.
    Merge {
        #[arg(required = true, num_args = 2..)]
        layer_ids: Vec<String>,
    },
    /// Fill a polygon with a solid color as a new layer.
    Fill {
        /// `#rrggbb` or `#rrggbbaa`.
        #[arg(long, value_parser = parse_color, default_value = "#000000")]
        color: Rgba<u8>,
        /// Polygon vertices as normalized `x,y` pairs.
        #[arg(required = true, num_args = 3.., value_parser = parse_point)]
        points: Vec<NormalizedPoint>,
    },
    /// Replace a layer's image with a cut-out of its foreground.
    RemoveBg { layer_id: String },
    /// Upload a layer as the side's background image.
    SetBackground { layer_id: String },
    /// Print the job history as JSON.
    History,
    /// Scrub watermark bits from an image file.
    Scrub {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, value_enum, default_value_t = Strength::High)]
        strength: Strength,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let dotenv = dotenvy::dotenv();
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    if let Ok(path) = &dotenv {
        info!(path = %path.display(), "main: loaded .env");
    }

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    if let Command::Scrub { input, output, strength } = &cli.command {
        return run_scrub(input, output, (*strength).into()).await;
    }

    let config = EditorConfig::from_env()?;
    let remote = Arc::new(HttpRemoteApi::new(&config)?);
    let sessions = Arc::new(FileSessionStore::new(&config.session_dir));
    let asset = AssetInfo {
        id: cli.asset_id.clone(),
        template_id: cli.template_id.clone(),
        surface: SurfaceSize::new(cli.width, cli.height),
    };
    let state = EditorState::new(config, remote, sessions, asset);
    let mut notices = state.notifier.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            match notice.level {
                NoticeLevel::Error | NoticeLevel::Warning => eprintln!("{}", notice.message),
                NoticeLevel::Info | NoticeLevel::Success => println!("{}", notice.message),
            }
        }
    });

    let restored = persistence::load_session(&state).await?;
    state.doc.write().await.layers.set_side(cli.side.into());
    info!(asset_id = %state.asset.id, restored, "main: session ready");

    let hit_tests = compose::spawn_hit_test_task(state.clone());
    let completions = processor::spawn_completion_listener(state.clone());

    let result = run_command(&state, cli.command).await;

    let pending = upload::process_upload_queue(&state).await;
    info!(uploaded = pending, "main: upload queue drained");
    if let Err(err) = persistence::save_session(&state).await {
        warn!(error = %err, "main: session save failed");
    }

    hit_tests.abort();
    completions.abort();
    printer.abort();
    result
}

async fn run_command(state: &EditorState, command: Command) -> Result<(), CliError> {
    match command {
        Command::Layers => {
            let doc = state.doc.read().await;
            for layer in doc.layers.layers() {
                let b = layer.bounds;
                println!(
                    "{:>3} {} {:<24} {:>5},{:<5} {}x{} {:?}",
                    layer.z_index,
                    layer.id,
                    layer.name,
                    b.x,
                    b.y,
                    b.width,
                    b.height,
                    layer.layer_type
                );
            }
            Ok(())
        }
        Command::Import { file, name, x, y } => {
            let bytes = read_file(&file).await?;
            let surface = raster::decode(Arc::from(bytes.clone())).await?;
            let name = name.unwrap_or_else(|| {
                file.file_stem().map_or_else(|| "Imported".to_string(), |s| s.to_string_lossy().to_string())
            });
            let bounds = Bounds::new(x, y, surface.width(), surface.height());
            let id = state
                .doc
                .write()
                .await
                .layers
                .create_drawing_layer(bytes, &name, bounds, LayerType::Drawing)
                .map_err(EditorError::from)?;
            println!("{id}");
            Ok(())
        }
        Command::Decompose { image_url, layers, prompt, negative_prompt, wait } => {
            let params = processor::DecomposeParams {
                image_url,
                num_layers: layers,
                prompt,
                negative_prompt,
                settings: serde_json::Value::Null,
            };
            require(processor::decompose(state, params).await, "decompose")?;
            await_jobs(state, wait).await;
            Ok(())
        }
        Command::Upscale { layer_id, model, scrub, wait } => {
            require(processor::upscale_layer(state, &layer_id, &model, scrub).await, "upscale")?;
            await_jobs(state, wait).await;
            Ok(())
        }
        Command::Remove { layer_id, prompt, wait } => {
            require(processor::remove_element(state, &layer_id, &prompt).await, "remove")?;
            await_jobs(state, wait).await;
            Ok(())
        }
        Command::Crop { layer_id, x, y, width, height } => {
            let id = processor::crop_layer(state, &layer_id, Bounds::new(x, y, width, height))
                .await
                .ok_or(CliError::Workflow("crop"))?;
            println!("{id}");
            Ok(())
        }
        Command::Merge { layer_ids } => {
            {
                let mut doc = state.doc.write().await;
                doc.layers.set_merge_mode(true);
                for id in &layer_ids {
                    doc.layers.toggle_merge_selection(id);
                }
            }
            require(processor::merge_selected_layers(state).await, "merge")
        }
        Command::Fill { color, points } => {
            let id = processor::fill_selection(state, &points, color).await.ok_or(CliError::Workflow("fill"))?;
            println!("{id}");
            Ok(())
        }
        Command::RemoveBg { layer_id } => require(processor::remove_background(state, &layer_id).await, "remove-bg"),
        Command::SetBackground { layer_id } => {
            let url = processor::set_layer_as_background(state, &layer_id)
                .await
                .ok_or(CliError::Workflow("set-background"))?;
            println!("{url}");
            Ok(())
        }
        Command::History => {
            state.history.reload().await?;
            println!("{}", serde_json::to_string_pretty(&state.history.items())?);
            Ok(())
        }
        Command::Scrub { input, output, strength } => run_scrub(&input, &output, strength.into()).await,
    }
}

fn parse_color(raw: &str) -> Result<Rgba<u8>, String> {
    raster::parse_hex_color(raw).ok_or_else(|| format!("expected #rrggbb or #rrggbbaa, got {raw:?}"))
}

fn parse_point(raw: &str) -> Result<NormalizedPoint, String> {
    let (x, y) = raw.split_once(',').ok_or_else(|| format!("expected x,y, got {raw:?}"))?;
    let coord = |v: &str| v.trim().parse::<f64>().map_err(|e| format!("bad coordinate {v:?}: {e}"));
    Ok(NormalizedPoint::new(coord(x)?, coord(y)?))
}

fn require(ok: bool, what: &'static str) -> Result<(), CliError> {
    if ok { Ok(()) } else { Err(CliError::Workflow(what)) }
}

/// Block until no job is being polled any more.
async fn await_jobs(state: &EditorState, wait: bool) {
    if !wait {
        return;
    }
    let interval = state.config.poll.interval();
    loop {
        tokio::time::sleep(interval).await;
        let active = state.history.items().iter().any(|item| state.history.is_polling(&item.id));
        if !active {
            break;
        }
    }
    // Let the completion listener apply the last result.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let settled = state.history.items().iter().filter(|item| item.status.is_terminal()).count();
    info!(settled, "main: jobs settled");
}

async fn run_scrub(input: &Path, output: &Path, strength: ScrubStrength) -> Result<(), CliError> {
    let bytes = read_file(input).await?;
    let scrubbed = watermark::remove_watermark(Arc::from(bytes), strength).await?;
    tokio::fs::write(output, scrubbed)
        .await
        .map_err(|source| CliError::Io { path: output.to_path_buf(), source })?;
    println!("{}", output.display());
    Ok(())
}

async fn read_file(path: &Path) -> Result<Vec<u8>, CliError> {
    tokio::fs::read(path).await.map_err(|source| CliError::Io { path: path.to_path_buf(), source })
}
