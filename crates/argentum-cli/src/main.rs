use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use argentum_core::exporters::export_tiff16;
use argentum_core::params::{
    BlackWhiteParams, DemosaicParams, FilmParams, FilmlikeCurvesParams, LoadParams, PrefilmParams,
};
use argentum_core::{
    CachePolicy, HistogramMode, ImagePipeline, NullSink, ParameterManager, Quality,
};
use argentum_raw::{is_raw_extension, RawloaderSource};

#[derive(Parser)]
#[command(name = "argentum")]
#[command(version, about = "Film-simulation raw developer", long_about = None)]
struct Cli {
    /// Input image (raw, TIFF or JPEG)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output TIFF path (defaults to the input with a .tiff extension)
    #[arg(short, long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Processing quality: low, preview or high
    #[arg(long, value_name = "QUALITY", default_value = "high")]
    quality: String,

    /// Release intermediate buffers between stages
    #[arg(long)]
    no_cache: bool,

    /// Color temperature in Kelvin
    #[arg(long, value_name = "K", default_value = "5200")]
    temperature: f32,

    /// Green-magenta tint multiplier
    #[arg(long, value_name = "FLOAT", default_value = "1.0")]
    tint: f32,

    /// Exposure compensation in stops
    #[arg(long, value_name = "STOPS", default_value = "0")]
    exposure: f32,

    /// Film simulation strength, 0 disables development
    #[arg(long, value_name = "FLOAT", default_value = "1.0")]
    film_strength: f32,

    /// Highlight recovery mode (0 = clip, 1 = unclipped, 2 = rebuild)
    #[arg(long, value_name = "MODE", default_value = "0")]
    highlights: u32,

    /// Rotation angle in degrees
    #[arg(long, value_name = "DEG", default_value = "0")]
    rotation: f32,

    /// Crop height as a fraction of image height (0 disables)
    #[arg(long, value_name = "FRACTION", default_value = "0")]
    crop_height: f32,

    /// Crop aspect ratio
    #[arg(long, value_name = "RATIO", default_value = "1.5")]
    crop_aspect: f32,

    /// Whitepoint, relative to full scale
    #[arg(long, value_name = "FLOAT", default_value = "1.0")]
    whitepoint: f32,

    /// Blackpoint, relative to full scale
    #[arg(long, value_name = "FLOAT", default_value = "0.0")]
    blackpoint: f32,

    /// Vibrance, -1 to 1
    #[arg(long, value_name = "FLOAT", default_value = "0")]
    vibrance: f32,

    /// Saturation, -1 to 1
    #[arg(long, value_name = "FLOAT", default_value = "0")]
    saturation: f32,

    /// Develop to black and white
    #[arg(long)]
    monochrome: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let quality = match cli.quality.as_str() {
        "low" => Quality::Low,
        "preview" => Quality::Preview,
        "high" => Quality::High,
        other => {
            error!("unknown quality {other:?}; expected low, preview or high");
            return ExitCode::FAILURE;
        }
    };
    let cache = if cli.no_cache {
        CachePolicy::NoCache
    } else {
        CachePolicy::Cache
    };

    let extension = cli
        .input
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    let param_manager = ParameterManager::new();
    param_manager.set_load_params(LoadParams {
        full_filename: cli.input.to_string_lossy().into_owned(),
        tiff_in: matches!(extension.as_str(), "tif" | "tiff"),
        jpeg_in: matches!(extension.as_str(), "jpg" | "jpeg"),
    });
    param_manager.set_demosaic_params(DemosaicParams {
        highlights: cli.highlights,
        ..DemosaicParams::default()
    });
    param_manager.set_prefilm_params(PrefilmParams {
        temperature: cli.temperature,
        tint: cli.tint,
        exposure_comp: cli.exposure,
    });
    param_manager.set_film_params(FilmParams {
        simulation_strength: cli.film_strength,
        ..FilmParams::default()
    });
    param_manager.set_blackwhite_params(BlackWhiteParams {
        rotation: cli.rotation,
        crop_height: cli.crop_height,
        crop_aspect: cli.crop_aspect,
        whitepoint: cli.whitepoint,
        blackpoint: cli.blackpoint,
        ..BlackWhiteParams::default()
    });
    param_manager.set_filmlike_params(FilmlikeCurvesParams {
        vibrance: cli.vibrance,
        saturation: cli.saturation,
        monochrome: cli.monochrome,
        ..FilmlikeCurvesParams::default()
    });

    let mut pipeline = ImagePipeline::new(cache, HistogramMode::NoHisto, quality);
    if is_raw_extension(&extension) {
        pipeline.set_raw_source(Arc::new(RawloaderSource));
    }

    let developed = pipeline.process_image(&param_manager, &NullSink);
    if developed.is_empty() {
        error!("development failed for {}", cli.input.display());
        return ExitCode::FAILURE;
    }

    let out_path = cli
        .out
        .unwrap_or_else(|| cli.input.with_extension("tiff"));
    if let Err(e) = export_tiff16(&developed, pipeline.metadata(), &out_path, cli.monochrome) {
        error!("export failed: {e}");
        return ExitCode::FAILURE;
    }
    info!(
        "developed {} -> {} ({}x{})",
        cli.input.display(),
        out_path.display(),
        developed.nc() / 3,
        developed.nr()
    );
    ExitCode::SUCCESS
}
