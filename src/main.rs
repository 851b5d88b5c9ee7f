use anyhow::{anyhow, Context, Result};
use clap::Parser;
use codescan::{FrameGeometry, GeometryInput, Resolution, ScannerConfig};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "codescan")]
#[command(about = "Live camera barcode scanning with orientation-aware cropping")]
#[command(version)]
#[command(long_about = "Scans a camera preview stream for barcodes and reports each payload \
once per cooldown window. Without a camera attached, the binary inspects preview geometry \
and replays still images through the full scanning pipeline.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "codescan.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Print the display transform and region of interest for a preview and view size
    #[arg(
        long,
        num_args = 2,
        value_names = ["PREVIEW", "VIEW"],
        help = "Print geometry for PREVIEW and VIEW sizes (e.g. 1280x720 720x1280) using the configured display"
    )]
    geometry: Option<Vec<String>>,

    /// Camera mount orientation used with --geometry
    #[arg(long, default_value_t = 90, value_name = "DEGREES")]
    sensor_orientation: u32,

    /// Replay images from a directory through the scanner
    #[cfg(feature = "replay")]
    #[arg(long, value_name = "DIR", help = "Feed PNG/JPEG files from DIR as camera frames and print results as JSON lines")]
    replay: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting codescan v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match ScannerConfig::load_from_file(&args.config) {
        Ok(config) => {
            info!("Configuration loaded from: {}", args.config);
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    config.validate()?;

    if let Some(sizes) = &args.geometry {
        return print_geometry(&config, sizes, args.sensor_orientation);
    }

    #[cfg(feature = "replay")]
    if let Some(dir) = &args.replay {
        return replay::run(config, dir).await;
    }

    eprintln!("Nothing to do: pass --geometry or --replay, or --help for usage");
    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("codescan={}", log_level)));

    // Results go to stdout, so logs stay on stderr
    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

fn print_default_config() -> Result<()> {
    println!("# codescan configuration file");
    println!("# Every key is optional; CODESCAN_<SECTION>_<KEY> environment variables override it");
    println!();
    println!("{}", ScannerConfig::default().to_toml()?);
    Ok(())
}

fn print_geometry(config: &ScannerConfig, sizes: &[String], sensor_orientation: u32) -> Result<()> {
    let [preview, view] = sizes else {
        return Err(anyhow!("--geometry takes exactly two sizes"));
    };
    let preview: Resolution = preview.parse()?;
    let view: Resolution = view.parse()?;

    let input = GeometryInput {
        preview,
        view,
        xdpi: config.display.xdpi,
        ydpi: config.display.ydpi,
        is_portrait: config.display.rotation.is_portrait(),
        sensor_orientation,
    };
    let geometry = FrameGeometry::compute(&input)
        .with_context(|| format!("No geometry for preview {} in view {}", preview, view))?;

    println!("{}", serde_json::to_string_pretty(&geometry)?);
    Ok(())
}

#[cfg(feature = "replay")]
mod replay {
    use anyhow::{anyhow, Context, Result};
    use codescan::{
        CameraCapabilities, CameraProvider, MockCameraProvider, MockSurface, PreviewSurface,
        Resolution, ScanOptions, Scanner, ScannerConfig,
    };
    use image::imageops::FilterType;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tracing::{debug, info, warn};

    const EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];
    const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

    struct ReplayFrame {
        path: PathBuf,
        luminance: Vec<u8>,
    }

    /// Feed every image in `dir` through a scanner backed by the mock camera
    pub async fn run(config: ScannerConfig, dir: &Path) -> Result<()> {
        let (resolution, frames) = load_frames(dir)?;
        info!("Replaying {} frames at {}", frames.len(), resolution);

        let provider = Arc::new(MockCameraProvider::new().with_capabilities(CameraCapabilities {
            preview_sizes: vec![resolution],
            default_preview_size: Some(resolution),
            ..MockCameraProvider::default_capabilities()
        }));

        let scanner = Scanner::builder()
            .provider(provider.clone() as Arc<dyn CameraProvider>)
            .config(config.clone())
            .build()?;

        let (results_tx, mut results) = mpsc::unbounded_channel();
        let options = ScanOptions::from_config(&config).with_preferred_resolution(resolution);
        scanner
            .start(
                move |result| {
                    let _ = results_tx.send(result);
                },
                options,
            )
            .await?;

        // A view matching the frame keeps the whole frame in the region
        let view = if config.display.rotation.is_portrait() {
            resolution.swapped()
        } else {
            resolution
        };
        scanner.on_surface_available(Arc::new(MockSurface::new(view)) as Arc<dyn PreviewSurface>);

        let camera = provider
            .last_opened()
            .ok_or_else(|| anyhow!("Camera was not opened"))?;
        settle(|| camera.is_previewing())
            .await
            .context("Preview did not start")?;

        let mut pacing = tokio::time::interval(Duration::from_secs_f64(
            1.0 / config.camera.fps.max(1) as f64,
        ));
        for frame in frames {
            pacing.tick().await;
            settle(|| camera.free_buffers() > 0)
                .await
                .context("Frame buffer was never returned")?;

            let handled_before = handled(&scanner);
            if !camera.deliver_frame(&frame.luminance) {
                warn!("Frame from {} was dropped", frame.path.display());
                continue;
            }
            settle(|| handled(&scanner) > handled_before)
                .await
                .with_context(|| format!("Frame from {} was not processed", frame.path.display()))?;

            while let Ok(result) = results.try_recv() {
                let line = serde_json::json!({
                    "file": frame.path.display().to_string(),
                    "result": result,
                });
                println!("{}", line);
            }
        }

        let stats = scanner.stats();
        info!(
            "Replay finished: {} frames, {} results, {} duplicates, {} misses",
            stats.frames_received,
            stats.results_emitted,
            stats.duplicates_suppressed,
            stats.decode_misses
        );
        eprintln!("{}", serde_json::to_string(&stats)?);

        scanner.shutdown().await;
        Ok(())
    }

    fn handled(scanner: &Scanner) -> u64 {
        let stats = scanner.stats();
        stats.decode_attempts + stats.frames_skipped + stats.frame_errors
    }

    async fn settle<F>(condition: F) -> Result<()>
    where
        F: Fn() -> bool,
    {
        tokio::time::timeout(SETTLE_TIMEOUT, async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .map_err(|_| anyhow!("Timed out after {:?}", SETTLE_TIMEOUT))
    }

    /// Load images as luminance planes, all scaled to the first image's size
    fn load_frames(dir: &Path) -> Result<(Resolution, Vec<ReplayFrame>)> {
        let mut paths = std::fs::read_dir(dir)
            .with_context(|| format!("Cannot read replay directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .collect::<Vec<_>>();
        paths.sort();

        let mut resolution = None;
        let mut frames = Vec::with_capacity(paths.len());
        for path in paths {
            let mut luma = image::open(&path)
                .with_context(|| format!("Cannot decode image {}", path.display()))?
                .to_luma8();

            let target = *resolution.get_or_insert(Resolution::new(luma.width(), luma.height()));
            if luma.dimensions() != (target.width, target.height) {
                debug!("Scaling {} to {}", path.display(), target);
                luma = image::imageops::resize(&luma, target.width, target.height, FilterType::Triangle);
            }

            frames.push(ReplayFrame {
                path,
                luminance: luma.into_raw(),
            });
        }

        let resolution =
            resolution.ok_or_else(|| anyhow!("No PNG or JPEG images in {}", dir.display()))?;
        Ok((resolution, frames))
    }
}
