//! Live classifier binary.
//!
use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{bail, Result};
use clap::Parser;
use env_logger::TimestampPrecision;
use live_classifier::{
    display::{spawn_stdin_keys, StreamDisplay},
    endpoints::viewer_router,
    live::{LiveConfig, LiveContext, LoopReport},
    meter::spawn_report_logger,
    nn::load_classifier,
    sensors::{device_name, parse_resolution, Camera, FrameDirCamera, V4lCamera},
    utils::fetch_model,
};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Trained model, `.onnx` or `.mpk`
    #[clap(long)]
    model: Option<PathBuf>,

    /// URL to download the model from, cached for later runs
    #[clap(long, conflicts_with = "model")]
    model_url: Option<String>,

    /// Index of the video device
    #[clap(long, default_value_t = 0)]
    device: u32,

    /// Replay the images of this directory instead of using a camera
    #[clap(long)]
    frames_dir: Option<PathBuf>,

    /// Capture resolution as WIDTHxHEIGHT, highest supported if not given
    #[clap(long, value_parser = parse_resolution)]
    resolution: Option<(u32, u32)>,

    /// Address the viewer is served on
    #[clap(long, default_value = "127.0.0.1:3000")]
    server_address: String,

    #[clap(long, default_value = "Capturing")]
    window_name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let model_path = match (args.model.clone(), args.model_url.as_deref()) {
        (Some(path), _) => path,
        (None, Some(url)) => fetch_model(url).await?,
        (None, None) => bail!("either --model or --model-url is required"),
    };
    let classifier = load_classifier(&model_path)?;
    let camera = open_camera(&args)?;

    let display = StreamDisplay::new(&args.window_name);
    let viewer_state = display.viewer_state();
    spawn_stdin_keys(viewer_state.clone());

    let (progress_tx, progress_rx) = tokio::sync::watch::channel(LoopReport::default());
    spawn_report_logger(progress_rx, Duration::from_secs(2));

    // Serve the viewer
    let addr: SocketAddr = args.server_address.parse()?;
    let server =
        axum::Server::try_bind(&addr)?.serve(viewer_router(viewer_state).into_make_service());
    log::info!(
        "Window {} at http://{}, press q there or q+Enter here to quit",
        &args.window_name,
        addr
    );
    tokio::spawn(async move {
        if let Err(err) = server.await {
            log::error!("Viewer server failed: {}", err);
        }
    });

    let context = LiveContext::new(camera, classifier, display, LiveConfig::default())
        .with_progress(progress_tx);
    let report = tokio::task::spawn_blocking(move || context.run()).await??;
    log::info!(
        "Classified {} real, {} fake, {} unknown frames ({} without frame)",
        report.real,
        report.fake,
        report.unknown,
        report.missing_frames
    );

    Ok(())
}

fn open_camera(args: &Args) -> Result<Box<dyn Camera + Send>> {
    match &args.frames_dir {
        Some(dir) => Ok(Box::new(FrameDirCamera::new(dir)?)),
        None => Ok(Box::new(V4lCamera::open(
            &device_name(args.device),
            args.resolution,
            None,
        )?)),
    }
}
