//! Flotilla node - one display unit of the installation
//!
//! - Listens for control broadcasts and feeds them to the blink state machine
//! - Randomizes its own blink pattern between remote commands
//! - Loops a video file, showing it or a blank canvas as the blink state says

mod blink;
mod driver;
mod pipeline;
mod receiver;
mod screen;
mod video;

use anyhow::{bail, Context, Result};
use blink::{BlinkState, ControlMapping};
use clap::Parser;
use driver::BlinkDriver;
use flotilla_common::{logging, FleetConfig, NodeConf};
use pipeline::{FramePipeline, PipelineOptions};
use rand::rngs::StdRng;
use rand::SeedableRng;
use receiver::BroadcastReceiver;
use screen::{Framebuffer, Headless, Screen};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;
use video::{DecodePath, FfmpegSource, VideoInfo};

const INBOX_DEPTH: usize = 64;

#[derive(Debug, Parser)]
#[command(name = "flotilla-node", about = "Blinking video display node")]
struct Args {
    /// Video file to loop
    video: PathBuf,

    /// Render to nowhere instead of the framebuffer
    #[arg(long)]
    headless: bool,

    /// Headless surface width (defaults to the video width)
    #[arg(long)]
    width: Option<u32>,

    /// Headless surface height (defaults to the video height)
    #[arg(long)]
    height: Option<u32>,

    /// Control broadcast port (overrides `broadcast.port`)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("info");
    let args = Args::parse();
    let cfg = FleetConfig::load();
    let node = &cfg.node;

    if std::env::var_os("DISPLAY").is_none() {
        std::env::set_var("DISPLAY", &node.display_env);
    }
    if !args.video.is_file() {
        bail!("video not found: {}", args.video.display());
    }

    let port = args.port.unwrap_or(cfg.broadcast.port);
    let receiver = BroadcastReceiver::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
        .with_context(|| format!("Failed to bind control port {port}"))?;

    let (source, info) = open_video(args.video.clone(), node.random_start).await?;
    let screen = open_screen(&args, node, &info)?;

    let initial = BlinkState::initial(node.default_interval_ms);
    let (state_tx, state_rx) = watch::channel(initial);
    let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_DEPTH);

    let pipeline = FramePipeline::start(
        source,
        screen,
        state_rx,
        PipelineOptions {
            refresh_hz: node.refresh_hz,
            background: node.background,
            restart_attempts: node.restart_attempts,
        },
    )
    .context("Failed to start frame pipeline")?;

    let driver = BlinkDriver::new(
        initial,
        ControlMapping::from(node),
        Duration::from_secs(node.randomize_every_secs.max(1)),
        StdRng::from_entropy(),
    );
    let driver_task = tokio::spawn(driver.run(inbox_rx, state_tx));
    let receiver_task = tokio::spawn(receiver.run(inbox_tx));

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("shutting down");

    // dropping the receiver closes the inbox, which ends the driver
    receiver_task.abort();
    let _ = receiver_task.await;
    let last = driver_task.await.context("Blink driver failed")?;
    info!("final blink state: {last:?}");

    tokio::task::spawn_blocking(move || pipeline.stop())
        .await
        .context("Failed to stop frame pipeline")?;
    Ok(())
}

/// Probe and open on a blocking thread; both shell out and wait.
async fn open_video(path: PathBuf, random_start: bool) -> Result<(FfmpegSource, VideoInfo)> {
    tokio::task::spawn_blocking(move || -> Result<(FfmpegSource, VideoInfo)> {
        let info = video::probe(&path).with_context(|| format!("Failed to probe {}", path.display()))?;
        let start = if random_start {
            info.random_start(&mut rand::thread_rng())
        } else {
            0.0
        };
        let source = video::open_with_fallback(
            || FfmpegSource::open(&path, info, DecodePath::Accelerated, start),
            || FfmpegSource::open(&path, info, DecodePath::Software, start),
        )
        .context("Failed to open video source")?;
        Ok((source, info))
    })
    .await
    .context("Video open task failed")?
}

fn open_screen(args: &Args, node: &NodeConf, info: &VideoInfo) -> Result<Box<dyn Screen>> {
    if args.headless {
        let width = args.width.unwrap_or(info.width);
        let height = args.height.unwrap_or(info.height);
        info!("headless output {width}x{height}");
        return Ok(Box::new(Headless::new(width, height)));
    }
    let device = Path::new(&node.framebuffer);
    let fb = Framebuffer::open(device).with_context(|| format!("Failed to open {}", device.display()))?;
    Ok(Box::new(fb))
}
