//! Headless canvas snapshot tool.
//!
//! Connects to a canvas authority, waits for the session init, loads
//! every tile the requested viewport can see and writes the composed
//! frame to a PNG. Doubles as a smoke test for the whole engine stack.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, Naming};

use pixelfield_client::{AppState, CanvasController, CanvasEvent, ChannelConfig, ChunkService, NullHost, Options, sync};
use pixelfield_engine::PositionToken;

#[derive(Parser)]
#[command(name = "pixelfield_headless", about = "Render a canvas viewport to a PNG")]
struct Cli {
    #[arg(help = "HTTP base URL of the authority, e.g. https://canvas.example.org", long)]
    api: String,

    #[arg(help = "Websocket endpoint, e.g. wss://canvas.example.org/pix/connect", long)]
    ws: String,

    #[arg(help = "Access token for the channel URL", long, default_value = "")]
    token: String,

    #[arg(help = "Position token to render, e.g. '#d(-290,12,10)'", long)]
    position: String,

    #[arg(help = "Viewport width in pixels", long, default_value_t = 1280)]
    width: u32,

    #[arg(help = "Viewport height in pixels", long, default_value_t = 720)]
    height: u32,

    #[arg(help = "Seconds to wait for tiles before rendering", long, default_value_t = 10)]
    wait: u64,

    #[arg(help = "Output file", default_value = "canvas.png")]
    out: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let _logger = Logger::try_with_env_or_str("info")?
        .log_to_file(FileSpec::default().basename("pixelfield_headless").suppress_timestamp())
        .rotate(Criterion::Size(1024 * 1024), Naming::Numbers, Cleanup::KeepLogFiles(3))
        .duplicate_to_stderr(flexi_logger::Duplicate::Warn)
        .start()?;

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(run(args))
}

async fn run(args: Cli) -> anyhow::Result<()> {
    let token = PositionToken::parse(&args.position).context("invalid position token")?;

    let mut state = AppState::new(Options::default(), args.width, args.height);
    state.viewport_mut().set_position(token.x as f64, token.y as f64);
    state.viewport_mut().set_zoom(token.zoom);

    let mut controller = CanvasController::new(state, ChunkService::new(&args.api), Box::new(NullHost));
    controller.persist_options = false;

    let config = ChannelConfig {
        endpoint: args.ws.clone(),
        access_token: args.token.clone(),
        ..Default::default()
    };
    let (handle, mut events) = sync::connect(config);
    controller.attach_channel(handle);

    // Wait for the init frame so canvas descriptors are known.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.wait);
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .context("timed out waiting for session init")?
            .context("channel closed before init")?;
        let initialized = matches!(event, CanvasEvent::Initialized(_));
        controller.apply_event(event);
        if initialized {
            break;
        }
    }

    controller.go_to_token(&token).context("position token names an unknown canvas")?;

    // Let the fetch pool drain while forwarding channel traffic.
    let settle = tokio::time::Instant::now() + Duration::from_secs(args.wait);
    while tokio::time::Instant::now() < settle {
        while let Ok(event) = events.try_recv() {
            controller.apply_event(event);
        }
        controller.pump_tiles();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    controller.pump_tiles();

    controller.render_if_dirty();
    let (width, height) = controller.frame_size();
    let image = image::RgbaImage::from_raw(width, height, controller.frame().to_vec()).context("frame buffer size mismatch")?;
    image.save(&args.out).with_context(|| format!("writing {}", args.out.display()))?;
    log::info!("wrote {}x{} frame to {}", width, height, args.out.display());
    Ok(())
}
