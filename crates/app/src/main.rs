use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rive_bridge_core::{
    bootstrap, AudioBackend, EventKind, EventTarget, HeadlessRenderer, HostEvent, InputKind,
    InstanceConfig, MemoryDocument, Page, Point, PointerNormalizer, Rect, Renderer, SharedSignal,
    Size, SyntheticBackend, ThinkingSignal,
};
use tracing_subscriber::EnvFilter;

const FRAME: Duration = Duration::from_millis(16);

fn main() -> rive_bridge_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => run_check(&config),
        Commands::Simulate(args) => run_simulate(&args),
    }
}

/// Reads the configuration array. A record that does not decode is skipped
/// with a warning so its siblings still run.
fn load_configs(path: &Path) -> rive_bridge_core::Result<Vec<InstanceConfig>> {
    let text = std::fs::read_to_string(path)?;
    let records: Vec<serde_json::Value> = serde_json::from_str(&text)?;
    let total = records.len();
    let configs: Vec<InstanceConfig> = records
        .into_iter()
        .enumerate()
        .filter_map(|(index, record)| match serde_json::from_value::<InstanceConfig>(record) {
            Ok(config) => Some(config),
            Err(err) => {
                tracing::warn!(index, error = %err, "skipping invalid instance record");
                None
            }
        })
        .collect();
    tracing::info!(?path, instances = configs.len(), skipped = total - configs.len(), "configuration loaded");
    Ok(configs)
}

fn run_check(path: &Path) -> rive_bridge_core::Result<()> {
    for config in load_configs(path)? {
        let pointer = config.inputs.pointer_mapping();
        println!(
            "{}: src={} state_machine={} pointer={}({:?}, {:?}) audio={:?}",
            config.id,
            config.src,
            config.state_machine.as_deref().unwrap_or("-"),
            if config.pointer { "on" } else { "off" },
            config.pointer_scope,
            pointer.normalize,
            config.audio_mode,
        );
    }
    Ok(())
}

fn run_simulate(args: &SimulateArgs) -> rive_bridge_core::Result<()> {
    let configs = load_configs(&args.config)?;
    let document = Arc::new(MemoryDocument::new(Size::new(args.viewport_width, args.viewport_height)));
    let surface = Rect::new(args.left, args.top, args.width, args.height);
    for config in &configs {
        document.insert_element(config.container_id.clone(), surface)?;
        document.insert_element(config.canvas_id.clone(), surface)?;
    }
    let page = Page::new(document);

    let signal = SharedSignal::tone(args.tone, 32);
    let mut renderers = Vec::new();
    let instances = bootstrap(&page, configs, |config| {
        let renderer = HeadlessRenderer::new(args.inputs.iter().cloned());
        renderers.push(renderer.clone());

        let mut backend = SyntheticBackend::new().with_microphone(signal.clone());
        if let Some(id) = &config.audio_element_id {
            backend = backend.with_element(id.clone(), signal.clone());
        }
        let renderer: Box<dyn Renderer> = Box::new(renderer);
        let backend: Box<dyn AudioBackend> = Box::new(backend);
        (renderer, backend)
    });
    page.run_until_idle()?;

    page.dispatch(&EventTarget::Window, EventKind::Focus, &HostEvent::default())?;
    for instance in &instances {
        let canvas = EventTarget::element(instance.config().canvas_id.clone());
        page.dispatch(&canvas, EventKind::Click, &HostEvent::default())?;
    }
    if let Some(id) = &args.thinking {
        page.thinking().publish(&ThinkingSignal::to(id.clone(), true))?;
    }

    let mut targets: Vec<EventTarget> = Vec::new();
    for instance in &instances {
        let target = PointerNormalizer::from_config(instance.config()).target();
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    for frame in 0..args.frames {
        if let Some(point) = args.pointer.get(frame % args.pointer.len().max(1)) {
            for target in &targets {
                page.dispatch(target, EventKind::PointerMove, &HostEvent::pointer(point.x, point.y))?;
            }
        }
        page.run_frame()?;
        page.advance(FRAME)?;
    }

    for (instance, renderer) in instances.iter().zip(&renderers) {
        let audio = instance.audio().state();
        let spectrum = instance.audio().frequency_bytes()?;
        let peak = spectrum
            .iter()
            .enumerate()
            .max_by_key(|&(_, value)| *value)
            .map(|(bin, value)| serde_json::json!({ "bin": bin, "value": value }));
        let report = serde_json::json!({
            "id": instance.id(),
            "state": instance.state(),
            "audio": {
                "active": audio.active,
                "level": audio.level,
                "talking": audio.talking,
                "spectrumPeak": peak,
            },
            "updates": renderer.latest_updates(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        tracing::debug!(instance = %instance.id(), writes = renderer.updates().len(), "simulation finished");
    }

    for instance in &instances {
        instance.dispose()?;
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

fn parse_input(raw: &str) -> Result<(String, InputKind), String> {
    let (name, kind) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected NAME:KIND, got `{raw}`"))?;
    let kind = match kind {
        "number" | "numeric" => InputKind::Numeric,
        "bool" | "boolean" => InputKind::Boolean,
        "trigger" => InputKind::Trigger,
        other => return Err(format!("unknown input kind `{other}`")),
    };
    Ok((name.to_string(), kind))
}

fn parse_point(raw: &str) -> Result<Point, String> {
    let (x, y) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got `{raw}`"))?;
    let x = x.trim().parse::<f64>().map_err(|err| err.to_string())?;
    let y = y.trim().parse::<f64>().map_err(|err| err.to_string())?;
    Ok(Point::new(x, y))
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Rive animation bridge tooling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse a configuration file and summarise each instance.
    Check {
        /// JSON array of instance configurations.
        config: PathBuf,
    },
    /// Run instances against a headless page and report the inputs they drive.
    Simulate(SimulateArgs),
}

#[derive(clap::Args, Debug)]
struct SimulateArgs {
    /// JSON array of instance configurations.
    config: PathBuf,

    /// Input declared by every headless state machine, as NAME:KIND.
    #[arg(
        short,
        long = "input",
        value_parser = parse_input,
        default_values = ["mx:number", "my:number", "audio_level:number", "is_talking:bool"]
    )]
    inputs: Vec<(String, InputKind)>,

    /// Pointer position in client coordinates, as X,Y. Cycled across frames.
    #[arg(short, long, value_parser = parse_point)]
    pointer: Vec<Point>,

    #[arg(short, long, default_value_t = 60)]
    frames: usize,

    /// Peak amplitude of the synthetic audio tone.
    #[arg(long, default_value_t = 0.5)]
    tone: f32,

    /// Instance id to send a thinking signal to.
    #[arg(long)]
    thinking: Option<String>,

    #[arg(long, default_value_t = 1280.0)]
    viewport_width: f64,

    #[arg(long, default_value_t = 720.0)]
    viewport_height: f64,

    #[arg(long, default_value_t = 0.0)]
    left: f64,

    #[arg(long, default_value_t = 0.0)]
    top: f64,

    /// Width of every container and canvas.
    #[arg(long, default_value_t = 300.0)]
    width: f64,

    #[arg(long, default_value_t = 150.0)]
    height: f64,
}
