use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use lens_vision::camera::{CameraConfig, CameraSource, FrameSource, ImageDirSource};
use lens_vision::hit::HitShape;
use lens_vision::replay::{ReplayFaceDetector, ReplayLog, ReplayObjectDetector};
use lens_vision::sink::JsonLinesSink;
use lens_vision::{
    CanvasGeometry, Catalog, DetectionLoop, Frame, LoopConfig, OverlayRenderer, PointerEvent, RenderConfig,
    Resolution, TrackingConfig, VisionError,
};

#[derive(Debug, Parser)]
#[command(name = "lens", version, about = "Lens - interactive detection overlay")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the detection loop; reads `click <x> <y>` lines from stdin.
    Run,
    /// Check config, catalog, detectors and the video source.
    Doctor,
    /// List catalog categories.
    Catalog,
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    source: SourceCfg,
    #[serde(default)]
    detectors: DetectorsCfg,
    #[serde(default)]
    catalog: CatalogCfg,
    #[serde(default)]
    display: DisplayCfg,
    #[serde(default)]
    tracking: TrackingConfig,
    #[serde(default)]
    interaction: InteractionCfg,
    #[serde(default)]
    render: RenderConfig,
    #[serde(default)]
    output: OutputCfg,
}

#[derive(Debug, serde::Deserialize)]
struct SourceCfg {
    mode: String, // "camera" | "dir"
    camera: Option<CameraConfig>,
    dir: Option<PathBuf>,
    #[serde(default, rename = "loop")]
    looping: bool,
    #[serde(default = "default_fps")]
    fps: f32,
}

fn default_fps() -> f32 {
    30.0
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct DetectorsCfg {
    replay_log: Option<PathBuf>,
    objects: bool,
    faces: bool,
}

impl Default for DetectorsCfg {
    fn default() -> Self {
        Self { replay_log: None, objects: true, faces: true }
    }
}

#[derive(Debug, Default, serde::Deserialize)]
struct CatalogCfg {
    path: Option<PathBuf>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct DisplayCfg {
    width: u32,
    height: u32,
    // on-screen size, defaults to the buffer size
    client_width: Option<f32>,
    client_height: Option<f32>,
    left: f32,
    top: f32,
}

impl Default for DisplayCfg {
    fn default() -> Self {
        Self { width: 640, height: 480, client_width: None, client_height: None, left: 0.0, top: 0.0 }
    }
}

impl DisplayCfg {
    fn geometry(&self) -> CanvasGeometry {
        CanvasGeometry {
            left: self.left,
            top: self.top,
            display_width: self.client_width.unwrap_or(self.width as f32),
            display_height: self.client_height.unwrap_or(self.height as f32),
            buffer: Resolution::new(self.width, self.height),
        }
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct InteractionCfg {
    hit_shape: HitShape,
    click_timeout_ms: u64,
}

impl Default for InteractionCfg {
    fn default() -> Self {
        Self { hit_shape: HitShape::Rect, click_timeout_ms: 1000 }
    }
}

#[derive(Debug, Default, serde::Deserialize)]
struct OutputCfg {
    snapshot_dir: Option<PathBuf>,
    snapshot_every: Option<u64>,
    max_frames: Option<u64>,
    seed: Option<u64>,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    parse_config(&s)
}

fn parse_config(s: &str) -> Result<Config> {
    toml::from_str(s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Run => run(&cfg).await?,
        Command::Doctor => doctor(&cfg).await?,
        Command::Catalog => catalog_cmd(&cfg)?,
    }
    Ok(())
}

/// Settings both `run` and `doctor` refuse to start with. Returns the loop tick.
fn check_config(cfg: &Config) -> Result<Duration> {
    let interval = LoopConfig::interval_for_fps(cfg.source.fps)
        .with_context(|| format!("source.fps must be a positive finite rate, got {}", cfg.source.fps))?;
    anyhow::ensure!(
        cfg.display.width > 0 && cfg.display.height > 0,
        "display size must be non-zero"
    );
    anyhow::ensure!(
        cfg.tracking.policy.threshold > 0.0,
        "tracking.threshold must be positive"
    );
    Ok(interval)
}

async fn run(cfg: &Config) -> Result<()> {
    info!("run: starting");
    let frame_interval = check_config(cfg)?;

    let catalog = Arc::new(load_catalog(cfg)?);
    let mut render_cfg = cfg.render.clone();
    render_cfg.hit_shape = cfg.interaction.hit_shape;
    let renderer = OverlayRenderer::new(render_cfg, catalog.clone())?;
    let (objects, faces) = init_detectors(&cfg.detectors);
    let source = open_source(&cfg.source).await?;

    let mut sink = JsonLinesSink::new(std::io::stdout());
    if let Some(dir) = &cfg.output.snapshot_dir {
        sink = sink.with_snapshots(dir.clone())?;
    }

    let loop_cfg = LoopConfig {
        canvas: cfg.display.geometry(),
        tracking: cfg.tracking.clone(),
        click_timeout: Duration::from_millis(cfg.interaction.click_timeout_ms),
        frame_interval,
        max_frames: cfg.output.max_frames,
        snapshot_every: cfg.output.snapshot_every.or(cfg.output.snapshot_dir.as_ref().map(|_| 1)),
        seed: cfg.output.seed,
    };

    let (tx, rx) = mpsc::channel(32);
    spawn_pointer_reader(tx);

    let detection = DetectionLoop::new(loop_cfg, source, objects, faces, renderer, catalog, sink)
        .with_pointer_input(rx);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("ctrl-c handler unavailable: {:#}", e);
            std::future::pending::<()>().await;
        }
    };
    let (session, _sink) = detection.run(shutdown).await?;

    info!(frames = session.frames, faces = session.tracker.issued(), "run: done");
    Ok(())
}

async fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    check_config(cfg)?;

    let catalog = load_catalog(cfg)?;
    for gender in ["male", "female"] {
        if catalog.get(gender).is_none() {
            warn!("doctor: no `{}` category; those faces will not be drawn", gender);
        }
    }
    if let Some(font) = &cfg.render.font_path {
        anyhow::ensure!(font.is_file(), "render.font_path {} not found", font.display());
    }

    if let Err(e) = load_replay(&cfg.detectors) {
        warn!("doctor: {:#}", e);
    }

    open_source(&cfg.source).await?;

    info!("doctor: OK");
    Ok(())
}

fn catalog_cmd(cfg: &Config) -> Result<()> {
    let catalog = load_catalog(cfg)?;
    for c in catalog.categories() {
        let [r, g, b] = c.color.0;
        println!(
            "{} color=#{:02x}{:02x}{:02x} effect={:?} descriptions={}",
            c.identifier,
            r,
            g,
            b,
            c.effect,
            c.descriptions.len()
        );
    }
    Ok(())
}

fn load_catalog(cfg: &Config) -> Result<Catalog> {
    let Some(path) = &cfg.catalog.path else {
        warn!("no catalog configured; only fallback-colored detections will be drawn");
        return Ok(Catalog::default());
    };
    let catalog = Catalog::load(path).with_context(|| format!("load catalog {}", path.display()))?;
    info!(path = %path.display(), categories = catalog.len(), "catalog: loaded");
    Ok(catalog)
}

fn load_replay(cfg: &DetectorsCfg) -> Result<Arc<ReplayLog>, VisionError> {
    let path = cfg
        .replay_log
        .as_ref()
        .ok_or_else(|| VisionError::DetectorUnavailable("no detectors.replay_log configured".into()))?;
    Ok(Arc::new(ReplayLog::load(path)?))
}

/// Detectors that fail to initialise are disabled for the whole session.
fn init_detectors(cfg: &DetectorsCfg) -> (Option<ReplayObjectDetector>, Option<ReplayFaceDetector>) {
    if !cfg.objects && !cfg.faces {
        return (None, None);
    }
    match load_replay(cfg) {
        Ok(log) => (
            cfg.objects.then(|| ReplayObjectDetector::new(log.clone())),
            cfg.faces.then(|| ReplayFaceDetector::new(log)),
        ),
        Err(e) => {
            warn!("detectors disabled: {:#}", e);
            (None, None)
        }
    }
}

enum Source {
    Camera(CameraSource),
    Dir(ImageDirSource),
}

impl FrameSource for Source {
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self {
            Source::Camera(s) => s.next_frame().await,
            Source::Dir(s) => s.next_frame().await,
        }
    }
}

async fn open_source(cfg: &SourceCfg) -> Result<Source> {
    match cfg.mode.as_str() {
        "camera" => {
            let cam = cfg.camera.clone().context("source.camera missing (mode=camera)")?;
            Ok(Source::Camera(CameraSource::open(cam).await?))
        }
        "dir" => {
            let dir = cfg.dir.as_deref().context("source.dir missing (mode=dir)")?;
            Ok(Source::Dir(ImageDirSource::open(dir, cfg.looping)?))
        }
        other => anyhow::bail!("unknown source.mode: {}", other),
    }
}

/// `click <x> <y>` in client coordinates.
fn parse_click(line: &str) -> Option<PointerEvent> {
    let mut parts = line.split_whitespace();
    if parts.next()? != "click" {
        return None;
    }
    let client_x = parts.next()?.parse().ok()?;
    let client_y = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(PointerEvent { client_x, client_y })
}

/// Stdin is read on a plain thread so a pending read never holds up runtime shutdown.
fn spawn_pointer_reader(tx: mpsc::Sender<PointerEvent>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("stdin read failed: {:#}", e);
                    return;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_click(&line) {
                Some(ev) => {
                    if tx.blocking_send(ev).is_err() {
                        return;
                    }
                }
                None => warn!("ignoring input line: {:?}", line),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use lens_vision::catalog::Effect;
    use lens_vision::tracker::MatchStrategy;

    #[test]
    fn minimal_config_takes_defaults() {
        let cfg = parse_config("[source]\nmode = \"dir\"\ndir = \"frames\"\n").unwrap();
        assert_eq!(cfg.source.fps, 30.0);
        assert!(!cfg.source.looping);
        assert!(cfg.detectors.objects && cfg.detectors.faces);
        assert_eq!(cfg.interaction.click_timeout_ms, 1000);
        assert_eq!(cfg.interaction.hit_shape, HitShape::Rect);
        assert_eq!(cfg.render.face_box_scale, 3.0);
        assert_eq!(cfg.tracking.policy.threshold, 0.6);
        assert!(cfg.tracking.policy.require_same_gender);
        let g = cfg.display.geometry();
        assert_eq!((g.display_width, g.buffer.width), (640.0, 640));
    }

    #[test]
    fn full_config_parses() {
        let cfg = parse_config(
            r#"
[source]
mode = "camera"
fps = 10
[source.camera]
mode = "v4l2-mjpeg"
width = 1280
height = 720

[detectors]
replay_log = "detections.jsonl"
faces = false

[display]
width = 640
height = 360
client_width = 1280
client_height = 720
left = 8

[tracking]
threshold = 0.5
require_same_gender = false
strategy = "nearest"

[interaction]
hit_shape = "circle"
click_timeout_ms = 1500

[render]
show_scores = true

[output]
max_frames = 100
"#,
        )
        .unwrap();
        assert_eq!(cfg.source.camera.as_ref().unwrap().device, "/dev/video0");
        assert!(!cfg.detectors.faces);
        assert_eq!(cfg.tracking.policy.threshold, 0.5);
        assert_eq!(cfg.tracking.strategy, MatchStrategy::Nearest);
        assert_eq!(cfg.interaction.hit_shape, HitShape::Circle);
        assert!(cfg.render.show_scores);
        assert_eq!(cfg.output.max_frames, Some(100));
        let p = cfg.display.geometry().to_buffer(8.0 + 200.0, 100.0).unwrap();
        assert_eq!((p.x, p.y), (100.0, 50.0));
    }

    #[test]
    fn shipped_demo_config_parses() {
        let cfg = parse_config(include_str!("../../../demos/lens.toml")).unwrap();
        assert_eq!(cfg.source.mode, "dir");
        assert_eq!(cfg.output.snapshot_every, Some(10));
        let catalog = Catalog::from_json(include_str!("../../../demos/catalog.json")).unwrap();
        assert!(catalog.get("male").is_some() && catalog.get("female").is_some());
        assert_eq!(catalog.get("female").unwrap().effect, Effect::Pixelate);
        let log = ReplayLog::parse(include_str!("../../../demos/detections.jsonl")).unwrap();
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn runaway_fps_and_empty_canvas_are_rejected() {
        let base = "[source]\nmode = \"dir\"\ndir = \"frames\"\n";
        let interval = check_config(&parse_config(&format!("{base}fps = 1e10\n")).unwrap()).unwrap();
        assert_eq!(interval, Duration::from_millis(1));
        assert_eq!(
            check_config(&parse_config(&format!("{base}fps = 4\n")).unwrap()).unwrap(),
            Duration::from_millis(250)
        );
        for bad in ["fps = inf\n", "fps = nan\n", "fps = 0\n", "fps = -2\n"] {
            assert!(check_config(&parse_config(&format!("{base}{bad}")).unwrap()).is_err(), "{bad}");
        }
        let zero = parse_config(&format!("{base}[display]\nwidth = 0\n")).unwrap();
        assert!(check_config(&zero).is_err());
    }

    #[test]
    fn render_section_cannot_pick_the_hit_shape() {
        let cfg = parse_config(
            "[source]\nmode = \"dir\"\n[render]\nhit_shape = \"circle\"\n[interaction]\nhit_shape = \"rect\"\n",
        )
        .unwrap();
        assert_eq!(cfg.render.hit_shape, HitShape::Rect);
        assert_eq!(cfg.interaction.hit_shape, HitShape::Rect);
    }

    #[test]
    fn source_section_is_required() {
        assert!(parse_config("[catalog]\npath = \"c.json\"\n").is_err());
    }

    #[test]
    fn click_lines() {
        assert_eq!(
            parse_click("click 120 80.5"),
            Some(PointerEvent { client_x: 120.0, client_y: 80.5 })
        );
        assert_eq!(parse_click("  click   1 2  "), Some(PointerEvent { client_x: 1.0, client_y: 2.0 }));
        assert_eq!(parse_click("click 1"), None);
        assert_eq!(parse_click("click 1 2 3"), None);
        assert_eq!(parse_click("tap 1 2"), None);
        assert_eq!(parse_click("click x 2"), None);
    }

    #[test]
    fn missing_replay_log_disables_detectors() {
        let (o, f) = init_detectors(&DetectorsCfg::default());
        assert!(o.is_none() && f.is_none());
        assert!(matches!(
            load_replay(&DetectorsCfg::default()),
            Err(VisionError::DetectorUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn unknown_source_mode_is_rejected() {
        let cfg = parse_config("[source]\nmode = \"satellite\"\n").unwrap();
        let err = open_source(&cfg.source).await.err().unwrap();
        assert!(err.to_string().contains("satellite"));
    }
}
