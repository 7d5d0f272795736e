mod host;
mod screen;
mod volume;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crossterm::cursor;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyModifiers,
};
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use koma_core::bridge::serve_host;
use koma_core::config::EngineConfig;
use koma_core::geometry::Size;
use koma_core::protocol::InboundCommand;
use koma_core::spread::Spread;
use koma_core::store::{FileIndexStore, IndexStore};
use koma_engine::{Engine, EngineDriver};
use koma_input::{CellMetrics, EventMapper, InputEvent};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::host::VolumeHost;
use crate::screen::Screen;
use crate::volume::{load_dictionary, Volume};

#[derive(Debug, Parser)]
#[command(
    name = "koma",
    version,
    about = "Paginated manga viewer with a clickable OCR text overlay"
)]
struct Args {
    /// Engine config file (defaults to config.toml in the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the vocabulary index
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Open a volume in the terminal
    Run(ViewArgs),
    /// Print the rendered page set at one position of a volume
    Render {
        #[command(flatten)]
        view: ViewArgs,
        #[arg(long, value_enum, default_value_t = Format::Html)]
        format: Format,
        /// Viewport width in pixels
        #[arg(long, default_value_t = 1280.0)]
        width: f32,
        /// Viewport height in pixels
        #[arg(long, default_value_t = 900.0)]
        height: f32,
    },
    /// Record appearances of tracked words found in a volume
    Sync {
        /// Volume JSON file
        volume: PathBuf,
    },
    /// List tracked words, or the recorded appearances of one word
    Appearances { lemma: Option<String> },
}

#[derive(Debug, clap::Args)]
struct ViewArgs {
    /// Volume JSON file
    volume: PathBuf,

    /// Dictionary JSON file used for lookups
    #[arg(short = 'd', long)]
    dictionary: Option<PathBuf>,

    /// Page to open on (0-based)
    #[arg(short = 'p', long = "page", default_value_t = 0)]
    page: usize,

    /// Page spread: single or double
    #[arg(long, default_value = "single")]
    spread: Spread,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Html,
    Json,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, DisableMouseCapture, cursor::Show);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "koma", "koma")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let interactive = matches!(args.command, Command::Run(_));
    let _log_guard = init_logging(&project_dirs, !interactive)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join("config.toml"));
    let config = EngineConfig::load_or_default(&config_path)?;
    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(|| project_dirs.data_local_dir().join("index"));
    let store: Arc<dyn IndexStore> = Arc::new(FileIndexStore::new(data_dir)?);

    match args.command {
        Command::Run(view) => run(config, store, view).await,
        Command::Render {
            view,
            format,
            width,
            height,
        } => render(config, store, view, format, Size::new(width, height)),
        Command::Sync { volume } => sync(store.as_ref(), &volume),
        Command::Appearances { lemma } => appearances(store.as_ref(), lemma.as_deref()),
    }
}

fn open_host(store: Arc<dyn IndexStore>, view: &ViewArgs) -> Result<Arc<VolumeHost>> {
    let volume = Volume::load(&view.volume)?;
    let dictionary = load_dictionary(view.dictionary.as_deref())?;
    let host = VolumeHost::new(volume, dictionary, store, view.spread, view.page)?;
    Ok(Arc::new(host))
}

async fn run(config: EngineConfig, store: Arc<dyn IndexStore>, view: ViewArgs) -> Result<()> {
    let host = open_host(store, &view)?;
    let cells = CellMetrics::default();
    let (columns, rows) = terminal::size()?;
    let viewport = Size::new(
        f32::from(columns) * cells.width,
        f32::from(rows.saturating_sub(1)) * cells.height,
    );

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    inbound_tx.send(InboundCommand::UpdateView(host.current_view()))?;
    let (endpoint, host_task) = serve_host(host.clone(), inbound_tx);
    let engine = Engine::connect(config, viewport, Some(endpoint))?;
    let (input_tx, input_rx) = mpsc::unbounded_channel();

    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide, EnableMouseCapture)?;

    let reader = thread::spawn(move || read_terminal(input_tx, cells));
    let mut screen = Screen::new(io::stdout(), cells);
    let result = EngineDriver::new(engine, inbound_rx, input_rx)
        .run(|engine| screen.draw(engine))
        .await;
    host_task.abort();

    crossterm::execute!(stdout, Clear(ClearType::All), cursor::MoveTo(0, 0))?;
    let engine = result?;
    reader
        .join()
        .map_err(|_| anyhow!("terminal reader panicked"))??;
    info!(
        page = host.current_page(),
        tracked = host.tracked_count(),
        scale = engine.layout().scale,
        "viewer closed"
    );
    Ok(())
}

/// Forwards terminal input until the user quits or the engine stops
/// listening.
fn read_terminal(input: mpsc::UnboundedSender<InputEvent>, cells: CellMetrics) -> Result<()> {
    let mut mapper = EventMapper::new(cells);
    loop {
        if !event::poll(Duration::from_millis(100))? {
            if input.is_closed() {
                return Ok(());
            }
            continue;
        }
        let ev = event::read()?;
        if is_quit(&ev) {
            return Ok(());
        }
        if let Some(mapped) = mapper.map_event(ev) {
            if input.send(mapped).is_err() {
                return Ok(());
            }
        }
    }
}

fn is_quit(ev: &Event) -> bool {
    match ev {
        Event::Key(KeyEvent {
            code: KeyCode::Char('q'),
            modifiers,
            ..
        }) => modifiers.is_empty(),
        Event::Key(KeyEvent {
            code: KeyCode::Char('c'),
            modifiers,
            ..
        }) => modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

fn render(
    config: EngineConfig,
    store: Arc<dyn IndexStore>,
    view: ViewArgs,
    format: Format,
    viewport: Size,
) -> Result<()> {
    let host = open_host(store, &view)?;
    let (inbound_tx, _inbound_rx) = mpsc::unbounded_channel();
    let (endpoint, host_task) = serve_host(host.clone(), inbound_tx);
    let mut engine = Engine::connect(config, viewport, Some(endpoint))?;
    engine.apply(InboundCommand::UpdateView(host.current_view()), Instant::now())?;
    host_task.abort();

    let output = match format {
        Format::Html => engine.render_html(),
        Format::Json => serde_json::to_string_pretty(engine.tree())?,
    };
    println!("{}", output);
    Ok(())
}

fn sync(store: &dyn IndexStore, volume: &Path) -> Result<()> {
    let volume = Volume::load(volume)?;
    let mut index = store.load()?.unwrap_or_default();
    if index.is_empty() {
        warn!("no tracked words; nothing to sync");
    }
    let report = index.sync_pages(volume.pages());
    store.save(&index)?;
    println!(
        "{} new appearances for {} words",
        report.new_appearances, report.lemmas_with_hits
    );
    Ok(())
}

fn appearances(store: &dyn IndexStore, lemma: Option<&str>) -> Result<()> {
    let index = store.load()?.unwrap_or_default();
    let Some(lemma) = lemma else {
        for word in index.list_tracked() {
            println!(
                "{}\t{}\t{}\t{}",
                word.lemma,
                word.reading,
                word.part_of_speech,
                index.appearances_for(&word.lemma).len()
            );
        }
        return Ok(());
    };
    if !index.is_tracked(lemma) {
        bail!("{} is not tracked", lemma);
    }
    for appearance in index.appearances_for(lemma) {
        println!(
            "p{}\tblock {}\t{}\t{}",
            appearance.page_index + 1,
            appearance.block_id,
            appearance.surface_text,
            appearance.sentence
        );
    }
    Ok(())
}

fn init_logging(project_dirs: &ProjectDirs, console: bool) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "koma.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // The terminal viewer owns the screen, so it logs to the file only.
    let console_layer = console.then(|| tracing_subscriber::fmt::layer().with_writer(io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
