mod state;
mod tui;

use atlas_maps::MapOptions;
use clap::Parser;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyEvent, KeyEventKind, MouseEvent, MouseEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    sync::Mutex,
    time::{Duration, Instant},
};
use tracing_subscriber::EnvFilter;

use state::AppState;

/// Terminal choropleth map viewer.
#[derive(Parser, Debug)]
#[command(name = "atlas")]
struct Args {
    /// Directory holding `<scope>.geojson` files and region data.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Scope to open; overrides the config file.
    #[arg(long)]
    scope: Option<String>,

    /// Projection family for the world scope; overrides the config file.
    #[arg(long)]
    projection: Option<String>,

    /// JSON file with map options.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log destination; the terminal belongs to the UI.
    #[arg(long, default_value = "atlas.log")]
    log_file: PathBuf,
}

const FRAME: Duration = Duration::from_millis(33);

fn init_logging(path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn load_options(args: &Args) -> Result<MapOptions, Box<dyn std::error::Error>> {
    let mut options = match &args.config {
        Some(path) => MapOptions::from_json(serde_json::from_str(&fs::read_to_string(path)?)?)?,
        None => MapOptions::default(),
    };
    if let Some(scope) = &args.scope {
        options.scope = scope.clone();
    }
    if let Some(projection) = &args.projection {
        options.projection = projection.clone();
    }
    Ok(options)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&args.log_file)?;
    let mut state = AppState::new(&args.data_dir, load_options(&args)?)?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run(&mut terminal, &mut state);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;
    result
}

fn run(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    state: &mut AppState,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut last = Instant::now();
    loop {
        terminal.draw(|f| tui::draw(f, state))?;

        if event::poll(FRAME)? {
            match event::read()? {
                Event::Key(KeyEvent { code, kind: KeyEventKind::Press, .. }) => {
                    if state.handle_input(code) {
                        return Ok(());
                    }
                }
                Event::Mouse(MouseEvent {
                    kind: MouseEventKind::Moved | MouseEventKind::Drag(_),
                    column,
                    row,
                    ..
                }) => state.handle_mouse(column, row),
                _ => {}
            }
        }

        let now = Instant::now();
        state.tick(now.duration_since(last).as_millis() as u64);
        last = now;
    }
}
