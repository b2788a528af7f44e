use std::env;
use std::fs;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{self, Event as CEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::{execute, ExecutableCommand};
use indexmap::IndexMap;
use rand::seq::IndexedRandom;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout};
use ratatui::prelude::{Color, Rect, Style};
use ratatui::text::Span;
use ratatui::widgets::block::Padding;
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table};
use ratatui::Terminal;
use serde_json::Value;

const PATH_SEPARATOR: &str = " → ";

/// Flattened key → value view of the watched file at one point in time.
/// Insertion order follows a depth-first traversal of the source document.
type Snapshot = IndexMap<String, String>;

#[derive(Debug, Parser)]
#[command(
    name = "jsonwatch",
    version,
    about = "Paginated live diff view for a JSON file"
)]
struct Cli {
    /// JSON file to watch.
    input: Option<PathBuf>,

    /// Baseline snapshot path, reused across runs.
    baseline: Option<PathBuf>,
}

#[derive(Clone, Debug)]
struct Config {
    input_path: PathBuf,
    baseline_path: PathBuf,
    page_size: usize,
    poll_interval: Duration,
    marker_interval: Duration,
    tick: Duration,
    marker_glyph: &'static str,
}

impl Config {
    fn from_cli(cli: Cli) -> Self {
        Self {
            input_path: cli.input.unwrap_or_else(|| PathBuf::from("./watch.json")),
            baseline_path: cli
                .baseline
                .unwrap_or_else(|| env::temp_dir().join("jsonwatch-baseline.json")),
            page_size: 20,
            poll_interval: Duration::from_secs(1),
            marker_interval: Duration::from_secs(5),
            tick: Duration::from_millis(100),
            marker_glyph: "●",
        }
    }
}

fn flatten(value: &Value) -> Snapshot {
    let mut out = Snapshot::new();
    flatten_into(value, &mut Vec::new(), &mut out);
    out
}

fn flatten_into(value: &Value, path: &mut Vec<String>, out: &mut Snapshot) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                path.push(key.clone());
                flatten_into(child, path, out);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                path.push(index.to_string());
                flatten_into(child, path, out);
                path.pop();
            }
        }
        // String leaves keep their raw content rather than the quoted
        // JSON rendering.
        Value::String(text) => {
            out.insert(path.join(PATH_SEPARATOR), text.clone());
        }
        scalar => {
            out.insert(path.join(PATH_SEPARATOR), scalar.to_string());
        }
    }
}

fn load_flat(path: &Path) -> Result<Snapshot> {
    let data =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(flatten(&value))
}

/// Reuse a previously persisted baseline if one exists, otherwise persist
/// the first-seen snapshot so later runs diff against the same reference.
fn load_or_create_baseline(baseline_path: &Path, current: &Snapshot) -> Result<Snapshot> {
    if baseline_path.exists() {
        return load_flat(baseline_path);
    }
    let serialized = serde_json::to_string_pretty(current)?;
    fs::write(baseline_path, serialized)
        .with_context(|| format!("Failed to write baseline {}", baseline_path.display()))?;
    Ok(current.clone())
}

/// Keys of `current` whose value is missing from or differs in `baseline`,
/// in snapshot order. Keys only present in `baseline` are never reported.
fn changed_keys(current: &Snapshot, baseline: &Snapshot) -> Vec<String> {
    current
        .iter()
        .filter(|(key, value)| baseline.get(*key) != Some(*value))
        .map(|(key, _)| key.clone())
        .collect()
}

fn pick_marker(changed: &[String]) -> Option<String> {
    changed.choose(&mut rand::rng()).cloned()
}

#[derive(Clone, Copy, Debug)]
struct Pager {
    page: usize,
    page_size: usize,
}

impl Pager {
    fn new(page_size: usize) -> Self {
        Self {
            page: 0,
            page_size: page_size.max(1),
        }
    }

    fn total_pages(&self, row_count: usize) -> usize {
        row_count.div_ceil(self.page_size).max(1)
    }

    fn next(&mut self, row_count: usize) {
        self.page = (self.page + 1) % self.total_pages(row_count);
    }

    fn prev(&mut self, row_count: usize) {
        let total = self.total_pages(row_count);
        self.page = (self.page % total + total - 1) % total;
    }

    /// Half-open row range for the current page, clamped so a stale page
    /// index after a shrink can never address out-of-bounds rows.
    fn bounds(&self, row_count: usize) -> (usize, usize) {
        let start = self.page.saturating_mul(self.page_size).min(row_count);
        let end = start.saturating_add(self.page_size).min(row_count);
        (start, end)
    }

    fn page_slice<'a, T>(&self, rows: &'a [T]) -> &'a [T] {
        let (start, end) = self.bounds(rows.len());
        &rows[start..end]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum KeyInput {
    Char(char),
    Left,
    Right,
    Interrupt,
}

/// Non-blocking keystroke source. When stdin is not an interactive
/// terminal every poll sleeps out its timeout and reports no key, so the
/// viewer stays usable with redirected input.
struct InputReader {
    interactive: bool,
}

impl InputReader {
    fn new() -> Self {
        Self {
            interactive: io::stdin().is_terminal(),
        }
    }

    fn poll(&self, timeout: Duration) -> Result<Option<KeyInput>> {
        if !self.interactive {
            thread::sleep(timeout);
            return Ok(None);
        }
        if !event::poll(timeout)? {
            return Ok(None);
        }
        match event::read()? {
            CEvent::Key(key) if key.kind == KeyEventKind::Press => Ok(Self::decode(key)),
            _ => Ok(None),
        }
    }

    fn decode(key: KeyEvent) -> Option<KeyInput> {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            return match key.code {
                KeyCode::Char('c') => Some(KeyInput::Interrupt),
                _ => None,
            };
        }
        match key.code {
            KeyCode::Left => Some(KeyInput::Left),
            KeyCode::Right => Some(KeyInput::Right),
            KeyCode::Char(c) => Some(KeyInput::Char(c)),
            // A lone escape press decodes as the escape character itself.
            KeyCode::Esc => Some(KeyInput::Char('\u{1b}')),
            _ => None,
        }
    }
}

struct App {
    cfg: Config,
    baseline: Snapshot,
    current: Snapshot,
    pager: Pager,
    marker_key: Option<String>,
    read_error: Option<String>,
    last_poll: Instant,
    last_hop: Instant,
}

impl App {
    fn new(cfg: Config, baseline: Snapshot, current: Snapshot) -> Self {
        let pager = Pager::new(cfg.page_size);
        Self {
            cfg,
            baseline,
            current,
            pager,
            marker_key: None,
            read_error: None,
            last_poll: Instant::now(),
            last_hop: Instant::now(),
        }
    }

    /// Returns true when the loop should terminate.
    fn handle_key(&mut self, key: KeyInput) -> bool {
        match key {
            KeyInput::Char('q') | KeyInput::Interrupt => return true,
            KeyInput::Char('n') | KeyInput::Char('a') | KeyInput::Right => {
                self.pager.next(self.current.len());
            }
            KeyInput::Char('p') | KeyInput::Char('d') | KeyInput::Left => {
                self.pager.prev(self.current.len());
            }
            _ => {}
        }
        false
    }

    fn maybe_refresh(&mut self) {
        if self.last_poll.elapsed() >= self.cfg.poll_interval {
            self.refresh();
            self.last_poll = Instant::now();
        }
    }

    fn refresh(&mut self) {
        match load_flat(&self.cfg.input_path) {
            Ok(snapshot) => {
                self.current = snapshot;
                self.read_error = None;
            }
            // Keep the previous snapshot; the next tick retries.
            Err(err) => self.read_error = Some(format!("{err:#}")),
        }
    }

    fn maybe_move_marker(&mut self) {
        if self.last_hop.elapsed() >= self.cfg.marker_interval {
            let changed = changed_keys(&self.current, &self.baseline);
            self.marker_key = pick_marker(&changed);
            self.last_hop = Instant::now();
        }
    }

    fn draw(&self, frame: &mut ratatui::Frame<'_>) {
        let chunks =
            Layout::vertical([Constraint::Min(1), Constraint::Length(1)]).split(frame.size());
        self.draw_table(frame, chunks[0]);
        self.draw_status(frame, chunks[1]);
    }

    fn table_block(&self) -> Block<'_> {
        let total = self.pager.total_pages(self.current.len());
        let title = format!(
            " jsonwatch — page {}/{} [n/p ←/→ page, q quit] ",
            self.pager.page + 1,
            total
        );
        Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .padding(Padding::new(1, 1, 0, 0))
    }

    fn draw_table(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        if let Some(err) = &self.read_error {
            let message = Paragraph::new(format!("read failed: {err}"))
                .style(Style::default().fg(Color::Red))
                .block(self.table_block());
            frame.render_widget(message, area);
            return;
        }

        let (start, end) = self.pager.bounds(self.current.len());
        let rows: Vec<Row> = self
            .current
            .iter()
            .skip(start)
            .take(end - start)
            .map(|(key, value)| {
                let changed = self.baseline.get(key) != Some(value);
                let display = if changed && self.marker_key.as_deref() == Some(key.as_str()) {
                    format!("{value} {}", self.cfg.marker_glyph)
                } else {
                    value.clone()
                };
                if changed {
                    let style = Style::default().fg(Color::Yellow);
                    Row::new(vec![
                        Cell::from(Span::styled(key.clone(), style)),
                        Cell::from(Span::styled(display, style)),
                    ])
                } else {
                    Row::new(vec![
                        Cell::from(Span::styled(
                            key.clone(),
                            Style::default().fg(Color::Cyan),
                        )),
                        Cell::from(display),
                    ])
                }
            })
            .collect();

        let table = Table::new(
            rows,
            [Constraint::Percentage(35), Constraint::Percentage(65)],
        )
        .header(Row::new(vec![
            Cell::from(Span::styled("Key", Style::default().fg(Color::Gray))),
            Cell::from(Span::styled("Value", Style::default().fg(Color::Gray))),
        ]))
        .block(self.table_block())
        .column_spacing(1);

        frame.render_widget(table, area);
    }

    fn draw_status(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let changed = changed_keys(&self.current, &self.baseline).len();
        let status = format!(
            " {} | {} rows | {} changed",
            self.cfg.input_path.display(),
            self.current.len(),
            changed
        );
        frame.render_widget(
            Paragraph::new(status).style(Style::default().fg(Color::Gray)),
            area,
        );
    }
}

struct TerminalGuard {
    raw: bool,
}

impl TerminalGuard {
    fn enter() -> Result<Self> {
        let raw = io::stdin().is_terminal();
        if raw {
            enable_raw_mode()?;
        }
        io::stdout().execute(EnterAlternateScreen)?;
        Ok(Self { raw })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if self.raw {
            let _ = disable_raw_mode();
        }
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
    }
}

fn run(mut app: App) -> Result<()> {
    let reader = InputReader::new();
    let _guard = TerminalGuard::enter()?;

    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal = Terminal::new(backend)?;

    loop {
        // Input before refresh before render: a key press is reflected in
        // navigation before this iteration's data is drawn.
        if let Some(key) = reader.poll(app.cfg.tick)? {
            if app.handle_key(key) {
                break;
            }
        }

        app.maybe_refresh();
        app.maybe_move_marker();

        terminal.draw(|frame| app.draw(frame))?;
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::from_cli(cli);

    let current = load_flat(&cfg.input_path)?;
    let baseline = load_or_create_baseline(&cfg.baseline_path, &current)?;

    run(App::new(cfg, baseline, current))
}
