//! Ratatui-based terminal UI.
//!
//! The viewer cycles through datasets (synthetic demo data or the groups of a
//! CSV), refits with the selected curve family and optionally overlays a
//! bootstrap band.

use std::io;
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph},
};

use crate::app::pipeline::{FitRequest, FitRun, run_fit};
use crate::cli::TuiArgs;
use crate::domain::{BandMethod, CurveMethod, GridSpacing, LowessConfig, ModelKind, Observations};
use crate::error::AppError;
use crate::io::ingest::{XySpec, load_xy};
use crate::models::ec50;
use crate::plot::XScale;

mod plotters_chart;

use plotters_chart::CurvePlottersChart;

/// Bootstrap replicates behind the viewer's band.
const VIEW_REPLICATES: usize = 200;

/// Curve families the `m` key cycles through.
const METHODS: [ViewMethod; 4] = [ViewMethod::FourPl, ViewMethod::Hill, ViewMethod::Linear, ViewMethod::Lowess];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ViewMethod {
    FourPl,
    Hill,
    Linear,
    Lowess,
}

impl ViewMethod {
    fn curve_method(self) -> CurveMethod {
        match self {
            ViewMethod::FourPl => CurveMethod::Parametric(ModelKind::FourPl),
            ViewMethod::Hill => CurveMethod::Parametric(ModelKind::Hill),
            ViewMethod::Linear => CurveMethod::Parametric(ModelKind::Linear),
            ViewMethod::Lowess => CurveMethod::Lowess(LowessConfig { frac: 0.3, iterations: 3 }),
        }
    }

    fn next(self) -> Self {
        let i = METHODS.iter().position(|m| *m == self).unwrap_or(0);
        METHODS[(i + 1) % METHODS.len()]
    }
}

/// Start the TUI.
pub fn run(args: TuiArgs) -> Result<(), AppError> {
    let (datasets, status) = load_datasets(&args)?;
    if datasets.is_empty() {
        return Err(AppError::new(3, "No usable groups to view."));
    }

    let _guard = TerminalGuard::new()?;

    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal = Terminal::new(backend)
        .map_err(|e| AppError::new(4, format!("Failed to initialize terminal: {e}")))?;

    let mut app = App::new(datasets, args.seed, status);
    app.event_loop(&mut terminal)
}

fn load_datasets(args: &TuiArgs) -> Result<(Vec<(String, Observations)>, String), AppError> {
    let (Some(csv), Some(x_col), Some(y_col)) = (&args.csv, &args.x_col, &args.y_col) else {
        let demos = [
            crate::data::four_pl_dilution_series(args.seed)?,
            crate::data::noisy_lowess_series(args.seed)?,
        ];
        let datasets = demos.into_iter().map(|d| (d.name, d.observations)).collect();
        return Ok((datasets, "Synthetic demo data.".to_string()));
    };

    let spec = XySpec {
        x_col: x_col.clone(),
        y_col: y_col.clone(),
        group_col: args.group_col.clone(),
    };
    let ingested = load_xy(csv, &spec)?;
    let status = format!(
        "{}: {} of {} rows used, {} group(s) skipped.",
        csv.display(),
        ingested.rows_used,
        ingested.rows_read,
        ingested.skipped_groups.len()
    );
    let datasets = ingested
        .groups
        .into_iter()
        .map(|g| (g.name, g.observations))
        .collect();
    Ok((datasets, status))
}

/// Ensures the terminal is restored (raw mode, alternate screen) on exit.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Result<Self, AppError> {
        enable_raw_mode().map_err(|e| AppError::new(4, format!("Failed to enable raw mode: {e}")))?;
        if let Err(e) = execute!(io::stdout(), EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(AppError::new(4, format!("Failed to enter alternate screen: {e}")));
        }
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
    }
}

struct App {
    datasets: Vec<(String, Observations)>,
    selected: usize,
    method: ViewMethod,
    show_band: bool,
    seed: u64,
    status: String,
    run: Option<FitRun>,
}

impl App {
    fn new(datasets: Vec<(String, Observations)>, seed: u64, status: String) -> Self {
        let mut app = Self {
            datasets,
            selected: 0,
            method: ViewMethod::FourPl,
            show_band: false,
            seed,
            status: String::new(),
            run: None,
        };
        app.refit();
        if app.run.is_some() {
            app.status = format!("{status} {}", app.status);
        }
        app
    }

    fn event_loop<B: ratatui::backend::Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<(), AppError> {
        let mut needs_redraw = true;
        loop {
            if needs_redraw {
                terminal
                    .draw(|f| self.draw(f))
                    .map_err(|e| AppError::new(4, format!("Terminal draw error: {e}")))?;
                needs_redraw = false;
            }

            if !event::poll(Duration::from_millis(100)).map_err(|e| AppError::new(4, format!("Event poll error: {e}")))? {
                continue;
            }

            match event::read().map_err(|e| AppError::new(4, format!("Event read error: {e}")))? {
                Event::Key(key) => {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    if self.handle_key(key.code) {
                        break;
                    }
                    needs_redraw = true;
                }
                Event::Resize(_, _) => {
                    needs_redraw = true;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Returns `true` when the viewer should exit.
    fn handle_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Down | KeyCode::Right | KeyCode::Tab => {
                self.selected = (self.selected + 1) % self.datasets.len();
                self.refit();
            }
            KeyCode::Up | KeyCode::Left | KeyCode::BackTab => {
                self.selected = (self.selected + self.datasets.len() - 1) % self.datasets.len();
                self.refit();
            }
            KeyCode::Char('m') => {
                self.method = self.method.next();
                self.refit();
            }
            KeyCode::Char('b') => {
                self.show_band = !self.show_band;
                self.refit();
            }
            KeyCode::Char('r') => {
                self.seed = self.seed.wrapping_add(1);
                self.refit();
            }
            _ => {}
        }
        false
    }

    /// Fit errors stay on screen; the viewer keeps running.
    fn refit(&mut self) {
        let (name, obs) = &self.datasets[self.selected];
        match build_request(self.method, obs, self.show_band, self.seed).and_then(|request| run_fit(name, obs, &request)) {
            Ok(run) => {
                self.status = match &run.bootstrap {
                    Some(boot) => format!("{name}: band from {} replicates (seed {}).", boot.ensemble.replicates(), self.seed),
                    None => format!("{name}: fitted."),
                };
                self.run = Some(run);
            }
            Err(err) => {
                tracing::debug!(dataset = %name, error = %err, "viewer refit failed");
                self.status = format!("{name}: {err}");
                self.run = None;
            }
        }
    }

    fn draw(&mut self, frame: &mut ratatui::Frame<'_>) {
        let size = frame.area();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(5), Constraint::Min(0), Constraint::Length(3)])
            .split(size);

        self.draw_header(frame, chunks[0]);
        self.draw_body(frame, chunks[1]);
        self.draw_footer(frame, chunks[2]);
    }

    fn draw_header(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let (name, obs) = &self.datasets[self.selected];
        let mut lines: Vec<Line> = Vec::new();
        lines.push(Line::from(vec![
            Span::styled("assay", Style::default().fg(Color::Cyan)),
            Span::raw(" | dose-response curve viewer"),
        ]));
        lines.push(Line::from(Span::styled(
            format!(
                "dataset: {name} ({}/{}) | method: {} | n={} | band: {}",
                self.selected + 1,
                self.datasets.len(),
                self.method.curve_method().display_name(),
                obs.len(),
                if self.show_band { "on" } else { "off" },
            ),
            Style::default().fg(Color::Gray),
        )));

        if let Some(fit) = self.run.as_ref().and_then(|r| r.fit.as_ref()) {
            let q = &fit.quality;
            let mut text = format!("rmse={:.4} | R²={:.4} | iterations={}", q.rmse, q.r_squared, q.iterations);
            if let Some((c, _)) = ec50(&fit.params) {
                text.push_str(&format!(" | EC50={c:.4}"));
            }
            lines.push(Line::from(Span::styled(text, Style::default().fg(Color::Gray))));
        }

        let p = Paragraph::new(Text::from(lines)).block(Block::default().borders(Borders::ALL));
        frame.render_widget(p, area);
    }

    fn draw_body(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(0), Constraint::Length(30)])
            .split(area);

        self.draw_chart(frame, chunks[0]);
        self.draw_params(frame, chunks[1]);
    }

    fn draw_chart(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let block = Block::default().title("Curve").borders(Borders::ALL);
        let inner = block.inner(area);
        frame.render_widget(block, area);
        frame.render_widget(Clear, inner);

        let Some(run) = &self.run else {
            let msg = Paragraph::new("No curve (see status line).")
                .style(Style::default().fg(Color::Yellow))
                .block(Block::default());
            frame.render_widget(msg, inner);
            return;
        };

        let series = chart_series(run);
        let x_label = match series.scale {
            XScale::Linear => "x",
            XScale::Log10 => "log10 x",
        };

        let (chart_rect, insets) = chart_layout(inner);
        let widget = CurvePlottersChart {
            curve: &series.curve,
            points: &series.points,
            lower: &series.lower,
            upper: &series.upper,
            x_bounds: series.x_bounds,
            y_bounds: series.y_bounds,
            x_label,
            y_label: "response",
            fmt_x: fmt_axis,
            fmt_y: fmt_axis,
        };

        frame.render_widget(widget, chart_rect);
        if let Some(insets) = insets {
            draw_axis_ticks(frame, inner, chart_rect, insets, &series, x_label);
        }
    }

    fn draw_params(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let mut items = Vec::new();
        match self.run.as_ref().and_then(|r| r.fit.as_ref()) {
            Some(fit) => {
                for (name, value) in fit.params.named() {
                    items.push(ListItem::new(format!("{name:<10} {value:>12.5}")));
                }
            }
            None => items.push(ListItem::new("(no parameters)")),
        }
        if let Some(band) = self.run.as_ref().and_then(FitRun::band) {
            items.push(ListItem::new(""));
            items.push(ListItem::new(format!(
                "{:.0}% {} band",
                band.confidence * 100.0,
                band.method.as_str()
            )));
        }

        let list = List::new(items).block(Block::default().title("Parameters").borders(Borders::ALL));
        frame.render_widget(list, area);
    }

    fn draw_footer(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let help = "↑/↓ dataset  m method  b band  r reseed  q quit";
        let line = Line::from(vec![
            Span::styled(help, Style::default().fg(Color::Gray)),
            Span::raw(" | "),
            Span::styled(&self.status, Style::default().fg(Color::Yellow)),
        ]);
        let p = Paragraph::new(line).block(Block::default().borders(Borders::ALL));
        frame.render_widget(p, area);
    }
}

/// Request for the viewer: 4PL/Hill start from the data, the band uses a
/// geometric grid when the x-values span decades.
fn build_request(method: ViewMethod, obs: &Observations, show_band: bool, seed: u64) -> crate::error::FitResult<FitRequest> {
    let spacing = match XScale::auto(obs.x()) {
        XScale::Log10 => GridSpacing::Geometric,
        XScale::Linear => GridSpacing::Linear,
    };
    let bootstrap = if show_band {
        Some(crate::app::demo_bootstrap(VIEW_REPLICATES, BandMethod::Percentile, spacing, seed)?)
    } else {
        None
    };
    Ok(FitRequest {
        grid: crate::domain::GridSpec::spaced(None, None, 200, spacing)?,
        bootstrap,
        auto_start: true,
        ..FitRequest::new(method.curve_method())
    })
}

/// Plot-space series and bounds for one run.
struct ChartSeries {
    curve: Vec<(f64, f64)>,
    points: Vec<(f64, f64)>,
    lower: Vec<(f64, f64)>,
    upper: Vec<(f64, f64)>,
    x_bounds: [f64; 2],
    y_bounds: [f64; 2],
    scale: XScale,
}

fn chart_series(run: &FitRun) -> ChartSeries {
    let scale = XScale::auto(run.observations.x());
    let to_plot = |x: &[f64], y: &[f64]| -> Vec<(f64, f64)> {
        x.iter()
            .zip(y)
            .filter_map(|(&x, &y)| Some((scale.apply(x)?, y)))
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .collect()
    };

    let curve = to_plot(&run.curve.x, &run.curve.y);
    let points = to_plot(run.observations.x(), run.observations.y());
    let (lower, upper) = match run.band() {
        Some(band) => (to_plot(&band.grid, &band.lower), to_plot(&band.grid, &band.upper)),
        None => (Vec::new(), Vec::new()),
    };

    let all = || curve.iter().chain(&points).chain(&lower).chain(&upper);
    let x_bounds = padded_bounds(all().map(|p| p.0), 0.02);
    let y_bounds = padded_bounds(all().map(|p| p.1), 0.05);

    ChartSeries {
        curve,
        points,
        lower,
        upper,
        x_bounds,
        y_bounds,
        scale,
    }
}

fn padded_bounds(values: impl Iterator<Item = f64>, frac: f64) -> [f64; 2] {
    let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
    for v in values {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    if !lo.is_finite() || !hi.is_finite() || hi <= lo {
        return [0.0, 1.0];
    }
    let pad = ((hi - lo) * frac).max(1e-12);
    [lo - pad, hi + pad]
}

fn fmt_axis(v: f64) -> String {
    format!("{v:.2}")
}

#[derive(Debug, Clone, Copy)]
struct AxisInsets {
    left: u16,
    right: u16,
    top: u16,
    bottom: u16,
}

fn chart_layout(inner: Rect) -> (Rect, Option<AxisInsets>) {
    let insets = AxisInsets {
        left: 8,
        right: 2,
        top: 1,
        bottom: 2,
    };

    if inner.width <= insets.left + insets.right + 10 || inner.height <= insets.top + insets.bottom + 5 {
        return (inner, None);
    }

    let rect = Rect {
        x: inner.x + insets.left,
        y: inner.y + insets.top,
        width: inner.width - insets.left - insets.right,
        height: inner.height - insets.top - insets.bottom,
    };

    (rect, Some(insets))
}

fn draw_axis_ticks(
    frame: &mut ratatui::Frame<'_>,
    inner: Rect,
    chart: Rect,
    insets: AxisInsets,
    series: &ChartSeries,
    x_label: &str,
) {
    let ticks = 5usize;
    let style = Style::default().fg(Color::Gray);
    let [x0, x1] = series.x_bounds;
    let [y0, y1] = series.y_bounds;

    for i in 0..ticks {
        let u = i as f64 / (ticks as f64 - 1.0);
        // Tick labels show data units on a log axis.
        let x_val = series.scale.invert(x0 + u * (x1 - x0));
        let x = chart.x + ((chart.width - 1) as f64 * u).round() as u16;
        let label = format_tick(x_val);
        let label_len = label.len() as u16;
        let start = x.saturating_sub((label.len() / 2) as u16);
        let y = chart.y + chart.height;
        if y >= inner.y + inner.height - 1 {
            continue;
        }
        frame.render_widget(
            Paragraph::new(label).style(style),
            Rect {
                x: start,
                y,
                width: label_len,
                height: 1,
            },
        );
    }

    for i in 0..ticks {
        let u = i as f64 / (ticks as f64 - 1.0);
        let y_val = y0 + u * (y1 - y0);
        let y = chart.y + (chart.height - 1) - ((chart.height - 1) as f64 * u).round() as u16;
        let label = format_tick(y_val);
        let label_len = label.len() as u16;
        let x = inner.x + insets.left.saturating_sub(1);
        let start = x.saturating_sub(label.len() as u16);
        if start < inner.x {
            continue;
        }
        frame.render_widget(
            Paragraph::new(label).style(style),
            Rect {
                x: start,
                y,
                width: label_len,
                height: 1,
            },
        );
    }

    let x_desc = Paragraph::new(x_label.to_string())
        .alignment(Alignment::Center)
        .style(Style::default().fg(Color::Gray));
    let x_rect = Rect {
        x: chart.x,
        y: chart.y + chart.height + 1,
        width: chart.width,
        height: 1,
    };
    if x_rect.y < inner.y + inner.height {
        frame.render_widget(x_desc, x_rect);
    }

    let y_desc = Paragraph::new("resp").style(Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD));
    let y_rect = Rect {
        x: inner.x,
        y: inner.y,
        width: insets.left.saturating_sub(1),
        height: 1,
    };
    frame.render_widget(y_desc, y_rect);
}

/// Compact tick label: fixed decimals for moderate values, scientific otherwise.
fn format_tick(v: f64) -> String {
    let a = v.abs();
    if a != 0.0 && !(0.01..10_000.0).contains(&a) {
        format!("{v:.1e}")
    } else if a >= 100.0 {
        format!("{v:.0}")
    } else {
        format!("{v:.2}")
    }
}
