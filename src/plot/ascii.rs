//! ASCII/Unicode plotting for terminal output.
//!
//! This is intentionally "dumb" (fixed-size grid), optimized for:
//! - quick visual sanity checks in a terminal
//! - deterministic output (helpful for golden tests)
//!
//! Plot elements:
//! - observed points: `o`
//! - fitted curve: `-` line
//! - confidence band edges: `.` lines

use crate::app::pipeline::FitRun;
use crate::domain::{Band, CurveFile, CurveGrid, Observations};
use crate::fit::density::ChannelDensity;

/// Horizontal axis scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XScale {
    Linear,
    Log10,
}

impl XScale {
    /// Log10 when every x is positive and the values span at least two decades.
    pub fn auto(x: &[f64]) -> Self {
        let min = x.iter().copied().fold(f64::INFINITY, f64::min);
        let max = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if min > 0.0 && max.is_finite() && max / min >= 100.0 {
            XScale::Log10
        } else {
            XScale::Linear
        }
    }

    /// Map a data x into plot space (`None` when off the log domain).
    pub fn apply(self, x: f64) -> Option<f64> {
        match self {
            XScale::Linear => Some(x),
            XScale::Log10 if x > 0.0 => Some(x.log10()),
            XScale::Log10 => None,
        }
    }

    pub fn invert(self, u: f64) -> f64 {
        match self {
            XScale::Linear => u,
            XScale::Log10 => 10f64.powf(u),
        }
    }
}

/// Render observations, a fitted curve and an optional band.
pub fn render_ascii_plot(
    obs: Option<&Observations>,
    curve: &CurveGrid,
    band: Option<&Band>,
    width: usize,
    height: usize,
    scale: XScale,
) -> String {
    let points: Vec<(f64, f64)> = obs
        .map(|o| scaled(scale, o.x(), o.y()))
        .unwrap_or_default();
    let curve_points = scaled(scale, &curve.x, &curve.y);
    let edges = band.map(|b| (scaled(scale, &b.grid, &b.lower), scaled(scale, &b.grid, &b.upper)));

    render_plot(&points, &curve_points, edges.as_ref(), width, height, scale)
}

/// Render an in-memory fit run.
pub fn render_fit_run(run: &FitRun, width: usize, height: usize) -> String {
    render_ascii_plot(
        Some(&run.observations),
        &run.curve,
        run.band(),
        width,
        height,
        XScale::auto(&run.curve.x),
    )
}

/// Render a saved curve JSON file (curve and band, no observations).
pub fn render_curve_file(curve: &CurveFile, width: usize, height: usize, scale: Option<XScale>) -> String {
    let scale = scale.unwrap_or_else(|| XScale::auto(&curve.grid.x));
    render_ascii_plot(None, &curve.grid, curve.band.as_ref(), width, height, scale)
}

/// Render one channel's density curve (x is already log10 intensity).
pub fn render_density(density: &ChannelDensity, width: usize, height: usize) -> String {
    let grid = CurveGrid {
        x: density.x.clone(),
        y: density.density.clone(),
    };
    render_ascii_plot(None, &grid, None, width, height, XScale::Linear)
}

fn scaled(scale: XScale, x: &[f64], y: &[f64]) -> Vec<(f64, f64)> {
    x.iter()
        .zip(y)
        .filter_map(|(&x, &y)| Some((scale.apply(x)?, y)))
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .collect()
}

type BandEdges = (Vec<(f64, f64)>, Vec<(f64, f64)>);

fn render_plot(
    points: &[(f64, f64)],
    curve: &[(f64, f64)],
    band: Option<&BandEdges>,
    width: usize,
    height: usize,
    scale: XScale,
) -> String {
    let width = width.max(10);
    let height = height.max(5);

    let mut all: Vec<&(f64, f64)> = points.iter().chain(curve.iter()).collect();
    if let Some((lower, upper)) = band {
        all.extend(lower.iter().chain(upper.iter()));
    }
    let (x_min, x_max) = range(all.iter().map(|p| p.0)).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = range(all.iter().map(|p| p.1)).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];
    let frame = Frame {
        x_min,
        x_max,
        y_min,
        y_max,
    };

    // Curve first, band edges next, points last (so points overlay).
    draw_curve(&mut grid, curve, &frame, '-');
    if let Some((lower, upper)) = band {
        draw_curve(&mut grid, lower, &frame, '.');
        draw_curve(&mut grid, upper, &frame, '.');
    }
    for &(x, y) in points {
        let col = map_x(x, x_min, x_max, width);
        let row = map_y(y, y_min, y_max, height);
        grid[row][col] = 'o';
    }

    let mut out = String::new();
    let scale_label = match scale {
        XScale::Linear => "",
        XScale::Log10 => " (log10)",
    };
    out.push_str(&format!(
        "Plot: x=[{:.3}, {:.3}]{scale_label} | y=[{y_min:.2}, {y_max:.2}]\n",
        scale.invert(x_min),
        scale.invert(x_max)
    ));

    for row in grid {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }

    out
}

struct Frame {
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
}

fn range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values {
        min = min.min(v);
        max = max.max(v);
    }
    if min.is_finite() && max.is_finite() && max > min {
        Some((min, max))
    } else {
        None
    }
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let span = (max - min).abs();
    let pad = (span * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_x(x: f64, x_min: f64, x_max: f64, width: usize) -> usize {
    let width = width.max(2);
    let u = ((x - x_min) / (x_max - x_min)).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let height = height.max(2);
    let u = ((y - y_min) / (y_max - y_min)).clamp(0.0, 1.0);
    // y=top is max -> row 0
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

fn draw_curve(grid: &mut [Vec<char>], curve: &[(f64, f64)], frame: &Frame, ch: char) {
    if curve.len() < 2 {
        return;
    }
    let height = grid.len();
    let width = grid[0].len();

    let mut prev = None;
    for &(x, y) in curve {
        let col = map_x(x, frame.x_min, frame.x_max, width);
        let row = map_y(y, frame.y_min, frame.y_max, height);
        match prev {
            Some((c0, r0)) => draw_line(grid, c0, r0, col, row, ch),
            None if grid[row][col] == ' ' => grid[row][col] = ch,
            None => {}
        }
        prev = Some((col, row));
    }
}

/// Integer line drawing (Bresenham-ish).
fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let mut x0 = x0 as isize;
    let mut y0 = y0 as isize;
    let x1 = x1 as isize;
    let y1 = y1 as isize;

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if y0 >= 0
            && (y0 as usize) < grid.len()
            && x0 >= 0
            && (x0 as usize) < grid[0].len()
            && grid[y0 as usize][x0 as usize] == ' '
        {
            grid[y0 as usize][x0 as usize] = ch;
        }

        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BandMethod;

    #[test]
    fn plot_golden_snapshot_small() {
        let obs = Observations::new(vec![1.0, 10.0], vec![100.0, 110.0]).unwrap();
        let curve = CurveGrid {
            x: vec![1.0, 10.0],
            y: vec![100.0, 100.0],
        };

        let txt = render_ascii_plot(Some(&obs), &curve, None, 10, 5, XScale::Linear);
        let expected = concat!(
            "Plot: x=[1.000, 10.000] | y=[99.50, 110.50]\n",
            "         o\n",
            "          \n",
            "          \n",
            "          \n",
            "o---------\n",
        );
        assert_eq!(txt, expected);
    }

    #[test]
    fn band_edges_frame_the_curve() {
        let curve = CurveGrid {
            x: vec![1.0, 10.0],
            y: vec![100.0, 100.0],
        };
        let band = Band {
            grid: vec![1.0, 10.0],
            method: BandMethod::Percentile,
            confidence: 0.95,
            lower: vec![95.0, 95.0],
            upper: vec![105.0, 105.0],
        };

        let txt = render_ascii_plot(None, &curve, Some(&band), 10, 5, XScale::Linear);
        let expected = concat!(
            "Plot: x=[1.000, 10.000] | y=[94.50, 105.50]\n",
            "..........\n",
            "          \n",
            "----------\n",
            "          \n",
            "..........\n",
        );
        assert_eq!(txt, expected);
    }

    #[test]
    fn log_scale_spreads_decades_evenly() {
        let obs = Observations::new(vec![1.0, 10.0, 100.0], vec![0.0, 1.0, 2.0]).unwrap();
        let curve = CurveGrid {
            x: vec![1.0, 100.0],
            y: vec![0.0, 2.0],
        };
        assert_eq!(XScale::auto(&curve.x), XScale::Log10);
        assert_eq!(XScale::auto(&[0.0, 100.0]), XScale::Linear);

        let txt = render_ascii_plot(Some(&obs), &curve, None, 21, 5, XScale::Log10);
        let lines: Vec<&str> = txt.lines().collect();
        assert_eq!(lines[0], "Plot: x=[1.000, 100.000] (log10) | y=[-0.10, 2.10]");
        assert_eq!(lines[1].chars().nth(20), Some('o'));
        assert_eq!(lines[3].chars().nth(10), Some('o'));
        assert_eq!(lines[5].chars().nth(0), Some('o'));
    }
}
