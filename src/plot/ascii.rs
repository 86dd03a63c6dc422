//! ASCII plotting for terminal output.
//!
//! This is intentionally "dumb" (fixed-size grid), optimized for:
//! - quick visual sanity checks in a terminal
//! - deterministic output (helpful for golden tests)
//!
//! Two renderings:
//! - 2-D maps as a shade grid (`render_map`), darkest = lowest value,
//!   `?` = missing, `(0, 0)` at the bottom left
//! - one pixel's spectrum with its fitted profile (`render_profile`):
//!   observed samples `o`, model `-`

use crate::domain::Spectrum;
use crate::fit::{FitProfile, Map2D};
use crate::math::finite_range;

const SHADES: [char; 10] = [' ', '.', ':', '-', '=', '+', '*', '#', '%', '@'];
const MISSING: char = '?';

/// Render a 2-D map, two characters per pixel.
pub fn render_map(map: &Map2D, title: &str) -> String {
    let range = finite_range(&map.values);
    let mut out = String::new();
    match range {
        Some((lo, hi)) => out.push_str(&format!(
            "Map: {title} {}x{} | range=[{lo:.4}, {hi:.4}]\n",
            map.nx, map.ny
        )),
        None => out.push_str(&format!("Map: {title} {}x{} | no finite values\n", map.nx, map.ny)),
    }

    for y in (0..map.ny).rev() {
        for x in 0..map.nx {
            let ch = shade(map.get(x, y), range);
            out.push(ch);
            out.push(ch);
        }
        out.push('\n');
    }
    out
}

fn shade(v: f64, range: Option<(f64, f64)>) -> char {
    let Some((lo, hi)) = range else {
        return MISSING;
    };
    if !v.is_finite() {
        return MISSING;
    }
    let u = if hi > lo { (v - lo) / (hi - lo) } else { 0.5 };
    let idx = (u.clamp(0.0, 1.0) * (SHADES.len() - 1) as f64).round() as usize;
    SHADES[idx]
}

/// Render observed samples with the fitted total profile.
pub fn render_profile(spectrum: &Spectrum<'_>, profile: &FitProfile, width: usize, height: usize) -> String {
    let width = width.max(10);
    let height = height.max(5);

    let observed: Vec<(f64, f64)> = spectrum.usable().collect();
    let curve: Vec<(f64, f64)> = profile
        .wavelength
        .iter()
        .zip(&profile.total)
        .filter(|(_, y)| y.is_finite())
        .map(|(&w, &y)| (w, y))
        .collect();

    let (w_min, w_max) = x_range(&observed, &curve).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = y_range(&observed, &curve).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];

    // Curve first so points overlay it.
    draw_curve(&mut grid, &curve, w_min, w_max, y_min, y_max);
    for &(w, y) in &observed {
        let x = map_x(w, w_min, w_max, width);
        let yy = map_y(y, y_min, y_max, height);
        grid[yy][x] = 'o';
    }

    let mut out = String::new();
    out.push_str(&format!(
        "Profile: wavelength=[{w_min:.3}, {w_max:.3}] | intensity=[{y_min:.2}, {y_max:.2}]\n"
    ));
    for row in grid {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }
    out
}

fn x_range(observed: &[(f64, f64)], curve: &[(f64, f64)]) -> Option<(f64, f64)> {
    let xs: Vec<f64> = observed.iter().chain(curve).map(|&(x, _)| x).collect();
    finite_range(&xs).filter(|(lo, hi)| hi > lo)
}

fn y_range(observed: &[(f64, f64)], curve: &[(f64, f64)]) -> Option<(f64, f64)> {
    let ys: Vec<f64> = observed.iter().chain(curve).map(|&(_, y)| y).collect();
    finite_range(&ys).filter(|(lo, hi)| hi > lo)
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let span = (max - min).abs();
    let pad = (span * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_x(t: f64, t_min: f64, t_max: f64, width: usize) -> usize {
    let width = width.max(2);
    let u = ((t - t_min) / (t_max - t_min)).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let height = height.max(2);
    let u = ((y - y_min) / (y_max - y_min)).clamp(0.0, 1.0);
    // y=top is max -> row 0
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

fn draw_curve(grid: &mut [Vec<char>], curve: &[(f64, f64)], x_min: f64, x_max: f64, y_min: f64, y_max: f64) {
    if curve.len() < 2 {
        return;
    }
    let height = grid.len();
    let width = grid[0].len();

    let mut prev = None;
    for &(t, y) in curve {
        let x = map_x(t, x_min, x_max, width);
        let yy = map_y(y, y_min, y_max, height);
        if let Some((x0, y0)) = prev {
            draw_line(grid, x0, y0, x, yy, '-');
        } else {
            grid[yy][x] = '-';
        }
        prev = Some((x, yy));
    }
}

/// Integer line drawing (Bresenham).
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
