// src/waveform/terminal.rs

use crate::waveform::WaveformModel;

const BAR: char = '█';
const CURSOR: char = '|';
const BASELINE: char = '─';

/// Draw the visible part of `model` as text rows. The rows above the
/// line offset carry a seconds ruler.
pub fn render_ascii(model: &WaveformModel) -> Vec<String> {
    let vp = model.viewport();
    let width = vp.visible_width() as usize;
    let height = vp.height() as usize;
    let mut grid = vec![vec![' '; width]; height];

    draw_ruler(model, &mut grid);

    let base = vp.baseline() as usize;
    if base < height {
        grid[base].fill(BASELINE);
    }
    for (x, mag) in model.visible_buckets(vp).enumerate() {
        let (top, bottom) = vp.bar_span(mag);
        if mag <= 0.0 {
            continue;
        }
        for row in grid.iter_mut().take(bottom as usize + 1).skip(top as usize) {
            row[x] = BAR;
        }
    }

    if let Some(x) = model.cursor_screen_x() {
        for row in grid.iter_mut().skip(vp.line_offset() as usize) {
            row[x as usize] = CURSOR;
        }
    }

    grid.into_iter().map(|row| row.into_iter().collect()).collect()
}

/// Tick marks and seconds labels in the reserved rows.
fn draw_ruler(model: &WaveformModel, grid: &mut [Vec<char>]) {
    let vp = model.viewport();
    let rows = (vp.line_offset() as usize).min(grid.len());
    if rows == 0 {
        return;
    }
    let width = vp.visible_width() as u64;
    let first_ms = model.pixels_to_millisecs(vp.scroll_px());
    let last_ms = model.pixels_to_millisecs(vp.scroll_px() + width);

    let mut sec = first_ms.div_ceil(1000);
    while sec * 1000 <= last_ms {
        let px = model.millisecs_to_pixels(sec * 1000);
        if let Some(x) = vp.to_screen(px) {
            let x = x as usize;
            grid[rows - 1][x] = '|';
            if rows > 1 {
                for (i, ch) in format!("{sec}s").chars().enumerate() {
                    if let Some(cell) = grid[rows - 2].get_mut(x + i) {
                        *cell = ch;
                    }
                }
            }
        }
        sec += 1;
    }
}
