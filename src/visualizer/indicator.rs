use ratatui::prelude::*;

use crate::audio::{SessionSnapshot, SourceKind};
use crate::color::{self, Accent};
use crate::config::IndicatorConfig;

/// Terminal character cells are roughly twice as tall as wide; distances are
/// computed in row units with the x axis compressed accordingly.
const CELL_ASPECT: f32 = 2.0;

/// Radius of the static reference ring, as a fraction of the fitted circle.
const REFERENCE_RADIUS: f32 = 0.92;

/// Width of the glow band at full intensity, as a fraction of the fitted
/// circle.
const GLOW_WIDTH: f32 = 0.22;

/// A source is treated as quiet below this level; the indicator pulses
/// gently so it still reads as live.
const PULSE_THRESHOLD: f32 = 0.1;

const SPINNER_FRAMES: &[char] = &['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

/// The circular loudness indicator: a filled disc whose radius, brightness
/// and glow scale with the published level.
pub struct IndicatorView {
    config: IndicatorConfig,
}

impl IndicatorView {
    pub fn new(config: IndicatorConfig) -> Self {
        Self { config }
    }

    pub fn render(
        &self,
        frame: &mut Frame,
        area: Rect,
        snapshot: &SessionSnapshot,
        level: f32,
        accent: Accent,
        time: f32,
    ) {
        if area.width < 8 || area.height < 4 {
            return;
        }

        let (cx, cy, max_radius) = fit_circle(area.width as usize, area.height as usize);
        let active = snapshot.source != SourceKind::None;
        let level = level.clamp(0.0, 1.0);

        let pulse = if active && level < PULSE_THRESHOLD {
            (time * 6.0).sin() * 0.02
        } else {
            0.0
        };

        let radius =
            max_radius * (self.config.base_radius + level * self.config.expansion + pulse).max(0.05);
        let ring = max_radius * REFERENCE_RADIUS;
        let glow_band = max_radius * GLOW_WIDTH * color::glow_intensity(level);

        let fill = if active { accent.fill(level) } else { accent.dim() };

        for y in 0..area.height {
            for x in 0..area.width {
                let d = cell_distance(cx, cy, x as f32, y as f32);

                let (ch, rgb) = if d <= radius {
                    ('█', fill)
                } else if active && d <= radius + glow_band {
                    // Glow fades from the accent toward the background with
                    // distance from the disc edge.
                    let falloff = 1.0 - (d - radius) / glow_band;
                    let glow = accent.glow(color::glow_intensity(level));
                    let shade = if falloff > 0.5 { '▓' } else { '▒' };
                    (shade, color::lerp_color((18, 20, 26), glow, falloff))
                } else if (d - ring).abs() < 0.5 {
                    ('·', (90, 95, 110))
                } else {
                    continue;
                };

                if let Some(cell) = frame.buffer_mut().cell_mut((area.x + x, area.y + y)) {
                    cell.set_char(ch);
                    cell.set_fg(Color::Rgb(rgb.0, rgb.1, rgb.2));
                }
            }
        }

        self.render_center_glyph(frame, area, snapshot, cx, cy, time);
    }

    /// Loading spinner or source glyph in the middle of the disc.
    fn render_center_glyph(
        &self,
        frame: &mut Frame,
        area: Rect,
        snapshot: &SessionSnapshot,
        cx: f32,
        cy: f32,
        time: f32,
    ) {
        let label: String = if snapshot.is_loading {
            spinner_frame(time).to_string()
        } else {
            match snapshot.source {
                SourceKind::Microphone => "MIC".to_string(),
                SourceKind::Playback => "♪".to_string(),
                SourceKind::None => return,
            }
        };

        let y = area.y + cy as u16;
        let start = area.x + (cx as u16).saturating_sub(label.chars().count() as u16 / 2);
        for (i, ch) in label.chars().enumerate() {
            let x = start + i as u16;
            if x < area.x + area.width {
                if let Some(cell) = frame.buffer_mut().cell_mut((x, y)) {
                    cell.set_char(ch);
                    cell.set_fg(Color::White);
                }
            }
        }
    }
}

fn spinner_frame(time: f32) -> char {
    let index = (time * 10.0) as usize % SPINNER_FRAMES.len();
    SPINNER_FRAMES[index]
}

/// Compute the circle that fits the area, in row units: terminal cells are
/// taller than wide, so the effective width is the cell width divided by the
/// aspect ratio. Returns (center_x, center_y, max_radius); the centers are
/// in cell coordinates, the radius in row units.
fn fit_circle(area_w: usize, area_h: usize) -> (f32, f32, f32) {
    let cx = area_w as f32 / 2.0;
    let cy = area_h as f32 / 2.0;
    let effective_w = area_w as f32 / CELL_ASPECT;
    let max_radius = (effective_w.min(area_h as f32) / 2.0) * 0.95;
    (cx, cy, max_radius)
}

/// Distance from the center in row units, compressing x by the cell aspect.
fn cell_distance(cx: f32, cy: f32, x: f32, y: f32) -> f32 {
    let dx = (x - cx) / CELL_ASPECT;
    let dy = y - cy;
    (dx * dx + dy * dy).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fitted_circle_is_bounded_by_the_short_side() {
        // Wide area: height limits the radius.
        let (_, _, r) = fit_circle(200, 40);
        assert!((r - 19.0).abs() < 0.5);

        // Narrow area: width (aspect-corrected) limits the radius.
        let (_, _, r) = fit_circle(40, 40);
        assert!((r - 9.5).abs() < 0.5);
    }

    #[test]
    fn distance_is_aspect_corrected() {
        // Two cells right equals one row down.
        let right = cell_distance(10.0, 10.0, 12.0, 10.0);
        let down = cell_distance(10.0, 10.0, 10.0, 11.0);
        assert!((right - down).abs() < f32::EPSILON);
    }

    #[test]
    fn spinner_cycles_through_frames() {
        assert_eq!(spinner_frame(0.0), SPINNER_FRAMES[0]);
        assert_eq!(spinner_frame(0.1), SPINNER_FRAMES[1]);
        assert_eq!(spinner_frame(1.0), SPINNER_FRAMES[0]);
    }
}
