mod indicator;

pub use indicator::IndicatorView;

use ratatui::prelude::*;

use crate::color::Accent;

/// Horizontal loudness gauge rendered under the indicator.
pub fn render_gauge(frame: &mut Frame, area: Rect, level: f32, accent: Accent) {
    if area.width == 0 || area.height == 0 {
        return;
    }

    let level = level.clamp(0.0, 1.0);
    // Keep a sliver visible even at zero so the gauge reads as present.
    let filled = ((level * area.width as f32) as u16).max(1).min(area.width);
    let (r, g, b) = accent.fill(level);

    for x in 0..area.width {
        if let Some(cell) = frame.buffer_mut().cell_mut((area.x + x, area.y)) {
            if x < filled {
                cell.set_char('█');
                cell.set_fg(Color::Rgb(r, g, b));
            } else {
                cell.set_char('░');
                cell.set_fg(Color::DarkGray);
            }
        }
    }
}
