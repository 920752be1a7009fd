use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;
use std::io::{self, stdout};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::warn;

use crate::audio::{self, SessionSnapshot, SourceKind};
use crate::config::Config;
use crate::ipc::{self, IpcCommand};
use crate::tracks::TrackLibrary;
use crate::visualizer::{self, IndicatorView};

pub async fn run(config: Config) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let result = run_app(&mut terminal, config).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    config: Config,
) -> Result<()> {
    let library = TrackLibrary::from_tracks(config.playback.tracks.clone());
    let (mut manager, status_rx, level_rx) =
        audio::create_session(&config.audio, library, &config.playback.initial_track);

    // Remote control commands arrive over the socket but are applied here,
    // on the same thread as key input.
    let (ipc_tx, mut ipc_rx) = mpsc::channel::<IpcCommand>(16);
    tokio::spawn(async move {
        if let Err(e) = ipc::start_server(ipc_tx).await {
            warn!("IPC server unavailable: {}", e);
        }
    });

    let view = IndicatorView::new(config.indicator.clone());
    let mut alert: Option<String> = None;

    let mut last_frame = Instant::now();
    let mut time = 0.0f32;
    let target_fps = Duration::from_secs_f64(1.0 / 60.0);

    loop {
        let now = Instant::now();
        time += now.duration_since(last_frame).as_secs_f32();
        last_frame = now;

        // Deferred transitions from the playback thread (natural end,
        // loading flag).
        manager.poll();

        while let Ok(cmd) = ipc_rx.try_recv() {
            let level = *level_rx.borrow();
            ipc::process_command(cmd, &mut manager, level).await;
        }

        let snapshot = status_rx.borrow().clone();
        let level = *level_rx.borrow();
        let accent = manager
            .library()
            .get(&snapshot.selected_track)
            .map(|t| t.accent)
            .unwrap_or_default();

        terminal.draw(|frame| {
            let area = frame.area();

            // Clear with transparent/reset background for terminal transparency support
            let block =
                ratatui::widgets::Block::default().style(Style::default().bg(Color::Reset));
            frame.render_widget(block, area);

            let rows = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(1),
                    Constraint::Min(6),
                    Constraint::Length(1),
                    Constraint::Length(1),
                ])
                .split(area);

            render_tracks(frame, rows[0], manager.library(), &snapshot);
            view.render(frame, rows[1], &snapshot, level, accent, time);
            if config.indicator.show_gauge {
                visualizer::render_gauge(frame, inset(rows[2], 2), level, accent);
            }
            render_status(frame, rows[3], manager.library(), &snapshot, level);

            if let Some(message) = &alert {
                render_alert(frame, area, message);
            }
        })?;

        // Handle input
        if event::poll(target_fps)? {
            if let Event::Key(key) = event::read()? {
                // A pending alert blocks everything else; any key dismisses it.
                if alert.take().is_some() {
                    continue;
                }

                match key {
                    KeyEvent {
                        code: KeyCode::Char('q'),
                        ..
                    }
                    | KeyEvent {
                        code: KeyCode::Char('c'),
                        modifiers: KeyModifiers::CONTROL,
                        ..
                    } => {
                        break;
                    }
                    KeyEvent {
                        code: KeyCode::Char('m'),
                        ..
                    } => {
                        if snapshot.is_listening() {
                            manager.stop_microphone();
                        } else if let Err(e) = manager.start_microphone().await {
                            warn!("could not start microphone: {}", e);
                            alert = Some(e.to_string());
                        }
                    }
                    KeyEvent {
                        code: KeyCode::Char('p'),
                        ..
                    }
                    | KeyEvent {
                        code: KeyCode::Char(' '),
                        ..
                    } => {
                        if snapshot.is_loading {
                            // Ignore toggles until the pending track is ready.
                        } else if snapshot.is_playing() {
                            manager.stop_playback();
                        } else if let Err(e) = manager.start_playback().await {
                            warn!("could not start playback: {}", e);
                            alert = Some(e.to_string());
                        }
                    }
                    KeyEvent {
                        code: KeyCode::Char(c @ '1'..='9'),
                        ..
                    } => {
                        let position = c.to_digit(10).unwrap_or(0) as usize;
                        if let Some(track) = manager.library().by_position(position) {
                            let id = track.id.clone();
                            let _ = manager.select_track(&id);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    manager.teardown();
    Ok(())
}

fn inset(area: Rect, margin: u16) -> Rect {
    let margin = margin.min(area.width / 2);
    Rect::new(
        area.x + margin,
        area.y,
        area.width.saturating_sub(margin * 2),
        area.height,
    )
}

/// Track selector line: number key, name, selection and playing markers.
fn render_tracks(frame: &mut Frame, area: Rect, library: &TrackLibrary, snapshot: &SessionSnapshot) {
    let mut text = String::new();
    for (i, track) in library.iter().enumerate() {
        let marker = if track.id == snapshot.selected_track {
            if snapshot.is_playing() {
                "▶"
            } else {
                "●"
            }
        } else {
            " "
        };
        text.push_str(&format!(" [{}]{}{} ", i + 1, marker, track.name));
    }

    let selected_accent = library
        .get(&snapshot.selected_track)
        .map(|t| t.accent)
        .unwrap_or_default();
    let (r, g, b) = selected_accent.fill(0.0);

    let mut highlight = false;
    for (i, ch) in text.chars().enumerate() {
        if i >= area.width as usize {
            break;
        }
        // Highlight the run containing the selected track's marker.
        if ch == '▶' || ch == '●' {
            highlight = true;
        }
        if ch == '[' {
            highlight = false;
        }
        if let Some(cell) = frame.buffer_mut().cell_mut((area.x + i as u16, area.y)) {
            cell.set_char(ch);
            cell.set_fg(if highlight {
                Color::Rgb(r, g, b)
            } else {
                Color::Gray
            });
        }
    }
}

fn render_status(
    frame: &mut Frame,
    area: Rect,
    library: &TrackLibrary,
    snapshot: &SessionSnapshot,
    level: f32,
) {
    let state = if snapshot.is_loading {
        "Loading…".to_string()
    } else {
        match snapshot.source {
            SourceKind::Microphone => "Microphone active".to_string(),
            SourceKind::Playback => {
                let name = library
                    .get(&snapshot.selected_track)
                    .map(|t| t.name.as_str())
                    .unwrap_or("?");
                format!("Playing {}", name)
            }
            SourceKind::None => "Waiting for input".to_string(),
        }
    };

    let status = if snapshot.source == SourceKind::None {
        format!(" [m]ic | [p]lay | [1-{}] track | {} | [q]uit ", library.len(), state)
    } else {
        format!(
            " [m]ic | [p]lay | [1-{}] track | {} | {:>3.0}% | [q]uit ",
            library.len(),
            state,
            level * 100.0
        )
    };

    for (i, ch) in status.chars().enumerate() {
        if i < area.width as usize {
            if let Some(cell) = frame.buffer_mut().cell_mut((area.x + i as u16, area.y)) {
                cell.set_char(ch);
                cell.set_fg(Color::DarkGray);
            }
        }
    }
}

/// Blocking error banner, centered; dismissed by the next keypress.
fn render_alert(frame: &mut Frame, area: Rect, message: &str) {
    let text = format!(" {} — press any key ", message);
    let width = (text.chars().count() as u16).min(area.width);
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + area.height / 2;

    for (i, ch) in text.chars().take(width as usize).enumerate() {
        if let Some(cell) = frame.buffer_mut().cell_mut((x + i as u16, y)) {
            cell.set_char(ch);
            cell.set_fg(Color::White);
            cell.set_bg(Color::Red);
        }
    }
}
