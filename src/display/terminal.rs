use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use glam::Vec3;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};
use std::io::{self, stdout};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::warn;

use soundscape::audio::{CaptureState, SpectralBalance, BAND_LAYOUT};
use soundscape::bridge::VisualDriverFrame;
use soundscape::color::{band_palette, dim, to_rgb8, Rgba};
use soundscape::error::PipelineError;
use soundscape::stream::StreamUpdate;

use super::{drain_ipc, shutdown_signal};
use crate::config::Config;
use crate::ipc::IpcCommand;
use crate::session::Session;

/// Gesture units per arrow key press
const DRAG_STEP: f32 = 10.0;

/// Widest intensity bar, in cells
const MAX_BAR: usize = 40;

pub async fn run(
    config: Config,
    session: Session,
    ipc_rx: mpsc::Receiver<IpcCommand>,
) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let result = run_app(&mut terminal, config, session, ipc_rx).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

/// Everything one monitor frame shows
struct MonitorView {
    frame: StreamUpdate<VisualDriverFrame>,
    capture: CaptureState,
    backend: String,
    anchor: Vec3,
    balance: Option<SpectralBalance>,
    error: Option<PipelineError>,
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    config: Config,
    mut session: Session,
    mut ipc_rx: mpsc::Receiver<IpcCommand>,
) -> Result<()> {
    let shutdown_rx = shutdown_signal();
    let palette = band_palette(BAND_LAYOUT.len());
    let frame_duration = Duration::from_secs_f64(1.0 / config.display.fps.max(1) as f64);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let tick = Instant::now();

        drain_ipc(&mut ipc_rx, &mut session);

        let view = MonitorView {
            frame: session.latest_frame(),
            capture: session.capture_state(),
            backend: session.backend_name(),
            anchor: session.anchor(),
            balance: session.balance(),
            error: session.last_error(),
        };

        terminal.draw(|frame| render(frame, &view, &palette))?;

        // Handle input for whatever is left of the tick
        let remaining = frame_duration.saturating_sub(tick.elapsed());
        if event::poll(remaining)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
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
                        code: KeyCode::Char(' '),
                        ..
                    } => {
                        if let Err(e) = session.toggle_capture() {
                            warn!("Could not start capture: {}", e);
                        }
                    }
                    KeyEvent {
                        code: KeyCode::Char('r'),
                        ..
                    } => {
                        if let Err(e) = session.restart_capture() {
                            warn!("Could not restart capture: {}", e);
                        }
                    }
                    KeyEvent {
                        code: KeyCode::Left,
                        ..
                    } => {
                        session.drag_anchor(-DRAG_STEP, 0.0);
                    }
                    KeyEvent {
                        code: KeyCode::Right,
                        ..
                    } => {
                        session.drag_anchor(DRAG_STEP, 0.0);
                    }
                    KeyEvent {
                        code: KeyCode::Up,
                        ..
                    } => {
                        session.drag_anchor(0.0, DRAG_STEP);
                    }
                    KeyEvent {
                        code: KeyCode::Down,
                        ..
                    } => {
                        session.drag_anchor(0.0, -DRAG_STEP);
                    }
                    _ => {}
                }
            }
        }
    }

    session.shutdown();
    Ok(())
}

fn rgb(color: Rgba) -> Color {
    let (r, g, b) = to_rgb8(color);
    Color::Rgb(r, g, b)
}

fn capture_label(state: CaptureState) -> (&'static str, Color) {
    match state {
        CaptureState::Stopped => ("stopped", Color::Red),
        CaptureState::Starting => ("starting", Color::Yellow),
        CaptureState::Running => ("running", Color::Green),
    }
}

fn band_lines(frame: &StreamUpdate<VisualDriverFrame>, palette: &[Rgba]) -> Vec<Line<'static>> {
    let label_width = BAND_LAYOUT.labels().map(str::len).max().unwrap_or(0);
    let active = frame.value();

    BAND_LAYOUT
        .bands
        .iter()
        .enumerate()
        .map(|(i, band)| {
            let label = format!("{:>width$} ", band.label, width = label_width);
            match active.and_then(|f| f.band(i)) {
                Some(visual) => {
                    let cells = (visual.intensity * MAX_BAR as f32).round() as usize;
                    let color = rgb(dim(visual.color, visual.intensity));
                    Line::from(vec![
                        Span::styled(label, Style::default().fg(rgb(visual.color))),
                        Span::styled("█".repeat(cells), Style::default().fg(color)),
                        Span::raw(" ".repeat(MAX_BAR.saturating_sub(cells))),
                        Span::styled(
                            format!(" e={:.2} r={:.2}", visual.energy, visual.radius),
                            Style::default().fg(Color::Gray),
                        ),
                    ])
                }
                None => {
                    let faded = palette.get(i).copied().map(|c| dim(c, 0.35));
                    Line::from(vec![
                        Span::styled(
                            label,
                            Style::default().fg(faded.map(rgb).unwrap_or(Color::DarkGray)),
                        ),
                        Span::styled("·", Style::default().fg(Color::DarkGray)),
                    ])
                }
            }
        })
        .collect()
}

fn balance_line(balance: SpectralBalance) -> Line<'static> {
    Line::styled(
        format!(
            " low {:.2} | mid {:.2} | high {:.2}",
            balance.bass, balance.mid, balance.high
        ),
        Style::default().fg(Color::Gray),
    )
}

fn render(frame: &mut Frame, view: &MonitorView, palette: &[Rgba]) {
    let area = frame.area();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(BAND_LAYOUT.len() as u16 + 4),
            Constraint::Length(3),
        ])
        .split(area);

    let (state_label, state_color) = capture_label(view.capture);
    let dominant = match &view.frame {
        StreamUpdate::Value(f) => format!("{:.1} Hz", f.dominant_frequency),
        _ => "-".to_string(),
    };
    let header = Line::from(vec![
        Span::raw(" capture: "),
        Span::styled(state_label, Style::default().fg(state_color)),
        Span::raw(format!(" | {} | dominant: {} ", view.backend, dominant)),
        Span::raw(format!(
            "| source: ({:.2}, {:.2}, {:.2})",
            view.anchor.x, view.anchor.y, view.anchor.z
        )),
    ]);
    frame.render_widget(
        Paragraph::new(header).block(Block::default().borders(Borders::ALL).title(" soundscape ")),
        chunks[0],
    );

    let mut body = band_lines(&view.frame, palette);
    if let Some(balance) = view.balance {
        body.push(Line::default());
        body.push(balance_line(balance));
    }
    if let StreamUpdate::Terminated(e) = &view.frame {
        body.push(Line::default());
        body.push(Line::styled(
            format!("stream terminated: {}", e),
            Style::default().fg(Color::Red),
        ));
    }
    frame.render_widget(
        Paragraph::new(body).block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" {} bands ", BAND_LAYOUT.name)),
        ),
        chunks[1],
    );

    let footer = match &view.error {
        Some(e) => Line::styled(format!(" last error: {}", e), Style::default().fg(Color::Red)),
        None => Line::styled(
            " [arrows] move source | [space] capture | [r]estart | [q]uit",
            Style::default().fg(Color::DarkGray),
        ),
    };
    frame.render_widget(
        Paragraph::new(footer).block(Block::default().borders(Borders::ALL)),
        chunks[2],
    );
}
