use std::collections::VecDeque;

use monitor_core::{FilterSpec, MonitorSession, Rgba};
use ratatui::layout::{Constraint, Direction, Layout, Margin};
use ratatui::prelude::Rect;
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Frame;

pub const LEVEL_STEP: i32 = 10;

pub struct UiState {
    pub filter: FilterSpec,
    pub zoom: f32,
    pub logs: VecDeque<String>,
    pub max_logs: usize,
}

impl UiState {
    pub fn new(filter: FilterSpec, zoom: f32) -> Self {
        Self {
            filter,
            zoom,
            logs: VecDeque::new(),
            max_logs: 8,
        }
    }

    pub fn push_log<S: Into<String>>(&mut self, line: S) {
        let mut text: String = line.into();
        while text.ends_with('\n') || text.ends_with('\r') {
            text.pop();
        }
        if text.is_empty() {
            return;
        }
        self.logs.push_front(text);
        while self.logs.len() > self.max_logs {
            self.logs.pop_back();
        }
    }
}

pub fn draw_ui(frame: &mut Frame, state: &UiState, session: &MonitorSession) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(5),
            Constraint::Min(8),
            Constraint::Length(10),
        ])
        .split(frame.size());
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(rows[2]);

    draw_header(frame, rows[0], state, session);
    draw_commands(frame, rows[1]);
    draw_processes(frame, columns[0], session);
    draw_regions(frame, columns[1], session);
    draw_logs(frame, rows[3], state);
}

fn color_of(rgba: Rgba) -> Color {
    let (r, g, b) = rgba.to_rgb8();
    Color::Rgb(r, g, b)
}

fn boxed(frame: &mut Frame, area: Rect, title: &str, lines: Vec<Line>) {
    let block = Block::default().borders(Borders::ALL).title(title.to_string());
    let paragraph = Paragraph::new(lines).wrap(Wrap { trim: false });
    frame.render_widget(block, area);
    frame.render_widget(
        paragraph,
        area.inner(&Margin {
            vertical: 1,
            horizontal: 1,
        }),
    );
}

fn draw_header(frame: &mut Frame, area: Rect, state: &UiState, session: &MonitorSession) {
    let world = session
        .world()
        .map(|world| world.to_string())
        .unwrap_or_else(|| "detached".to_string());
    let (status, status_color) = if session.is_attached() {
        ("Attached", Color::Green)
    } else {
        ("Detached", Color::Red)
    };
    let line = Line::from(vec![
        Span::styled(status, Style::default().fg(status_color)),
        Span::raw(format!(" | {world} | entities ")),
        Span::styled(
            format!("{}", session.entities().len()),
            Style::default().fg(Color::Cyan),
        ),
        Span::raw(" visible "),
        Span::styled(
            format!("{}", session.instances().count()),
            Style::default().fg(Color::Cyan),
        ),
        Span::raw(format!(
            " | cells {} loaded {} | zoom {:.2} | levels [{}, {}]{}",
            session.cells().len(),
            session.cells().loaded_count(),
            state.zoom,
            display_bound(&state.filter.level_min),
            display_bound(&state.filter.level_max),
            if state.filter.include_hibernating {
                ""
            } else {
                " awake only"
            },
        )),
    ]);
    boxed(frame, area, "Cluster Monitor Inspector", vec![line]);
}

fn display_bound(text: &str) -> &str {
    if text.trim().is_empty() {
        "*"
    } else {
        text.trim()
    }
}

fn draw_commands(frame: &mut Frame, area: Rect) {
    let key = |label: &'static str| Span::styled(label, Style::default().fg(Color::Yellow));
    let lines = vec![
        Line::from(vec![
            key("+ / -"),
            Span::raw("  zoom in / out      "),
            key("n / p"),
            Span::raw("  next / previous world"),
        ]),
        Line::from(vec![
            key("[ / ]"),
            Span::raw("  lower level bound  "),
            key("{ / }"),
            Span::raw("  upper level bound"),
        ]),
        Line::from(vec![
            key("h"),
            Span::raw("      toggle hibernating  "),
            key("c"),
            Span::raw("      reset filter  "),
            key("q"),
            Span::raw("  exit"),
        ]),
    ];
    boxed(frame, area, "Commands", lines);
}

fn draw_processes(frame: &mut Frame, area: Rect, session: &MonitorSession) {
    let counts = session.server_counts();
    let lines: Vec<Line> = session
        .processes()
        .iter()
        .map(|process| {
            let frame_ms = session
                .frames()
                .latest(process.server_id)
                .map(|sample| format!("{:>7.2} ms", sample.duration_ms))
                .unwrap_or_else(|| "      - ms".to_string());
            let (state, state_color) = if process.is_online {
                ("up  ", Color::Green)
            } else {
                ("down", Color::Red)
            };
            Line::from(vec![
                Span::styled("■ ", Style::default().fg(color_of(process.color))),
                Span::raw(format!("{:>5} ", process.server_id)),
                Span::styled(state, Style::default().fg(state_color)),
                Span::raw(format!(
                    " | {frame_ms} | objects {:>6} | {} pid {} {}",
                    counts.get(process.server_id),
                    process.host_name,
                    process.pid,
                    process.scene_id,
                )),
            ])
        })
        .collect();
    let title = format!(
        "Processes ({} online / {})",
        session.processes().online_count(),
        session.processes().len()
    );
    boxed(frame, area, &title, lines);
}

fn draw_regions(frame: &mut Frame, area: Rect, session: &MonitorSession) {
    let regions = session.regions();
    let lines: Vec<Line> = regions
        .regions()
        .iter()
        .map(|region| {
            Line::from(vec![
                Span::styled("■ ", Style::default().fg(color_of(region.color))),
                Span::raw(format!(
                    "server {:>5} | cells {:>5}",
                    region.server_id, region.cell_count
                )),
            ])
        })
        .collect();
    let title = format!(
        "Regions (remesh #{}{})",
        regions.remesh_count(),
        if regions.is_pending() { ", pending" } else { "" }
    );
    boxed(frame, area, &title, lines);
}

fn draw_logs(frame: &mut Frame, area: Rect, state: &UiState) {
    let lines: Vec<Line> = state
        .logs
        .iter()
        .map(|entry| Line::from(Span::raw(entry.as_str())))
        .collect();
    boxed(frame, area, "Logs", lines);
}
