use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use color_eyre::Result;
use crossterm::event::{self, Event, KeyCode};
use monitor_core::{ChannelFeed, FilterSpec, MonitorConfig, MonitorSession};
use monitor_proto::{ClientId, WorldId};
use ratatui::backend::CrosstermBackend;
use ratatui::prelude::*;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::ui::{draw_ui, UiState, LEVEL_STEP};

/// Puts the terminal back and tells the feed task to stop, however the UI exits.
struct TerminalGuard {
    raw_mode: bool,
    shutdown: watch::Sender<bool>,
}

impl TerminalGuard {
    fn enter(shutdown: watch::Sender<bool>) -> Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        Ok(Self {
            raw_mode: true,
            shutdown,
        })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if self.raw_mode {
            let _ = crossterm::execute!(std::io::stdout(), crossterm::cursor::Show);
            let _ = crossterm::terminal::disable_raw_mode();
        }
        let _ = self.shutdown.send(true);
    }
}

pub struct InspectorApp {
    terminal: Terminal<CrosstermBackend<std::io::Stdout>>,
    ui_state: UiState,
    session: MonitorSession,
    feed: ChannelFeed,
    default_filter: FilterSpec,
    log_receiver: Receiver<String>,
    started: Instant,
    // Dropped last so the terminal is restored after everything else.
    _guard: TerminalGuard,
}

impl InspectorApp {
    pub fn new(
        mut feed: ChannelFeed,
        client: ClientId,
        world: WorldId,
        config: &MonitorConfig,
        shutdown: watch::Sender<bool>,
        log_receiver: Receiver<String>,
    ) -> Result<Self> {
        let mut session = MonitorSession::new(client, config)?;
        session.switch_world(&mut feed, world)?;

        let stdout = std::io::stdout();
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        let guard = TerminalGuard::enter(shutdown)?;
        terminal.clear()?;
        terminal.hide_cursor()?;
        Ok(Self {
            terminal,
            ui_state: UiState::new(config.filter.clone(), config.view.initial_zoom),
            session,
            feed,
            default_filter: config.filter.clone(),
            log_receiver,
            started: Instant::now(),
            _guard: guard,
        })
    }

    pub fn run(mut self) -> Result<()> {
        let mut last_draw = Instant::now();

        loop {
            self.session.pump(self.started.elapsed());

            while let Ok(line) = self.log_receiver.try_recv() {
                self.ui_state.push_log(line);
            }

            if last_draw.elapsed() >= Duration::from_millis(100) {
                self.terminal
                    .draw(|frame| draw_ui(frame, &self.ui_state, &self.session))?;
                last_draw = Instant::now();
            }

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => break,
                        KeyCode::Char('=') | KeyCode::Char('+') => self.adjust_zoom(2.0),
                        KeyCode::Char('-') | KeyCode::Char('_') => self.adjust_zoom(0.5),
                        KeyCode::Char('[') => self.adjust_level(true, -LEVEL_STEP),
                        KeyCode::Char(']') => self.adjust_level(true, LEVEL_STEP),
                        KeyCode::Char('{') => self.adjust_level(false, -LEVEL_STEP),
                        KeyCode::Char('}') => self.adjust_level(false, LEVEL_STEP),
                        KeyCode::Char('h') => {
                            self.ui_state.filter.include_hibernating =
                                !self.ui_state.filter.include_hibernating;
                            self.apply_filter();
                        }
                        KeyCode::Char('c') => {
                            self.ui_state.filter = self.default_filter.clone();
                            self.apply_filter();
                        }
                        KeyCode::Char('n') => self.step_world(1),
                        KeyCode::Char('p') => self.step_world(-1),
                        _ => {}
                    }
                }
            }
        }

        self.terminal.show_cursor()?;
        Ok(())
    }

    fn adjust_zoom(&mut self, factor: f32) {
        let zoom = (self.ui_state.zoom * factor).clamp(0.25, 1024.0);
        if self.session.set_zoom(zoom) {
            self.ui_state.zoom = zoom;
            let scale = self.session.instances().scale();
            self.ui_state
                .push_log(format!("Zoom {:.2} (marker scale {:.2})", zoom, scale));
        }
    }

    fn adjust_level(&mut self, lower: bool, delta: i32) {
        let filter = &mut self.ui_state.filter;
        let field = if lower {
            &mut filter.level_min
        } else {
            &mut filter.level_max
        };
        let current = field.trim().parse::<i32>().unwrap_or(if lower { 0 } else { 100 });
        *field = current.saturating_add(delta).to_string();
        self.apply_filter();
    }

    fn apply_filter(&mut self) {
        match self.session.set_filter_spec(&self.ui_state.filter) {
            Ok(flipped) => {
                let spec = serde_json::to_string(&self.ui_state.filter).unwrap_or_default();
                info!(flipped, filter = %spec, "filter.applied");
            }
            Err(err) => {
                warn!("Filter rejected: {}", err);
                self.ui_state.push_log(format!("Filter rejected: {err}"));
            }
        }
    }

    fn step_world(&mut self, delta: i64) {
        let Some(current) = self.session.world() else {
            return;
        };
        let next = (current.0 as i64 + delta).clamp(0, u32::MAX as i64) as u32;
        if next == current.0 {
            return;
        }
        match self.session.switch_world(&mut self.feed, WorldId(next)) {
            Ok(()) => self.ui_state.push_log(format!("Switched to {}", WorldId(next))),
            Err(err) => error!("Failed to switch world: {}", err),
        }
    }
}
