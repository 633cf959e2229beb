//! Terminal front end. The event loop polls the keyboard every 10 ms and
//! uses the same tick to pump the non-blocking source, so sampling cadence
//! never waits on rendering.

mod ui;

use std::io;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;

use crate::frame::ComputedFrame;
use crate::recording::replay::ReplaySource;
use crate::sampler::{LiveSource, SourceState};
use crate::source::StatSource;

const INPUT_POLL: Duration = Duration::from_millis(10);
const REDRAW_INTERVAL: Duration = Duration::from_millis(250);
/// Upper bound on frames pumped per tick so fast-forwarding replay cannot
/// starve input handling.
const FRAMES_PER_TICK: usize = 64;

pub enum AnySource {
    Live(LiveSource),
    Replay(ReplaySource),
}

impl AnySource {
    fn source_mut(&mut self) -> &mut dyn StatSource {
        match self {
            AnySource::Live(live) => live,
            AnySource::Replay(replay) => replay,
        }
    }

    fn source(&self) -> &dyn StatSource {
        match self {
            AnySource::Live(live) => live,
            AnySource::Replay(replay) => replay,
        }
    }

    fn replay_mut(&mut self) -> Option<&mut ReplaySource> {
        match self {
            AnySource::Live(_) => None,
            AnySource::Replay(replay) => Some(replay),
        }
    }
}

pub(crate) struct App {
    source: AnySource,
    latest: Option<ComputedFrame>,
    quit: bool,
}

impl App {
    fn new(source: AnySource) -> Self {
        App {
            source,
            latest: None,
            quit: false,
        }
    }

    pub(crate) fn source(&self) -> &AnySource {
        &self.source
    }

    pub(crate) fn latest(&self) -> Option<&ComputedFrame> {
        self.latest.as_ref()
    }

    pub(crate) fn status_line(&self) -> String {
        match &self.source {
            AnySource::Live(live) => match live.state() {
                SourceState::Running if live.is_recording() => "LIVE · recording".to_owned(),
                SourceState::Running => "LIVE".to_owned(),
                SourceState::TargetExited => "LIVE · target exited".to_owned(),
                SourceState::Failed => "LIVE · lost the stats region".to_owned(),
            },
            AnySource::Replay(replay) => {
                let position = replay.position().map_or(0, |i| i + 1);
                let mut line = format!(
                    "REPLAY · frame {position}/{} · {}x",
                    replay.frame_count(),
                    replay.speed()
                );
                if replay.is_paused() {
                    line.push_str(" · paused");
                } else if replay.is_finished() {
                    line.push_str(" · end");
                }
                if replay.truncated() {
                    line.push_str(" · truncated file");
                }
                line
            }
        }
    }

    fn on_key(&mut self, code: KeyCode, modifiers: KeyModifiers) {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => self.quit = true,
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => self.quit = true,
            KeyCode::Char(' ') => {
                if let Some(replay) = self.source.replay_mut() {
                    replay.toggle_pause();
                }
            }
            KeyCode::Left => {
                if let Some(replay) = self.source.replay_mut() {
                    if let Some(frame) = replay.step(-1) {
                        self.latest = Some(frame);
                    }
                }
            }
            KeyCode::Right => {
                if let Some(replay) = self.source.replay_mut() {
                    if let Some(frame) = replay.step(1) {
                        self.latest = Some(frame);
                    }
                }
            }
            KeyCode::Home => {
                if let Some(replay) = self.source.replay_mut() {
                    if let Some(frame) = replay.seek(0) {
                        self.latest = Some(frame);
                    }
                }
            }
            KeyCode::Char('+') | KeyCode::Char('=') => {
                if let Some(replay) = self.source.replay_mut() {
                    replay.speed_up();
                }
            }
            KeyCode::Char('-') | KeyCode::Char('_') => {
                if let Some(replay) = self.source.replay_mut() {
                    replay.slow_down();
                }
            }
            _ => {}
        }
    }
}

/// Restores the terminal even when the draw loop errors out.
struct RawModeGuard;

impl RawModeGuard {
    fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        execute!(io::stdout(), EnterAlternateScreen)?;
        Ok(RawModeGuard)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        let _ = disable_raw_mode();
    }
}

pub fn run(source: AnySource) -> io::Result<()> {
    let _guard = RawModeGuard::enter()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
    let mut app = App::new(source);
    let mut last_draw = Instant::now() - REDRAW_INTERVAL;
    let mut dirty = true;

    while !app.quit {
        for _ in 0..FRAMES_PER_TICK {
            match app.source.source_mut().next_frame() {
                Some(frame) => {
                    app.latest = Some(frame);
                    dirty = true;
                }
                None => break,
            }
        }

        if event::poll(INPUT_POLL)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    app.on_key(key.code, key.modifiers);
                    dirty = true;
                }
                Event::Resize(_, _) => dirty = true,
                _ => {}
            }
        }

        if dirty || last_draw.elapsed() >= REDRAW_INTERVAL {
            terminal.draw(|frame| ui::draw(frame, &app))?;
            last_draw = Instant::now();
            dirty = false;
        }
    }

    // A live session may still be mirroring frames to disk.
    if let AnySource::Live(live) = &mut app.source {
        live.stop_recording();
    }
    Ok(())
}
