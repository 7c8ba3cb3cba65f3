//! Poll-and-render loop: rereads the live-state snapshot every tick and
//! redraws, independent of the orchestrator thread that writes it.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode};
use ratatui::{prelude::CrosstermBackend, Terminal};
use serde_json::Value;

use crate::ui;

pub struct App {
    snapshot_path: PathBuf,
    poll_period: Duration,
    snapshot: Option<Value>,
    last_error: Option<String>,
}

impl App {
    #[must_use]
    pub fn new(snapshot_path: PathBuf, poll_period: Duration) -> Self {
        Self { snapshot_path, poll_period, snapshot: None, last_error: None }
    }

    /// Drive the render loop until the run finishes or the user quits.
    pub fn run(&mut self, terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>) -> Result<()> {
        loop {
            self.reload();
            terminal.draw(|frame| ui::render(frame, self.snapshot.as_ref(), self.last_error.as_deref()))?;

            if self.finished() {
                let deadline = Instant::now() + Duration::from_millis(600);
                while Instant::now() < deadline {
                    if self.wait_for_quit(Duration::from_millis(50))? {
                        return Ok(());
                    }
                }
                return Ok(());
            }

            if self.wait_for_quit(self.poll_period)? {
                return Ok(());
            }
        }
    }

    fn finished(&self) -> bool {
        self.snapshot.as_ref().and_then(|v| v.get("finished")).and_then(Value::as_bool).unwrap_or(false)
    }

    fn reload(&mut self) {
        match std::fs::read_to_string(&self.snapshot_path) {
            Ok(text) => match serde_json::from_str::<Value>(&text) {
                Ok(value) => {
                    self.snapshot = Some(value);
                    self.last_error = None;
                }
                Err(e) => self.last_error = Some(format!("snapshot parse error: {e}")),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.last_error = Some("waiting for the first snapshot...".to_owned());
            }
            Err(e) => self.last_error = Some(format!("snapshot read error: {e}")),
        }
    }

    /// Block for up to `timeout`, returning `true` iff the user asked to quit.
    fn wait_for_quit(&self, timeout: Duration) -> Result<bool> {
        if !event::poll(timeout)? {
            return Ok(false);
        }
        if let Event::Key(key) = event::read()? {
            let quit = matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
                || (key.code == KeyCode::Char('c') && key.modifiers.contains(event::KeyModifiers::CONTROL));
            return Ok(quit);
        }
        Ok(false)
    }
}
