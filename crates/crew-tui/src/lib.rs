//! crewctl TUI crate — terminal dashboard for one run's live-state snapshot.

pub mod app;
pub mod theme;
pub mod ui;

pub use app::App;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{prelude::CrosstermBackend, Terminal};

/// Restore the terminal to its original state.
///
/// Disables raw mode, leaves the alternate screen, disables mouse capture.
/// Errors are intentionally ignored so this is safe to call from a panic
/// hook where we cannot propagate errors.
fn restore_terminal() {
    let _ = disable_raw_mode();
    let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
}

/// Run the dashboard, polling `snapshot_path` every `poll_period` until the
/// snapshot reports `finished: true` or the user quits (`q` / `Esc` / `Ctrl-C`).
pub fn run(snapshot_path: PathBuf, poll_period: Duration) -> Result<()> {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        restore_terminal();
        original_hook(info);
    }));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(snapshot_path, poll_period);
    let result = app.run(&mut terminal);

    restore_terminal();
    terminal.show_cursor()?;

    result
}
