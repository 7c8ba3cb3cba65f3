//! Status-to-color mapping shared by the dashboard's agent table.

use ratatui::style::Color;

#[must_use]
pub fn status_color(status: &str) -> Color {
    match status {
        "DONE" => Color::Green,
        "BLOCKED" => Color::Red,
        "RUNNING" => Color::Yellow,
        _ => Color::Gray,
    }
}

#[must_use]
pub fn overall_color(state: &str) -> Color {
    match state {
        "DONE" => Color::Green,
        "BLOCKED" => Color::Red,
        "PLANNING" => Color::Cyan,
        _ => Color::Yellow,
    }
}
