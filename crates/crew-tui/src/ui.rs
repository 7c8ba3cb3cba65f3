//! Frame layout: header, per-agent table, activity tail.

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph, Row, Table},
    Frame,
};
use serde_json::Value;

use crate::theme::{overall_color, status_color};

pub fn render(frame: &mut Frame, snapshot: Option<&Value>, error: Option<&str>) {
    let area = frame.area();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(5), Constraint::Length(8)])
        .split(area);

    render_header(frame, chunks[0], snapshot, error);
    render_agents(frame, chunks[1], snapshot);
    render_activity(frame, chunks[2], snapshot);
}

fn render_header(frame: &mut Frame, area: Rect, snapshot: Option<&Value>, error: Option<&str>) {
    let Some(snapshot) = snapshot else {
        let text = error.unwrap_or("waiting for the first snapshot...");
        frame.render_widget(Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("crewctl")), area);
        return;
    };

    let run_id = str_field(snapshot, "runId");
    let task = str_field(snapshot, "task");
    let mode = str_field(snapshot, "taskMode");
    let overall = str_field(snapshot, "overallState");
    let tick = snapshot.get("tick").and_then(Value::as_u64).unwrap_or(0);

    let line = Line::from(vec![
        Span::raw(format!("run {run_id} ")),
        Span::styled(overall.to_owned(), Style::default().fg(overall_color(overall)).add_modifier(Modifier::BOLD)),
        Span::raw(format!("  mode={mode}  tick={tick}  task={task}")),
    ]);
    frame.render_widget(Paragraph::new(line).block(Block::default().borders(Borders::ALL).title("crewctl")), area);
}

fn render_agents(frame: &mut Frame, area: Rect, snapshot: Option<&Value>) {
    let rows: Vec<Row> = snapshot
        .and_then(|s| s.get("agents"))
        .and_then(Value::as_array)
        .map(|agents| {
            agents
                .iter()
                .map(|agent| {
                    let name = str_field(agent, "name");
                    let scope = str_field(agent, "scope");
                    let status = str_field(agent, "status");
                    let changed = agent.get("changedFileCount").and_then(Value::as_u64).unwrap_or(0);
                    let message = agent.get("blockerReason").and_then(Value::as_str).unwrap_or_else(|| {
                        agent.get("latestMessage").and_then(Value::as_str).unwrap_or("")
                    });
                    Row::new(vec![
                        name.to_owned(),
                        scope.to_owned(),
                        status.to_owned(),
                        changed.to_string(),
                        message.to_owned(),
                    ])
                    .style(Style::default().fg(status_color(status)))
                })
                .collect()
        })
        .unwrap_or_default();

    let table = Table::new(
        rows,
        [
            Constraint::Length(18),
            Constraint::Length(20),
            Constraint::Length(10),
            Constraint::Length(8),
            Constraint::Min(20),
        ],
    )
    .header(Row::new(vec!["agent", "scope", "status", "files", "message"]).style(Style::default().add_modifier(Modifier::BOLD)))
    .block(Block::default().borders(Borders::ALL).title("agents"));

    frame.render_widget(table, area);
}

fn render_activity(frame: &mut Frame, area: Rect, snapshot: Option<&Value>) {
    let items: Vec<ListItem> = snapshot
        .and_then(|s| s.get("activity"))
        .and_then(Value::as_array)
        .map(|lines| lines.iter().filter_map(Value::as_str).map(ListItem::new).collect())
        .unwrap_or_default();

    let list = List::new(items).block(Block::default().borders(Borders::ALL).title("activity"));
    frame.render_widget(list, area);
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}
