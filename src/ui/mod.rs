//! Rendering: the brief table, detail pane, status letters, prompt line,
//! and the modal overlays.

pub mod widgets;

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table},
    Frame,
};

use crate::app::{App, Modal, DETAIL, FROZEN, MULTI, SEQ_COLUMN_WIDTH, STOP};
use widgets::{centered_rect, fit};

const TITLE_COLOR: Color = Color::Yellow;
const SEQ_COLOR: Color = Color::Green;
const SELECTED_BG: Color = Color::Green;
const CURSOR_STYLE: Modifier = Modifier::REVERSED;

pub fn render(frame: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(frame.area());

    render_main(frame, app, chunks[0]);
    render_status_line(frame, app, chunks[1]);

    match &app.modal {
        Modal::None => {}
        Modal::Confirm { text, .. } => render_confirm(frame, text.clone()),
        Modal::Form {
            title,
            label,
            input,
            ..
        } => render_form(frame, title.clone(), label.clone(), input.clone()),
        Modal::Help => render_help(frame),
    }
}

fn render_main(frame: &mut Frame, app: &mut App, area: Rect) {
    let brief_width = app.brief_width();

    // narrow terminals get the detail as a page instead of a side pane
    if app.is_set(DETAIL) && area.width <= brief_width * 2 {
        app.page_rows = area.height.saturating_sub(2).max(1) as usize;
        render_detail(frame, app, area, true);
        return;
    }

    let panes = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(brief_width), Constraint::Min(0)])
        .split(area);

    app.page_rows = panes[0].height.saturating_sub(2).max(1) as usize;
    render_brief(frame, app, panes[0]);
    if app.is_set(DETAIL) {
        render_detail(frame, app, panes[1], false);
    } else {
        frame.render_widget(
            Block::default().borders(Borders::LEFT),
            panes[1],
        );
    }
}

fn render_brief(frame: &mut Frame, app: &mut App, area: Rect) {
    let mut header_cells = vec![Cell::from("Seq").style(Style::default().fg(TITLE_COLOR))];
    for column in &app.columns {
        header_cells.push(Cell::from(column.title.clone()).style(Style::default().fg(TITLE_COLOR)));
    }
    let header = Row::new(header_cells);

    let mut rows = Vec::with_capacity(app.store.len());
    for entry in app.store.iter() {
        let row_index = entry.seq as usize;
        let mut cells = vec![
            Cell::from(format!("{:X}", entry.seq)).style(Style::default().fg(SEQ_COLOR)),
        ];
        let brief = app.codec.brief(&entry.record);
        for (column, text) in app.columns.iter().zip(brief) {
            cells.push(Cell::from(fit(&text, column.max_width)));
        }

        let mut row = Row::new(cells);
        if app.multis.contains(&row_index) {
            row = row.style(Style::default().bg(SELECTED_BG).fg(Color::Black));
        }
        rows.push(row);
    }

    let mut constraints = vec![Constraint::Length(SEQ_COLUMN_WIDTH)];
    for column in &app.columns {
        constraints.push(Constraint::Length(column.max_width));
    }

    let table = Table::new(rows, constraints)
        .header(header)
        .block(Block::default().borders(Borders::NONE))
        .row_highlight_style(Style::default().add_modifier(CURSOR_STYLE));

    frame.render_stateful_widget(table, area, &mut app.table_state);
}

fn render_detail(frame: &mut Frame, app: &App, area: Rect, as_page: bool) {
    let block = if as_page {
        Block::default().borders(Borders::ALL).title("detail")
    } else {
        Block::default().borders(Borders::LEFT)
    };
    let detail = Paragraph::new(app.detail_text.as_str())
        .block(block)
        .wrap(ratatui::widgets::Wrap { trim: false })
        .scroll((app.detail_scroll, 0));
    frame.render_widget(detail, area);
}

fn render_status_line(frame: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(4),
            Constraint::Length(1),
            Constraint::Min(0),
        ])
        .split(area);

    frame.render_widget(Paragraph::new(status_line(app)), chunks[0]);
    frame.render_widget(
        Paragraph::new("|").style(Style::default().fg(Color::Green)),
        chunks[1],
    );
    frame.render_widget(Paragraph::new(app.prompt.as_str()), chunks[2]);
}

/// The four status letters, set bits highlighted.
fn status_line(app: &App) -> Line<'static> {
    let letter = |label: &'static str, set: bool| {
        if set {
            Span::styled(
                label,
                Style::default()
                    .fg(Color::Black)
                    .bg(Color::Green)
                    .add_modifier(Modifier::BOLD),
            )
        } else {
            Span::raw(label)
        }
    };
    Line::from(vec![
        letter("F", app.is_set(FROZEN)),
        letter("D", app.is_set(DETAIL)),
        letter("S", app.is_set(STOP)),
        letter("M", app.is_set(MULTI)),
    ])
}

fn render_confirm(frame: &mut Frame, text: String) {
    let area = centered_rect(30, 5, frame.area());
    frame.render_widget(Clear, area);
    let body = Paragraph::new(vec![
        Line::from(text),
        Line::from(""),
        Line::from(Span::styled(
            "Enter OK / Esc Cancel",
            Style::default().fg(Color::DarkGray),
        )),
    ])
    .block(Block::default().borders(Borders::ALL))
    .alignment(ratatui::layout::Alignment::Center);
    frame.render_widget(body, area);
}

fn render_form(frame: &mut Frame, title: String, label: String, input: String) {
    let area = centered_rect(60, 5, frame.area());
    frame.render_widget(Clear, area);
    let body = Paragraph::new(vec![
        Line::from(vec![
            Span::styled(format!("{}: ", label), Style::default().fg(TITLE_COLOR)),
            Span::raw(input),
            Span::styled("_", Style::default().add_modifier(Modifier::SLOW_BLINK)),
        ]),
        Line::from(""),
        Line::from(Span::styled(
            "Enter OK / Esc Cancel",
            Style::default().fg(Color::DarkGray),
        )),
    ])
    .block(Block::default().borders(Borders::ALL).title(title));
    frame.render_widget(body, area);
}

/// `(view, key, summary)` rows of the help table.
pub const HELP_ENTRIES: &[(&str, &str, &str)] = &[
    ("all", "f", "toggle frozen scroll"),
    ("all", "s", "toggle stop capture"),
    ("all", "j/Down", "down"),
    ("all", "k/Up", "up"),
    ("all", "g/Home", "goto first line"),
    ("all", "G/End", "goto last line"),
    ("all", "ctrl-f/PgDn", "page down"),
    ("all", "ctrl-b/PgUp", "page up"),
    ("all", "ctrl-c", "exit"),
    ("all", "?", "help"),
    ("brief", "Enter", "enter detail"),
    ("brief", "Esc", "clean prompt"),
    ("brief", "C", "clear records"),
    ("brief", "S", "save selected/all"),
    ("brief", "L", "load from file"),
    ("brief", "M", "toggle multiple select mode"),
    ("brief", "m", "select/unselect row, select mode only"),
    ("brief", "r", "revert selected, select mode only"),
    ("brief", "a", "select/unselect all, select mode only"),
    ("brief", "c", "clear selected, select mode only"),
    ("brief", "R", "replay current/selected rows"),
    ("detail", "q/Esc", "exit detail"),
    ("help", "q/Esc", "exit help"),
];

fn render_help(frame: &mut Frame) {
    let mut widths = [4usize, 3, 7]; // header widths
    for (view, key, summary) in HELP_ENTRIES {
        widths[0] = widths[0].max(view.len());
        widths[1] = widths[1].max(key.len());
        widths[2] = widths[2].max(summary.len());
    }
    let total: usize = widths.iter().sum::<usize>() + 2 + 4; // separators + borders

    let header = Row::new(vec![
        Cell::from("view").style(Style::default().fg(TITLE_COLOR)),
        Cell::from("key").style(Style::default().fg(TITLE_COLOR)),
        Cell::from("summary").style(Style::default().fg(TITLE_COLOR)),
    ]);
    let rows: Vec<Row> = HELP_ENTRIES
        .iter()
        .map(|(view, key, summary)| Row::new(vec![*view, *key, *summary]))
        .collect();

    let area = centered_rect(total as u16, HELP_ENTRIES.len() as u16 + 3, frame.area());
    frame.render_widget(Clear, area);
    let table = Table::new(
        rows,
        [
            Constraint::Length(widths[0] as u16),
            Constraint::Length(widths[1] as u16),
            Constraint::Length(widths[2] as u16),
        ],
    )
    .header(header)
    .block(Block::default().borders(Borders::ALL).title(" help "));
    frame.render_widget(table, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{App, BriefColumn};
    use crate::record::{Body, Codec, DecodeError, Decoded, Flow, Record};
    use crate::replay::NoHooks;
    use std::sync::Arc;

    struct NullCodec;

    impl Codec for NullCodec {
        fn decode(
            &self,
            _net: &Flow,
            _transport: &Flow,
            buf: &[u8],
        ) -> Result<Decoded, DecodeError> {
            let bodies: Vec<Body> = vec![Box::new(())];
            Ok(Decoded {
                bodies,
                consumed: buf.len(),
            })
        }

        fn brief(&self, _record: &Record) -> Vec<String> {
            vec![]
        }

        fn detail(&self, _record: &Record) -> String {
            String::new()
        }
    }

    #[test]
    fn brief_width_accounts_for_all_columns() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let app = App::new(
            8,
            Arc::new(NullCodec),
            Arc::new(NoHooks),
            vec![BriefColumn::new("A", 10), BriefColumn::new("B", 6)],
            tx,
        );
        // seq (4+2) + (1+10) + (1+6)
        assert_eq!(app.brief_width(), 24);
    }

    #[test]
    fn status_line_has_four_letters() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let mut app = App::new(8, Arc::new(NullCodec), Arc::new(NoHooks), vec![], tx);
        let line = status_line(&app);
        assert_eq!(line.spans.len(), 4);
        assert_eq!(line.to_string(), "FDSM");

        app.toggle(STOP);
        let line = status_line(&app);
        assert_eq!(line.to_string(), "FDSM");
    }

    #[test]
    fn help_covers_every_binding_class() {
        let views: std::collections::HashSet<&str> =
            HELP_ENTRIES.iter().map(|(v, _, _)| *v).collect();
        for view in ["all", "brief", "detail", "help"] {
            assert!(views.contains(view), "missing help section {view}");
        }
    }
}
